use std::{
    collections::HashMap,
    ptr,
    sync::{Arc, Barrier, Mutex},
    thread,
};

use epics_devsup::{
    alarm::{Alarm, AlarmStatus, Severity},
    bus::{BusAccess, BusBinding, BusDevSup, BusDevice, BusError},
    record::{Record, ScanMode},
    records::{AiRecord, BoRecord, LonginRecord, LongoutRecord, MbboRecord},
    registry::Registries,
    scan::{Scheduler, adopt_record, initialize},
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::TestWriter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_writer(TestWriter::new())
        .try_init();
}

/// Heap memory standing in for a block of device registers
struct Scratch {
    words: *mut [u32; 8],
}

impl Scratch {
    fn new(initial: [u32; 8]) -> Self {
        Scratch {
            words: Box::into_raw(Box::new(initial)),
        }
    }

    fn base(&self) -> usize {
        self.words as usize
    }

    fn word(&self, index: usize) -> u32 {
        unsafe { ptr::read_volatile((self.words as *const u32).add(index)) }
    }

    fn bytes(&self, offset: usize, count: usize) -> Vec<u8> {
        (0..count)
            .map(|i| unsafe { ptr::read_volatile((self.words as *const u8).add(offset + i)) })
            .collect()
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        drop(unsafe { Box::from_raw(self.words) });
    }
}

/// Registries with the scratch registers registered as device `regs`
fn scratch_device(scratch: &Scratch) -> (Arc<Registries>, Arc<BusDevSup>) {
    let registries = Arc::new(Registries::new());
    unsafe { registries.register_device("regs", scratch.base()) }.unwrap();
    let dset = Arc::new(unsafe { BusDevSup::new(registries.clone()) });
    (registries, dset)
}

#[test]
fn masked_binary_writes_only_touch_masked_bits() {
    init_tracing();
    let scratch = Scratch::new([0xF0F0_0000, 0, 0, 0, 0, 0, 0, 0]);
    let (_registries, dset) = scratch_device(&scratch);

    let mut record = BoRecord::new("BO", "#C0 S0 @regs,m32", dset);
    record.mask = 0x0F;
    let record = adopt_record(record, None);
    initialize(&*record).unwrap();
    {
        let record = record.lock().unwrap();
        assert_eq!(record.rval, 0);
        assert_eq!(record.val, 0);
    }

    let mut record = record.lock().unwrap();
    record.val = 1;
    record.process();
    assert_eq!(scratch.word(0), 0xF0F0_000F);
    // Writing the same value again changes nothing
    record.process();
    assert_eq!(scratch.word(0), 0xF0F0_000F);
    record.val = 0;
    record.process();
    assert_eq!(scratch.word(0), 0xF0F0_0000);
    assert_eq!(record.common.alarm(), Alarm::NONE);
}

#[test]
fn multibit_output_merges_into_register() {
    init_tracing();
    let scratch = Scratch::new([0, 0x1234_5678, 0, 0, 0, 0, 0, 0]);
    let (_registries, dset) = scratch_device(&scratch);

    let mut record = MbboRecord::new("MBBO", "#C0 S0 @regs+4,m32", dset);
    record.nobt = 4;
    record.shft = 8;
    let record = adopt_record(record, None);
    initialize(&*record).unwrap();

    let mut record = record.lock().unwrap();
    assert_eq!(record.mask, 0xF00);
    assert_eq!(record.rval, 0x600);
    assert_eq!(record.rbv, 0x1234_5678);
    assert_eq!(record.val, 6);

    record.val = 0xA;
    record.process();
    assert_eq!(scratch.word(1), 0x1234_5A78);
    assert_eq!(record.rbv, 0x1234_5678);
    record.process();
    assert_eq!(scratch.word(1), 0x1234_5A78);
    assert_eq!(record.rbv, 0x1234_5A78);
}

#[test]
fn sixteen_bit_little_endian_access() {
    init_tracing();
    let scratch = Scratch::new([0; 8]);
    let (_registries, dset) = scratch_device(&scratch);

    let output = adopt_record(
        LongoutRecord::new("LO", "#C0 S0 @regs+8,le16", dset.clone()),
        None,
    );
    let unsigned = adopt_record(LonginRecord::new("LI", "#C0 S0 @regs+8,le16", dset.clone()), None);
    let signed = adopt_record(LonginRecord::new("LIS", "#C0 S0 @regs+8,le16s", dset), None);
    initialize(&*output).unwrap();
    initialize(&*unsigned).unwrap();
    initialize(&*signed).unwrap();

    {
        let mut output = output.lock().unwrap();
        output.val = 0x1234;
        output.process();
    }
    assert_eq!(scratch.bytes(8, 2), vec![0x34, 0x12]);

    {
        let mut output = output.lock().unwrap();
        output.val = 0x1FFFF;
        output.process();
    }
    assert_eq!(scratch.bytes(8, 4), vec![0xFF, 0xFF, 0, 0]);

    unsigned.lock().unwrap().process();
    signed.lock().unwrap().process();
    assert_eq!(unsigned.lock().unwrap().val, 0xFFFF);
    assert_eq!(signed.lock().unwrap().val, -1);
}

#[test]
fn misaligned_register_raises_read_alarm() {
    init_tracing();
    let scratch = Scratch::new([0; 8]);
    let (_registries, dset) = scratch_device(&scratch);
    let record = adopt_record(LonginRecord::new("LI", "#C0 S0 @regs+2,m32", dset), None);
    initialize(&*record).unwrap();
    let mut record = record.lock().unwrap();
    record.process();
    assert_eq!(
        record.common.alarm(),
        Alarm::new(AlarmStatus::Read, Severity::Invalid)
    );
}

#[test]
fn zero_constant_link_binds_to_null_address() {
    init_tracing();
    let registries = Arc::new(Registries::new());
    let dset = Arc::new(unsafe { BusDevSup::new(registries) });
    let record = adopt_record(AiRecord::new("AI", "0", dset), None);
    initialize(&*record).unwrap();
    let mut record = record.lock().unwrap();
    assert!(!record.common.pact);
    assert_eq!(record.common.dpvt.bus().unwrap().address(), 0);
    record.process();
    assert_eq!(
        record.common.alarm(),
        Alarm::new(AlarmStatus::Read, Severity::Invalid)
    );
}

#[test]
fn bad_links_disable_the_record() {
    init_tracing();
    let registries = Arc::new(Registries::new());
    let dset = Arc::new(unsafe { BusDevSup::new(registries) });
    for link in ["#C0 S0 @nodevice", "#C0 S0 @0x1000,xx32", "OTHER:PV CPP"] {
        let record = adopt_record(AiRecord::new("AI", link, dset.clone()), None);
        assert!(initialize(&*record).is_err());
        assert!(record.lock().unwrap().common.pact);
    }
}

#[test]
fn records_that_failed_to_bind_are_never_processed() {
    init_tracing();
    let registries = Arc::new(Registries::new());
    let dset = Arc::new(unsafe { BusDevSup::new(registries) });
    let mut scheduler = Scheduler::new();
    let record = scheduler
        .handle()
        .adopt(LongoutRecord::new("LO", "#C0 S0 @baddevice", dset));
    assert!(initialize(&*record).is_err());

    {
        let mut record = record.lock().unwrap();
        record.val = 5;
        record.process();
        record.process();
        assert!(record.common.pact);
        assert_eq!(record.common.alarm(), Alarm::NONE);
    }
    let handle = record.lock().unwrap().common.handle().unwrap();
    scheduler.handle().scan(handle).unwrap();
    assert_eq!(scheduler.run_pending(), 1);
    assert!(record.lock().unwrap().common.pact);
}

#[test]
fn concurrent_device_creation_yields_one_device() {
    init_tracing();
    let registries = Arc::new(Registries::new());
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registries = registries.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                unsafe { registries.find_or_create_device("0x40000") }.unwrap()
            })
        })
        .collect();
    let devices: Vec<Arc<BusDevice>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for device in &devices[1..] {
        assert!(Arc::ptr_eq(&devices[0], device));
    }
    assert_eq!(registries.devices.len(), 1);
    assert_eq!(devices[0].name(), "0x40000");
}

/// Registers simulated in a map, keyed by address
#[derive(Debug, Default)]
struct SimulatedRegisters {
    cells: Mutex<HashMap<usize, u32>>,
}

#[derive(Debug)]
struct Simulated;

impl Simulated {
    fn registers(binding: &BusBinding) -> Result<&SimulatedRegisters, BusError> {
        binding
            .device()
            .and_then(|device| device.user_data())
            .and_then(|data| data.downcast_ref::<SimulatedRegisters>())
            .ok_or_else(|| BusError::Device("no simulated registers".to_string()))
    }
}

impl BusAccess for Simulated {
    fn read(&self, binding: &BusBinding) -> Result<u32, BusError> {
        let registers = Self::registers(binding)?;
        let cells = registers.cells.lock().unwrap();
        cells
            .get(&binding.address())
            .copied()
            .ok_or_else(|| BusError::Device(format!("{:#x} offline", binding.address())))
    }

    fn write(&self, binding: &BusBinding, value: u32) -> Result<(), BusError> {
        let registers = Self::registers(binding)?;
        registers.cells.lock().unwrap().insert(binding.address(), value);
        Ok(())
    }
}

#[test]
fn custom_access_and_io_scanning() {
    init_tracing();
    let registries = Arc::new(Registries::new());
    let registers = Arc::new(SimulatedRegisters::default());
    registers.cells.lock().unwrap().insert(0x100 + (1 << 4), 21);
    let device = unsafe { BusDevice::new("sim", 0x100) }.with_user_data(registers.clone());
    registries.add_device(device).unwrap();
    registries
        .register_access_method("sim32", Arc::new(Simulated))
        .unwrap();
    let ticks = registries.add_scan_list("ticks").unwrap();

    let mut scheduler = Scheduler::new();
    let dset = Arc::new(unsafe { BusDevSup::new(registries.clone()) });
    let mut record = AiRecord::new("AI", "#C1 S4 @sim,sim32,ticks", dset.clone());
    record.common.scan = ScanMode::IoEvent;
    record.eslo = 0.5;
    let record = scheduler.handle().adopt(record);
    initialize(&*record).unwrap();
    assert_eq!(ticks.len(), 1);

    assert_eq!(ticks.request(), 1);
    assert_eq!(scheduler.run_pending(), 1);
    {
        let record = record.lock().unwrap();
        assert_eq!(record.rval, 21);
        assert_eq!(record.val, 10.5);
        assert!(!record.common.udf);
        assert_eq!(record.io_scan().map(|list| Arc::ptr_eq(&list, &ticks)), Some(true));
    }

    // A register the simulation does not know reads as a device failure
    let offline = scheduler
        .handle()
        .adopt(AiRecord::new("AI:OFF", "#C2 S4 @sim,sim32", dset));
    initialize(&*offline).unwrap();
    let mut offline = offline.lock().unwrap();
    offline.process();
    assert_eq!(
        offline.common.alarm(),
        Alarm::new(AlarmStatus::Read, Severity::Invalid)
    );
}
