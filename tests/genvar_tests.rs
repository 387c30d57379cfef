use std::{
    sync::Arc,
    time::{Duration, UNIX_EPOCH},
};

use epics_devsup::{
    alarm::{Alarm, AlarmStatus, Severity},
    dbr::DbrValue,
    genvar::{GenVar, GenVarDevSup, GenVarError, WaitStatus},
    record::{Record, ScanMode, TimeSource},
    records::{AiRecord, BoRecord, LonginRecord, LongoutRecord, MbbiRecord, MbboRecord},
    registry::Registries,
    scan::{Scheduler, adopt_record, initialize},
};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::TestWriter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_writer(TestWriter::new())
        .try_init();
}

fn setup(name: &str, variables: Vec<GenVar>) -> (Arc<Registries>, Arc<GenVarDevSup>) {
    let registries = Arc::new(Registries::new());
    registries.genvars.register(name, variables).unwrap();
    let dset = Arc::new(GenVarDevSup::new(registries.clone()));
    (registries, dset)
}

#[test]
fn input_takes_value_alarm_and_device_time() {
    init_tracing();
    let stamp = UNIX_EPOCH + Duration::from_nanos(12345678);
    let (registries, dset) = setup(
        "testL",
        vec![GenVar::new(-1i32), GenVar::builder(-2i32 as u32).event().build()],
    );
    let var = registries.genvars.find("testL").unwrap().bind(1).unwrap();
    {
        let mut data = var.data();
        data.alarm = Alarm::new(AlarmStatus::Write, Severity::Minor);
        data.timestamp = stamp;
    }

    let mut record = LonginRecord::new("LI", "#C1 S0 @testL", dset);
    record.common.tse = TimeSource::Device;
    let record = adopt_record(record, None);
    initialize(&*record).unwrap();

    let mut record = record.lock().unwrap();
    record.process();
    assert_eq!(record.val, -2);
    assert_eq!(
        record.common.alarm(),
        Alarm::new(AlarmStatus::Write, Severity::Minor)
    );
    assert_eq!(record.common.time, stamp);
    assert!(!record.common.udf);
    // Reading posts the variable's event
    assert_eq!(var.wait(0.0), WaitStatus::Ok);
}

#[test]
fn analog_input_conversion_modes() {
    init_tracing();
    let (registries, dset) = setup("adc", vec![GenVar::new(7.75f64)]);

    let mut converted = AiRecord::new("AI:RAW", "#C0 S0 @adc", dset.clone());
    converted.eslo = 2.0;
    let converted = adopt_record(converted, None);
    let direct = adopt_record(AiRecord::new("AI:ENG", "#C0 S1 @adc", dset), None);
    initialize(&*converted).unwrap();
    initialize(&*direct).unwrap();

    {
        let mut record = converted.lock().unwrap();
        assert_eq!(record.common.dpvt.genvar().unwrap().field(), "RVAL");
        record.process();
        assert_eq!(record.rval, 7);
        assert_eq!(record.val, 14.0);
    }
    {
        let mut record = direct.lock().unwrap();
        let binding = record.common.dpvt.genvar().unwrap();
        assert_eq!(binding.field(), "VAL");
        assert!(binding.flags().no_convert && binding.flags().convert_supported);
        record.process();
        assert_eq!(record.val, 7.75);
        assert!(!record.common.udf);
    }

    registries.genvars.find("adc").unwrap().bind(0).unwrap().store(f64::NAN).unwrap();
    let mut record = direct.lock().unwrap();
    record.process();
    assert!(record.val.is_nan());
    assert!(record.common.udf);
}

#[test]
fn out_of_range_values_raise_read_alarm() {
    init_tracing();
    let (_registries, dset) = setup("big", vec![GenVar::new(1.0e12f64)]);
    let record = adopt_record(LonginRecord::new("LI", "#C0 S0 @big", dset), None);
    initialize(&*record).unwrap();
    let mut record = record.lock().unwrap();
    record.process();
    assert_eq!(
        record.common.alarm(),
        Alarm::new(AlarmStatus::Read, Severity::Invalid)
    );
}

#[test]
fn binding_errors_disable_the_record() {
    init_tracing();
    let (_registries, dset) = setup("one", vec![GenVar::new(0u32)]);
    for link in ["#C1 S0 @one", "#C0 S0 @missing", "5"] {
        let record = adopt_record(LonginRecord::new("LI", link, dset.clone()), None);
        assert!(initialize(&*record).is_err());
        assert!(record.lock().unwrap().common.pact);
    }
}

#[test]
fn output_initialises_from_variable() {
    init_tracing();
    let (_registries, dset) = setup("out", vec![GenVar::new(99i32)]);
    let record = adopt_record(LongoutRecord::new("LO", "#C0 S0 @out", dset.clone()), None);
    initialize(&*record).unwrap();
    assert_eq!(record.lock().unwrap().val, 99);
    assert!(!record.lock().unwrap().common.udf);

    let mut pini = LongoutRecord::new("LO:PINI", "#C0 S0 @out", dset);
    pini.common.pini = true;
    pini.val = 5;
    let pini = adopt_record(pini, None);
    initialize(&*pini).unwrap();
    // Processed at initialisation, so the record's value was written
    let group_value = {
        let record = record.lock().unwrap();
        let binding = record.common.dpvt.genvar().unwrap();
        binding.variable().load()
    };
    assert_eq!(group_value, DbrValue::Long(5));
}

#[test]
fn masked_outputs_preserve_other_bits() {
    init_tracing();
    let (registries, dset) = setup("bits", vec![GenVar::new(0xF0F0u32), GenVar::new(0x1234u32)]);
    let group = registries.genvars.find("bits").unwrap();

    let mut bo = BoRecord::new("BO", "#C0 S0 @bits", dset.clone());
    bo.mask = 0x0F;
    let bo = adopt_record(bo, None);
    initialize(&*bo).unwrap();
    {
        let mut bo = bo.lock().unwrap();
        bo.val = 1;
        bo.process();
        assert_eq!(group.bind(0).unwrap().load(), DbrValue::ULong(0xF0FF));
        bo.process();
        assert_eq!(group.bind(0).unwrap().load(), DbrValue::ULong(0xF0FF));
        bo.val = 0;
        bo.process();
        assert_eq!(group.bind(0).unwrap().load(), DbrValue::ULong(0xF0F0));
    }

    let mut mbbo = MbboRecord::new("MBBO", "#C1 S0 @bits", dset.clone());
    mbbo.nobt = 4;
    mbbo.shft = 4;
    let mbbo = adopt_record(mbbo, None);
    initialize(&*mbbo).unwrap();
    let mut mbbo = mbbo.lock().unwrap();
    assert_eq!(mbbo.mask, 0xF0);
    assert_eq!(mbbo.val, 3);
    mbbo.val = 0xC;
    mbbo.process();
    assert_eq!(group.bind(1).unwrap().load(), DbrValue::ULong(0x12C4));
    assert_eq!(mbbo.rbv, 0x1234);

    let mut mbbi = MbbiRecord::new("MBBI", "#C1 S0 @bits", dset);
    mbbi.nobt = 4;
    mbbi.shft = 8;
    let mbbi = adopt_record(mbbi, None);
    initialize(&*mbbi).unwrap();
    let mut mbbi = mbbi.lock().unwrap();
    mbbi.process();
    assert_eq!(mbbi.rval, 0x200);
    assert_eq!(mbbi.val, 2);
}

#[test]
fn asynchronous_write_completes_in_two_phases() {
    init_tracing();
    let (registries, dset) = setup(
        "asyncL",
        vec![GenVar::builder(0u32).lock().event().build()],
    );
    let var = registries.genvars.find("asyncL").unwrap().bind(0).unwrap();
    let mut scheduler = Scheduler::new();

    let mut first = LongoutRecord::new("LO:1", "#C0 S2 @asyncL", dset.clone());
    first.common.tse = TimeSource::Device;
    let first = scheduler.handle().adopt(first);
    let second = scheduler
        .handle()
        .adopt(LongoutRecord::new("LO:2", "#C0 S2 @asyncL", dset));
    initialize(&*first).unwrap();
    initialize(&*second).unwrap();

    {
        let mut record = first.lock().unwrap();
        record.val = 42;
        record.process();
        assert!(record.common.pact);
    }
    assert_eq!(var.load(), DbrValue::ULong(42));
    assert!(var.data().is_attached());
    assert_eq!(var.wait(0.0), WaitStatus::Ok);

    // Only one record may wait on the variable
    {
        let mut record = second.lock().unwrap();
        record.val = 7;
        record.process();
        assert!(!record.common.pact);
        assert_eq!(
            record.common.alarm(),
            Alarm::new(AlarmStatus::Write, Severity::Invalid)
        );
    }
    assert_eq!(var.load(), DbrValue::ULong(42));

    let stamp = UNIX_EPOCH + Duration::from_nanos(44444445);
    {
        let _guard = var.lock();
        let mut data = var.data();
        data.timestamp = stamp;
        data.alarm = Alarm::new(AlarmStatus::Write, Severity::Minor);
    }
    var.complete_processing().unwrap();
    assert!(matches!(
        var.complete_processing(),
        Err(GenVarError::NotAttached)
    ));
    assert_eq!(scheduler.run_pending(), 1);
    {
        let record = first.lock().unwrap();
        assert!(!record.common.pact);
        assert_eq!(record.common.time, stamp);
        assert_eq!(
            record.common.alarm(),
            Alarm::new(AlarmStatus::Write, Severity::Minor)
        );
    }

    // Now the second record can write
    {
        let mut record = second.lock().unwrap();
        record.process();
        assert!(record.common.pact);
    }
    assert_eq!(var.load(), DbrValue::ULong(7));
}

#[test]
fn completion_keeps_the_record_attached_when_the_scheduler_is_gone() {
    init_tracing();
    let (registries, dset) = setup("asyncL", vec![GenVar::new(0u32)]);
    let var = registries.genvars.find("asyncL").unwrap().bind(0).unwrap();
    let scheduler = Scheduler::new();
    let record = scheduler
        .handle()
        .adopt(LongoutRecord::new("LO", "#C0 S2 @asyncL", dset));
    initialize(&*record).unwrap();
    record.lock().unwrap().process();
    assert!(var.data().is_attached());

    drop(scheduler);
    assert!(matches!(
        var.complete_processing(),
        Err(GenVarError::Scheduler(_))
    ));
    assert!(var.data().is_attached());
    assert!(record.lock().unwrap().common.pact);
}

#[test]
fn asynchronous_write_needs_a_scheduler() {
    init_tracing();
    let (registries, dset) = setup("asyncL", vec![GenVar::new(0u32)]);
    let record = adopt_record(LongoutRecord::new("LO", "#C0 S2 @asyncL", dset), None);
    initialize(&*record).unwrap();
    let mut record = record.lock().unwrap();
    record.process();
    assert!(!record.common.pact);
    assert_eq!(
        record.common.alarm(),
        Alarm::new(AlarmStatus::Write, Severity::Invalid)
    );
    let var = registries.genvars.find("asyncL").unwrap().bind(0).unwrap();
    assert!(!var.data().is_attached());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scan_requests_process_bound_inputs() {
    init_tracing();
    let (registries, dset) = setup(
        "ticks",
        GenVar::with_individual_scan_lists([1i32, 2]),
    );
    let group = registries.genvars.find("ticks").unwrap();

    let scheduler = Scheduler::new();
    let handle = scheduler.handle();
    let stop = CancellationToken::new();
    let runner = tokio::spawn(scheduler.run(stop.clone()));

    let records: Vec<_> = (0..2)
        .map(|card| {
            let mut record = LonginRecord::new("LI", &format!("#C{card} S0 @ticks"), dset.clone());
            record.common.scan = ScanMode::IoEvent;
            let record = handle.adopt(record);
            initialize(&*record).unwrap();
            record
        })
        .collect();
    assert!(records[0].lock().unwrap().io_scan().is_some());

    group.bind(1).unwrap().store(20i32).unwrap();
    assert_eq!(group.bind(1).unwrap().scan_request(), 1);

    let mut processed = false;
    for _ in 0..200 {
        if records[1].lock().unwrap().val == 20 {
            processed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(processed);
    // Each variable has its own list
    assert_eq!(records[0].lock().unwrap().val, 0);

    stop.cancel();
    runner.await.unwrap();
}
