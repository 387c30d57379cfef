use std::sync::Arc;

use crate::{
    bus::{BusBinding, LinkError, link_init},
    devsup::{DevSupError, DeviceSupport, IoStatus},
    record::{DevicePrivate, Link, RecordCommon},
    records::{
        AiRecord, AoRecord, BiRecord, BoRecord, LonginRecord, LongoutRecord, MbbiRecord,
        MbboRecord, place_mask,
    },
    registry::Registries,
};

/// Device support reading and writing records' values straight from
/// bus-mapped registers
#[derive(Debug, Clone)]
pub struct BusDevSup {
    registries: Arc<Registries>,
}

impl BusDevSup {
    /// # Safety
    /// Every numeric address reachable from the links of records using this
    /// device support must satisfy the contract of
    /// [`BusDevice::new`](crate::bus::BusDevice::new).
    pub unsafe fn new(registries: Arc<Registries>) -> Self {
        BusDevSup { registries }
    }

    fn bind(&self, link: &Link, common: &mut RecordCommon) -> Result<BusBinding, LinkError> {
        // SAFETY: guaranteed by the caller of `new`
        let binding = unsafe { link_init(&self.registries, link, common) }?;
        common.dpvt = DevicePrivate::Bus(binding.clone());
        Ok(binding)
    }
}

fn binding_of(common: &RecordCommon) -> Result<BusBinding, DevSupError> {
    common.dpvt.bus().cloned().ok_or(DevSupError::NotInitialized)
}

/// Apply `mask` unless it is empty
fn masked(value: u32, mask: u32) -> u32 {
    if mask != 0 { value & mask } else { value }
}

impl DeviceSupport<AiRecord> for BusDevSup {
    fn init_record(&self, record: &mut AiRecord) -> Result<IoStatus, DevSupError> {
        self.bind(&record.inp, &mut record.common)?;
        Ok(IoStatus::Done)
    }

    fn process(&self, record: &mut AiRecord) -> Result<IoStatus, DevSupError> {
        let binding = binding_of(&record.common)?;
        record.rval = binding.get_val(&mut record.common)? as i32;
        Ok(IoStatus::Done)
    }
}

impl DeviceSupport<AoRecord> for BusDevSup {
    fn init_record(&self, record: &mut AoRecord) -> Result<IoStatus, DevSupError> {
        let binding = self.bind(&record.out, &mut record.common)?;
        if record.common.pini {
            return Ok(IoStatus::NoConvert);
        }
        if let Ok(value) = binding.get_val(&mut record.common) {
            record.rval = value as i32;
        }
        record.common.reset_alarms();
        Ok(IoStatus::Done)
    }

    fn process(&self, record: &mut AoRecord) -> Result<IoStatus, DevSupError> {
        let binding = binding_of(&record.common)?;
        let _guard = binding.lock();
        binding.put_val(&mut record.common, record.rval as u32)?;
        Ok(IoStatus::Done)
    }
}

impl DeviceSupport<BiRecord> for BusDevSup {
    fn init_record(&self, record: &mut BiRecord) -> Result<IoStatus, DevSupError> {
        self.bind(&record.inp, &mut record.common)?;
        record.common.udf = false;
        Ok(IoStatus::Done)
    }

    fn process(&self, record: &mut BiRecord) -> Result<IoStatus, DevSupError> {
        let binding = binding_of(&record.common)?;
        let value = binding.get_val(&mut record.common)?;
        record.rval = masked(value, record.mask);
        Ok(IoStatus::Done)
    }
}

impl DeviceSupport<BoRecord> for BusDevSup {
    fn init_record(&self, record: &mut BoRecord) -> Result<IoStatus, DevSupError> {
        let binding = self.bind(&record.out, &mut record.common)?;
        if record.common.pini {
            return Ok(IoStatus::NoConvert);
        }
        if let Ok(value) = binding.get_val(&mut record.common) {
            record.rval = masked(value, record.mask);
        }
        record.common.reset_alarms();
        Ok(IoStatus::Done)
    }

    /// With a mask, only the masked bits of the register change
    fn process(&self, record: &mut BoRecord) -> Result<IoStatus, DevSupError> {
        let binding = binding_of(&record.common)?;
        let _guard = binding.lock();
        let value = if record.mask != 0 {
            let current = binding.get_val(&mut record.common)?;
            (current & !record.mask) | (record.rval & record.mask)
        } else {
            record.rval
        };
        binding.put_val(&mut record.common, value)?;
        Ok(IoStatus::Done)
    }
}

impl DeviceSupport<MbbiRecord> for BusDevSup {
    fn init_record(&self, record: &mut MbbiRecord) -> Result<IoStatus, DevSupError> {
        self.bind(&record.inp, &mut record.common)?;
        record.mask = place_mask(record.mask, record.nobt, record.shft);
        Ok(IoStatus::Done)
    }

    fn process(&self, record: &mut MbbiRecord) -> Result<IoStatus, DevSupError> {
        let binding = binding_of(&record.common)?;
        record.rval = binding.get_val(&mut record.common)? & record.mask;
        Ok(IoStatus::Done)
    }
}

impl DeviceSupport<MbboRecord> for BusDevSup {
    fn init_record(&self, record: &mut MbboRecord) -> Result<IoStatus, DevSupError> {
        let binding = self.bind(&record.out, &mut record.common)?;
        record.mask = place_mask(record.mask, record.nobt, record.shft);
        if let Ok(value) = binding.get_val(&mut record.common) {
            record.rval = value;
            record.rbv = value;
        }
        record.rval &= record.mask;
        if record.common.pini {
            return Ok(IoStatus::NoConvert);
        }
        record.common.reset_alarms();
        Ok(IoStatus::Done)
    }

    /// Only the bits in `MASK` change; `RBV` receives the value read back
    fn process(&self, record: &mut MbboRecord) -> Result<IoStatus, DevSupError> {
        let binding = binding_of(&record.common)?;
        let _guard = binding.lock();
        let current = binding.get_val(&mut record.common)?;
        record.rbv = current;
        let value = (current & !record.mask) | (record.rval & record.mask);
        binding.put_val(&mut record.common, value)?;
        Ok(IoStatus::Done)
    }
}

impl DeviceSupport<LonginRecord> for BusDevSup {
    fn init_record(&self, record: &mut LonginRecord) -> Result<IoStatus, DevSupError> {
        self.bind(&record.inp, &mut record.common)?;
        Ok(IoStatus::Done)
    }

    fn process(&self, record: &mut LonginRecord) -> Result<IoStatus, DevSupError> {
        let binding = binding_of(&record.common)?;
        record.val = binding.get_val(&mut record.common)? as i32;
        Ok(IoStatus::Done)
    }
}

impl DeviceSupport<LongoutRecord> for BusDevSup {
    fn init_record(&self, record: &mut LongoutRecord) -> Result<IoStatus, DevSupError> {
        let binding = self.bind(&record.out, &mut record.common)?;
        if !record.common.pini {
            if let Ok(value) = binding.get_val(&mut record.common) {
                record.val = value as i32;
            }
            record.common.reset_alarms();
        }
        Ok(IoStatus::Done)
    }

    fn process(&self, record: &mut LongoutRecord) -> Result<IoStatus, DevSupError> {
        let binding = binding_of(&record.common)?;
        let _guard = binding.lock();
        binding.put_val(&mut record.common, record.val as u32)?;
        Ok(IoStatus::Done)
    }
}
