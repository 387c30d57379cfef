use std::sync::Arc;

use crate::{
    devsup::{DevSupError, DeviceSupport, IoStatus},
    genvar::{
        GenVarError, apply_phase2, get, get_nolock, init_inp_rec, init_out_rec, put, put_nolock,
        readback_nolock,
    },
    record::Record,
    records::{
        AiRecord, AoRecord, BiRecord, BoRecord, LonginRecord, LongoutRecord, MbbiRecord,
        MbboRecord, place_mask,
    },
    registry::Registries,
};

/// Device support binding standard records to generic variables
#[derive(Debug, Clone)]
pub struct GenVarDevSup {
    registries: Arc<Registries>,
}

impl Default for GenVarDevSup {
    fn default() -> Self {
        Self::new(Registries::global())
    }
}

impl GenVarDevSup {
    pub fn new(registries: Arc<Registries>) -> Self {
        GenVarDevSup { registries }
    }
}

/// Run `f` under the lock of the variable the record is bound to
fn locked<R: Record + ?Sized, T>(
    record: &mut R,
    f: impl FnOnce(&mut R) -> Result<T, GenVarError>,
) -> Result<T, GenVarError> {
    let variable = record
        .common()
        .dpvt
        .genvar()
        .map(|binding| binding.variable().clone())
        .ok_or(GenVarError::NotBound)?;
    let _guard = variable.lock();
    f(record)
}

impl DeviceSupport<AiRecord> for GenVarDevSup {
    fn init_record(&self, record: &mut AiRecord) -> Result<IoStatus, DevSupError> {
        let inp = record.inp.clone();
        Ok(init_inp_rec(&self.registries, &inp, record, "RVAL", Some("VAL"))?)
    }

    fn process(&self, record: &mut AiRecord) -> Result<IoStatus, DevSupError> {
        let status = get(record)?;
        if status == IoStatus::NoConvert {
            record.common.udf = record.val.is_nan();
        }
        Ok(status)
    }
}

impl DeviceSupport<LonginRecord> for GenVarDevSup {
    fn init_record(&self, record: &mut LonginRecord) -> Result<IoStatus, DevSupError> {
        let inp = record.inp.clone();
        Ok(init_inp_rec(&self.registries, &inp, record, "VAL", None)?)
    }

    fn process(&self, record: &mut LonginRecord) -> Result<IoStatus, DevSupError> {
        Ok(get(record)?)
    }
}

impl DeviceSupport<BiRecord> for GenVarDevSup {
    fn init_record(&self, record: &mut BiRecord) -> Result<IoStatus, DevSupError> {
        let inp = record.inp.clone();
        Ok(init_inp_rec(&self.registries, &inp, record, "RVAL", Some("VAL"))?)
    }

    fn process(&self, record: &mut BiRecord) -> Result<IoStatus, DevSupError> {
        Ok(locked(record, |record| {
            let status = get_nolock(record)?;
            if status == IoStatus::Done && record.mask != 0 {
                record.rval &= record.mask;
            }
            Ok(status)
        })?)
    }
}

impl DeviceSupport<MbbiRecord> for GenVarDevSup {
    fn init_record(&self, record: &mut MbbiRecord) -> Result<IoStatus, DevSupError> {
        let inp = record.inp.clone();
        let status = init_inp_rec(&self.registries, &inp, record, "RVAL", Some("VAL"))?;
        record.mask = place_mask(record.mask, record.nobt, record.shft);
        Ok(status)
    }

    fn process(&self, record: &mut MbbiRecord) -> Result<IoStatus, DevSupError> {
        Ok(locked(record, |record| {
            let status = get_nolock(record)?;
            if status == IoStatus::Done && record.mask != 0 {
                record.rval &= record.mask;
            }
            Ok(status)
        })?)
    }
}

impl DeviceSupport<AoRecord> for GenVarDevSup {
    fn init_record(&self, record: &mut AoRecord) -> Result<IoStatus, DevSupError> {
        let out = record.out.clone();
        Ok(init_out_rec(&self.registries, &out, record, "RVAL", Some("VAL"))?)
    }

    fn process(&self, record: &mut AoRecord) -> Result<IoStatus, DevSupError> {
        Ok(put(record)?)
    }
}

impl DeviceSupport<LongoutRecord> for GenVarDevSup {
    fn init_record(&self, record: &mut LongoutRecord) -> Result<IoStatus, DevSupError> {
        let out = record.out.clone();
        Ok(init_out_rec(&self.registries, &out, record, "VAL", None)?)
    }

    fn process(&self, record: &mut LongoutRecord) -> Result<IoStatus, DevSupError> {
        Ok(put(record)?)
    }
}

impl DeviceSupport<BoRecord> for GenVarDevSup {
    fn init_record(&self, record: &mut BoRecord) -> Result<IoStatus, DevSupError> {
        let out = record.out.clone();
        let mut status = init_out_rec(&self.registries, &out, record, "RVAL", None)?;
        if record.common.pini {
            status = IoStatus::NoConvert;
        } else if record.mask != 0 {
            record.rval &= record.mask;
        }
        Ok(status)
    }

    /// Only the bits in `MASK` are written; the others keep the variable's
    /// current value
    fn process(&self, record: &mut BoRecord) -> Result<IoStatus, DevSupError> {
        Ok(locked(record, |record| {
            let variable = record.common.dpvt.genvar().map(|b| b.variable().clone());
            if let Some(variable) = variable
                && apply_phase2(&mut record.common, &variable)
            {
                return Ok(IoStatus::Done);
            }
            if record.mask != 0 {
                let wanted = record.rval;
                readback_nolock(record)?;
                record.rval = (record.rval & !record.mask) | (wanted & record.mask);
            }
            put_nolock(record)
        })?)
    }
}

impl DeviceSupport<MbboRecord> for GenVarDevSup {
    fn init_record(&self, record: &mut MbboRecord) -> Result<IoStatus, DevSupError> {
        let out = record.out.clone();
        let mut status = init_out_rec(&self.registries, &out, record, "RVAL", None)?;
        record.mask = place_mask(record.mask, record.nobt, record.shft);
        record.rbv = record.rval;
        if record.common.pini {
            status = IoStatus::NoConvert;
        } else if record.mask != 0 {
            record.rval &= record.mask;
        }
        Ok(status)
    }

    fn process(&self, record: &mut MbboRecord) -> Result<IoStatus, DevSupError> {
        Ok(locked(record, |record| {
            let variable = record.common.dpvt.genvar().map(|b| b.variable().clone());
            if let Some(variable) = variable
                && apply_phase2(&mut record.common, &variable)
            {
                return Ok(IoStatus::Done);
            }
            let wanted = record.rval;
            readback_nolock(record)?;
            record.rbv = record.rval;
            record.rval = (record.rval & !record.mask) | (wanted & record.mask);
            put_nolock(record)
        })?)
    }
}
