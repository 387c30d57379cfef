//! Binding records to generic variables, and the get/put primitives device
//! support is built from.

use std::sync::Arc;

use tracing::trace;

use crate::{
    alarm::{AlarmStatus, Severity},
    dbr::DbrType,
    devsup::IoStatus,
    genvar::{GenVar, GenVarError},
    record::{DevicePrivate, Link, Record, RecordCommon, TimeSource, VmeIo},
    registry::Registries,
    scan::ScanList,
};

/// Options taken from the low 16 bits of a link's signal number
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct GenVarFlags {
    /// Transfer the engineering value instead of the raw value (bit 0)
    pub no_convert: bool,
    /// Output records complete asynchronously (bit 1)
    pub asynchronous: bool,
    /// Do not signal the variable's event on access (bit 2)
    pub no_post: bool,
    /// The record type has a raw field, so `no_convert` is meaningful
    pub convert_supported: bool,
}

impl GenVarFlags {
    pub const NO_CONVERT: u32 = 1 << 0;
    pub const ASYNCHRONOUS: u32 = 1 << 1;
    pub const NO_POST: u32 = 1 << 2;
    pub const CONVERT_SUPPORTED: u32 = 1 << 31;

    pub fn from_signal(signal: u32) -> Self {
        let bits = signal & 0xffff;
        GenVarFlags {
            no_convert: bits & Self::NO_CONVERT != 0,
            asynchronous: bits & Self::ASYNCHRONOUS != 0,
            no_post: bits & Self::NO_POST != 0,
            convert_supported: false,
        }
    }

    pub fn bits(&self) -> u32 {
        [
            (self.no_convert, Self::NO_CONVERT),
            (self.asynchronous, Self::ASYNCHRONOUS),
            (self.no_post, Self::NO_POST),
            (self.convert_supported, Self::CONVERT_SUPPORTED),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .fold(0, |bits, (_, bit)| bits | bit)
    }
}

/// Per-record device-private state: the variable and the field it feeds
#[derive(Debug, Clone)]
pub struct GenVarBinding {
    variable: Arc<GenVar>,
    flags: GenVarFlags,
    field: String,
    field_type: DbrType,
}

impl GenVarBinding {
    pub fn variable(&self) -> &Arc<GenVar> {
        &self.variable
    }

    pub fn flags(&self) -> GenVarFlags {
        self.flags
    }

    /// The record field values are transferred to and from
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn field_type(&self) -> DbrType {
        self.field_type
    }
}

fn resolve<R: Record + ?Sized>(
    registries: &Registries,
    link: &Link,
    record: &R,
    field: &str,
    raw_field: Option<&str>,
) -> Result<GenVarBinding, GenVarError> {
    let Link::VmeIo(VmeIo { card, signal, parm }) = link else {
        return Err(GenVarError::BadLinkType);
    };
    let group = registries
        .genvars
        .find(parm)
        .ok_or_else(|| GenVarError::NotRegistered(parm.clone()))?;
    let variable = group.bind(*card as usize).ok_or(GenVarError::BadCard {
        card: *card,
        count: group.len(),
    })?;

    let mut flags = GenVarFlags::from_signal(*signal);
    let field = match raw_field {
        Some(raw_field) => {
            flags.convert_supported = true;
            if flags.no_convert { raw_field } else { field }
        }
        None => {
            flags.no_convert = false;
            field
        }
    };
    let field_type = record
        .field_type(field)
        .ok_or_else(|| GenVarError::BadField(field.to_string()))?;
    Ok(GenVarBinding {
        variable,
        flags,
        field: field.to_string(),
        field_type,
    })
}

/// Bind a record to the variable its link names
///
/// `field` receives the converted (raw) value. If the record type also has
/// an engineering field it is given as `raw_field`; it is used instead of
/// `field` when the link requests no conversion.
fn init_rec<R: Record + ?Sized>(
    registries: &Registries,
    link: &Link,
    record: &mut R,
    field: &str,
    raw_field: Option<&str>,
) -> Result<GenVarBinding, GenVarError> {
    match resolve(registries, link, record, field, raw_field) {
        Ok(binding) => {
            trace!(
                "{}: bound to generic variable via {} (flags {:#x})",
                record.common().name,
                binding.field,
                binding.flags.bits()
            );
            record.common_mut().dpvt = DevicePrivate::GenVar(binding.clone());
            Ok(binding)
        }
        Err(e) => {
            let common = record.common_mut();
            common.pact = true;
            common.record_error("Unable to bind generic variable", &e);
            Err(e)
        }
    }
}

/// Initialise an input record
pub fn init_inp_rec<R: Record + ?Sized>(
    registries: &Registries,
    link: &Link,
    record: &mut R,
    field: &str,
    raw_field: Option<&str>,
) -> Result<IoStatus, GenVarError> {
    init_rec(registries, link, record, field, raw_field)?;
    Ok(IoStatus::Done)
}

/// Initialise an output record
///
/// Unless the record processes at initialisation, its field is loaded from
/// the variable, without posting the variable's event.
pub fn init_out_rec<R: Record + ?Sized>(
    registries: &Registries,
    link: &Link,
    record: &mut R,
    field: &str,
    raw_field: Option<&str>,
) -> Result<IoStatus, GenVarError> {
    let binding = init_rec(registries, link, record, field, raw_field)?;
    if record.common().pini {
        return Ok(if binding.flags.convert_supported {
            IoStatus::NoConvert
        } else {
            IoStatus::Done
        });
    }
    let status = {
        let _guard = binding.variable.lock();
        transfer_in(record, &binding, false)
    };
    if status.is_ok() {
        record.common_mut().reset_alarms();
    }
    status
}

fn binding_of<R: Record + ?Sized>(record: &R) -> Result<GenVarBinding, GenVarError> {
    record
        .common()
        .dpvt
        .genvar()
        .cloned()
        .ok_or(GenVarError::NotBound)
}

fn transfer_in<R: Record + ?Sized>(
    record: &mut R,
    binding: &GenVarBinding,
    post: bool,
) -> Result<IoStatus, GenVarError> {
    let (value, timestamp, alarm) = {
        let data = binding.variable.data();
        (data.value().clone(), data.timestamp, data.alarm)
    };
    let result = record.put_field(&binding.field, &value);
    let common = record.common_mut();
    if common.tse == TimeSource::Device {
        common.time = timestamp;
    }
    common.set_severity(alarm.status, alarm.severity);
    let status = match result {
        Err(e) => {
            common.set_severity(AlarmStatus::Read, Severity::Invalid);
            Err(e.into())
        }
        Ok(()) if binding.flags.no_convert => {
            common.udf = false;
            Ok(IoStatus::NoConvert)
        }
        Ok(()) => Ok(IoStatus::Done),
    };
    if post && !binding.flags.no_post {
        binding.variable.signal();
    }
    status
}

/// Copy the variable into the record, without taking the variable's lock
///
/// The variable's alarm and (for `TSE` device records) timestamp pass to the
/// record. Returns [`IoStatus::NoConvert`] when the engineering field was
/// written directly.
pub fn get_nolock<R: Record + ?Sized>(record: &mut R) -> Result<IoStatus, GenVarError> {
    let binding = binding_of(record)?;
    transfer_in(record, &binding, true)
}

/// [`get_nolock`] under the variable's lock
pub fn get<R: Record + ?Sized>(record: &mut R) -> Result<IoStatus, GenVarError> {
    let binding = binding_of(record)?;
    let _guard = binding.variable.lock();
    transfer_in(record, &binding, true)
}

/// Load the record's field from the variable, with no side effects on the
/// variable other than reporting a failed conversion in its alarm
pub fn readback_nolock<R: Record + ?Sized>(record: &mut R) -> Result<(), GenVarError> {
    let binding = binding_of(record)?;
    let value = binding.variable.load();
    record.put_field(&binding.field, &value).map_err(|e| {
        let common = record.common_mut();
        common.record_error("Unable to read current value back", &e);
        common.set_severity(AlarmStatus::Read, Severity::Major);
        binding.variable.data().alarm = common.pending_alarm();
        GenVarError::from(e)
    })
}

/// Finish the second phase of an asynchronous write
///
/// If the record is active, takes the variable's alarm and (for `TSE`
/// device records) timestamp and returns `true`.
pub fn apply_phase2(common: &mut RecordCommon, variable: &GenVar) -> bool {
    if !common.pact {
        return false;
    }
    let data = variable.data();
    if common.tse == TimeSource::Device {
        common.time = data.timestamp;
    }
    common.set_severity(data.alarm.status, data.alarm.severity);
    true
}

fn transfer_out<R: Record + ?Sized>(
    record: &mut R,
    binding: &GenVarBinding,
) -> Result<IoStatus, GenVarError> {
    if apply_phase2(record.common_mut(), &binding.variable) {
        return Ok(IoStatus::Done);
    }

    if binding.flags.asynchronous {
        let common = record.common_mut();
        let attached = match (common.handle(), common.scheduler()) {
            (Some(handle), Some(scheduler)) => binding.variable.attach(handle, scheduler.clone()),
            _ => Err(GenVarError::NoScheduler),
        };
        if let Err(e) = attached {
            common.record_error("Asynchronous write refused", &e);
            common.set_severity(AlarmStatus::Write, Severity::Invalid);
            return Err(e);
        }
        common.pact = true;
    }

    let value = record
        .get_field(&binding.field)
        .ok_or_else(|| GenVarError::BadField(binding.field.clone()))?;
    let result = binding.variable.data().set_value(&value);
    let common = record.common_mut();
    if result.is_err() {
        common.set_severity(AlarmStatus::Write, Severity::Invalid);
    }
    binding.variable.data().alarm = common.pending_alarm();
    if !binding.flags.no_post {
        binding.variable.signal();
    }
    result?;
    Ok(IoStatus::Done)
}

/// Copy the record's field into the variable, without taking the variable's
/// lock
///
/// With the asynchronous flag, the record is attached to the variable and
/// left active until the producer calls
/// [`GenVar::complete_processing`](crate::genvar::GenVar::complete_processing).
/// Only one record may be attached at a time.
pub fn put_nolock<R: Record + ?Sized>(record: &mut R) -> Result<IoStatus, GenVarError> {
    let binding = binding_of(record)?;
    transfer_out(record, &binding)
}

/// [`put_nolock`] under the variable's lock
pub fn put<R: Record + ?Sized>(record: &mut R) -> Result<IoStatus, GenVarError> {
    let binding = binding_of(record)?;
    let _guard = binding.variable.lock();
    transfer_out(record, &binding)
}

/// The scan list of the variable a record is bound to
pub fn get_ioint_info<R: Record + ?Sized>(record: &R) -> Option<Arc<ScanList>> {
    record
        .common()
        .dpvt
        .genvar()
        .and_then(|binding| binding.variable.scan_list().cloned())
}
