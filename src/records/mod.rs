//! Record types that device support in this crate can be attached to.
//!
//! These implement just enough of each record's processing to drive device
//! support: raw/engineering conversion where the record type has one,
//! timestamps, alarm handling, and asynchronous completion. An input record
//! calls its device support and converts the raw value; an output record
//! converts its value to raw and then calls device support. Either finishes
//! early, with `PACT` still set, when device support starts an asynchronous
//! operation, and completes when processed again.

use std::sync::Arc;

use tracing::debug;

use crate::{
    alarm::{AlarmStatus, Severity},
    dbr::{DbrType, DbrValue},
    devsup::{DevSupError, DeviceSupport, IoStatus},
    record::{Record, RecordCommon},
};

/// Shared device support, as attached to a record
pub type Dset<R> = Arc<dyn DeviceSupport<R>>;

/// The `Record` methods every record type implements identically
macro_rules! record_common {
    ($record_type:literal) => {
        fn common(&self) -> &$crate::record::RecordCommon {
            &self.common
        }
        fn common_mut(&mut self) -> &mut $crate::record::RecordCommon {
            &mut self.common
        }
        fn record_type(&self) -> &'static str {
            $record_type
        }
        fn io_scan(&self) -> Option<std::sync::Arc<$crate::scan::ScanList>> {
            self.dset.get_ioint_info(self)
        }
    };
}

/// Field access by name, from a table of `"NAME" => field: DbrKind`
macro_rules! record_fields {
    ($($name:literal => $field:ident: $kind:ident),* $(,)?) => {
        fn field_type(&self, field: &str) -> Option<$crate::dbr::DbrType> {
            match field {
                $($name => Some($crate::dbr::DbrType::$kind),)*
                _ => $crate::records::common_field_type(field),
            }
        }
        fn get_field(&self, field: &str) -> Option<$crate::dbr::DbrValue> {
            match field {
                $($name => Some($crate::dbr::DbrValue::$kind(self.$field)),)*
                _ => $crate::records::common_get_field(&self.common, field),
            }
        }
        fn put_field(
            &mut self,
            field: &str,
            value: &$crate::dbr::DbrValue,
        ) -> Result<(), $crate::record::FieldError> {
            match field {
                $($name => {
                    self.$field = match value.convert_to($crate::dbr::DbrType::$kind)? {
                        $crate::dbr::DbrValue::$kind(v) => v,
                        _ => unreachable!(),
                    };
                })*
                _ if $crate::records::common_field_type(field).is_some() => {
                    return Err($crate::record::FieldError::ReadOnly(field.to_string()));
                }
                _ => return Err($crate::record::FieldError::NoSuchField(field.to_string())),
            }
            Ok(())
        }
    };
}

mod aao;
mod analog;
mod binary;
mod long;
mod multibit;

pub use aao::AaoRecord;
pub use analog::{AiRecord, AoRecord};
pub use binary::{BiRecord, BoRecord};
pub use long::{LonginRecord, LongoutRecord};
pub use multibit::{MbbiRecord, MbboRecord};

pub(crate) fn common_field_type(field: &str) -> Option<DbrType> {
    Some(match field {
        "NAME" => DbrType::String,
        "PACT" | "UDF" | "PINI" => DbrType::UChar,
        "STAT" | "SEVR" | "NSTA" | "NSEV" => DbrType::Enum,
        _ => return None,
    })
}

pub(crate) fn common_get_field(common: &RecordCommon, field: &str) -> Option<DbrValue> {
    Some(match field {
        "NAME" => DbrValue::from(common.name.as_str()),
        "PACT" => DbrValue::UChar(common.pact as u8),
        "UDF" => DbrValue::UChar(common.udf as u8),
        "PINI" => DbrValue::UChar(common.pini as u8),
        "STAT" => DbrValue::Enum(common.alarm().status as u16),
        "SEVR" => DbrValue::Enum(common.alarm().severity as u16),
        "NSTA" => DbrValue::Enum(common.pending_alarm().status as u16),
        "NSEV" => DbrValue::Enum(common.pending_alarm().severity as u16),
        _ => return None,
    })
}

/// The mask covering the low `nobt` bits
pub(crate) fn mask_for_bits(nobt: u16) -> u32 {
    1u32.checked_shl(nobt as u32)
        .map_or(u32::MAX, |bit| bit.wrapping_sub(1))
}

/// Shift a multi-bit mask into place for device support; a record with no
/// bits uses all of them
pub(crate) fn place_mask(mask: u32, nobt: u16, shft: u16) -> u32 {
    let mask = if nobt == 0 { u32::MAX } else { mask };
    mask.checked_shl(shft as u32).unwrap_or(0)
}

/// Initialise an output record, reading its value back when device support
/// provided a raw value
pub(crate) fn init_output<R: Record>(
    record: &mut R,
    dset: Dset<R>,
    from_raw: impl FnOnce(&mut R),
) -> Result<(), DevSupError> {
    if dset.init_record(record)? == IoStatus::Done {
        from_raw(record);
        record.common_mut().udf = false;
    }
    Ok(())
}

/// A record that device support never bound (its link failed to resolve at
/// initialisation) is never processed and keeps `PACT` set
fn unbound(common: &RecordCommon) -> bool {
    let unbound = common.dpvt.is_none();
    if unbound {
        debug!("{}: not bound to device support, not processing", common.name);
    }
    unbound
}

pub(crate) fn process_input<R: Record>(record: &mut R, dset: Dset<R>, convert: impl FnOnce(&mut R)) {
    if unbound(record.common()) {
        return;
    }
    let completing = record.common().pact;
    let status = dset.process(record);
    if !completing && record.common().pact {
        return;
    }
    match status {
        Ok(IoStatus::Done) => convert(record),
        Ok(IoStatus::NoConvert) => {}
        Err(e) => debug!("{}: read failed: {e}", record.common().name),
    }
    finish(record.common_mut());
}

pub(crate) fn process_output<R: Record>(record: &mut R, dset: Dset<R>, to_raw: impl FnOnce(&mut R)) {
    if unbound(record.common()) {
        return;
    }
    let completing = record.common().pact;
    if !completing {
        to_raw(record);
    }
    let status = dset.process(record);
    if !completing && record.common().pact {
        return;
    }
    match status {
        Ok(_) => record.common_mut().udf = false,
        Err(e) => debug!("{}: write failed: {e}", record.common().name),
    }
    finish(record.common_mut());
}

fn finish(common: &mut RecordCommon) {
    if common.udf {
        common.set_severity(AlarmStatus::Udf, Severity::Invalid);
    }
    common.update_timestamp();
    common.reset_alarms();
    common.pact = false;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks() {
        assert_eq!(mask_for_bits(0), 0);
        assert_eq!(mask_for_bits(3), 0b111);
        assert_eq!(mask_for_bits(32), u32::MAX);
        assert_eq!(place_mask(0b11, 2, 4), 0b11_0000);
        assert_eq!(place_mask(0, 0, 8), 0xFFFF_FF00);
        assert_eq!(place_mask(1, 1, 32), 0);
    }
}
