//! The parts of a database record that device support interacts with.
//!
//! Record processing itself belongs to the host database; what lives here is
//! the contract device support is written against: the fields common to every
//! record ([`RecordCommon`]), access to named fields with conversion
//! ([`Record`]), and the textual hardware link ([`Link`]).

use std::{
    fmt::Display,
    sync::{Arc, Mutex, Weak},
    time::SystemTime,
};

use nom::{
    IResult, Parser,
    bytes::complete::tag_no_case,
    character::complete::{char as parse_char, space0, u32 as parse_u32},
    combinator::rest,
    sequence::preceded,
};
use tracing::{error, trace};

use crate::{
    alarm::{Alarm, AlarmStatus, Severity},
    bus::BusBinding,
    dbr::{ConvertError, DbrType, DbrValue},
    devsup::DevSupError,
    genvar::GenVarBinding,
    savres::SavResPrivate,
    scan::{ScanList, SchedulerHandle},
    utils::parse_c_integer,
};

/// Shared, lockable handle to a record. Locking it is the per-record
/// processing lock.
pub type RecordRef = Arc<Mutex<dyn Record>>;
/// Non-owning handle to a record
pub type WeakRecordRef = Weak<Mutex<dyn Record>>;

/// Where a record's timestamp comes from (the `TSE` field)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum TimeSource {
    /// Stamped with the current time when processing completes
    #[default]
    Database,
    /// Supplied by device support
    Device,
}

/// How a record is scheduled for processing (the `SCAN` field)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    Passive,
    /// Processed whenever device support requests its I/O scan list
    IoEvent,
}

/// Device-support private data attached to a record (`DPVT`)
#[derive(Debug, Default)]
pub enum DevicePrivate {
    #[default]
    None,
    Bus(BusBinding),
    GenVar(GenVarBinding),
    SavRes(SavResPrivate),
}

impl DevicePrivate {
    pub fn is_none(&self) -> bool {
        matches!(self, DevicePrivate::None)
    }
    pub fn bus(&self) -> Option<&BusBinding> {
        match self {
            DevicePrivate::Bus(binding) => Some(binding),
            _ => None,
        }
    }
    pub fn genvar(&self) -> Option<&GenVarBinding> {
        match self {
            DevicePrivate::GenVar(binding) => Some(binding),
            _ => None,
        }
    }
    pub fn savres(&self) -> Option<&SavResPrivate> {
        match self {
            DevicePrivate::SavRes(private) => Some(private),
            _ => None,
        }
    }
    /// The I/O interrupt scan list of whatever is attached, if any
    pub fn scan_list(&self) -> Option<Arc<ScanList>> {
        match self {
            DevicePrivate::Bus(binding) => binding.scan_list().cloned(),
            DevicePrivate::GenVar(binding) => binding.variable().scan_list().cloned(),
            _ => None,
        }
    }
}

/// Fields shared by every record type
#[derive(Debug)]
pub struct RecordCommon {
    pub name: String,
    /// Processing active. Stays set while an asynchronous operation is in
    /// flight, and permanently when device support failed to initialise.
    pub pact: bool,
    /// Value undefined
    pub udf: bool,
    /// Process once at initialisation
    pub pini: bool,
    pub scan: ScanMode,
    pub tse: TimeSource,
    pub time: SystemTime,
    pub dpvt: DevicePrivate,
    alarm: Alarm,
    pending: Alarm,
    handle: Option<WeakRecordRef>,
    scheduler: Option<SchedulerHandle>,
}

impl RecordCommon {
    pub fn new(name: &str) -> Self {
        RecordCommon {
            name: name.to_owned(),
            pact: false,
            udf: true,
            pini: false,
            scan: ScanMode::default(),
            tse: TimeSource::default(),
            time: SystemTime::UNIX_EPOCH,
            dpvt: DevicePrivate::None,
            alarm: Alarm::NONE,
            pending: Alarm::NONE,
            handle: None,
            scheduler: None,
        }
    }

    /// Raise a pending alarm, if it is more severe than what is pending
    ///
    /// Returns whether the pending alarm changed.
    pub fn set_severity(&mut self, status: AlarmStatus, severity: Severity) -> bool {
        if severity > self.pending.severity {
            self.pending = Alarm { status, severity };
            true
        } else {
            false
        }
    }

    /// The alarm from the last completed processing (`STAT`/`SEVR`)
    pub fn alarm(&self) -> Alarm {
        self.alarm
    }

    /// The alarm accumulated during the current processing (`NSTA`/`NSEV`)
    pub fn pending_alarm(&self) -> Alarm {
        self.pending
    }

    /// Promote the pending alarm to the current one and clear it
    pub fn reset_alarms(&mut self) -> Alarm {
        let previous = self.alarm;
        self.alarm = std::mem::take(&mut self.pending);
        if previous != self.alarm {
            trace!("{}: alarm {previous} -> {}", self.name, self.alarm);
        }
        self.alarm
    }

    /// Report a configuration or runtime error against this record
    pub fn record_error(&self, context: &str, err: &dyn Display) {
        error!("{}: {context}: {err}", self.name);
    }

    /// Stamp the record with the current time, unless device support owns it
    pub fn update_timestamp(&mut self) {
        if self.tse == TimeSource::Database {
            self.time = SystemTime::now();
        }
    }

    /// Weak handle to the record containing these fields
    pub fn handle(&self) -> Option<WeakRecordRef> {
        self.handle.clone()
    }

    /// The scheduler this record is processed by
    pub fn scheduler(&self) -> Option<&SchedulerHandle> {
        self.scheduler.as_ref()
    }

    pub(crate) fn attach(&mut self, handle: WeakRecordRef, scheduler: Option<SchedulerHandle>) {
        self.handle = Some(handle);
        self.scheduler = scheduler;
    }
}

/// A database record, as seen by device support
pub trait Record: Send {
    fn common(&self) -> &RecordCommon;
    fn common_mut(&mut self) -> &mut RecordCommon;
    fn record_type(&self) -> &'static str;

    /// Resolve a field name to its native type
    fn field_type(&self, field: &str) -> Option<DbrType>;

    /// Read a field in its native type
    fn get_field(&self, field: &str) -> Option<DbrValue>;

    /// Write a field, converting from whatever type `value` has
    fn put_field(&mut self, field: &str, value: &DbrValue) -> Result<(), FieldError>;

    /// Initialise device support
    fn init(&mut self) -> Result<(), DevSupError>;

    /// Run one pass of record processing
    fn process(&mut self);

    /// The I/O interrupt scan list device support provides for this record
    fn io_scan(&self) -> Option<Arc<ScanList>>;
}

/// Errors accessing a record field by name
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("Record has no field named '{0}'")]
    NoSuchField(String),
    #[error("Field '{0}' is read-only")]
    ReadOnly(String),
    #[error("{0}")]
    Convert(#[from] ConvertError),
}

/// A hardware link, as found in a record's `INP` or `OUT` field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    /// A literal value (numeric or empty)
    Constant(String),
    /// A VME-style address, `#C<card> S<signal> @<parm>`
    VmeIo(VmeIo),
    /// Anything else, e.g. a link to another record
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmeIo {
    pub card: u32,
    pub signal: u32,
    pub parm: String,
}

fn vme_io(input: &str) -> IResult<&str, VmeIo> {
    (
        preceded((parse_char('#'), space0, tag_no_case("C")), parse_u32),
        preceded((space0, tag_no_case("S")), parse_u32),
        preceded((space0, parse_char('@')), rest),
    )
        .map(|(card, signal, parm): (u32, u32, &str)| VmeIo {
            card,
            signal,
            parm: parm.trim().to_string(),
        })
        .parse(input)
}

impl From<&str> for Link {
    fn from(value: &str) -> Self {
        let value = value.trim();
        if value.starts_with('#') {
            return match vme_io(value) {
                Ok((_, vme)) => Link::VmeIo(vme),
                Err(_) => Link::Other(value.to_string()),
            };
        }
        if value.is_empty() || parse_c_integer(value).is_some() || value.parse::<f64>().is_ok() {
            Link::Constant(value.to_string())
        } else {
            Link::Other(value.to_string())
        }
    }
}

impl Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Link::Constant(value) => write!(f, "{value}"),
            Link::VmeIo(VmeIo { card, signal, parm }) => write!(f, "#C{card} S{signal} @{parm}"),
            Link::Other(value) => write!(f, "{value}"),
        }
    }
}

impl Default for Link {
    fn default() -> Self {
        Link::Constant(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_links() {
        assert_eq!(
            Link::from("#C2 S4 @0x1000+0x10,le16,myscan"),
            Link::VmeIo(VmeIo {
                card: 2,
                signal: 4,
                parm: "0x1000+0x10,le16,myscan".to_string()
            })
        );
        assert_eq!(
            Link::from("#c0s1@asyncL"),
            Link::VmeIo(VmeIo {
                card: 0,
                signal: 1,
                parm: "asyncL".to_string()
            })
        );
        assert_eq!(Link::from("0x20"), Link::Constant("0x20".to_string()));
        assert_eq!(Link::from(""), Link::Constant(String::new()));
        assert_eq!(Link::from("1.5e3"), Link::Constant("1.5e3".to_string()));
        assert_eq!(
            Link::from("OTHER:RECORD CPP"),
            Link::Other("OTHER:RECORD CPP".to_string())
        );
        assert!(matches!(Link::from("#C S0 @x"), Link::Other(_)));
    }

    #[test]
    fn alarms_take_most_severe() {
        let mut common = RecordCommon::new("TEST");
        assert!(common.set_severity(AlarmStatus::Read, Severity::Minor));
        assert!(!common.set_severity(AlarmStatus::Write, Severity::Minor));
        assert!(common.set_severity(AlarmStatus::Write, Severity::Invalid));
        assert_eq!(common.alarm(), Alarm::NONE);
        assert_eq!(
            common.reset_alarms(),
            Alarm::new(AlarmStatus::Write, Severity::Invalid)
        );
        assert_eq!(common.pending_alarm(), Alarm::NONE);
        assert_eq!(common.reset_alarms(), Alarm::NONE);
    }
}
