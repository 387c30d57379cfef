//! Alarm conditions and severities raised against records.
//!
//! These mirror the alarm model of the EPICS database: every record carries a
//! current [`Alarm`] (`STAT`/`SEVR`) and a pending one (`NSTA`/`NSEV`) that
//! is accumulated while the record processes and promoted when processing
//! finishes.

use std::fmt::Display;

/// Alarm severity. Ordered, so that the most severe alarm wins.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Severity {
    #[default]
    NoAlarm = 0,
    Minor = 1,
    Major = 2,
    Invalid = 3,
}

impl TryFrom<u16> for Severity {
    type Error = ();
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::NoAlarm,
            1 => Self::Minor,
            2 => Self::Major,
            3 => Self::Invalid,
            _ => return Err(()),
        })
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NoAlarm => "NO_ALARM",
            Self::Minor => "MINOR",
            Self::Major => "MAJOR",
            Self::Invalid => "INVALID",
        })
    }
}

/// Alarm condition, i.e. the reason for an alarm
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum AlarmStatus {
    #[default]
    NoAlarm = 0,
    Read = 1,
    Write = 2,
    HiHi = 3,
    High = 4,
    LoLo = 5,
    Low = 6,
    State = 7,
    Cos = 8,
    Comm = 9,
    Timeout = 10,
    HwLimit = 11,
    Calc = 12,
    Scan = 13,
    Link = 14,
    Soft = 15,
    BadSub = 16,
    Udf = 17,
    Disable = 18,
    Simm = 19,
    ReadAccess = 20,
    WriteAccess = 21,
}

impl TryFrom<u16> for AlarmStatus {
    type Error = ();
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::NoAlarm,
            1 => Self::Read,
            2 => Self::Write,
            3 => Self::HiHi,
            4 => Self::High,
            5 => Self::LoLo,
            6 => Self::Low,
            7 => Self::State,
            8 => Self::Cos,
            9 => Self::Comm,
            10 => Self::Timeout,
            11 => Self::HwLimit,
            12 => Self::Calc,
            13 => Self::Scan,
            14 => Self::Link,
            15 => Self::Soft,
            16 => Self::BadSub,
            17 => Self::Udf,
            18 => Self::Disable,
            19 => Self::Simm,
            20 => Self::ReadAccess,
            21 => Self::WriteAccess,
            _ => return Err(()),
        })
    }
}

impl Display for AlarmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NoAlarm => "NO_ALARM",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::HiHi => "HIHI",
            Self::High => "HIGH",
            Self::LoLo => "LOLO",
            Self::Low => "LOW",
            Self::State => "STATE",
            Self::Cos => "COS",
            Self::Comm => "COMM",
            Self::Timeout => "TIMEOUT",
            Self::HwLimit => "HWLIMIT",
            Self::Calc => "CALC",
            Self::Scan => "SCAN",
            Self::Link => "LINK",
            Self::Soft => "SOFT",
            Self::BadSub => "BAD_SUB",
            Self::Udf => "UDF",
            Self::Disable => "DISABLE",
            Self::Simm => "SIMM",
            Self::ReadAccess => "READ_ACCESS",
            Self::WriteAccess => "WRITE_ACCESS",
        })
    }
}

/// Alarm status and severity, as a pair
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Alarm {
    pub status: AlarmStatus,
    pub severity: Severity,
}

impl Alarm {
    pub const NONE: Alarm = Alarm {
        status: AlarmStatus::NoAlarm,
        severity: Severity::NoAlarm,
    };

    pub fn new(status: AlarmStatus, severity: Severity) -> Self {
        Self { status, severity }
    }
}

impl Display for Alarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.status, self.severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Invalid > Severity::Major);
        assert!(Severity::Major > Severity::Minor);
        assert!(Severity::Minor > Severity::NoAlarm);
        assert_eq!(Severity::try_from(2), Ok(Severity::Major));
        assert!(Severity::try_from(4).is_err());
    }

    #[test]
    fn status_codes() {
        assert_eq!(AlarmStatus::try_from(2), Ok(AlarmStatus::Write));
        assert_eq!(AlarmStatus::Udf as u16, 17);
        assert_eq!(
            Alarm::new(AlarmStatus::Write, Severity::Minor).to_string(),
            "WRITE/MINOR"
        );
    }
}
