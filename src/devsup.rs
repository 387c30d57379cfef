//! The device-support interface records call into.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    bus::{BusError, LinkError},
    genvar::GenVarError,
    record::{FieldError, Record},
    savres::SavResError,
    scan::ScanList,
};

/// Successful outcome of a device-support call
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IoStatus {
    /// Data transferred; the record converts between raw and engineering
    /// values as usual
    Done,
    /// Data transferred in its final form; the record must not convert
    NoConvert,
}

#[derive(Error, Debug)]
pub enum DevSupError {
    #[error("Illegal hardware link: {0}")]
    Link(#[from] LinkError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    GenVar(#[from] GenVarError),
    #[error(transparent)]
    SavRes(#[from] SavResError),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error("Device support has not been initialised for this record")]
    NotInitialized,
}

/// Device support for one record type
///
/// `process` is the read or write routine, depending on whether `R` is an
/// input or output record.
pub trait DeviceSupport<R: Record + ?Sized>: Send + Sync {
    fn init_record(&self, record: &mut R) -> Result<IoStatus, DevSupError>;

    fn process(&self, record: &mut R) -> Result<IoStatus, DevSupError>;

    fn get_ioint_info(&self, record: &R) -> Option<Arc<ScanList>> {
        record.common().dpvt.scan_list()
    }
}
