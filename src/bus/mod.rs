//! Device support for simple, bus-mapped device registers.
//!
//! Records reach registers through a [`BusBinding`], resolved once from the
//! record's link by [`link_init`]. The binding names the register address,
//! the [`AccessMethod`] used to read and write it, the [`BusDevice`] it
//! belongs to, and optionally an I/O interrupt scan list.
//!
//! [`BusDevSup`] provides the device support for the standard record types.

mod access;
mod device;
mod devsup;
mod link;

use thiserror::Error;

pub use access::{AccessMethod, BusAccess, Builtin};
pub use device::{BusDevice, canonical_name};
pub use devsup::BusDevSup;
pub use link::{BusBinding, BusLinkSpec, link_init};

/// Errors accessing a bound register
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("No register address is bound")]
    NullAddress,
    #[error("Address {address:#x} is not aligned for a {width}-byte access")]
    Misaligned { address: usize, width: usize },
    #[error("Device access failed: {0}")]
    Device(String),
}

/// Errors resolving a bus link. Each leaves the record unbindable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Link must be a constant or VME_IO address, not '{0}'")]
    BadLinkType(String),
    #[error("Invalid constant link value '{0}'")]
    BadConstant(String),
    #[error("Invalid OFFSET string '{0}'")]
    BadOffset(String),
    #[error("Invalid ACCESS string '{0}'")]
    UnknownAccess(String),
    #[error("No I/O scan list registered as '{0}'")]
    UnknownScanList(String),
    #[error("No device registered as '{0}'")]
    NoDevice(String),
    #[error("Register address for #C{card} S{signal} does not fit in an address")]
    AddressOverflow { card: u32, signal: u32 },
}
