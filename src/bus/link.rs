//! Resolving a record's hardware link to a register binding.
//!
//! A bus link is a VME-style link whose parameter names the register:
//!
//! ```text
//! #C<card> S<shift> @<base>[+<offset>][,<access>][,<scan list>]
//! ```
//!
//! `base` is a registered device name or a numeric address. The register is
//! at `base + (card << shift) + offset` and is accessed with the named access
//! method (`be32` if none is given).

use std::{
    any::Any,
    str::FromStr,
    sync::{Arc, MutexGuard},
};

use nom::{
    IResult, Parser,
    bytes::complete::take_till,
    character::complete::char as parse_char,
    combinator::{all_consuming, opt, rest},
    sequence::preceded,
};
use tracing::trace;

use crate::{
    alarm::{AlarmStatus, Severity},
    bus::{AccessMethod, BusDevice, BusError, LinkError},
    record::{Link, RecordCommon, VmeIo, WeakRecordRef},
    registry::Registries,
    scan::ScanList,
    utils::{c_unsigned, parse_c_unsigned_prefix},
};

/// The parameter part of a bus link, split into its pieces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusLinkSpec {
    pub base: String,
    pub offset: usize,
    pub access: Option<String>,
    pub scan: Option<String>,
}

/// `base[+offset][,access][,scan list]`, each piece still untrimmed
fn bus_parm(input: &str) -> IResult<&str, (&str, Option<&str>, Option<&str>, Option<&str>)> {
    (
        take_till(|c: char| c == '+' || c == ','),
        opt(preceded(parse_char('+'), take_till(|c: char| c == ','))),
        opt(preceded(parse_char(','), take_till(|c: char| c == ','))),
        opt(preceded(parse_char(','), rest)),
    )
        .parse(input)
}

impl FromStr for BusLinkSpec {
    type Err = LinkError;

    fn from_str(parm: &str) -> Result<Self, Self::Err> {
        let (_, (base, offset, access, scan)) = all_consuming(bus_parm)
            .parse(parm.trim())
            .map_err(|_| LinkError::NoDevice(parm.to_string()))?;
        let offset = match offset.map(str::trim) {
            Some(text) => all_consuming(c_unsigned)
                .parse(text)
                .ok()
                .and_then(|(_, v)| usize::try_from(v).ok())
                .ok_or_else(|| LinkError::BadOffset(text.to_string()))?,
            None => 0,
        };
        let nonempty = |s: Option<&str>| {
            s.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Ok(BusLinkSpec {
            base: base.trim().to_string(),
            offset,
            access: nonempty(access),
            scan: nonempty(scan),
        })
    }
}

/// A record's resolved register: device private data of bus device support
#[derive(Debug, Clone)]
pub struct BusBinding {
    owner: Option<WeakRecordRef>,
    access: AccessMethod,
    device: Option<Arc<BusDevice>>,
    scan: Option<Arc<ScanList>>,
    user_data: Option<Arc<dyn Any + Send + Sync>>,
    address: usize,
}

impl BusBinding {
    /// Build a binding directly
    ///
    /// # Safety
    /// `address` must satisfy the contract of [`BusDevice::new`] for the
    /// width of `access`, unless `access` is a custom method that does not
    /// treat it as an address.
    pub unsafe fn new(access: AccessMethod, device: Option<Arc<BusDevice>>, address: usize) -> Self {
        BusBinding {
            owner: None,
            access,
            device,
            scan: None,
            user_data: None,
            address,
        }
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn access(&self) -> &AccessMethod {
        &self.access
    }

    pub fn device(&self) -> Option<&Arc<BusDevice>> {
        self.device.as_ref()
    }

    pub fn scan_list(&self) -> Option<&Arc<ScanList>> {
        self.scan.as_ref()
    }

    pub fn owner(&self) -> Option<&WeakRecordRef> {
        self.owner.as_ref()
    }

    /// Private data for custom access methods
    pub fn user_data(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.user_data.as_ref()
    }

    pub fn set_user_data(&mut self, user_data: Arc<dyn Any + Send + Sync>) {
        self.user_data = Some(user_data);
    }

    /// Take the lock of the bound device, if there is one
    pub fn lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.device.as_ref().map(|d| d.lock())
    }

    /// Read the register, raising a READ/INVALID alarm on failure
    ///
    /// This does not take the device lock.
    pub fn get_val(&self, record: &mut RecordCommon) -> Result<u32, BusError> {
        self.access.read(self).inspect_err(|e| {
            trace!("{}: read failed: {e}", record.name);
            record.set_severity(AlarmStatus::Read, Severity::Invalid);
        })
    }

    /// Write the register, raising a WRITE/INVALID alarm on failure
    ///
    /// This does not take the device lock.
    pub fn put_val(&self, record: &mut RecordCommon, value: u32) -> Result<(), BusError> {
        self.access.write(self, value).inspect_err(|e| {
            trace!("{}: write failed: {e}", record.name);
            record.set_severity(AlarmStatus::Write, Severity::Invalid);
        })
    }
}

/// Bind a record to the register its link names
///
/// On failure the error is reported against the record, which is left
/// permanently active so that it is never processed.
///
/// # Safety
/// A numeric base address or constant in the link is used as a register
/// address, so it must satisfy the contract of [`BusDevice::new`].
pub unsafe fn link_init(
    registries: &Registries,
    link: &Link,
    record: &mut RecordCommon,
) -> Result<BusBinding, LinkError> {
    // SAFETY: forwarded to our caller
    let result = unsafe { resolve(registries, link) }.map(|mut binding| {
        binding.owner = record.handle();
        binding
    });
    if let Err(e) = &result {
        record.record_error("Illegal hardware link", e);
        record.pact = true;
    }
    result
}

unsafe fn resolve(registries: &Registries, link: &Link) -> Result<BusBinding, LinkError> {
    match link {
        Link::Constant(value) => {
            let address = parse_c_unsigned_prefix(value)
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| LinkError::BadConstant(value.clone()))?;
            // SAFETY: forwarded to our caller
            Ok(unsafe { BusBinding::new(AccessMethod::default(), None, address) })
        }
        Link::VmeIo(VmeIo { card, signal, parm }) => {
            let spec: BusLinkSpec = parm.parse()?;
            let access = AccessMethod::resolve(
                &registries.access_methods,
                spec.access.as_deref().unwrap_or_default(),
            )?;
            let scan = spec
                .scan
                .as_deref()
                .map(|name| {
                    registries
                        .scan_lists
                        .find(name)
                        .ok_or_else(|| LinkError::UnknownScanList(name.to_string()))
                })
                .transpose()?;
            // SAFETY: forwarded to our caller
            let device = unsafe { registries.find_or_create_device(&spec.base) }
                .ok_or_else(|| LinkError::NoDevice(spec.base.clone()))?;
            let overflow = || LinkError::AddressOverflow {
                card: *card,
                signal: *signal,
            };
            let channel = (*card as usize)
                .checked_shl(*signal)
                .filter(|v| v >> signal == *card as usize)
                .ok_or_else(overflow)?;
            let address = device
                .base()
                .checked_add(channel)
                .and_then(|a| a.checked_add(spec.offset))
                .ok_or_else(overflow)?;
            trace!(
                "Bound {} to {address:#x} via {:?}",
                device.name(),
                access
            );
            Ok(BusBinding {
                owner: None,
                access,
                device: Some(device),
                scan,
                user_data: None,
                address,
            })
        }
        Link::Other(text) => Err(LinkError::BadLinkType(text.clone())),
    }
}
