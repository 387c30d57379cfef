//! Registered bus devices.

use std::{
    any::Any,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::debug;

use crate::{
    bus::BusAccess,
    registry::{AlreadyRegistered, Registries},
    utils::{must_lock, parse_c_unsigned},
};

/// A device whose registers are mapped into the address space
///
/// Every binding to the same device shares its lock. Anything performing a
/// non-atomic access to the device's registers (a masked write, say) must
/// hold it for the whole sequence.
#[derive(Debug)]
pub struct BusDevice {
    name: String,
    base: usize,
    lock: Mutex<()>,
    user_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl BusDevice {
    /// Describe a device with registers starting at `base`
    ///
    /// # Safety
    /// Every register that links may address relative to `base` must stay
    /// valid for volatile access, with the width of the access method used,
    /// for as long as the device is registered or bound.
    pub unsafe fn new(name: &str, base: usize) -> Self {
        BusDevice {
            name: name.to_string(),
            base,
            lock: Mutex::new(()),
            user_data: None,
        }
    }

    pub fn with_user_data(mut self, user_data: Arc<dyn Any + Send + Sync>) -> Self {
        self.user_data = Some(user_data);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn user_data(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.user_data.as_ref()
    }

    /// Take the device lock
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        must_lock(&self.lock)
    }
}

/// The canonical registry name of a device created from a numeric address
pub fn canonical_name(base: usize) -> String {
    format!("0x{base:X}")
}

impl Registries {
    /// Register a device's base address under a name
    ///
    /// # Safety
    /// As for [`BusDevice::new`].
    pub unsafe fn register_device(
        &self,
        name: &str,
        base: usize,
    ) -> Result<Arc<BusDevice>, AlreadyRegistered> {
        // SAFETY: forwarded to our caller
        self.add_device(unsafe { BusDevice::new(name, base) })
    }

    /// Register a fully described device
    pub fn add_device(&self, device: BusDevice) -> Result<Arc<BusDevice>, AlreadyRegistered> {
        let name = device.name.clone();
        self.devices.add(&name, Arc::new(device))
    }

    pub fn find_device(&self, name: &str) -> Option<Arc<BusDevice>> {
        self.devices.find(name)
    }

    /// Resolve the base token of a link to a device
    ///
    /// A numeric token finds (or, the first time, creates) the device
    /// registered under the canonical form of the number. Any other token
    /// must name a device some driver registered; it is never created here.
    ///
    /// # Safety
    /// A numeric token is taken as the base address of a device, so it must
    /// satisfy the contract of [`BusDevice::new`].
    pub unsafe fn find_or_create_device(&self, token: &str) -> Option<Arc<BusDevice>> {
        let Some(base) = parse_c_unsigned(token).and_then(|v| usize::try_from(v).ok()) else {
            return self.find_device(token);
        };
        let name = canonical_name(base);
        Some(self.devices.find_or_insert_with(&name, || {
            debug!("Registering device {name} on the fly");
            // SAFETY: forwarded to our caller
            Arc::new(unsafe { BusDevice::new(&name, base) })
        }))
    }

    /// Register an access method under a name
    pub fn register_access_method(
        &self,
        name: &str,
        method: Arc<dyn BusAccess>,
    ) -> Result<Arc<dyn BusAccess>, AlreadyRegistered> {
        self.access_methods.add(name, method)
    }
}
