//! Register access methods.
//!
//! A method is chosen per record by a short key in the link (`be32`, `le16s`,
//! ...). The built-in methods cover 8, 16 and 32 bit registers in CPU
//! ("memory"), big-endian and little-endian byte order; the `s` variants
//! sign-extend what they read. Drivers can register further methods that
//! implement [`BusAccess`].

use std::{
    fmt::Debug,
    ptr::{read_volatile, write_volatile},
    sync::Arc,
};

use crate::{
    bus::{BusBinding, BusError, LinkError},
    registry::Registry,
};

/// A driver-provided way of reading and writing a bound register
///
/// Implementations receive the whole binding, so they can use its address,
/// device or user data however they see fit.
pub trait BusAccess: Debug + Send + Sync {
    fn read(&self, binding: &BusBinding) -> Result<u32, BusError>;
    fn write(&self, binding: &BusBinding, value: u32) -> Result<(), BusError>;
}

/// The built-in access methods
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Builtin {
    M32,
    Be32,
    Le32,
    M16,
    M16s,
    Be16,
    Be16s,
    Le16,
    Le16s,
    M8,
    M8s,
    /// Byte-wide I/O access, `be8`
    Io8,
    /// Signed byte-wide I/O access, `be8s`
    Io8s,
}

impl Builtin {
    /// Access method used when a link does not name one
    pub const DEFAULT: Builtin = Builtin::Be32;

    /// Match a key against the built-in names
    ///
    /// Only the leading characters of the key are compared, so trailing text
    /// after a recognised name is ignored (`"be32xyz"` is `be32`).
    pub fn from_key(key: &str) -> Option<Builtin> {
        let signed = |name: &str| key[name.len()..].starts_with('s');
        Some(if key.starts_with("m32") {
            Builtin::M32
        } else if key.starts_with("be32") {
            Builtin::Be32
        } else if key.starts_with("le32") {
            Builtin::Le32
        } else if key.starts_with("m16") {
            if signed("m16") { Builtin::M16s } else { Builtin::M16 }
        } else if key.starts_with("be16") {
            if signed("be16") { Builtin::Be16s } else { Builtin::Be16 }
        } else if key.starts_with("le16") {
            if signed("le16") { Builtin::Le16s } else { Builtin::Le16 }
        } else if key.starts_with("m8") {
            if signed("m8") { Builtin::M8s } else { Builtin::M8 }
        } else if key.starts_with("be8") {
            if signed("be8") { Builtin::Io8s } else { Builtin::Io8 }
        } else {
            return None;
        })
    }

    pub fn key(self) -> &'static str {
        match self {
            Builtin::M32 => "m32",
            Builtin::Be32 => "be32",
            Builtin::Le32 => "le32",
            Builtin::M16 => "m16",
            Builtin::M16s => "m16s",
            Builtin::Be16 => "be16",
            Builtin::Be16s => "be16s",
            Builtin::Le16 => "le16",
            Builtin::Le16s => "le16s",
            Builtin::M8 => "m8",
            Builtin::M8s => "m8s",
            Builtin::Io8 => "be8",
            Builtin::Io8s => "be8s",
        }
    }

    /// Register width in bytes
    pub fn width(self) -> usize {
        match self {
            Builtin::M32 | Builtin::Be32 | Builtin::Le32 => 4,
            Builtin::M16
            | Builtin::M16s
            | Builtin::Be16
            | Builtin::Be16s
            | Builtin::Le16
            | Builtin::Le16s => 2,
            Builtin::M8 | Builtin::M8s | Builtin::Io8 | Builtin::Io8s => 1,
        }
    }

    fn check(self, address: usize) -> Result<(), BusError> {
        if address == 0 {
            return Err(BusError::NullAddress);
        }
        if address % self.width() != 0 {
            return Err(BusError::Misaligned {
                address,
                width: self.width(),
            });
        }
        Ok(())
    }

    /// Read the register at `address`
    ///
    /// # Safety
    /// `address` must be valid for a volatile read of [`Builtin::width`]
    /// bytes. Null and misaligned addresses are rejected with an error.
    pub unsafe fn read(self, address: usize) -> Result<u32, BusError> {
        self.check(address)?;
        // SAFETY: validity is the caller's contract; alignment checked above
        Ok(unsafe {
            match self {
                Builtin::M32 => read_volatile(address as *const u32),
                Builtin::Be32 => u32::from_be(read_volatile(address as *const u32)),
                Builtin::Le32 => u32::from_le(read_volatile(address as *const u32)),
                Builtin::M16 => read_volatile(address as *const u16) as u32,
                Builtin::M16s => read_volatile(address as *const u16) as i16 as u32,
                Builtin::Be16 => u16::from_be(read_volatile(address as *const u16)) as u32,
                Builtin::Be16s => u16::from_be(read_volatile(address as *const u16)) as i16 as u32,
                Builtin::Le16 => u16::from_le(read_volatile(address as *const u16)) as u32,
                Builtin::Le16s => u16::from_le(read_volatile(address as *const u16)) as i16 as u32,
                Builtin::M8 | Builtin::Io8 => read_volatile(address as *const u8) as u32,
                Builtin::M8s | Builtin::Io8s => read_volatile(address as *const u8) as i8 as u32,
            }
        })
    }

    /// Write the register at `address`, truncating `value` to its width
    ///
    /// # Safety
    /// `address` must be valid for a volatile write of [`Builtin::width`]
    /// bytes. Null and misaligned addresses are rejected with an error.
    pub unsafe fn write(self, address: usize, value: u32) -> Result<(), BusError> {
        self.check(address)?;
        // SAFETY: validity is the caller's contract; alignment checked above
        unsafe {
            match self {
                Builtin::M32 => write_volatile(address as *mut u32, value),
                Builtin::Be32 => write_volatile(address as *mut u32, value.to_be()),
                Builtin::Le32 => write_volatile(address as *mut u32, value.to_le()),
                Builtin::M16 | Builtin::M16s => write_volatile(address as *mut u16, value as u16),
                Builtin::Be16 | Builtin::Be16s => {
                    write_volatile(address as *mut u16, (value as u16).to_be())
                }
                Builtin::Le16 | Builtin::Le16s => {
                    write_volatile(address as *mut u16, (value as u16).to_le())
                }
                Builtin::M8 | Builtin::M8s | Builtin::Io8 | Builtin::Io8s => {
                    write_volatile(address as *mut u8, value as u8)
                }
            }
        }
        Ok(())
    }
}

/// The access method a binding uses
#[derive(Debug, Clone)]
pub enum AccessMethod {
    Builtin(Builtin),
    Custom(Arc<dyn BusAccess>),
}

impl Default for AccessMethod {
    fn default() -> Self {
        AccessMethod::Builtin(Builtin::DEFAULT)
    }
}

impl AccessMethod {
    /// Resolve an access key from a link
    ///
    /// Registered methods take precedence over built-in names. An empty key
    /// selects the default; an unrecognised one is an error.
    pub fn resolve(methods: &Registry<dyn BusAccess>, key: &str) -> Result<Self, LinkError> {
        if key.is_empty() {
            return Ok(AccessMethod::default());
        }
        if let Some(custom) = methods.find(key) {
            return Ok(AccessMethod::Custom(custom));
        }
        Builtin::from_key(key)
            .map(AccessMethod::Builtin)
            .ok_or_else(|| LinkError::UnknownAccess(key.to_string()))
    }

    pub(crate) fn read(&self, binding: &BusBinding) -> Result<u32, BusError> {
        match self {
            // SAFETY: bindings only carry addresses accepted under the
            // contract of `link_init`
            AccessMethod::Builtin(method) => unsafe { method.read(binding.address()) },
            AccessMethod::Custom(method) => method.read(binding),
        }
    }

    pub(crate) fn write(&self, binding: &BusBinding, value: u32) -> Result<(), BusError> {
        match self {
            // SAFETY: as for `read`
            AccessMethod::Builtin(method) => unsafe { method.write(binding.address(), value) },
            AccessMethod::Custom(method) => method.write(binding, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefixes() {
        assert_eq!(Builtin::from_key("be32"), Some(Builtin::Be32));
        assert_eq!(Builtin::from_key("le16s"), Some(Builtin::Le16s));
        assert_eq!(Builtin::from_key("le16"), Some(Builtin::Le16));
        assert_eq!(Builtin::from_key("m8s"), Some(Builtin::M8s));
        assert_eq!(Builtin::from_key("be8"), Some(Builtin::Io8));
        assert_eq!(Builtin::from_key("m32s"), Some(Builtin::M32));
        assert_eq!(Builtin::from_key("bogus16"), None);
        assert_eq!(Builtin::from_key("be64"), None);
        for method in [Builtin::M16s, Builtin::Io8s, Builtin::Le32] {
            assert_eq!(Builtin::from_key(method.key()), Some(method));
        }
    }

    #[test]
    fn byte_order_and_sign() {
        let mut word = [0u32; 1];
        let address = word.as_mut_ptr() as usize;
        unsafe {
            Builtin::Be32.write(address, 0x1234_5678).unwrap();
            assert_eq!(Builtin::M32.read(address).unwrap(), 0x1234_5678u32.to_be());
            assert_eq!(Builtin::Be32.read(address).unwrap(), 0x1234_5678);
            Builtin::M16.write(address, 0x1_8001).unwrap();
            assert_eq!(Builtin::M16.read(address).unwrap(), 0x8001);
            assert_eq!(Builtin::M16s.read(address).unwrap(), 0xFFFF_8001);
            Builtin::M8.write(address, 0x80).unwrap();
            assert_eq!(Builtin::M8s.read(address).unwrap() as i32, -128);
        }
    }

    #[test]
    fn bad_addresses_are_rejected() {
        let word = [0u32; 2];
        let address = word.as_ptr() as usize;
        unsafe {
            assert_eq!(Builtin::Be32.read(0), Err(BusError::NullAddress));
            assert_eq!(
                Builtin::Le32.read(address + 2),
                Err(BusError::Misaligned {
                    address: address + 2,
                    width: 4
                })
            );
            assert!(Builtin::Le16.read(address + 2).is_ok());
        }
    }
}
