//! Typed scalar values exchanged between device support and record fields.
//!
//! EPICS identifies the storage type of a value with a `DBR_*` code. The
//! scalar types are enumerated in [`DbrType`] and a value of any of them is
//! carried by [`DbrValue`]. The options, and the native type used to
//! represent them, are:
//! - [`DbrValue::String`] ([`String`], at most 39 bytes as in the database)
//! - [`DbrValue::Char`] ([`i8`]) and [`DbrValue::UChar`] ([`u8`])
//! - [`DbrValue::Short`] ([`i16`]) and [`DbrValue::UShort`] ([`u16`])
//! - [`DbrValue::Long`] ([`i32`]) and [`DbrValue::ULong`] ([`u32`])
//! - [`DbrValue::Float`] ([`f32`]) and [`DbrValue::Double`] ([`f64`])
//! - [`DbrValue::Enum`] ([`u16`]), the index of a state string
//!
//! [`DbrValue::convert_to`] is the conversion table used whenever data moves
//! between a generic variable and a record field of a different type. It
//! follows the host database's "fast convert" behaviour: integer to integer
//! conversions wrap like a C cast, floating point to integer conversions are
//! checked, and strings are parsed or formatted.

use num::NumCast;
use std::{convert::TryFrom, fmt::Display, str::FromStr};
use thiserror::Error;

use crate::utils::parse_c_integer;

/// Longest string (including the terminator) a string field can hold
pub const MAX_STRING_SIZE: usize = 40;

/// Truncate a String to fit a fixed-length string field
///
/// Truncation happens one character at a time so that a multi-byte
/// character is never split, even though we don't _expect_ non-ASCII.
fn truncate_to_string_size(value: &str, max_length: usize) -> String {
    let mut buffer = String::with_capacity(max_length);
    for c in value.chars() {
        if buffer.len() + c.len_utf8() < max_length {
            buffer.push(c);
        } else {
            break;
        }
    }
    buffer
}

/// Basic DBR data types
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DbrType {
    String = 0,
    Char = 1,
    UChar = 2,
    Short = 3,
    UShort = 4,
    Long = 5,
    ULong = 6,
    Float = 7,
    Double = 8,
    Enum = 9,
}

impl TryFrom<u16> for DbrType {
    type Error = ();
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::String,
            1 => Self::Char,
            2 => Self::UChar,
            3 => Self::Short,
            4 => Self::UShort,
            5 => Self::Long,
            6 => Self::ULong,
            7 => Self::Float,
            8 => Self::Double,
            9 => Self::Enum,
            _ => return Err(()),
        })
    }
}

impl FromStr for DbrType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        let s = upper.strip_prefix("DBR_").unwrap_or(&upper);
        Ok(match s {
            "STRING" => Self::String,
            "CHAR" => Self::Char,
            "UCHAR" => Self::UChar,
            "SHORT" | "INT" => Self::Short,
            "USHORT" => Self::UShort,
            "LONG" => Self::Long,
            "ULONG" => Self::ULong,
            "FLOAT" => Self::Float,
            "DOUBLE" => Self::Double,
            "ENUM" => Self::Enum,
            _ => return Err(()),
        })
    }
}

/// A single value of one of the [`DbrType`] kinds
#[derive(Clone, Debug, PartialEq)]
pub enum DbrValue {
    String(String),
    Char(i8),
    UChar(u8),
    Short(i16),
    UShort(u16),
    Long(i32),
    ULong(u32),
    Float(f32),
    Double(f64),
    Enum(u16),
}

/// Errors from [`DbrValue::convert_to`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvertError {
    #[error("Cannot parse '{0}' as a number")]
    CannotParse(String),
    #[error("No reasonable data conversion of {value} to {target:?}")]
    NoConvert { value: String, target: DbrType },
}

/// Intermediate representation used by the conversion table
#[derive(Copy, Clone, Debug)]
enum Numeric {
    Int(i64),
    Float(f64),
}

impl DbrValue {
    /// The zero (or empty) value of a type
    pub fn zero(dbr_type: DbrType) -> DbrValue {
        match dbr_type {
            DbrType::String => DbrValue::String(String::new()),
            DbrType::Char => DbrValue::Char(0),
            DbrType::UChar => DbrValue::UChar(0),
            DbrType::Short => DbrValue::Short(0),
            DbrType::UShort => DbrValue::UShort(0),
            DbrType::Long => DbrValue::Long(0),
            DbrType::ULong => DbrValue::ULong(0),
            DbrType::Float => DbrValue::Float(0.0),
            DbrType::Double => DbrValue::Double(0.0),
            DbrType::Enum => DbrValue::Enum(0),
        }
    }

    pub fn get_type(&self) -> DbrType {
        match self {
            DbrValue::String(_) => DbrType::String,
            DbrValue::Char(_) => DbrType::Char,
            DbrValue::UChar(_) => DbrType::UChar,
            DbrValue::Short(_) => DbrType::Short,
            DbrValue::UShort(_) => DbrType::UShort,
            DbrValue::Long(_) => DbrType::Long,
            DbrValue::ULong(_) => DbrType::ULong,
            DbrValue::Float(_) => DbrType::Float,
            DbrValue::Double(_) => DbrType::Double,
            DbrValue::Enum(_) => DbrType::Enum,
        }
    }

    fn as_numeric(&self) -> Result<Numeric, ConvertError> {
        Ok(match self {
            DbrValue::String(val) => {
                let val = val.trim();
                if let Some(n) = parse_c_integer(val) {
                    Numeric::Int(n)
                } else {
                    Numeric::Float(
                        val.parse()
                            .map_err(|_| ConvertError::CannotParse(val.to_string()))?,
                    )
                }
            }
            DbrValue::Char(val) => Numeric::Int(*val as i64),
            DbrValue::UChar(val) => Numeric::Int(*val as i64),
            DbrValue::Short(val) => Numeric::Int(*val as i64),
            DbrValue::UShort(val) => Numeric::Int(*val as i64),
            DbrValue::Long(val) => Numeric::Int(*val as i64),
            DbrValue::ULong(val) => Numeric::Int(*val as i64),
            DbrValue::Enum(val) => Numeric::Int(*val as i64),
            DbrValue::Float(val) => Numeric::Float(*val as f64),
            DbrValue::Double(val) => Numeric::Float(*val),
        })
    }

    /// Convert this value to another basic type
    pub fn convert_to(&self, dbr_type: DbrType) -> Result<DbrValue, ConvertError> {
        /// Checked conversion of floating point data to an integer type
        fn _float_to<T: NumCast>(value: f64, target: DbrType) -> Result<T, ConvertError> {
            NumCast::from(value).ok_or_else(|| ConvertError::NoConvert {
                value: value.to_string(),
                target,
            })
        }

        if self.get_type() == dbr_type {
            return Ok(self.clone());
        }
        if dbr_type == DbrType::String {
            return Ok(DbrValue::String(truncate_to_string_size(
                &self.to_string(),
                MAX_STRING_SIZE,
            )));
        }

        Ok(match self.as_numeric()? {
            Numeric::Int(val) => match dbr_type {
                DbrType::Char => DbrValue::Char(val as i8),
                DbrType::UChar => DbrValue::UChar(val as u8),
                DbrType::Short => DbrValue::Short(val as i16),
                DbrType::UShort => DbrValue::UShort(val as u16),
                DbrType::Long => DbrValue::Long(val as i32),
                DbrType::ULong => DbrValue::ULong(val as u32),
                DbrType::Enum => DbrValue::Enum(val as u16),
                DbrType::Float => DbrValue::Float(val as f32),
                DbrType::Double => DbrValue::Double(val as f64),
                DbrType::String => unreachable!(),
            },
            Numeric::Float(val) => match dbr_type {
                DbrType::Char => DbrValue::Char(_float_to(val, dbr_type)?),
                DbrType::UChar => DbrValue::UChar(_float_to(val, dbr_type)?),
                DbrType::Short => DbrValue::Short(_float_to(val, dbr_type)?),
                DbrType::UShort => DbrValue::UShort(_float_to(val, dbr_type)?),
                DbrType::Long => DbrValue::Long(_float_to(val, dbr_type)?),
                DbrType::ULong => DbrValue::ULong(_float_to(val, dbr_type)?),
                DbrType::Enum => DbrValue::Enum(_float_to(val, dbr_type)?),
                DbrType::Float => DbrValue::Float(val as f32),
                DbrType::Double => DbrValue::Double(val),
                DbrType::String => unreachable!(),
            },
        })
    }
}

impl Display for DbrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbrValue::String(val) => write!(f, "{val}"),
            DbrValue::Char(val) => write!(f, "{val}"),
            DbrValue::UChar(val) => write!(f, "{val}"),
            DbrValue::Short(val) => write!(f, "{val}"),
            DbrValue::UShort(val) => write!(f, "{val}"),
            DbrValue::Long(val) => write!(f, "{val}"),
            DbrValue::ULong(val) => write!(f, "{val}"),
            DbrValue::Float(val) => write!(f, "{val}"),
            DbrValue::Double(val) => write!(f, "{val}"),
            DbrValue::Enum(val) => write!(f, "{val}"),
        }
    }
}

/// Implement From/TryFrom between a native type and a DbrValue variant
macro_rules! impl_dbrvalue_conversions_between {
    ($variant:ident, $typ:ty) => {
        impl From<$typ> for DbrValue {
            fn from(value: $typ) -> Self {
                DbrValue::$variant(value)
            }
        }
        impl TryFrom<&DbrValue> for $typ {
            type Error = ConvertError;
            fn try_from(value: &DbrValue) -> Result<Self, Self::Error> {
                Ok(match value.convert_to(DbrType::$variant)? {
                    DbrValue::$variant(v) => v,
                    _ => unreachable!(),
                })
            }
        }
    };
}
impl_dbrvalue_conversions_between!(Char, i8);
impl_dbrvalue_conversions_between!(UChar, u8);
impl_dbrvalue_conversions_between!(Short, i16);
impl_dbrvalue_conversions_between!(UShort, u16);
impl_dbrvalue_conversions_between!(Long, i32);
impl_dbrvalue_conversions_between!(ULong, u32);
impl_dbrvalue_conversions_between!(Float, f32);
impl_dbrvalue_conversions_between!(Double, f64);
impl_dbrvalue_conversions_between!(String, String);

impl From<&str> for DbrValue {
    fn from(value: &str) -> Self {
        DbrValue::String(truncate_to_string_size(value, MAX_STRING_SIZE))
    }
}
