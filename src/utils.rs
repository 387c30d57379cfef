use std::{
    env,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{char as parse_char, digit1, hex_digit1, oct_digit0, space0},
    combinator::{all_consuming, map_opt, map_res, opt},
    sequence::preceded,
};

/// Default exponent of the generic-variable registry bucket count
pub const DEFAULT_LD_TABLE_SIZE: u32 = 9;

/// Directory used for save/restore files when `DATA_PATH` is not set
pub const DEFAULT_DATA_PATH: &str = "/dat";

/// Lock a mutex that this crate created, aborting if that is impossible
///
/// A poisoned lock means another thread panicked while holding it; device
/// support cannot safely carry on without its locks.
pub(crate) fn must_lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("Unable to lock mutex: poisoned by a panicking thread"),
    }
}

/// nom parser for an unsigned integer with C literal prefixes
///
/// A `0x`/`0X` prefix selects hexadecimal, a leading `0` octal, and anything
/// else is decimal. Like `strtoul(s, &end, 0)`, a bare `0x` parses as `0`
/// and leaves the `x` unconsumed.
pub fn c_unsigned(input: &str) -> IResult<&str, u64> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |digits| {
            u64::from_str_radix(digits, 16)
        }),
        map_res(preceded(parse_char('0'), oct_digit0), |digits: &str| {
            if digits.is_empty() {
                Ok(0)
            } else {
                u64::from_str_radix(digits, 8)
            }
        }),
        map_res(digit1, |digits: &str| digits.parse::<u64>()),
    ))
    .parse(input)
}

/// nom parser for an optionally signed integer with C literal prefixes
pub fn c_integer(input: &str) -> IResult<&str, i64> {
    map_opt(
        (opt(alt((parse_char('-'), parse_char('+')))), c_unsigned),
        |(sign, value)| {
            let value = i64::try_from(value).ok()?;
            Some(if sign == Some('-') { -value } else { value })
        },
    )
    .parse(input)
}

/// Parse an unsigned integer the way `strtoul(s, &end, 0)` does, requiring
/// the whole string to be consumed
pub fn parse_c_unsigned(value: &str) -> Option<u64> {
    all_consuming(c_unsigned).parse(value).ok().map(|(_, v)| v)
}

/// Parse a possibly-signed integer with C prefix rules (see [`c_unsigned`])
pub fn parse_c_integer(value: &str) -> Option<i64> {
    all_consuming(c_integer).parse(value).ok().map(|(_, v)| v)
}

/// Parse the leading unsigned integer of a string, ignoring trailing text
///
/// Mirrors `strtoull` when the caller only checks that *some* digits were
/// consumed. Returns `None` if no digits are present at all.
pub fn parse_c_unsigned_prefix(value: &str) -> Option<u64> {
    preceded(space0, c_unsigned).parse(value).ok().map(|(_, v)| v)
}

/// Get the bucket-count exponent for new generic-variable registries
///
/// Read from `DEVGENVAR_LD_TABLE_SIZE`, clamped to the valid range 8..=16.
pub fn get_default_ld_table_size() -> u32 {
    env::var("DEVGENVAR_LD_TABLE_SIZE")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(DEFAULT_LD_TABLE_SIZE)
        .clamp(8, 16)
}

/// Get the directory save/restore files live in
///
/// Uses `DATA_PATH` from the environment, otherwise `/dat` if it exists as a
/// directory. Returns `None` when neither applies (current directory).
pub fn get_default_data_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("DATA_PATH") {
        return Some(PathBuf::from(path));
    }
    let default = Path::new(DEFAULT_DATA_PATH);
    default.is_dir().then(|| default.to_path_buf())
}
