//! Device support for EPICS-style database records, written in Rust.
//!
//! Device support is the layer between a record (an `ai`, `bo`, `longout`,
//! ...) and whatever actually holds the data. This crate provides three
//! kinds:
//!
//! - [`bus`]: records read and write memory-mapped device registers directly.
//!   A record's link names a base address or registered device, an offset,
//!   an access method (width, byte order, signedness) and optionally an I/O
//!   interrupt scan list.
//! - [`genvar`]: records read and write *generic variables*, typed values
//!   owned by driver code. A driver registers an array of variables by name,
//!   updates them from its own threads, and tells bound input records when
//!   to process. Output records may complete asynchronously, once the driver
//!   has consumed what they wrote.
//! - [`savres`]: array output records whose contents are saved to disk on
//!   every write and restored at startup.
//!
//! The record side is deliberately small: [`record`] defines the contract
//! device support is written against, [`records`] implements the standard
//! record types on top of it, and [`scan`] schedules their processing.
//! Device support never calls into record processing from a driver's thread;
//! it sends a request to the record's [`scan::Scheduler`] instead.
//!
//! ## Example
//!
//! A driver exposing a single counter to a `longin` record:
//!
//! ```
//! use std::sync::Arc;
//!
//! use epics_devsup::{
//!     genvar::{GenVar, GenVarDevSup},
//!     record::Record,
//!     records::LonginRecord,
//!     registry::Registries,
//!     scan::{Scheduler, initialize},
//! };
//!
//! let registries = Arc::new(Registries::new());
//! let group = registries
//!     .genvars
//!     .register("counters", vec![GenVar::new(0i32)])
//!     .unwrap();
//!
//! let scheduler = Scheduler::new();
//! let dset = Arc::new(GenVarDevSup::new(registries.clone()));
//! let record = scheduler
//!     .handle()
//!     .adopt(LonginRecord::new("COUNT", "#C0 S0 @counters", dset));
//! initialize(&*record).unwrap();
//!
//! group.bind(0).unwrap().store(42i32).unwrap();
//! record.lock().unwrap().process();
//! assert_eq!(record.lock().unwrap().val, 42);
//! ```

pub mod alarm;
pub mod bus;
pub mod dbr;
pub mod devsup;
pub mod genvar;
pub mod record;
pub mod records;
pub mod registry;
pub mod savres;
pub mod scan;
pub mod utils;

pub use crate::devsup::{DevSupError, DeviceSupport, IoStatus};
pub use crate::registry::Registries;
