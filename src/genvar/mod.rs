//! Generic variables: typed value slots shared between driver code and
//! database records.
//!
//! A driver (the "producer") creates an array of [`GenVar`]s, registers it
//! under a name, and from then on reads and writes the values while records
//! bound to them with a `#C<index> S<flags> @<name>` link do the same from
//! the database side. Each variable may carry
//! - an I/O scan list, so the producer can make bound input records process;
//! - a lock, serialising whole get/put (and read-modify-write) sequences;
//! - an event, signalled whenever a record has read or written the value.
//!
//! An output record bound with the asynchronous flag completes in two
//! phases: its write attaches it to the variable and leaves it active, and
//! the producer calls [`GenVar::complete_processing`] once it has consumed
//! the value, which queues the record's second processing pass.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, SystemTime},
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    alarm::Alarm,
    dbr::{ConvertError, DbrType, DbrValue},
    record::{FieldError, WeakRecordRef},
    scan::{ScanList, SchedulerClosed, SchedulerHandle},
    utils::must_lock,
};

mod binding;
mod devsup;
mod registry;

pub use binding::{
    GenVarBinding, GenVarFlags, apply_phase2, get, get_ioint_info, get_nolock, init_inp_rec,
    init_out_rec, put, put_nolock, readback_nolock,
};
pub use devsup::GenVarDevSup;
pub use registry::{GenVarGroup, GenVarRegistry, LD_TABLE_SIZE_RANGE};

#[derive(Error, Debug)]
pub enum GenVarError {
    #[error("Link must be of type VME_IO")]
    BadLinkType,
    #[error("No registry entry found for '{0}'")]
    NotRegistered(String),
    #[error("Invalid card #{card}; only {count} variables are registered")]
    BadCard { card: u32, count: usize },
    #[error("Record has no field named '{0}'")]
    BadField(String),
    #[error("A generic variable named '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("The variable already has one")]
    AlreadyPresent,
    #[error("Only ONE record may asynchronously process a generic variable")]
    Conflict,
    #[error("No record is waiting for completion")]
    NotAttached,
    #[error("Record has no scheduler to complete asynchronous processing")]
    NoScheduler,
    #[error("Record is not bound to a generic variable")]
    NotBound,
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerClosed),
}

/// Outcome of [`GenVar::wait`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitStatus {
    Ok,
    TimedOut,
    /// Waiting failed
    Error,
    /// The variable has no event to wait on
    NoEvent,
}

/// A record in the first phase of an asynchronous write
#[derive(Debug)]
struct Attachment {
    record: WeakRecordRef,
    scheduler: SchedulerHandle,
}

/// The runtime state of a variable
#[derive(Debug)]
pub struct GenVarData {
    value: DbrValue,
    /// Passed to bound records that take their time from the device
    pub timestamp: SystemTime,
    /// Passed to bound input records, and set by output records when they
    /// write
    pub alarm: Alarm,
    attached: Option<Attachment>,
}

impl GenVarData {
    pub fn value(&self) -> &DbrValue {
        &self.value
    }

    pub fn dbr_type(&self) -> DbrType {
        self.value.get_type()
    }

    /// Store a value, converting it to the variable's type
    pub fn set_value(&mut self, value: &DbrValue) -> Result<(), ConvertError> {
        self.value = value.convert_to(self.value.get_type())?;
        Ok(())
    }

    /// Whether a record is waiting for [`GenVar::complete_processing`]
    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }
}

/// Auto-resetting binary event
#[derive(Debug, Default)]
struct GenVarEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl GenVarEvent {
    fn signal(&self) {
        *must_lock(&self.signaled) = true;
        self.cond.notify_one();
    }

    fn wait(&self, timeout: f64) -> WaitStatus {
        let Ok(mut signaled) = self.signaled.lock() else {
            return WaitStatus::Error;
        };
        if timeout < 0.0 || timeout == f64::INFINITY {
            signaled = match self.cond.wait_while(signaled, |s| !*s) {
                Ok(guard) => guard,
                Err(_) => return WaitStatus::Error,
            };
        } else if !*signaled && timeout > 0.0 {
            let Ok(timeout) = Duration::try_from_secs_f64(timeout) else {
                return WaitStatus::Error;
            };
            signaled = match self.cond.wait_timeout_while(signaled, timeout, |s| !*s) {
                Ok((guard, _)) => guard,
                Err(_) => return WaitStatus::Error,
            };
        } else if timeout.is_nan() {
            return WaitStatus::Error;
        }
        if std::mem::take(&mut *signaled) {
            WaitStatus::Ok
        } else {
            WaitStatus::TimedOut
        }
    }
}

/// A generic variable
#[derive(Debug)]
pub struct GenVar {
    scan: Option<Arc<ScanList>>,
    lock: Option<Mutex<()>>,
    event: Option<GenVarEvent>,
    state: Mutex<GenVarData>,
}

impl GenVar {
    /// Create a variable whose type is the type of its initial value
    pub fn new(initial: impl Into<DbrValue>) -> Self {
        GenVar {
            scan: None,
            lock: None,
            event: None,
            state: Mutex::new(GenVarData {
                value: initial.into(),
                timestamp: SystemTime::UNIX_EPOCH,
                alarm: Alarm::NONE,
                attached: None,
            }),
        }
    }

    /// Create a zero-valued variable of the given type
    pub fn of_type(dbr_type: DbrType) -> Self {
        Self::new(DbrValue::zero(dbr_type))
    }

    pub fn builder(initial: impl Into<DbrValue>) -> GenVarBuilder {
        GenVarBuilder {
            var: GenVar::new(initial),
        }
    }

    /// Create one variable per initial value, each with its own scan list
    pub fn with_individual_scan_lists<I>(initial: I) -> Vec<GenVar>
    where
        I: IntoIterator,
        I::Item: Into<DbrValue>,
    {
        initial
            .into_iter()
            .map(|value| GenVar::builder(value).scan_list(Arc::new(ScanList::new())).build())
            .collect()
    }

    /// Give the variable a lock. Fails if it already has one.
    pub fn lock_create(&mut self) -> Result<(), GenVarError> {
        if self.lock.is_some() {
            return Err(GenVarError::AlreadyPresent);
        }
        self.lock = Some(Mutex::new(()));
        Ok(())
    }

    /// Give the variable an event. Fails if it already has one.
    pub fn event_create(&mut self) -> Result<(), GenVarError> {
        if self.event.is_some() {
            return Err(GenVarError::AlreadyPresent);
        }
        self.event = Some(GenVarEvent::default());
        Ok(())
    }

    pub fn dbr_type(&self) -> DbrType {
        self.data().dbr_type()
    }

    pub fn scan_list(&self) -> Option<&Arc<ScanList>> {
        self.scan.as_ref()
    }

    pub fn has_lock(&self) -> bool {
        self.lock.is_some()
    }

    pub fn has_event(&self) -> bool {
        self.event.is_some()
    }

    /// Take the variable's lock, if it has one
    ///
    /// Record device support holds this across every get and put, so a
    /// producer holding it sees no record access in between.
    pub fn lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.lock.as_ref().map(must_lock)
    }

    /// Access the variable's runtime state
    ///
    /// This guards only the state itself; it is held briefly and never while
    /// waiting for anything else.
    pub fn data(&self) -> MutexGuard<'_, GenVarData> {
        must_lock(&self.state)
    }

    pub fn load(&self) -> DbrValue {
        self.data().value.clone()
    }

    /// Store a value, converting it to the variable's type
    pub fn store(&self, value: impl Into<DbrValue>) -> Result<(), ConvertError> {
        self.data().set_value(&value.into())
    }

    /// Wait for a record to signal the variable's event
    ///
    /// A zero timeout polls, a negative one waits indefinitely.
    pub fn wait(&self, timeout: f64) -> WaitStatus {
        match &self.event {
            Some(event) => event.wait(timeout),
            None => WaitStatus::NoEvent,
        }
    }

    pub fn signal(&self) {
        if let Some(event) = &self.event {
            event.signal();
        }
    }

    /// Make every record on the variable's scan list process
    ///
    /// Returns the number of records queued.
    pub fn scan_request(&self) -> usize {
        self.scan.as_ref().map_or(0, |scan| scan.request())
    }

    /// Complete the asynchronous write of the attached record
    ///
    /// Queues the record's second processing pass and detaches it. Fails if
    /// no record is attached, e.g. when completing twice. If the request
    /// cannot be queued the record stays attached.
    pub fn complete_processing(&self) -> Result<(), GenVarError> {
        let mut data = self.data();
        let attachment = data.attached.as_ref().ok_or(GenVarError::NotAttached)?;
        trace!("Completing asynchronous processing");
        attachment.scheduler.complete(attachment.record.clone())?;
        data.attached = None;
        Ok(())
    }

    /// Attach a record for the first phase of an asynchronous write
    pub(crate) fn attach(
        &self,
        record: WeakRecordRef,
        scheduler: SchedulerHandle,
    ) -> Result<(), GenVarError> {
        let mut data = self.data();
        if data.attached.is_some() {
            return Err(GenVarError::Conflict);
        }
        debug!("Attaching record for asynchronous completion");
        data.attached = Some(Attachment { record, scheduler });
        Ok(())
    }
}

/// Builder for a [`GenVar`] with optional scan list, lock and event
pub struct GenVarBuilder {
    var: GenVar,
}

impl GenVarBuilder {
    /// Attach a scan list. Several variables may share one.
    pub fn scan_list(mut self, scan: Arc<ScanList>) -> Self {
        self.var.scan = Some(scan);
        self
    }

    pub fn lock(mut self) -> Self {
        self.var.lock = Some(Mutex::new(()));
        self
    }

    pub fn event(mut self) -> Self {
        self.var.event = Some(GenVarEvent::default());
        self
    }

    pub fn timestamp(self, timestamp: SystemTime) -> Self {
        self.var.data().timestamp = timestamp;
        self
    }

    pub fn build(self) -> GenVar {
        self.var
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn lock_and_event_are_created_once() {
        let mut var = GenVar::of_type(DbrType::ULong);
        assert!(!var.has_lock() && !var.has_event());
        var.lock_create().unwrap();
        var.event_create().unwrap();
        assert!(matches!(var.lock_create(), Err(GenVarError::AlreadyPresent)));
        assert!(matches!(var.event_create(), Err(GenVarError::AlreadyPresent)));
        assert!(var.lock().is_some());
    }

    #[test]
    fn values_keep_their_type() {
        let var = GenVar::new(0u16);
        var.store(70000.0).unwrap_err();
        var.store(-1i32).unwrap();
        assert_eq!(var.load(), DbrValue::UShort(0xFFFF));
        var.store("12").unwrap();
        assert_eq!(var.load(), DbrValue::UShort(12));
        assert_eq!(var.dbr_type(), DbrType::UShort);
    }

    #[test]
    fn wait_for_events() {
        assert_eq!(GenVar::new(0i32).wait(0.0), WaitStatus::NoEvent);
        let var = Arc::new(GenVar::builder(0i32).event().build());
        assert_eq!(var.wait(0.0), WaitStatus::TimedOut);
        assert_eq!(var.wait(0.01), WaitStatus::TimedOut);
        var.signal();
        assert_eq!(var.wait(0.0), WaitStatus::Ok);
        // The event resets once consumed
        assert_eq!(var.wait(0.0), WaitStatus::TimedOut);
        assert_eq!(var.wait(f64::NAN), WaitStatus::Error);

        let signaller = {
            let var = var.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                var.signal();
            })
        };
        assert_eq!(var.wait(-1.0), WaitStatus::Ok);
        signaller.join().unwrap();
    }

    #[test]
    fn individual_scan_lists() {
        let vars = GenVar::with_individual_scan_lists([1u32, 2, 3]);
        assert_eq!(vars.len(), 3);
        let lists: Vec<_> = vars.iter().map(|v| v.scan_list().unwrap().clone()).collect();
        assert!(!Arc::ptr_eq(&lists[0], &lists[1]));
        assert_eq!(vars[2].load(), DbrValue::ULong(3));
        assert_eq!(vars[0].scan_request(), 0);
    }

    #[test]
    fn completing_without_a_record_fails() {
        let var = GenVar::new(0u32);
        assert!(matches!(
            var.complete_processing(),
            Err(GenVarError::NotAttached)
        ));
    }
}
