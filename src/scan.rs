//! Record scheduling: process requests, I/O interrupt scan lists and record
//! initialisation.
//!
//! Device support never calls back into a record's processing routine from
//! its own threads. Instead it sends a [`ProcessRequest`] to the
//! [`Scheduler`] that owns the record, which runs the processing under the
//! record's lock on its own thread or task.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    devsup::DevSupError,
    record::{Record, ScanMode, WeakRecordRef},
    utils::must_lock,
};

#[derive(Debug)]
pub enum ProcessRequest {
    /// Process the record normally. Ignored if the record is active.
    Scan(WeakRecordRef),
    /// Run the second phase of an asynchronous operation
    Complete(WeakRecordRef),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("The record scheduler has shut down")]
pub struct SchedulerClosed;

/// Cloneable handle for sending requests to a [`Scheduler`]
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    sender: mpsc::UnboundedSender<ProcessRequest>,
}

impl SchedulerHandle {
    pub fn request(&self, request: ProcessRequest) -> Result<(), SchedulerClosed> {
        self.sender.send(request).map_err(|_| SchedulerClosed)
    }

    pub fn scan(&self, record: WeakRecordRef) -> Result<(), SchedulerClosed> {
        self.request(ProcessRequest::Scan(record))
    }

    pub fn complete(&self, record: WeakRecordRef) -> Result<(), SchedulerClosed> {
        self.request(ProcessRequest::Complete(record))
    }

    /// Place a record under shared ownership, processed by this scheduler
    pub fn adopt<R: Record + 'static>(&self, record: R) -> Arc<Mutex<R>> {
        adopt_record(record, Some(self.clone()))
    }
}

/// Place a record under shared ownership and wire up its self-handle
///
/// A record adopted without a scheduler cannot be scanned or complete
/// asynchronous operations.
pub fn adopt_record<R: Record + 'static>(
    mut record: R,
    scheduler: Option<SchedulerHandle>,
) -> Arc<Mutex<R>> {
    Arc::new_cyclic(|weak: &std::sync::Weak<Mutex<R>>| {
        let handle: WeakRecordRef = weak.clone();
        record.common_mut().attach(handle, scheduler);
        Mutex::new(record)
    })
}

/// Receives process requests and runs record processing
#[derive(Debug)]
pub struct Scheduler {
    receiver: mpsc::UnboundedReceiver<ProcessRequest>,
    handle: SchedulerHandle,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Scheduler {
            receiver,
            handle: SchedulerHandle { sender },
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Handle every request already queued, without waiting for more
    ///
    /// Returns the number of requests handled.
    pub fn run_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(request) = self.receiver.try_recv() {
            dispatch(request);
            handled += 1;
        }
        handled
    }

    /// Handle requests as they arrive, until `stop` is cancelled
    pub async fn run(mut self, stop: CancellationToken) {
        loop {
            select! {
                _ = stop.cancelled() => break,
                request = self.receiver.recv() => match request {
                    Some(request) => dispatch(request),
                    None => break,
                },
            }
        }
        debug!("Record scheduler stopped");
    }
}

fn dispatch(request: ProcessRequest) {
    let (record, completion) = match request {
        ProcessRequest::Scan(record) => (record, false),
        ProcessRequest::Complete(record) => (record, true),
    };
    let Some(record) = record.upgrade() else {
        trace!("Dropping process request for a record that no longer exists");
        return;
    };
    let mut record = must_lock(&record);
    match (completion, record.common().pact) {
        (false, true) => {
            debug!("{}: active, scan request ignored", record.common().name);
        }
        (true, false) => {
            warn!(
                "{}: completion requested but no operation is pending",
                record.common().name
            );
        }
        _ => record.process(),
    }
}

/// I/O interrupt scan list
///
/// Records configured for I/O event scanning join the list of their device
/// support at initialisation. Producers call [`ScanList::request`] whenever
/// new data is available.
#[derive(Debug, Default)]
pub struct ScanList {
    members: Mutex<Vec<(WeakRecordRef, SchedulerHandle)>>,
}

impl ScanList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, record: WeakRecordRef, scheduler: SchedulerHandle) {
        must_lock(&self.members).push((record, scheduler));
    }

    pub fn len(&self) -> usize {
        must_lock(&self.members).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue every live member for processing, returning how many were queued
    pub fn request(&self) -> usize {
        let mut members = must_lock(&self.members);
        members.retain(|(record, _)| record.strong_count() > 0);
        members
            .iter()
            .filter(|(record, scheduler)| scheduler.scan(record.clone()).is_ok())
            .count()
    }
}

/// Initialise a record the way the database does at startup
///
/// Runs device-support initialisation, adds the record to its I/O scan list
/// when it is I/O event scanned, and processes it once if `PINI` is set. A
/// record whose initialisation failed is left permanently active.
pub fn initialize<R: Record + ?Sized>(record: &Mutex<R>) -> Result<(), DevSupError> {
    let mut record = must_lock(record);
    if let Err(e) = record.init() {
        let common = record.common_mut();
        common.pact = true;
        common.record_error("init_record failed", &e);
        return Err(e);
    }
    if record.common().scan == ScanMode::IoEvent {
        let joined = match (
            record.io_scan(),
            record.common().handle(),
            record.common().scheduler(),
        ) {
            (Some(list), Some(handle), Some(scheduler)) => {
                list.add(handle, scheduler.clone());
                true
            }
            _ => false,
        };
        if !joined {
            warn!(
                "{}: I/O event scanning requested but no scan list is available",
                record.common().name
            );
        }
    }
    if record.common().pini && !record.common().pact {
        record.process();
    }
    Ok(())
}
