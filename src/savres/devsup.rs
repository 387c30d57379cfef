use std::{
    ops::Range,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use tracing::{debug, warn};

use crate::{
    devsup::{DevSupError, DeviceSupport, IoStatus},
    record::{DevicePrivate, Link, VmeIo},
    records::AaoRecord,
    savres::{SavResError, SavResWriter, decode, encode, restore_data},
    utils::{get_default_data_path, must_lock},
};

/// A driver's array of identical `FLOAT` arrays, one per record instance
#[derive(Debug, Clone)]
pub struct SavResArray {
    /// Number of instances
    pub ninst: usize,
    /// Capacity of each instance
    pub dim: usize,
    /// Elements each instance starts with in use
    pub nelm: u32,
    /// Memory the driver reads the arrays from, `ninst * dim` elements,
    /// kept in step with the records
    pub storage: Option<Arc<Mutex<Vec<f32>>>>,
}

impl SavResArray {
    pub fn new(ninst: usize, dim: usize, nelm: u32) -> Self {
        SavResArray {
            ninst,
            dim,
            nelm,
            storage: None,
        }
    }

    pub fn with_storage(mut self, storage: Arc<Mutex<Vec<f32>>>) -> Self {
        self.storage = Some(storage);
        self
    }
}

/// Per-record state of a connected array record
#[derive(Debug, Clone)]
pub struct SavResPrivate {
    /// The number of elements in use at connection
    nelm: u32,
    instance: usize,
    persist: bool,
    storage: Option<(Arc<Mutex<Vec<f32>>>, Range<usize>)>,
}

impl SavResPrivate {
    pub fn instance(&self) -> usize {
        self.instance
    }

    /// Whether the record is saved and restored, i.e. its link did not say
    /// `norest`
    pub fn persists(&self) -> bool {
        self.persist
    }

    fn mirror(&self, values: &[f32]) {
        if let Some((storage, range)) = &self.storage {
            let mut storage = must_lock(storage);
            let len = values.len().min(range.len());
            storage[range.start..range.start + len].copy_from_slice(&values[..len]);
        }
    }
}

/// Device support for `aao` records that keeps their contents on disk
///
/// Links have the form `#C<array> S<instance> @<flags>`: the array indexes
/// the descriptor table and `norest` in the flags disables saving and
/// restoring.
#[derive(Debug)]
pub struct SavResDevSup {
    arrays: Vec<SavResArray>,
    writer: SavResWriter,
}

impl SavResDevSup {
    /// Saving under `DATA_PATH`, or `/dat`
    pub fn new(arrays: Vec<SavResArray>) -> Result<Self, SavResError> {
        Self::with_dir(arrays, get_default_data_path())
    }

    pub fn with_dir(arrays: Vec<SavResArray>, dir: Option<PathBuf>) -> Result<Self, SavResError> {
        Ok(SavResDevSup {
            arrays,
            writer: SavResWriter::start(dir)?,
        })
    }

    pub fn writer(&self) -> &SavResWriter {
        &self.writer
    }

    fn connect(&self, record: &mut AaoRecord) -> Result<SavResPrivate, SavResError> {
        let Link::VmeIo(VmeIo { card, signal, parm }) = &record.out else {
            return Err(SavResError::BadLinkType);
        };
        let array = self
            .arrays
            .get(*card as usize)
            .ok_or(SavResError::BadCard {
                card: *card,
                count: self.arrays.len(),
            })?;
        if !matches!(record.common.dpvt, DevicePrivate::None) {
            return Err(SavResError::AlreadyConnected);
        }
        let instance = *signal as usize;
        if instance >= array.ninst {
            return Err(SavResError::BadInstance {
                instance: *signal,
                count: array.ninst,
            });
        }
        let storage = match &array.storage {
            Some(storage) => {
                let len = must_lock(storage).len();
                let needed = array.ninst * array.dim;
                if len < needed {
                    return Err(SavResError::StorageTooSmall { len, needed });
                }
                let start = instance * array.dim;
                Some((storage.clone(), start..start + array.dim))
            }
            None => None,
        };
        let private = SavResPrivate {
            nelm: array.nelm,
            instance,
            persist: !parm.contains("norest"),
            storage,
        };
        record.val = vec![0.0; array.dim];
        record.nelm = array.nelm;
        record.nord = array.nelm;
        Ok(private)
    }

    fn restore(&self, record: &mut AaoRecord, nelm: u32) {
        let len = (nelm as usize).min(record.val.len());
        let mut data = vec![0u8; len * size_of::<f32>()];
        match restore_data(self.writer.dir(), &record.common.name, &mut data) {
            Ok(0) => {}
            Ok(read) => {
                debug!("{}: restored {read} bytes", record.common.name);
                for (slot, value) in record.val.iter_mut().zip(decode(&data[..read])) {
                    *slot = value;
                }
                record.common.udf = false;
                record.common.reset_alarms();
            }
            Err(e) => warn!("{}: nothing restored: {e}", record.common.name),
        }
    }
}

impl DeviceSupport<AaoRecord> for SavResDevSup {
    fn init_record(&self, record: &mut AaoRecord) -> Result<IoStatus, DevSupError> {
        let private = self.connect(record).inspect_err(|e| {
            record.common.record_error("Unable to connect array", e);
        })?;
        if private.persist {
            self.restore(record, private.nelm);
        }
        private.mirror(&record.val);
        record.common.dpvt = DevicePrivate::SavRes(private);
        Ok(IoStatus::Done)
    }

    /// Zero the elements a short client write left unused, then save
    fn process(&self, record: &mut AaoRecord) -> Result<IoStatus, DevSupError> {
        let private = record
            .common
            .dpvt
            .savres()
            .cloned()
            .ok_or(SavResError::NotConnected)?;
        let capacity = (private.nelm as usize).min(record.val.len());
        let written = (record.nelm as usize).min(capacity);
        record.val[written..capacity].fill(0.0);
        record.nord = written as u32;
        record.nelm = private.nelm;
        private.mirror(&record.val);
        if private.persist {
            self.writer
                .dump(&record.common.name, encode(&record.val[..capacity]))
                .inspect_err(|e| record.common.record_error("Unable to save array", e))?;
        }
        Ok(IoStatus::Done)
    }
}
