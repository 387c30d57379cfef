use crate::{
    devsup::DevSupError,
    record::{Link, Record, RecordCommon},
    records::{Dset, process_output},
};

/// Array analog output of `FLOAT` elements
///
/// Device support sizes `val` at initialisation. `NELM` is the number of
/// elements in use; a client writing a shorter array reduces it until the
/// record next processes. `NORD` is the number of elements last written.
pub struct AaoRecord {
    pub common: RecordCommon,
    pub out: Link,
    pub val: Vec<f32>,
    pub nelm: u32,
    pub nord: u32,
    dset: Dset<AaoRecord>,
}

impl AaoRecord {
    pub fn new(name: &str, out: &str, dset: Dset<AaoRecord>) -> Self {
        AaoRecord {
            common: RecordCommon::new(name),
            out: Link::from(out),
            val: Vec::new(),
            nelm: 0,
            nord: 0,
            dset,
        }
    }

    /// Store a client write, truncated to the array's capacity
    pub fn put_array(&mut self, values: &[f32]) {
        let count = values.len().min(self.val.len());
        self.val[..count].copy_from_slice(&values[..count]);
        self.nelm = count as u32;
    }
}

impl Record for AaoRecord {
    record_common!("aao");
    record_fields! {
        "NELM" => nelm: ULong,
        "NORD" => nord: ULong,
    }

    fn init(&mut self) -> Result<(), DevSupError> {
        let dset = self.dset.clone();
        dset.init_record(self)?;
        Ok(())
    }

    fn process(&mut self) {
        let dset = self.dset.clone();
        process_output(self, dset, |_| {});
    }
}
