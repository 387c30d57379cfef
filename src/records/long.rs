use crate::{
    devsup::DevSupError,
    record::{Link, Record, RecordCommon},
    records::{Dset, init_output, process_input, process_output},
};

pub struct LonginRecord {
    pub common: RecordCommon,
    pub inp: Link,
    pub val: i32,
    dset: Dset<LonginRecord>,
}

impl LonginRecord {
    pub fn new(name: &str, inp: &str, dset: Dset<LonginRecord>) -> Self {
        LonginRecord {
            common: RecordCommon::new(name),
            inp: Link::from(inp),
            val: 0,
            dset,
        }
    }
}

impl Record for LonginRecord {
    record_common!("longin");
    record_fields! {
        "VAL" => val: Long,
    }

    fn init(&mut self) -> Result<(), DevSupError> {
        let dset = self.dset.clone();
        dset.init_record(self)?;
        Ok(())
    }

    fn process(&mut self) {
        let dset = self.dset.clone();
        process_input(self, dset, |record| record.common.udf = false);
    }
}

pub struct LongoutRecord {
    pub common: RecordCommon,
    pub out: Link,
    pub val: i32,
    dset: Dset<LongoutRecord>,
}

impl LongoutRecord {
    pub fn new(name: &str, out: &str, dset: Dset<LongoutRecord>) -> Self {
        LongoutRecord {
            common: RecordCommon::new(name),
            out: Link::from(out),
            val: 0,
            dset,
        }
    }
}

impl Record for LongoutRecord {
    record_common!("longout");
    record_fields! {
        "VAL" => val: Long,
    }

    fn init(&mut self) -> Result<(), DevSupError> {
        let dset = self.dset.clone();
        init_output(self, dset, |_| {})
    }

    fn process(&mut self) {
        let dset = self.dset.clone();
        process_output(self, dset, |_| {});
    }
}
