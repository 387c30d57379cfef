use crate::{
    devsup::DevSupError,
    record::{Link, Record, RecordCommon},
    records::{Dset, init_output, process_input, process_output},
};

/// Binary input. Any non-zero raw value is state 1.
pub struct BiRecord {
    pub common: RecordCommon,
    pub inp: Link,
    pub val: u16,
    pub rval: u32,
    pub mask: u32,
    dset: Dset<BiRecord>,
}

impl BiRecord {
    pub fn new(name: &str, inp: &str, dset: Dset<BiRecord>) -> Self {
        BiRecord {
            common: RecordCommon::new(name),
            inp: Link::from(inp),
            val: 0,
            rval: 0,
            mask: 0,
            dset,
        }
    }

    fn convert(&mut self) {
        self.val = (self.rval != 0) as u16;
        self.common.udf = false;
    }
}

impl Record for BiRecord {
    record_common!("bi");
    record_fields! {
        "VAL" => val: Enum,
        "RVAL" => rval: ULong,
        "MASK" => mask: ULong,
    }

    fn init(&mut self) -> Result<(), DevSupError> {
        let dset = self.dset.clone();
        dset.init_record(self)?;
        Ok(())
    }

    fn process(&mut self) {
        let dset = self.dset.clone();
        process_input(self, dset, Self::convert);
    }
}

/// Binary output. State 1 is written as `MASK`, or 1 when there is no mask.
pub struct BoRecord {
    pub common: RecordCommon,
    pub out: Link,
    pub val: u16,
    pub rval: u32,
    pub mask: u32,
    dset: Dset<BoRecord>,
}

impl BoRecord {
    pub fn new(name: &str, out: &str, dset: Dset<BoRecord>) -> Self {
        BoRecord {
            common: RecordCommon::new(name),
            out: Link::from(out),
            val: 0,
            rval: 0,
            mask: 0,
            dset,
        }
    }

    fn to_raw(&mut self) {
        self.rval = match (self.val, self.mask) {
            (0, _) => 0,
            (_, 0) => 1,
            (_, mask) => mask,
        };
    }

    fn from_raw(&mut self) {
        self.val = (self.rval != 0) as u16;
    }
}

impl Record for BoRecord {
    record_common!("bo");
    record_fields! {
        "VAL" => val: Enum,
        "RVAL" => rval: ULong,
        "MASK" => mask: ULong,
    }

    fn init(&mut self) -> Result<(), DevSupError> {
        let dset = self.dset.clone();
        init_output(self, dset, Self::from_raw)
    }

    fn process(&mut self) {
        let dset = self.dset.clone();
        process_output(self, dset, Self::to_raw);
    }
}
