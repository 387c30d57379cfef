use crate::{
    devsup::DevSupError,
    record::{Link, Record, RecordCommon},
    records::{Dset, init_output, process_input, process_output},
};

/// Analog input. `VAL = RVAL * ESLO + EOFF`.
pub struct AiRecord {
    pub common: RecordCommon,
    pub inp: Link,
    pub val: f64,
    pub rval: i32,
    pub eslo: f64,
    pub eoff: f64,
    dset: Dset<AiRecord>,
}

impl AiRecord {
    pub fn new(name: &str, inp: &str, dset: Dset<AiRecord>) -> Self {
        AiRecord {
            common: RecordCommon::new(name),
            inp: Link::from(inp),
            val: 0.0,
            rval: 0,
            eslo: 1.0,
            eoff: 0.0,
            dset,
        }
    }

    fn convert(&mut self) {
        self.val = self.rval as f64 * self.eslo + self.eoff;
        self.common.udf = self.val.is_nan();
    }
}

impl Record for AiRecord {
    record_common!("ai");
    record_fields! {
        "VAL" => val: Double,
        "RVAL" => rval: Long,
        "ESLO" => eslo: Double,
        "EOFF" => eoff: Double,
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

/// Analog output. `RVAL = (VAL - EOFF) / ESLO`, saturating.
pub struct AoRecord {
    pub common: RecordCommon,
    pub out: Link,
    pub val: f64,
    pub rval: i32,
    pub eslo: f64,
    pub eoff: f64,
    dset: Dset<AoRecord>,
}

impl AoRecord {
    pub fn new(name: &str, out: &str, dset: Dset<AoRecord>) -> Self {
        AoRecord {
            common: RecordCommon::new(name),
            out: Link::from(out),
            val: 0.0,
            rval: 0,
            eslo: 1.0,
            eoff: 0.0,
            dset,
        }
    }

    fn to_raw(&mut self) {
        self.rval = ((self.val - self.eoff) / self.eslo) as i32;
    }

    fn from_raw(&mut self) {
        self.val = self.rval as f64 * self.eslo + self.eoff;
    }
}

impl Record for AoRecord {
    record_common!("ao");
    record_fields! {
        "VAL" => val: Double,
        "RVAL" => rval: Long,
        "ESLO" => eslo: Double,
        "EOFF" => eoff: Double,
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
