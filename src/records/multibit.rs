use crate::{
    devsup::DevSupError,
    record::{Link, Record, RecordCommon},
    records::{Dset, init_output, mask_for_bits, process_input, process_output},
};

/// The state a multi-bit raw value selects
fn state_of(rval: u32, mask: u32, shft: u16) -> u16 {
    ((rval & mask).checked_shr(shft as u32).unwrap_or(0)) as u16
}

/// Multi-bit binary input
///
/// `MASK` is set to `NOBT` bits at initialisation; device support may then
/// shift it into place. State strings are not modelled, so `VAL` is the
/// masked, shifted raw value.
pub struct MbbiRecord {
    pub common: RecordCommon,
    pub inp: Link,
    pub val: u16,
    pub rval: u32,
    pub mask: u32,
    pub nobt: u16,
    pub shft: u16,
    dset: Dset<MbbiRecord>,
}

impl MbbiRecord {
    pub fn new(name: &str, inp: &str, dset: Dset<MbbiRecord>) -> Self {
        MbbiRecord {
            common: RecordCommon::new(name),
            inp: Link::from(inp),
            val: 0,
            rval: 0,
            mask: 0,
            nobt: 0,
            shft: 0,
            dset,
        }
    }

    fn convert(&mut self) {
        self.val = state_of(self.rval, self.mask, self.shft);
        self.common.udf = false;
    }
}

impl Record for MbbiRecord {
    record_common!("mbbi");
    record_fields! {
        "VAL" => val: Enum,
        "RVAL" => rval: ULong,
        "MASK" => mask: ULong,
        "NOBT" => nobt: UShort,
        "SHFT" => shft: UShort,
    }

    fn init(&mut self) -> Result<(), DevSupError> {
        self.mask = mask_for_bits(self.nobt);
        let dset = self.dset.clone();
        dset.init_record(self)?;
        Ok(())
    }

    fn process(&mut self) {
        let dset = self.dset.clone();
        process_input(self, dset, Self::convert);
    }
}

/// Multi-bit binary output. `RVAL = VAL << SHFT`; `RBV` holds the last value
/// read back from the device.
pub struct MbboRecord {
    pub common: RecordCommon,
    pub out: Link,
    pub val: u16,
    pub rval: u32,
    pub rbv: u32,
    pub mask: u32,
    pub nobt: u16,
    pub shft: u16,
    dset: Dset<MbboRecord>,
}

impl MbboRecord {
    pub fn new(name: &str, out: &str, dset: Dset<MbboRecord>) -> Self {
        MbboRecord {
            common: RecordCommon::new(name),
            out: Link::from(out),
            val: 0,
            rval: 0,
            rbv: 0,
            mask: 0,
            nobt: 0,
            shft: 0,
            dset,
        }
    }

    fn to_raw(&mut self) {
        self.rval = (self.val as u32).checked_shl(self.shft as u32).unwrap_or(0);
    }

    fn from_raw(&mut self) {
        self.val = state_of(self.rval, self.mask, self.shft);
    }
}

impl Record for MbboRecord {
    record_common!("mbbo");
    record_fields! {
        "VAL" => val: Enum,
        "RVAL" => rval: ULong,
        "RBV" => rbv: ULong,
        "MASK" => mask: ULong,
        "NOBT" => nobt: UShort,
        "SHFT" => shft: UShort,
    }

    fn init(&mut self) -> Result<(), DevSupError> {
        self.mask = mask_for_bits(self.nobt);
        let dset = self.dset.clone();
        init_output(self, dset, Self::from_raw)
    }

    fn process(&mut self) {
        let dset = self.dset.clone();
        process_output(self, dset, Self::to_raw);
    }
}
