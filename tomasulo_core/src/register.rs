use std::{collections::HashMap, fmt::Display};

use once_cell::sync::Lazy;

pub const NUM_REGS: usize = 32;

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum RegKind {
    Int,
    Float,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct RegId {
    kind: RegKind,
    index: u8,
}

impl RegId {
    pub fn int(index: u8) -> Self {
        debug_assert!((index as usize) < NUM_REGS);
        Self {
            kind: RegKind::Int,
            index,
        }
    }
    pub fn float(index: u8) -> Self {
        debug_assert!((index as usize) < NUM_REGS);
        Self {
            kind: RegKind::Float,
            index,
        }
    }
    pub fn kind(&self) -> RegKind {
        self.kind
    }
    pub fn inner(&self) -> usize {
        self.index as usize
    }
    pub fn is_zero(&self) -> bool {
        self.kind == RegKind::Int && self.index == 0
    }
}

pub static INT_NAME_TABLE: [&str; NUM_REGS] = [
    "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "R9", "R10", "R11", "R12", "R13", "R14",
    "R15", "R16", "R17", "R18", "R19", "R20", "R21", "R22", "R23", "R24", "R25", "R26", "R27",
    "R28", "R29", "R30", "R31",
];

pub static FLOAT_NAME_TABLE: [&str; NUM_REGS] = [
    "F0", "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12", "F13", "F14",
    "F15", "F16", "F17", "F18", "F19", "F20", "F21", "F22", "F23", "F24", "F25", "F26", "F27",
    "F28", "F29", "F30", "F31",
];

pub static NAME_LOOKUP: Lazy<HashMap<&str, RegId>> = Lazy::new(|| {
    let ints = INT_NAME_TABLE
        .iter()
        .enumerate()
        .map(|(i, n)| (*n, RegId::int(i as u8)));
    let floats = FLOAT_NAME_TABLE
        .iter()
        .enumerate()
        .map(|(i, n)| (*n, RegId::float(i as u8)));
    ints.chain(floats).collect()
});

impl Display for RegId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self.kind {
            RegKind::Int => INT_NAME_TABLE[self.inner()],
            RegKind::Float => FLOAT_NAME_TABLE[self.inner()],
        };
        f.write_str(s)
    }
}

impl TryFrom<&str> for RegId {
    type Error = ();
    fn try_from(rs: &str) -> Result<Self, Self::Error> {
        let rs = rs.trim().to_ascii_uppercase();
        NAME_LOOKUP.get(rs.as_str()).cloned().ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(RegId::try_from("R1"), Ok(RegId::int(1)));
        assert_eq!(RegId::try_from(" f31 "), Ok(RegId::float(31)));
        assert_eq!(RegId::try_from("X3"), Err(()));
        assert_eq!(RegId::try_from("R32"), Err(()));
        assert_eq!(format!("{}", RegId::float(4)), "F4");
        assert!(RegId::int(0).is_zero());
        assert!(!RegId::float(0).is_zero());
    }
}
