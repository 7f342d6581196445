use std::fmt::Display;

use crate::{
    register::{RegId, RegKind, FLOAT_NAME_TABLE, INT_NAME_TABLE, NUM_REGS},
    station::StationId,
};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Register {
    pub value: f64,
    pub tag: Option<StationId>,
}

pub struct RegFile {
    inner: [Register; NUM_REGS],
    inner_f: [Register; NUM_REGS],
}

impl RegFile {
    pub fn new() -> Self {
        Self {
            inner: [Register::default(); NUM_REGS],
            inner_f: [Register::default(); NUM_REGS],
        }
    }
    fn slot(&self, id: RegId) -> &Register {
        match id.kind() {
            RegKind::Int => &self.inner[id.inner()],
            RegKind::Float => &self.inner_f[id.inner()],
        }
    }
    fn slot_mut(&mut self, id: RegId) -> &mut Register {
        match id.kind() {
            RegKind::Int => &mut self.inner[id.inner()],
            RegKind::Float => &mut self.inner_f[id.inner()],
        }
    }
    pub fn get(&self, id: RegId) -> f64 {
        if id.is_zero() {
            0.0
        } else {
            self.slot(id).value
        }
    }
    pub fn get_by_name(&self, name: &str) -> f64 {
        RegId::try_from(name).map(|id| self.get(id)).unwrap_or(0.0)
    }
    pub fn set(&mut self, id: RegId, val: f64) {
        if !id.is_zero() {
            self.slot_mut(id).value = val;
        }
    }
    pub fn tag(&self, id: RegId) -> Option<StationId> {
        self.slot(id).tag
    }
    pub fn set_tag(&mut self, id: RegId, producer: StationId) {
        self.slot_mut(id).tag = Some(producer);
    }
    /// clears the tag only while `producer` still owns the register.
    pub fn clear_tag_if(&mut self, id: RegId, producer: StationId) -> bool {
        let slot = self.slot_mut(id);
        if slot.tag == Some(producer) {
            slot.tag = None;
            true
        } else {
            false
        }
    }
    pub fn reset(&mut self) {
        *self = Self::new();
    }
    pub fn iter_int(&self) -> impl Iterator<Item = (RegId, &Register)> {
        self.inner
            .iter()
            .enumerate()
            .map(|(i, r)| (RegId::int(i as u8), r))
    }
    pub fn iter_float(&self) -> impl Iterator<Item = (RegId, &Register)> {
        self.inner_f
            .iter()
            .enumerate()
            .map(|(i, r)| (RegId::float(i as u8), r))
    }
}

impl RegFile {
    pub fn get_view<'a>(
        &'a self,
        k: ShowRegFileKind,
        chunk_size: usize,
        names: Vec<&'a str>,
    ) -> RegFileView<'a> {
        RegFileView {
            r: self,
            k,
            chunk_size: chunk_size.max(1),
            names,
        }
    }
}

pub struct RegFileView<'a> {
    r: &'a RegFile,
    k: ShowRegFileKind,
    chunk_size: usize,
    names: Vec<&'a str>,
}

impl<'a> RegFileView<'a> {
    fn cells(&self, table: &[&str; NUM_REGS], regs: &[Register; NUM_REGS]) -> Vec<String> {
        table
            .iter()
            .zip(regs)
            .map(|(n, r)| {
                let tag = r
                    .tag
                    .and_then(|t| self.names.get(t.inner()).copied())
                    .unwrap_or("");
                format!("{n:>4}: {:>12} {tag:<6}", r.value)
            })
            .collect()
    }
}

impl<'a> Display for RegFileView<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn fmt_inner(
            map: Vec<String>,
            chunk_size: usize,
            f: &mut std::fmt::Formatter,
        ) -> std::fmt::Result {
            for chunk in map.chunks(chunk_size) {
                let s = chunk.join(", ");
                writeln!(f, "  {s},")?;
            }
            Ok(())
        }
        match &self.k {
            ShowRegFileKind::RegFileAll => {
                writeln!(f, "RegFile (All) {{")?;
                fmt_inner(
                    self.cells(&INT_NAME_TABLE, &self.r.inner),
                    self.chunk_size,
                    f,
                )?;
                fmt_inner(
                    self.cells(&FLOAT_NAME_TABLE, &self.r.inner_f),
                    self.chunk_size,
                    f,
                )?;
                write!(f, "}}")
            }
            ShowRegFileKind::RegFileI => {
                writeln!(f, "RegFile (Integer) {{")?;
                fmt_inner(
                    self.cells(&INT_NAME_TABLE, &self.r.inner),
                    self.chunk_size,
                    f,
                )?;
                write!(f, "}}")
            }
            ShowRegFileKind::RegFileF => {
                writeln!(f, "RegFile (Float) {{")?;
                fmt_inner(
                    self.cells(&FLOAT_NAME_TABLE, &self.r.inner_f),
                    self.chunk_size,
                    f,
                )?;
                write!(f, "}}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowRegFileKind {
    RegFileAll,
    RegFileI,
    RegFileF,
}

impl Default for RegFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> RegId {
        RegId::try_from(s).unwrap()
    }

    #[test]
    fn test_zero_register() {
        let mut rf = RegFile::new();
        rf.set(r("R0"), 5.0);
        assert_eq!(rf.get(r("R0")), 0.0);
        rf.set(r("F0"), 5.0);
        assert_eq!(rf.get(r("F0")), 5.0);
    }

    #[test]
    fn test_tag_ownership() {
        let mut rf = RegFile::new();
        let (old, new) = (StationId::new(0), StationId::new(1));
        rf.set_tag(r("F2"), old);
        rf.set_tag(r("F2"), new);
        assert!(!rf.clear_tag_if(r("F2"), old));
        assert_eq!(rf.tag(r("F2")), Some(new));
        assert!(rf.clear_tag_if(r("F2"), new));
        assert_eq!(rf.tag(r("F2")), None);
    }

    #[test]
    fn test_get_by_name() {
        let mut rf = RegFile::new();
        rf.set(r("R3"), 7.0);
        assert_eq!(rf.get_by_name("r3"), 7.0);
        assert_eq!(rf.get_by_name("nonsense"), 0.0);
    }
}
