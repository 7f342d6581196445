use std::fmt;

use crate::{memory::Addr, station::StationId};

pub const DEFAULT_LSB_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOpKind {
    Load,
    Store,
}

impl fmt::Display for MemOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemOpKind::Load => write!(f, "LOAD"),
            MemOpKind::Store => write!(f, "STORE"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LsbEntry {
    pub kind: MemOpKind,
    pub station: StationId,
    pub addr: Option<i64>,
    pub size: usize,
    pub value: Option<f64>,
    pub data: Vec<u8>,
    pub completed: bool,
    pub remaining: usize,
    pub issue_cycle: usize,
}

impl LsbEntry {
    pub fn new(kind: MemOpKind, station: StationId, size: usize, issue_cycle: usize) -> Self {
        Self {
            kind,
            station,
            addr: None,
            size,
            value: None,
            data: Vec::new(),
            completed: false,
            remaining: 0,
            issue_cycle,
        }
    }
    fn overlaps(&self, addr: i64, size: usize) -> Option<bool> {
        let start = self.addr?;
        let end = start.saturating_add(self.size as i64);
        Some(addr < end && start < addr.saturating_add(size as i64))
    }
    fn blocks(&self, addr: i64, size: usize, kind: MemOpKind) -> bool {
        match self.overlaps(addr, size) {
            Some(overlap) => overlap,
            None => kind == MemOpKind::Store || self.kind == MemOpKind::Store,
        }
    }
}

pub struct LoadStoreBuffer {
    entries: Vec<LsbEntry>,
    capacity: usize,
}

impl LoadStoreBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn entries(&self) -> &[LsbEntry] {
        &self.entries
    }
    pub fn reserve(&mut self, entry: LsbEntry) {
        self.entries.push(entry);
    }
    pub fn entry(&self, station: StationId) -> Option<&LsbEntry> {
        self.entries.iter().find(|e| e.station == station)
    }
    pub fn entry_mut(&mut self, station: StationId) -> Option<&mut LsbEntry> {
        self.entries.iter_mut().find(|e| e.station == station)
    }
    pub fn remove(&mut self, station: StationId) -> Option<LsbEntry> {
        let index = self.entries.iter().position(|e| e.station == station)?;
        Some(self.entries.remove(index))
    }
    pub fn tick(&mut self) {
        for e in &mut self.entries {
            if e.remaining > 0 {
                e.remaining -= 1;
            }
        }
    }
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// may an operation not yet in the buffer be issued?
    /// checks every incomplete entry issued strictly before `issue_cycle`.
    pub fn has_address_clash_at_issue(
        &self,
        addr: i64,
        size: usize,
        kind: MemOpKind,
        issue_cycle: usize,
    ) -> bool {
        self.entries
            .iter()
            .filter(|e| e.issue_cycle < issue_cycle && !e.completed)
            .any(|e| e.blocks(addr, size, kind))
    }

    /// may the entry owned by `station` start its memory access?
    /// checks every other incomplete entry issued no later than it.
    pub fn has_address_clash(
        &self,
        addr: i64,
        size: usize,
        station: StationId,
        kind: MemOpKind,
    ) -> bool {
        let Some(own) = self.entry(station) else {
            return false;
        };
        self.entries
            .iter()
            .filter(|e| e.station != station)
            .filter(|e| e.issue_cycle <= own.issue_cycle && !e.completed)
            .any(|e| e.blocks(addr, size, kind))
    }

    pub fn get_view<'a>(&'a self, names: Vec<&'a str>) -> LsbView<'a> {
        LsbView { lsb: self, names }
    }
}

impl Default for LoadStoreBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LSB_SIZE)
    }
}

pub struct LsbView<'a> {
    lsb: &'a LoadStoreBuffer,
    names: Vec<&'a str>,
}

impl fmt::Display for LsbView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "LoadStoreBuffer ({}/{}) {{",
            self.lsb.len(),
            self.lsb.capacity()
        )?;
        for e in &self.lsb.entries {
            let name = self.names.get(e.station.inner()).copied().unwrap_or("?");
            let addr = e
                .addr
                .map(|a| Addr::new(a).to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let value = e.value.map(|v| v.to_string()).unwrap_or_default();
            writeln!(
                f,
                "  {:>5} {name:>6} addr {addr:>8} size {} value {value:>10} left {:>3} issued #{}{}",
                e.kind.to_string(),
                e.size,
                e.remaining,
                e.issue_cycle,
                if e.completed { " done" } else { "" }
            )?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: MemOpKind, station: usize, addr: Option<i64>, issue: usize) -> LsbEntry {
        let mut e = LsbEntry::new(kind, StationId::new(station), 8, issue);
        e.addr = addr;
        e
    }

    #[test]
    fn test_clash_at_issue() {
        let mut lsb = LoadStoreBuffer::default();
        lsb.reserve(entry(MemOpKind::Store, 0, Some(0), 1));
        // overlapping earlier store
        assert!(lsb.has_address_clash_at_issue(4, 4, MemOpKind::Load, 2));
        // disjoint
        assert!(!lsb.has_address_clash_at_issue(8, 8, MemOpKind::Load, 2));
        // same cycle is not earlier
        assert!(!lsb.has_address_clash_at_issue(0, 8, MemOpKind::Load, 1));
    }

    #[test]
    fn test_unknown_address_rules() {
        let mut lsb = LoadStoreBuffer::default();
        lsb.reserve(entry(MemOpKind::Load, 0, None, 1));
        // load may pass a load with unknown address, store may not
        assert!(!lsb.has_address_clash_at_issue(0, 8, MemOpKind::Load, 2));
        assert!(lsb.has_address_clash_at_issue(0, 8, MemOpKind::Store, 2));
        lsb.reset();
        lsb.reserve(entry(MemOpKind::Store, 0, None, 1));
        assert!(lsb.has_address_clash_at_issue(512, 8, MemOpKind::Load, 2));
    }

    #[test]
    fn test_clash_in_buffer() {
        let mut lsb = LoadStoreBuffer::default();
        lsb.reserve(entry(MemOpKind::Store, 0, Some(16), 1));
        lsb.reserve(entry(MemOpKind::Load, 1, Some(16), 2));
        let load = StationId::new(1);
        let store = StationId::new(0);
        assert!(lsb.has_address_clash(16, 8, load, MemOpKind::Load));
        // the older store never waits on the younger load
        assert!(!lsb.has_address_clash(16, 8, store, MemOpKind::Store));
        lsb.entry_mut(store).unwrap().completed = true;
        assert!(!lsb.has_address_clash(16, 8, load, MemOpKind::Load));
        assert!(lsb.remove(store).is_some());
        assert_eq!(lsb.len(), 1);
    }

    #[test]
    fn test_overlap_at_top_of_address_space() {
        let mut lsb = LoadStoreBuffer::default();
        lsb.reserve(entry(MemOpKind::Store, 0, Some(i64::MAX - 4), 1));
        assert!(lsb.has_address_clash_at_issue(i64::MAX - 2, 8, MemOpKind::Load, 2));
        assert!(!lsb.has_address_clash_at_issue(i64::MAX - 16, 8, MemOpKind::Load, 2));
    }

    #[test]
    fn test_tick() {
        let mut lsb = LoadStoreBuffer::default();
        let mut e = entry(MemOpKind::Load, 0, Some(0), 1);
        e.remaining = 1;
        lsb.reserve(e);
        lsb.tick();
        lsb.tick();
        assert_eq!(lsb.entries()[0].remaining, 0);
    }
}
