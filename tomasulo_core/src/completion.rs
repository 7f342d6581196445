//! Simultaneous-completion batches.
//!
//! When several stations finish executing in the same cycle they still get
//! the result bus one at a time. Stations that consume a result from such a
//! batch before the whole batch has written back are held, and released
//! together once the last member retires.

use std::fmt;

use crate::station::StationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchMember {
    pub station: StationId,
    pub retired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionBatch {
    pub end_cycle: usize,
    pub members: Vec<BatchMember>,
}

impl CompletionBatch {
    fn is_done(&self) -> bool {
        self.members.iter().all(|m| m.retired)
    }
}

#[derive(Default)]
pub struct CompletionBatches {
    batches: Vec<CompletionBatch>,
}

impl CompletionBatches {
    pub fn new() -> Self {
        Self::default()
    }
    /// records that `stations` all ended execution at `end_cycle`.
    /// joins the open batch of that cycle if there is one.
    pub fn register(&mut self, end_cycle: usize, stations: &[StationId]) {
        let index = match self.batches.iter().position(|b| b.end_cycle == end_cycle) {
            Some(i) => i,
            None => {
                self.batches.push(CompletionBatch {
                    end_cycle,
                    members: Vec::new(),
                });
                self.batches.len() - 1
            }
        };
        let batch = &mut self.batches[index];
        for &station in stations {
            if !batch.members.iter().any(|m| m.station == station) {
                batch.members.push(BatchMember {
                    station,
                    retired: false,
                });
            }
        }
    }
    /// whether `station`, which ended at `end_cycle`, belongs to a batch
    /// that has not fully written back.
    pub fn is_pending_member(&self, station: StationId, end_cycle: usize) -> bool {
        self.batches
            .iter()
            .filter(|b| b.end_cycle == end_cycle)
            .any(|b| b.members.iter().any(|m| m.station == station && !m.retired))
    }
    /// marks the member as written back. returns `true` when this retired
    /// the last member; the batch is dropped then.
    pub fn retire(&mut self, station: StationId, end_cycle: usize) -> bool {
        let Some(index) = self
            .batches
            .iter()
            .position(|b| b.end_cycle == end_cycle)
        else {
            return false;
        };
        let batch = &mut self.batches[index];
        let Some(member) = batch
            .members
            .iter_mut()
            .find(|m| m.station == station && !m.retired)
        else {
            return false;
        };
        member.retired = true;
        if batch.is_done() {
            self.batches.remove(index);
            true
        } else {
            false
        }
    }
    pub fn iter(&self) -> impl Iterator<Item = &CompletionBatch> {
        self.batches.iter()
    }
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
    pub fn reset(&mut self) {
        self.batches.clear();
    }
}

impl fmt::Display for CompletionBatches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.batches.is_empty() {
            return write!(f, "no open completion batch");
        }
        for b in &self.batches {
            let members: Vec<_> = b
                .members
                .iter()
                .map(|m| format!("#{}{}", m.station.inner(), if m.retired { "*" } else { "" }))
                .collect();
            writeln!(f, "batch ending #{}: [{}]", b.end_cycle, members.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_lifecycle() {
        let (a, b) = (StationId::new(0), StationId::new(5));
        let mut batches = CompletionBatches::new();
        batches.register(7, &[a, b]);
        assert!(batches.is_pending_member(a, 7));
        assert!(!batches.is_pending_member(a, 8));
        assert!(!batches.retire(a, 7));
        assert!(!batches.is_pending_member(a, 7));
        assert!(batches.is_pending_member(b, 7));
        // registering again with the remaining member does not reopen `a`
        batches.register(7, &[b]);
        assert!(batches.retire(b, 7));
        assert!(batches.is_empty());
    }

    #[test]
    fn test_retire_outside_batch() {
        let mut batches = CompletionBatches::new();
        assert!(!batches.retire(StationId::new(1), 3));
    }
}
