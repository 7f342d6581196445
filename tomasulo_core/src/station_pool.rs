use std::{collections::HashMap, fmt};

use serde::Deserialize;

use crate::{
    instr::{Category, Opcode},
    station::{Operand, ReservationStation, StationId, UnitKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StationCounts {
    pub fp_add: usize,
    pub fp_mul: usize,
    pub int: usize,
    pub load: usize,
    pub store: usize,
}

impl Default for StationCounts {
    fn default() -> Self {
        Self {
            fp_add: 3,
            fp_mul: 2,
            int: 2,
            load: 2,
            store: 2,
        }
    }
}

impl StationCounts {
    pub fn get(&self, unit: UnitKind) -> usize {
        match unit {
            UnitKind::FpAdd => self.fp_add,
            UnitKind::FpMul => self.fp_mul,
            UnitKind::Int => self.int,
            UnitKind::Load => self.load,
            UnitKind::Store => self.store,
        }
    }
}

pub struct StationPool {
    stations: Vec<ReservationStation>,
    counts: StationCounts,
    latencies: HashMap<Opcode, usize>,
}

impl StationPool {
    pub fn new(counts: StationCounts) -> Self {
        let mut pool = Self {
            stations: Vec::new(),
            counts,
            latencies: Opcode::ALL
                .iter()
                .map(|op| (*op, op.default_latency()))
                .collect(),
        };
        pool.rebuild();
        pool
    }
    fn rebuild(&mut self) {
        self.stations.clear();
        for unit in UnitKind::ALL {
            for nth in 1..=self.counts.get(unit) {
                let id = StationId::new(self.stations.len());
                self.stations.push(ReservationStation::new(id, unit, nth));
            }
        }
    }
    pub fn configure(&mut self, counts: StationCounts) {
        self.counts = counts;
        self.rebuild();
    }
    pub fn counts(&self) -> StationCounts {
        self.counts
    }
    pub fn latency(&self, op: Opcode) -> usize {
        self.latencies
            .get(&op)
            .copied()
            .unwrap_or_else(|| op.default_latency())
    }
    pub fn set_latency(&mut self, op: Opcode, cycles: usize) {
        self.latencies.insert(op, cycles);
    }
    pub fn reset_latencies(&mut self) {
        for op in Opcode::ALL {
            self.latencies.insert(op, op.default_latency());
        }
    }
    pub fn find_available(&self, category: Category) -> Option<StationId> {
        let unit = UnitKind::from(category);
        self.stations
            .iter()
            .find(|s| s.unit() == unit && !s.is_busy())
            .map(|s| s.id())
    }
    pub fn get(&self, id: StationId) -> &ReservationStation {
        &self.stations[id.inner()]
    }
    pub fn get_mut(&mut self, id: StationId) -> &mut ReservationStation {
        &mut self.stations[id.inner()]
    }
    pub fn iter(&self) -> impl Iterator<Item = &ReservationStation> {
        self.stations.iter()
    }
    pub fn ids(&self) -> impl Iterator<Item = StationId> {
        (0..self.stations.len()).map(StationId::new)
    }
    pub fn names(&self) -> Vec<&str> {
        self.stations.iter().map(|s| s.name()).collect()
    }
    pub fn name(&self, id: StationId) -> &str {
        self.stations.get(id.inner()).map(|s| s.name()).unwrap_or("?")
    }
    pub fn all_idle(&self) -> bool {
        self.stations.iter().all(|s| !s.is_busy())
    }
    pub fn dependents(&self, producer: StationId) -> Vec<StationId> {
        self.stations
            .iter()
            .filter(|s| s.is_busy() && (s.j.waits_on(producer) || s.k.waits_on(producer)))
            .map(|s| s.id())
            .collect()
    }
    /// hands the result of `producer` to every slot waiting on it.
    /// base-register slots of loads and stores become effective addresses.
    pub fn broadcast(&mut self, producer: StationId, value: f64) {
        for s in &mut self.stations {
            if !s.is_busy() {
                continue;
            }
            let unit = s.unit();
            let address = value.trunc() + s.imm() as f64;
            if s.j.waits_on(producer) {
                s.j = Operand::Ready(if unit == UnitKind::Load {
                    address
                } else {
                    value
                });
            }
            if s.k.waits_on(producer) {
                s.k = Operand::Ready(if unit == UnitKind::Store {
                    address
                } else {
                    value
                });
            }
        }
    }
    pub fn tick(&mut self) {
        for s in &mut self.stations {
            if s.is_busy() && s.remaining > 0 {
                s.remaining -= 1;
            }
        }
    }
    pub fn reset(&mut self) {
        for s in &mut self.stations {
            s.clear();
        }
    }
    pub fn get_view(&self) -> StationPoolView<'_> {
        StationPoolView { pool: self }
    }
}

impl Default for StationPool {
    fn default() -> Self {
        Self::new(StationCounts::default())
    }
}

pub struct StationPoolView<'a> {
    pool: &'a StationPool,
}

impl StationPoolView<'_> {
    fn operand(&self, o: Operand) -> (String, String) {
        match o {
            Operand::Ready(v) => (v.to_string(), String::new()),
            Operand::Pending(s) => (String::new(), self.pool.name(s).to_string()),
        }
    }
}

impl fmt::Display for StationPoolView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ReservationStations {{")?;
        writeln!(
            f,
            "  {:>7} {:>4} {:>6} {:>10} {:>10} {:>6} {:>6} {:>4} {:>4}",
            "name", "busy", "op", "Vj", "Vk", "Qj", "Qk", "dest", "left"
        )?;
        for s in self.pool.iter() {
            if !s.is_busy() {
                writeln!(f, "  {:>7} {:>4}", s.name(), "no")?;
                continue;
            }
            let op = s.opcode().map(|o| o.mnemonic()).unwrap_or("");
            let (vj, qj) = self.operand(s.j());
            let (vk, qk) = self.operand(s.k());
            let dest = s.dest().map(|d| d.to_string()).unwrap_or_default();
            write!(
                f,
                "  {:>7} {:>4} {op:>6} {vj:>10} {vk:>10} {qj:>6} {qk:>6} {dest:>4} {:>4}",
                s.name(),
                "yes",
                s.remaining()
            )?;
            if let Some(end) = s.held_by() {
                write!(f, "  held by batch ending #{end}")?;
            }
            writeln!(f)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::Issued;

    fn occupy(pool: &mut StationPool, cat: Category, op: Opcode, j: Operand, k: Operand, imm: i64) -> StationId {
        let id = pool.find_available(cat).unwrap();
        pool.get_mut(id).occupy(Issued {
            opcode: op,
            j,
            k,
            dest: None,
            imm,
            trace_index: 0,
            issue_cycle: 1,
        });
        id
    }

    #[test]
    fn test_layout() {
        let pool = StationPool::default();
        assert_eq!(
            pool.names(),
            vec!["Add1", "Add2", "Add3", "Mult1", "Mult2", "Int1", "Int2", "Load1", "Load2", "Store1", "Store2"]
        );
        assert_eq!(pool.latency(Opcode::DivD), 40);
    }

    #[test]
    fn test_branch_uses_int_pool() {
        let mut pool = StationPool::default();
        occupy(&mut pool, Category::IntAlu, Opcode::Addi, Operand::Ready(0.0), Operand::Ready(0.0), 0);
        let id = pool.find_available(Category::Branch).unwrap();
        assert_eq!(pool.get(id).name(), "Int2");
        occupy(&mut pool, Category::Branch, Opcode::Beq, Operand::Ready(0.0), Operand::Ready(0.0), 0);
        assert_eq!(pool.find_available(Category::IntAlu), None);
    }

    #[test]
    fn test_broadcast() {
        let mut pool = StationPool::default();
        let producer = StationId::new(0);
        let add = occupy(&mut pool, Category::FpAddSub, Opcode::AddD, Operand::Ready(1.0), Operand::Pending(producer), 0);
        let load = occupy(&mut pool, Category::Load, Opcode::LoadD, Operand::Pending(producer), Operand::Ready(0.0), 8);
        let store = occupy(
            &mut pool,
            Category::Store,
            Opcode::StoreD,
            Operand::Pending(producer),
            Operand::Pending(producer),
            -4,
        );
        pool.broadcast(producer, 12.7);
        assert_eq!(pool.get(add).k(), Operand::Ready(12.7));
        assert_eq!(pool.get(load).j(), Operand::Ready(20.0));
        assert_eq!(pool.get(store).j(), Operand::Ready(12.7));
        assert_eq!(pool.get(store).k(), Operand::Ready(8.0));
        assert!(pool.dependents(producer).is_empty());
    }

    #[test]
    fn test_configure() {
        let mut pool = StationPool::default();
        pool.configure(StationCounts {
            fp_add: 1,
            fp_mul: 1,
            int: 1,
            load: 1,
            store: 1,
        });
        assert_eq!(pool.names(), vec!["Add1", "Mult1", "Int1", "Load1", "Store1"]);
        pool.set_latency(Opcode::MulD, 3);
        assert_eq!(pool.latency(Opcode::MulD), 3);
        pool.reset_latencies();
        assert_eq!(pool.latency(Opcode::MulD), 10);
    }
}
