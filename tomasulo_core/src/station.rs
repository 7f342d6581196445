use crate::{
    instr::{Category, Opcode},
    register::RegId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StationId(usize);

impl StationId {
    pub(crate) fn new(i: usize) -> Self {
        Self(i)
    }
    pub fn inner(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Ready(f64),
    Pending(StationId),
}

impl Default for Operand {
    fn default() -> Self {
        Self::Ready(0.0)
    }
}

impl Operand {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Ready(v) => Some(*v),
            Self::Pending(_) => None,
        }
    }
    pub fn producer(&self) -> Option<StationId> {
        match self {
            Self::Ready(_) => None,
            Self::Pending(s) => Some(*s),
        }
    }
    pub fn waits_on(&self, id: StationId) -> bool {
        self.producer() == Some(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    FpAdd,
    FpMul,
    Int,
    Load,
    Store,
}

impl UnitKind {
    pub const ALL: [UnitKind; 5] = [
        Self::FpAdd,
        Self::FpMul,
        Self::Int,
        Self::Load,
        Self::Store,
    ];
    pub fn prefix(&self) -> &'static str {
        match self {
            UnitKind::FpAdd => "Add",
            UnitKind::FpMul => "Mult",
            UnitKind::Int => "Int",
            UnitKind::Load => "Load",
            UnitKind::Store => "Store",
        }
    }
}

impl From<Category> for UnitKind {
    fn from(c: Category) -> Self {
        match c {
            Category::FpAddSub => Self::FpAdd,
            Category::FpMulDiv => Self::FpMul,
            Category::IntAlu | Category::Branch => Self::Int,
            Category::Load => Self::Load,
            Category::Store => Self::Store,
        }
    }
}

pub struct Issued {
    pub opcode: Opcode,
    pub j: Operand,
    pub k: Operand,
    pub dest: Option<RegId>,
    pub imm: i64,
    pub trace_index: usize,
    pub issue_cycle: usize,
}

pub struct ReservationStation {
    id: StationId,
    name: String,
    unit: UnitKind,
    busy: bool,
    opcode: Option<Opcode>,
    pub(crate) j: Operand,
    pub(crate) k: Operand,
    dest: Option<RegId>,
    imm: i64,
    trace_index: Option<usize>,
    pub(crate) remaining: usize,
    issue_cycle: Option<usize>,
    started_at: Option<usize>,
    pub(crate) ended_at: Option<usize>,
    /// end cycle of the completion batch this station waits on.
    pub(crate) held_by: Option<usize>,
}

impl ReservationStation {
    pub fn new(id: StationId, unit: UnitKind, nth: usize) -> Self {
        Self {
            id,
            name: format!("{}{}", unit.prefix(), nth),
            unit,
            busy: false,
            opcode: None,
            j: Operand::default(),
            k: Operand::default(),
            dest: None,
            imm: 0,
            trace_index: None,
            remaining: 0,
            issue_cycle: None,
            started_at: None,
            ended_at: None,
            held_by: None,
        }
    }
    pub fn occupy(&mut self, issued: Issued) {
        let Issued {
            opcode,
            j,
            k,
            dest,
            imm,
            trace_index,
            issue_cycle,
        } = issued;
        self.busy = true;
        self.opcode = Some(opcode);
        self.j = j;
        self.k = k;
        self.dest = dest;
        self.imm = imm;
        self.trace_index = Some(trace_index);
        self.remaining = 0;
        self.issue_cycle = Some(issue_cycle);
        self.started_at = None;
        self.ended_at = None;
        self.held_by = None;
    }
    pub fn clear(&mut self) {
        let name = std::mem::take(&mut self.name);
        *self = Self {
            name,
            ..Self::new(self.id, self.unit, 0)
        };
    }
    pub(crate) fn start(&mut self, cycle: usize, latency: usize) {
        self.started_at = Some(cycle);
        self.remaining = latency;
    }
    pub fn id(&self) -> StationId {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn unit(&self) -> UnitKind {
        self.unit
    }
    pub fn is_busy(&self) -> bool {
        self.busy
    }
    pub fn opcode(&self) -> Option<Opcode> {
        self.opcode
    }
    pub fn j(&self) -> Operand {
        self.j
    }
    pub fn k(&self) -> Operand {
        self.k
    }
    pub fn dest(&self) -> Option<RegId> {
        self.dest
    }
    pub fn imm(&self) -> i64 {
        self.imm
    }
    pub fn trace_index(&self) -> Option<usize> {
        self.trace_index
    }
    pub fn remaining(&self) -> usize {
        self.remaining
    }
    pub fn issue_cycle(&self) -> Option<usize> {
        self.issue_cycle
    }
    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }
    pub fn ended_at(&self) -> Option<usize> {
        self.ended_at
    }
    pub fn held_by(&self) -> Option<usize> {
        self.held_by
    }
    pub fn operands_ready(&self) -> bool {
        self.j.is_ready() && self.k.is_ready()
    }
    pub fn is_ready_for_write_back(&self) -> bool {
        self.busy && self.remaining == 0 && self.ended_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_occupy_and_clear() {
        let mut rs = ReservationStation::new(StationId::new(3), UnitKind::Int, 2);
        assert_eq!(rs.name(), "Int2");
        rs.occupy(Issued {
            opcode: Opcode::Addi,
            j: Operand::Pending(StationId::new(0)),
            k: Operand::Ready(4.0),
            dest: RegId::try_from("R2").ok(),
            imm: 4,
            trace_index: 0,
            issue_cycle: 1,
        });
        assert!(rs.is_busy());
        assert!(!rs.operands_ready());
        assert!(rs.j().waits_on(StationId::new(0)));
        rs.clear();
        assert!(!rs.is_busy());
        assert_eq!(rs.name(), "Int2");
        assert_eq!(rs.id(), StationId::new(3));
        assert_eq!(rs.trace_index(), None);
    }
}
