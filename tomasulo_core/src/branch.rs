use std::fmt;

use crate::instr::Instr;

/// tracks the branch currently in flight. its prediction of the outcome is
/// taken from the operand values seen at issue and is only shown to the
/// user; the decision made at write-back reads the register file again.
#[derive(Default)]
pub struct BranchUnit {
    current: Option<InFlightBranch>,
}

#[derive(Debug, Clone)]
pub struct InFlightBranch {
    pub instr: Instr,
    pub taken_at_issue: bool,
    pub target: i64,
}

impl BranchUnit {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn start(&mut self, instr: &Instr, lhs: f64, rhs: f64) {
        let taken_at_issue = instr.opcode.is_taken(lhs, rhs);
        let target = if taken_at_issue {
            branch_target(instr).unwrap_or(instr.addr + 4)
        } else {
            instr.addr + 4
        };
        self.current = Some(InFlightBranch {
            instr: instr.clone(),
            taken_at_issue,
            target,
        });
    }
    pub fn resolve(&mut self) -> Option<InFlightBranch> {
        self.current.take()
    }
    pub fn current(&self) -> Option<&InFlightBranch> {
        self.current.as_ref()
    }
    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }
    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// byte address a taken branch jumps to, `None` if it does not fit an `i64`.
pub fn branch_target(instr: &Instr) -> Option<i64> {
    instr.imm.checked_mul(4)?.checked_add(instr.addr + 4)
}

impl fmt::Display for BranchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.current {
            Some(b) => write!(
                f,
                "branch {} in flight, {} at issue (target {:#06x})",
                b.instr,
                if b.taken_at_issue { "taken" } else { "not taken" },
                b.target
            ),
            None => write!(f, "no branch in flight"),
        }
    }
}
