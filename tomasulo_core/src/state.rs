use std::fmt;

use bitmask_enum::bitmask;

use crate::instr::Instr;

#[bitmask(u8)]
pub enum Stall {
    // no free station or buffer slot
    Structural,
    // memory operation blocked by an earlier one
    MemoryHazard,
    // branch operands still being produced
    BranchOperands,
    // issue frozen behind an unresolved branch
    BranchPending,
    // dependent held until a completion batch drains
    BatchHold,
}

impl fmt::Display for Stall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Stall::Structural, "structural"),
            (Stall::MemoryHazard, "memory hazard"),
            (Stall::BranchOperands, "branch operands"),
            (Stall::BranchPending, "branch pending"),
            (Stall::BatchHold, "batch hold"),
        ];
        let v: Vec<_> = names
            .into_iter()
            .filter(|(s, _)| self.contains(*s))
            .map(|(_, n)| n)
            .collect();
        if v.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", v.join(", "))
        }
    }
}

pub struct ExecutionState {
    cycle: usize,
    ip: usize,
    trace: Vec<Instr>,
    log: Vec<String>,
    complete: bool,
    status: String,
    stalls: Stall,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            cycle: 0,
            ip: 0,
            trace: Vec::new(),
            log: Vec::new(),
            complete: false,
            status: "Ready".to_string(),
            stalls: Stall::none(),
        }
    }
    pub fn reset(&mut self) {
        *self = Self::new();
    }
    pub(crate) fn next_cycle(&mut self) {
        self.cycle += 1;
        self.stalls = Stall::none();
        self.status = format!("Cycle {}", self.cycle);
    }
    pub fn cycle(&self) -> usize {
        self.cycle
    }
    pub fn ip(&self) -> usize {
        self.ip
    }
    pub(crate) fn set_ip(&mut self, ip: usize) {
        self.ip = ip;
    }
    pub(crate) fn advance_ip(&mut self) {
        self.ip += 1;
    }
    pub fn trace(&self) -> &[Instr] {
        &self.trace
    }
    pub(crate) fn trace_mut(&mut self, index: usize) -> &mut Instr {
        &mut self.trace[index]
    }
    pub(crate) fn push_trace(&mut self, instr: Instr) -> usize {
        self.trace.push(instr);
        self.trace.len() - 1
    }
    pub fn log(&self) -> &[String] {
        &self.log
    }
    pub(crate) fn log_event(&mut self, msg: impl fmt::Display) {
        let line = format!("Cycle {}: {msg}", self.cycle);
        log::debug!("{line}");
        self.log.push(line);
    }
    pub fn is_complete(&self) -> bool {
        self.complete
    }
    pub(crate) fn set_complete(&mut self, complete: bool) {
        self.complete = complete;
        if complete {
            self.status = format!("Complete after {} cycles", self.cycle);
        }
    }
    pub fn status(&self) -> &str {
        &self.status
    }
    pub fn stalls(&self) -> Stall {
        self.stalls
    }
    pub(crate) fn stall(&mut self, s: Stall) {
        self.stalls |= s;
    }
    pub fn get_trace_view(&self) -> TraceView<'_> {
        TraceView { trace: &self.trace }
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TraceView<'a> {
    trace: &'a [Instr],
}

impl fmt::Display for TraceView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn cell(c: Option<usize>) -> String {
            c.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string())
        }
        writeln!(
            f,
            "{:>4}  {:<24} {:>6} {:>6} {:>6} {:>6}",
            "#", "instruction", "issue", "start", "end", "wb"
        )?;
        for (i, instr) in self.trace.iter().enumerate() {
            let t = &instr.timing;
            writeln!(
                f,
                "{i:>4}  {:<24} {:>6} {:>6} {:>6} {:>6}",
                instr.to_string(),
                cell(t.issue()),
                cell(t.exec_start()),
                cell(t.exec_end()),
                cell(t.write_back()),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format() {
        let mut st = ExecutionState::new();
        st.next_cycle();
        st.next_cycle();
        st.log_event("Issued ADDI R1, R0, 5 to Int1");
        assert_eq!(st.log(), ["Cycle 2: Issued ADDI R1, R0, 5 to Int1"]);
        assert_eq!(st.status(), "Cycle 2");
    }

    #[test]
    fn test_stalls_cleared_each_cycle() {
        let mut st = ExecutionState::new();
        st.next_cycle();
        st.stall(Stall::Structural);
        st.stall(Stall::BatchHold);
        assert_eq!(st.stalls().to_string(), "structural, batch hold");
        st.next_cycle();
        assert!(st.stalls().is_none());
    }
}
