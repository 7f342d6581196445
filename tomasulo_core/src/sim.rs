use std::collections::BTreeMap;

use crate::{
    branch::{branch_target, BranchUnit},
    cache::{Cache, CacheGeometry},
    common::{ExecuteMode, SimulationOption},
    completion::CompletionBatches,
    config::{validate_counts, validate_geometry, ConfigError, SimConfig},
    instr::{Category, Instr, Opcode},
    lsb::{LoadStoreBuffer, LsbEntry, MemOpKind},
    memory::{decode_value, encode_value, Addr},
    reg_file::{RegFile, RegFileView, ShowRegFileKind},
    register::RegId,
    state::{ExecutionState, Stall},
    station::{Issued, Operand, StationId},
    station_pool::{StationCounts, StationPool},
};

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Advanced { cycle: usize },
    AlreadyComplete,
}

pub struct Simulator {
    program: Vec<Instr>,
    regs: RegFile,
    stations: StationPool,
    lsb: LoadStoreBuffer,
    cache: Cache,
    branch_unit: BranchUnit,
    state: ExecutionState,
    batches: CompletionBatches,
    branch_stall: bool,
    config: SimConfig,
    #[cfg(feature = "stat")]
    stat_builder: stat::SimStatBuilder,
}

impl Simulator {
    pub fn new() -> Self {
        let config = SimConfig::default();
        Self {
            program: Vec::new(),
            regs: RegFile::new(),
            stations: StationPool::new(config.stations),
            lsb: LoadStoreBuffer::new(config.lsb_size),
            cache: Cache::new(config.cache),
            branch_unit: BranchUnit::new(),
            state: ExecutionState::new(),
            batches: CompletionBatches::new(),
            branch_stall: false,
            config,
            #[cfg(feature = "stat")]
            stat_builder: stat::SimStatBuilder::new(),
        }
    }
    pub fn with_config(config: SimConfig) -> Result<Self, ConfigError> {
        let mut sim = Self::new();
        sim.configure(config)?;
        Ok(sim)
    }
    pub fn configure(&mut self, config: SimConfig) -> Result<(), ConfigError> {
        let resolved = config.resolve()?;
        self.stations.configure(config.stations);
        self.stations.reset_latencies();
        for (op, cycles) in resolved.latencies {
            self.stations.set_latency(op, cycles);
        }
        self.lsb.set_capacity(config.lsb_size);
        self.cache.reconfigure(config.cache);
        log::info!(
            "configured {} stations, {}-entry buffer, {} byte cache.",
            self.stations.iter().count(),
            config.lsb_size,
            config.cache.size
        );
        self.config = config;
        self.reset();
        Ok(())
    }
    pub fn config(&self) -> &SimConfig {
        &self.config
    }
    pub fn set_station_counts(&mut self, counts: StationCounts) -> Result<(), ConfigError> {
        validate_counts(&counts)?;
        self.config.stations = counts;
        self.stations.configure(counts);
        self.reset();
        Ok(())
    }
    pub fn set_latency(&mut self, op: Opcode, cycles: usize) {
        self.config.latencies.insert(op.mnemonic().to_string(), cycles);
        self.stations.set_latency(op, cycles);
    }
    pub fn set_cache_geometry(&mut self, geometry: CacheGeometry) -> Result<(), ConfigError> {
        validate_geometry(&geometry)?;
        self.config.cache = geometry;
        self.cache.reconfigure(geometry);
        self.reset();
        Ok(())
    }
    pub fn load_program(&mut self, program: Vec<Instr>) {
        log::info!("loaded program of {} instructions.", program.len());
        self.program = program;
        self.reset();
    }
    /// back to cycle 0. the cache is invalidated but memory keeps its
    /// contents; configured registers and memory cells are applied again.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.stations.reset();
        self.lsb.reset();
        self.cache.reset();
        self.branch_unit.reset();
        self.state.reset();
        self.batches.reset();
        self.branch_stall = false;
        for (name, value) in &self.config.registers {
            if let Ok(r) = RegId::try_from(name.as_str()) {
                self.regs.set(r, *value);
            }
        }
        for cell in &self.config.memory {
            self.cache.initialize_memory(cell.addr, cell.value, cell.size);
        }
        #[cfg(feature = "stat")]
        {
            self.stat_builder = stat::SimStatBuilder::new();
        }
    }
    pub fn set_register(&mut self, r: RegId, value: f64) {
        self.regs.set(r, value);
    }
    pub fn initialize_memory(&mut self, addr: i64, value: f64, size: usize) {
        self.cache.initialize_memory(addr, value, size);
    }
    pub fn reset_memory(&mut self) {
        self.cache.reset_memory();
    }

    pub fn step(&mut self) -> StepOutcome {
        if self.state.is_complete() {
            return StepOutcome::AlreadyComplete;
        }
        self.state.next_cycle();
        self.execute();
        if self.branch_stall {
            self.state.stall(Stall::BranchPending);
        } else {
            self.issue();
        }
        self.write_back();
        self.stations.tick();
        self.lsb.tick();
        self.detect_execution_end();
        self.check_completion();
        #[cfg(feature = "stat")]
        self.stat_builder.record_cycle(self.state.stalls());
        StepOutcome::Advanced {
            cycle: self.state.cycle(),
        }
    }

    /// steps until completion or until `limit` cycles have elapsed in total.
    /// returns whether the run completed.
    pub fn run(&mut self, limit: usize) -> bool {
        while !self.state.is_complete() && self.state.cycle() < limit {
            self.step();
        }
        self.state.is_complete()
    }

    fn read_operand(&self, r: Option<RegId>) -> Operand {
        match r {
            Some(r) => match self.regs.tag(r) {
                Some(producer) => Operand::Pending(producer),
                None => Operand::Ready(self.regs.get(r)),
            },
            None => Operand::Ready(0.0),
        }
    }

    fn address_operand(&self, base: Option<RegId>, imm: i64) -> Operand {
        match self.read_operand(base) {
            Operand::Ready(v) => Operand::Ready(v.trunc() + imm as f64),
            pending => pending,
        }
    }

    fn issue(&mut self) {
        let Some(instr) = self.program.get(self.state.ip()) else {
            return;
        };
        let mut instr = instr.fresh_copy();
        let cycle = self.state.cycle();
        let category = instr.category();
        let Some(id) = self.stations.find_available(category) else {
            log::trace!("no free station for {instr}");
            self.state.stall(Stall::Structural);
            return;
        };
        if category.is_memory() && self.lsb.is_full() {
            log::trace!("load/store buffer full, {instr} waits");
            self.state.stall(Stall::Structural);
            return;
        }
        let (j, k, dest) = match category {
            Category::FpAddSub | Category::FpMulDiv => (
                self.read_operand(instr.src1),
                self.read_operand(instr.src2),
                instr.dest,
            ),
            Category::IntAlu => (
                self.read_operand(instr.src1),
                Operand::Ready(instr.imm as f64),
                instr.dest,
            ),
            Category::Load => (
                self.address_operand(instr.base, instr.imm),
                Operand::Ready(0.0),
                instr.dest,
            ),
            Category::Store => (
                self.read_operand(instr.src1),
                self.address_operand(instr.base, instr.imm),
                None,
            ),
            Category::Branch => {
                let (j, k) = (self.read_operand(instr.src1), self.read_operand(instr.src2));
                if !(j.is_ready() && k.is_ready()) {
                    log::trace!("{instr} waits for its operands");
                    self.state.stall(Stall::BranchOperands);
                    return;
                }
                (j, k, None)
            }
        };
        let mem_op = match category {
            Category::Load => Some((MemOpKind::Load, j.value())),
            Category::Store => Some((MemOpKind::Store, k.value())),
            _ => None,
        };
        let size = instr.opcode.access_size();
        if let Some((kind, Some(addr))) = mem_op {
            let addr = addr as i64;
            if self.lsb.has_address_clash_at_issue(addr, size, kind, cycle) {
                log::trace!("{instr} clashes with an earlier access to {}", Addr::new(addr));
                self.state.stall(Stall::MemoryHazard);
                return;
            }
        }

        instr.timing.set_issue(cycle);
        let text = instr.to_string();
        if category == Category::Branch {
            let (lhs, rhs) = (j.value().unwrap_or(0.0), k.value().unwrap_or(0.0));
            self.branch_unit.start(&instr, lhs, rhs);
            self.branch_stall = true;
        }
        let opcode = instr.opcode;
        let imm = instr.imm;
        let trace_index = self.state.push_trace(instr);
        self.stations.get_mut(id).occupy(Issued {
            opcode,
            j,
            k,
            dest,
            imm,
            trace_index,
            issue_cycle: cycle,
        });
        if let Some(d) = dest {
            self.regs.set_tag(d, id);
        }
        if let Some((kind, addr)) = mem_op {
            let mut entry = LsbEntry::new(kind, id, size, cycle);
            entry.addr = addr.map(|a| a as i64);
            self.lsb.reserve(entry);
        }
        self.state.advance_ip();
        let name = self.stations.name(id).to_string();
        self.state.log_event(format!("Issued {text} to {name}"));
    }

    fn trace_text(&self, id: StationId) -> String {
        self.stations
            .get(id)
            .trace_index()
            .map(|i| self.state.trace()[i].to_string())
            .unwrap_or_default()
    }

    fn execute(&mut self) {
        let cycle = self.state.cycle();
        for id in self.stations.ids() {
            let s = self.stations.get(id);
            if !s.is_busy() || s.is_started() {
                continue;
            }
            let Some(op) = s.opcode() else {
                continue;
            };
            let category = op.category();
            if category.is_memory() {
                self.record_address(id, category);
            }
            let s = self.stations.get(id);
            if !s.operands_ready() {
                continue;
            }
            if let Some(end) = s.held_by() {
                log::trace!("{} held until batch #{end} drains", s.name());
                self.state.stall(Stall::BatchHold);
                continue;
            }
            let latency = self.stations.latency(op);
            let started = match category {
                Category::Load | Category::Store => self.start_memory_access(id, op, latency),
                _ => Some(latency),
            };
            let Some(total) = started else {
                continue;
            };
            self.stations.get_mut(id).start(cycle, total);
            if let Some(i) = self.stations.get(id).trace_index() {
                self.state.trace_mut(i).timing.set_exec_start(cycle);
            }
            let text = self.trace_text(id);
            self.state.log_event(format!("Started execution of {text}"));
        }
    }

    fn record_address(&mut self, id: StationId, category: Category) {
        let s = self.stations.get(id);
        let (addr, value) = match category {
            Category::Load => (s.j().value(), None),
            _ => (s.k().value(), s.j().value()),
        };
        if let Some(e) = self.lsb.entry_mut(id) {
            if let Some(a) = addr {
                e.addr = Some(a as i64);
            }
            if value.is_some() {
                e.value = value;
            }
        }
    }

    /// starts the cache access of a load or store. returns the total
    /// latency, or `None` while an earlier access blocks it.
    fn start_memory_access(&mut self, id: StationId, op: Opcode, latency: usize) -> Option<usize> {
        let kind = match op.category() {
            Category::Load => MemOpKind::Load,
            _ => MemOpKind::Store,
        };
        let addr = self.lsb.entry(id)?.addr?;
        let size = op.access_size();
        if self.lsb.has_address_clash(addr, size, id, kind) {
            log::trace!("{} waits on an earlier access to {}", self.stations.name(id), Addr::new(addr));
            self.state.stall(Stall::MemoryHazard);
            return None;
        }
        let access = match kind {
            MemOpKind::Load => self.cache.load(addr, size),
            MemOpKind::Store => self.cache.probe_store(addr, size),
        };
        let total = latency + access.latency;
        let hit = access.hit;
        let e = self.lsb.entry_mut(id)?;
        e.remaining = total;
        if kind == MemOpKind::Load {
            e.data = access.data;
        }
        self.state.log_event(format!(
            "Cache {} at {} for {}",
            if hit { "hit" } else { "miss" },
            Addr::new(addr),
            self.stations.name(id)
        ));
        Some(total)
    }

    fn write_back(&mut self) {
        let cycle = self.state.cycle();
        let mut ready: Vec<StationId> = self
            .stations
            .iter()
            .filter(|s| s.is_ready_for_write_back())
            .map(|s| s.id())
            .collect();
        if ready.len() > 1 {
            let mut by_end: BTreeMap<usize, Vec<StationId>> = BTreeMap::new();
            for &id in &ready {
                if let Some(end) = self.stations.get(id).ended_at() {
                    by_end.entry(end).or_default().push(id);
                }
            }
            for (end, members) in by_end {
                if members.len() > 1 {
                    self.batches.register(end, &members);
                }
            }
        }
        ready.sort_by_key(|id| self.stations.get(*id).issue_cycle());
        let Some(&id) = ready.first() else {
            return;
        };
        let s = self.stations.get(id);
        let (Some(op), Some(end), Some(trace_index)) = (s.opcode(), s.ended_at(), s.trace_index())
        else {
            return;
        };
        let text = self.trace_text(id);
        match op.category() {
            Category::Store => {
                self.lsb.remove(id);
                self.state.log_event(format!("Store completed for {text}"));
            }
            Category::Branch => self.resolve_branch(trace_index),
            category => {
                let (j, k) = (s.j().value().unwrap_or(0.0), s.k().value().unwrap_or(0.0));
                let dest = s.dest();
                let result = match category {
                    Category::Load => j,
                    _ => op.compute(j, k),
                };
                if let Some(d) = dest {
                    self.regs.set(d, result);
                    self.regs.clear_tag_if(d, id);
                }
                if self.batches.is_pending_member(id, end) {
                    for dep in self.stations.dependents(id) {
                        self.stations.get_mut(dep).held_by = Some(end);
                    }
                }
                self.stations.broadcast(id, result);
                if category == Category::Load {
                    self.lsb.remove(id);
                }
                let dest = dest.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string());
                self.state
                    .log_event(format!("Write-back result {result} for {text} to {dest}"));
            }
        }
        self.state.trace_mut(trace_index).timing.complete(cycle);
        self.stations.get_mut(id).clear();
        if self.batches.retire(id, end) {
            for held in self.stations.ids() {
                let s = self.stations.get_mut(held);
                if s.held_by == Some(end) {
                    s.held_by = None;
                }
            }
            log::debug!("completion batch ending #{end} drained");
        }
        #[cfg(feature = "stat")]
        self.stat_builder.commit();
    }

    fn resolve_branch(&mut self, trace_index: usize) {
        let instr = self.state.trace()[trace_index].clone();
        let taken = match (instr.src1, instr.src2) {
            (Some(a), Some(b)) => {
                let (lhs, rhs) = (self.regs.get(a), self.regs.get(b));
                let taken = instr.opcode.is_taken(lhs, rhs);
                self.state.log_event(format!(
                    "Branch evaluation of {instr}: {a}={lhs}, {b}={rhs} -> {}",
                    if taken { "TAKEN" } else { "NOT TAKEN" }
                ));
                taken
            }
            _ => {
                log::error!("branch {instr} has a missing source register");
                self.state
                    .log_event(format!("ERROR: branch {instr} has a missing source register"));
                false
            }
        };
        if taken {
            let target = branch_target(&instr);
            match target.and_then(|t| Some((t, self.find_branch_target(&instr, t)?))) {
                Some((target, index)) => {
                    self.state.set_ip(index);
                    self.state.set_complete(false);
                    self.state
                        .log_event(format!("Branch TAKEN: jumping to address {}", Addr::new(target)));
                }
                None => {
                    let shown = target
                        .map(|t| Addr::new(t).to_string())
                        .unwrap_or_else(|| "out of range".to_string());
                    log::error!("branch target {shown} not found");
                    self.state.log_event(format!(
                        "ERROR: branch target {shown} not found, instruction pointer not updated"
                    ));
                }
            }
        } else {
            self.state
                .log_event("Branch NOT TAKEN: continuing to next instruction");
        }
        self.branch_stall = false;
        self.branch_unit.resolve();
    }

    /// index of the instruction at `target`, or failing an exact address
    /// match, the one `imm + 1` slots after the branch.
    fn find_branch_target(&self, branch: &Instr, target: i64) -> Option<usize> {
        if let Some(i) = self.program.iter().position(|i| i.addr == target) {
            return Some(i);
        }
        let at = self
            .program
            .iter()
            .position(|i| i.addr == branch.addr && i.opcode == branch.opcode)?;
        let index = (at as i64).checked_add(branch.imm)?.checked_add(1)?;
        (0..self.program.len() as i64)
            .contains(&index)
            .then_some(index as usize)
    }

    fn detect_execution_end(&mut self) {
        let cycle = self.state.cycle();
        for id in self.stations.ids() {
            let s = self.stations.get(id);
            if !s.is_busy() || !s.is_started() || s.ended_at().is_some() || s.remaining() > 0 {
                continue;
            }
            let Some(op) = s.opcode() else {
                continue;
            };
            match op.category() {
                Category::Store => {
                    let Some(e) = self.lsb.entry(id) else {
                        continue;
                    };
                    if e.remaining > 0 {
                        continue;
                    }
                    if let (Some(addr), Some(value)) = (e.addr, e.value) {
                        let bytes = encode_value(value, e.size);
                        self.cache.store(addr, &bytes);
                    }
                    if let Some(e) = self.lsb.entry_mut(id) {
                        e.completed = true;
                    }
                }
                Category::Load => {
                    if let Some(e) = self.lsb.entry_mut(id) {
                        e.completed = true;
                        let value = decode_value(&e.data);
                        self.stations.get_mut(id).j = Operand::Ready(value);
                    }
                }
                _ => {}
            }
            self.stations.get_mut(id).ended_at = Some(cycle);
            if let Some(i) = self.stations.get(id).trace_index() {
                self.state.trace_mut(i).timing.set_exec_end(cycle);
            }
            let text = self.trace_text(id);
            self.state.log_event(format!("Completed execution of {text}"));
        }
    }

    fn check_completion(&mut self) {
        let done = self.state.ip() >= self.program.len()
            && self.state.trace().iter().all(|i| i.timing.is_completed())
            && self.stations.all_idle()
            && self.lsb.is_empty();
        let was_complete = self.state.is_complete();
        self.state.set_complete(done);
        if done && !was_complete {
            log::info!("simulation complete after {} cycles.", self.state.cycle());
            #[cfg(feature = "stat")]
            self.stat_builder.stop_timer();
        }
    }
}

impl Simulator {
    pub fn single_cycle(&mut self, opt: &SimulationOption) -> ControlFlow {
        macro_rules! execute {
            () => {
                if let Some(limit) = opt.max_cycles {
                    if self.cycle() >= limit {
                        return ControlFlow::Break(BreakReason::CycleLimit(limit));
                    }
                }
                let printed = self.state.log().len();
                if let StepOutcome::AlreadyComplete = self.step() {
                    return ControlFlow::Exit;
                }
                if opt.do_trace {
                    for line in &self.state.log()[printed..] {
                        println!("{line}");
                    }
                }
                if self.is_complete() {
                    return ControlFlow::Exit;
                }
            };
        }
        if self.is_complete() {
            return ControlFlow::Exit;
        }
        match &opt.mode {
            ExecuteMode::Run => loop {
                execute!();
            },
            ExecuteMode::UntilCycle { cycle } => loop {
                if self.cycle() >= *cycle {
                    return ControlFlow::Break(BreakReason::Reached(self.cycle()));
                }
                execute!();
            },
            ExecuteMode::RunStep(r) => {
                for _ in 0..r.get_step() {
                    execute!();
                }
                ControlFlow::Break(BreakReason::StepEnded)
            }
        }
    }
}

pub enum ControlFlow {
    Break(BreakReason),
    Exit,
}

pub enum BreakReason {
    StepEnded,
    Reached(usize),
    CycleLimit(usize),
}

impl Simulator {
    pub fn cycle(&self) -> usize {
        self.state.cycle()
    }
    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }
    pub fn is_branch_stalled(&self) -> bool {
        self.branch_stall
    }
    pub fn program(&self) -> &[Instr] {
        &self.program
    }
    pub fn state(&self) -> &ExecutionState {
        &self.state
    }
    pub fn regs(&self) -> &RegFile {
        &self.regs
    }
    pub fn stations(&self) -> &StationPool {
        &self.stations
    }
    pub fn lsb(&self) -> &LoadStoreBuffer {
        &self.lsb
    }
    pub fn cache(&self) -> &Cache {
        &self.cache
    }
    pub fn branch_unit(&self) -> &BranchUnit {
        &self.branch_unit
    }
    pub fn batches(&self) -> &CompletionBatches {
        &self.batches
    }
    pub fn get_reg(&self, r: RegId) -> f64 {
        self.regs.get(r)
    }
    pub fn get_mem(&self, addr: Addr, size: usize) -> f64 {
        decode_value(&self.cache.read_memory(addr.inner(), size))
    }
    pub fn get_regfile_view(&self, k: ShowRegFileKind, chunk_size: usize) -> RegFileView<'_> {
        self.regs.get_view(k, chunk_size, self.stations.names())
    }
    pub fn exit_sim(&mut self) {
        #[cfg(feature = "stat")]
        self.stat_builder.stop_timer();
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    #[cfg(feature = "stat")]
    pub fn collect_stat(&self) -> Stats {
        let mut ss = Stats::default();
        self.add_stats(&mut ss);
        ss
    }
}

#[cfg(feature = "stat")]
impl AddStats for Simulator {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.stat_builder.finish(self.state.cycle())));
        self.cache.add_stats(buf);
    }
}

#[cfg(feature = "stat")]
mod stat {
    use std::{fmt, time};

    use crate::{stat::*, state::Stall};

    pub struct SimStatBuilder {
        begin: time::Instant,
        elapsed: Option<time::Duration>,
        committed: usize,
        structural: usize,
        memory_hazard: usize,
        branch_operands: usize,
        branch_pending: usize,
        batch_hold: usize,
    }

    impl SimStatBuilder {
        pub fn new() -> Self {
            Self {
                begin: time::Instant::now(),
                elapsed: None,
                committed: 0,
                structural: 0,
                memory_hazard: 0,
                branch_operands: 0,
                branch_pending: 0,
                batch_hold: 0,
            }
        }
        pub fn commit(&mut self) {
            self.committed += 1;
        }
        pub fn record_cycle(&mut self, stalls: Stall) {
            for (flag, counter) in [
                (Stall::Structural, &mut self.structural),
                (Stall::MemoryHazard, &mut self.memory_hazard),
                (Stall::BranchOperands, &mut self.branch_operands),
                (Stall::BranchPending, &mut self.branch_pending),
                (Stall::BatchHold, &mut self.batch_hold),
            ] {
                if stalls.contains(flag) {
                    *counter += 1;
                }
            }
        }
        pub fn stop_timer(&mut self) {
            self.elapsed = Some(time::Instant::now() - self.begin)
        }
        pub fn finish(&self, cycle: usize) -> SimStat {
            SimStat {
                cycle,
                committed: self.committed,
                elapsed: self
                    .elapsed
                    .unwrap_or_else(|| time::Instant::now() - self.begin),
                stalls: [
                    ("structural", self.structural),
                    ("memory hazard", self.memory_hazard),
                    ("branch operands", self.branch_operands),
                    ("branch pending", self.branch_pending),
                    ("batch hold", self.batch_hold),
                ],
            }
        }
    }

    impl Default for SimStatBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    pub struct SimStat {
        cycle: usize,
        committed: usize,
        elapsed: time::Duration,
        stalls: [(&'static str, usize); 5],
    }

    impl Stat for SimStat {
        fn view(&self, max_width: usize) -> Box<dyn StatView + '_> {
            Box::new(SimStatView::new(self, max_width))
        }
    }

    pub struct SimStatView<'a> {
        stat: &'a SimStat,
        chunk_size: usize,
    }

    impl<'a> SimStatView<'a> {
        pub fn new(stat: &'a SimStat, max_width: usize) -> Self {
            Self {
                stat,
                chunk_size: Self::chunk_size(max_width),
            }
        }
    }

    impl StatView for SimStatView<'_> {
        fn header(&self) -> &'static str {
            "simulator stat (stall cycles by reason)"
        }
        fn width(&self) -> usize {
            Self::width_by_chunk_size(self.chunk_size).max(30)
        }
    }

    impl Width for SimStatView<'_> {
        fn width_by_chunk_size(chunk_size: usize) -> usize {
            chunk_size * 26 + (chunk_size - 1) * 2 + 2
        }
    }

    impl fmt::Display for SimStatView<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let ms = format!("{} ms", self.stat.elapsed.as_millis());
            writeln!(f, "  elapsed total: {ms:>13}")?;
            writeln!(f, "  cycles total: {:>14}", self.stat.cycle)?;
            writeln!(f, "  committed: {:>17}", self.stat.committed)?;
            let ipc = if self.stat.cycle == 0 {
                0.0
            } else {
                self.stat.committed as f64 / self.stat.cycle as f64
            };
            writeln!(f, "  IPC: {ipc:>23.3}")?;
            let cells: Vec<_> = self
                .stat
                .stalls
                .iter()
                .map(|(n, c)| format!("{n:>15}: {c:>9}"))
                .collect();
            let rows: Vec<_> = cells
                .chunks(self.chunk_size.max(1))
                .map(|chunk| format!("  {}", chunk.join(", ")))
                .collect();
            write!(f, "{}", rows.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm;

    fn sim_with(src: &str) -> Simulator {
        let mut sim = Simulator::new();
        sim.load_program(asm::parse(src).program);
        sim
    }

    fn r(s: &str) -> RegId {
        RegId::try_from(s).unwrap()
    }

    fn timing(sim: &Simulator, i: usize) -> [Option<usize>; 4] {
        let t = &sim.state().trace()[i].timing;
        [t.issue(), t.exec_start(), t.exec_end(), t.write_back()]
    }

    #[test]
    fn test_addi_then_add() {
        let mut sim = sim_with("ADDI R1, R0, 5\nADD.D F2, F0, F0\n");
        assert!(sim.run(100));
        assert_eq!(timing(&sim, 0), [Some(1), Some(2), Some(2), Some(3)]);
        assert_eq!(timing(&sim, 1)[0], Some(2));
        assert_eq!(sim.get_reg(r("R1")), 5.0);
        assert_eq!(sim.get_reg(r("F2")), 0.0);
        assert!(sim.state().log()[0].starts_with("Cycle 1: Issued ADDI R1, R0, 5 to Int1"));
    }

    #[test]
    fn test_div_by_zero() {
        let mut sim = sim_with("DIV.D F0, F2, F4");
        sim.set_register(r("F2"), 3.0);
        sim.set_register(r("F4"), 0.0);
        assert!(sim.run(100));
        assert_eq!(sim.get_reg(r("F0")), 0.0);
        assert!(sim.state().trace()[0].timing.is_completed());
    }

    #[test]
    fn test_dependent_waits_for_broadcast() {
        let mut sim = sim_with("ADDI R1, R0, 2\nADDI R2, R1, 3\n");
        assert!(sim.run(100));
        assert_eq!(sim.get_reg(r("R2")), 5.0);
        // starts in the cycle after the producer writes back
        let producer_wb = timing(&sim, 0)[3].unwrap();
        assert_eq!(timing(&sim, 1)[1], Some(producer_wb + 1));
        assert_eq!(sim.regs().tag(r("R2")), None);
    }

    #[test]
    fn test_backward_branch_loop() {
        let src = "
            ADDI R1, R0, 3
        loop:
            SUBI R1, R1, 1
            BNE R1, R0, loop
            ADDI R2, R0, 7
        ";
        let mut sim = sim_with(src);
        let mut went_back = false;
        let mut last_ip = 0;
        while !sim.is_complete() && sim.cycle() < 500 {
            sim.step();
            let ip = sim.state().ip();
            if ip < last_ip {
                went_back = true;
                assert!(!sim.is_complete());
            }
            last_ip = ip;
        }
        assert!(went_back);
        assert!(sim.is_complete());
        assert_eq!(sim.get_reg(r("R1")), 0.0);
        assert_eq!(sim.get_reg(r("R2")), 7.0);
        // SUBI and BNE issued three times each
        let bnes = sim
            .state()
            .trace()
            .iter()
            .filter(|i| i.opcode == Opcode::Bne)
            .count();
        assert_eq!(bnes, 3);
    }

    #[test]
    fn test_no_issue_past_branch() {
        let mut sim = sim_with("BEQ R0, R0, 0\nADDI R1, R0, 1\n");
        sim.step();
        assert!(sim.is_branch_stalled());
        sim.step();
        // ADDI waits until the branch has written back
        assert_eq!(sim.state().trace().len(), 1);
        assert!(sim.run(100));
        let branch_wb = timing(&sim, 0)[3].unwrap();
        assert!(timing(&sim, 1)[0].unwrap() > branch_wb);
    }

    #[test]
    fn test_branch_target_not_found() {
        let mut sim = sim_with("BEQ R0, R0, 100\nADDI R1, R0, 1\n");
        assert!(sim.run(100));
        assert_eq!(sim.state().trace().len(), 2);
        assert_eq!(sim.get_reg(r("R1")), 1.0);
        assert!(!sim.is_branch_stalled());
        assert!(sim
            .state()
            .log()
            .iter()
            .any(|l| l.contains("ERROR: branch target 0x0194 not found")));
    }

    #[test]
    fn test_branch_offset_overflow() {
        let mut sim = sim_with("BNE R1, R0, 9223372036854775807");
        sim.set_register(r("R1"), 1.0);
        assert!(sim.run(50));
        assert!(sim
            .state()
            .log()
            .iter()
            .any(|l| l.contains("ERROR: branch target out of range not found")));
    }

    #[test]
    fn test_load_at_top_of_address_space() {
        let mut sim = sim_with("ADDI R1, R0, 9223372036854775807\nL.D F0, 0(R1)\n");
        sim.set_register(r("F0"), 5.0);
        assert!(sim.run(200));
        assert_eq!(sim.get_reg(r("F0")), 0.0);
    }

    #[test]
    fn test_store_then_load_same_address() {
        let src = "
            ADDI R1, R0, 64
            ADDI R2, R0, 9
            S.D R2, 0(R1)
            L.D F2, 0(R1)
        ";
        let mut sim = sim_with(src);
        assert!(sim.run(500));
        assert_eq!(sim.get_reg(r("F2")), 9.0);
        let store_end = timing(&sim, 2)[2].unwrap();
        let load_start = timing(&sim, 3)[1].unwrap();
        assert!(load_start > store_end);
    }

    #[test]
    fn test_load_from_initialized_memory() {
        let mut config = SimConfig::default();
        config.memory.push(crate::config::MemoryCell {
            addr: 16,
            value: 100.0,
            size: 8,
        });
        config.registers.insert("R1".to_string(), 8.0);
        let mut sim = Simulator::with_config(config).unwrap();
        sim.load_program(asm::parse("L.D F4, 8(R1)").program);
        assert!(sim.run(100));
        assert_eq!(sim.get_reg(r("F4")), 100.0);
        // load latency 2 plus a miss
        let [_, start, end, _] = timing(&sim, 0);
        assert_eq!(end.unwrap() - start.unwrap() + 1, 12);
        assert_eq!(sim.cache().misses(), 1);
    }

    #[test]
    fn test_single_commit_per_cycle_and_monotonic() {
        let src = "
            ADDI R1, R0, 8
            ADD.D F2, F4, F6
            ADD.D F8, F4, F6
            MUL.D F10, F2, F8
            S.D F10, 0(R1)
            L.D F12, 0(R1)
            SUB.D F14, F12, F2
        ";
        let mut sim = sim_with(src);
        sim.set_register(r("F4"), 1.0);
        sim.set_register(r("F6"), 2.0);
        assert!(sim.run(1000));
        let mut wbs = Vec::new();
        for instr in sim.state().trace() {
            let t = &instr.timing;
            let (i, s, e, w) = (
                t.issue().unwrap(),
                t.exec_start().unwrap(),
                t.exec_end().unwrap(),
                t.write_back().unwrap(),
            );
            assert!(i <= s && s <= e && e < w, "{instr}: {i} {s} {e} {w}");
            wbs.push(w);
        }
        let n = wbs.len();
        wbs.sort();
        wbs.dedup();
        assert_eq!(wbs.len(), n);
        assert_eq!(sim.get_reg(r("F10")), 9.0);
        assert_eq!(sim.get_reg(r("F12")), 9.0);
        assert_eq!(sim.get_reg(r("F14")), 6.0);
    }

    #[test]
    fn test_simultaneous_completion_holds_dependent() {
        // MUL.D and the first ADD.D end in the same cycle; the consumer of
        // MUL.D may not start before ADD.D has written back too
        let src = "
            MUL.D F2, F4, F6
            ADD.D F8, F4, F6
            ADD.D F10, F2, F4
        ";
        let mut config = SimConfig::default();
        config.latencies.insert("MUL.D".to_string(), 2);
        config.latencies.insert("ADD.D".to_string(), 1);
        let mut sim = Simulator::with_config(config).unwrap();
        sim.load_program(asm::parse(src).program);
        sim.set_register(r("F4"), 1.0);
        sim.set_register(r("F6"), 2.0);
        assert!(sim.run(100));
        let first = timing(&sim, 0);
        let second = timing(&sim, 1);
        let consumer = timing(&sim, 2);
        assert_eq!(first[2], second[2]);
        assert!(consumer[1].unwrap() > second[3].unwrap());
        assert!(sim.state().log().iter().any(|l| l.contains("Started execution of ADD.D F10")));
        assert_eq!(sim.get_reg(r("F10")), 3.0);
        assert!(sim.batches().is_empty());
    }

    #[test]
    fn test_tag_owned_by_latest_writer() {
        let src = "
            MUL.D F2, F4, F6
            ADD.D F2, F4, F6
        ";
        let mut sim = sim_with(src);
        sim.set_register(r("F4"), 3.0);
        sim.set_register(r("F6"), 4.0);
        assert!(sim.run(200));
        // the slower, older MUL.D writes back last but must not clear the tag
        // of ADD.D or leave a dangling one
        assert_eq!(sim.regs().tag(r("F2")), None);
        assert!(sim.stations().all_idle());
    }

    #[test]
    fn test_structural_stall() {
        let src = "
            MUL.D F2, F4, F6
            MUL.D F8, F4, F6
            MUL.D F10, F4, F6
        ";
        let mut sim = sim_with(src);
        sim.step();
        sim.step();
        sim.step();
        assert_eq!(sim.state().trace().len(), 2);
        assert!(sim.state().stalls().contains(Stall::Structural));
        assert!(sim.run(200));
        assert_eq!(sim.state().trace().len(), 3);
    }

    #[test]
    fn test_determinism() {
        let src = "
            ADDI R1, R0, 2
        top:
            L.D F2, 0(R1)
            ADD.D F4, F4, F2
            S.D F4, 8(R1)
            SUBI R1, R1, 1
            BNE R1, R0, top
        ";
        let run = || {
            let mut sim = sim_with(src);
            sim.initialize_memory(2, 5.0, 8);
            sim.run(2000);
            (
                sim.state().log().to_vec(),
                sim.get_reg(r("F4")),
                sim.cache().hits(),
                sim.cache().misses(),
            )
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_reset_keeps_memory() {
        let mut sim = sim_with("L.D F0, 0(R0)\nADDI R1, R0, 4\n");
        sim.initialize_memory(0, 4.0, 8);
        assert!(sim.run(200));
        assert_eq!(sim.get_reg(r("F0")), 4.0);
        sim.reset();
        assert_eq!(sim.cycle(), 0);
        assert!(sim.state().trace().is_empty());
        assert_eq!(sim.get_reg(r("R1")), 0.0);
        assert_eq!(sim.cache().misses(), 0);
        assert_eq!(sim.get_mem(Addr::new(0), 8), 4.0);
        sim.reset_memory();
        assert_eq!(sim.get_mem(Addr::new(0), 8), 0.0);
    }

    #[test]
    fn test_step_after_complete() {
        let mut sim = sim_with("ADDI R1, R0, 1");
        assert!(sim.run(100));
        let cycle = sim.cycle();
        assert_eq!(sim.step(), StepOutcome::AlreadyComplete);
        assert_eq!(sim.cycle(), cycle);
    }

    #[test]
    fn test_single_cycle_modes() {
        let mut sim = sim_with("ADDI R1, R0, 1\nADDI R2, R0, 2\n");
        let opt = SimulationOption {
            mode: ExecuteMode::RunStep(crate::common::RunStep::new(Some(2))),
            ..Default::default()
        };
        assert!(matches!(
            sim.single_cycle(&opt),
            ControlFlow::Break(BreakReason::StepEnded)
        ));
        assert_eq!(sim.cycle(), 2);
        let opt = SimulationOption {
            max_cycles: Some(3),
            ..Default::default()
        };
        assert!(matches!(
            sim.single_cycle(&opt),
            ControlFlow::Break(BreakReason::CycleLimit(3))
        ));
        assert!(matches!(
            sim.single_cycle(&SimulationOption::default()),
            ControlFlow::Exit
        ));
        assert!(sim.is_complete());
    }
}
