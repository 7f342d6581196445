use std::io::{stdin, stdout, Write};

use anyhow::Result;
use bitmask_enum::bitmask;
use tomasulo_core::{
    common::{ExecuteMode, RunStep, SimulationOption},
    memory::Addr,
    reg_file::ShowRegFileKind,
    register::RegId,
    sim::{BreakReason, ControlFlow, Simulator},
};

use terminal_size::terminal_size;

peg::parser!(grammar command() for str {
    rule usize() -> usize
        = n:$(quiet!{['0'..='9']+}) {? n.parse().or(Err("usize")) }
        / expected!("usize")
    rule int() -> i64
        = quiet!{"0" ['x' | 'X']} n:$(quiet!{['0'..='9'|'a'..='f'|'A'..='F']+}) {?
            i64::from_str_radix(n, 16).or(Err("hex address"))
        }
        / n:$(quiet!{"-"? ['0'..='9']+}) {? n.parse().or(Err("integer")) }
        / expected!("integer")
    rule addr() -> Addr
        = i:int() { Addr::new(i) }
    rule number() -> f64
        = n:$(quiet!{
            "-"? ['0'..='9']+ ("." ['0'..='9']*)? (['e' | 'E'] ['+' | '-']? ['0'..='9']+)?
        }) {? n.parse().or(Err("number")) }
        / expected!("number")

    rule ident() -> &'input str
        = $(quiet!{
            [ c if c.is_ascii_alphabetic() ]
            [ c if c == '_' || c.is_ascii_alphanumeric() ]*
        })
        / expected!("identifier")
    rule reg_name() -> RegId
        = i:ident() {? RegId::try_from(i).map_err(|_| "register name") }
    rule reg() = "register" / "reg"
    rule allregs() = reg() "s"?
    rule iregs() = ("integer" / "int" / "i") __ reg() "s"?
    rule fregs() = (("floating" __ "point") / "float" / "f") __ reg() "s"?
    rule regfile_kind() -> ShowRegFileKind
        = allregs() { ShowRegFileKind::RegFileAll }
        / iregs() { ShowRegFileKind::RegFileI }
        / fregs() { ShowRegFileKind::RegFileF }
    rule mem() = "memory" / "mem"
    rule size() -> usize
        = n:usize() {? if (1..=8).contains(&n) { Ok(n) } else { Err("size of 1 to 8 bytes") } }

    rule dyn_command() -> ExecuteMode
        = "until" __ cycle:usize() { ExecuteMode::UntilCycle { cycle } }
        / "run" { ExecuteMode::Run }
        / "step" step:(__ n:usize() { n })? { ExecuteMode::RunStep(RunStep::new(step)) }
    rule static_command() -> StaticCommand
        = "trace" __ "off" { StaticCommand::UpdateWhetherTrace(false) }
        / "trace" (__ "on")? { StaticCommand::UpdateWhetherTrace(true) }
        / "reset" { StaticCommand::Reset }
        / "watch" __ wk:watch_kind() { StaticCommand::Watch(Operation::Add, wk) }
        / "unwatch" __ wk:watch_kind() { StaticCommand::Watch(Operation::Remove, wk) }
        / "show" __ sk:show_kind() { StaticCommand::Show(sk) }
        / "set" __ r:reg_name() _ "=" _ v:number() { StaticCommand::SetReg(r, v) }
        / mem() __ a:addr() sz:(_ ":" _ s:size() { s })? _ "=" _ v:number() {
            StaticCommand::SetMem(a, sz.unwrap_or(8), v)
        }
    rule panel() -> WatchPanel
        = k:regfile_kind() {
            match k {
                ShowRegFileKind::RegFileAll => WatchPanel::IntRegs | WatchPanel::FloatRegs,
                ShowRegFileKind::RegFileI => WatchPanel::IntRegs,
                ShowRegFileKind::RegFileF => WatchPanel::FloatRegs,
            }
        }
        / ("rs" / "stations") { WatchPanel::Stations }
        / "lsb" { WatchPanel::Lsb }
        / "cache" { WatchPanel::Cache }
        / "timing" { WatchPanel::Timing }
        / "branch" { WatchPanel::Branch }
    rule watch_kind() -> WatchingKind
        = p:panel() { WatchingKind::Panel(p) }
        / r:reg_name() { WatchingKind::Reg(r) }
    rule show_kind() -> ShowKind
        = "pc" { ShowKind::Pc }
        / k:regfile_kind() { ShowKind::RegFile(k) }
        / ("rs" / "stations") { ShowKind::Stations }
        / "lsb" { ShowKind::Lsb }
        / "cache" all:(__ "all")? { ShowKind::Cache { all: all.is_some() } }
        / mem() __ a:addr() sz:(__ s:size() { s })? { ShowKind::Memory(a, sz.unwrap_or(8)) }
        / "timing" { ShowKind::Timing }
        / "log" { ShowKind::Log }
        / "stat" { ShowKind::Stat }
        / "branch" { ShowKind::Branch }
        / "program" { ShowKind::Program }
        / "watch" "ings"? { ShowKind::Watchings }
        / r:reg_name() { ShowKind::Register(r) }
    pub(crate) rule parse_command() -> Command
        = _ s:static_command() _ { Command::Static(s) }
        / _ "exit" _ { Command::Exit }
        / _ d:dyn_command()? _ { Command::Dynamic(d) }
        / expected!("command")

    rule ws() = quiet!{[' ' | '\t' | '\r' | '\n']}
        / expected!("whitespace")
    rule _() = ws()*
    rule __() = ws()+
});

#[derive(Debug, PartialEq)]
pub(crate) enum Command {
    Dynamic(Option<ExecuteMode>),
    Static(StaticCommand),
    Exit,
}

#[derive(Debug, PartialEq)]
pub(crate) enum StaticCommand {
    UpdateWhetherTrace(bool),
    Reset,
    Show(ShowKind),
    Watch(Operation, WatchingKind),
    SetReg(RegId, f64),
    SetMem(Addr, usize, f64),
}

#[derive(Debug, PartialEq)]
pub(crate) enum Operation {
    Add,
    Remove,
}

#[derive(Debug, PartialEq)]
pub(crate) enum WatchingKind {
    Panel(WatchPanel),
    Reg(RegId),
}

#[derive(Debug, PartialEq)]
pub(crate) enum ShowKind {
    Pc,
    IsTraceEnabled,
    Watchings,
    RegFile(ShowRegFileKind),
    Register(RegId),
    Stations,
    Lsb,
    Cache { all: bool },
    Memory(Addr, usize),
    Timing,
    Log,
    Stat,
    Branch,
    Program,
}

/// views printed again after every run command.
#[bitmask(u8)]
pub(crate) enum WatchPanel {
    IntRegs,
    FloatRegs,
    Stations,
    Lsb,
    Cache,
    Timing,
    Branch,
}

fn get_terminal_width() -> Option<u16> {
    terminal_size().map(|(w, _)| w.0.saturating_sub(20))
}

struct Printer {
    regfile_chunk_size: usize,
    #[cfg(feature = "stat")]
    width: Option<u16>,
}

impl Printer {
    fn show(&self, sim: &Simulator, opt: &SimulationOption, watch: &Watchings, show: ShowKind) {
        match show {
            ShowKind::Pc => {
                let ip = sim.state().ip();
                match sim.program().get(ip) {
                    Some(i) => println!("pc: {ip} ({i}), cycle #{}", sim.cycle()),
                    None => println!("pc: {ip} (end of program), cycle #{}", sim.cycle()),
                }
                println!("status: {}, stalls: {}", sim.state().status(), sim.state().stalls());
            }
            ShowKind::IsTraceEnabled => {
                println!(
                    "trace {}",
                    if opt.do_trace { "enabled" } else { "disabled" }
                );
            }
            ShowKind::Watchings => {
                if watch.panels.is_none() && watch.regs.is_empty() {
                    println!("nothing to watch.");
                    return;
                }
                println!("watching these values:");
                for (p, name) in [
                    (WatchPanel::IntRegs, "integer registers"),
                    (WatchPanel::FloatRegs, "floating point registers"),
                    (WatchPanel::Stations, "reservation stations"),
                    (WatchPanel::Lsb, "load/store buffer"),
                    (WatchPanel::Cache, "cache"),
                    (WatchPanel::Timing, "timing table"),
                    (WatchPanel::Branch, "branch unit"),
                ] {
                    if watch.panels.contains(p) {
                        println!("\t{name}");
                    }
                }
                if !watch.regs.is_empty() {
                    let v: Vec<_> = watch.regs.iter().map(|r| r.to_string()).collect();
                    println!("\tregisters: {}", v.join(", "));
                }
            }
            ShowKind::RegFile(k) => {
                println!("{}", sim.get_regfile_view(k, self.regfile_chunk_size));
            }
            ShowKind::Register(r) => {
                let tag = sim
                    .regs()
                    .tag(r)
                    .map(|t| format!(" (waiting on {})", sim.stations().name(t)))
                    .unwrap_or_default();
                println!("{r} == {}{tag}", sim.get_reg(r));
            }
            ShowKind::Stations => println!("{}", sim.stations().get_view()),
            ShowKind::Lsb => println!("{}", sim.lsb().get_view(sim.stations().names())),
            ShowKind::Cache { all } => println!("{}", sim.cache().get_view(!all)),
            ShowKind::Memory(addr, size) => {
                println!("M[{addr}; {size}] == {}", sim.get_mem(addr, size));
            }
            ShowKind::Timing => print!("{}", sim.state().get_trace_view()),
            ShowKind::Log => {
                for line in sim.state().log() {
                    println!("{line}");
                }
            }
            #[cfg(feature = "stat")]
            ShowKind::Stat => {
                let stats = sim.collect_stat();
                println!("{}", stats.view(self.width.unwrap_or(60) as usize));
            }
            #[cfg(not(feature = "stat"))]
            ShowKind::Stat => {
                println!("statistics are not available; build with `--features stat`.");
            }
            ShowKind::Branch => {
                println!("{}", sim.branch_unit());
                println!("{}", sim.batches());
            }
            ShowKind::Program => {
                for (i, instr) in sim.program().iter().enumerate() {
                    let cursor = if i == sim.state().ip() { ">" } else { " " };
                    println!("{cursor} {} {instr}", Addr::new(instr.addr));
                }
            }
        }
    }

    fn show_watchings(&self, sim: &Simulator, opt: &SimulationOption, watch: &Watchings) {
        let p = watch.panels;
        if p.contains(WatchPanel::IntRegs) && p.contains(WatchPanel::FloatRegs) {
            self.show(sim, opt, watch, ShowKind::RegFile(ShowRegFileKind::RegFileAll));
        } else if p.contains(WatchPanel::IntRegs) {
            self.show(sim, opt, watch, ShowKind::RegFile(ShowRegFileKind::RegFileI));
        } else if p.contains(WatchPanel::FloatRegs) {
            self.show(sim, opt, watch, ShowKind::RegFile(ShowRegFileKind::RegFileF));
        }
        for (panel, kind) in [
            (WatchPanel::Stations, ShowKind::Stations),
            (WatchPanel::Lsb, ShowKind::Lsb),
            (WatchPanel::Cache, ShowKind::Cache { all: false }),
            (WatchPanel::Timing, ShowKind::Timing),
            (WatchPanel::Branch, ShowKind::Branch),
        ] {
            if p.contains(panel) {
                self.show(sim, opt, watch, kind);
            }
        }
        if !watch.regs.is_empty() {
            let v: Vec<_> = watch
                .regs
                .iter()
                .map(|r| format!("{r} == {}", sim.get_reg(*r)))
                .collect();
            println!("{}", v.join(", "));
        }
    }
}

struct Watchings {
    panels: WatchPanel,
    regs: Vec<RegId>,
}

pub fn execute_interactive(sim: &mut Simulator, max_cycles: Option<usize>) -> Result<()> {
    let mut opt = SimulationOption {
        mode: ExecuteMode::RunStep(RunStep::new(None)),
        max_cycles,
        ..Default::default()
    };
    let mut watch = Watchings {
        panels: WatchPanel::none(),
        regs: Vec::new(),
    };
    let printer = Printer {
        regfile_chunk_size: get_terminal_width().map(|w| w / 30).unwrap_or(2).max(2) as usize,
        #[cfg(feature = "stat")]
        width: get_terminal_width(),
    };
    println!("entering interactive.");
    'interactive: loop {
        let mut show = None;
        let update_mode = 'input: loop {
            if let Some(show) = show.take() {
                printer.show(sim, &opt, &watch, show);
            }
            // prompt string
            match &opt.mode {
                ExecuteMode::Run => print!("run "),
                ExecuteMode::UntilCycle { cycle } => print!("until #{cycle} "),
                ExecuteMode::RunStep(n) => print!("step {} ", n.get_step()),
            }
            if opt.do_trace {
                print!("[trace] ");
            }
            print!("#{} > ", sim.cycle());
            stdout().flush()?;
            let mut str = String::new();
            if stdin().read_line(&mut str)? == 0 {
                sim.exit_sim();
                break 'interactive;
            }
            let parsed = match command::parse_command(&str) {
                Ok(p) => p,
                Err(e) => {
                    println!("parse error: expected {}", e.expected);
                    continue;
                }
            };
            match parsed {
                Command::Dynamic(d) => {
                    break 'input d;
                }
                Command::Static(s) => {
                    use Operation::*;
                    match s {
                        StaticCommand::Show(s) => show = Some(s),
                        StaticCommand::UpdateWhetherTrace(b) => {
                            opt.do_trace = b;
                            show = Some(ShowKind::IsTraceEnabled);
                        }
                        StaticCommand::Reset => {
                            sim.reset();
                            println!("simulator reset.");
                            show = Some(ShowKind::Pc);
                        }
                        StaticCommand::SetReg(r, v) => {
                            sim.set_register(r, v);
                            show = Some(ShowKind::Register(r));
                        }
                        StaticCommand::SetMem(addr, size, v) => {
                            sim.initialize_memory(addr.inner(), v, size);
                            show = Some(ShowKind::Memory(addr, size));
                        }
                        StaticCommand::Watch(Add, w) => {
                            match w {
                                WatchingKind::Panel(p) => watch.panels |= p,
                                WatchingKind::Reg(r) => {
                                    if !watch.regs.contains(&r) {
                                        watch.regs.push(r);
                                    }
                                }
                            }
                            show = Some(ShowKind::Watchings)
                        }
                        StaticCommand::Watch(Remove, w) => {
                            match w {
                                WatchingKind::Panel(p) => watch.panels &= !p,
                                WatchingKind::Reg(r) => {
                                    if let Some(index) = watch.regs.iter().position(|rr| *rr == r)
                                    {
                                        watch.regs.remove(index);
                                    }
                                }
                            }
                            show = Some(ShowKind::Watchings)
                        }
                    };
                    continue 'input;
                }
                Command::Exit => {
                    sim.exit_sim();
                    break 'interactive;
                }
            }
        };
        if let Some(mode) = update_mode {
            println!("mode: {mode}");
            opt.mode = mode;
        }
        match sim.single_cycle(&opt) {
            ControlFlow::Break(reason) => {
                use BreakReason::*;
                match reason {
                    StepEnded | Reached(..) => (),
                    CycleLimit(c) => println!("cycle limit #{c} reached"),
                }
            }
            ControlFlow::Exit => {
                println!("program complete after {} cycles", sim.cycle());
            }
        }
        printer.show(sim, &opt, &watch, ShowKind::Pc);
        printer.show_watchings(sim, &opt, &watch);
    }
    println!("exiting interactive.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Command {
        command::parse_command(s).unwrap()
    }

    #[test]
    fn test_dynamic_commands() {
        assert_eq!(parse("\n"), Command::Dynamic(None));
        assert!(matches!(
            parse("step 5\n"),
            Command::Dynamic(Some(ExecuteMode::RunStep(r))) if r.get_step() == 5
        ));
        assert!(matches!(
            parse("step\n"),
            Command::Dynamic(Some(ExecuteMode::RunStep(r))) if r.get_step() == 1
        ));
        assert!(matches!(
            parse("until 42"),
            Command::Dynamic(Some(ExecuteMode::UntilCycle { cycle: 42 }))
        ));
        assert_eq!(parse(" exit "), Command::Exit);
    }

    #[test]
    fn test_show_commands() {
        let show = |s| match parse(s) {
            Command::Static(StaticCommand::Show(k)) => k,
            _ => panic!("not a show command: {s}"),
        };
        assert_eq!(show("show pc"), ShowKind::Pc);
        assert_eq!(show("show regs"), ShowKind::RegFile(ShowRegFileKind::RegFileAll));
        assert_eq!(show("show float regs"), ShowKind::RegFile(ShowRegFileKind::RegFileF));
        assert_eq!(show("show f4"), ShowKind::Register(RegId::float(4)));
        assert_eq!(show("show R2"), ShowKind::Register(RegId::int(2)));
        assert_eq!(show("show cache all"), ShowKind::Cache { all: true });
        assert_eq!(show("show mem 0x10 4"), ShowKind::Memory(Addr::new(16), 4));
        assert_eq!(show("show mem 8"), ShowKind::Memory(Addr::new(8), 8));
    }

    #[test]
    fn test_mutating_commands() {
        assert_eq!(
            parse("set F2 = -1.5"),
            Command::Static(StaticCommand::SetReg(RegId::float(2), -1.5))
        );
        assert_eq!(
            parse("mem 16 : 4 = 3"),
            Command::Static(StaticCommand::SetMem(Addr::new(16), 4, 3.0))
        );
        assert_eq!(
            parse("watch int regs"),
            Command::Static(StaticCommand::Watch(
                Operation::Add,
                WatchingKind::Panel(WatchPanel::IntRegs)
            ))
        );
        assert_eq!(
            parse("unwatch R3"),
            Command::Static(StaticCommand::Watch(
                Operation::Remove,
                WatchingKind::Reg(RegId::int(3))
            ))
        );
        assert!(command::parse_command("mem 16 : 9 = 3").is_err());
        assert!(command::parse_command("set Q1 = 3").is_err());
    }
}
