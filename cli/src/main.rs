mod interactive;

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tomasulo_core::{
    asm,
    common::{ExecuteMode, SimulationOption},
    config::SimConfig,
    reg_file::ShowRegFileKind,
    sim::{BreakReason, ControlFlow, Simulator},
};

#[cfg(feature = "stat")]
use terminal_size::terminal_size;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// simulate a program
    Run(RunArgs),
    /// assemble a program and print the result
    Asm(AsmArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// File path to input assembly
    #[arg(short, long)]
    input: PathBuf,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    delegate: CommonArgs,
    /// File path to a JSON configuration
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Enable interactive mode
    #[arg(long)]
    interactive: bool,
    /// Give up after this many cycles
    #[arg(long, default_value_t = 100_000)]
    max_cycles: usize,
    /// Print the event log while running
    #[arg(long)]
    trace: bool,
}

#[derive(Args, Debug)]
struct AsmArgs {
    #[command(flatten)]
    delegate: CommonArgs,
}

fn init_logger(verbose: bool) {
    if verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::init();
    }
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    match args.command {
        Command::Run(RunArgs {
            delegate: CommonArgs { input, verbose },
            config,
            interactive,
            max_cycles,
            trace,
        }) => {
            init_logger(verbose);
            let config = read_config(config)?;
            let assembly = read_program(&input)?;
            let mut sim = Simulator::with_config(config)?;
            sim.load_program(assembly.program);
            if interactive {
                interactive::execute_interactive(&mut sim, Some(max_cycles))?;
            } else {
                execute(&mut sim, max_cycles, trace);
            }
            print_summary(&sim);
            output_stat(&sim);
            Ok(())
        }
        Command::Asm(AsmArgs {
            delegate: CommonArgs { input, verbose },
        }) => {
            init_logger(verbose);
            let assembly = read_program(&input)?;
            for (name, addr) in &assembly.labels {
                println!("{name}: {}", tomasulo_core::memory::Addr::new(*addr));
            }
            for instr in &assembly.program {
                println!("{} {instr}", tomasulo_core::memory::Addr::new(instr.addr));
            }
            Ok(())
        }
    }
}

fn read_config(path: Option<PathBuf>) -> Result<SimConfig> {
    let config = match path {
        Some(p) => {
            let file = File::open(&p).with_context(|| format!("cannot open {}", p.display()))?;
            SimConfig::from_reader(file)
                .with_context(|| format!("invalid configuration in {}", p.display()))?
        }
        None => Default::default(),
    };
    Ok(config)
}

fn read_program(input: &Path) -> Result<asm::Assembly> {
    let src = std::fs::read_to_string(input)
        .with_context(|| format!("cannot read {}", input.display()))?;
    let assembly = asm::parse(&src);
    log::info!(
        "assembled {} instructions ({} warnings).",
        assembly.program.len(),
        assembly.warnings.len()
    );
    Ok(assembly)
}

fn execute(sim: &mut Simulator, max_cycles: usize, trace: bool) {
    let opt = SimulationOption {
        do_trace: trace,
        mode: ExecuteMode::Run,
        max_cycles: Some(max_cycles),
    };
    match sim.single_cycle(&opt) {
        ControlFlow::Exit => log::info!("finished execution."),
        ControlFlow::Break(BreakReason::CycleLimit(c)) => {
            log::warn!("gave up at cycle #{c} before the program completed.")
        }
        ControlFlow::Break(_) => (),
    }
    sim.exit_sim();
}

fn print_summary(sim: &Simulator) {
    println!("{}", sim.state().get_trace_view());
    println!("{}", sim.get_regfile_view(ShowRegFileKind::RegFileAll, 4));
    println!("{}", sim.state().status());
}

#[cfg(not(feature = "stat"))]
fn output_stat(_: &Simulator) {}

#[cfg(feature = "stat")]
fn output_stat(sim: &Simulator) {
    let max_width = get_terminal_width().unwrap_or(120) as usize;
    log::info!("statistics:\n{}", sim.collect_stat().view(max_width));
}

#[cfg(feature = "stat")]
fn get_terminal_width() -> Option<u16> {
    terminal_size().map(|(w, _)| w.0.saturating_sub(20))
}
