use std::fmt;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunStep {
    step: Option<usize>,
}

impl RunStep {
    pub fn new(step: Option<usize>) -> Self {
        Self { step }
    }

    pub fn get_step(&self) -> usize {
        self.step.unwrap_or(1)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub enum ExecuteMode {
    #[default]
    Run,
    UntilCycle {
        cycle: usize,
    },
    RunStep(RunStep),
}

impl fmt::Display for ExecuteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecuteMode::Run => write!(f, "running until completion"),
            ExecuteMode::UntilCycle { cycle } => write!(f, "running until cycle #{cycle}"),
            ExecuteMode::RunStep(r) => {
                write!(f, "step execution by {}", r.get_step())
            }
        }
    }
}

#[derive(Default)]
pub struct SimulationOption {
    pub do_trace: bool,
    pub mode: ExecuteMode,
    pub max_cycles: Option<usize>,
}
