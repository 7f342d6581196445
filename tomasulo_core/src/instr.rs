use std::{collections::HashMap, fmt};

use once_cell::sync::Lazy;

use crate::register::RegId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    AddD,
    SubD,
    MulD,
    DivD,
    AddS,
    SubS,
    MulS,
    DivS,
    Addi,
    Daddi,
    Subi,
    Dsubi,
    LoadD,
    LoadS,
    Lw,
    Ld,
    StoreD,
    StoreS,
    Sw,
    Sd,
    Beq,
    Bne,
}

/// functional class of an instruction. decides which station pool serves it
/// and which operand layout it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    FpAddSub,
    FpMulDiv,
    IntAlu,
    Load,
    Store,
    Branch,
}

impl Category {
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Load | Self::Store)
    }
}

impl Opcode {
    pub const ALL: [Opcode; 22] = [
        Self::AddD,
        Self::SubD,
        Self::MulD,
        Self::DivD,
        Self::AddS,
        Self::SubS,
        Self::MulS,
        Self::DivS,
        Self::Addi,
        Self::Daddi,
        Self::Subi,
        Self::Dsubi,
        Self::LoadD,
        Self::LoadS,
        Self::Lw,
        Self::Ld,
        Self::StoreD,
        Self::StoreS,
        Self::Sw,
        Self::Sd,
        Self::Beq,
        Self::Bne,
    ];

    pub fn mnemonic(&self) -> &'static str {
        use Opcode::*;
        match self {
            AddD => "ADD.D",
            SubD => "SUB.D",
            MulD => "MUL.D",
            DivD => "DIV.D",
            AddS => "ADD.S",
            SubS => "SUB.S",
            MulS => "MUL.S",
            DivS => "DIV.S",
            Addi => "ADDI",
            Daddi => "DADDI",
            Subi => "SUBI",
            Dsubi => "DSUBI",
            LoadD => "L.D",
            LoadS => "L.S",
            Lw => "LW",
            Ld => "LD",
            StoreD => "S.D",
            StoreS => "S.S",
            Sw => "SW",
            Sd => "SD",
            Beq => "BEQ",
            Bne => "BNE",
        }
    }

    pub fn category(&self) -> Category {
        use Opcode::*;
        match self {
            AddD | SubD | AddS | SubS => Category::FpAddSub,
            MulD | DivD | MulS | DivS => Category::FpMulDiv,
            Addi | Daddi | Subi | Dsubi => Category::IntAlu,
            LoadD | LoadS | Lw | Ld => Category::Load,
            StoreD | StoreS | Sw | Sd => Category::Store,
            Beq | Bne => Category::Branch,
        }
    }

    pub fn default_latency(&self) -> usize {
        use Opcode::*;
        match self {
            AddD | SubD | AddS | SubS => 2,
            MulD | MulS => 10,
            DivD | DivS => 40,
            Addi | Daddi | Subi | Dsubi => 1,
            LoadD | LoadS | Lw | Ld => 2,
            StoreD | StoreS | Sw | Sd => 2,
            Beq | Bne => 1,
        }
    }

    pub fn access_size(&self) -> usize {
        use Opcode::*;
        match self {
            LoadD | Ld | StoreD | Sd => 8,
            LoadS | Lw | StoreS | Sw => 4,
            _ => 0,
        }
    }

    /// result of an arithmetic opcode. division by zero yields 0.
    pub fn compute(&self, j: f64, k: f64) -> f64 {
        use Opcode::*;
        match self {
            AddD | AddS | Addi | Daddi => j + k,
            SubD | SubS | Subi | Dsubi => j - k,
            MulD | MulS => j * k,
            DivD | DivS => {
                if k == 0.0 {
                    0.0
                } else {
                    j / k
                }
            }
            _ => 0.0,
        }
    }

    pub fn is_taken(&self, lhs: f64, rhs: f64) -> bool {
        let eq = lhs.total_cmp(&rhs).is_eq();
        match self {
            Opcode::Beq => eq,
            Opcode::Bne => !eq,
            _ => false,
        }
    }
}

pub static MNEMONIC_LOOKUP: Lazy<HashMap<&str, Opcode>> =
    Lazy::new(|| Opcode::ALL.iter().map(|op| (op.mnemonic(), *op)).collect());

impl TryFrom<&str> for Opcode {
    type Error = ();
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let s = s.trim().to_ascii_uppercase();
        MNEMONIC_LOOKUP.get(s.as_str()).cloned().ok_or(())
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// cycle stamps of one dynamic instruction. each stamp is written once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timing {
    issue: Option<usize>,
    exec_start: Option<usize>,
    exec_end: Option<usize>,
    write_back: Option<usize>,
    completed: bool,
}

macro_rules! stamp {
    ($get:ident, $set:ident) => {
        pub fn $get(&self) -> Option<usize> {
            self.$get
        }
        pub fn $set(&mut self, cycle: usize) {
            debug_assert!(
                self.$get.is_none(),
                concat!(stringify!($get), " stamped twice")
            );
            self.$get = Some(cycle);
        }
    };
}

impl Timing {
    stamp!(issue, set_issue);
    stamp!(exec_start, set_exec_start);
    stamp!(exec_end, set_exec_end);
    stamp!(write_back, set_write_back);

    pub fn is_completed(&self) -> bool {
        self.completed
    }
    pub fn complete(&mut self, cycle: usize) {
        self.set_write_back(cycle);
        self.completed = true;
    }
}

/// one instruction of the program.
///
/// operand layout by category:
/// - fp ops: `dest`, `src1`, `src2`
/// - integer ops: `dest`, `src1`, `imm`
/// - loads: `dest`, `base`, `imm`
/// - stores: `src1` (value), `base`, `imm`
/// - branches: `src1`, `src2`, `imm` as word offset from the next instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub opcode: Opcode,
    pub dest: Option<RegId>,
    pub src1: Option<RegId>,
    pub src2: Option<RegId>,
    pub base: Option<RegId>,
    pub imm: i64,
    pub addr: i64,
    pub timing: Timing,
}

impl Instr {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            dest: None,
            src1: None,
            src2: None,
            base: None,
            imm: 0,
            addr: 0,
            timing: Timing::default(),
        }
    }
    pub fn with_dest(mut self, r: RegId) -> Self {
        self.dest = Some(r);
        self
    }
    pub fn with_src1(mut self, r: RegId) -> Self {
        self.src1 = Some(r);
        self
    }
    pub fn with_src2(mut self, r: RegId) -> Self {
        self.src2 = Some(r);
        self
    }
    pub fn with_base(mut self, r: RegId) -> Self {
        self.base = Some(r);
        self
    }
    pub fn with_imm(mut self, imm: i64) -> Self {
        self.imm = imm;
        self
    }
    pub fn at(mut self, addr: i64) -> Self {
        self.addr = addr;
        self
    }
    pub fn category(&self) -> Category {
        self.opcode.category()
    }
    pub fn fresh_copy(&self) -> Self {
        Self {
            timing: Timing::default(),
            ..self.clone()
        }
    }
}

struct OptReg(Option<RegId>);

impl fmt::Display for OptReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(r) => write!(f, "{r}"),
            None => write!(f, "?"),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode;
        let imm = self.imm;
        match self.category() {
            Category::FpAddSub | Category::FpMulDiv => write!(
                f,
                "{op} {}, {}, {}",
                OptReg(self.dest),
                OptReg(self.src1),
                OptReg(self.src2)
            ),
            Category::IntAlu => write!(
                f,
                "{op} {}, {}, {imm}",
                OptReg(self.dest),
                OptReg(self.src1)
            ),
            Category::Load => write!(
                f,
                "{op} {}, {imm}({})",
                OptReg(self.dest),
                OptReg(self.base)
            ),
            Category::Store => write!(
                f,
                "{op} {}, {imm}({})",
                OptReg(self.src1),
                OptReg(self.base)
            ),
            Category::Branch => write!(
                f,
                "{op} {}, {}, {imm}",
                OptReg(self.src1),
                OptReg(self.src2)
            ),
        }
    }
}
