use std::{collections::BTreeMap, io::Read};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    cache::CacheGeometry,
    instr::Opcode,
    lsb::DEFAULT_LSB_SIZE,
    register::RegId,
    station::UnitKind,
    station_pool::StationCounts,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cache block size must be positive")]
    ZeroBlockSize,
    #[error("cache of {size} bytes cannot hold a single {block_size}-byte block")]
    CacheTooSmall { size: usize, block_size: usize },
    #[error("no {0} stations configured")]
    EmptyPool(&'static str),
    #[error("load/store buffer needs at least one entry")]
    EmptyBuffer,
    #[error("unknown mnemonic `{0}` in latency table")]
    UnknownMnemonic(String),
    #[error("unknown register `{0}`")]
    UnknownRegister(String),
    #[error("memory cell at {addr} has size {size}, expected 1 to 8 bytes")]
    BadCellSize { addr: i64, size: usize },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemoryCell {
    pub addr: i64,
    pub value: f64,
    #[serde(default = "default_cell_size")]
    pub size: usize,
}

fn default_cell_size() -> usize {
    8
}

/// everything a run can be tuned with. every field has a default, so an
/// empty JSON object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub stations: StationCounts,
    pub lsb_size: usize,
    pub cache: CacheGeometry,
    /// overrides by mnemonic, e.g. `"MUL.D": 4`
    pub latencies: BTreeMap<String, usize>,
    /// initial register values by name, e.g. `"R1": 8`
    pub registers: BTreeMap<String, f64>,
    pub memory: Vec<MemoryCell>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            stations: StationCounts::default(),
            lsb_size: DEFAULT_LSB_SIZE,
            cache: CacheGeometry::default(),
            latencies: BTreeMap::new(),
            registers: BTreeMap::new(),
            memory: Vec::new(),
        }
    }
}

pub(crate) struct Resolved {
    pub latencies: Vec<(Opcode, usize)>,
    pub registers: Vec<(RegId, f64)>,
}

impl SimConfig {
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }
    pub fn from_reader(r: impl Read) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(r)?)
    }
    pub(crate) fn resolve(&self) -> Result<Resolved, ConfigError> {
        validate_geometry(&self.cache)?;
        validate_counts(&self.stations)?;
        if self.lsb_size == 0 {
            return Err(ConfigError::EmptyBuffer);
        }
        for cell in &self.memory {
            if cell.size == 0 || cell.size > 8 {
                return Err(ConfigError::BadCellSize {
                    addr: cell.addr,
                    size: cell.size,
                });
            }
        }
        let latencies = self
            .latencies
            .iter()
            .map(|(name, cycles)| {
                Opcode::try_from(name.as_str())
                    .map(|op| (op, *cycles))
                    .map_err(|_| ConfigError::UnknownMnemonic(name.clone()))
            })
            .collect::<Result<_, _>>()?;
        let registers = self
            .registers
            .iter()
            .map(|(name, value)| {
                RegId::try_from(name.as_str())
                    .map(|r| (r, *value))
                    .map_err(|_| ConfigError::UnknownRegister(name.clone()))
            })
            .collect::<Result<_, _>>()?;
        Ok(Resolved {
            latencies,
            registers,
        })
    }
}

pub(crate) fn validate_geometry(g: &CacheGeometry) -> Result<(), ConfigError> {
    if g.block_size == 0 {
        return Err(ConfigError::ZeroBlockSize);
    }
    if g.size < g.block_size {
        return Err(ConfigError::CacheTooSmall {
            size: g.size,
            block_size: g.block_size,
        });
    }
    Ok(())
}

pub(crate) fn validate_counts(c: &StationCounts) -> Result<(), ConfigError> {
    match UnitKind::ALL.into_iter().find(|u| c.get(*u) == 0) {
        Some(u) => Err(ConfigError::EmptyPool(u.prefix())),
        None => Ok(()),
    }
}
