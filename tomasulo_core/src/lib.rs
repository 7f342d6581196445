pub mod asm;
pub mod branch;
pub mod cache;
pub mod common;
pub mod completion;
pub mod config;
pub mod instr;
pub mod lsb;
pub mod memory;
pub mod reg_file;
pub mod register;
pub mod sim;
pub mod state;
pub mod station;
pub mod station_pool;

#[cfg(feature = "stat")]
pub mod stat;
