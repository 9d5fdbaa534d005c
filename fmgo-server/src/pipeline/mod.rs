//! External processing pipeline.
//!
//! - [`config`]: per-run parameters derived from a tuning request
//! - [`command`]: the `rtl_fm`, `sox` and `ffmpeg` command lines
//! - [`chain`]: spawning, wiring and tearing down the three processes

pub mod chain;
pub mod command;
pub mod config;

pub use chain::{ChainSpawner, ProcessChain, SubprocessSpawner};
pub use command::StageCommand;
pub use config::{epoch_gain_override, PipelineConfig};
