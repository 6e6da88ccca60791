//! Layered batch configuration
//!
//! Three layers, later layers win:
//! 1. Built-in defaults
//! 2. Config file (`--config`, or `ep-batch.toml` in the input directory)
//! 3. CLI flags

mod defaults;
mod effective;
mod merge;

pub use defaults::{BuiltinDefaults, DEFAULT_CSV_NAME};
pub use effective::{
    BatchConfig, ConfigError, ConfigOrigin, ConfigSource, DiscoveryConfig, EffectiveConfig,
    ReportConfig, CONFIG_FILE_NAME,
};
pub use merge::{deep_merge, merge_layers};
