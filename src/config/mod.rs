// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - `model.rs`: the TOML-backed data model, raw and validated.
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: turning a raw config into a validated one.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, CronCommand, CronCommandConfig, CronTrigger, RawConfigFile, SchedulerSection,
    SchedulerSettings,
};
pub use validate::parse_duration;
