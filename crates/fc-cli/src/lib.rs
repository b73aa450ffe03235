//! Geofenced time tracking CLI library.
//!
//! This crate provides the CLI interface over the tracking engine.

mod cli;
pub mod commands;
mod config;

pub use cli::{AddRegionArgs, Cli, Commands, RegionAction, UpdateRegionArgs};
pub use config::Config;
