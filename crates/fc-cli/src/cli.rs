//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Geofenced time tracking.
///
/// Clocks workers in and out automatically as they enter and leave job
/// sites, with manual overrides and an audit trail.
#[derive(Debug, Parser)]
#[command(name = "fc", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage job site geofences.
    #[command(subcommand)]
    Region(RegionAction),

    /// Clock in manually at a region.
    ClockIn {
        /// Region ID.
        #[arg(long)]
        region: String,

        /// Clock-in time (RFC 3339 or relative like "2 hours ago"). Defaults to now.
        #[arg(long)]
        at: Option<String>,
    },

    /// Clock out of the open time entry.
    ClockOut {
        /// Clock-out time (RFC 3339 or relative like "2 hours ago"). Defaults to now.
        #[arg(long)]
        at: Option<String>,
    },

    /// Show the current membership and open time entry.
    Status,

    /// Show time entries, most recent first.
    History {
        /// Maximum number of entries.
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the audit log, most recent first.
    Audit {
        /// Maximum number of events.
        #[arg(long, default_value = "50")]
        limit: usize,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Process one location sample.
    Ingest {
        /// Latitude in degrees.
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        /// Longitude in degrees.
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,

        /// Horizontal accuracy in meters.
        #[arg(long, default_value = "0")]
        accuracy: f64,

        /// Sample time (RFC 3339 or relative). Defaults to now.
        #[arg(long)]
        at: Option<String>,

        /// Output transitions as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Process a JSONL location stream from stdin until EOF.
    Monitor,
}

/// Region management actions.
#[derive(Debug, Subcommand)]
pub enum RegionAction {
    /// Add a region.
    Add(AddRegionArgs),

    /// List regions in the configured scope.
    List {
        /// Include deactivated regions.
        #[arg(long)]
        all: bool,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Change fields of a region.
    Update(UpdateRegionArgs),

    /// Remove a region. Time entries that reference it are kept.
    Remove {
        /// Region ID.
        id: String,
    },
}

#[derive(Debug, Args)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "each bool is an independent CLI flag"
)]
pub struct AddRegionArgs {
    #[arg(long)]
    pub name: String,

    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    /// Radius in meters.
    #[arg(long)]
    pub radius: f64,

    /// Attach the region to a project.
    #[arg(long)]
    pub project: Option<String>,

    /// Do not clock in on entry.
    #[arg(long)]
    pub no_auto_clock_in: bool,

    /// Do not clock out on exit.
    #[arg(long)]
    pub no_auto_clock_out: bool,

    /// Send an alert on entry.
    #[arg(long)]
    pub entry_alert: bool,

    /// Send an alert on exit.
    #[arg(long)]
    pub exit_alert: bool,
}

#[derive(Debug, Default, Args)]
pub struct UpdateRegionArgs {
    /// Region ID.
    pub id: String,

    #[arg(long)]
    pub name: Option<String>,

    /// New center latitude. Requires --lon.
    #[arg(long, allow_negative_numbers = true, requires = "lon")]
    pub lat: Option<f64>,

    /// New center longitude. Requires --lat.
    #[arg(long, allow_negative_numbers = true, requires = "lat")]
    pub lon: Option<f64>,

    #[arg(long)]
    pub radius: Option<f64>,

    /// Attach the region to a project.
    #[arg(long, conflicts_with = "clear_project")]
    pub project: Option<String>,

    /// Detach the region from its project.
    #[arg(long)]
    pub clear_project: bool,

    #[arg(long)]
    pub auto_clock_in: Option<bool>,

    #[arg(long)]
    pub auto_clock_out: Option<bool>,

    #[arg(long)]
    pub entry_alert: Option<bool>,

    #[arg(long)]
    pub exit_alert: Option<bool>,

    /// Activate or deactivate the region.
    #[arg(long)]
    pub active: Option<bool>,
}
