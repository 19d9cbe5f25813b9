//! Clap derive structures for the `vigil` service binary.

use clap::{ArgAction, Parser};

/// vigil -- turns a device inventory into live monitoring configuration
#[derive(Debug, Parser)]
#[command(
    name = "vigil",
    version,
    about = "Generate poller configs and dashboards from a device inventory",
    long_about = "Discovers the structure of monitored device APIs and turns a\n\
        declarative inventory into poller config fragments, dashboard\n\
        definitions, and a secrets file for the polling agent.\n\n\
        Runs as a service with a periodic reconciliation timer and an HTTP\n\
        trigger surface; use --once for a single pass."
)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Run one reconciliation pass and exit (no HTTP surface, no timer)
    #[arg(long)]
    pub once: bool,

    /// Bind address for the trigger/health HTTP surface
    #[arg(long, env = "VIGIL_LISTEN_ADDR")]
    pub listen: Option<String>,
}
