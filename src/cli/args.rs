use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(about = "Relays drone video and telemetry to WebSocket clients")]
pub struct MainArgs {
    /// The path to the config file for the relay
    #[clap(long, short)]
    pub config: Option<PathBuf>,

    /// Drive the real platform instead of the simulator from startup
    #[clap(long)]
    pub hardware: bool,
}
