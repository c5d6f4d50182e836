use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use vigil_types::{ActorType, AuditAction, AuditResource};

#[derive(Parser)]
#[command(
    name = "vigil",
    about = "Vigil: tamper-evident audit ledger for healthcare access events",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Ledger data directory (overrides the config file)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Record one audit entry
    Record(RecordArgs),
    /// Verify ledger integrity
    Verify(RangeArgs),
    /// Export every entry naming a patient
    Export(ExportArgs),
    /// Show aggregate statistics
    Stats(RangeArgs),
    /// List emergency records awaiting reconciliation
    Emergency(EmergencyArgs),
    /// Show store health and the chain head
    Health,
}

#[derive(Args)]
pub struct ServeArgs {
    /// Listen address (overrides the config file)
    #[arg(long)]
    pub bind: Option<String>,
}

#[derive(Args)]
pub struct RecordArgs {
    #[arg(long)]
    pub actor: String,
    #[arg(long, value_parser = parse_wire::<ActorType>)]
    pub actor_type: ActorType,
    #[arg(long, value_parser = parse_wire::<AuditAction>)]
    pub action: AuditAction,
    #[arg(long, value_parser = parse_wire::<AuditResource>)]
    pub resource: AuditResource,
    #[arg(long)]
    pub patient: Option<String>,
    #[arg(long)]
    pub resource_id: Option<String>,
    /// Mark the audited action as failed, with this error message
    #[arg(long)]
    pub failed: Option<String>,
    /// Metadata pair, repeatable
    #[arg(long = "meta", value_parser = parse_meta)]
    pub meta: Vec<(String, String)>,
}

#[derive(Args)]
pub struct RangeArgs {
    /// RFC 3339 start, inclusive
    #[arg(long)]
    pub from: Option<DateTime<Utc>>,
    /// RFC 3339 end, inclusive
    #[arg(long)]
    pub to: Option<DateTime<Utc>>,
}

impl RangeArgs {
    pub fn is_open(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }
}

#[derive(Args)]
pub struct ExportArgs {
    pub patient_id: String,
}

#[derive(Args)]
pub struct EmergencyArgs {
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

fn parse_wire<T>(s: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    s.parse().map_err(|e: T::Err| e.to_string())
}

fn parse_meta(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got `{s}`")),
    }
}
