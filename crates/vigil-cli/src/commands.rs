use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use vigil_ledger::{AuditLedger, CancellationToken, HealthStatus, IntegrityReport};
use vigil_server::{open_ledger, ServerConfig, VigilServer};
use vigil_types::{AuditEntry, NewEntry, TimeRange};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let format = cli.format;
    match cli.command {
        Command::Serve(args) => cmd_serve(config, args).await,
        Command::Record(args) => cmd_record(&open(&config)?, args, format).await,
        Command::Verify(args) => cmd_verify(&open(&config)?, args, format).await,
        Command::Export(args) => cmd_export(&open(&config)?, args, format).await,
        Command::Stats(args) => cmd_stats(&open(&config)?, args, format).await,
        Command::Emergency(args) => cmd_emergency(&open(&config)?, args, format).await,
        Command::Health => cmd_health(&open(&config)?, format).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn open(config: &ServerConfig) -> anyhow::Result<AuditLedger> {
    open_ledger(config).with_context(|| format!("opening ledger in {}", config.data_dir.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_entry(entry: &AuditEntry) {
    let outcome = if entry.success { "✓".green() } else { "✗".red() };
    let patient = entry.patient_id.as_deref().unwrap_or("-");
    println!(
        "{} {}  patient {}  {}",
        outcome,
        entry.summary(),
        patient.cyan(),
        entry.hash.short_hex().dimmed()
    );
}

async fn cmd_serve(mut config: ServerConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config.bind_addr = bind.parse().with_context(|| format!("invalid bind address `{bind}`"))?;
    }
    let server = VigilServer::open(config)?;
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
        }
        shutdown.cancel();
    });
    println!(
        "Vigil server on {} (data: {})",
        server.config().bind_addr.to_string().bold(),
        server.config().data_dir.display()
    );
    server.serve().await?;
    Ok(())
}

async fn cmd_record(ledger: &AuditLedger, args: RecordArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut candidate = NewEntry::new(args.actor, args.actor_type, args.action, args.resource);
    if let Some(patient) = args.patient {
        candidate = candidate.with_patient(patient);
    }
    if let Some(resource_id) = args.resource_id {
        candidate = candidate.with_resource_id(resource_id);
    }
    if let Some(message) = args.failed {
        candidate = candidate.failed(message);
    }
    for (key, value) in args.meta {
        candidate = candidate.with_metadata(key, value);
    }

    let entry = ledger.create(candidate).await?;
    match format {
        OutputFormat::Json => print_json(&entry)?,
        OutputFormat::Text => {
            println!("{} Entry recorded", "✓".green().bold());
            println!("  Sequence: {}", entry.sequence_number.to_string().yellow());
            println!("  Id: {}", entry.id);
            println!("  Hash: {}", entry.hash.to_hex().dimmed());
        }
    }
    Ok(())
}

async fn cmd_verify(ledger: &AuditLedger, args: RangeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let report = if args.is_open() {
        ledger.verify_all(&cancel).await?
    } else {
        let range = TimeRange::from_bounds(args.from, args.to)?;
        ledger.verify_integrity(range, &cancel).await?
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_report(&report),
    }
    if !report.is_valid() {
        bail!("integrity check failed with {} violation(s)", report.violations.len());
    }
    Ok(())
}

fn print_report(report: &IntegrityReport) {
    let window = match report.window {
        Some((first, last)) => format!("#{first}..#{last}"),
        None => "empty".to_string(),
    };
    if report.is_valid() {
        println!("{} Ledger integrity verified", "✓".green().bold());
        println!("  Window: {}", window);
        println!("  Entries checked: {}", report.entries_checked);
        println!("  Hash chain: {}", "intact".green());
        return;
    }
    println!("{} Ledger integrity violated", "✗".red().bold());
    println!("  Window: {}", window);
    println!("  Entries checked: {}", report.entries_checked);
    for v in &report.violations {
        let id = v.entry_id.as_ref().map(|id| id.to_string()).unwrap_or_default();
        println!(
            "  {} #{} {} expected {} found {}",
            v.kind.to_string().red(),
            v.sequence,
            id.dimmed(),
            v.expected,
            v.actual
        );
    }
}

async fn cmd_export(ledger: &AuditLedger, args: ExportArgs, format: OutputFormat) -> anyhow::Result<()> {
    let entries = ledger.export_subject_history(&args.patient_id).await?;
    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Text => {
            println!(
                "History for {}: {} entries",
                args.patient_id.cyan().bold(),
                entries.len()
            );
            entries.iter().for_each(print_entry);
        }
    }
    Ok(())
}

async fn cmd_stats(ledger: &AuditLedger, args: RangeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let range = TimeRange::from_bounds(args.from, args.to)?;
    let stats = ledger.get_stats(range).await?;
    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Text => {
            println!("Entries: {}", stats.total_entries.to_string().bold());
            println!("Failed: {}", stats.failed_count);
            println!("Unique actors: {}", stats.unique_actors);
            for (action, n) in &stats.by_action {
                println!("  {:<20} {}", action.as_str(), n);
            }
            for (resource, n) in &stats.by_resource {
                println!("  {:<20} {}", resource.as_str(), n);
            }
        }
    }
    Ok(())
}

async fn cmd_emergency(ledger: &AuditLedger, args: EmergencyArgs, format: OutputFormat) -> anyhow::Result<()> {
    let records = ledger.emergency_records(args.limit).await?;
    match format {
        OutputFormat::Json => print_json(&records)?,
        OutputFormat::Text if records.is_empty() => println!("No emergency records."),
        OutputFormat::Text => {
            for r in &records {
                println!(
                    "{} {} [{}] {}",
                    "!".yellow().bold(),
                    r.timestamp.to_rfc3339(),
                    r.failing_stage.to_string().yellow(),
                    r.error_message
                );
            }
        }
    }
    Ok(())
}

async fn cmd_health(ledger: &AuditLedger, format: OutputFormat) -> anyhow::Result<()> {
    let health = ledger.health();
    let head = ledger.head().await?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "health": health, "head": head }))?,
        OutputFormat::Text => {
            let status = match health.status {
                HealthStatus::Nominal => "nominal".green(),
                HealthStatus::Degraded => "degraded".red(),
            };
            let (primary, emergency) = ledger.store_names();
            println!("Status: {}", status.bold());
            println!("Primary: {}  Emergency: {}", primary, emergency);
            if let Some(replica) = &health.replica {
                println!("Replica: {}", replica);
            }
            match head {
                Some(h) => println!("Head: #{} {}", h.sequence, h.hash.short_hex().dimmed()),
                None => println!("Head: {}", "empty ledger".dimmed()),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn cli(dir: &std::path::Path, args: &[&str]) -> Cli {
        let mut argv = vec!["vigil", "--data-dir", dir.to_str().unwrap()];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[tokio::test]
    async fn record_then_verify_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let record = [
            "record", "--actor", "D1", "--actor-type", "doctor", "--action", "read",
            "--resource", "medical_record", "--patient", "P1",
        ];
        run_command(cli(dir.path(), &record)).await.unwrap();
        run_command(cli(dir.path(), &record)).await.unwrap();
        run_command(cli(dir.path(), &["verify"])).await.unwrap();
        run_command(cli(dir.path(), &["--format", "json", "export", "P1"])).await.unwrap();

        let ledger = open(&load_config(&cli(dir.path(), &["health"])).unwrap()).unwrap();
        assert_eq!(ledger.head().await.unwrap().map(|h| h.sequence), Some(2));
    }

    #[tokio::test]
    async fn invalid_record_fails_and_leaves_emergency_trail() {
        let dir = tempfile::tempdir().unwrap();
        let bad = [
            "record", "--actor", "D1", "--actor-type", "doctor", "--action", "read",
            "--resource", "lab_result",
        ];
        assert!(run_command(cli(dir.path(), &bad)).await.is_err());

        let ledger = open(&load_config(&cli(dir.path(), &["health"])).unwrap()).unwrap();
        assert!(ledger.head().await.unwrap().is_none());
        assert_eq!(ledger.emergency_records(None).await.unwrap().len(), 1);
    }

    #[test]
    fn data_dir_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&cli(dir.path(), &["health"])).unwrap();
        assert_eq!(config.data_dir, dir.path());
    }
}
