use anyhow::Result;
use clap::{Parser, Subcommand};
use meetmig_sync::MigrateArgs;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "meetmig")]
#[command(about = "Migrate meetings from Attio into HubSpot")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create missing meetings and repair associations on existing ones.
    Migrate {
        /// Earliest start date (YYYY-MM-DD or RFC 3339); defaults to the lookback window.
        since: Option<String>,
        /// Write changes. Without this flag the run only reports what it would do.
        #[arg(long, conflicts_with = "dry_run")]
        apply: bool,
        #[arg(long)]
        dry_run: bool,
        /// Latest start date to migrate; defaults to now.
        #[arg(long)]
        until: Option<String>,
        /// Pair leftover meetings by title and date similarity.
        #[arg(long)]
        fuzzy: bool,
    },
    /// Show which meetings correlate, without writing anything.
    Match { since: Option<String> },
    /// Dump one source meeting as fetched and as normalized.
    Inspect {
        meeting_id: String,
        #[arg(long)]
        transcripts: bool,
    },
    /// Summarize recent runs from the reports directory.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate {
            since,
            apply,
            dry_run: _,
            until,
            fuzzy,
        } => {
            let summary = meetmig_sync::run_migration_from_env(&MigrateArgs {
                since,
                until,
                apply,
                fuzzy,
            })
            .await?;
            let t = &summary.tally;
            println!(
                "migration complete ({:?}): run_id={} processed={} created={} existing={} fuzzy={} associations={} association_failures={} bodies_upgraded={} skipped={} errors={}",
                summary.mode,
                summary.run_id,
                t.processed,
                t.created,
                t.already_present,
                t.fuzzy_matched,
                t.associations_added,
                t.association_failures,
                t.bodies_upgraded,
                t.skipped_total(),
                t.errors,
            );
            for (reason, count) in &t.skipped {
                println!("  skipped {reason}: {count}");
            }
            if let Some(dir) = &summary.reports_dir {
                println!("reports: {dir}");
            }
        }
        Commands::Match { since } => {
            let report = meetmig_sync::run_match_from_env(since.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Inspect {
            meeting_id,
            transcripts,
        } => {
            let inspection =
                meetmig_sync::inspect_meeting_from_env(&meeting_id, transcripts).await?;
            println!("{}", serde_json::to_string_pretty(&inspection)?);
        }
        Commands::Report { runs } => {
            println!("{}", meetmig_sync::report_runs_from_env(runs).await?);
        }
    }

    Ok(())
}
