use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fpp_core::{locale, DateRange};
use fpp_sync::{maybe_build_scheduler, run_migration, PipelineConfig, SyncPipeline};

#[derive(Parser)]
#[command(name = "fpp", about = "Fund position report pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, parse and load the configured window once.
    Sync,
    /// Migrate primary-store data into the warehouse.
    Migrate {
        /// First reference date (inclusive), e.g. 2025-03-01.
        #[arg(long)]
        from: Option<String>,
        /// Last reference date (inclusive); defaults to `from`.
        #[arg(long)]
        to: Option<String>,
    },
    /// Run syncs on the configured cron schedule until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    let config = PipelineConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = SyncPipeline::connect(config)
                .await?
                .with_notifier(Box::new(fpp_sync::LogNotifier))
                .run_once()
                .await?;
            println!(
                "run {}: {} listados, {} baixados, {} interpretados, {} registros em {} fatias",
                summary.run_id,
                summary.files_listed,
                summary.files_downloaded,
                summary.files_parsed,
                summary.records_loaded,
                summary.slices_written,
            );
            if !summary.clean() {
                println!(
                    "pendências: {} arquivos ignorados, {} falhas de carga",
                    summary.skipped_files.len(),
                    summary.load_failures.len(),
                );
            }
        }
        Commands::Migrate { from, to } => {
            let range = match (from, to) {
                (Some(from), to) => {
                    let start = locale::parse_date(&from)
                        .ok()
                        .with_context(|| format!("invalid --from date {from:?}"))?;
                    let end = match to {
                        Some(to) => locale::parse_date(&to)
                            .ok()
                            .with_context(|| format!("invalid --to date {to:?}"))?,
                        None => start,
                    };
                    Some(DateRange { start, end })
                }
                (None, Some(_)) => anyhow::bail!("--to requires --from"),
                (None, None) => None,
            };
            for result in run_migration(&config, range).await? {
                println!(
                    "{}: {} lidas, {} migradas, {} ignoradas, partições: {}",
                    result.label,
                    result.rows_read,
                    result.rows_migrated,
                    result.skipped.len(),
                    result.partitions.join(", "),
                );
            }
        }
        Commands::Schedule => match maybe_build_scheduler(&config).await? {
            Some(scheduler) => {
                scheduler.start().await.context("starting scheduler")?;
                println!("agendador ativo; Ctrl-C encerra");
                tokio::signal::ctrl_c().await.context("waiting for shutdown")?;
            }
            None => println!("FPP_SYNC_CRON não definido; nada a agendar"),
        },
    }
    Ok(())
}
