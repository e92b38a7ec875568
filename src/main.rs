use anyhow::Context;
use clap::Parser;
use dca_journal::cli::{self, Cli, Commands};
use dca_journal::config::AppConfig;
use dca_journal::coordination::ShutdownHandle;
use dca_journal::exchange::{build_pricer, build_trader};
use dca_journal::persistence::{FileLog, TradeJournal};
use dca_journal::strategy::{DcaStrategy, StrategyStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod main_runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("loading config from {}", cli.config_dir.display()))?;

    match cli.command {
        Commands::Run => {
            main_runtime::init_logging(&config.logging);
            run_mode(&config).await?;
        }
        Commands::Reconcile => {
            main_runtime::init_logging(&config.logging);
            reconcile_mode(&config).await?;
        }
        Commands::Status { json } => {
            main_runtime::init_logging_simple();
            status_mode(&config, json)?;
        }
    }

    Ok(())
}

async fn run_mode(config: &AppConfig) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;

    let shutdown = ShutdownHandle::new();
    let pricer = build_pricer(config)?;
    let trader = build_trader(config, Arc::clone(&pricer))?;
    let mut strategy = DcaStrategy::open(config, trader, pricer, shutdown.token())?;

    info!(pair = %strategy.pair(), "starting DCA strategy");

    let tick_interval = Duration::from_secs(config.strategy.tick_interval_secs);
    let outcome = {
        let run = async {
            strategy.initialize().await?;
            strategy.run(tick_interval).await
        };
        tokio::pin!(run);

        let finished = tokio::select! {
            res = &mut run => Some(res),
            _ = main_runtime::shutdown_signal() => None,
        };

        match finished {
            Some(res) => res,
            None => {
                shutdown.trigger();
                // Let the in-flight tick observe cancellation and unwind
                run.await
            }
        }
    };

    if let Err(e) = strategy.close() {
        error!(error = %e, "failed to close journal");
    }

    match outcome {
        Ok(()) | Err(dca_journal::DcaError::Cancelled) => {
            info!("shutdown complete");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn reconcile_mode(config: &AppConfig) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;

    let shutdown = ShutdownHandle::new();
    let pricer = build_pricer(config)?;
    let trader = build_trader(config, Arc::clone(&pricer))?;
    let mut strategy = DcaStrategy::open(config, trader, pricer, shutdown.token())?;

    let report = tokio::select! {
        res = strategy.reconcile() => res,
        _ = main_runtime::shutdown_signal() => {
            shutdown.trigger();
            Err(dca_journal::DcaError::Cancelled)
        }
    };
    strategy.close()?;

    let report = report?;
    println!(
        "Reconciled {}: examined {}, applied {}, already applied {}, failed {}",
        strategy.pair(),
        report.examined,
        report.applied,
        report.already_applied,
        report.failed
    );
    Ok(())
}

fn status_mode(config: &AppConfig, json: bool) -> anyhow::Result<()> {
    let pair = &config.strategy.pair;
    let log = FileLog::open(config.journal.pair_dir(pair))?;
    let (mut journal, series) = TradeJournal::restore(Box::new(log), pair)?;
    let series = series.unwrap_or_default();

    let status = StrategyStatus::from_parts(pair, &series, &journal);
    let pending = journal.pending();

    if json {
        let out = serde_json::json!({ "status": status, "pending": pending });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        cli::print_status(&status, &pending);
    }

    journal.close()?;
    Ok(())
}
