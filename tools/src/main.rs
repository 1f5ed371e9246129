//! Runs a committee of fast finality nodes in a single process, until every node commits
//! the target height.
use anyhow::Context as _;
use clap::Parser;
use fastfinality_concurrency::ctx;
use fastfinality_tools::{localnet, AppConfig};
use std::{fs, io::IsTerminal as _, path::PathBuf};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{prelude::*, Registry};
use vise_exporter::MetricsExporter;

/// Command-line application launching a local committee.
#[derive(Debug, Parser)]
struct Args {
    /// Path to a JSON file with the localnet configuration.
    #[arg(long, default_value = "localnet.json")]
    config_file: PathBuf,
    /// Write a fresh configuration with this many members to `config_file` and exit.
    #[arg(long, conflicts_with = "verify_config")]
    generate: Option<usize>,
    /// Verify the configuration instead of running the committee.
    #[arg(long)]
    verify_config: bool,
    /// Directory of the debug log.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    fs::create_dir_all(&args.log_dir).context("create_dir_all()")?;
    let log_file = fs::File::create(args.log_dir.join("output.log")).context("File::create()")?;

    // Human-readable logs of INFO or higher on stdout.
    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_ansi(std::env::var("NO_COLOR").is_err() && std::io::stdout().is_terminal())
        .with_file(false)
        .with_line_number(false)
        .with_filter(LevelFilter::INFO);

    // Machine-readable logs of DEBUG or higher in the log file.
    let file_log = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(LevelFilter::DEBUG);

    let subscriber = Registry::default().with(stdout_log).with(file_log);
    tracing::subscriber::set_global_default(subscriber).context("set_global_default()")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let ctx = &ctx::root();

    if let Some(members) = args.generate {
        anyhow::ensure!(members > 0, "at least one member is required");
        return AppConfig::generate(&mut ctx.rng(), members).write(&args.config_file);
    }
    let cfg = AppConfig::read(&args.config_file).context("config")?;
    if args.verify_config {
        return Ok(());
    }
    init_logging(&args)?;
    tracing::info!("running {} members until {}", cfg.members.len(), cfg.target_height);

    if let Some(addr) = cfg.metrics_server_addr {
        let (metrics_ctx, _) = ctx.fork();
        tokio::spawn(async move {
            let res = MetricsExporter::default()
                .with_graceful_shutdown(async move { metrics_ctx.canceled().await })
                .start(addr)
                .await;
            if let Err(err) = res {
                tracing::error!("metrics exporter: {err}");
            }
        });
    }

    tokio::select! {
        res = localnet::run(ctx, &cfg) => {
            let outcome = res.context("localnet")?;
            for (i, view_sequences) in outcome.view_sequences.iter().enumerate() {
                let view = view_sequences.view().get_latest_view();
                tracing::info!("node {i}: {} view sequences, latest view has {} members", view_sequences.view().len(), view.members().len());
            }
        }
        res = tokio::signal::ctrl_c() => {
            res.context("ctrl_c()")?;
            tracing::info!("interrupted");
        }
    }
    Ok(())
}
