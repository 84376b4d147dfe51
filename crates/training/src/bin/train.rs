use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use training::{ConsoleReporter, Orchestrator, TrainArgs};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = TrainArgs::parse();
    let cfg = args.resolve().context("failed to resolve training config")?;
    let report = Orchestrator::new(cfg)
        .run(&ConsoleReporter)
        .context("training run failed")?;
    tracing::info!(path = %report.model_path.display(), "run finished");
    Ok(())
}
