use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mb_bench::{Cli, Driver};

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.into_config().context("failed to load configuration")?;
    tracing::info!(
        size = config.size,
        variants = config.variants.len(),
        "mb-bench v{}",
        env!("CARGO_PKG_VERSION")
    );

    let driver = Driver::new(config)?;
    driver
        .run_with(|result| println!("{}", result))
        .context("benchmark run failed")?;
    Ok(())
}
