use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    let cli = powerball_cli::Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    powerball_cli::run_cli(cli)
}

fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = match verbose {
        0 => "warn,powerball_cli=info",
        1 => "info,powerball_cli=debug,powerball_store_sqlite=debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
