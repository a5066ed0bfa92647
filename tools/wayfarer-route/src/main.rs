use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wayfarer_route::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    cli.run()
}
