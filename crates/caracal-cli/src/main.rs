mod cli;
mod exit_codes;

use clap::Parser;
use cli::args::Cli;
use cli::commands::dispatch;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("caracal=info")))
        .init();

    let cli = Cli::parse();
    let code = dispatch(cli.command);
    std::process::exit(code);
}
