use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod handlers;
mod provision;
mod style;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = handlers::run(cli) {
        eprintln!("{} Error: {e:#}", style::CROSS);
        std::process::exit(1);
    }
}
