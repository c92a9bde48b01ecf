mod check;
mod cli;
mod render;

use anyhow::Result;
use cli::Command;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = cli::parse();
    initialise_tracing();

    match cli.command {
        Command::Render(args) => render::run(args),
        Command::CheckShaders(args) => check::run(args),
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
