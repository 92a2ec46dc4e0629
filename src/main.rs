use anyhow::Context;
use clap::Parser;
use ribosieve::{
    args::{Cli, Runopts},
    pipeline,
};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let command_line = std::env::args().collect::<Vec<_>>().join(" ");
    let cli = Cli::parse();
    let opts = Runopts::from_cli(cli)?;
    pipeline::run(opts, &command_line).context("alignment run failed")?;
    Ok(())
}
