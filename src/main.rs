use anyhow::Result;
use clap::Parser;
use ttyscribe::{
    capture,
    cli::{Cli, Commands},
    index, init_tracing, pipeline,
};

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Convert(opts) => {
            pipeline::run_convert(opts)?;
        }
        Commands::Batch(opts) => {
            pipeline::run_batch(opts)?;
        }
        Commands::Render(opts) => {
            pipeline::run_render(opts)?;
        }
        Commands::Capture(opts) => {
            capture::run(opts)?;
        }
        Commands::Sessions(opts) => {
            index::run(opts)?;
        }
    }

    Ok(())
}
