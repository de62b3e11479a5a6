use std::{env::current_dir, fs::write, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use calproxy_core::{
    config::{Config, UpstreamArgs},
    metrics::NoMetrics,
    Pipeline,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Merge the calendars listed in an upstream index into a single iCalendar file.
#[derive(Debug, Parser)]
pub struct Arguments {
    #[command(flatten)]
    pub upstream: UpstreamArgs,
    /// the file to write, `calendar.ics` in the current directory by default
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Arguments::parse();
    let pipeline = Pipeline::new(&Config::from(&args.upstream), Arc::new(NoMetrics))?;
    let calendar = pipeline.run().await?;
    let path = match args.output {
        Some(path) => path,
        None => {
            let mut path = current_dir()?;
            path.push("calendar.ics");
            path
        }
    };
    write(&path, calendar).with_context(|| format!("write {}", path.display()))?;
    info!(path = %path.display(), "wrote calendar");
    Ok(())
}
