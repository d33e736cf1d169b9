use anyhow::Result;
use clap::Parser;

use argo_resource_tracker::cli::{self, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cli::run(args).await
}
