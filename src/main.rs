//! prom-sidecar CLI entry point.

use prom_sidecar::cli::{self, Cli};
use prom_sidecar::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
