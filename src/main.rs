//! kubepulse CLI entry point.

use kubepulse_lib::cli::{self, Cli};
use kubepulse_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
