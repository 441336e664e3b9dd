use anyhow::Result;
use clap::Parser;
use kubespray_deployer::cli::{run, Cli};

fn main() -> Result<()> {
    // Load environment
    dotenv::dotenv().ok();

    // Initialize tracing for the CLI.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let result = run(cli);
    match &result {
        Ok(_) => tracing::info!("CLI completed successfully"),
        Err(e) => tracing::error!(error = %e, "CLI exited with error"),
    }
    result
}
