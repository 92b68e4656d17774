//! randao-relay CLI entry point

use clap::Parser;
use randao_relay::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = cli.logs.init() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }

    if let Err(err) = cli.run().await {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
