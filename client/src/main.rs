use clap::Parser;
use client::network::{Client, SessionEnd};
use log::info;
use shared::DEFAULT_PORT;
use tokio::io::BufReader;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let client = match Client::connect(&args.server).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(());
        }
    };

    let end = client
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;

    match end {
        SessionEnd::Registered => info!("Account created, reconnect to log in"),
        SessionEnd::Rejected(reason) => info!("Handshake refused: {}", reason),
        SessionEnd::Exited | SessionEnd::ServerClosed => info!("Session closed"),
    }

    Ok(())
}
