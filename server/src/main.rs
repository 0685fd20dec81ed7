use clap::Parser;
use log::{error, info, warn};
use server::auth::{operator_gate, AuthStore, FileAuthStore, MemoryAuthStore};
use server::config::ServerConfig;
use server::network::Server;
use shared::{frames_per_second, Credentials, DEFAULT_PORT};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Credential table file; accounts stay in memory when omitted
    #[clap(short, long)]
    users_file: Option<PathBuf>,
    /// Directory of animation frames (*.txt, *.png, *.jpg, *.jpeg, played in name order)
    #[clap(long, default_value = "frames")]
    frames_dir: PathBuf,
    /// Delay between animation frames in milliseconds
    #[clap(long, default_value = "33")]
    frame_delay_ms: u64,
    /// Minimum interval between two accepted chat lines per client
    #[clap(long, default_value = "1000")]
    flood_interval_ms: u64,
    /// Operator pseudo checked before the server starts
    #[clap(long, default_value = "admin")]
    admin_pseudo: String,
    /// Operator password; the startup check is skipped when omitted
    #[clap(long)]
    admin_password: Option<String>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let operator = self.admin_password.map(|password| Credentials {
            pseudo: self.admin_pseudo,
            password,
        });

        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            users_file: self.users_file,
            frames_dir: self.frames_dir,
            frame_delay: Duration::from_millis(self.frame_delay_ms),
            flood_interval: Duration::from_millis(self.flood_interval_ms),
            operator,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config();
    let mut stdin = BufReader::new(tokio::io::stdin());

    match &config.operator {
        Some(expected) => {
            let supplied = prompt_operator(&mut stdin).await?;
            if !operator_gate(expected, &supplied) {
                println!("Wrong password or nickname, server shutdown.");
                return Ok(());
            }
            println!("Welcome Admin.");
        }
        None => warn!("No operator password configured, skipping the startup check"),
    }

    let store: Arc<dyn AuthStore> = match &config.users_file {
        Some(path) => Arc::new(FileAuthStore::open(path)?),
        None => {
            warn!("No users file configured, accounts will not survive a restart");
            Arc::new(MemoryAuthStore::new())
        }
    };

    info!(
        "Animation frames from {} at {:.1} fps",
        config.frames_dir.display(),
        frames_per_second(config.frame_delay)
    );

    let server = Server::bind(config, store).await?;
    let shutdown = server.shutdown_token();

    let mut console = server.console();
    let console_handle = tokio::spawn(async move {
        if let Err(e) = console.run(stdin, tokio::io::stdout()).await {
            error!("Console failed: {}", e);
        }
    });

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server failed: {}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }

    if let Err(e) = server_handle.await {
        error!("Server task panicked: {}", e);
    }
    console_handle.abort();

    Ok(())
}

async fn prompt_operator<R>(input: &mut R) -> std::io::Result<Credentials>
where
    R: AsyncBufRead + Unpin,
{
    let pseudo = prompt(input, "Enter nickname:  ").await?;
    let password = prompt(input, "Enter password:  ").await?;
    Ok(Credentials { pseudo, password })
}

async fn prompt<R>(input: &mut R, label: &str) -> std::io::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;

    let mut line = String::new();
    input.read_line(&mut line).await?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
