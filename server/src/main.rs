use clap::Parser;
use log::info;
use server::network::{Server, ServerError};
use shared::demo::DemoAuthority;
use shared::LockstepConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick period in milliseconds
    #[arg(short, long, default_value = "100")]
    tick_ms: u64,

    /// Sub-steps clients spread each tick across
    #[arg(short, long, default_value = "10")]
    sub_steps: u32,

    /// Number of past checksums kept for desync detection
    #[arg(long, default_value = "256")]
    history: usize,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value = "5")]
    timeout_secs: u64,

    /// Maximum concurrent clients
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Arena seed; random when omitted
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = LockstepConfig {
        tick_period: Duration::from_millis(args.tick_ms),
        sub_steps_per_tick: args.sub_steps,
        history_window: args.history,
        peer_timeout: Duration::from_secs(args.timeout_secs),
        ..LockstepConfig::default()
    };

    let seed = args.seed.unwrap_or_else(rand::random);
    info!(
        "Starting server at {:.1}Hz, {} sub-steps per tick, seed {}",
        config.tick_rate(),
        config.sub_steps_per_tick,
        seed
    );

    let world = DemoAuthority::new(seed, config.sub_steps_per_tick);
    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, world, config, args.max_clients).await?;

    server.run().await?;

    Ok(())
}
