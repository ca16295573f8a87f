use clap::Parser;
use client::input::ScriptedInput;
use client::network::{Client, ClientError};
use log::info;
use shared::demo::DemoWorld;
use shared::LockstepConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Tick period in milliseconds; must match the server
    #[arg(short, long, default_value = "100")]
    tick_ms: u64,

    /// Sub-steps per tick; must match the server
    #[arg(long, default_value = "10")]
    sub_steps: u32,

    /// Most sub-steps performed in one frame
    #[arg(short, long, default_value = "10")]
    max_slices: u32,

    /// Input heartbeat period in milliseconds
    #[arg(long, default_value = "100")]
    heartbeat_ms: u64,

    /// Frame period in milliseconds
    #[arg(short, long, default_value = "16")]
    frame_ms: u64,

    /// Seed for the scripted player; random when omitted
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = LockstepConfig {
        tick_period: Duration::from_millis(args.tick_ms),
        sub_steps_per_tick: args.sub_steps,
        max_slices_per_frame: args.max_slices,
        heartbeat_period: Duration::from_millis(args.heartbeat_ms),
        ..LockstepConfig::default()
    };

    let seed = args.seed.unwrap_or_else(rand::random);
    info!("Connecting to: {}", args.server);
    info!("Scripted player seed: {}", seed);

    let mut client = Client::<DemoWorld, _>::new(
        &args.server,
        ScriptedInput::new(seed),
        config,
        Duration::from_millis(args.frame_ms),
    )
    .await?;

    client.run().await?;

    Ok(())
}
