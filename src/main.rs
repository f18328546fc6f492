use clap::Parser;
use clap_derive::Parser;
use hellowire::client::run_client;
use hellowire::config::{Capabilities, ClientConfig, DEFAULT_KEY_COUNT};
use std::time::Duration;
use tracing::Level;

#[derive(Parser)]
struct Args {
    server_address: String,
    server_port: u16,

    /// the hello to send, e.g. "HELLO ENC MUL PAR"
    message: Capabilities,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,

    /// give up if the server does not send a packet for this long; waits forever if omitted
    #[clap(long)]
    receive_timeout_ms: Option<u64>,

    #[clap(long, default_value_t = DEFAULT_KEY_COUNT)]
    key_count: usize,
}

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = ClientConfig::new(args.server_address, args.server_port, args.message);
    config.receive_timeout = args.receive_timeout_ms.map(Duration::from_millis);
    config.key_count = args.key_count;

    let outcome = run_client(&config).await?;
    if let Some(last) = outcome.final_message() {
        println!("{}", last);
    }
    Ok(())
}
