//! Kumitate terminal client.
//!
//! Joins a session and moves pieces with typed commands (`help` lists them).
//! Reconnects with backoff when the connection drops; a refused join exits.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin kumitate-client -- --user alice
//! cargo run --bin kumitate-client -- -u bob --name Bob --session s1 --puzzle demo-2x2
//! ```

use clap::Parser;

use kumitate_client::{ClientOptions, run_client};
use kumitate_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "kumitate-client")]
#[command(about = "Terminal client for collaborative jigsaw sessions", long_about = None)]
struct Args {
    /// WebSocket server URL
    #[arg(long, env = "KUMITATE_URL", default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Session to join (created on first join)
    #[arg(short = 's', long, env = "KUMITATE_SESSION", default_value = "lobby")]
    session: String,

    /// Puzzle of the session
    #[arg(short = 'p', long, env = "KUMITATE_PUZZLE", default_value = "demo-2x2")]
    puzzle: String,

    /// User ID
    #[arg(short = 'u', long, env = "KUMITATE_USER")]
    user: String,

    /// Display name (defaults to the user ID)
    #[arg(short = 'n', long, env = "KUMITATE_NAME")]
    name: Option<String>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();
    let options = ClientOptions {
        url: args.url,
        session_id: args.session,
        puzzle_id: args.puzzle,
        display_name: args.name.unwrap_or_else(|| args.user.clone()),
        user_id: args.user,
    };

    if let Err(e) = run_client(options).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
