//! # Vals Secret Controller
//!
//! Entry point: initialize the runtime, then run the watch loops until a
//! shutdown signal arrives.

use anyhow::Result;
use tracing::info;
use vals_secret_controller::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(init.client, init.reconciler, init.server_state).await?;

    if let Some(token_manager) = init.token_manager {
        token_manager.abort();
        info!("Token lifecycle manager stopped");
    }

    Ok(())
}
