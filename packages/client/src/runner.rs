//! Client execution logic with reconnection support.

use kumitate_shared::backoff::{Backoff, BackoffConfig};
use std::time::Duration;

use super::{
    domain::{should_attempt_reconnect, should_exit_immediately, should_reset_backoff},
    error::ClientError,
    session::{ClientOptions, run_client_session},
    ui::spawn_readline,
};

const MAX_RECONNECT_ATTEMPTS: u32 = 5;

fn reconnect_backoff() -> BackoffConfig {
    BackoffConfig {
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(10),
        max_retries: MAX_RECONNECT_ATTEMPTS,
        ..BackoffConfig::default()
    }
}

/// Run the client, reconnecting with jittered backoff until the user quits.
pub async fn run_client(options: ClientOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut input = spawn_readline(options.display_name.clone());
    let mut backoff = Backoff::new(reconnect_backoff());

    loop {
        tracing::info!(
            "Connecting to {} as '{}' (session '{}', puzzle '{}')",
            options.url,
            options.user_id,
            options.session_id,
            options.puzzle_id
        );

        let error = match run_client_session(&options, &mut input).await {
            Ok(()) => {
                tracing::info!("Client session ended normally");
                return Ok(());
            }
            Err(e) => e,
        };

        if should_exit_immediately(&error) {
            tracing::error!("{}", error);
            return Err(Box::new(error));
        }
        if should_reset_backoff(&error) {
            backoff.reset();
        }

        tracing::warn!("{}", error);
        let delay = backoff.next_delay();
        if !should_attempt_reconnect(&error, delay.is_some()) {
            tracing::error!(
                "Failed to reconnect after {} attempts. Exiting.",
                MAX_RECONNECT_ATTEMPTS
            );
            return Err(Box::new(ClientError::ConnectionError(format!(
                "gave up after {} attempts",
                MAX_RECONNECT_ATTEMPTS
            ))));
        }
        if let Some(delay) = delay {
            tracing::info!(
                "Reconnecting in {:?}... (attempt {}/{})",
                delay,
                backoff.retries(),
                MAX_RECONNECT_ATTEMPTS
            );
            tokio::time::sleep(delay).await;
        }
    }
}
