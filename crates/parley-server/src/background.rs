//! Background tasks for the Parley server.
//!
//! Includes:
//! - Releasing voice claims orphaned between claim and rollback.

use crate::AppState;
use parley_conversations::reset_stale_claims;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Starts the stale-claim sweeper.
///
/// A claim normally leaves `CREATING` within seconds, either activated or
/// rolled back. One that stays there longer than `stale_claim_secs` was
/// orphaned by a crash or a lost connection, and this task resets it so the
/// conversation can be started again.
pub async fn start_stale_claim_task(state: Arc<AppState>, stale_claim_secs: u64) {
    if stale_claim_secs == 0 {
        tracing::warn!("stale claim sweeper disabled (stale_claim_secs=0)");
        return;
    }

    let interval_seconds = (stale_claim_secs / 2).clamp(1, 60);
    let interval = Duration::from_secs(interval_seconds);

    tracing::info!(
        stale_claim_secs,
        interval_seconds,
        "starting stale claim sweeper"
    );

    loop {
        sleep(interval).await;

        let pool = state.pool.clone();
        let res = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            reset_stale_claims(&conn, stale_claim_secs).map_err(|e| e.to_string())
        })
        .await;

        match res {
            Ok(Ok(0)) => {}
            Ok(Ok(count)) => {
                tracing::info!(count, "released stale voice claims");
            }
            Ok(Err(e)) => {
                tracing::error!("failed to release stale voice claims: {}", e);
            }
            Err(e) => {
                tracing::error!("stale claim sweeper join error: {}", e);
            }
        }
    }
}
