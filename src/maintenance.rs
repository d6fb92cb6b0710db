//! Periodic housekeeping: expired sessions, old login attempts, stale
//! notifications.

use crate::{context::AppContext, error::Error, notifications};
use chrono::{Duration, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

/// Login attempts are audit data with a 7-day retention.
const LOGIN_ATTEMPT_RETENTION_DAYS: i64 = 7;
/// Notifications are kept for 90 days.
const NOTIFICATION_RETENTION_DAYS: i64 = 90;

const INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

/// One sweep over everything with a retention window.
pub async fn run_once(ctx: &AppContext) -> Result<(), Error> {
    let sessions = ctx.auth().purge_expired_sessions().await?;
    let attempts = ctx
        .storage()
        .reap_login_attempts(Utc::now() - Duration::days(LOGIN_ATTEMPT_RETENTION_DAYS))
        .await?;
    let notifications =
        notifications::cleanup_older_than(ctx, NOTIFICATION_RETENTION_DAYS).await?;
    if sessions + attempts + notifications > 0 {
        info!(sessions, attempts, notifications, "maintenance sweep reaped rows");
    }
    Ok(())
}

/// Hourly loop until shutdown.
pub async fn run_maintenance(ctx: AppContext, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(INTERVAL) => {
                if let Err(e) = run_once(&ctx).await {
                    warn!("maintenance sweep failed: {e}");
                }
            }
        }
    }
}
