//! Outbound delivery: a persistent per-inbox job queue drained by a worker
//! pool with exponential backoff.
//!
//! Enqueueing computes the fan-out set up front (shared inboxes collapse a
//! domain's followers into one POST) and inserts one job per inbox. Workers
//! claim batches under a lease, POST the signed activity, and reschedule
//! retryable failures with a doubling, jittered backoff. At-least-once:
//! receivers dedup by activity id.

use crate::{
    context::AppContext,
    error::Error,
    federation::{
        parse_local_actor,
        protocol::{public_key::main_key_id, FEDERATION_CONTENT_TYPE},
        signatures, LocalActorRef,
    },
    storage::delivery_jobs::DeliveryJob,
};
use chrono::{Duration, Utc};
use itertools::Itertools;
use rand::Rng;
use tokio::{sync::watch, task::JoinSet};
use tracing::{debug, info, warn};
use url::Url;

/// A job is abandoned after this many attempts (~48 h of backoff).
pub const MAX_ATTEMPTS: i64 = 8;

const BASE_BACKOFF_SECS: i64 = 60;
const MAX_BACKOFF_SECS: i64 = 24 * 60 * 60;
/// How long a claimed job is invisible to other workers.
const CLAIM_LEASE_SECS: i64 = 300;
const CLAIM_BATCH: i64 = 32;
const IDLE_POLL: std::time::Duration = std::time::Duration::from_secs(5);

/// Insert one pending job per distinct, deliverable inbox.
pub async fn enqueue_activity(
    ctx: &AppContext,
    activity: serde_json::Value,
    actor_uri: &Url,
    inboxes: Vec<String>,
) -> Result<usize, Error> {
    let config = ctx.config();
    let inboxes: Vec<String> = inboxes
        .into_iter()
        .unique()
        .filter(|inbox| match Url::parse(inbox) {
            Ok(url) => {
                if config.is_local_url(&url) {
                    return false;
                }
                match config.verify_remote_url(&url) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!("skipping inbox {inbox}: {e}");
                        false
                    }
                }
            }
            Err(_) => false,
        })
        .collect();
    if inboxes.is_empty() {
        return Ok(0);
    }
    let inserted = ctx
        .storage()
        .enqueue_delivery_jobs(activity.to_string(), actor_uri.to_string(), inboxes)
        .await?;
    debug!("enqueued {inserted} delivery jobs for {actor_uri}");
    Ok(inserted)
}

/// Worker loop. Claims due jobs in batches and processes up to
/// `worker_count` concurrently; checks the shutdown signal between
/// batches.
pub async fn run_delivery_workers(ctx: AppContext, mut shutdown: watch::Receiver<bool>) {
    let worker_count = ctx.config().delivery_workers.max(1);
    info!("delivery workers started (concurrency {worker_count})");
    loop {
        let jobs = match ctx
            .storage()
            .claim_due_delivery_jobs(Utc::now(), CLAIM_BATCH, Duration::seconds(CLAIM_LEASE_SECS))
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("claiming delivery jobs failed: {e}");
                Vec::new()
            }
        };

        if jobs.is_empty() {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(IDLE_POLL) => continue,
            }
        }

        let mut join_set = JoinSet::new();
        for job in jobs {
            while join_set.len() >= worker_count {
                join_set.join_next().await;
            }
            let ctx = ctx.clone();
            join_set.spawn(async move {
                if let Err(e) = process_job(&ctx, job).await {
                    warn!("delivery job processing failed: {e}");
                }
            });
        }
        while join_set.join_next().await.is_some() {}

        if *shutdown.borrow() {
            break;
        }
    }
    info!("delivery workers stopped");
}

/// Claim and process one batch synchronously. The worker loop and tests
/// share this path.
pub async fn run_pending_once(ctx: &AppContext) -> Result<usize, Error> {
    let jobs = ctx
        .storage()
        .claim_due_delivery_jobs(Utc::now(), CLAIM_BATCH, Duration::seconds(CLAIM_LEASE_SECS))
        .await?;
    let count = jobs.len();
    for job in jobs {
        process_job(ctx, job).await?;
    }
    Ok(count)
}

async fn process_job(ctx: &AppContext, job: DeliveryJob) -> Result<(), Error> {
    let attempts = job.attempts + 1;
    match send(ctx, &job).await {
        SendOutcome::Sent => {
            debug!("delivered job {} to {}", job.id, job.inbox_url);
            ctx.storage().mark_delivery_sent(job.id, attempts).await?;
        }
        SendOutcome::Fatal(reason) => {
            warn!("job {} to {} failed permanently: {reason}", job.id, job.inbox_url);
            ctx.storage()
                .mark_delivery_failed(job.id, attempts, &reason)
                .await?;
        }
        SendOutcome::Retry(reason) if attempts >= MAX_ATTEMPTS => {
            warn!(
                "job {} to {} exhausted {MAX_ATTEMPTS} attempts: {reason}",
                job.id, job.inbox_url
            );
            ctx.storage()
                .mark_delivery_failed(job.id, attempts, &reason)
                .await?;
        }
        SendOutcome::Retry(reason) => {
            let next = Utc::now() + backoff(attempts);
            debug!(
                "job {} to {} attempt {attempts} failed, retrying at {next}: {reason}",
                job.id, job.inbox_url
            );
            ctx.storage()
                .reschedule_delivery(job.id, attempts, next, &reason)
                .await?;
        }
    }
    Ok(())
}

enum SendOutcome {
    Sent,
    Retry(String),
    Fatal(String),
}

async fn send(ctx: &AppContext, job: &DeliveryJob) -> SendOutcome {
    let inbox = match Url::parse(&job.inbox_url) {
        Ok(url) => url,
        Err(e) => return SendOutcome::Fatal(format!("bad inbox url: {e}")),
    };
    if let Err(e) = ctx.config().verify_remote_url(&inbox) {
        return SendOutcome::Fatal(format!("inbox rejected: {e}"));
    }

    let (key_id, private_key_pem) = match signing_key_for(ctx, &job.actor_uri).await {
        Ok(pair) => pair,
        Err(e) => return SendOutcome::Fatal(format!("signer unavailable: {e}")),
    };

    let body = job.activity.as_bytes();
    let headers = match signatures::sign_request_headers(
        &inbox,
        body,
        &key_id,
        &private_key_pem,
        FEDERATION_CONTENT_TYPE,
    ) {
        Ok(headers) => headers,
        Err(e) => return SendOutcome::Fatal(format!("signing failed: {e}")),
    };

    let response = ctx
        .client()
        .post(inbox.as_str())
        .headers(headers)
        .body(job.activity.clone().into_bytes())
        .timeout(ctx.config().request_timeout)
        .send()
        .await;

    match response {
        Ok(response) if response.status().is_success() => SendOutcome::Sent,
        Ok(response) => {
            let status = response.status();
            let reason = format!("remote returned {status}");
            // 408/429 are retryable client errors; the rest of 4xx means
            // the remote rejected the activity for good.
            if status.is_client_error() && status.as_u16() != 408 && status.as_u16() != 429 {
                SendOutcome::Fatal(reason)
            } else {
                SendOutcome::Retry(reason)
            }
        }
        Err(e) => SendOutcome::Retry(format!("connection failure: {e}")),
    }
}

/// Doubling backoff from one minute, capped at 24 h, with ±10 % jitter.
fn backoff(attempts: i64) -> Duration {
    let exponent = (attempts - 1).clamp(0, 30) as u32;
    let base = BASE_BACKOFF_SECS
        .saturating_mul(1i64 << exponent)
        .min(MAX_BACKOFF_SECS);
    let jitter = rand::thread_rng().gen_range(-0.1..=0.1);
    let secs = (base as f64 * (1.0 + jitter)).round() as i64;
    Duration::seconds(secs.max(1))
}

/// The key material for a local signing actor.
async fn signing_key_for(ctx: &AppContext, actor_uri: &str) -> Result<(String, String), Error> {
    let url = Url::parse(actor_uri).map_err(|_| Error::Validation("bad actor uri".to_string()))?;
    let key_id = main_key_id(&url);
    match parse_local_actor(ctx.config(), &url) {
        Some(LocalActorRef::User(username)) => {
            let user = ctx
                .storage()
                .user_by_username(&username)
                .await?
                .ok_or(Error::NotFound)?;
            let envelope = user
                .private_key_enc
                .ok_or_else(|| Error::Other("user has no signing key".to_string()))?;
            Ok((key_id, ctx.keys().decrypt_private_key(&envelope)?))
        }
        Some(LocalActorRef::Board(slug)) => {
            let board = ctx
                .storage()
                .board_by_slug(&slug)
                .await?
                .ok_or(Error::NotFound)?;
            let envelope = board
                .private_key_enc
                .ok_or_else(|| Error::Other("board has no signing key".to_string()))?;
            Ok((key_id, ctx.keys().decrypt_private_key(&envelope)?))
        }
        Some(LocalActorRef::Site) => {
            let keypair = ctx.keys().ensure_site_keypair().await?;
            Ok((key_id, keypair.private_key))
        }
        None => Err(Error::Validation("not a local actor".to_string())),
    }
}

/// Timestamps the schedule would produce, without jitter; used to reason
/// about the retry window in tests.
#[doc(hidden)]
pub fn nominal_backoff_secs(attempts: i64) -> i64 {
    let exponent = (attempts - 1).clamp(0, 30) as u32;
    BASE_BACKOFF_SECS
        .saturating_mul(1i64 << exponent)
        .min(MAX_BACKOFF_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SiteConfig,
        keys::generate_actor_keypair,
        storage::{
            delivery_jobs::JobState,
            users::{NewUser, Role, UserStatus},
            Storage,
        },
        vault::TokenVault,
    };
    use axum::{extract::State, http::StatusCode, routing::post, Router};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    async fn test_ctx() -> AppContext {
        let config = SiteConfig::builder()
            .base_url(Url::parse("https://baud.example").unwrap())
            .totp_vault_key([1; 32])
            .vapid_vault_key([2; 32])
            .allow_http(true)
            .build()
            .unwrap();
        let (ctx, _rx) = AppContext::new(config, Storage::open_in_memory().unwrap());
        ctx
    }

    /// Seed a local user with a pre-generated keypair so jobs can sign.
    async fn seed_signer(ctx: &AppContext) -> Url {
        let user = ctx
            .storage()
            .create_user(NewUser {
                username: "alice".into(),
                password_hash: "x".into(),
                role: Role::User,
                status: UserStatus::Active,
            })
            .await
            .unwrap();
        let keypair = generate_actor_keypair().unwrap();
        let vault = TokenVault::new(&[2; 32]);
        ctx.storage()
            .set_user_keypair(
                user.id,
                keypair.public_key,
                vault.encrypt(keypair.private_key.as_bytes()),
            )
            .await
            .unwrap();
        ctx.config().user_actor_uri("alice")
    }

    /// 503 for the first `failures` requests, then 201.
    async fn flaky_inbox(failures: usize) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = hits.clone();
        let app = Router::new()
            .route(
                "/inbox",
                post(move |State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < failures {
                        StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        StatusCode::CREATED
                    }
                }),
            )
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/inbox"), hits)
    }

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        assert_eq!(nominal_backoff_secs(1), 60);
        assert_eq!(nominal_backoff_secs(2), 120);
        assert_eq!(nominal_backoff_secs(3), 240);
        assert_eq!(nominal_backoff_secs(8), 7680);
        assert_eq!(nominal_backoff_secs(20), MAX_BACKOFF_SECS);
        for attempt in 1..=8 {
            let jittered = backoff(attempt).num_seconds();
            let nominal = nominal_backoff_secs(attempt);
            assert!(jittered >= nominal * 9 / 10 && jittered <= nominal * 11 / 10);
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let ctx = test_ctx().await;
        let actor_uri = seed_signer(&ctx).await;
        let (inbox, hits) = flaky_inbox(3).await;

        enqueue_activity(
            &ctx,
            serde_json::json!({"id": "https://baud.example/ap/activities/1"}),
            &actor_uri,
            vec![inbox],
        )
        .await
        .unwrap();

        // Attempts 1-3 hit 503 and reschedule with growing backoff; the
        // 4th lands. The rewind hook stands in for the passage of time.
        for attempt in 1..=4i64 {
            let processed = run_pending_once(&ctx).await.unwrap();
            assert_eq!(processed, 1, "attempt {attempt} should claim the job");
            let job = ctx.storage().delivery_job(1).await.unwrap().unwrap();
            assert_eq!(job.attempts, attempt);
            if attempt < 4 {
                assert_eq!(job.state, JobState::Pending);
                assert!(job.last_error.as_deref().unwrap().contains("503"));
                ctx.storage().rewind_delivery_job(job.id).await.unwrap();
            } else {
                assert_eq!(job.state, JobState::Sent);
            }
        }
        assert_eq!(hits.load(Ordering::SeqCst), 4);

        // Sent means sent: nothing further is claimed or POSTed.
        assert_eq!(run_pending_once(&ctx).await.unwrap(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_rejection_is_fatal() {
        let ctx = test_ctx().await;
        let actor_uri = seed_signer(&ctx).await;

        let app = Router::new().route("/inbox", post(|| async { StatusCode::FORBIDDEN }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        enqueue_activity(
            &ctx,
            serde_json::json!({"id": "https://baud.example/ap/activities/2"}),
            &actor_uri,
            vec![format!("http://{addr}/inbox")],
        )
        .await
        .unwrap();

        run_pending_once(&ctx).await.unwrap();
        let job = ctx.storage().delivery_job(1).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn exhaustion_fails_the_job() {
        let ctx = test_ctx().await;
        let actor_uri = seed_signer(&ctx).await;
        let (inbox, _hits) = flaky_inbox(usize::MAX).await;

        enqueue_activity(
            &ctx,
            serde_json::json!({"id": "https://baud.example/ap/activities/3"}),
            &actor_uri,
            vec![inbox],
        )
        .await
        .unwrap();

        for _ in 0..MAX_ATTEMPTS {
            run_pending_once(&ctx).await.unwrap();
            ctx.storage().rewind_delivery_job(1).await.unwrap();
        }
        let job = ctx.storage().delivery_job(1).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn local_and_duplicate_inboxes_are_dropped() {
        let ctx = test_ctx().await;
        let actor_uri = seed_signer(&ctx).await;
        let inserted = enqueue_activity(
            &ctx,
            serde_json::json!({}),
            &actor_uri,
            vec![
                "https://remote.example/inbox".to_string(),
                "https://remote.example/inbox".to_string(),
                "https://baud.example/ap/inbox".to_string(),
            ],
        )
        .await
        .unwrap();
        assert_eq!(inserted, 1);
    }
}
