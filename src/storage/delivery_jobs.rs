//! Outbound delivery queue rows.

use super::{decode_ts, encode_ts, Storage, StorageError};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Sent,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Sent => "sent",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        match raw {
            "pending" => Ok(JobState::Pending),
            "sent" => Ok(JobState::Sent),
            "failed" => Ok(JobState::Failed),
            other => Err(StorageError::Internal(format!("unknown job state {other:?}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub id: i64,
    pub activity: String,
    pub inbox_url: String,
    pub actor_uri: String,
    pub attempts: i64,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub state: JobState,
}

fn map_job(row: &Row<'_>) -> rusqlite::Result<(DeliveryJob, String, String)> {
    Ok((
        DeliveryJob {
            id: row.get("id")?,
            activity: row.get("activity")?,
            inbox_url: row.get("inbox_url")?,
            actor_uri: row.get("actor_uri")?,
            attempts: row.get("attempts")?,
            next_attempt_at: Utc::now(),
            last_error: row.get("last_error")?,
            state: JobState::Pending,
        },
        row.get("state")?,
        row.get("next_attempt_at")?,
    ))
}

fn finish_job(parts: (DeliveryJob, String, String)) -> Result<DeliveryJob, StorageError> {
    let (mut job, state, next_attempt_at) = parts;
    job.state = JobState::parse(&state)?;
    job.next_attempt_at = decode_ts(&next_attempt_at)?;
    Ok(job)
}

const JOB_COLUMNS: &str =
    "id, activity, inbox_url, actor_uri, attempts, next_attempt_at, last_error, state";

impl Storage {
    /// One job per distinct inbox.
    pub async fn enqueue_delivery_jobs(
        &self,
        activity: String,
        actor_uri: String,
        inbox_urls: Vec<String>,
    ) -> Result<usize, StorageError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let now = encode_ts(Utc::now());
            let mut inserted = 0;
            for inbox_url in &inbox_urls {
                inserted += tx.execute(
                    "INSERT INTO delivery_jobs
                         (activity, inbox_url, actor_uri, next_attempt_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![activity, inbox_url, actor_uri, now],
                )?;
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    /// Claim a batch of due jobs. Claimed jobs have their `next_attempt_at`
    /// pushed forward by `lease` inside the claiming transaction, so
    /// concurrent workers skip them -- the SKIP LOCKED equivalent for a
    /// single-writer database.
    pub async fn claim_due_delivery_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<DeliveryJob>, StorageError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let jobs = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM delivery_jobs
                     WHERE state = 'pending' AND next_attempt_at <= ?1
                     ORDER BY next_attempt_at ASC
                     LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![encode_ts(now), limit], map_job)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };
            let lease_until = encode_ts(now + lease);
            for (job, _, _) in &jobs {
                tx.execute(
                    "UPDATE delivery_jobs SET next_attempt_at = ?2 WHERE id = ?1",
                    params![job.id, lease_until],
                )?;
            }
            tx.commit()?;
            jobs.into_iter().map(finish_job).collect()
        })
        .await
    }

    pub async fn mark_delivery_sent(&self, job_id: i64, attempts: i64) -> Result<(), StorageError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE delivery_jobs
                 SET state = 'sent', attempts = ?2, last_error = NULL
                 WHERE id = ?1",
                params![job_id, attempts],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mark_delivery_failed(
        &self,
        job_id: i64,
        attempts: i64,
        error: &str,
    ) -> Result<(), StorageError> {
        let error = truncate(error);
        self.call(move |conn| {
            conn.execute(
                "UPDATE delivery_jobs
                 SET state = 'failed', attempts = ?2, last_error = ?3
                 WHERE id = ?1",
                params![job_id, attempts, error],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn reschedule_delivery(
        &self,
        job_id: i64,
        attempts: i64,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StorageError> {
        let error = truncate(error);
        self.call(move |conn| {
            conn.execute(
                "UPDATE delivery_jobs
                 SET attempts = ?2, next_attempt_at = ?3, last_error = ?4
                 WHERE id = ?1",
                params![job_id, attempts, encode_ts(next_attempt_at), error],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delivery_job(&self, job_id: i64) -> Result<Option<DeliveryJob>, StorageError> {
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM delivery_jobs WHERE id = ?1"),
                [job_id],
                map_job,
            )
            .optional()?
            .map(finish_job)
            .transpose()
        })
        .await
    }

    /// Force a job due immediately. Test hook for the backoff schedule.
    #[doc(hidden)]
    pub async fn rewind_delivery_job(&self, job_id: i64) -> Result<(), StorageError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE delivery_jobs SET next_attempt_at = ?2 WHERE id = ?1",
                params![job_id, encode_ts(Utc::now() - Duration::seconds(1))],
            )?;
            Ok(())
        })
        .await
    }
}

fn truncate(error: &str) -> String {
    const MAX: usize = 500;
    if error.len() <= MAX {
        error.to_string()
    } else {
        let mut cut = MAX;
        while !error.is_char_boundary(cut) {
            cut -= 1;
        }
        error[..cut].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_holds_a_lease() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .enqueue_delivery_jobs(
                "{}".into(),
                "https://baud.example/ap/users/alice".into(),
                vec!["https://remote.example/inbox".into()],
            )
            .await
            .unwrap();

        let now = Utc::now();
        let first = storage
            .claim_due_delivery_jobs(now, 10, Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        // A second claimer inside the lease window sees nothing.
        let second = storage
            .claim_due_delivery_jobs(now, 10, Duration::seconds(60))
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn sent_jobs_are_never_reclaimed() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .enqueue_delivery_jobs(
                "{}".into(),
                "https://baud.example/ap/users/alice".into(),
                vec!["https://remote.example/inbox".into()],
            )
            .await
            .unwrap();
        let job = storage
            .claim_due_delivery_jobs(Utc::now(), 1, Duration::seconds(0))
            .await
            .unwrap()
            .remove(0);
        storage.mark_delivery_sent(job.id, 1).await.unwrap();

        let later = Utc::now() + Duration::days(30);
        let reclaimed = storage
            .claim_due_delivery_jobs(later, 10, Duration::seconds(0))
            .await
            .unwrap();
        assert!(reclaimed.is_empty());
    }
}
