//! Reports and the append-only moderation log.

use super::{decode_ts, decode_ts_opt, encode_ts, Storage, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Open,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Open => "open",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        match raw {
            "open" => Ok(ReportStatus::Open),
            "resolved" => Ok(ReportStatus::Resolved),
            "dismissed" => Ok(ReportStatus::Dismissed),
            other => Err(StorageError::Internal(format!("unknown status {other:?}"))),
        }
    }
}

/// Closed set of moderation actions. Serialized names are part of the
/// audit-log format; add variants, never rename them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    Ban,
    Unban,
    RoleChange,
    Approve,
    ResolveReport,
    DismissReport,
    DeleteArticle,
    DeleteComment,
    AcceptFollower,
    RejectFollower,
    RotateKeys,
}

impl ModerationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationAction::Ban => "ban",
            ModerationAction::Unban => "unban",
            ModerationAction::RoleChange => "role_change",
            ModerationAction::Approve => "approve",
            ModerationAction::ResolveReport => "resolve_report",
            ModerationAction::DismissReport => "dismiss_report",
            ModerationAction::DeleteArticle => "delete_article",
            ModerationAction::DeleteComment => "delete_comment",
            ModerationAction::AcceptFollower => "accept_follower",
            ModerationAction::RejectFollower => "reject_follower",
            ModerationAction::RotateKeys => "rotate_keys",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Report {
    pub id: i64,
    pub reporter_user_id: i64,
    pub article_id: Option<i64>,
    pub comment_id: Option<i64>,
    pub reason: String,
    pub status: ReportStatus,
    pub resolved_by: Option<i64>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ModerationLogEntry {
    pub id: i64,
    pub actor_id: i64,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub details: serde_json::Value,
    pub inserted_at: DateTime<Utc>,
}

fn map_report(row: &Row<'_>) -> rusqlite::Result<(Report, String, Option<String>, String)> {
    Ok((
        Report {
            id: row.get("id")?,
            reporter_user_id: row.get("reporter_user_id")?,
            article_id: row.get("article_id")?,
            comment_id: row.get("comment_id")?,
            reason: row.get("reason")?,
            status: ReportStatus::Open,
            resolved_by: row.get("resolved_by")?,
            resolved_at: None,
            inserted_at: Utc::now(),
        },
        row.get("status")?,
        row.get("resolved_at")?,
        row.get("inserted_at")?,
    ))
}

fn finish_report(
    parts: (Report, String, Option<String>, String),
) -> Result<Report, StorageError> {
    let (mut report, status, resolved_at, inserted_at) = parts;
    report.status = ReportStatus::parse(&status)?;
    report.resolved_at = decode_ts_opt(resolved_at)?;
    report.inserted_at = decode_ts(&inserted_at)?;
    Ok(report)
}

const REPORT_COLUMNS: &str = "id, reporter_user_id, article_id, comment_id, reason, status, \
     resolved_by, resolved_at, inserted_at";

impl Storage {
    pub async fn create_report(
        &self,
        reporter_user_id: i64,
        article_id: Option<i64>,
        comment_id: Option<i64>,
        reason: String,
    ) -> Result<Report, StorageError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO reports
                     (reporter_user_id, article_id, comment_id, reason, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    reporter_user_id,
                    article_id,
                    comment_id,
                    reason,
                    encode_ts(Utc::now())
                ],
            )?;
            let id = conn.last_insert_rowid();
            let parts = conn.query_row(
                &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1"),
                [id],
                map_report,
            )?;
            finish_report(parts)
        })
        .await
    }

    pub async fn report_by_id(&self, id: i64) -> Result<Option<Report>, StorageError> {
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1"),
                [id],
                map_report,
            )
            .optional()?
            .map(finish_report)
            .transpose()
        })
        .await
    }

    /// Only open → resolved/dismissed transitions are allowed; the guard is
    /// part of the UPDATE so a concurrent resolution loses cleanly.
    pub async fn close_report(
        &self,
        report_id: i64,
        resolved_by: i64,
        status: ReportStatus,
    ) -> Result<Report, StorageError> {
        self.call(move |conn| {
            if status == ReportStatus::Open {
                return Err(StorageError::Conflict("cannot reopen a report".into()));
            }
            let n = conn.execute(
                "UPDATE reports
                 SET status = ?2, resolved_by = ?3, resolved_at = ?4
                 WHERE id = ?1 AND status = 'open'",
                params![
                    report_id,
                    status.as_str(),
                    resolved_by,
                    encode_ts(Utc::now())
                ],
            )?;
            if n == 0 {
                return Err(StorageError::Conflict(
                    "report is not open".into(),
                ));
            }
            let parts = conn.query_row(
                &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1"),
                [report_id],
                map_report,
            )?;
            finish_report(parts)
        })
        .await
    }

    pub async fn list_open_reports(&self) -> Result<Vec<Report>, StorageError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REPORT_COLUMNS} FROM reports
                 WHERE status = 'open'
                 ORDER BY inserted_at ASC"
            ))?;
            let rows = stmt
                .query_map([], map_report)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(finish_report).collect()
        })
        .await
    }

    /// Append-only: there is deliberately no update or delete for this
    /// table.
    pub async fn append_moderation_log(
        &self,
        actor_id: i64,
        action: ModerationAction,
        target_type: &str,
        target_id: &str,
        details: serde_json::Value,
    ) -> Result<(), StorageError> {
        let target_type = target_type.to_string();
        let target_id = target_id.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO moderation_log
                     (actor_id, action, target_type, target_id, details, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    actor_id,
                    action.as_str(),
                    target_type,
                    target_id,
                    serde_json::to_string(&details)?,
                    encode_ts(Utc::now())
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_moderation_log(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ModerationLogEntry>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, actor_id, action, target_type, target_id, details, inserted_at
                 FROM moderation_log
                 ORDER BY inserted_at DESC
                 LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map([limit, offset], |row| {
                    Ok((
                        ModerationLogEntry {
                            id: row.get(0)?,
                            actor_id: row.get(1)?,
                            action: row.get(2)?,
                            target_type: row.get(3)?,
                            target_id: row.get(4)?,
                            details: serde_json::Value::Null,
                            inserted_at: Utc::now(),
                        },
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(mut entry, details, inserted_at)| {
                    entry.details = serde_json::from_str(&details)?;
                    entry.inserted_at = decode_ts(&inserted_at)?;
                    Ok(entry)
                })
                .collect()
        })
        .await
    }
}
