//! Moderation: reports and the append-only audit log.

use crate::{
    context::AppContext,
    error::Error,
    storage::{
        moderation::{ModerationAction, Report, ReportStatus},
        users::{Role, User, UserStatus},
    },
};
use serde_json::json;

/// File a report against an article or comment.
pub async fn create_report(
    ctx: &AppContext,
    reporter: &User,
    article_id: Option<i64>,
    comment_id: Option<i64>,
    reason: String,
) -> Result<Report, Error> {
    if article_id.is_none() && comment_id.is_none() {
        return Err(Error::Validation("report needs a target".to_string()));
    }
    if reason.trim().is_empty() {
        return Err(Error::Validation("report needs a reason".to_string()));
    }
    Ok(ctx
        .storage()
        .create_report(reporter.id, article_id, comment_id, reason)
        .await?)
}

/// Resolve or dismiss an open report. The transition and the log entry are
/// both recorded; anything but open → resolved/dismissed is a conflict.
pub async fn close_report(
    ctx: &AppContext,
    moderator: &User,
    report_id: i64,
    status: ReportStatus,
) -> Result<Report, Error> {
    require_moderator(moderator)?;
    let report = ctx
        .storage()
        .close_report(report_id, moderator.id, status)
        .await?;
    let action = match status {
        ReportStatus::Resolved => ModerationAction::ResolveReport,
        ReportStatus::Dismissed => ModerationAction::DismissReport,
        ReportStatus::Open => unreachable!("close_report rejects open"),
    };
    ctx.storage()
        .append_moderation_log(
            moderator.id,
            action,
            "report",
            &report_id.to_string(),
            json!({ "status": status.as_str() }),
        )
        .await?;
    Ok(report)
}

/// Ban or unban a user; bans destroy live sessions.
pub async fn set_ban(
    ctx: &AppContext,
    moderator: &User,
    target: &User,
    banned: bool,
) -> Result<(), Error> {
    require_moderator(moderator)?;
    let status = if banned {
        UserStatus::Banned
    } else {
        UserStatus::Active
    };
    ctx.storage().set_user_status(target.id, status).await?;
    let action = if banned {
        ModerationAction::Ban
    } else {
        ModerationAction::Unban
    };
    ctx.storage()
        .append_moderation_log(
            moderator.id,
            action,
            "user",
            &target.id.to_string(),
            json!({ "username": target.username }),
        )
        .await?;
    Ok(())
}

/// Soft-delete an article as a moderation action.
pub async fn delete_article(
    ctx: &AppContext,
    moderator: &User,
    article_id: i64,
) -> Result<(), Error> {
    require_moderator(moderator)?;
    ctx.storage().soft_delete_article(article_id).await?;
    ctx.storage()
        .append_moderation_log(
            moderator.id,
            ModerationAction::DeleteArticle,
            "article",
            &article_id.to_string(),
            json!({}),
        )
        .await?;
    Ok(())
}

fn require_moderator(user: &User) -> Result<(), Error> {
    if matches!(user.role, Role::Moderator | Role::Admin) {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SiteConfig,
        storage::{
            users::{NewUser},
            Storage,
        },
    };
    use url::Url;

    async fn ctx_with_roles() -> (AppContext, User, User) {
        let config = SiteConfig::builder()
            .base_url(Url::parse("https://baud.example").unwrap())
            .totp_vault_key([1; 32])
            .vapid_vault_key([2; 32])
            .build()
            .unwrap();
        let (ctx, _rx) = AppContext::new(config, Storage::open_in_memory().unwrap());
        let moderator = ctx
            .storage()
            .create_user(NewUser {
                username: "mod".into(),
                password_hash: "x".into(),
                role: Role::Moderator,
                status: UserStatus::Active,
            })
            .await
            .unwrap();
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
        (ctx, moderator, user)
    }

    #[tokio::test]
    async fn report_lifecycle_open_to_resolved_once() {
        let (ctx, moderator, user) = ctx_with_roles().await;
        let article = ctx
            .storage()
            .create_article(
                crate::storage::articles::NewArticle {
                    title: "t".into(),
                    body: "b".into(),
                    body_html: None,
                    slug: "t".into(),
                    user_id: Some(user.id),
                    remote_actor_id: None,
                    ap_id: None,
                    forwardable: true,
                },
                vec![],
            )
            .await
            .unwrap();
        let report = create_report(&ctx, &user, Some(article.id), None, "spam".into())
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::Open);

        let closed = close_report(&ctx, &moderator, report.id, ReportStatus::Resolved)
            .await
            .unwrap();
        assert_eq!(closed.status, ReportStatus::Resolved);
        assert_eq!(closed.resolved_by, Some(moderator.id));
        assert!(closed.resolved_at.is_some());

        // resolved → dismissed is rejected.
        assert!(
            close_report(&ctx, &moderator, report.id, ReportStatus::Dismissed)
                .await
                .is_err()
        );

        let log = ctx.storage().list_moderation_log(0, 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, "resolve_report");
    }

    #[tokio::test]
    async fn plain_users_cannot_moderate() {
        let (ctx, _moderator, user) = ctx_with_roles().await;
        let err = set_ban(&ctx, &user.clone(), &user, true).await.unwrap_err();
        assert_eq!(err, Error::Unauthorized);
    }
}
