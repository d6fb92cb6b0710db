//! Inbound Like of a local article.

use super::Activity;
use crate::{
    context::AppContext,
    error::Error,
    federation::parse_local_article_slug,
    notifications::{self, kinds},
    storage::{notifications::NewNotification, remote_actors::RemoteActor},
};
use activitystreams_kinds::activity::LikeType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Like {
    #[serde(rename = "type")]
    pub kind: LikeType,
    pub id: Url,
    pub actor: Url,
    pub object: Url,
}

#[async_trait]
impl Activity for Like {
    fn id(&self) -> &Url {
        &self.id
    }

    fn actor(&self) -> &Url {
        &self.actor
    }

    async fn receive(self, ctx: &AppContext, signer: &RemoteActor) -> Result<(), Error> {
        let article = match parse_local_article_slug(ctx.config(), &self.object) {
            Some(slug) => ctx.storage().article_by_slug(&slug).await?,
            None => ctx.storage().article_by_ap_id(self.object.as_str()).await?,
        };
        let Some(article) = article else {
            debug!(object = %self.object, "like for unknown article");
            return Ok(());
        };
        if article.deleted_at.is_some() {
            return Ok(());
        }

        let inserted = ctx
            .storage()
            .insert_article_like(
                article.id,
                None,
                Some(signer.id),
                Some(self.id.to_string()),
            )
            .await?;
        if !inserted {
            return Ok(());
        }
        if let Some(author) = article.user_id {
            notifications::create(
                ctx,
                NewNotification {
                    user_id: author,
                    kind: kinds::ARTICLE_LIKED.to_string(),
                    actor_user_id: None,
                    actor_remote_actor_id: Some(signer.id),
                    article_id: Some(article.id),
                    comment_id: None,
                    data: json!({}),
                },
            )
            .await?;
        }
        Ok(())
    }
}
