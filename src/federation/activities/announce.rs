//! Inbound Announce (boost), including inline content forwarding.

use super::{create, Activity, ObjectRef};
use crate::{
    context::AppContext,
    error::Error,
    federation::{parse_local_article_slug, protocol::objects::PostObject, resolver},
    notifications::{self, kinds},
    storage::{notifications::NewNotification, remote_actors::RemoteActor},
};
use activitystreams_kinds::activity::AnnounceType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AnnounceObject {
    /// Inline object: the announcing server forwards the content itself.
    Post(PostObject),
    Ref(ObjectRef),
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Announce {
    #[serde(rename = "type")]
    pub kind: AnnounceType,
    pub id: Url,
    pub actor: Url,
    pub object: AnnounceObject,
}

#[async_trait]
impl Activity for Announce {
    fn id(&self) -> &Url {
        &self.id
    }

    fn actor(&self) -> &Url {
        &self.actor
    }

    async fn receive(self, ctx: &AppContext, signer: &RemoteActor) -> Result<(), Error> {
        let object_id = match &self.object {
            AnnounceObject::Post(post) => post.id().clone(),
            AnnounceObject::Ref(reference) => reference.id().clone(),
        };

        // Content forwarding: ingest the inline object on behalf of its
        // author, then record the announce itself.
        if let AnnounceObject::Post(post) = self.object {
            let author = resolver::resolve_stale_ok(ctx, post.attributed_to()).await?;
            create::ingest_post(ctx, &author, post, &[]).await?;
        }

        let article = match parse_local_article_slug(ctx.config(), &object_id) {
            Some(slug) => ctx.storage().article_by_slug(&slug).await?,
            None => ctx.storage().article_by_ap_id(object_id.as_str()).await?,
        };

        let inserted = ctx
            .storage()
            .insert_announce(
                object_id.as_str(),
                article.as_ref().map(|a| a.id),
                signer.id,
                self.id.as_str(),
            )
            .await?;
        if !inserted {
            return Ok(());
        }

        if let Some(article) = article {
            if let Some(author) = article.user_id {
                notifications::create(
                    ctx,
                    NewNotification {
                        user_id: author,
                        kind: kinds::ARTICLE_ANNOUNCED.to_string(),
                        actor_user_id: None,
                        actor_remote_actor_id: Some(signer.id),
                        article_id: Some(article.id),
                        comment_id: None,
                        data: json!({}),
                    },
                )
                .await?;
            }
        }
        Ok(())
    }
}
