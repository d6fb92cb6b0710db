//! Inbound Update of content or of the sending actor itself.

use super::Activity;
use crate::{
    context::AppContext,
    error::Error,
    federation::{
        protocol::{actors::ActorJson, objects::PostObject, verify_urls_match},
        resolver,
    },
    storage::remote_actors::RemoteActor,
};
use activitystreams_kinds::activity::UpdateType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum UpdateObject {
    Post(PostObject),
    Actor(Box<ActorJson>),
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpdatePost {
    #[serde(rename = "type")]
    pub kind: UpdateType,
    pub id: Url,
    pub actor: Url,
    pub object: UpdateObject,
}

#[async_trait]
impl Activity for UpdatePost {
    fn id(&self) -> &Url {
        &self.id
    }

    fn actor(&self) -> &Url {
        &self.actor
    }

    async fn receive(self, ctx: &AppContext, signer: &RemoteActor) -> Result<(), Error> {
        match self.object {
            UpdateObject::Actor(json) => {
                // Actors may only update themselves.
                verify_urls_match(&json.id, &self.actor)?;
                resolver::upsert_actor_json(ctx, &self.actor, *json).await?;
                Ok(())
            }
            UpdateObject::Post(PostObject::Article(object)) => {
                let Some(article) =
                    ctx.storage().article_by_ap_id(object.id.as_str()).await?
                else {
                    debug!(ap_id = %object.id, "update for unknown article");
                    return Ok(());
                };
                if article.remote_actor_id != Some(signer.id) {
                    return Err(Error::Unauthorized);
                }
                let title = object.name.clone().unwrap_or(article.title);
                let body = object
                    .source
                    .as_ref()
                    .map(|s| s.content.clone())
                    .or_else(|| object.content.clone())
                    .unwrap_or(article.body);
                ctx.storage()
                    .update_article_content(article.id, title, body, object.content)
                    .await?;
                Ok(())
            }
            UpdateObject::Post(PostObject::Note(note)) => {
                let Some(comment) = ctx.storage().comment_by_ap_id(note.id.as_str()).await?
                else {
                    debug!(ap_id = %note.id, "update for unknown comment");
                    return Ok(());
                };
                if comment.remote_actor_id != Some(signer.id) {
                    return Err(Error::Unauthorized);
                }
                // Comments are replaced wholesale on update.
                let body = note
                    .source
                    .as_ref()
                    .map(|s| s.content.clone())
                    .or_else(|| note.content.clone())
                    .unwrap_or(comment.body);
                ctx.storage()
                    .update_comment_content(comment.id, body, note.content)
                    .await?;
                Ok(())
            }
        }
    }
}
