//! Inbound Delete: content tombstones and whole-actor removal.

use super::{Activity, ObjectRef};
use crate::{
    context::AppContext,
    error::Error,
    federation::protocol::objects::Tombstone,
    storage::remote_actors::RemoteActor,
};
use activitystreams_kinds::activity::DeleteType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DeleteObject {
    Tombstone(Tombstone),
    Ref(ObjectRef),
}

impl DeleteObject {
    fn id(&self) -> &Url {
        match self {
            DeleteObject::Tombstone(tombstone) => &tombstone.id,
            DeleteObject::Ref(reference) => reference.id(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Delete {
    #[serde(rename = "type")]
    pub kind: DeleteType,
    pub id: Url,
    pub actor: Url,
    pub object: DeleteObject,
}

#[async_trait]
impl Activity for Delete {
    fn id(&self) -> &Url {
        &self.id
    }

    fn actor(&self) -> &Url {
        &self.actor
    }

    async fn receive(self, ctx: &AppContext, signer: &RemoteActor) -> Result<(), Error> {
        let object_id = self.object.id();

        // Delete(Actor): the actor erased itself; drop everything we hold.
        if object_id.as_str() == signer.ap_id {
            info!(actor = %signer.ap_id, "remote actor deleted itself");
            ctx.storage().delete_remote_actor(signer.id).await?;
            return Ok(());
        }

        // Content deletion, always scoped to rows the signer owns. All of
        // these are soft deletes keyed by ap_id, so re-delivery is a no-op.
        if let Some(article) = ctx.storage().article_by_ap_id(object_id.as_str()).await? {
            if article.remote_actor_id == Some(signer.id) {
                ctx.storage().soft_delete_article(article.id).await?;
            }
            return Ok(());
        }
        if let Some(comment) = ctx.storage().comment_by_ap_id(object_id.as_str()).await? {
            if comment.remote_actor_id == Some(signer.id) {
                ctx.storage().soft_delete_comment(comment.id).await?;
            }
            return Ok(());
        }
        if let Some(item) = ctx.storage().feed_item_by_ap_id(object_id.as_str()).await? {
            if item.remote_actor_id == signer.id {
                ctx.storage()
                    .soft_delete_feed_item_by_ap_id(object_id.as_str())
                    .await?;
            }
            return Ok(());
        }
        debug!(%object_id, "delete for unknown object");
        Ok(())
    }
}
