//! Inbound Undo of Follow, Like or Announce.
//!
//! Deletion is always keyed by (activity ap_id, signing actor) so a third
//! party cannot spoof a revocation.

use super::{Activity, Announce, Follow, Like, ObjectRef};
use crate::{context::AppContext, error::Error, storage::remote_actors::RemoteActor};
use activitystreams_kinds::activity::UndoType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum UndoObject {
    Follow(Follow),
    Like(Like),
    Announce(Announce),
    Ref(ObjectRef),
}

impl UndoObject {
    fn id(&self) -> &Url {
        match self {
            UndoObject::Follow(follow) => &follow.id,
            UndoObject::Like(like) => &like.id,
            UndoObject::Announce(announce) => &announce.id,
            UndoObject::Ref(reference) => reference.id(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Undo {
    #[serde(rename = "type")]
    pub kind: UndoType,
    pub id: Url,
    pub actor: Url,
    pub object: UndoObject,
}

#[async_trait]
impl Activity for Undo {
    fn id(&self) -> &Url {
        &self.id
    }

    fn actor(&self) -> &Url {
        &self.actor
    }

    async fn receive(self, ctx: &AppContext, signer: &RemoteActor) -> Result<(), Error> {
        let undone_id = self.object.id().as_str();
        match &self.object {
            UndoObject::Follow(_) => {
                // Their follow of us, or their side of our follow of them.
                ctx.storage()
                    .delete_follower_by_ap_id(undone_id, signer.id)
                    .await?;
                ctx.storage()
                    .delete_user_follow_by_ap_id_for_actor(undone_id, signer.id)
                    .await?;
            }
            UndoObject::Like(_) => {
                ctx.storage()
                    .delete_article_like_by_ap_id(undone_id, signer.id)
                    .await?;
            }
            UndoObject::Announce(_) => {
                ctx.storage()
                    .delete_announce_by_ap_id(undone_id, signer.id)
                    .await?;
            }
            UndoObject::Ref(_) => {
                // Type unknown; the id can only match one of these rows.
                let removed = ctx
                    .storage()
                    .delete_follower_by_ap_id(undone_id, signer.id)
                    .await?
                    + ctx
                        .storage()
                        .delete_user_follow_by_ap_id_for_actor(undone_id, signer.id)
                        .await?
                    + ctx
                        .storage()
                        .delete_article_like_by_ap_id(undone_id, signer.id)
                        .await?
                    + ctx
                        .storage()
                        .delete_announce_by_ap_id(undone_id, signer.id)
                        .await?;
                if removed == 0 {
                    debug!(undone_id, "undo matched nothing");
                }
            }
        }
        Ok(())
    }
}
