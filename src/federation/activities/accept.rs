//! Accept of one of our outbound Follows.

use super::{Activity, FollowRef};
use crate::{
    context::AppContext,
    error::Error,
    storage::{follows::FollowState, remote_actors::RemoteActor},
};
use activitystreams_kinds::activity::AcceptType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AcceptFollow {
    #[serde(rename = "type")]
    pub kind: AcceptType,
    pub id: Url,
    pub actor: Url,
    pub object: FollowRef,
}

#[async_trait]
impl Activity for AcceptFollow {
    fn id(&self) -> &Url {
        &self.id
    }

    fn actor(&self) -> &Url {
        &self.actor
    }

    async fn receive(self, ctx: &AppContext, signer: &RemoteActor) -> Result<(), Error> {
        let follow_id = self.object.follow_id().as_str();
        let Some(follow) = ctx.storage().user_follow_by_ap_id(follow_id).await? else {
            // Undo may already have removed the row; a late Accept is a no-op.
            debug!(follow_id, "accept for unknown follow");
            return Ok(());
        };
        // Only the followed actor may accept.
        if follow.remote_actor_id != Some(signer.id) {
            return Err(Error::Unauthorized);
        }
        ctx.storage()
            .set_user_follow_state(follow_id, FollowState::Accepted)
            .await?;
        Ok(())
    }
}
