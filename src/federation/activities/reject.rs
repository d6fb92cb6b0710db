//! Reject of one of our outbound Follows.

use super::{Activity, FollowRef};
use crate::{
    context::AppContext,
    error::Error,
    storage::{follows::FollowState, remote_actors::RemoteActor},
};
use activitystreams_kinds::activity::RejectType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RejectFollow {
    #[serde(rename = "type")]
    pub kind: RejectType,
    pub id: Url,
    pub actor: Url,
    pub object: FollowRef,
}

#[async_trait]
impl Activity for RejectFollow {
    fn id(&self) -> &Url {
        &self.id
    }

    fn actor(&self) -> &Url {
        &self.actor
    }

    async fn receive(self, ctx: &AppContext, signer: &RemoteActor) -> Result<(), Error> {
        let follow_id = self.object.follow_id().as_str();
        let Some(follow) = ctx.storage().user_follow_by_ap_id(follow_id).await? else {
            debug!(follow_id, "reject for unknown follow");
            return Ok(());
        };
        if follow.remote_actor_id != Some(signer.id) {
            return Err(Error::Unauthorized);
        }
        ctx.storage()
            .set_user_follow_state(follow_id, FollowState::Rejected)
            .await?;
        Ok(())
    }
}
