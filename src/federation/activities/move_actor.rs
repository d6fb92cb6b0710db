//! Inbound Move: an actor migrated to a new account; follows travel with
//! it.

use super::Activity;
use crate::{
    context::AppContext,
    error::Error,
    federation::{protocol::verify_urls_match, resolver},
    storage::remote_actors::RemoteActor,
};
use activitystreams_kinds::activity::MoveType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MoveActor {
    #[serde(rename = "type")]
    pub kind: MoveType,
    pub id: Url,
    pub actor: Url,
    /// The account being moved; must be the signer itself.
    pub object: Url,
    /// The account moved to.
    pub target: Url,
}

#[async_trait]
impl Activity for MoveActor {
    fn id(&self) -> &Url {
        &self.id
    }

    fn actor(&self) -> &Url {
        &self.actor
    }

    async fn receive(self, ctx: &AppContext, signer: &RemoteActor) -> Result<(), Error> {
        // An actor can only move itself.
        verify_urls_match(&self.object, &self.actor)?;
        let target = resolver::resolve(ctx, &self.target).await?;
        let moved = ctx
            .storage()
            .migrate_user_follows(signer.id, target.id)
            .await?;
        info!(
            from = %signer.ap_id,
            to = %target.ap_id,
            moved,
            "migrated follows for moved actor"
        );
        Ok(())
    }
}
