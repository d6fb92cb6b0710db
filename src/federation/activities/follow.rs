//! Inbound Follow of a local user or board.

use super::Activity;
use crate::{
    context::AppContext,
    error::Error,
    federation::{parse_local_actor, publisher, LocalActorRef},
    notifications::{self, kinds},
    storage::{
        boards::AcceptPolicy,
        follows::FollowState,
        notifications::NewNotification,
        remote_actors::RemoteActor,
    },
};
use activitystreams_kinds::activity::FollowType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Follow {
    #[serde(rename = "type")]
    pub kind: FollowType,
    pub id: Url,
    pub actor: Url,
    pub object: Url,
}

impl Follow {
    pub fn new(id: Url, actor: Url, object: Url) -> Self {
        Follow {
            kind: Default::default(),
            id,
            actor,
            object,
        }
    }
}

#[async_trait]
impl Activity for Follow {
    fn id(&self) -> &Url {
        &self.id
    }

    fn actor(&self) -> &Url {
        &self.actor
    }

    async fn receive(self, ctx: &AppContext, signer: &RemoteActor) -> Result<(), Error> {
        match parse_local_actor(ctx.config(), &self.object) {
            Some(LocalActorRef::User(username)) => {
                let user = ctx
                    .storage()
                    .user_by_username(&username)
                    .await?
                    .ok_or(Error::NotFound)?;
                ctx.storage()
                    .upsert_follower(
                        signer.id,
                        Some(user.id),
                        None,
                        FollowState::Accepted,
                        self.id.as_str(),
                    )
                    .await?;
                publisher::publish_accept_follow(ctx, &self, signer).await?;
                notifications::create(
                    ctx,
                    NewNotification {
                        user_id: user.id,
                        kind: kinds::USER_FOLLOWED.to_string(),
                        actor_user_id: None,
                        actor_remote_actor_id: Some(signer.id),
                        article_id: None,
                        comment_id: None,
                        data: json!({ "actor": signer.ap_id }),
                    },
                )
                .await?;
                Ok(())
            }
            Some(LocalActorRef::Board(slug)) => {
                let board = ctx
                    .storage()
                    .board_by_slug(&slug)
                    .await?
                    .ok_or(Error::NotFound)?;
                // Private boards do not exist as far as federation can see.
                if !board.is_public() || !board.ap_enabled {
                    return Err(Error::NotFound);
                }
                match board.ap_accept_policy {
                    AcceptPolicy::Open => {
                        ctx.storage()
                            .upsert_follower(
                                signer.id,
                                None,
                                Some(board.id),
                                FollowState::Accepted,
                                self.id.as_str(),
                            )
                            .await?;
                        publisher::publish_accept_follow(ctx, &self, signer).await?;
                    }
                    AcceptPolicy::FollowersOnly => {
                        // Held for a moderator; Accept goes out on approval.
                        debug!(board = %board.slug, "follow queued pending approval");
                        ctx.storage()
                            .upsert_follower(
                                signer.id,
                                None,
                                Some(board.id),
                                FollowState::Pending,
                                self.id.as_str(),
                            )
                            .await?;
                    }
                }
                Ok(())
            }
            _ => Err(Error::NotFound),
        }
    }
}
