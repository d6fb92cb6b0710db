//! Follow state machine for the local side.
//!
//! Outbound follows of remote actors start `pending` and wait for their
//! Accept/Reject; local user→user and user→board follows transition to
//! `accepted` immediately with no delivery. Held board followers are
//! accepted or rejected by a moderator.

use crate::{
    context::AppContext,
    error::Error,
    federation::{activities::Follow, publisher},
    storage::{
        boards::Board,
        follows::{FollowState, Follower, UserFollow},
        moderation::ModerationAction,
        remote_actors::RemoteActor,
        users::User,
        StorageError,
    },
};
use serde_json::json;
use url::Url;

/// Follow a remote actor. Inserts the pending row and ships the Follow;
/// repeated calls while a follow exists return the current row.
pub async fn follow_remote_actor(
    ctx: &AppContext,
    user: &User,
    target: &RemoteActor,
) -> Result<UserFollow, Error> {
    let follow_ap_id = ctx.config().new_activity_uri();
    let inserted = ctx
        .storage()
        .insert_user_follow(
            user.id,
            Some(target.id),
            None,
            FollowState::Pending,
            follow_ap_id.as_str(),
        )
        .await;
    match inserted {
        Ok(follow) => {
            publisher::publish_follow(ctx, user, target, &follow_ap_id).await?;
            Ok(follow)
        }
        Err(StorageError::Conflict(_)) => {
            // Already following (any state); no second Follow goes out.
            ctx.storage()
                .user_follow_for_target(user.id, Some(target.id), None)
                .await?
                .ok_or_else(|| Error::Conflict("follow already exists".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Unfollow a remote actor; sends Undo(Follow) when a row existed.
pub async fn unfollow_remote_actor(
    ctx: &AppContext,
    user: &User,
    target: &RemoteActor,
) -> Result<(), Error> {
    let removed = ctx
        .storage()
        .delete_user_follow(user.id, Some(target.id), None)
        .await?;
    if let Some(follow) = removed {
        let follow_ap_id = Url::parse(&follow.ap_id)
            .map_err(|_| Error::Other("stored follow id is not a url".to_string()))?;
        publisher::publish_undo_follow(ctx, user, target, &follow_ap_id).await?;
    }
    Ok(())
}

/// Local user→user follow: accepted immediately, nothing delivered.
pub async fn follow_local_user(
    ctx: &AppContext,
    user: &User,
    target: &User,
) -> Result<UserFollow, Error> {
    if user.id == target.id {
        return Err(Error::Validation("cannot follow yourself".to_string()));
    }
    let follow_ap_id = ctx.config().new_activity_uri();
    match ctx
        .storage()
        .insert_user_follow(
            user.id,
            None,
            Some(target.id),
            FollowState::Accepted,
            follow_ap_id.as_str(),
        )
        .await
    {
        Ok(follow) => Ok(follow),
        Err(StorageError::Conflict(_)) => Err(Error::Conflict("already following".to_string())),
        Err(e) => Err(e.into()),
    }
}

pub async fn unfollow_local_user(
    ctx: &AppContext,
    user: &User,
    target: &User,
) -> Result<(), Error> {
    ctx.storage()
        .delete_user_follow(user.id, None, Some(target.id))
        .await?;
    Ok(())
}

/// Local board subscription; accepted immediately.
pub async fn follow_board(ctx: &AppContext, user: &User, board: &Board) -> Result<(), Error> {
    Ok(ctx.storage().upsert_board_follow(user.id, board.id).await?)
}

pub async fn unfollow_board(ctx: &AppContext, user: &User, board: &Board) -> Result<(), Error> {
    ctx.storage().delete_board_follow(user.id, board.id).await?;
    Ok(())
}

/// Moderator approval of a follower held on a `followers_only` board. Emits
/// the Accept the remote has been waiting for and records the decision.
pub async fn approve_board_follower(
    ctx: &AppContext,
    moderator: &User,
    follower: &Follower,
) -> Result<(), Error> {
    let board_id = follower
        .board_id
        .ok_or(Error::Validation("not a board follower".to_string()))?;
    ctx.storage()
        .set_follower_state(follower.id, FollowState::Accepted)
        .await?;
    send_follow_decision(ctx, follower, board_id, true).await?;
    ctx.storage()
        .append_moderation_log(
            moderator.id,
            ModerationAction::AcceptFollower,
            "follower",
            &follower.id.to_string(),
            json!({ "board_id": board_id }),
        )
        .await?;
    Ok(())
}

/// Moderator rejection of a held follower.
pub async fn reject_board_follower(
    ctx: &AppContext,
    moderator: &User,
    follower: &Follower,
) -> Result<(), Error> {
    let board_id = follower
        .board_id
        .ok_or(Error::Validation("not a board follower".to_string()))?;
    ctx.storage()
        .set_follower_state(follower.id, FollowState::Rejected)
        .await?;
    send_follow_decision(ctx, follower, board_id, false).await?;
    ctx.storage()
        .append_moderation_log(
            moderator.id,
            ModerationAction::RejectFollower,
            "follower",
            &follower.id.to_string(),
            json!({ "board_id": board_id }),
        )
        .await?;
    Ok(())
}

async fn send_follow_decision(
    ctx: &AppContext,
    follower: &Follower,
    board_id: i64,
    accept: bool,
) -> Result<(), Error> {
    let board = ctx
        .storage()
        .board_by_id(board_id)
        .await?
        .ok_or(Error::NotFound)?;
    let actor = ctx
        .storage()
        .remote_actor_by_id(follower.remote_actor_id)
        .await?
        .ok_or(Error::NotFound)?;
    let follow = Follow::new(
        Url::parse(&follower.ap_id)
            .map_err(|_| Error::Other("stored follow id is not a url".to_string()))?,
        Url::parse(&actor.ap_id)
            .map_err(|_| Error::Other("stored actor id is not a url".to_string()))?,
        ctx.config().board_actor_uri(&board.slug),
    );
    if accept {
        publisher::publish_accept_follow(ctx, &follow, &actor).await
    } else {
        publisher::publish_reject_follow(ctx, &follow, &actor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SiteConfig,
        federation::activities::{AcceptFollow, Activity, FollowRef, ObjectRef, Undo, UndoObject},
        storage::{
            remote_actors::tests::remote_actor,
            users::{NewUser, Role, UserStatus},
            Storage,
        },
    };
    

    async fn test_ctx() -> AppContext {
        let config = SiteConfig::builder()
            .base_url(Url::parse("https://baud.example").unwrap())
            .totp_vault_key([1; 32])
            .vapid_vault_key([2; 32])
            .build()
            .unwrap();
        let (ctx, _rx) = AppContext::new(config, Storage::open_in_memory().unwrap());
        ctx
    }

    async fn seed_user(ctx: &AppContext, name: &str) -> User {
        ctx.storage()
            .create_user(NewUser {
                username: name.into(),
                password_hash: "x".into(),
                role: Role::User,
                status: UserStatus::Active,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn local_follow_skips_pending() {
        let ctx = test_ctx().await;
        let alice = seed_user(&ctx, "alice").await;
        let bob = seed_user(&ctx, "bob").await;
        let follow = follow_local_user(&ctx, &alice, &bob).await.unwrap();
        assert_eq!(follow.state, FollowState::Accepted);
        // Nothing was queued for delivery.
        assert_eq!(
            crate::federation::delivery::run_pending_once(&ctx)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn outbound_follow_accept_undo_accept() {
        let ctx = test_ctx().await;
        let alice = seed_user(&ctx, "alice").await;
        let remote = ctx
            .storage()
            .upsert_remote_actor(remote_actor("https://remote.example/users/zoe"))
            .await
            .unwrap();

        // Outbound follow starts pending.
        let follow = follow_remote_actor(&ctx, &alice, &remote).await.unwrap();
        assert_eq!(follow.state, FollowState::Pending);
        let follow_id = Url::parse(&follow.ap_id).unwrap();

        // Inbound Accept flips it to accepted.
        let accept = AcceptFollow {
            kind: Default::default(),
            id: Url::parse("https://remote.example/activities/accept-1").unwrap(),
            actor: Url::parse(&remote.ap_id).unwrap(),
            object: FollowRef::Ref(ObjectRef::Id(follow_id.clone())),
        };
        accept.receive(&ctx, &remote).await.unwrap();
        let row = ctx
            .storage()
            .user_follow_by_ap_id(follow.ap_id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.state, FollowState::Accepted);

        // Inbound Undo referencing the follow removes the row.
        let undo = Undo {
            kind: Default::default(),
            id: Url::parse("https://remote.example/activities/undo-1").unwrap(),
            actor: Url::parse(&remote.ap_id).unwrap(),
            object: UndoObject::Ref(ObjectRef::Map {
                id: follow_id.clone(),
            }),
        };
        undo.receive(&ctx, &remote).await.unwrap();
        assert!(ctx
            .storage()
            .user_follow_by_ap_id(follow.ap_id.as_str())
            .await
            .unwrap()
            .is_none());

        // A late Accept after the Undo is a no-op.
        let late_accept = AcceptFollow {
            kind: Default::default(),
            id: Url::parse("https://remote.example/activities/accept-2").unwrap(),
            actor: Url::parse(&remote.ap_id).unwrap(),
            object: FollowRef::Ref(ObjectRef::Id(follow_id)),
        };
        late_accept.receive(&ctx, &remote).await.unwrap();
        assert!(ctx
            .storage()
            .user_follow_by_ap_id(follow.ap_id.as_str())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn only_the_followed_actor_may_accept() {
        let ctx = test_ctx().await;
        let alice = seed_user(&ctx, "alice").await;
        let remote = ctx
            .storage()
            .upsert_remote_actor(remote_actor("https://remote.example/users/zoe"))
            .await
            .unwrap();
        let impostor = ctx
            .storage()
            .upsert_remote_actor(remote_actor("https://evil.example/users/mallory"))
            .await
            .unwrap();

        let follow = follow_remote_actor(&ctx, &alice, &remote).await.unwrap();
        let accept = AcceptFollow {
            kind: Default::default(),
            id: Url::parse("https://evil.example/activities/accept").unwrap(),
            actor: Url::parse(&impostor.ap_id).unwrap(),
            object: FollowRef::Ref(ObjectRef::Id(Url::parse(&follow.ap_id).unwrap())),
        };
        assert!(accept.receive(&ctx, &impostor).await.is_err());
        let row = ctx
            .storage()
            .user_follow_by_ap_id(follow.ap_id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.state, FollowState::Pending);
    }
}
