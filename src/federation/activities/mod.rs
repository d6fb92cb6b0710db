//! Inbound activity set: one module per activity type, each with its wire
//! struct and receive handler.

pub mod accept;
pub mod announce;
pub mod create;
pub mod delete;
pub mod follow;
pub mod like;
pub mod move_actor;
pub mod reject;
pub mod undo;
pub mod update;

use crate::{context::AppContext, error::Error, storage::remote_actors::RemoteActor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

pub use accept::AcceptFollow;
pub use announce::{Announce, AnnounceObject};
pub use create::CreatePost;
pub use delete::{Delete, DeleteObject};
pub use follow::Follow;
pub use like::Like;
pub use move_actor::MoveActor;
pub use reject::RejectFollow;
pub use undo::{Undo, UndoObject};
pub use update::{UpdateObject, UpdatePost};

/// Handler for one received activity. The dispatcher has already verified
/// the HTTP signature and checked that `signer` matches the activity's
/// `actor` field.
#[async_trait]
pub trait Activity {
    fn id(&self) -> &Url;

    fn actor(&self) -> &Url;

    /// Apply the activity. Must be idempotent: every write is scoped by the
    /// activity's id or lands on a unique constraint.
    async fn receive(self, ctx: &AppContext, signer: &RemoteActor) -> Result<(), Error>;
}

/// Reference to an object by id, tolerating `{"type": ..., "id": ...}`
/// maps as well as bare strings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ObjectRef {
    Map { id: Url },
    Id(Url),
}

impl ObjectRef {
    pub fn id(&self) -> &Url {
        match self {
            ObjectRef::Map { id } => id,
            ObjectRef::Id(id) => id,
        }
    }
}

/// A Follow either embedded or referenced by id, as found inside
/// Accept/Reject/Undo.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FollowRef {
    Follow(Follow),
    Ref(ObjectRef),
}

impl FollowRef {
    /// The id of the Follow activity being referenced.
    pub fn follow_id(&self) -> &Url {
        match self {
            FollowRef::Follow(follow) => &follow.id,
            FollowRef::Ref(reference) => reference.id(),
        }
    }
}

/// Everything the shared and per-actor inboxes accept.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum InboxActivity {
    Follow(Follow),
    Accept(AcceptFollow),
    Reject(RejectFollow),
    Undo(Undo),
    Create(Box<CreatePost>),
    Update(Box<UpdatePost>),
    Delete(Delete),
    Like(Like),
    Announce(Box<Announce>),
    Move(MoveActor),
}

#[async_trait]
impl Activity for InboxActivity {
    fn id(&self) -> &Url {
        match self {
            InboxActivity::Follow(a) => a.id(),
            InboxActivity::Accept(a) => a.id(),
            InboxActivity::Reject(a) => a.id(),
            InboxActivity::Undo(a) => a.id(),
            InboxActivity::Create(a) => a.id(),
            InboxActivity::Update(a) => a.id(),
            InboxActivity::Delete(a) => a.id(),
            InboxActivity::Like(a) => a.id(),
            InboxActivity::Announce(a) => a.id(),
            InboxActivity::Move(a) => a.id(),
        }
    }

    fn actor(&self) -> &Url {
        match self {
            InboxActivity::Follow(a) => a.actor(),
            InboxActivity::Accept(a) => a.actor(),
            InboxActivity::Reject(a) => a.actor(),
            InboxActivity::Undo(a) => a.actor(),
            InboxActivity::Create(a) => a.actor(),
            InboxActivity::Update(a) => a.actor(),
            InboxActivity::Delete(a) => a.actor(),
            InboxActivity::Like(a) => a.actor(),
            InboxActivity::Announce(a) => a.actor(),
            InboxActivity::Move(a) => a.actor(),
        }
    }

    async fn receive(self, ctx: &AppContext, signer: &RemoteActor) -> Result<(), Error> {
        match self {
            InboxActivity::Follow(a) => a.receive(ctx, signer).await,
            InboxActivity::Accept(a) => a.receive(ctx, signer).await,
            InboxActivity::Reject(a) => a.receive(ctx, signer).await,
            InboxActivity::Undo(a) => a.receive(ctx, signer).await,
            InboxActivity::Create(a) => (*a).receive(ctx, signer).await,
            InboxActivity::Update(a) => (*a).receive(ctx, signer).await,
            InboxActivity::Delete(a) => a.receive(ctx, signer).await,
            InboxActivity::Like(a) => a.receive(ctx, signer).await,
            InboxActivity::Announce(a) => (*a).receive(ctx, signer).await,
            InboxActivity::Move(a) => a.receive(ctx, signer).await,
        }
    }
}
