//! POST inbox endpoints.

use crate::{
    context::AppContext,
    error::Error,
    federation::inbox::{receive_activity, InboxOutcome, INBOX_BODY_LIMIT},
};
use axum::{
    extract::{FromRequest, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, Method, Uri};

/// Everything needed to verify and dispatch one inbound activity.
#[derive(Debug)]
pub struct ActivityData {
    headers: HeaderMap,
    method: Method,
    uri: Uri,
    body: bytes::Bytes,
}

impl<S> FromRequest<S> for ActivityData
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        let bytes = axum::body::to_bytes(body, INBOX_BODY_LIMIT)
            .await
            .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE.into_response())?;
        Ok(Self {
            headers: parts.headers,
            method: parts.method,
            uri: parts.uri,
            body: bytes,
        })
    }
}

fn outcome_response(outcome: InboxOutcome) -> Response {
    match outcome {
        InboxOutcome::Accepted => StatusCode::ACCEPTED.into_response(),
        InboxOutcome::Duplicate => StatusCode::OK.into_response(),
    }
}

/// POST /ap/inbox
pub async fn post_shared_inbox(
    State(ctx): State<AppContext>,
    activity: ActivityData,
) -> Result<Response, Error> {
    let outcome = receive_activity(
        &ctx,
        &activity.headers,
        &activity.method,
        &activity.uri,
        &activity.body,
    )
    .await?;
    Ok(outcome_response(outcome))
}

/// POST /ap/users/{username}/inbox
pub async fn post_user_inbox(
    State(ctx): State<AppContext>,
    Path(username): Path<String>,
    activity: ActivityData,
) -> Result<Response, Error> {
    ctx.storage()
        .user_by_username(&username)
        .await?
        .ok_or(Error::NotFound)?;
    let outcome = receive_activity(
        &ctx,
        &activity.headers,
        &activity.method,
        &activity.uri,
        &activity.body,
    )
    .await?;
    Ok(outcome_response(outcome))
}

/// POST /ap/boards/{slug}/inbox
pub async fn post_board_inbox(
    State(ctx): State<AppContext>,
    Path(slug): Path<String>,
    activity: ActivityData,
) -> Result<Response, Error> {
    let board = ctx
        .storage()
        .board_by_slug(&slug)
        .await?
        .ok_or(Error::NotFound)?;
    if !board.is_public() || !board.ap_enabled {
        return Err(Error::NotFound);
    }
    let outcome = receive_activity(
        &ctx,
        &activity.headers,
        &activity.method,
        &activity.uri,
        &activity.body,
    )
    .await?;
    Ok(outcome_response(outcome))
}
