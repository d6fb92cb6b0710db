//! Responder that serves `application/activity+json` from axum handlers.

use crate::federation::protocol::FEDERATION_CONTENT_TYPE;
use axum::response::IntoResponse;
use http::header;
use serde::Serialize;

/// Wrapper struct to respond with `application/activity+json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityJson<Json: Serialize>(pub Json);

impl<Json: Serialize> IntoResponse for ActivityJson<Json> {
    fn into_response(self) -> axum::response::Response {
        let mut response = axum::response::Json(self.0).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            FEDERATION_CONTENT_TYPE
                .parse()
                .expect("static content type parses"),
        );
        response
    }
}
