//! HTTP surface: ActivityPub endpoints, discovery, and the auth/API
//! ingress.

pub mod actors;
pub mod api;
pub mod auth;
pub mod inbox;
pub mod json;
pub mod well_known;

use crate::context::AppContext;
use axum::{
    routing::{get, post},
    Router,
};
use http::Method;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the full application router.
pub fn router(ctx: AppContext) -> Router {
    // GET ActivityPub endpoints are CORS-open; inboxes and the API are not.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    let federation = Router::new()
        .route("/.well-known/webfinger", get(well_known::webfinger))
        .route("/.well-known/nodeinfo", get(well_known::nodeinfo_well_known))
        .route("/nodeinfo/2.1", get(well_known::nodeinfo))
        .route("/ap/site", get(actors::get_site))
        .route("/ap/users/{username}", get(actors::get_user))
        .route("/ap/users/{username}/outbox", get(actors::get_user_outbox))
        .route(
            "/ap/users/{username}/followers",
            get(actors::get_user_followers),
        )
        .route(
            "/ap/users/{username}/following",
            get(actors::get_user_following),
        )
        .route("/ap/boards", get(actors::get_boards))
        .route("/ap/boards/{slug}", get(actors::get_board))
        .route("/ap/boards/{slug}/outbox", get(actors::get_board_outbox))
        .route(
            "/ap/boards/{slug}/followers",
            get(actors::get_board_followers),
        )
        .route("/ap/articles/{slug}", get(actors::get_article))
        .route(
            "/ap/articles/{slug}/replies",
            get(actors::get_article_replies),
        )
        .route("/ap/search", get(actors::search))
        .layer(cors);

    let inboxes = Router::new()
        .route("/ap/inbox", post(inbox::post_shared_inbox))
        .route("/ap/users/{username}/inbox", post(inbox::post_user_inbox))
        .route("/ap/boards/{slug}/inbox", post(inbox::post_board_inbox));

    let api = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/totp/verify", post(auth::totp_verify))
        .route("/api/auth/totp/setup", post(auth::totp_setup))
        .route("/api/auth/totp/confirm", post(auth::totp_confirm))
        .route("/api/auth/recovery", post(auth::recovery_login))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/feed", get(api::get_feed))
        .route("/api/notifications", get(api::list_notifications))
        .route(
            "/api/notifications/{id}/read",
            post(api::mark_notification_read),
        )
        .route(
            "/api/notifications/read_all",
            post(api::mark_all_notifications_read),
        )
        .route(
            "/api/push-subscriptions",
            post(api::subscribe_push).delete(api::unsubscribe_push),
        );

    federation
        .merge(inboxes)
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
