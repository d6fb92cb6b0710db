//! End-to-end federation flows over a real listener: a signed Follow is
//! accepted once and deduplicated on replay, and actor documents come out
//! well-formed.

use baudrate::{
    config::SiteConfig,
    context::AppContext,
    federation::signatures,
    keys::generate_actor_keypair,
    storage::{
        users::{NewUser, Role, UserStatus},
        Storage,
    },
};
use axum::{http::StatusCode, routing::get, routing::post, Json, Router};
use serde_json::json;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use url::Url;

/// The application under test, bound to an ephemeral port.
async fn spawn_app() -> (AppContext, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{addr}");

    let config = SiteConfig::builder()
        .base_url(Url::parse(&base).unwrap())
        .totp_vault_key([1; 32])
        .vapid_vault_key([2; 32])
        .allow_http(true)
        .build()
        .unwrap();
    let (ctx, _push_rx) = AppContext::new(config, Storage::open_in_memory().unwrap());

    let app = baudrate::http::router(ctx.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (ctx, base)
}

/// A fake remote instance serving one actor document and counting inbox
/// hits.
async fn spawn_remote(public_key_pem: String) -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{addr}");

    let actor_id = format!("{base}/users/zoe");
    let inbox_hits = Arc::new(AtomicUsize::new(0));
    let hits = inbox_hits.clone();

    let actor = json!({
        "id": actor_id,
        "type": "Person",
        "preferredUsername": "zoe",
        "inbox": format!("{actor_id}/inbox"),
        "publicKey": {
            "id": format!("{actor_id}#main-key"),
            "owner": actor_id,
            "publicKeyPem": public_key_pem,
        }
    });
    let app = Router::new()
        .route("/users/zoe", get(move || async move { Json(actor.clone()) }))
        .route(
            "/users/zoe/inbox",
            post(move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::ACCEPTED
                }
            }),
        );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (base, inbox_hits)
}

#[tokio::test]
async fn signed_follow_is_accepted_once_and_deduplicated() {
    let (ctx, app_base) = spawn_app().await;
    ctx.storage()
        .create_user(NewUser {
            username: "alice".into(),
            password_hash: "x".into(),
            role: Role::User,
            status: UserStatus::Active,
        })
        .await
        .unwrap();

    let keypair = generate_actor_keypair().unwrap();
    let (remote_base, remote_inbox_hits) = spawn_remote(keypair.public_key.clone()).await;
    let remote_actor_id = format!("{remote_base}/users/zoe");

    let follow = json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": format!("{remote_base}/activities/42"),
        "type": "Follow",
        "actor": remote_actor_id,
        "object": format!("{app_base}/ap/users/alice"),
    });
    let body = serde_json::to_vec(&follow).unwrap();
    let inbox = Url::parse(&format!("{app_base}/ap/inbox")).unwrap();
    let headers = signatures::sign_request_headers(
        &inbox,
        &body,
        &format!("{remote_actor_id}#main-key"),
        &keypair.private_key,
        "application/activity+json",
    )
    .unwrap();

    let client = reqwest::Client::new();
    let first = client
        .post(inbox.as_str())
        .headers(headers.clone())
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    // One follower row exists with accepted state.
    let follower = ctx
        .storage()
        .follower_by_ap_id(&format!("{remote_base}/activities/42"))
        .await
        .unwrap()
        .expect("follower row created");
    assert_eq!(
        follower.state,
        baudrate::storage::follows::FollowState::Accepted
    );

    // Exactly one Accept landed in the delivery queue.
    assert!(ctx.storage().delivery_job(1).await.unwrap().is_some());
    assert!(ctx.storage().delivery_job(2).await.unwrap().is_none());

    // Replay of the identical body: 200, no new rows, no second Accept.
    let second = client
        .post(inbox.as_str())
        .headers(headers)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert!(ctx.storage().delivery_job(2).await.unwrap().is_none());

    // Deliver the queued Accept to the remote inbox.
    baudrate::federation::delivery::run_pending_once(&ctx)
        .await
        .unwrap();
    assert_eq!(remote_inbox_hits.load(Ordering::SeqCst), 1);
    let job = ctx.storage().delivery_job(1).await.unwrap().unwrap();
    assert_eq!(job.state, baudrate::storage::delivery_jobs::JobState::Sent);
}

#[tokio::test]
async fn unsigned_inbox_posts_are_rejected() {
    let (_ctx, app_base) = spawn_app().await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{app_base}/ap/inbox"))
        .json(&json!({
            "id": "https://remote.example/activities/1",
            "type": "Follow",
            "actor": "https://remote.example/users/zoe",
            "object": format!("{app_base}/ap/users/alice"),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn actor_document_and_webfinger() {
    let (ctx, app_base) = spawn_app().await;
    ctx.storage()
        .create_user(NewUser {
            username: "alice".into(),
            password_hash: "x".into(),
            role: Role::User,
            status: UserStatus::Active,
        })
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{app_base}/ap/users/alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("application/activity+json"));
    let person: serde_json::Value = response.json().await.unwrap();
    assert_eq!(person["type"], "Person");
    assert_eq!(person["preferredUsername"], "alice");
    assert!(person["publicKey"]["publicKeyPem"]
        .as_str()
        .unwrap()
        .starts_with("-----BEGIN PUBLIC KEY-----"));

    let domain = Url::parse(&app_base).unwrap();
    let host = format!(
        "{}:{}",
        domain.host_str().unwrap(),
        domain.port().unwrap()
    );
    let webfinger: serde_json::Value = client
        .get(format!(
            "{app_base}/.well-known/webfinger?resource=acct:alice@{host}"
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        webfinger["links"][0]["href"],
        format!("{app_base}/ap/users/alice")
    );

    // Unknown accounts 404.
    let missing = client
        .get(format!(
            "{app_base}/.well-known/webfinger?resource=acct:nobody@{host}"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn outbox_pagination_past_the_end_is_empty() {
    let (ctx, app_base) = spawn_app().await;
    ctx.storage()
        .create_user(NewUser {
            username: "alice".into(),
            password_hash: "x".into(),
            role: Role::User,
            status: UserStatus::Active,
        })
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let root: serde_json::Value = client
        .get(format!("{app_base}/ap/users/alice/outbox"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["type"], "OrderedCollection");
    assert_eq!(root["totalItems"], 0);

    let page: serde_json::Value = client
        .get(format!("{app_base}/ap/users/alice/outbox?page=5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["type"], "OrderedCollectionPage");
    assert_eq!(page["orderedItems"].as_array().unwrap().len(), 0);
}
