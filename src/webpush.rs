//! Web Push: RFC 8291 aes128gcm payload encryption and RFC 8292 VAPID.
//!
//! Sends are funneled through a bounded queue drained by
//! [run_push_worker]; nothing in the request path talks to a push service
//! directly.

use crate::{context::AppContext, error::Error, storage::push_subscriptions::PushSubscription};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as Base64Url, Engine};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use hkdf::Hkdf;
use p256::{
    ecdh::EphemeralSecret,
    ecdsa::{signature::Signer, Signature, SigningKey},
    elliptic_curve::{rand_core::OsRng, sec1::ToEncodedPoint},
};
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

const SALT_LEN: usize = 16;
const PUBLIC_KEY_LEN: usize = 65;
const AUTH_SECRET_LEN: usize = 16;
const RECORD_SIZE: u32 = 4096;
const PUSH_TTL_SECONDS: &str = "86400";
const VAPID_EXP_SECONDS: i64 = 12 * 60 * 60;

const IKM_INFO_PREFIX: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

/// A queued push send for one user.
#[derive(Debug)]
pub struct PushTask {
    pub user_id: i64,
    pub payload: serde_json::Value,
}

/// Outcome classification for one endpoint.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PushError {
    /// 404/410: the subscription is dead and has been deleted.
    #[error("subscription is gone")]
    Gone,
    #[error("push send failed: {0}")]
    Failed(String),
}

/// Drains the push queue until the sender side closes.
pub async fn run_push_worker(ctx: AppContext, mut rx: mpsc::Receiver<PushTask>) {
    info!("web push worker started");
    while let Some(task) = rx.recv().await {
        if let Err(e) = send_to_user(&ctx, task.user_id, &task.payload).await {
            warn!(user_id = task.user_id, "web push delivery failed: {e}");
        }
    }
    info!("web push worker stopped");
}

/// How many endpoints are POSTed concurrently per event.
const SEND_CONCURRENCY: usize = 8;

/// Send a payload to every subscription the user holds. Failures on one
/// endpoint do not stop the rest; dead endpoints are pruned.
pub async fn send_to_user(
    ctx: &AppContext,
    user_id: i64,
    payload: &serde_json::Value,
) -> Result<(), Error> {
    let subscriptions = ctx.storage().push_subscriptions_for_user(user_id).await?;
    if subscriptions.is_empty() {
        return Ok(());
    }
    let body = serde_json::to_vec(payload)?;
    stream::iter(subscriptions)
        .for_each_concurrent(SEND_CONCURRENCY, |subscription| {
            let body = body.clone();
            async move {
                match send_push(ctx, &subscription, &body).await {
                    Ok(()) => {}
                    Err(PushError::Gone) => {
                        debug!(endpoint = %subscription.endpoint, "removed stale push subscription");
                    }
                    Err(PushError::Failed(e)) => {
                        // No retry here; the next event will push again.
                        warn!(endpoint = %subscription.endpoint, "push failed: {e}");
                    }
                }
            }
        })
        .await;
    Ok(())
}

/// Encrypt and POST one payload to one endpoint.
pub async fn send_push(
    ctx: &AppContext,
    subscription: &PushSubscription,
    payload: &[u8],
) -> Result<(), PushError> {
    let vapid = ctx
        .keys()
        .ensure_vapid_keys()
        .await
        .map_err(|e| PushError::Failed(e.to_string()))?;

    let client_p256dh: [u8; PUBLIC_KEY_LEN] = subscription
        .p256dh
        .as_slice()
        .try_into()
        .map_err(|_| PushError::Failed("invalid p256dh length".to_string()))?;
    let client_auth: [u8; AUTH_SECRET_LEN] = subscription
        .auth
        .as_slice()
        .try_into()
        .map_err(|_| PushError::Failed("invalid auth secret length".to_string()))?;

    let body = encrypt_aes128gcm(payload, &client_p256dh, &client_auth)
        .map_err(PushError::Failed)?;

    let audience = push_service_audience(&subscription.endpoint).map_err(PushError::Failed)?;
    let jwt = build_vapid_jwt(&audience, &ctx.config().vapid_contact, &vapid.private_key)
        .map_err(PushError::Failed)?;
    let authorization = format!("vapid t={jwt}, k={}", vapid.public_key_b64);

    let response = ctx
        .client()
        .post(&subscription.endpoint)
        .header("TTL", PUSH_TTL_SECONDS)
        .header("Content-Encoding", "aes128gcm")
        .header("Content-Type", "application/octet-stream")
        .header("Authorization", authorization)
        .timeout(ctx.config().request_timeout)
        .body(body)
        .send()
        .await
        .map_err(|e| PushError::Failed(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    if status.as_u16() == 404 || status.as_u16() == 410 {
        if let Err(e) = ctx
            .storage()
            .delete_push_subscription_by_endpoint(&subscription.endpoint)
            .await
        {
            warn!(endpoint = %subscription.endpoint, "failed to prune subscription: {e}");
        }
        return Err(PushError::Gone);
    }
    Err(PushError::Failed(format!("push service returned {status}")))
}

/// RFC 8291 content encryption. Returns the full aes128gcm body:
/// `salt(16) || rs(4) || keyid_len(1) || as_public(65) || ciphertext+tag`.
fn encrypt_aes128gcm(
    plaintext: &[u8],
    client_p256dh: &[u8; PUBLIC_KEY_LEN],
    client_auth: &[u8; AUTH_SECRET_LEN],
) -> Result<Vec<u8>, String> {
    let client_public = p256::PublicKey::from_sec1_bytes(client_p256dh)
        .map_err(|_| "invalid client public key".to_string())?;

    let as_secret = EphemeralSecret::random(&mut OsRng);
    let as_public_point = p256::PublicKey::from(&as_secret).to_encoded_point(false);
    let as_public: [u8; PUBLIC_KEY_LEN] = as_public_point
        .as_bytes()
        .try_into()
        .map_err(|_| "unexpected public key encoding".to_string())?;

    let shared = as_secret.diffie_hellman(&client_public);

    let mut salt = [0u8; SALT_LEN];
    use p256::elliptic_curve::rand_core::RngCore;
    OsRng.fill_bytes(&mut salt);

    let mut ikm_info = Vec::with_capacity(IKM_INFO_PREFIX.len() + PUBLIC_KEY_LEN * 2);
    ikm_info.extend_from_slice(IKM_INFO_PREFIX);
    ikm_info.extend_from_slice(client_p256dh);
    ikm_info.extend_from_slice(&as_public);

    let ikm = hkdf_sha256(client_auth, shared.raw_secret_bytes().as_slice(), &ikm_info, 32)?;
    let cek = hkdf_sha256(&salt, &ikm, CEK_INFO, 16)?;
    let nonce = hkdf_sha256(&salt, &ikm, NONCE_INFO, 12)?;

    // Single record: plaintext plus the final-record delimiter byte.
    let mut padded = Vec::with_capacity(plaintext.len() + 1);
    padded.extend_from_slice(plaintext);
    padded.push(0x02);

    let cipher = Aes128Gcm::new_from_slice(&cek).map_err(|_| "invalid CEK".to_string())?;
    let ciphertext = cipher
        .encrypt(aes_gcm::Nonce::from_slice(&nonce), padded.as_slice())
        .map_err(|_| "AES-GCM encryption failed".to_string())?;

    let mut body =
        Vec::with_capacity(SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(PUBLIC_KEY_LEN as u8);
    body.extend_from_slice(&as_public);
    body.extend_from_slice(&ciphertext);
    Ok(body)
}

fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>, String> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|_| "HKDF expand failed".to_string())?;
    Ok(okm)
}

/// The push service origin used as the JWT audience.
fn push_service_audience(endpoint: &str) -> Result<String, String> {
    let url = Url::parse(endpoint).map_err(|e| format!("invalid endpoint: {e}"))?;
    let host = url.host_str().ok_or("endpoint has no host".to_string())?;
    Ok(match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    })
}

/// ES256 VAPID JWT. p256's signature serialization is already the raw
/// `r || s` form JWS wants, 32 bytes each.
fn build_vapid_jwt(
    audience: &str,
    subject: &str,
    private_key: &[u8; 32],
) -> Result<String, String> {
    #[derive(Serialize)]
    struct Claims<'a> {
        aud: &'a str,
        exp: i64,
        sub: &'a str,
    }

    let header = Base64Url.encode(br#"{"typ":"JWT","alg":"ES256"}"#);
    let claims = serde_json::to_vec(&Claims {
        aud: audience,
        exp: Utc::now().timestamp() + VAPID_EXP_SECONDS,
        sub: subject,
    })
    .map_err(|e| format!("claims: {e}"))?;
    let signing_input = format!("{header}.{}", Base64Url.encode(claims));

    let signing_key = SigningKey::from_bytes(private_key.into())
        .map_err(|_| "invalid VAPID private key".to_string())?;
    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    Ok(format!(
        "{signing_input}.{}",
        Base64Url.encode(signature.to_bytes())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::{signature::Verifier, VerifyingKey};

    fn client_keys() -> (p256::SecretKey, [u8; PUBLIC_KEY_LEN], [u8; AUTH_SECRET_LEN]) {
        let secret = p256::SecretKey::random(&mut OsRng);
        let public: [u8; PUBLIC_KEY_LEN] = secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .try_into()
            .unwrap();
        (secret, public, [9u8; AUTH_SECRET_LEN])
    }

    #[test]
    fn body_layout_matches_rfc8291() {
        let (_, public, auth) = client_keys();
        let body = encrypt_aes128gcm(b"hello", &public, &auth).unwrap();
        assert_eq!(&body[16..20], &RECORD_SIZE.to_be_bytes());
        assert_eq!(body[20], PUBLIC_KEY_LEN as u8);
        // salt + header + key + (plaintext + delimiter + 16-byte tag)
        assert_eq!(body.len(), 16 + 4 + 1 + 65 + 5 + 1 + 16);
    }

    #[test]
    fn decrypts_with_client_side_derivation() {
        let (client_secret, client_public, auth) = client_keys();
        let body = encrypt_aes128gcm(b"push payload", &client_public, &auth).unwrap();

        let salt: [u8; 16] = body[..16].try_into().unwrap();
        let as_public_raw: [u8; 65] = body[21..86].try_into().unwrap();
        let ciphertext = &body[86..];

        let as_public = p256::PublicKey::from_sec1_bytes(&as_public_raw).unwrap();
        let shared = p256::ecdh::diffie_hellman(
            client_secret.to_nonzero_scalar(),
            as_public.as_affine(),
        );

        let mut ikm_info = Vec::new();
        ikm_info.extend_from_slice(IKM_INFO_PREFIX);
        ikm_info.extend_from_slice(&client_public);
        ikm_info.extend_from_slice(&as_public_raw);
        let ikm = hkdf_sha256(&auth, shared.raw_secret_bytes().as_slice(), &ikm_info, 32).unwrap();
        let cek = hkdf_sha256(&salt, &ikm, CEK_INFO, 16).unwrap();
        let nonce = hkdf_sha256(&salt, &ikm, NONCE_INFO, 12).unwrap();

        let cipher = Aes128Gcm::new_from_slice(&cek).unwrap();
        let padded = cipher
            .decrypt(aes_gcm::Nonce::from_slice(&nonce), ciphertext)
            .unwrap();
        assert_eq!(&padded[..padded.len() - 1], b"push payload");
        assert_eq!(padded[padded.len() - 1], 0x02);
    }

    #[test]
    fn vapid_jwt_verifies_and_carries_claims() {
        let secret = p256::SecretKey::random(&mut OsRng);
        let private: [u8; 32] = secret.to_bytes().into();
        let jwt = build_vapid_jwt(
            "https://push.example",
            "mailto:admin@baud.example",
            &private,
        )
        .unwrap();

        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);
        let claims: serde_json::Value =
            serde_json::from_slice(&Base64Url.decode(parts[1]).unwrap()).unwrap();
        assert_eq!(claims["aud"], "https://push.example");
        assert_eq!(claims["sub"], "mailto:admin@baud.example");

        let signature_bytes = Base64Url.decode(parts[2]).unwrap();
        assert_eq!(signature_bytes.len(), 64);
        let verifying_key = VerifyingKey::from(secret.public_key());
        let signature = Signature::try_from(signature_bytes.as_slice()).unwrap();
        verifying_key
            .verify(format!("{}.{}", parts[0], parts[1]).as_bytes(), &signature)
            .unwrap();
    }

    #[tokio::test]
    async fn gone_endpoint_deletes_the_subscription() {
        use crate::{config::SiteConfig, context::AppContext, storage::Storage};
        use crate::storage::users::{NewUser, Role, UserStatus};
        use axum::{http::StatusCode, routing::post, Router};

        let config = SiteConfig::builder()
            .base_url(Url::parse("https://baud.example").unwrap())
            .totp_vault_key([1; 32])
            .vapid_vault_key([2; 32])
            .allow_http(true)
            .build()
            .unwrap();
        let (ctx, _rx) = AppContext::new(config, Storage::open_in_memory().unwrap());
        let user = ctx
            .storage()
            .create_user(NewUser {
                username: "alice".into(),
                password_hash: "x".into(),
                role: Role::User,
                status: UserStatus::Active,
            })
            .await
            .unwrap();

        let app = Router::new().route("/send/abc", post(|| async { StatusCode::GONE }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (_, client_public, auth) = client_keys();
        let endpoint = format!("http://{addr}/send/abc");
        let subscription = ctx
            .storage()
            .upsert_push_subscription(
                user.id,
                &endpoint,
                client_public.to_vec(),
                auth.to_vec(),
                None,
            )
            .await
            .unwrap();

        let err = send_push(&ctx, &subscription, b"{\"kind\":\"test\"}")
            .await
            .unwrap_err();
        assert_eq!(err, PushError::Gone);
        assert!(ctx
            .storage()
            .push_subscriptions_for_user(user.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn audience_is_the_origin() {
        assert_eq!(
            push_service_audience("https://push.example/send/abc123").unwrap(),
            "https://push.example"
        );
        assert_eq!(
            push_service_audience("http://127.0.0.1:8099/send/x").unwrap(),
            "http://127.0.0.1:8099"
        );
    }
}
