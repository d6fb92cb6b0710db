//! Draft-cavage HTTP signatures: RSA-SHA256 over an explicit signing
//! string. Outbound requests cover `(request-target) host date digest
//! content-type`; inbound verification rebuilds the signing string from the
//! covered headers named by the Signature header and enforces the body
//! digest and a ±12 h date window.

use crate::error::SignatureError;
use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use http::{HeaderMap, HeaderValue, Method, Uri};
use httpdate::{fmt_http_date, parse_http_date};
use rsa::{
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    signature::{SignatureEncoding, Signer, Verifier},
    RsaPrivateKey, RsaPublicKey,
};
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime};
use tracing::debug;
use url::Url;

/// Clock-skew tolerance on the Date header.
const DATE_SKEW: Duration = Duration::from_secs(12 * 60 * 60);

const COVERED_HEADERS: &str = "(request-target) host date digest content-type";

/// Sign an outbound POST. Returns the full header set to send: host, date,
/// digest, content-type and the Signature header itself.
pub fn sign_request_headers(
    inbox: &Url,
    body: &[u8],
    key_id: &str,
    private_key_pem: &str,
    content_type: &'static str,
) -> Result<HeaderMap, SignatureError> {
    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|_| SignatureError::BadSignature)?;
    let signing_key = SigningKey::<Sha256>::new(private_key);

    let mut host = inbox
        .host_str()
        .ok_or(SignatureError::MissingHeader("host"))?
        .to_string();
    if let Some(port) = inbox.port() {
        host = format!("{host}:{port}");
    }
    let date = fmt_http_date(SystemTime::now());
    let digest = format!("SHA-256={}", Base64.encode(Sha256::digest(body)));

    let request_target = match inbox.query() {
        Some(query) => format!("post {}?{query}", inbox.path()),
        None => format!("post {}", inbox.path()),
    };
    let signing_string = format!(
        "(request-target): {request_target}\nhost: {host}\ndate: {date}\ndigest: {digest}\ncontent-type: {content_type}"
    );
    let signature = signing_key.sign(signing_string.as_bytes());

    let signature_header = format!(
        "keyId=\"{key_id}\",algorithm=\"rsa-sha256\",headers=\"{COVERED_HEADERS}\",signature=\"{}\"",
        Base64.encode(signature.to_bytes())
    );

    let mut headers = HeaderMap::new();
    headers.insert(
        "host",
        HeaderValue::from_str(&host).map_err(|_| SignatureError::MissingHeader("host"))?,
    );
    headers.insert(
        "date",
        HeaderValue::from_str(&date).map_err(|_| SignatureError::MissingHeader("date"))?,
    );
    headers.insert(
        "digest",
        HeaderValue::from_str(&digest).map_err(|_| SignatureError::MissingHeader("digest"))?,
    );
    headers.insert("content-type", HeaderValue::from_static(content_type));
    headers.insert(
        "signature",
        HeaderValue::from_str(&signature_header)
            .map_err(|_| SignatureError::MissingHeader("signature"))?,
    );
    Ok(headers)
}

/// Parsed Signature header.
#[derive(Debug)]
pub struct SignatureHeader {
    pub key_id: String,
    pub covered: Vec<String>,
    pub signature: Vec<u8>,
}

/// Parse the Signature header into its parameters.
pub fn parse_signature_header(headers: &HeaderMap) -> Result<SignatureHeader, SignatureError> {
    let raw = headers
        .get("signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(SignatureError::MissingHeader("signature"))?;

    let mut key_id = None;
    let mut covered = None;
    let mut signature = None;
    for part in raw.split(',') {
        let Some((name, value)) = part.trim().split_once('=') else {
            continue;
        };
        let value = value.trim_matches('"');
        match name {
            "keyId" => key_id = Some(value.to_string()),
            "headers" => {
                covered = Some(value.split(' ').map(|h| h.to_lowercase()).collect());
            }
            "signature" => {
                signature =
                    Some(Base64.decode(value).map_err(|_| SignatureError::BadSignature)?);
            }
            _ => {}
        }
    }
    Ok(SignatureHeader {
        key_id: key_id.ok_or(SignatureError::MissingHeader("keyId"))?,
        // Per draft-cavage the default covered list is just `date`.
        covered: covered.unwrap_or_else(|| vec!["date".to_string()]),
        signature: signature.ok_or(SignatureError::MissingHeader("signature"))?,
    })
}

/// The actor claimed by the keyId, with the `#main-key` fragment stripped.
pub fn signing_actor_url(headers: &HeaderMap) -> Result<Url, SignatureError> {
    let parsed = parse_signature_header(headers)?;
    let mut url = Url::parse(&parsed.key_id).map_err(|_| SignatureError::UnknownActor)?;
    url.set_fragment(None);
    Ok(url)
}

/// Verify an inbound request against the actor's public key.
pub fn verify_request(
    headers: &HeaderMap,
    method: &Method,
    uri: &Uri,
    body: &[u8],
    public_key_pem: &str,
) -> Result<(), SignatureError> {
    let parsed = parse_signature_header(headers)?;

    for required in ["(request-target)", "host", "date"] {
        if !parsed.covered.iter().any(|h| h == required) {
            return Err(SignatureError::MissingHeader("covered header list"));
        }
    }
    if !body.is_empty() && !parsed.covered.iter().any(|h| h == "digest") {
        return Err(SignatureError::MissingHeader("digest"));
    }

    verify_date(headers)?;
    if !body.is_empty() {
        verify_body_digest(headers.get("digest"), body)?;
    }

    let signing_string = build_signing_string(&parsed.covered, method, uri, headers)?;
    debug!("verifying signing string:\n{signing_string}");

    let public_key =
        RsaPublicKey::from_public_key_pem(public_key_pem).map_err(|_| SignatureError::BadSignature)?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signature =
        Signature::try_from(parsed.signature.as_slice()).map_err(|_| SignatureError::BadSignature)?;
    verifying_key
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| SignatureError::BadSignature)
}

/// Rebuild the signing string from the covered header list.
fn build_signing_string(
    covered: &[String],
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<String, SignatureError> {
    let mut lines = Vec::with_capacity(covered.len());
    for name in covered {
        if name == "(request-target)" {
            let path_and_query = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or_else(|| uri.path());
            lines.push(format!(
                "(request-target): {} {path_and_query}",
                method.as_str().to_lowercase()
            ));
        } else if name.starts_with('(') {
            // (created)/(expires) are not used by this implementation.
            return Err(SignatureError::MissingHeader("unsupported pseudo-header"));
        } else {
            let value = headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .ok_or(SignatureError::MissingHeader("covered header"))?;
            lines.push(format!("{name}: {}", value.trim()));
        }
    }
    Ok(lines.join("\n"))
}

/// Enforce the Date header within the skew window.
fn verify_date(headers: &HeaderMap) -> Result<(), SignatureError> {
    let raw = headers
        .get("date")
        .and_then(|v| v.to_str().ok())
        .ok_or(SignatureError::MissingHeader("date"))?;
    let date = parse_http_date(raw).map_err(|_| SignatureError::StaleDate)?;
    let now = SystemTime::now();
    let skewed = match now.duration_since(date) {
        Ok(age) => age > DATE_SKEW,
        Err(e) => e.duration() > DATE_SKEW,
    };
    if skewed {
        return Err(SignatureError::StaleDate);
    }
    Ok(())
}

/// Verify the body hash against the `Digest` header. SHA-256 is the only
/// algorithm in use across the fediverse.
pub fn verify_body_digest(
    digest_header: Option<&HeaderValue>,
    body: &[u8],
) -> Result<(), SignatureError> {
    let raw = digest_header
        .and_then(|v| v.to_str().ok())
        .ok_or(SignatureError::MissingHeader("digest"))?;
    let expected = Base64.encode(Sha256::digest(body));
    for part in raw.split(',') {
        let mut iter = part.trim().splitn(2, '=');
        if let (Some(algorithm), Some(value)) = (iter.next(), iter.next()) {
            if algorithm.eq_ignore_ascii_case("sha-256") && value == expected {
                return Ok(());
            }
        }
    }
    Err(SignatureError::DigestMismatch)
}
