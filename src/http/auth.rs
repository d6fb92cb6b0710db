//! Authentication API: the ingress that mints sessions for everything
//! else. Tokens travel as Secure/HttpOnly/SameSite=Lax cookies; the store
//! only ever sees hashes.

use crate::{
    auth::{ClientInfo, IssuedSession, NextStep, SessionAuth},
    context::AppContext,
    error::Error,
    storage::{sessions::Session, users::User},
};
use axum::{
    extract::{FromRequestParts, State},
    http::request::Parts,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};

pub const SESSION_COOKIE: &str = "session_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Session-authenticated requester, extracted from the session cookie.
pub struct CurrentUser {
    pub user: User,
    pub session: Session,
}

impl FromRequestParts<AppContext> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let jar = match CookieJar::from_request_parts(parts, ctx).await {
            Ok(jar) => jar,
            Err(never) => match never {},
        };
        let token = jar
            .get(SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .ok_or(Error::InvalidCredentials)?;
        match ctx.auth().authenticate_session(&token).await? {
            SessionAuth::Valid { user, session } => Ok(CurrentUser { user, session }),
            SessionAuth::Expired | SessionAuth::NotFound => Err(Error::InvalidCredentials),
        }
    }
}

fn client_info(parts_headers: &http::HeaderMap) -> ClientInfo {
    let header = |name: &str| {
        parts_headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };
    ClientInfo {
        ip_address: header("x-forwarded-for")
            .map(|list| list.split(',').next().unwrap_or_default().trim().to_string()),
        user_agent: header("user-agent"),
    }
}

fn secure_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .secure(true)
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

fn with_session_cookies(jar: CookieJar, issued: &IssuedSession) -> CookieJar {
    jar.add(secure_cookie(SESSION_COOKIE, issued.session_token.clone()))
        .add(secure_cookie(REFRESH_COOKIE, issued.refresh_token.clone()))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    status: &'static str,
}

/// Password step. Depending on the account's TOTP state the response asks
/// for a code, asks for enrollment, or carries session cookies.
pub async fn login(
    State(ctx): State<AppContext>,
    headers: http::HeaderMap,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), Error> {
    let client = client_info(&headers);
    let user = ctx
        .auth()
        .authenticate(&request.username, &request.password, &client)
        .await?;
    match ctx.auth().next_step(&user)? {
        NextStep::TotpVerify => Ok((jar, Json(LoginResponse { status: "totp_required" }))),
        NextStep::TotpSetup => {
            // Session is issued so enrollment endpoints can run; clients
            // are expected to finish setup before doing anything else.
            let issued = ctx.auth().create_session(&user, &client).await?;
            Ok((
                with_session_cookies(jar, &issued),
                Json(LoginResponse {
                    status: "totp_setup_required",
                }),
            ))
        }
        NextStep::Authenticated => {
            let issued = ctx.auth().create_session(&user, &client).await?;
            Ok((
                with_session_cookies(jar, &issued),
                Json(LoginResponse {
                    status: "authenticated",
                }),
            ))
        }
    }
}

#[derive(Deserialize)]
pub struct TotpLoginRequest {
    username: String,
    password: String,
    code: String,
}

/// Second factor step: password + TOTP code in one request.
pub async fn totp_verify(
    State(ctx): State<AppContext>,
    headers: http::HeaderMap,
    jar: CookieJar,
    Json(request): Json<TotpLoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), Error> {
    let client = client_info(&headers);
    let user = ctx
        .auth()
        .authenticate(&request.username, &request.password, &client)
        .await?;
    ctx.auth().verify_totp(&user, &request.code).await?;
    let issued = ctx.auth().create_session(&user, &client).await?;
    Ok((
        with_session_cookies(jar, &issued),
        Json(LoginResponse {
            status: "authenticated",
        }),
    ))
}

/// Recovery-code login. Completes a full session and flags the account for
/// TOTP re-enrollment.
pub async fn recovery_login(
    State(ctx): State<AppContext>,
    headers: http::HeaderMap,
    jar: CookieJar,
    Json(request): Json<TotpLoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), Error> {
    let client = client_info(&headers);
    let user = ctx
        .auth()
        .authenticate(&request.username, &request.password, &client)
        .await?;
    ctx.auth().verify_recovery_code(&user, &request.code).await?;
    let issued = ctx.auth().create_session(&user, &client).await?;
    Ok((
        with_session_cookies(jar, &issued),
        Json(LoginResponse {
            status: "authenticated",
        }),
    ))
}

#[derive(Serialize)]
pub struct TotpSetupResponse {
    provisioning_uri: String,
}

/// Start (or restart) TOTP enrollment for the session user.
pub async fn totp_setup(
    State(ctx): State<AppContext>,
    current: CurrentUser,
) -> Result<Json<TotpSetupResponse>, Error> {
    let issuer = ctx.config().site_name.clone();
    let provisioning_uri = ctx
        .auth()
        .begin_totp_enrollment(&current.user, &issuer)
        .await?;
    Ok(Json(TotpSetupResponse { provisioning_uri }))
}

#[derive(Deserialize)]
pub struct TotpConfirmRequest {
    code: String,
}

#[derive(Serialize)]
pub struct TotpConfirmResponse {
    /// Shown exactly once.
    recovery_codes: Vec<String>,
}

pub async fn totp_confirm(
    State(ctx): State<AppContext>,
    current: CurrentUser,
    Json(request): Json<TotpConfirmRequest>,
) -> Result<Json<TotpConfirmResponse>, Error> {
    let recovery_codes = ctx
        .auth()
        .confirm_totp_enrollment(current.user.id, &request.code)
        .await?;
    Ok(Json(TotpConfirmResponse { recovery_codes }))
}

/// Rotate the token pair using the refresh cookie.
pub async fn refresh(
    State(ctx): State<AppContext>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<LoginResponse>), Error> {
    let refresh_token = jar
        .get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or(Error::InvalidCredentials)?;
    let issued = ctx.auth().refresh_session(&refresh_token).await?;
    Ok((
        with_session_cookies(jar, &issued),
        Json(LoginResponse {
            status: "authenticated",
        }),
    ))
}

/// Destroy the session and clear both cookies.
pub async fn logout(
    State(ctx): State<AppContext>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<LoginResponse>), Error> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        ctx.auth().delete_session(cookie.value()).await?;
    }
    let jar = jar
        .remove(Cookie::build(SESSION_COOKIE).path("/").build())
        .remove(Cookie::build(REFRESH_COOKIE).path("/").build());
    Ok((jar, Json(LoginResponse { status: "logged_out" })))
}
