//! Authentication: password verification with constant-time behavior on
//! unknown usernames, the post-password next-step machine, TOTP enrollment
//! and verification, recovery codes, and the dual-token session lifecycle.

pub mod recovery;
pub mod session;
pub mod totp;

use crate::{
    error::Error,
    storage::{
        sessions::{NewSession, Session},
        users::{Role, User, UserStatus},
        Storage, StorageError,
    },
    vault::TokenVault,
};
use chrono::Utc;
use once_cell::sync::Lazy;
use tracing::{debug, warn};

/// bcrypt hash verified on username misses so that response timing does not
/// reveal whether an account exists.
static DUMMY_HASH: Lazy<String> = Lazy::new(|| {
    bcrypt::hash("baudrate-timing-pad", bcrypt::DEFAULT_COST).expect("bcrypt hash of fixed input")
});

/// What the client must do after a successful password check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Authenticated,
    TotpVerify,
    TotpSetup,
}

/// Request metadata recorded with login attempts and sessions.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Outcome of a session-token lookup.
pub enum SessionAuth {
    Valid { user: User, session: Session },
    Expired,
    NotFound,
}

/// Fresh tokens handed to the client. Only their hashes persist.
pub struct IssuedSession {
    pub session: Session,
    pub session_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct Auth {
    storage: Storage,
    totp_vault: TokenVault,
}

impl Auth {
    pub fn new(storage: Storage, totp_vault: TokenVault) -> Self {
        Auth {
            storage,
            totp_vault,
        }
    }

    /// Hash a password for account creation or change.
    pub fn hash_password(password: &str) -> Result<String, Error> {
        bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(Error::other)
    }

    /// Verify username + password. A lookup miss still runs one bcrypt
    /// verification against [DUMMY_HASH], and every outcome is recorded in
    /// the login-attempt audit.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<User, Error> {
        let user = self.storage.user_by_username(username).await?;
        let verified = match &user {
            Some(user) => bcrypt::verify(password, &user.password_hash).unwrap_or(false),
            None => {
                // Same work as the hit path; result is discarded.
                let _ = bcrypt::verify(password, &DUMMY_HASH);
                false
            }
        };
        let ip = client.ip_address.as_deref().unwrap_or("");
        self.storage
            .record_login_attempt(username, ip, verified)
            .await?;
        if !verified {
            debug!(username, "password verification failed");
            return Err(Error::InvalidCredentials);
        }
        let user = user.expect("verified implies user present");
        if user.status == UserStatus::Banned {
            warn!(username, "login attempt on banned account");
            return Err(Error::Banned);
        }
        Ok(user)
    }

    /// The post-password state machine. Admins and moderators must carry
    /// TOTP; regular users may; guests cannot log in at all.
    pub fn next_step(&self, user: &User) -> Result<NextStep, Error> {
        if user.role == Role::Guest {
            return Err(Error::Unauthorized);
        }
        // A consumed recovery code forces re-enrollment before anything else.
        if user.totp_reset_required {
            return Ok(NextStep::TotpSetup);
        }
        if user.totp_enabled {
            return Ok(NextStep::TotpVerify);
        }
        if matches!(user.role, Role::Admin | Role::Moderator) {
            return Ok(NextStep::TotpSetup);
        }
        Ok(NextStep::Authenticated)
    }

    // --- TOTP ---------------------------------------------------------------

    /// Store a fresh encrypted secret (not yet enabled) and return the
    /// provisioning URI to show the user.
    pub async fn begin_totp_enrollment(
        &self,
        user: &User,
        issuer: &str,
    ) -> Result<String, Error> {
        let secret = totp::generate_secret();
        let encrypted = self.totp_vault.encrypt(&secret);
        self.storage
            .set_totp_secret(user.id, Some(encrypted), false)
            .await?;
        Ok(totp::provisioning_uri(&secret, issuer, &user.username))
    }

    /// Confirm enrollment with a first valid code. Enables TOTP and returns
    /// the ten recovery codes; their plaintext exists only in this return
    /// value.
    pub async fn confirm_totp_enrollment(
        &self,
        user_id: i64,
        code: &str,
    ) -> Result<Vec<String>, Error> {
        let user = self
            .storage
            .user_by_id(user_id)
            .await?
            .ok_or(Error::NotFound)?;
        let secret_enc = user.totp_secret_enc.ok_or(Error::Validation(
            "TOTP enrollment was not started".to_string(),
        ))?;
        let secret = self
            .totp_vault
            .decrypt(&secret_enc)
            .ok_or(Error::VaultError)?;
        let now = Utc::now().timestamp();
        if !totp::valid_totp(&secret, code.trim(), user.totp_last_used, now) {
            return Err(Error::InvalidCredentials);
        }

        let codes = recovery::generate_codes();
        let mut hashes = Vec::with_capacity(codes.len());
        for code in &codes {
            hashes.push(
                bcrypt::hash(recovery::normalize(code), bcrypt::DEFAULT_COST)
                    .map_err(Error::other)?,
            );
        }
        self.storage
            .set_totp_secret(user_id, Some(secret_enc), true)
            .await?;
        self.storage.set_totp_last_used(user_id, now).await?;
        self.storage.insert_recovery_codes(user_id, hashes).await?;
        Ok(codes)
    }

    /// Verify a TOTP code, enforcing the stored replay guard. On success
    /// the guard advances to now.
    pub async fn verify_totp(&self, user: &User, code: &str) -> Result<(), Error> {
        let secret_enc = user
            .totp_secret_enc
            .as_deref()
            .ok_or(Error::InvalidCredentials)?;
        let secret = self
            .totp_vault
            .decrypt(secret_enc)
            .ok_or(Error::VaultError)?;
        let now = Utc::now().timestamp();
        if !totp::valid_totp(&secret, code.trim(), user.totp_last_used, now) {
            return Err(Error::InvalidCredentials);
        }
        self.storage.set_totp_last_used(user.id, now).await?;
        Ok(())
    }

    /// Recovery-code login step. Consumes the matching unused code and
    /// flags the account for TOTP re-enrollment.
    pub async fn verify_recovery_code(&self, user: &User, code: &str) -> Result<(), Error> {
        let normalized = recovery::normalize(code);
        let candidates = self.storage.unused_recovery_codes(user.id).await?;
        for (id, hash) in candidates {
            if bcrypt::verify(&normalized, &hash).unwrap_or(false) {
                // The consume transaction re-checks used_at, so a raced
                // duplicate submission loses here.
                return match self.storage.consume_recovery_code(id).await {
                    Ok(()) => {
                        self.storage.set_totp_reset_required(user.id, true).await?;
                        Ok(())
                    }
                    Err(StorageError::Conflict(_)) => Err(Error::InvalidCredentials),
                    Err(e) => Err(e.into()),
                };
            }
        }
        Err(Error::InvalidCredentials)
    }

    // --- sessions -----------------------------------------------------------

    /// Issue a session + refresh token pair. Token hash collisions retry
    /// with fresh randomness; the per-user cap is enforced by the insert.
    pub async fn create_session(
        &self,
        user: &User,
        client: &ClientInfo,
    ) -> Result<IssuedSession, Error> {
        if user.status == UserStatus::Banned {
            return Err(Error::Banned);
        }
        for _ in 0..3 {
            let session_token = session::generate_token();
            let refresh_token = session::generate_token();
            let now = Utc::now();
            let result = self
                .storage
                .insert_session_with_eviction(NewSession {
                    user_id: user.id,
                    token_hash: session::hash_token(&session_token),
                    refresh_token_hash: session::hash_token(&refresh_token),
                    expires_at: now + session::session_ttl(),
                    refreshed_at: now,
                    ip_address: client.ip_address.clone(),
                    user_agent: client.user_agent.clone(),
                })
                .await;
            match result {
                Ok(session) => {
                    return Ok(IssuedSession {
                        session,
                        session_token,
                        refresh_token,
                    })
                }
                Err(StorageError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Other("session token collision persisted".to_string()))
    }

    /// Resolve a session token. Expired sessions are deleted on sight;
    /// sessions of banned users are destroyed and surface as [Error::Banned].
    pub async fn authenticate_session(&self, token: &str) -> Result<SessionAuth, Error> {
        let hash = session::hash_token(token);
        let Some(session) = self.storage.session_by_token_hash(&hash).await? else {
            return Ok(SessionAuth::NotFound);
        };
        if session.expires_at <= Utc::now() {
            self.storage.delete_session(session.id).await?;
            return Ok(SessionAuth::Expired);
        }
        let Some(user) = self.storage.user_by_id(session.user_id).await? else {
            self.storage.delete_session(session.id).await?;
            return Ok(SessionAuth::NotFound);
        };
        if user.status == UserStatus::Banned {
            self.storage.delete_session(session.id).await?;
            return Err(Error::Banned);
        }
        Ok(SessionAuth::Valid { user, session })
    }

    /// Rotate both tokens. The old pair stops authenticating the moment the
    /// hashes change.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<IssuedSession, Error> {
        let hash = session::hash_token(refresh_token);
        let Some(session) = self.storage.session_by_refresh_token_hash(&hash).await? else {
            return Err(Error::InvalidCredentials);
        };
        if session.expires_at <= Utc::now() {
            self.storage.delete_session(session.id).await?;
            return Err(Error::InvalidCredentials);
        }
        for _ in 0..3 {
            let session_token = session::generate_token();
            let new_refresh_token = session::generate_token();
            let now = Utc::now();
            let result = self
                .storage
                .rotate_session_tokens(
                    session.id,
                    session::hash_token(&session_token),
                    session::hash_token(&new_refresh_token),
                    now,
                    now + session::session_ttl(),
                )
                .await;
            match result {
                Ok(()) => {
                    let session = self
                        .storage
                        .session_by_token_hash(&session::hash_token(&session_token))
                        .await?
                        .ok_or(Error::InvalidCredentials)?;
                    return Ok(IssuedSession {
                        session,
                        session_token,
                        refresh_token: new_refresh_token,
                    });
                }
                Err(StorageError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Other("session token collision persisted".to_string()))
    }

    pub async fn delete_session(&self, token: &str) -> Result<(), Error> {
        self.storage
            .delete_session_by_token_hash(&session::hash_token(token))
            .await?;
        Ok(())
    }

    pub async fn purge_expired_sessions(&self) -> Result<usize, Error> {
        Ok(self.storage.purge_expired_sessions(Utc::now()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::users::NewUser;

    async fn auth_with_user(role: Role) -> (Auth, User) {
        let storage = Storage::open_in_memory().unwrap();
        let auth = Auth::new(storage.clone(), TokenVault::new(&[5; 32]));
        let user = storage
            .create_user(NewUser {
                username: "alice".into(),
                password_hash: Auth::hash_password("hunter2!").unwrap(),
                role,
                status: UserStatus::Active,
            })
            .await
            .unwrap();
        (auth, user)
    }

    #[tokio::test]
    async fn password_authentication() {
        let (auth, _) = auth_with_user(Role::User).await;
        let client = ClientInfo::default();
        assert!(auth.authenticate("alice", "hunter2!", &client).await.is_ok());
        assert_eq!(
            auth.authenticate("alice", "wrong", &client).await.unwrap_err(),
            Error::InvalidCredentials
        );
        // Unknown usernames return the same error.
        assert_eq!(
            auth.authenticate("nobody", "hunter2!", &client)
                .await
                .unwrap_err(),
            Error::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn next_step_role_policy() {
        let (auth, user) = auth_with_user(Role::User).await;
        assert_eq!(auth.next_step(&user).unwrap(), NextStep::Authenticated);

        let (auth, admin) = auth_with_user(Role::Admin).await;
        assert_eq!(auth.next_step(&admin).unwrap(), NextStep::TotpSetup);
    }

    /// The current code for a user's stored secret.
    async fn current_code(auth: &Auth, user_id: i64) -> String {
        let user = auth.storage.user_by_id(user_id).await.unwrap().unwrap();
        let secret = auth
            .totp_vault
            .decrypt(user.totp_secret_enc.as_deref().unwrap())
            .unwrap();
        totp::code_for_step(&secret, Utc::now().timestamp() / totp::STEP_SECONDS)
    }

    #[tokio::test]
    async fn totp_enrollment_and_replay() {
        let (auth, user) = auth_with_user(Role::User).await;
        let uri = auth.begin_totp_enrollment(&user, "Baudrate").await.unwrap();
        assert!(uri.starts_with("otpauth://totp/Baudrate:alice?"));

        // A wrong code does not complete enrollment.
        assert_eq!(
            auth.confirm_totp_enrollment(user.id, "000000")
                .await
                .unwrap_err(),
            Error::InvalidCredentials
        );

        let code = current_code(&auth, user.id).await;
        let codes = auth.confirm_totp_enrollment(user.id, &code).await.unwrap();
        assert_eq!(codes.len(), recovery::CODE_COUNT);

        let user = auth.storage.user_by_id(user.id).await.unwrap().unwrap();
        assert!(user.totp_enabled);

        // The enrollment code was consumed; replaying it fails.
        assert_eq!(
            auth.verify_totp(&user, &code).await.unwrap_err(),
            Error::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn totp_verify_accepts_a_fresh_code() {
        let (auth, user) = auth_with_user(Role::User).await;
        // Enable TOTP directly without consuming the current step.
        let secret = totp::generate_secret();
        auth.storage
            .set_totp_secret(user.id, Some(auth.totp_vault.encrypt(&secret)), true)
            .await
            .unwrap();
        let user = auth.storage.user_by_id(user.id).await.unwrap().unwrap();

        let code = totp::code_for_step(&secret, Utc::now().timestamp() / totp::STEP_SECONDS);
        auth.verify_totp(&user, &code).await.unwrap();

        // Replay with the guard advanced fails.
        let user = auth.storage.user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(
            auth.verify_totp(&user, &code).await.unwrap_err(),
            Error::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn recovery_code_flow() {
        let (auth, user) = auth_with_user(Role::User).await;
        auth.begin_totp_enrollment(&user, "Baudrate").await.unwrap();
        let code = current_code(&auth, user.id).await;
        let codes = auth.confirm_totp_enrollment(user.id, &code).await.unwrap();

        auth.verify_recovery_code(&user, &codes[0]).await.unwrap();
        // The same code cannot be replayed.
        assert_eq!(
            auth.verify_recovery_code(&user, &codes[0])
                .await
                .unwrap_err(),
            Error::InvalidCredentials
        );
        // Re-enrollment is now demanded by the next-step machine.
        let user = auth.storage.user_by_id(user.id).await.unwrap().unwrap();
        assert!(user.totp_reset_required);
        assert_eq!(auth.next_step(&user).unwrap(), NextStep::TotpSetup);
    }

    #[tokio::test]
    async fn session_rotation_invalidates_old_tokens() {
        let (auth, user) = auth_with_user(Role::User).await;
        let client = ClientInfo::default();
        let issued = auth.create_session(&user, &client).await.unwrap();
        assert!(matches!(
            auth.authenticate_session(&issued.session_token)
                .await
                .unwrap(),
            SessionAuth::Valid { .. }
        ));

        let rotated = auth.refresh_session(&issued.refresh_token).await.unwrap();
        assert!(matches!(
            auth.authenticate_session(&issued.session_token)
                .await
                .unwrap(),
            SessionAuth::NotFound
        ));
        assert!(matches!(
            auth.authenticate_session(&rotated.session_token)
                .await
                .unwrap(),
            SessionAuth::Valid { .. }
        ));
        // The old refresh token is dead too.
        assert!(auth.refresh_session(&issued.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn session_eviction_at_cap() {
        let (auth, user) = auth_with_user(Role::User).await;
        let client = ClientInfo::default();
        let first = auth.create_session(&user, &client).await.unwrap();
        for _ in 0..3 {
            auth.create_session(&user, &client).await.unwrap();
        }
        assert_eq!(auth.storage.count_sessions(user.id).await.unwrap(), 3);
        assert!(matches!(
            auth.authenticate_session(&first.session_token)
                .await
                .unwrap(),
            SessionAuth::NotFound
        ));
    }
}
