//! Server configuration, with various federation settings
//!
//! Use [SiteConfig::builder] in code or [SiteConfig::from_env] in the binary.

use crate::error::Error;
use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use derive_builder::Builder;
use std::time::Duration;
use url::Url;

/// How the instance decides which remote domains it federates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FederationMode {
    /// Federate with everyone except the domains on the blocklist.
    #[default]
    Blocklist,
    /// Federate only with the domains on the allowlist.
    Allowlist,
}

/// Who may register an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationMode {
    #[default]
    Open,
    ApprovalRequired,
    InviteOnly,
}

/// Server-wide configuration, loaded once at startup.
#[derive(Builder, Clone)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct SiteConfig {
    /// Canonical origin used to build actor URIs, e.g. `https://baud.example`.
    pub base_url: Url,
    /// Display name reported via NodeInfo.
    #[builder(setter(into), default = "\"Baudrate\".to_string()")]
    pub site_name: String,
    /// 32-byte AES-256 key protecting TOTP secrets at rest.
    pub totp_vault_key: [u8; 32],
    /// 32-byte AES-256 key protecting VAPID private keys at rest.
    pub vapid_vault_key: [u8; 32],
    /// `mailto:` contact carried in the VAPID `sub` claim.
    #[builder(setter(into), default = "\"mailto:admin@localhost\".to_string()")]
    pub vapid_contact: String,
    #[builder(default)]
    pub registration_mode: RegistrationMode,
    /// Master switch; when off, inboxes 404 and nothing is delivered.
    #[builder(default = "true")]
    pub federation_enabled: bool,
    #[builder(default)]
    pub federation_mode: FederationMode,
    #[builder(default)]
    pub domain_blocklist: Vec<String>,
    #[builder(default)]
    pub domain_allowlist: Vec<String>,
    /// Timeout for all outbound HTTP requests.
    #[builder(default = "Duration::from_secs(10)")]
    pub request_timeout: Duration,
    /// Number of delivery workers draining the outbound queue.
    #[builder(default = "4")]
    pub delivery_workers: usize,
    /// Allow `http://` and localhost URLs. Only for tests; never in production.
    #[builder(default = "false")]
    pub allow_http: bool,
    /// SQLite database path; `:memory:` is valid.
    #[builder(setter(into), default = "\"baudrate.db\".to_string()")]
    pub database_path: String,
    /// Socket address for the HTTP listener.
    #[builder(setter(into), default = "\"127.0.0.1:4000\".to_string()")]
    pub bind_address: String,
}

impl SiteConfig {
    /// Returns a new config builder with default values.
    pub fn builder() -> SiteConfigBuilder {
        SiteConfigBuilder::default()
    }

    /// Loads configuration from the process environment.
    ///
    /// `BASE_URL`, `TOTP_VAULT_KEY` and `VAPID_VAULT_KEY` are required; the
    /// vault keys are base64-encoded 32-byte values.
    pub fn from_env() -> Result<Self, Error> {
        let mut builder = Self::builder();
        builder
            .base_url(parse_env_url("BASE_URL")?)
            .totp_vault_key(parse_env_key("TOTP_VAULT_KEY")?)
            .vapid_vault_key(parse_env_key("VAPID_VAULT_KEY")?);
        if let Ok(v) = std::env::var("SITE_NAME") {
            builder.site_name(v);
        }
        if let Ok(v) = std::env::var("VAPID_CONTACT") {
            builder.vapid_contact(v);
        }
        if let Ok(v) = std::env::var("REGISTRATION_MODE") {
            builder.registration_mode(match v.as_str() {
                "open" => RegistrationMode::Open,
                "approval_required" => RegistrationMode::ApprovalRequired,
                "invite_only" => RegistrationMode::InviteOnly,
                other => {
                    return Err(Error::Validation(format!(
                        "unknown REGISTRATION_MODE: {other}"
                    )))
                }
            });
        }
        if let Ok(v) = std::env::var("AP_FEDERATION_ENABLED") {
            builder.federation_enabled(v == "true" || v == "1");
        }
        if let Ok(v) = std::env::var("AP_FEDERATION_MODE") {
            builder.federation_mode(match v.as_str() {
                "blocklist" => FederationMode::Blocklist,
                "allowlist" => FederationMode::Allowlist,
                other => {
                    return Err(Error::Validation(format!(
                        "unknown AP_FEDERATION_MODE: {other}"
                    )))
                }
            });
        }
        if let Ok(v) = std::env::var("AP_DOMAIN_BLOCKLIST") {
            builder.domain_blocklist(split_domains(&v));
        }
        if let Ok(v) = std::env::var("AP_DOMAIN_ALLOWLIST") {
            builder.domain_allowlist(split_domains(&v));
        }
        if let Ok(v) = std::env::var("DATABASE_PATH") {
            builder.database_path(v);
        }
        if let Ok(v) = std::env::var("BIND_ADDRESS") {
            builder.bind_address(v);
        }
        builder.build().map_err(Error::other)
    }

    /// The host (and port, if any) of the local instance.
    pub fn domain(&self) -> String {
        let mut domain = self
            .base_url
            .host_str()
            .expect("base url has a host")
            .to_string();
        if let Some(port) = self.base_url.port() {
            domain = format!("{domain}:{port}");
        }
        domain
    }

    /// Returns true if the url refers to this instance.
    pub fn is_local_url(&self, url: &Url) -> bool {
        let mut domain = match url.host_str() {
            Some(d) => d.to_string(),
            None => return false,
        };
        if let Some(port) = url.port() {
            domain = format!("{domain}:{port}");
        }
        domain == self.domain()
    }

    /// Security checks applied to every remote URL we fetch from or deliver
    /// to: scheme, federation master switch, and the domain list for the
    /// configured federation mode.
    ///
    /// <https://www.w3.org/TR/activitypub/#security-considerations>
    pub fn verify_remote_url(&self, url: &Url) -> Result<(), Error> {
        match url.scheme() {
            "https" => {}
            "http" if self.allow_http => {}
            "http" => return Err(Error::UrlVerification("http urls are not allowed")),
            _ => return Err(Error::UrlVerification("invalid url scheme")),
        }
        if self.is_local_url(url) {
            return Ok(());
        }
        if !self.federation_enabled {
            return Err(Error::UrlVerification("federation is disabled"));
        }
        let domain = url
            .host_str()
            .ok_or(Error::UrlVerification("url must have a domain"))?;
        if domain == "localhost" && !self.allow_http {
            return Err(Error::UrlVerification("localhost is not allowed"));
        }
        let domain = domain.to_ascii_lowercase();
        match self.federation_mode {
            FederationMode::Blocklist => {
                if self.domain_blocklist.iter().any(|d| *d == domain) {
                    return Err(Error::UrlVerification("domain is blocked"));
                }
            }
            FederationMode::Allowlist => {
                if !self.domain_allowlist.iter().any(|d| *d == domain) {
                    return Err(Error::UrlVerification("domain is not on the allowlist"));
                }
            }
        }
        Ok(())
    }

    // Actor URI scheme: {base}/ap/users/{username}, {base}/ap/boards/{slug},
    // {base}/ap/site, {base}/ap/articles/{slug}.

    pub fn user_actor_uri(&self, username: &str) -> Url {
        self.join(&format!("/ap/users/{username}"))
    }

    pub fn board_actor_uri(&self, slug: &str) -> Url {
        self.join(&format!("/ap/boards/{slug}"))
    }

    pub fn site_actor_uri(&self) -> Url {
        self.join("/ap/site")
    }

    pub fn article_uri(&self, slug: &str) -> Url {
        self.join(&format!("/ap/articles/{slug}"))
    }

    pub fn shared_inbox_uri(&self) -> Url {
        self.join("/ap/inbox")
    }

    /// Mints a fresh activity id under the local origin.
    pub fn new_activity_uri(&self) -> Url {
        self.join(&format!("/ap/activities/{}", uuid::Uuid::new_v4()))
    }

    fn join(&self, path: &str) -> Url {
        self.base_url
            .join(path)
            .expect("base url joined with fixed path is valid")
    }
}

impl SiteConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(url) = &self.base_url {
            if url.host_str().is_none() {
                return Err("BASE_URL must have a host".to_string());
            }
        }
        Ok(())
    }
}

fn parse_env_url(name: &str) -> Result<Url, Error> {
    let raw = std::env::var(name).map_err(|_| Error::Validation(format!("{name} is not set")))?;
    Url::parse(&raw).map_err(|e| Error::Validation(format!("{name}: {e}")))
}

fn parse_env_key(name: &str) -> Result<[u8; 32], Error> {
    let raw = std::env::var(name).map_err(|_| Error::Validation(format!("{name} is not set")))?;
    let bytes = Base64
        .decode(raw.trim())
        .map_err(|e| Error::Validation(format!("{name}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::Validation(format!("{name} must decode to 32 bytes")))
}

fn split_domains(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}
