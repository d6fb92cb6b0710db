//! RFC 6238 time-based one-time passwords: 20-byte secrets, 6 digits,
//! 30-second step, HMAC-SHA1.

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha1::Sha1;

pub const SECRET_LEN: usize = 20;
pub const STEP_SECONDS: i64 = 30;
const DIGITS: u32 = 6;

type HmacSha1 = Hmac<Sha1>;

pub fn generate_secret() -> [u8; SECRET_LEN] {
    let mut secret = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// The code for one counter step (RFC 4226 dynamic truncation).
pub fn code_for_step(secret: &[u8], step: i64) -> String {
    let mut mac = HmacSha1::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(&step.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);
    let code = binary % 10u32.pow(DIGITS);
    format!("{code:0width$}", width = DIGITS as usize)
}

/// Verify a code at unix time `now`.
///
/// The current and previous step are accepted (one step of clock drift).
/// `since` is the unix time of the last successful verification: any
/// candidate step at or before it is rejected, which makes a code
/// single-use within its window. Callers store `now` as the next `since`
/// after a success.
pub fn valid_totp(secret: &[u8], code: &str, since: Option<i64>, now: i64) -> bool {
    let current = now.div_euclid(STEP_SECONDS);
    let since_step = since.map(|s| s.div_euclid(STEP_SECONDS));
    let mut matched = false;
    for step in [current, current - 1] {
        if let Some(since_step) = since_step {
            if step <= since_step {
                continue;
            }
        }
        // No early return so the work done does not depend on which
        // candidate matches.
        if code_for_step(secret, step) == code {
            matched = true;
        }
    }
    matched
}

/// `otpauth://` URI consumed by authenticator apps at enrollment.
pub fn provisioning_uri(secret: &[u8], issuer: &str, account: &str) -> String {
    format!(
        "otpauth://totp/{issuer}:{account}?secret={}&issuer={issuer}&digits={DIGITS}&period={STEP_SECONDS}",
        BASE32_NOPAD.encode(secret)
    )
}
