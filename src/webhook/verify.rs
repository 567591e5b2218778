// Subscription verification handshake.
//
// The platform calls GET /webhook?hub.mode=subscribe&hub.verify_token=...&hub.challenge=...
// once when the subscription is created and expects the challenge echoed back.

use serde::Deserialize;

/// The only mode the handshake accepts.
pub const SUBSCRIBE_MODE: &str = "subscribe";

/// Query parameters of a verification request. All optional: a missing
/// parameter simply fails verification.
#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Echo this challenge back with 200.
    Accepted(String),
    /// Wrong mode or token: 403, no body.
    Mismatch,
}

/// Decide the handshake. An empty configured token never verifies.
pub fn verify_subscription(params: &VerifyParams, expected_token: &str) -> VerifyOutcome {
    let mode_ok = params.mode.as_deref() == Some(SUBSCRIBE_MODE);
    let token_ok = !expected_token.is_empty()
        && params.verify_token.as_deref() == Some(expected_token);

    if mode_ok && token_ok {
        VerifyOutcome::Accepted(params.challenge.clone().unwrap_or_default())
    } else {
        VerifyOutcome::Mismatch
    }
}
