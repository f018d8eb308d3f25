use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::Payload;

/// The session summary sent to the frontend in the `front-token` header.
///
/// It lets frontend code read the user id, the expiry and the claims
/// without having access to the (http-only) access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontToken {
    #[serde(rename = "uid")]
    pub user_id: String,
    /// Access token expiry, in milliseconds since the Unix epoch.
    #[serde(rename = "ate")]
    pub access_token_expiry: i64,
    #[serde(rename = "up")]
    pub payload: Payload,
}

pub fn encode_front_token(user_id: &str, access_token_expiry: i64, payload: &Payload) -> String {
    let token = serde_json::json!({
        "uid": user_id,
        "ate": access_token_expiry,
        "up": payload,
    });
    STANDARD.encode(token.to_string())
}

/// `None` if the token is not valid base64-encoded JSON.
pub fn decode_front_token(raw: &str) -> Option<FrontToken> {
    let bytes = STANDARD.decode(raw).ok()?;
    serde_json::from_slice(&bytes).ok()
}
