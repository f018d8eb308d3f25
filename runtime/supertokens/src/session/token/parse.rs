use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::Value;

use crate::Payload;
use crate::session::errors::SessionError;

/// The access token version issued by current cores.
pub const LATEST_ACCESS_TOKEN_VERSION: u32 = 5;

/// The structure of an access token, before its signature has been checked.
#[derive(Debug, Clone)]
pub struct ParsedToken {
    pub raw: String,
    pub version: u32,
    pub kid: Option<String>,
    pub alg: Option<String>,
    /// The decoded payload. Nothing in here can be trusted before verification.
    pub payload: Payload,
}

impl ParsedToken {
    /// Tokens issued before the core started signing with rotating keys.
    ///
    /// They can only be verified by the core.
    pub fn is_legacy(&self) -> bool {
        self.version < 3
    }
}

#[derive(Deserialize)]
struct Header {
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    version: Option<Value>,
}

fn not_parseable() -> SessionError {
    SessionError::unauthorised("The access token is not parseable")
}

/// Split the token and decode its header and payload, without verifying anything.
pub fn parse(token: &str) -> Result<ParsedToken, SessionError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(not_parseable());
    };
    let header: Header = decode_json(header).ok_or_else(not_parseable)?;
    let payload: Payload = decode_json(payload).ok_or_else(not_parseable)?;

    let version = match (&header.kid, &header.version) {
        (_, Some(version)) => parse_version(version).ok_or_else(not_parseable)?,
        // Newer cores may omit the version: a key id is enough to identify a non-legacy token.
        (Some(_), None) => LATEST_ACCESS_TOKEN_VERSION,
        (None, None) => 1,
    };
    if version >= 3 && header.kid.is_none() {
        return Err(not_parseable());
    }
    Ok(ParsedToken {
        raw: token.to_owned(),
        version,
        kid: header.kid,
        alg: header.alg,
        payload,
    })
}

fn parse_version(raw: &Value) -> Option<u32> {
    match raw {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => None,
    }
    .filter(|v| *v >= 1)
}

/// Legacy tokens used padded, standard base64. Current ones use the URL-safe alphabet.
pub(crate) fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    let normalized: String = segment
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    URL_SAFE_NO_PAD.decode(normalized).ok()
}

fn decode_json<T: serde::de::DeserializeOwned>(segment: &str) -> Option<T> {
    serde_json::from_slice(&decode_segment(segment)?).ok()
}
