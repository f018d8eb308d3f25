use std::str::FromStr;

use jsonwebtoken::jwk::{Jwk, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};

use super::jwks::KeyCache;
use super::parse::ParsedToken;
use super::AccessTokenInfo;
use crate::Payload;
use crate::claims::now_ms;
use crate::session::errors::SessionError;

/// Verify a non-legacy access token against the key set published by the core.
///
/// - A token signed with a key we don't know, even after refreshing the key set,
///   asks the client to refresh: the key may have been rotated out.
/// - A token with an invalid signature or an unexpected shape is unauthorised.
/// - An expired token asks the client to refresh.
#[tracing::instrument(name = "Verify access token locally", level = tracing::Level::TRACE, skip_all)]
pub async fn verify_locally(
    token: &ParsedToken,
    keys: &KeyCache,
) -> Result<AccessTokenInfo, SessionError> {
    let Some(kid) = token.kid.as_deref() else {
        return Err(SessionError::unauthorised("The access token has no key id"));
    };
    let snapshot = keys.current().await?;
    let jwk = match snapshot.find(kid) {
        Some(jwk) => jwk.clone(),
        None => {
            let refreshed = keys.refresh_after(&snapshot).await?;
            match refreshed.find(kid) {
                Some(jwk) => jwk.clone(),
                None => {
                    tracing::debug!(kid, "The access token was signed with an unknown key");
                    return Err(SessionError::try_refresh(
                        "The access token was signed with an unknown key",
                    ));
                }
            }
        }
    };

    let algorithm = algorithm(token, &jwk)?;
    let decoding_key = DecodingKey::from_jwk(&jwk).map_err(|e| {
        SessionError::General(
            anyhow::Error::from(e).context("The core published a key we can't use"),
        )
    })?;
    let mut validation = Validation::new(algorithm);
    // Expired tokens must map to TRY_REFRESH_TOKEN, not to a decoding error.
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let claims: Payload = jsonwebtoken::decode::<Payload>(&token.raw, &decoding_key, &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => {
                SessionError::unauthorised("The access token signature is invalid")
            }
            _ => SessionError::unauthorised(format!("The access token is invalid: {e}")),
        })?
        .claims;

    let info = AccessTokenInfo::from_payload(token.version, &claims)?;
    if info.is_expired(now_ms()) {
        return Err(SessionError::try_refresh("The access token has expired"));
    }
    Ok(info)
}

fn algorithm(token: &ParsedToken, jwk: &Jwk) -> Result<Algorithm, SessionError> {
    let from_header = token
        .alg
        .as_deref()
        .map(Algorithm::from_str)
        .transpose()
        .map_err(|_| SessionError::unauthorised("The access token uses an unknown algorithm"))?;
    let from_key = jwk.common.key_algorithm.map(key_algo2algo).transpose()?;
    match (from_header, from_key) {
        (Some(header), Some(key)) if header != key => Err(SessionError::unauthorised(
            "The access token algorithm doesn't match its signing key",
        )),
        (Some(alg), _) | (None, Some(alg)) => Ok(alg),
        (None, None) => Err(SessionError::unauthorised(
            "The access token doesn't specify its signing algorithm",
        )),
    }
}

fn key_algo2algo(key_algorithm: KeyAlgorithm) -> Result<Algorithm, SessionError> {
    match key_algorithm {
        KeyAlgorithm::RS256 => Ok(Algorithm::RS256),
        KeyAlgorithm::ES256 => Ok(Algorithm::ES256),
        KeyAlgorithm::PS256 => Ok(Algorithm::PS256),
        KeyAlgorithm::RS384 => Ok(Algorithm::RS384),
        KeyAlgorithm::ES384 => Ok(Algorithm::ES384),
        KeyAlgorithm::PS384 => Ok(Algorithm::PS384),
        KeyAlgorithm::RS512 => Ok(Algorithm::RS512),
        KeyAlgorithm::PS512 => Ok(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Ok(Algorithm::EdDSA),
        other => Err(SessionError::unauthorised(format!(
            "Access tokens can't be signed with {other:?}"
        ))),
    }
}
