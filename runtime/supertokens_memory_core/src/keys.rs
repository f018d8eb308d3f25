use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::jwk::JwkSet;
use ring::rand::SystemRandom;
use ring::signature::{ED25519, Ed25519KeyPair, KeyPair, UnparsedPublicKey};
use serde_json::json;
use supertokens::Payload;
use supertokens::core::errors::CoreError;
use uuid::Uuid;

/// An Ed25519 key pair, identified by its key id.
#[derive(Debug)]
pub(crate) struct SigningKey {
    kid: String,
    pair: Ed25519KeyPair,
}

impl SigningKey {
    fn generate(kid_prefix: &str) -> Result<Self, CoreError> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| internal("Failed to generate an Ed25519 key pair"))?;
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|e| internal(format!("The generated Ed25519 key pair was rejected: {e}")))?;
        Ok(Self {
            kid: format!("{kid_prefix}-{}", Uuid::new_v4().simple()),
            pair,
        })
    }

    pub(crate) fn kid(&self) -> &str {
        &self.kid
    }

    /// Produce a compact JWT for `payload`, with a version 5 access token header.
    pub(crate) fn sign(&self, payload: &Payload) -> Result<String, CoreError> {
        let header = json!({
            "alg": "EdDSA",
            "typ": "JWT",
            "kid": self.kid,
            "version": "5",
        });
        let payload = serde_json::to_string(payload).map_err(|e| CoreError::Other(e.into()))?;
        let message = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = self.pair.sign(message.as_bytes());
        Ok(format!(
            "{message}.{}",
            URL_SAFE_NO_PAD.encode(signature.as_ref())
        ))
    }

    fn verify(&self, token: &str) -> bool {
        let Some((message, signature)) = token.rsplit_once('.') else {
            return false;
        };
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        UnparsedPublicKey::new(&ED25519, self.pair.public_key().as_ref())
            .verify(message.as_bytes(), &signature)
            .is_ok()
    }
}

/// The keys used to sign access tokens.
///
/// Dynamic keys are rotated on demand; the static key never changes.
/// Every key ever generated keeps being published, so tokens signed with a
/// rotated key remain verifiable until they expire.
#[derive(Debug, Default)]
pub(crate) struct KeyRing {
    dynamic: Vec<SigningKey>,
    fixed: Option<SigningKey>,
}

impl KeyRing {
    pub(crate) fn signing_key(&mut self, dynamic: bool) -> Result<&SigningKey, CoreError> {
        if dynamic {
            if self.dynamic.is_empty() {
                self.rotate()?;
            }
            self.dynamic
                .last()
                .ok_or_else(|| internal("No dynamic signing key available"))
        } else {
            if self.fixed.is_none() {
                self.fixed = Some(SigningKey::generate("s")?);
            }
            self.fixed
                .as_ref()
                .ok_or_else(|| internal("No static signing key available"))
        }
    }

    /// Generate a new dynamic key, which is used to sign every access token from now on.
    pub(crate) fn rotate(&mut self) -> Result<&SigningKey, CoreError> {
        self.dynamic.push(SigningKey::generate("d")?);
        self.dynamic
            .last()
            .ok_or_else(|| internal("No dynamic signing key available"))
    }

    /// Check that `token` was signed by the key it names.
    pub(crate) fn verify(&self, kid: &str, token: &str) -> bool {
        self.keys()
            .find(|key| key.kid == kid)
            .is_some_and(|key| key.verify(token))
    }

    pub(crate) fn jwks(&self) -> Result<JwkSet, CoreError> {
        let keys: Vec<_> = self
            .keys()
            .map(|key| {
                json!({
                    "kty": "OKP",
                    "crv": "Ed25519",
                    "x": URL_SAFE_NO_PAD.encode(key.pair.public_key().as_ref()),
                    "kid": key.kid,
                    "alg": "EdDSA",
                    "use": "sig",
                })
            })
            .collect();
        serde_json::from_value(json!({ "keys": keys })).map_err(|e| CoreError::Other(e.into()))
    }

    fn keys(&self) -> impl Iterator<Item = &SigningKey> {
        self.dynamic.iter().rev().chain(self.fixed.iter())
    }
}

pub(crate) fn internal(message: impl Into<String>) -> CoreError {
    CoreError::Other(anyhow::anyhow!(message.into()))
}
