//! An in-memory implementation of the SuperTokens core protocol, geared towards testing
//! and local development.
//!
//! ```rust
//! use supertokens::core::Core;
//! use supertokens_memory_core::{InMemoryCore, RotationPolicy};
//!
//! let memory = InMemoryCore::new().rotation_policy(RotationPolicy::PromoteOnUse);
//! // Keep a handle around to inspect or tweak the state in tests.
//! let core = Core::new(memory.clone());
//! ```
//!
//! # Limitations
//!
//! Nothing is persisted between restarts and nothing is shared between instances.
//! Access tokens are signed with Ed25519 keys generated on the fly.
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::jwk::JwkSet;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use supertokens::Payload;
use supertokens::core::errors::CoreError;
use supertokens::core::{
    CoreBackend, CoreSession, CreateSessionRequest, IssuedToken, NewSessionTokens,
    RefreshOutcome, RefreshSessionRequest, RegenerateOutcome, SessionInformation, TheftDetails,
    VerifyOutcome, VerifySessionRequest,
};
use supertokens::session::token::{self, AccessTokenInfo, ParsedToken};
use tokio::sync::Mutex;
use uuid::Uuid;

use keys::{KeyRing, internal};

mod keys;

/// What happens to a refresh token once it has been exchanged for a new one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RotationPolicy {
    /// The exchanged token is retired immediately: presenting it again is token theft.
    #[default]
    Strict,
    /// The exchanged token stays valid until its replacement is used, either to refresh
    /// or through an access token issued alongside it.
    ///
    /// Concurrent refreshes with the same token don't trip theft detection.
    PromoteOnUse,
}

#[derive(Debug, Clone, Copy)]
struct Lifetimes {
    policy: RotationPolicy,
    access_token: Duration,
    refresh_token: Duration,
}

#[derive(Clone)]
/// An in-memory SuperTokens core.
///
/// Clones share the same state.
pub struct InMemoryCore {
    state: Arc<Mutex<State>>,
    lifetimes: Lifetimes,
}

impl std::fmt::Debug for InMemoryCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCore")
            .field("policy", &self.lifetimes.policy)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct State {
    sessions: HashMap<String, SessionRecord>,
    keys: KeyRing,
    legacy_tokens: HashSet<String>,
    verified_emails: HashSet<(String, String, String)>,
    user_roles: HashMap<(String, String), BTreeSet<String>>,
    role_permissions: HashMap<String, BTreeSet<String>>,
}

#[derive(Debug)]
struct SessionRecord {
    user_id: String,
    recipe_user_id: String,
    tenant_id: String,
    payload: Payload,
    data: Value,
    created_ms: i64,
    /// When the refresh token stops being accepted.
    expiry_ms: i64,
    anti_csrf_token: Option<String>,
    dynamic_signing_key: bool,
    /// Keyed by the hash of `hash1`, the way the core stores them.
    refresh_tokens: HashMap<String, RefreshToken>,
}

#[derive(Debug)]
struct RefreshToken {
    hash1: String,
    state: RefreshTokenState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RefreshTokenState {
    Current,
    /// Issued by exchanging the current token, not used yet.
    Pending,
    Retired,
}

/// The fields of a signed access token that aren't taken from the session record.
struct AccessTokenClaims<'a> {
    refresh_token_hash1: &'a str,
    parent_refresh_token_hash1: Option<&'a str>,
    iat_s: i64,
    exp_s: i64,
}

fn now_ms() -> i64 {
    jiff::Timestamp::now().as_millisecond()
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

impl SessionRecord {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expiry_ms <= now_ms
    }

    fn core_session(&self, handle: &str) -> CoreSession {
        CoreSession {
            handle: handle.to_owned(),
            user_id: self.user_id.clone(),
            recipe_user_id: Some(self.recipe_user_id.clone()),
            payload: self.payload.clone(),
            tenant_id: self.tenant_id.clone(),
        }
    }

    fn current_hash1(&self) -> Option<&str> {
        self.refresh_tokens
            .values()
            .find(|t| t.state == RefreshTokenState::Current)
            .map(|t| t.hash1.as_str())
    }

    /// Make `hash2` the only valid refresh token of the session.
    fn promote(&mut self, hash2: &str) {
        for (key, token) in self.refresh_tokens.iter_mut() {
            token.state = if key == hash2 {
                RefreshTokenState::Current
            } else {
                RefreshTokenState::Retired
            };
        }
    }

    /// Mint a refresh token for this session and record it with the given state.
    fn mint_refresh_token(&mut self, handle: &str, state: RefreshTokenState) -> (String, String) {
        let token = format!("{handle}.{}", Uuid::new_v4().simple());
        let hash1 = sha256_hex(&token);
        self.refresh_tokens.insert(
            sha256_hex(&hash1),
            RefreshToken {
                hash1: hash1.clone(),
                state,
            },
        );
        (token, hash1)
    }

    fn access_token_payload(&self, handle: &str, claims: &AccessTokenClaims<'_>) -> Payload {
        let mut payload = self.payload.clone();
        token::strip_protected(&mut payload);
        payload.insert("sub".into(), json!(self.user_id));
        payload.insert("rsub".into(), json!(self.recipe_user_id));
        payload.insert("tId".into(), json!(self.tenant_id));
        payload.insert("iat".into(), json!(claims.iat_s));
        payload.insert("exp".into(), json!(claims.exp_s));
        payload.insert("sessionHandle".into(), json!(handle));
        payload.insert("refreshTokenHash1".into(), json!(claims.refresh_token_hash1));
        if let Some(parent) = claims.parent_refresh_token_hash1 {
            payload.insert("parentRefreshTokenHash1".into(), json!(parent));
        }
        if let Some(anti_csrf) = &self.anti_csrf_token {
            payload.insert("antiCsrfToken".into(), json!(anti_csrf));
        }
        payload
    }
}

impl Default for InMemoryCore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCore {
    /// Access tokens live for an hour, refresh tokens for 100 days.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            lifetimes: Lifetimes {
                policy: RotationPolicy::default(),
                access_token: Duration::from_secs(3600),
                refresh_token: Duration::from_secs(100 * 24 * 3600),
            },
        }
    }

    pub fn rotation_policy(mut self, policy: RotationPolicy) -> Self {
        self.lifetimes.policy = policy;
        self
    }

    pub fn access_token_validity(mut self, validity: Duration) -> Self {
        self.lifetimes.access_token = validity;
        self
    }

    pub fn refresh_token_validity(mut self, validity: Duration) -> Self {
        self.lifetimes.refresh_token = validity;
        self
    }

    /// Start signing access tokens with a brand new key. Returns its key id.
    ///
    /// Previous keys are still published.
    pub async fn rotate_signing_key(&self) -> Result<String, CoreError> {
        let mut state = self.state.lock().await;
        Ok(state.keys.rotate()?.kid().to_owned())
    }

    /// The number of live sessions.
    pub async fn session_count(&self) -> usize {
        let now = now_ms();
        let state = self.state.lock().await;
        state.sessions.values().filter(|s| !s.is_expired(now)).count()
    }

    /// Mark `email` as verified for `recipe_user_id` in `tenant_id`.
    pub async fn verify_email(&self, tenant_id: &str, recipe_user_id: &str, email: &str) {
        let mut state = self.state.lock().await;
        state.verified_emails.insert((
            tenant_id.to_owned(),
            recipe_user_id.to_owned(),
            email.to_owned(),
        ));
    }

    /// Create (or replace) `role`, granting `permissions`.
    pub async fn create_role(&self, role: &str, permissions: &[&str]) {
        let mut state = self.state.lock().await;
        state.role_permissions.insert(
            role.to_owned(),
            permissions.iter().map(|p| (*p).to_owned()).collect(),
        );
    }

    /// Assign `role` to `user_id` in `tenant_id`. The role is created if it doesn't exist.
    pub async fn add_role_to_user(&self, tenant_id: &str, user_id: &str, role: &str) {
        let mut state = self.state.lock().await;
        state.role_permissions.entry(role.to_owned()).or_default();
        state
            .user_roles
            .entry((tenant_id.to_owned(), user_id.to_owned()))
            .or_default()
            .insert(role.to_owned());
    }

    /// Sign an access token for an existing session with arbitrary timestamps,
    /// in milliseconds since the Unix epoch.
    ///
    /// Timestamps are truncated to seconds, like every current access token.
    pub async fn issue_access_token_with_times(
        &self,
        handle: &str,
        issued_at_ms: i64,
        expires_at_ms: i64,
    ) -> Result<String, CoreError> {
        let mut state = self.state.lock().await;
        let State { sessions, keys, .. } = &mut *state;
        let record = sessions
            .get(handle)
            .ok_or_else(|| internal(format!("There is no session with handle `{handle}`")))?;
        let refresh_token_hash1 = record
            .current_hash1()
            .ok_or_else(|| internal("The session has no current refresh token"))?;
        let payload = record.access_token_payload(
            handle,
            &AccessTokenClaims {
                refresh_token_hash1,
                parent_refresh_token_hash1: None,
                iat_s: issued_at_ms / 1000,
                exp_s: expires_at_ms / 1000,
            },
        );
        keys.signing_key(record.dynamic_signing_key)?.sign(&payload)
    }

    /// Issue a version 2 access token for an existing session.
    ///
    /// Legacy tokens carry no key id: only the core can verify them.
    pub async fn issue_legacy_access_token(&self, handle: &str) -> Result<String, CoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .sessions
            .get(handle)
            .ok_or_else(|| internal(format!("There is no session with handle `{handle}`")))?;
        let now = now_ms();
        let mut payload = json!({
            "sessionHandle": handle,
            "userId": record.user_id,
            "refreshTokenHash1": record.current_hash1(),
            "userData": record.payload,
            "expiryTime": now + self.access_token_validity_ms(),
            "timeCreated": now,
        });
        if let Some(anti_csrf) = &record.anti_csrf_token {
            payload["antiCsrfToken"] = json!(anti_csrf);
        }
        let header = json!({ "alg": "RS256", "typ": "JWT", "version": "2" });
        let token = format!(
            "{}.{}.{}",
            STANDARD.encode(header.to_string()),
            STANDARD.encode(payload.to_string()),
            Uuid::new_v4().simple()
        );
        state.legacy_tokens.insert(token.clone());
        Ok(token)
    }

    fn access_token_validity_ms(&self) -> i64 {
        i64::try_from(self.lifetimes.access_token.as_millis()).unwrap_or(i64::MAX)
    }

    fn refresh_token_validity_ms(&self) -> i64 {
        i64::try_from(self.lifetimes.refresh_token.as_millis()).unwrap_or(i64::MAX)
    }

    /// Sign a fresh access token for `handle`, valid from now.
    fn issue_access_token(
        &self,
        keys: &mut KeyRing,
        handle: &str,
        record: &SessionRecord,
        refresh_token_hash1: &str,
        parent_refresh_token_hash1: Option<&str>,
    ) -> Result<IssuedToken, CoreError> {
        let iat_s = now_ms() / 1000;
        let exp_s = iat_s + self.access_token_validity_ms() / 1000;
        let claims = AccessTokenClaims {
            refresh_token_hash1,
            parent_refresh_token_hash1,
            iat_s,
            exp_s,
        };
        let payload = record.access_token_payload(handle, &claims);
        Ok(IssuedToken {
            token: keys.signing_key(record.dynamic_signing_key)?.sign(&payload)?,
            expiry: exp_s * 1000,
            created_time: iat_s * 1000,
        })
    }
}

/// Check the signature of `parsed` and decode what it says about its session.
///
/// `None` if the token wasn't issued by this core.
fn authenticate(state: &State, parsed: &ParsedToken) -> Option<AccessTokenInfo> {
    let authentic = if parsed.is_legacy() {
        state.legacy_tokens.contains(&parsed.raw)
    } else {
        parsed
            .kid
            .as_deref()
            .is_some_and(|kid| state.keys.verify(kid, &parsed.raw))
    };
    if !authentic {
        return None;
    }
    AccessTokenInfo::from_payload(parsed.version, &parsed.payload).ok()
}

#[async_trait::async_trait]
impl CoreBackend for InMemoryCore {
    #[tracing::instrument(name = "Create session in memory", level = tracing::Level::TRACE, skip_all)]
    async fn create_session(
        &self,
        request: CreateSessionRequest<'_>,
    ) -> Result<NewSessionTokens, CoreError> {
        let now = now_ms();
        let handle = Uuid::new_v4().to_string();
        let mut payload = request.access_token_payload.clone();
        token::strip_protected(&mut payload);
        let mut record = SessionRecord {
            user_id: request.recipe_user_id.to_owned(),
            recipe_user_id: request.recipe_user_id.to_owned(),
            tenant_id: request.tenant_id.to_owned(),
            payload,
            data: request.session_data_in_database.clone(),
            created_ms: now,
            expiry_ms: now.saturating_add(self.refresh_token_validity_ms()),
            anti_csrf_token: request
                .enable_anti_csrf
                .then(|| Uuid::new_v4().to_string()),
            dynamic_signing_key: request.use_dynamic_signing_key,
            refresh_tokens: HashMap::new(),
        };
        let (refresh_token, hash1) =
            record.mint_refresh_token(&handle, RefreshTokenState::Current);

        let mut state = self.state.lock().await;
        let access_token = self.issue_access_token(&mut state.keys, &handle, &record, &hash1, None)?;
        let tokens = NewSessionTokens {
            session: record.core_session(&handle),
            access_token,
            refresh_token: IssuedToken {
                token: refresh_token,
                expiry: record.expiry_ms,
                created_time: now,
            },
            anti_csrf_token: record.anti_csrf_token.clone(),
        };
        state.sessions.insert(handle, record);
        Ok(tokens)
    }

    #[tracing::instrument(name = "Verify session in memory", level = tracing::Level::TRACE, skip_all)]
    async fn verify_session(
        &self,
        request: VerifySessionRequest<'_>,
    ) -> Result<VerifyOutcome, CoreError> {
        let unauthorised = |message: &str| VerifyOutcome::Unauthorised {
            message: message.to_owned(),
        };
        let Ok(parsed) = token::parse(request.access_token) else {
            return Ok(unauthorised("The access token is not parseable"));
        };
        let now = now_ms();
        let mut state = self.state.lock().await;
        let Some(info) = authenticate(&state, &parsed) else {
            return Ok(unauthorised("The access token was not issued by this core"));
        };
        if info.is_expired(now) {
            return Ok(VerifyOutcome::TryRefreshToken {
                message: "The access token has expired".into(),
            });
        }
        let State { sessions, keys, .. } = &mut *state;
        let Some(record) = sessions
            .get_mut(&info.session_handle)
            .filter(|r| !r.is_expired(now))
        else {
            return Ok(unauthorised("The session does not exist or has expired"));
        };
        if request.enable_anti_csrf
            && request.do_anti_csrf_check
            && info.anti_csrf_token.is_some()
            && info.anti_csrf_token.as_deref() != request.anti_csrf_token
        {
            return Ok(VerifyOutcome::TryRefreshToken {
                message: "The anti-CSRF check failed".into(),
            });
        }

        let mut access_token = None;
        if info.parent_refresh_token_hash1.is_some() {
            let hash2 = sha256_hex(&info.refresh_token_hash1);
            match record.refresh_tokens.get(&hash2).map(|t| t.state.clone()) {
                Some(RefreshTokenState::Pending) => record.promote(&hash2),
                Some(RefreshTokenState::Current) => {}
                Some(RefreshTokenState::Retired) | None => {
                    return Ok(unauthorised(
                        "The refresh token paired with this access token is no longer valid",
                    ));
                }
            }
            tracing::trace!(session.handle = %info.session_handle, "Committed a pending refresh");
            access_token = Some(self.issue_access_token(
                keys,
                &info.session_handle,
                record,
                &info.refresh_token_hash1,
                None,
            )?);
        }
        Ok(VerifyOutcome::Ok {
            session: record.core_session(&info.session_handle),
            access_token,
        })
    }

    #[tracing::instrument(name = "Refresh session in memory", level = tracing::Level::TRACE, skip_all)]
    async fn refresh_session(
        &self,
        request: RefreshSessionRequest<'_>,
    ) -> Result<RefreshOutcome, CoreError> {
        let unauthorised = |message: &str| RefreshOutcome::Unauthorised {
            message: message.to_owned(),
        };
        let Some((handle, _)) = request.refresh_token.split_once('.') else {
            return Ok(unauthorised("The refresh token is not parseable"));
        };
        let now = now_ms();
        let mut state = self.state.lock().await;
        let State { sessions, keys, .. } = &mut *state;
        if sessions.get(handle).is_some_and(|r| r.is_expired(now)) {
            sessions.remove(handle);
            return Ok(unauthorised("The session has expired"));
        }
        let Some(record) = sessions.get_mut(handle) else {
            return Ok(unauthorised("The session does not exist"));
        };
        if request.enable_anti_csrf
            && record.anti_csrf_token.is_some()
            && record.anti_csrf_token.as_deref() != request.anti_csrf_token
        {
            return Ok(unauthorised("The anti-CSRF token doesn't match"));
        }

        let hash1 = sha256_hex(request.refresh_token);
        let hash2 = sha256_hex(&hash1);
        let Some(presented) = record.refresh_tokens.get(&hash2).map(|t| t.state.clone()) else {
            return Ok(unauthorised("The refresh token was not issued by this core"));
        };
        if presented == RefreshTokenState::Retired {
            tracing::debug!(session.handle = %handle, "A retired refresh token was presented, revoking the session");
            let details = TheftDetails {
                handle: handle.to_owned(),
                user_id: record.user_id.clone(),
                recipe_user_id: Some(record.recipe_user_id.clone()),
            };
            // Theft is terminal: no token of this lineage may be exchanged again.
            sessions.remove(handle);
            return Ok(RefreshOutcome::TokenTheftDetected { session: details });
        }

        if presented == RefreshTokenState::Pending {
            record.promote(&hash2);
        }
        let (refresh_token, new_hash1, parent) = match self.lifetimes.policy {
            RotationPolicy::Strict => {
                let (token, new_hash1) =
                    record.mint_refresh_token(handle, RefreshTokenState::Current);
                record.promote(&sha256_hex(&new_hash1));
                (token, new_hash1, None)
            }
            RotationPolicy::PromoteOnUse => {
                let (token, new_hash1) =
                    record.mint_refresh_token(handle, RefreshTokenState::Pending);
                (token, new_hash1, Some(hash1))
            }
        };
        if request.enable_anti_csrf && record.anti_csrf_token.is_some() {
            record.anti_csrf_token = Some(Uuid::new_v4().to_string());
        }
        record.expiry_ms = now.saturating_add(self.refresh_token_validity_ms());

        let access_token =
            self.issue_access_token(keys, handle, record, &new_hash1, parent.as_deref())?;
        Ok(RefreshOutcome::Ok(NewSessionTokens {
            session: record.core_session(handle),
            access_token,
            refresh_token: IssuedToken {
                token: refresh_token,
                expiry: record.expiry_ms,
                created_time: now,
            },
            anti_csrf_token: record.anti_csrf_token.clone(),
        }))
    }

    #[tracing::instrument(name = "Regenerate session in memory", level = tracing::Level::TRACE, skip_all)]
    async fn regenerate_session(
        &self,
        access_token: &str,
        payload: Option<&Payload>,
    ) -> Result<RegenerateOutcome, CoreError> {
        let unauthorised = |message: &str| RegenerateOutcome::Unauthorised {
            message: message.to_owned(),
        };
        let Ok(parsed) = token::parse(access_token) else {
            return Ok(unauthorised("The access token is not parseable"));
        };
        let now = now_ms();
        let mut state = self.state.lock().await;
        let Some(info) = authenticate(&state, &parsed) else {
            return Ok(unauthorised("The access token was not issued by this core"));
        };
        let State { sessions, keys, .. } = &mut *state;
        let Some(record) = sessions
            .get_mut(&info.session_handle)
            .filter(|r| !r.is_expired(now))
        else {
            return Ok(unauthorised("The session does not exist or has expired"));
        };
        if let Some(payload) = payload {
            let mut payload = payload.clone();
            token::strip_protected(&mut payload);
            record.payload = payload;
        }
        let session = record.core_session(&info.session_handle);
        if parsed.is_legacy() {
            return Ok(RegenerateOutcome::Ok {
                session,
                access_token: None,
            });
        }
        // The new token keeps the lifetime of the one it replaces.
        let claims = AccessTokenClaims {
            refresh_token_hash1: &info.refresh_token_hash1,
            parent_refresh_token_hash1: info.parent_refresh_token_hash1.as_deref(),
            iat_s: info.time_created_ms / 1000,
            exp_s: info.expiry_ms / 1000,
        };
        let token = keys
            .signing_key(record.dynamic_signing_key)?
            .sign(&record.access_token_payload(&info.session_handle, &claims))?;
        Ok(RegenerateOutcome::Ok {
            session,
            access_token: Some(IssuedToken {
                token,
                expiry: info.expiry_ms,
                created_time: info.time_created_ms,
            }),
        })
    }

    #[tracing::instrument(name = "Revoke sessions in memory", level = tracing::Level::TRACE, skip_all)]
    async fn revoke_sessions(&self, handles: &[String]) -> Result<Vec<String>, CoreError> {
        let mut state = self.state.lock().await;
        Ok(handles
            .iter()
            .filter(|h| state.sessions.remove(h.as_str()).is_some())
            .cloned()
            .collect())
    }

    #[tracing::instrument(name = "Revoke user sessions in memory", level = tracing::Level::TRACE, skip_all)]
    async fn revoke_all_sessions_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<String>, CoreError> {
        let mut state = self.state.lock().await;
        let handles = handles_for_user(&state, user_id, tenant_id);
        for handle in &handles {
            state.sessions.remove(handle);
        }
        Ok(handles)
    }

    #[tracing::instrument(name = "List user sessions in memory", level = tracing::Level::TRACE, skip_all)]
    async fn session_handles_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<String>, CoreError> {
        let state = self.state.lock().await;
        Ok(handles_for_user(&state, user_id, tenant_id))
    }

    #[tracing::instrument(name = "Load session information from memory", level = tracing::Level::TRACE, skip_all)]
    async fn session_information(
        &self,
        handle: &str,
    ) -> Result<Option<SessionInformation>, CoreError> {
        let now = now_ms();
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .get(handle)
            .filter(|r| !r.is_expired(now))
            .map(|r| SessionInformation {
                session_handle: handle.to_owned(),
                user_id: r.user_id.clone(),
                recipe_user_id: r.recipe_user_id.clone(),
                tenant_id: r.tenant_id.clone(),
                session_data_in_database: r.data.clone(),
                custom_claims_in_access_token_payload: r.payload.clone(),
                expiry: r.expiry_ms,
                time_created: r.created_ms,
            }))
    }

    #[tracing::instrument(name = "Update session data in memory", level = tracing::Level::TRACE, skip_all)]
    async fn update_session_data(&self, handle: &str, data: &Value) -> Result<bool, CoreError> {
        let now = now_ms();
        let mut state = self.state.lock().await;
        let Some(record) = state.sessions.get_mut(handle).filter(|r| !r.is_expired(now)) else {
            return Ok(false);
        };
        record.data = data.clone();
        Ok(true)
    }

    #[tracing::instrument(name = "Update access token payload in memory", level = tracing::Level::TRACE, skip_all)]
    async fn update_access_token_payload(
        &self,
        handle: &str,
        payload: &Payload,
    ) -> Result<bool, CoreError> {
        let now = now_ms();
        let mut state = self.state.lock().await;
        let Some(record) = state.sessions.get_mut(handle).filter(|r| !r.is_expired(now)) else {
            return Ok(false);
        };
        let mut payload = payload.clone();
        token::strip_protected(&mut payload);
        record.payload = payload;
        Ok(true)
    }

    #[tracing::instrument(name = "Publish signing keys from memory", level = tracing::Level::TRACE, skip_all)]
    async fn jwks(&self) -> Result<JwkSet, CoreError> {
        let state = self.state.lock().await;
        state.keys.jwks()
    }

    async fn is_email_verified(
        &self,
        tenant_id: &str,
        recipe_user_id: &str,
        email: &str,
    ) -> Result<bool, CoreError> {
        let state = self.state.lock().await;
        Ok(state.verified_emails.contains(&(
            tenant_id.to_owned(),
            recipe_user_id.to_owned(),
            email.to_owned(),
        )))
    }

    async fn roles_for_user(&self, tenant_id: &str, user_id: &str) -> Result<Vec<String>, CoreError> {
        let state = self.state.lock().await;
        Ok(state
            .user_roles
            .get(&(tenant_id.to_owned(), user_id.to_owned()))
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn permissions_for_role(&self, role: &str) -> Result<Option<Vec<String>>, CoreError> {
        let state = self.state.lock().await;
        Ok(state
            .role_permissions
            .get(role)
            .map(|permissions| permissions.iter().cloned().collect()))
    }
}

fn handles_for_user(state: &State, user_id: &str, tenant_id: Option<&str>) -> Vec<String> {
    let now = now_ms();
    let mut handles: Vec<String> = state
        .sessions
        .iter()
        .filter(|(_, r)| r.user_id == user_id && !r.is_expired(now))
        .filter(|(_, r)| tenant_id.is_none_or(|t| r.tenant_id == t))
        .map(|(handle, _)| handle.clone())
        .collect();
    handles.sort();
    handles
}
