//! Key set cache for identity provider signing keys.
//!
//! The cache holds the provider's current public keys keyed by `kid`. It
//! starts empty, is filled on first use or by an explicit [`KeySetCache::refresh`],
//! and is replaced wholesale when a lookup misses. There is no TTL: rotation is
//! detected by the first token signed with a key the cache has not seen.
//!
//! # Concurrency
//!
//! - Readers clone an `Arc<KeySnapshot>` under a short read lock
//! - A refresh builds a complete snapshot off to the side and swaps it in
//! - Refreshes are serialised. Every completed fetch, failed or not, bumps an
//!   attempt counter; a miss-driven refresh that finds the counter moved while
//!   it waited reuses that attempt's outcome instead of fetching again
//!
//! # Security
//!
//! - Only asymmetric keys published for signing are admitted
//! - A failed fetch never clears or partially updates the current set

use crate::errors::AuthError;
use crate::observability::metrics;
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

// =============================================================================
// Wire types
// =============================================================================

/// JSON Web Key as published by the provider.
///
/// Every member is optional on the wire; [`SigningKey::from_jwk`] decides
/// which combinations are usable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kid: Option<String>,

    /// Key type ("RSA", "EC", "OKP", "oct").
    #[serde(default)]
    pub kty: Option<String>,

    /// Key use (should be "sig" for signing).
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// Curve name for EC and OKP keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// JWKS document.
///
/// Entries are kept as raw JSON so one malformed key cannot reject the
/// whole document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Value>,
}

// =============================================================================
// Signing keys
// =============================================================================

/// Key family. A key only verifies algorithms of its own family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ec,
    Okp,
}

impl KeyFamily {
    pub fn admits(self, alg: Algorithm) -> bool {
        match self {
            KeyFamily::Rsa => matches!(
                alg,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ),
            KeyFamily::Ec => matches!(alg, Algorithm::ES256 | Algorithm::ES384),
            KeyFamily::Okp => alg == Algorithm::EdDSA,
        }
    }
}

/// Why a published JWK was not admitted to the cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JwkError {
    #[error("key has no kid")]
    MissingKid,

    #[error("key use '{0}' is not 'sig'")]
    NotForSigning(String),

    #[error("unsupported key type '{0}'")]
    UnsupportedKeyType(String),

    #[error("unsupported curve '{0}'")]
    UnsupportedCurve(String),

    #[error("algorithm '{0}' is not valid for this key")]
    UnsupportedAlgorithm(String),

    #[error("key is missing '{0}'")]
    MissingMaterial(&'static str),

    #[error("key material is invalid: {0}")]
    InvalidMaterial(String),
}

/// A verified-usable public key from the key set.
///
/// Immutable once built.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    family: KeyFamily,
    alg: Option<Algorithm>,
    decoding_key: DecodingKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("family", &self.family)
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Build a signing key from a published JWK.
    ///
    /// # Errors
    ///
    /// Returns a [`JwkError`] for symmetric keys, keys not published for
    /// signing, unknown types or curves, an `alg` outside the key's family,
    /// and missing or undecodable material.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, JwkError> {
        let kid = jwk
            .kid
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(JwkError::MissingKid)?
            .to_string();

        if let Some(key_use) = jwk.key_use.as_deref() {
            if key_use != "sig" {
                return Err(JwkError::NotForSigning(key_use.to_string()));
            }
        }

        let declared = jwk
            .alg
            .as_deref()
            .map(|alg| {
                parse_asymmetric_algorithm(alg)
                    .ok_or_else(|| JwkError::UnsupportedAlgorithm(alg.to_string()))
            })
            .transpose()?;

        let kty = jwk.kty.as_deref().unwrap_or_default();
        let (family, alg, decoding_key) = match kty {
            "RSA" => {
                let n = jwk.n.as_deref().ok_or(JwkError::MissingMaterial("n"))?;
                let e = jwk.e.as_deref().ok_or(JwkError::MissingMaterial("e"))?;
                let key = DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| JwkError::InvalidMaterial(e.to_string()))?;
                (KeyFamily::Rsa, declared, key)
            }
            "EC" => {
                let crv = jwk.crv.as_deref().ok_or(JwkError::MissingMaterial("crv"))?;
                let curve_alg = match crv {
                    "P-256" => Algorithm::ES256,
                    "P-384" => Algorithm::ES384,
                    other => return Err(JwkError::UnsupportedCurve(other.to_string())),
                };
                if declared.is_some_and(|alg| alg != curve_alg) {
                    return Err(JwkError::UnsupportedAlgorithm(
                        jwk.alg.clone().unwrap_or_default(),
                    ));
                }
                let x = jwk.x.as_deref().ok_or(JwkError::MissingMaterial("x"))?;
                let y = jwk.y.as_deref().ok_or(JwkError::MissingMaterial("y"))?;
                let key = DecodingKey::from_ec_components(x, y)
                    .map_err(|e| JwkError::InvalidMaterial(e.to_string()))?;
                (KeyFamily::Ec, Some(curve_alg), key)
            }
            "OKP" => {
                let crv = jwk.crv.as_deref().ok_or(JwkError::MissingMaterial("crv"))?;
                if crv != "Ed25519" {
                    return Err(JwkError::UnsupportedCurve(crv.to_string()));
                }
                if declared.is_some_and(|alg| alg != Algorithm::EdDSA) {
                    return Err(JwkError::UnsupportedAlgorithm(
                        jwk.alg.clone().unwrap_or_default(),
                    ));
                }
                let x = jwk.x.as_deref().ok_or(JwkError::MissingMaterial("x"))?;
                let key = DecodingKey::from_ed_components(x)
                    .map_err(|e| JwkError::InvalidMaterial(e.to_string()))?;
                (KeyFamily::Okp, Some(Algorithm::EdDSA), key)
            }
            other => return Err(JwkError::UnsupportedKeyType(other.to_string())),
        };

        if let Some(alg) = alg {
            if !family.admits(alg) {
                return Err(JwkError::UnsupportedAlgorithm(format!("{alg:?}")));
            }
        }

        Ok(Self {
            kid,
            family,
            alg,
            decoding_key,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// Algorithm the key is pinned to, if any.
    pub fn alg(&self) -> Option<Algorithm> {
        self.alg
    }

    /// Whether a token declaring `alg` may be verified with this key.
    pub fn supports(&self, alg: Algorithm) -> bool {
        self.family.admits(alg) && self.alg.map_or(true, |pinned| pinned == alg)
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

/// Map an algorithm name to one of the accepted asymmetric algorithms.
///
/// Symmetric (`HS*`) and `none` return `None`.
pub fn parse_asymmetric_algorithm(alg: &str) -> Option<Algorithm> {
    match alg {
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "PS256" => Some(Algorithm::PS256),
        "PS384" => Some(Algorithm::PS384),
        "PS512" => Some(Algorithm::PS512),
        "ES256" => Some(Algorithm::ES256),
        "ES384" => Some(Algorithm::ES384),
        "EdDSA" => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Build the kid → key map for a fetched document.
///
/// Unusable entries are skipped with a warning. On duplicate kids the
/// later entry wins.
fn build_key_map(document: JwksDocument) -> HashMap<String, Arc<SigningKey>> {
    let mut keys = HashMap::with_capacity(document.keys.len());

    for raw in document.keys {
        let jwk: Jwk = match serde_json::from_value(raw) {
            Ok(jwk) => jwk,
            Err(e) => {
                tracing::warn!(target: "gateway.auth.jwks", error = %e, "Skipping unparseable JWK");
                continue;
            }
        };

        match SigningKey::from_jwk(&jwk) {
            Ok(key) => {
                let kid = key.kid.clone();
                if keys.insert(kid.clone(), Arc::new(key)).is_some() {
                    tracing::warn!(target: "gateway.auth.jwks", kid = %kid, "Duplicate kid in key set, keeping last");
                }
            }
            Err(e) => {
                tracing::warn!(
                    target: "gateway.auth.jwks",
                    kid = jwk.kid.as_deref().unwrap_or("<none>"),
                    kty = jwk.kty.as_deref().unwrap_or("<none>"),
                    error = %e,
                    "Skipping unusable JWK"
                );
            }
        }
    }

    keys
}

// =============================================================================
// Key sources
// =============================================================================

/// Why a key set could not be fetched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("key set fetch timed out")]
    Timeout,

    #[error("key set request failed: {0}")]
    Transport(String),

    #[error("key set endpoint returned HTTP {0}")]
    Status(u16),

    #[error("key set response is invalid: {0}")]
    InvalidBody(String),
}

impl FetchError {
    /// Bounded label for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::Transport(_) => "http_error",
            FetchError::Status(_) => "http_status",
            FetchError::InvalidBody(_) => "invalid_response",
        }
    }
}

/// Where key sets come from.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetch the full current key set.
    async fn fetch(&self) -> Result<JwksDocument, FetchError>;
}

/// Fetches the key set over HTTP(S) with a hard timeout.
pub struct HttpKeySource {
    url: String,
    client: reqwest::Client,
}

impl HttpKeySource {
    /// Create a source for `url`.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<JwksDocument, FetchError> {
        tracing::debug!(target: "gateway.auth.jwks", url = %self.url, "Fetching key set");

        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response.json::<JwksDocument>().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::InvalidBody(e.to_string())
            }
        })
    }
}

/// In-memory key source for tests and fixed deployments.
///
/// Serves whatever was last published and counts fetches.
pub struct StaticKeySource {
    response: RwLock<Result<JwksDocument, FetchError>>,
    fetches: AtomicUsize,
}

impl StaticKeySource {
    pub fn new(document: JwksDocument) -> Self {
        Self {
            response: RwLock::new(Ok(document)),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Serve `document` from the next fetch on.
    pub async fn publish(&self, document: JwksDocument) {
        *self.response.write().await = Ok(document);
    }

    /// Fail every fetch with `error` until the next publish.
    pub async fn fail_with(&self, error: FetchError) {
        *self.response.write().await = Err(error);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Default for StaticKeySource {
    fn default() -> Self {
        Self::new(JwksDocument::default())
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch(&self) -> Result<JwksDocument, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.response.read().await.clone()
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Immutable view of the key set at one generation.
#[derive(Debug, Default)]
pub struct KeySnapshot {
    keys: HashMap<String, Arc<SigningKey>>,
    generation: u64,
}

impl KeySnapshot {
    pub fn get(&self, kid: &str) -> Option<&Arc<SigningKey>> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Process-wide cache of the provider's signing keys.
///
/// Owned by the verifier (usually behind an `Arc`) and injected, so tests can
/// run against isolated fixture key sets.
pub struct KeySetCache {
    source: Arc<dyn KeySource>,
    snapshot: RwLock<Arc<KeySnapshot>>,
    /// Completed fetches. Bumped after the snapshot swap.
    attempts: AtomicU64,
    /// Serialises fetches. Holds the error of the latest attempt, `None` on success.
    refresh_lock: Mutex<Option<AuthError>>,
}

impl KeySetCache {
    /// Create an empty cache backed by `source`.
    pub fn new(source: Arc<dyn KeySource>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(Arc::new(KeySnapshot::default())),
            attempts: AtomicU64::new(0),
            refresh_lock: Mutex::new(None),
        }
    }

    /// Get a key by ID, refreshing once on a miss.
    ///
    /// # Errors
    ///
    /// - `KeyNotFound` if the key is absent after the refresh
    /// - `KeySetUnavailable` if the refresh itself failed
    #[instrument(skip_all, name = "gateway.auth.jwks.get")]
    pub async fn get(&self, kid: &str) -> Result<Arc<SigningKey>, AuthError> {
        // Read before the snapshot so a counted attempt is never older than it
        let observed_attempt = self.attempts.load(Ordering::SeqCst);
        let observed = self.current().await;
        if let Some(key) = observed.get(kid) {
            tracing::debug!(target: "gateway.auth.jwks", kid = %kid, "Key set cache hit");
            return Ok(Arc::clone(key));
        }

        tracing::debug!(
            target: "gateway.auth.jwks",
            kid = %kid,
            generation = observed.generation,
            "Key set cache miss, refreshing"
        );

        let refreshed = self.refresh_after(observed_attempt).await?;
        refreshed.get(kid).cloned().ok_or_else(|| {
            tracing::warn!(target: "gateway.auth.jwks", kid = %kid, "Key not found in key set after refresh");
            AuthError::KeyNotFound(kid.to_string())
        })
    }

    /// Fetch the current key set and swap it in.
    ///
    /// Always fetches, even if another refresh just completed.
    ///
    /// # Errors
    ///
    /// Returns `KeySetUnavailable` if the fetch fails. The previous set stays in place.
    #[instrument(skip_all, name = "gateway.auth.jwks.refresh")]
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let mut last_error = self.refresh_lock.lock().await;
        self.fetch_and_swap(&mut last_error).await.map(|_| ())
    }

    /// IDs of the cached keys, sorted.
    pub async fn key_ids(&self) -> Vec<String> {
        let snapshot = self.current().await;
        let mut ids: Vec<String> = snapshot.keys.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of successful refreshes so far.
    pub async fn generation(&self) -> u64 {
        self.current().await.generation
    }

    /// Whether at least one fetch has succeeded.
    pub async fn is_populated(&self) -> bool {
        self.generation().await > 0
    }

    /// Current snapshot.
    pub async fn current(&self) -> Arc<KeySnapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// Refresh unless an attempt newer than `observed_attempt` has completed,
    /// in which case that attempt's outcome is returned.
    async fn refresh_after(&self, observed_attempt: u64) -> Result<Arc<KeySnapshot>, AuthError> {
        let mut last_error = self.refresh_lock.lock().await;

        if self.attempts.load(Ordering::SeqCst) > observed_attempt {
            tracing::debug!(
                target: "gateway.auth.jwks",
                failed = last_error.is_some(),
                "Key set already fetched by a concurrent caller"
            );
            return match last_error.as_ref() {
                Some(e) => Err(e.clone()),
                None => Ok(self.current().await),
            };
        }

        self.fetch_and_swap(&mut last_error).await
    }

    /// Caller passes the guard of `refresh_lock`.
    async fn fetch_and_swap(
        &self,
        last_error: &mut Option<AuthError>,
    ) -> Result<Arc<KeySnapshot>, AuthError> {
        let start = Instant::now();

        let document = match self.source.fetch().await {
            Ok(document) => document,
            Err(e) => {
                let duration = start.elapsed();
                tracing::error!(
                    target: "gateway.auth.jwks",
                    error = %e,
                    error_type = e.error_type(),
                    duration_ms = duration.as_millis(),
                    "Failed to fetch key set, keeping previous keys"
                );
                metrics::record_jwks_refresh("error", duration);
                metrics::record_jwks_refresh_failure(e.error_type());
                let error = AuthError::KeySetUnavailable(e.to_string());
                *last_error = Some(error.clone());
                self.attempts.fetch_add(1, Ordering::SeqCst);
                return Err(error);
            }
        };

        let keys = build_key_map(document);
        let key_count = keys.len();

        let mut slot = self.snapshot.write().await;
        let snapshot = Arc::new(KeySnapshot {
            keys,
            generation: slot.generation + 1,
        });
        *slot = Arc::clone(&snapshot);
        drop(slot);
        *last_error = None;
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let duration = start.elapsed();
        metrics::record_jwks_refresh("success", duration);
        metrics::set_jwks_key_count(key_count);

        tracing::info!(
            target: "gateway.auth.jwks",
            key_count,
            generation = snapshot.generation,
            duration_ms = duration.as_millis(),
            "Key set refreshed"
        );

        Ok(snapshot)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use auth_test_utils::{RsaFixture, TestKeypair};
    use serde_json::json;

    fn document(keys: &[&TestKeypair]) -> JwksDocument {
        JwksDocument {
            keys: keys.iter().map(|k| k.jwk_json()).collect(),
        }
    }

    fn cache_with(source: &Arc<StaticKeySource>) -> KeySetCache {
        KeySetCache::new(Arc::clone(source) as Arc<dyn KeySource>)
    }

    // -------------------------------------------------------------------------
    // JWK parsing
    // -------------------------------------------------------------------------

    #[test]
    fn test_jwk_deserialization() {
        let jwk: Jwk = serde_json::from_value(json!({
            "kty": "RSA",
            "kid": "key-1",
            "use": "sig",
            "alg": "RS256",
            "n": "AQAB",
            "e": "AQAB"
        }))
        .unwrap();

        assert_eq!(jwk.kty.as_deref(), Some("RSA"));
        assert_eq!(jwk.key_use.as_deref(), Some("sig"));
        assert_eq!(jwk.alg.as_deref(), Some("RS256"));
    }

    #[test]
    fn test_signing_key_from_each_family() {
        let rsa = SigningKey::from_jwk(
            &serde_json::from_value(TestKeypair::rsa(RsaFixture::Primary, "r").jwk_json()).unwrap(),
        )
        .unwrap();
        assert_eq!(rsa.family(), KeyFamily::Rsa);
        assert_eq!(rsa.alg(), Some(Algorithm::RS256));

        let ec = SigningKey::from_jwk(
            &serde_json::from_value(TestKeypair::ec_p256("e").jwk_json()).unwrap(),
        )
        .unwrap();
        assert_eq!(ec.family(), KeyFamily::Ec);
        assert_eq!(ec.alg(), Some(Algorithm::ES256));

        let ed = SigningKey::from_jwk(
            &serde_json::from_value(TestKeypair::ed25519(1, "o").jwk_json()).unwrap(),
        )
        .unwrap();
        assert_eq!(ed.family(), KeyFamily::Okp);
        assert_eq!(ed.alg(), Some(Algorithm::EdDSA));
    }

    #[test]
    fn test_signing_key_supports() {
        let pinned = SigningKey::from_jwk(
            &serde_json::from_value(TestKeypair::rsa(RsaFixture::Primary, "r").jwk_json()).unwrap(),
        )
        .unwrap();
        assert!(pinned.supports(Algorithm::RS256));
        assert!(!pinned.supports(Algorithm::RS384));
        assert!(!pinned.supports(Algorithm::ES256));
        assert!(!pinned.supports(Algorithm::HS256));

        let unpinned = SigningKey::from_jwk(
            &serde_json::from_value(
                TestKeypair::rsa(RsaFixture::Primary, "r")
                    .without_jwk_alg()
                    .jwk_json(),
            )
            .unwrap(),
        )
        .unwrap();
        assert!(unpinned.supports(Algorithm::RS256));
        assert!(unpinned.supports(Algorithm::PS512));
        assert!(!unpinned.supports(Algorithm::EdDSA));
    }

    #[test]
    fn test_rejected_jwks() {
        let cases = [
            (json!({"kty": "oct", "kid": "k", "k": "c2VjcmV0"}), "unsupported key type"),
            (json!({"kty": "RSA", "kid": "k", "use": "enc", "n": "AQAB", "e": "AQAB"}), "not 'sig'"),
            (json!({"kty": "RSA", "n": "AQAB", "e": "AQAB"}), "no kid"),
            (json!({"kty": "RSA", "kid": "", "n": "AQAB", "e": "AQAB"}), "no kid"),
            (json!({"kty": "RSA", "kid": "k", "e": "AQAB"}), "missing 'n'"),
            (json!({"kty": "RSA", "kid": "k", "alg": "HS256", "n": "AQAB", "e": "AQAB"}), "HS256"),
            (json!({"kty": "RSA", "kid": "k", "alg": "ES256", "n": "AQAB", "e": "AQAB"}), "not valid"),
            (json!({"kty": "EC", "kid": "k", "crv": "P-521", "x": "AA", "y": "AA"}), "curve"),
            (json!({"kty": "OKP", "kid": "k", "crv": "X25519", "x": "AA"}), "curve"),
            (json!({"kty": "OKP", "kid": "k", "crv": "Ed25519", "alg": "RS256", "x": "AA"}), "not valid"),
            (json!({"kty": "RSA", "kid": "k", "n": "!!!", "e": "AQAB"}), "invalid"),
        ];

        for (raw, expected) in cases {
            let jwk: Jwk = serde_json::from_value(raw.clone()).unwrap();
            let err = SigningKey::from_jwk(&jwk).expect_err(&format!("{raw} should be rejected"));
            assert!(
                err.to_string().contains(expected),
                "{raw}: expected '{expected}' in '{err}'"
            );
        }
    }

    #[test]
    fn test_parse_asymmetric_algorithm_rejects_symmetric_and_none() {
        for alg in ["HS256", "HS384", "HS512", "none", "None", "", "rs256"] {
            assert!(parse_asymmetric_algorithm(alg).is_none(), "{alg} accepted");
        }
        for alg in ["RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384", "EdDSA"] {
            assert!(parse_asymmetric_algorithm(alg).is_some(), "{alg} rejected");
        }
    }

    #[test]
    fn test_build_key_map_skips_bad_entries_and_keeps_last_duplicate() {
        let first = TestKeypair::rsa(RsaFixture::Primary, "dup");
        let second = TestKeypair::ed25519(3, "dup");
        let doc = JwksDocument {
            keys: vec![
                first.jwk_json(),
                json!({"kty": "oct", "kid": "hmac", "k": "c2VjcmV0"}),
                json!({"kid": 42}),
                second.jwk_json(),
            ],
        };

        let keys = build_key_map(doc);

        assert_eq!(keys.len(), 1);
        assert_eq!(keys.get("dup").unwrap().family(), KeyFamily::Okp);
    }

    // -------------------------------------------------------------------------
    // Cache behaviour
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_cache_starts_empty_and_populates_lazily() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let source = Arc::new(StaticKeySource::new(document(&[&key])));
        let cache = cache_with(&source);

        assert!(!cache.is_populated().await);
        assert_eq!(source.fetch_count(), 0);

        let found = cache.get("key-1").await.unwrap();
        assert_eq!(found.kid(), "key-1");
        assert!(cache.is_populated().await);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_does_not_fetch() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let source = Arc::new(StaticKeySource::new(document(&[&key])));
        let cache = cache_with(&source);

        cache.refresh().await.unwrap();
        for _ in 0..5 {
            cache.get("key-1").await.unwrap();
        }

        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_miss_refreshes_once_then_key_not_found() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let source = Arc::new(StaticKeySource::new(document(&[&key])));
        let cache = cache_with(&source);
        cache.refresh().await.unwrap();

        let result = cache.get("unknown").await;

        assert_eq!(result.unwrap_err(), AuthError::KeyNotFound("unknown".to_string()));
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_rotation_replaces_whole_set() {
        let old = TestKeypair::rsa(RsaFixture::Primary, "old");
        let new = TestKeypair::rsa(RsaFixture::Secondary, "new");
        let source = Arc::new(StaticKeySource::new(document(&[&old])));
        let cache = cache_with(&source);
        cache.refresh().await.unwrap();

        source.publish(document(&[&new])).await;
        cache.get("new").await.unwrap();

        assert_eq!(cache.key_ids().await, vec!["new".to_string()]);
        assert_eq!(cache.generation().await, 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_set() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let source = Arc::new(StaticKeySource::new(document(&[&key])));
        let cache = cache_with(&source);
        cache.refresh().await.unwrap();

        source.fail_with(FetchError::Status(503)).await;

        let err = cache.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::KeySetUnavailable(_)));

        let err = cache.get("rotated").await.unwrap_err();
        assert!(matches!(err, AuthError::KeySetUnavailable(_)));

        // Cached key still resolves without touching the source
        let before = source.fetch_count();
        assert_eq!(cache.get("key-1").await.unwrap().kid(), "key-1");
        assert_eq!(source.fetch_count(), before);
        assert_eq!(cache.generation().await, 1);
    }

    #[tokio::test]
    async fn test_empty_document_replaces_set() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let source = Arc::new(StaticKeySource::new(document(&[&key])));
        let cache = cache_with(&source);
        cache.refresh().await.unwrap();

        source.publish(JwksDocument::default()).await;
        cache.refresh().await.unwrap();

        assert!(cache.key_ids().await.is_empty());
        assert!(cache.is_populated().await);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let a = TestKeypair::rsa(RsaFixture::Primary, "a");
        let b = TestKeypair::ed25519(9, "b");
        let source = Arc::new(StaticKeySource::new(document(&[&a, &b])));
        let cache = cache_with(&source);

        cache.refresh().await.unwrap();
        let first = cache.key_ids().await;
        cache.refresh().await.unwrap();
        let second = cache.key_ids().await;

        assert_eq!(first, second);
        assert_eq!(first, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_collapse_into_one_fetch() {
        let old = TestKeypair::rsa(RsaFixture::Primary, "old");
        let new = TestKeypair::rsa(RsaFixture::Secondary, "new");
        let source = Arc::new(StaticKeySource::new(document(&[&old])));
        let cache = Arc::new(cache_with(&source));
        cache.refresh().await.unwrap();

        source.publish(document(&[&old, &new])).await;

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get("new").await })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(source.fetch_count(), 2, "one initial refresh plus one miss");
        assert_eq!(cache.generation().await, 2);
    }

    /// Provider that hangs for `delay` and then times out.
    struct StallingKeySource {
        delay: Duration,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl KeySource for StallingKeySource {
        async fn fetch(&self) -> Result<JwksDocument, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Err(FetchError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_failed_fetch() {
        let source = Arc::new(StallingKeySource {
            delay: Duration::from_millis(200),
            fetches: AtomicUsize::new(0),
        });
        let cache = Arc::new(KeySetCache::new(
            Arc::clone(&source) as Arc<dyn KeySource>
        ));

        let started = Instant::now();
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get("rotated").await })
            })
            .collect();

        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(matches!(err, AuthError::KeySetUnavailable(_)));
        }

        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert!(
            started.elapsed() < Duration::from_millis(1000),
            "waiters must not queue one fetch timeout each"
        );
        assert!(!cache.is_populated().await);
    }

    #[tokio::test]
    async fn test_miss_after_failed_fetch_retries() {
        let key = TestKeypair::rsa(RsaFixture::Primary, "key-1");
        let source = Arc::new(StaticKeySource::new(document(&[&key])));
        let cache = cache_with(&source);

        source.fail_with(FetchError::Status(503)).await;
        let err = cache.get("key-1").await.unwrap_err();
        assert!(matches!(err, AuthError::KeySetUnavailable(_)));

        // Provider recovers; the next miss fetches again instead of replaying the failure
        source.publish(document(&[&key])).await;
        cache.get("key-1").await.unwrap();

        assert_eq!(source.fetch_count(), 2);
        assert_eq!(cache.generation().await, 1);
    }
}
