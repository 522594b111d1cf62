//! Connection Identity
//!
//! Turns a connection's query parameters into a stable session key. With
//! auth configured the key is the `sub` claim of a JWT issued by an external
//! provider (Firebase, Auth0, Supabase, etc.). The server does NOT issue
//! tokens - only validates them. Without auth the client names itself.

use std::collections::BTreeMap;
use jsonwebtoken::{decode, DecodingKey, Validation, Algorithm, TokenData};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::game::state::SessionKey;

/// Query parameter carrying a JWT.
pub const TOKEN_PARAM: &str = "token";

/// Query parameter carrying a client-chosen session key.
pub const KEY_PARAM: &str = "key";

/// Longest accepted session key.
const MAX_KEY_LEN: usize = 128;

/// Authentication configuration.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format (preferred for external providers).
    pub public_key_pem: Option<String>,
    /// HS256 secret (fallback for simple setups).
    pub secret: Option<String>,
    /// Whether to skip expiry validation (for testing only).
    pub skip_expiry: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            public_key_pem: None,
            secret: None,
            skip_expiry: false,
        }
    }
}

impl AuthConfig {
    /// Create config from `AUTH_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from `AUTH_*` values returned by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            issuer: lookup("AUTH_ISSUER"),
            audience: lookup("AUTH_AUDIENCE"),
            public_key_pem: lookup("AUTH_PUBLIC_KEY_PEM"),
            secret: lookup("AUTH_SECRET"),
            skip_expiry: lookup("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Check if authentication is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Standard JWT claims we expect from auth providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - usually the user ID from the auth provider.
    pub sub: String,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at timestamp.
    #[serde(default)]
    pub iat: u64,
    /// Issuer (auth provider).
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Session key for this subject.
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.sub.clone())
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No authentication configured on server.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim doesn't match expected value.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim doesn't match expected value.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
    /// Connection carried no usable credential.
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
    /// Client-supplied key is empty, too long or not printable.
    #[error("invalid session key")]
    InvalidKey,
}

/// Validate a JWT token and extract claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    if !config.is_configured() {
        return Err(AuthError::NotConfigured);
    }

    // Determine algorithm based on config
    let algorithm = if config.public_key_pem.is_some() {
        Algorithm::RS256
    } else {
        Algorithm::HS256
    };

    // Build validation rules
    let mut validation = Validation::new(algorithm);

    // Disable required claims validation by default
    validation.required_spec_claims = std::collections::HashSet::new();

    // Set expected issuer (if not set, any issuer is accepted)
    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }

    // Set expected audience (if not set, skip audience validation)
    if let Some(ref audience) = config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }

    // Handle expiry validation
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    // Decode and validate
    let token_data: TokenData<TokenClaims> = if let Some(ref pem) = config.public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
        decode(token, &key, &validation)
            .map_err(map_jwt_error)?
    } else if let Some(ref secret) = config.secret {
        let key = DecodingKey::from_secret(secret.as_bytes());
        decode(token, &key, &validation)
            .map_err(map_jwt_error)?
    } else {
        return Err(AuthError::NotConfigured);
    };

    let claims = token_data.claims;

    // Validate subject exists
    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // Manual expiry check (in case validation was skipped)
    if !config.skip_expiry && claims.exp > 0 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if now > claims.exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// IDENTITY PROVIDERS
// =============================================================================

/// Establishes who is on the other end of a connection.
pub trait IdentityProvider: Send + Sync {
    /// Session key for a connection with these query parameters.
    fn identify(&self, query: &BTreeMap<String, String>) -> Result<SessionKey, AuthError>;
}

/// Identity from a validated JWT `sub` claim.
#[derive(Clone, Debug)]
pub struct JwtIdentityProvider {
    config: AuthConfig,
}

impl JwtIdentityProvider {
    /// Create a provider. Fails if no key or secret is configured.
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        if !config.is_configured() {
            return Err(AuthError::NotConfigured);
        }
        Ok(Self { config })
    }
}

impl IdentityProvider for JwtIdentityProvider {
    fn identify(&self, query: &BTreeMap<String, String>) -> Result<SessionKey, AuthError> {
        let token = query
            .get(TOKEN_PARAM)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingCredential(TOKEN_PARAM))?;
        let claims = validate_token(token, &self.config)?;
        Ok(claims.session_key())
    }
}

/// Trusts the `key` parameter the client sends. For deployments where an
/// upstream proxy has already authenticated the connection.
#[derive(Clone, Debug, Default)]
pub struct QueryKeyProvider;

impl IdentityProvider for QueryKeyProvider {
    fn identify(&self, query: &BTreeMap<String, String>) -> Result<SessionKey, AuthError> {
        let key = query.get(KEY_PARAM).ok_or(AuthError::MissingCredential(KEY_PARAM))?;
        let key = key.trim();
        if key.is_empty() || key.len() > MAX_KEY_LEN || key.chars().any(|c| c.is_control()) {
            return Err(AuthError::InvalidKey);
        }
        Ok(SessionKey::new(key))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn create_test_token(claims: &TokenClaims, secret: &str) -> String {
        let header = Header::new(Algorithm::HS256);
        let key = EncodingKey::from_secret(secret.as_bytes());
        encode(&header, claims, &key).unwrap()
    }

    fn test_claims() -> TokenClaims {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        TokenClaims {
            sub: "user123".into(),
            exp: now + 3600, // 1 hour from now
            iat: now,
            iss: Some("test-issuer".into()),
            aud: Some(serde_json::json!("test-audience")),
        }
    }

    #[test]
    fn test_valid_token_validation() {
        let secret = "test-secret-key-256-bits-long!!";
        let claims = test_claims();
        let token = create_test_token(&claims, secret);

        let config = AuthConfig {
            secret: Some(secret.into()),
            ..Default::default()
        };

        let result = validate_token(&token, &config);
        assert!(result.is_ok());
        assert_eq!(result.unwrap().sub, "user123");
    }

    #[test]
    fn test_expired_token_rejected() {
        let secret = "test-secret-key-256-bits-long!!";
        let mut claims = test_claims();
        claims.exp = 1; // Expired in 1970

        let token = create_test_token(&claims, secret);

        let config = AuthConfig {
            secret: Some(secret.into()),
            ..Default::default()
        };

        let result = validate_token(&token, &config);
        assert!(matches!(result, Err(AuthError::Expired)));
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let claims = test_claims();
        let token = create_test_token(&claims, "correct-secret-key-here!!!!!");

        let config = AuthConfig {
            secret: Some("wrong-secret-key-here!!!!!!".into()),
            ..Default::default()
        };

        let result = validate_token(&token, &config);
        assert!(matches!(result, Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_missing_sub_rejected() {
        let secret = "test-secret-key-256-bits-long!!";
        let mut claims = test_claims();
        claims.sub = String::new();

        let token = create_test_token(&claims, secret);

        let config = AuthConfig {
            secret: Some(secret.into()),
            ..Default::default()
        };

        let result = validate_token(&token, &config);
        assert!(matches!(result, Err(AuthError::MissingClaim(_))));
    }

    #[test]
    fn test_issuer_validation() {
        let secret = "test-secret-key-256-bits-long!!";
        let claims = test_claims();
        let token = create_test_token(&claims, secret);

        let config = AuthConfig {
            secret: Some(secret.into()),
            issuer: Some("wrong-issuer".into()),
            ..Default::default()
        };

        let result = validate_token(&token, &config);
        assert!(matches!(result, Err(AuthError::InvalidIssuer)));
    }

    fn query(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_jwt_provider_uses_subject() {
        let secret = "test-secret-key-256-bits-long!!";
        let token = create_test_token(&test_claims(), secret);
        let provider = JwtIdentityProvider::new(AuthConfig {
            secret: Some(secret.into()),
            ..Default::default()
        })
        .unwrap();

        let key = provider.identify(&query(&[("token", token.as_str()), ("key", "spoofed")])).unwrap();
        assert_eq!(key, SessionKey::from("user123"));
    }

    #[test]
    fn test_jwt_provider_requires_token() {
        let provider = JwtIdentityProvider::new(AuthConfig {
            secret: Some("s".into()),
            ..Default::default()
        })
        .unwrap();

        assert!(matches!(
            provider.identify(&query(&[("key", "k1")])),
            Err(AuthError::MissingCredential("token"))
        ));
        assert!(matches!(
            provider.identify(&query(&[("token", "garbage")])),
            Err(AuthError::InvalidFormat)
        ));
    }

    #[test]
    fn test_jwt_provider_needs_config() {
        assert!(matches!(
            JwtIdentityProvider::new(AuthConfig::default()),
            Err(AuthError::NotConfigured)
        ));
    }

    #[test]
    fn test_query_key_provider() {
        let provider = QueryKeyProvider;
        assert_eq!(provider.identify(&query(&[("key", "k1")])).unwrap(), SessionKey::from("k1"));
        assert!(matches!(provider.identify(&query(&[])), Err(AuthError::MissingCredential("key"))));
        assert!(matches!(provider.identify(&query(&[("key", "  ")])), Err(AuthError::InvalidKey)));

        let long = "x".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(provider.identify(&query(&[("key", long.as_str())])), Err(AuthError::InvalidKey)));
    }

    #[test]
    fn test_not_configured_error() {
        let config = AuthConfig::default();
        let result = validate_token("some.jwt.token", &config);
        assert!(matches!(result, Err(AuthError::NotConfigured)));
    }

    #[test]
    fn test_skip_expiry_for_testing() {
        let secret = "test-secret-key-256-bits-long!!";
        let mut claims = test_claims();
        claims.exp = 1; // Expired in 1970

        let token = create_test_token(&claims, secret);

        let config = AuthConfig {
            secret: Some(secret.into()),
            skip_expiry: true,
            ..Default::default()
        };

        let result = validate_token(&token, &config);
        assert!(result.is_ok());
    }
}
