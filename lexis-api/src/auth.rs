//! Authentication Module
//!
//! Bearer JWT authentication for the Lexis API. The `sub` claim carries the
//! learner's Telegram user id; the bot side mints tokens with
//! [`generate_jwt_token`] and every `/api/v1` request is checked with
//! [`validate_jwt_token`].
//!
//! Time validation is done here rather than inside `jsonwebtoken`, against
//! the injectable [`Clock`], so expiry is deterministic in tests.

use crate::error::{ApiError, ApiResult};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use lexis_core::{Clock, SystemClock, UserId};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const INSECURE_DEFAULT_SECRET: &str = "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION";


// ============================================================================
// JWT SECRET (TYPE-SAFE)
// ============================================================================

/// JWT signing secret that never shows up in logs.
#[derive(Clone)]
pub struct JwtSecret(SecretString);

impl JwtSecret {
    /// Create a new JWT secret.
    ///
    /// # Errors
    /// Returns error if the secret is empty.
    pub fn new(secret: String) -> ApiResult<Self> {
        if secret.is_empty() {
            return Err(ApiError::missing_field("jwt_secret"));
        }
        Ok(Self(SecretString::new(secret.into())))
    }

    /// Expose the secret value (only for cryptographic operations).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    /// Check if the secret is the insecure default.
    pub fn is_insecure_default(&self) -> bool {
        self.0.expose_secret() == INSECURE_DEFAULT_SECRET
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JwtSecret([REDACTED, {} chars])", self.len())
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// JWT secret key for signing and verification
    pub jwt_secret: JwtSecret,

    /// JWT algorithm (default: HS256)
    pub jwt_algorithm: Algorithm,

    /// JWT token expiration in seconds (default: 30 days)
    pub jwt_expiration_secs: i64,

    /// JWT clock skew tolerance in seconds (default: 60)
    pub jwt_clock_skew_secs: i64,

    /// Expected `iss` claim. Not checked when unset.
    pub jwt_issuer: Option<String>,

    /// Clock for JWT time validation (injected for testing)
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret)
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("jwt_expiration_secs", &self.jwt_expiration_secs)
            .field("jwt_clock_skew_secs", &self.jwt_clock_skew_secs)
            .field("jwt_issuer", &self.jwt_issuer)
            .field("clock", &"<Clock>")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        let secret_str = std::env::var("LEXIS_JWT_SECRET")
            .unwrap_or_else(|_| INSECURE_DEFAULT_SECRET.to_string());

        Self {
            jwt_secret: build_jwt_secret(secret_str),
            jwt_algorithm: Algorithm::HS256,
            jwt_expiration_secs: 30 * 24 * 3600,
            jwt_clock_skew_secs: 60,
            jwt_issuer: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl AuthConfig {
    /// Create authentication configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `LEXIS_JWT_SECRET`: JWT signing secret
    /// - `LEXIS_JWT_EXPIRATION_SECS`: JWT token expiration (default: 2592000)
    /// - `LEXIS_JWT_CLOCK_SKEW_SECS`: JWT clock skew tolerance (default: 60)
    /// - `LEXIS_JWT_ISSUER`: Required `iss` claim (default: unchecked)
    pub fn from_env() -> Self {
        let secret_str = std::env::var("LEXIS_JWT_SECRET")
            .unwrap_or_else(|_| INSECURE_DEFAULT_SECRET.to_string());

        Self {
            jwt_secret: build_jwt_secret(secret_str),
            jwt_algorithm: Algorithm::HS256,
            jwt_expiration_secs: std::env::var("LEXIS_JWT_EXPIRATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30 * 24 * 3600),
            jwt_clock_skew_secs: std::env::var("LEXIS_JWT_CLOCK_SKEW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            jwt_issuer: std::env::var("LEXIS_JWT_ISSUER")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Refuse to run in production with the default or a short secret.
    ///
    /// Outside production the same problems are only logged.
    pub fn validate_for_production(&self) -> ApiResult<()> {
        let environment = std::env::var("LEXIS_ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase();

        let is_production = environment == "production" || environment == "prod";

        if self.jwt_secret.is_insecure_default() {
            if is_production {
                return Err(ApiError::invalid_input(format!(
                    "Cannot start server in production with insecure JWT secret. \
                     Set LEXIS_JWT_SECRET to a secure value. \
                     LEXIS_ENVIRONMENT={}",
                    environment
                )));
            }
            tracing::warn!(
                "SECURITY WARNING: Using insecure default JWT secret. \
                 Set LEXIS_JWT_SECRET to a random value of at least 32 characters \
                 before deploying."
            );
        }

        if self.jwt_secret.len() < 32 {
            if is_production {
                return Err(ApiError::invalid_input(format!(
                    "JWT secret is too short for production use ({} chars). \
                     It must be at least 32 characters long.",
                    self.jwt_secret.len()
                )));
            } else if !self.jwt_secret.is_insecure_default() {
                tracing::warn!(
                    chars = self.jwt_secret.len(),
                    "SECURITY WARNING: JWT secret is short; use at least 32 characters in production"
                );
            }
        }

        Ok(())
    }
}

fn build_jwt_secret(secret_str: String) -> JwtSecret {
    let normalized = if secret_str.trim().is_empty() {
        INSECURE_DEFAULT_SECRET.to_string()
    } else {
        secret_str
    };

    JwtSecret::new(normalized)
        .unwrap_or_else(|_| JwtSecret(SecretString::new(INSECURE_DEFAULT_SECRET.into())))
}

// ============================================================================
// JWT CLAIMS
// ============================================================================

/// JWT claims structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (Telegram user id, decimal)
    pub sub: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl Claims {
    pub fn new(user_id: UserId, expiration_secs: i64, clock: &dyn Clock) -> Self {
        let now = clock.now_epoch_secs();
        Self {
            sub: user_id.to_string(),
            iat: now,
            exp: now + expiration_secs,
            iss: None,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.iss = Some(issuer.into());
        self
    }

    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        self.exp < clock.now_epoch_secs()
    }

    /// The subject as a Telegram user id.
    pub fn user_id(&self) -> ApiResult<UserId> {
        self.sub
            .parse::<UserId>()
            .map_err(|_| ApiError::invalid_token("Token subject is not a user id"))
    }
}

// ============================================================================
// AUTH CONTEXT
// ============================================================================

/// Identity of the caller, inserted into request extensions by the auth
/// middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: UserId,
    /// Token expiry (Unix timestamp).
    pub expires_at: i64,
}

impl AuthContext {
    pub fn new(user_id: UserId, expires_at: i64) -> Self {
        Self {
            user_id,
            expires_at,
        }
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

fn validate_claim_times(now: i64, exp: i64, leeway_secs: i64) -> ApiResult<()> {
    if exp < now - leeway_secs {
        return Err(ApiError::token_expired());
    }
    Ok(())
}

/// Validate a JWT token and extract claims.
///
/// `jsonwebtoken` checks only the signature and the presence of `exp`;
/// expiry is checked against `config.clock`.
pub fn validate_jwt_token(config: &AuthConfig, token: &str) -> ApiResult<Claims> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.expose().as_bytes());

    let mut validation = Validation::new(config.jwt_algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims = std::collections::HashSet::from(["exp".to_string()]);

    let token_data =
        decode::<Claims>(token, &decoding_key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidToken => {
                ApiError::invalid_token("Token is invalid")
            }
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                ApiError::invalid_token("Token signature is invalid")
            }
            _ => ApiError::invalid_token(format!("Token validation failed: {}", e)),
        })?;

    let claims = token_data.claims;

    let now = config.clock.now_epoch_secs();
    if now < 0 {
        tracing::error!(
            timestamp = now,
            "System clock returned pre-epoch time - server time is broken"
        );
        return Err(ApiError::internal_error(
            "Server time configuration error - please contact support",
        ));
    }

    validate_claim_times(now, claims.exp, config.jwt_clock_skew_secs)?;

    if let Some(expected) = &config.jwt_issuer {
        if claims.iss.as_deref() != Some(expected.as_str()) {
            return Err(ApiError::invalid_token("Token issuer is not accepted"));
        }
    }

    Ok(claims)
}

/// Validate a token and build the caller's [`AuthContext`].
pub fn authenticate_jwt(config: &AuthConfig, token: &str) -> ApiResult<AuthContext> {
    let claims = validate_jwt_token(config, token)?;
    Ok(AuthContext::new(claims.user_id()?, claims.exp))
}

/// Generate a JWT token for a Telegram user.
pub fn generate_jwt_token(config: &AuthConfig, user_id: UserId) -> ApiResult<String> {
    let mut claims = Claims::new(user_id, config.jwt_expiration_secs, &*config.clock);
    if let Some(issuer) = &config.jwt_issuer {
        claims = claims.with_issuer(issuer.clone());
    }

    let encoding_key = EncodingKey::from_secret(config.jwt_secret.expose().as_bytes());
    let header = Header::new(config.jwt_algorithm);

    encode(&header, &claims, &encoding_key)
        .map_err(|e| ApiError::internal_error(format!("Failed to generate token: {}", e)))
}

// ============================================================================
// TESTS
// ============================================================================
