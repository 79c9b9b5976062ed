//! ID token verification
//!
//! Checks the signature of an ID token against the provider's JSON Web Key
//! Set, then validates issuer, audience, nonce and the time-based claims.
//! Time claims are checked with a configurable leeway to absorb clock skew
//! between this machine and the provider.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, instrument};

use super::authorization::constant_time_eq;

/// Default allowance for clock skew on `exp`, `nbf` and `iat`
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(60);

/// Reasons an ID token is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token header has no key ID and the key set holds more than one key")]
    MissingKeyId,

    #[error("no key with ID {0} in the provider key set")]
    UnknownKeyId(String),

    #[error("unsupported signing key or algorithm: {0}")]
    UnsupportedKey(String),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch { expected: String, actual: String },

    #[error("token audience does not include {0}")]
    AudienceMismatch(String),

    #[error("nonce mismatch")]
    NonceMismatch,

    #[error("token expired at {0}")]
    Expired(i64),

    #[error("token not valid before {0}")]
    NotYetValid(i64),
}

/// The `aud` claim, which may be a single string or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == audience,
            Audience::Multiple(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

/// Claims read from a verified ID token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Verifies ID tokens against a key set
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    leeway: Duration,
}

impl Default for TokenVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_LEEWAY)
    }
}

impl TokenVerifier {
    pub fn new(leeway: Duration) -> Self {
        Self { leeway }
    }

    /// Verify `id_token` and return its claims
    ///
    /// `nonce` is compared only when given; tokens obtained through refresh
    /// or the password grant carry no nonce from this attempt.
    #[instrument(level = "debug", skip(self, id_token, jwks))]
    pub fn verify(
        &self,
        id_token: &str,
        issuer: &str,
        audience: &str,
        nonce: Option<&str>,
        jwks: &JwkSet,
    ) -> Result<IdTokenClaims, VerificationError> {
        let claims = self.verify_signature(id_token, jwks)?;
        self.verify_claims(&claims, issuer, audience, nonce, chrono::Utc::now().timestamp())?;
        debug!("ID token verified for subject {}", claims.sub);
        Ok(claims)
    }

    fn verify_signature(
        &self,
        id_token: &str,
        jwks: &JwkSet,
    ) -> Result<IdTokenClaims, VerificationError> {
        let header =
            decode_header(id_token).map_err(|e| VerificationError::Malformed(e.to_string()))?;

        if matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(VerificationError::UnsupportedKey(format!(
                "{:?}",
                header.alg
            )));
        }

        let jwk = match header.kid.as_deref() {
            Some(kid) => jwks
                .find(kid)
                .ok_or_else(|| VerificationError::UnknownKeyId(kid.to_string()))?,
            None => match jwks.keys.as_slice() {
                [only] => only,
                _ => return Err(VerificationError::MissingKeyId),
            },
        };

        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| VerificationError::UnsupportedKey(e.to_string()))?;

        // Claims are checked separately so each failure maps to its own error
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let data = decode::<IdTokenClaims>(id_token, &key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => VerificationError::InvalidSignature,
                ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidKeyFormat
                | ErrorKind::InvalidRsaKey(_)
                | ErrorKind::InvalidEcdsaKey
                | ErrorKind::MissingAlgorithm => VerificationError::UnsupportedKey(e.to_string()),
                _ => VerificationError::Malformed(e.to_string()),
            }
        })?;

        Ok(data.claims)
    }

    fn verify_claims(
        &self,
        claims: &IdTokenClaims,
        issuer: &str,
        audience: &str,
        nonce: Option<&str>,
        now: i64,
    ) -> Result<(), VerificationError> {
        if claims.iss.trim_end_matches('/') != issuer.trim_end_matches('/') {
            return Err(VerificationError::IssuerMismatch {
                expected: issuer.to_string(),
                actual: claims.iss.clone(),
            });
        }

        if !claims.aud.contains(audience) {
            return Err(VerificationError::AudienceMismatch(audience.to_string()));
        }

        if let Some(expected) = nonce {
            match claims.nonce.as_deref() {
                Some(actual) if constant_time_eq(actual, expected) => {}
                _ => return Err(VerificationError::NonceMismatch),
            }
        }

        let leeway = self.leeway.as_secs() as i64;
        if claims.exp + leeway <= now {
            return Err(VerificationError::Expired(claims.exp));
        }
        if let Some(nbf) = claims.nbf {
            if nbf - leeway > now {
                return Err(VerificationError::NotYetValid(nbf));
            }
        }
        if let Some(iat) = claims.iat {
            if iat - leeway > now {
                return Err(VerificationError::NotYetValid(iat));
            }
        }

        Ok(())
    }
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

/// Read `exp` from a token without checking its signature
///
/// Only used to decide whether a stored token is worth reusing; the
/// result is never trusted for anything else.
pub fn unverified_expiry(id_token: &str) -> Option<i64> {
    let header = decode_header(id_token).ok()?;
    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    decode::<ExpiryClaim>(id_token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims.exp)
}
