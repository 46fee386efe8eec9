//! Connection authentication.
//!
//! Every connection presents an opaque credential exactly once, before it is
//! registered. [`TokenVerifier`] maps that credential to a stable [`UserId`]
//! or refuses it. The session handler never registers a connection whose
//! credential did not verify.
//!
//! [`JwtVerifier`] is the production gate: it checks signed JWT ID tokens
//! (HS256 shared secret or RS256 public key) with optional issuer and audience
//! pinning. Identity providers such as Firebase issue RS256 ID tokens whose
//! `sub` claim is the user id, issuer `https://securetoken.google.com/<project>`
//! and audience `<project>`.

use std::path::Path;

use async_trait::async_trait;
use eventrelay_proto::UserId;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
use serde::Deserialize;
use thiserror::Error;

/// Reasons a credential was not accepted.
///
/// All variants are fatal for the connection attempt. None are retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credential supplied
    #[error("missing token")]
    MissingToken,

    /// Credential is not a well-formed token
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Credential was valid but has expired
    #[error("token expired")]
    Expired,

    /// Credential failed verification (signature, issuer, audience, claims)
    #[error("token rejected: {0}")]
    Rejected(String),

    /// The verification backend could not be reached
    #[error("verifier unavailable: {0}")]
    Unavailable(String),

    /// Verifier could not be constructed from its configuration
    #[error("verifier configuration error: {0}")]
    Config(String),
}

/// Maps an opaque credential to the user it identifies.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token`, returning the authenticated user.
    async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Key material for [`JwtVerifier`].
#[derive(Clone)]
pub enum JwtKey {
    /// HS256 shared secret
    Secret(Vec<u8>),
    /// RS256 public key, PEM encoded
    RsaPublicPem(Vec<u8>),
}

impl std::fmt::Debug for JwtKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Secret(_) => f.write_str("Secret(<redacted>)"),
            Self::RsaPublicPem(pem) => write!(f, "RsaPublicPem({} bytes)", pem.len()),
        }
    }
}

/// Configuration for [`JwtVerifier`].
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Verification key
    pub key: JwtKey,
    /// Required `iss` claim, if any
    pub issuer: Option<String>,
    /// Required `aud` claim, if any
    pub audience: Option<String>,
    /// Clock skew tolerance for `exp`/`nbf`, in seconds
    pub leeway_secs: u64,
}

impl JwtConfig {
    /// HS256 configuration with a shared secret and no issuer/audience pinning.
    pub fn hs256(secret: impl Into<Vec<u8>>) -> Self {
        Self { key: JwtKey::Secret(secret.into()), issuer: None, audience: None, leeway_secs: 60 }
    }

    /// RS256 configuration reading the public key from a PEM file.
    pub fn rs256_pem_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|e| {
            AuthError::Config(format!("failed to read key '{}': {e}", path.display()))
        })?;

        Ok(Self { key: JwtKey::RsaPublicPem(pem), issuer: None, audience: None, leeway_secs: 60 })
    }

    /// Pin the expected issuer.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Pin the expected audience.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    sub: String,
}

/// Verifies signed JWT ID tokens locally.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Build a verifier. Fails if the key material cannot be parsed.
    pub fn new(config: JwtConfig) -> Result<Self, AuthError> {
        let (key, algorithm) = match &config.key {
            JwtKey::Secret(secret) => {
                if secret.is_empty() {
                    return Err(AuthError::Config("empty shared secret".to_string()));
                }
                (DecodingKey::from_secret(secret), Algorithm::HS256)
            },
            JwtKey::RsaPublicPem(pem) => {
                let key = DecodingKey::from_rsa_pem(pem)
                    .map_err(|e| AuthError::Config(format!("invalid RSA public key: {e}")))?;
                (key, Algorithm::RS256)
            },
        };

        let mut validation = Validation::new(algorithm);
        validation.leeway = config.leeway_secs;
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Ok(Self { key, validation })
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let data =
            jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => AuthError::Expired,
                    ErrorKind::InvalidToken
                    | ErrorKind::Base64(_)
                    | ErrorKind::Json(_)
                    | ErrorKind::Utf8(_) => AuthError::Malformed(e.to_string()),
                    _ => AuthError::Rejected(e.to_string()),
                }
            })?;

        if data.claims.sub.is_empty() {
            return Err(AuthError::Rejected("token has no subject".to_string()));
        }

        Ok(UserId::new(data.claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header};
    use serde::Serialize;

    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[derive(Serialize)]
    struct TestClaims<'a> {
        #[serde(skip_serializing_if = "Option::is_none")]
        sub: Option<&'a str>,
        exp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        iss: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        aud: Option<&'a str>,
    }

    fn sign(claims: &TestClaims<'_>, secret: &[u8]) -> String {
        jsonwebtoken::encode(&Header::default(), claims, &EncodingKey::from_secret(secret))
            .unwrap()
    }

    fn claims(sub: &str) -> TestClaims<'_> {
        TestClaims { sub: Some(sub), exp: Utc::now().timestamp() + 3600, iss: None, aud: None }
    }

    #[tokio::test]
    async fn valid_token_yields_subject() {
        let verifier = JwtVerifier::new(JwtConfig::hs256(SECRET)).unwrap();
        let token = sign(&claims("u1"), SECRET);

        assert_eq!(verifier.verify(&token).await.unwrap(), UserId::from("u1"));
    }

    #[tokio::test]
    async fn empty_token_is_missing() {
        let verifier = JwtVerifier::new(JwtConfig::hs256(SECRET)).unwrap();
        assert_eq!(verifier.verify("").await, Err(AuthError::MissingToken));
    }

    #[tokio::test]
    async fn garbage_token_is_malformed() {
        let verifier = JwtVerifier::new(JwtConfig::hs256(SECRET)).unwrap();
        let result = verifier.verify("not-a-jwt").await;
        assert!(matches!(result, Err(AuthError::Malformed(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let verifier = JwtVerifier::new(JwtConfig::hs256(SECRET)).unwrap();
        let token = sign(&claims("u1"), b"other-secret");

        let result = verifier.verify(&token).await;
        assert!(matches!(result, Err(AuthError::Rejected(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn expired_token_is_expired() {
        let verifier = JwtVerifier::new(JwtConfig::hs256(SECRET)).unwrap();
        let mut expired = claims("u1");
        expired.exp = Utc::now().timestamp() - 3600;

        assert_eq!(verifier.verify(&sign(&expired, SECRET)).await, Err(AuthError::Expired));
    }

    #[tokio::test]
    async fn missing_subject_is_rejected() {
        let verifier = JwtVerifier::new(JwtConfig::hs256(SECRET)).unwrap();
        let mut anonymous = claims("");
        anonymous.sub = None;

        let result = verifier.verify(&sign(&anonymous, SECRET)).await;
        assert!(matches!(result, Err(AuthError::Rejected(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn issuer_and_audience_are_pinned() {
        let config = JwtConfig::hs256(SECRET)
            .with_issuer("https://securetoken.google.com/demo")
            .with_audience("demo");
        let verifier = JwtVerifier::new(config).unwrap();

        let mut good = claims("u1");
        good.iss = Some("https://securetoken.google.com/demo");
        good.aud = Some("demo");
        assert_eq!(verifier.verify(&sign(&good, SECRET)).await.unwrap(), UserId::from("u1"));

        let mut wrong_aud = claims("u1");
        wrong_aud.iss = Some("https://securetoken.google.com/demo");
        wrong_aud.aud = Some("other");
        let result = verifier.verify(&sign(&wrong_aud, SECRET)).await;
        assert!(matches!(result, Err(AuthError::Rejected(_))), "got {result:?}");

        let mut wrong_iss = claims("u1");
        wrong_iss.iss = Some("https://evil.example");
        wrong_iss.aud = Some("demo");
        let result = verifier.verify(&sign(&wrong_iss, SECRET)).await;
        assert!(matches!(result, Err(AuthError::Rejected(_))), "got {result:?}");
    }

    #[test]
    fn empty_secret_is_config_error() {
        let result = JwtVerifier::new(JwtConfig::hs256(Vec::new()));
        assert!(matches!(result, Err(AuthError::Config(_))));
    }

    #[test]
    fn invalid_pem_is_config_error() {
        let config = JwtConfig {
            key: JwtKey::RsaPublicPem(b"not a pem".to_vec()),
            issuer: None,
            audience: None,
            leeway_secs: 0,
        };
        assert!(matches!(JwtVerifier::new(config), Err(AuthError::Config(_))));
    }
}
