//! A deterministic, locally-resolved identity verifier: bearer tokens map
//! to principals from a configuration-supplied table. Mirrors the
//! teacher's `LocalEmbeddingService` pattern of a self-contained,
//! no-external-network adapter used in place of a real one until an
//! external identity provider is wired in.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use conclave::domain::ports::identity_verifier::{AuthError, IdentityVerifier, VerifiedIdentity};

pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
    ttl: Duration,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, String>, ttl: Duration) -> Self {
        Self { tokens, ttl }
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity, AuthError> {
        let principal = self.tokens.get(credential).ok_or(AuthError::Rejected)?;
        Ok(VerifiedIdentity {
            principal: principal.clone(),
            expires_at: Utc::now() + self.ttl,
        })
    }
}
