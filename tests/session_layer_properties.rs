//! Property-based test backing invariant 6: a session's outbound `seq`
//! is strictly monotonic and gap-free.

use std::sync::Arc;

use chrono::Utc;
use conclave::domain::ports::identity_verifier::{AuthError, VerifiedIdentity};
use conclave::services::session_layer::{SessionConfig, SessionLayer};
use proptest::prelude::*;

struct AlwaysOk;

#[async_trait::async_trait]
impl conclave::domain::ports::identity_verifier::IdentityVerifier for AlwaysOk {
    async fn verify(&self, _credential: &str) -> Result<VerifiedIdentity, AuthError> {
        Ok(VerifiedIdentity {
            principal: "alice".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}

proptest! {
    #[test]
    fn next_seq_is_strictly_monotonic_and_gap_free(draws in 1usize..200) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let layer = SessionLayer::new(Arc::new(AlwaysOk), SessionConfig::default());
            let id = layer.connect("token", Utc::now()).await.unwrap();
            let mut last = None;
            for _ in 0..draws {
                let seq = layer.next_seq(id).await.unwrap();
                if let Some(prev) = last {
                    assert_eq!(seq, prev + 1);
                }
                last = Some(seq);
            }
        });
    }
}
