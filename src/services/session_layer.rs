//! Session Layer: authenticated duplex session bookkeeping.
//!
//! The network transport itself (WebSocket framing, REST handlers) lives in
//! the `conclave-gateway` crate; this module owns session state, ordering,
//! backpressure accounting, and idle/liveness tracking that the transport
//! delegates to.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::error::SessionError;
use crate::domain::models::message::WireEnvelope;
use crate::domain::ports::identity_verifier::{IdentityVerifier, VerifiedIdentity};

use crate::domain::models::session::{Session, SessionId};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_timeout: chrono::Duration,
    pub client_buffer_capacity: usize,
    pub missed_ping_threshold: u32,
    /// Bound on how many unacknowledged outbound frames are retained for
    /// resume replay (§6 reconnection semantics). Oldest frames are
    /// dropped past this bound; a client gapped that far must resubmit.
    pub replay_buffer_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: chrono::Duration::minutes(30),
            client_buffer_capacity: 256,
            missed_ping_threshold: 3,
            replay_buffer_capacity: 256,
        }
    }
}

struct Tracked {
    session: Session,
    missed_pings: u32,
    outbound_pending: usize,
    /// Outbound frames sent but not yet acknowledged by the client, kept in
    /// `seq` order for resume replay on reconnect.
    unacked: VecDeque<WireEnvelope>,
}

/// Owns the Session set exclusively, per §3's ownership rule.
pub struct SessionLayer<V: IdentityVerifier> {
    verifier: Arc<V>,
    config: SessionConfig,
    sessions: RwLock<HashMap<SessionId, Tracked>>,
    by_principal: RwLock<HashMap<String, Vec<SessionId>>>,
}

impl<V: IdentityVerifier> SessionLayer<V> {
    pub fn new(verifier: Arc<V>, config: SessionConfig) -> Self {
        Self {
            verifier,
            config,
            sessions: RwLock::new(HashMap::new()),
            by_principal: RwLock::new(HashMap::new()),
        }
    }

    /// Authenticates a connecting client and creates a bound Session
    /// (§4.6 Authentication).
    pub async fn connect(&self, credential: &str, now: DateTime<Utc>) -> Result<SessionId, SessionError> {
        let identity = self.authenticate(credential, now).await?;
        Ok(self.create_session(identity, now).await)
    }

    /// Authenticates a connecting client and either rebinds an existing
    /// session (replaying unacked frames) or creates a fresh one, per §6's
    /// reconnection semantics. `requested_id` is the `sessionId` the client
    /// supplied on its `Auth` frame; `None` (or an id this principal does
    /// not own, or one past its idle window) falls back to a fresh session.
    pub async fn connect_or_resume(
        &self,
        requested_id: Option<SessionId>,
        credential: &str,
        now: DateTime<Utc>,
    ) -> Result<(SessionId, Vec<WireEnvelope>), SessionError> {
        let identity = self.authenticate(credential, now).await?;

        if let Some(id) = requested_id {
            let mut sessions = self.sessions.write().await;
            if let Some(tracked) = sessions.get_mut(&id) {
                if tracked.session.principal == identity.principal
                    && !tracked.session.is_idle(now, self.config.idle_timeout)
                {
                    tracked.session.touch(now);
                    tracked.missed_pings = 0;
                    let replay: Vec<WireEnvelope> = tracked.unacked.iter().cloned().collect();
                    return Ok((id, replay));
                }
            }
        }

        let id = self.create_session(identity, now).await;
        Ok((id, Vec::new()))
    }

    async fn authenticate(&self, credential: &str, now: DateTime<Utc>) -> Result<VerifiedIdentity, SessionError> {
        let identity = self
            .verifier
            .verify(credential)
            .await
            .map_err(|_| SessionError::Unauthorized)?;
        if identity.expires_at <= now {
            return Err(SessionError::AuthExpired);
        }
        Ok(identity)
    }

    async fn create_session(&self, identity: VerifiedIdentity, now: DateTime<Utc>) -> SessionId {
        let session = Session::new(identity.principal.clone(), now);
        let id = session.id;
        self.sessions.write().await.insert(
            id,
            Tracked {
                session,
                missed_pings: 0,
                outbound_pending: 0,
                unacked: VecDeque::new(),
            },
        );
        self.by_principal
            .write()
            .await
            .entry(identity.principal)
            .or_default()
            .push(id);
        id
    }

    /// Records a sent frame in the replay buffer, trimming the oldest entry
    /// past `replay_buffer_capacity` (§6 reconnection semantics).
    pub async fn record_outbound(&self, id: SessionId, envelope: WireEnvelope) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let tracked = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if tracked.unacked.len() >= self.config.replay_buffer_capacity {
            tracked.unacked.pop_front();
        }
        tracked.unacked.push_back(envelope);
        Ok(())
    }

    /// Trims the replay buffer up to and including `seq`, on receipt of a
    /// client `Ack` frame.
    pub async fn ack(&self, id: SessionId, seq: u64) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let tracked = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        while tracked.unacked.front().is_some_and(|e| e.seq <= seq) {
            tracked.unacked.pop_front();
        }
        Ok(())
    }

    /// Terminates all sessions for a principal on credential rotation or
    /// revocation, each closed with `AuthExpired` (§4.6).
    pub async fn revoke_principal(&self, principal: &str) -> Vec<SessionId> {
        let ids = self
            .by_principal
            .write()
            .await
            .remove(principal)
            .unwrap_or_default();
        let mut sessions = self.sessions.write().await;
        for id in &ids {
            sessions.remove(id);
        }
        ids
    }

    pub async fn touch(&self, id: SessionId, now: DateTime<Utc>) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let tracked = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        tracked.session.touch(now);
        tracked.missed_pings = 0;
        Ok(())
    }

    /// Next outbound `seq` for a session; strictly monotonic and gap-free
    /// per invariant 6 in §8.
    pub async fn next_seq(&self, id: SessionId) -> Result<u64, SessionError> {
        let mut sessions = self.sessions.write().await;
        let tracked = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        Ok(tracked.session.next_seq())
    }

    /// Admits an outbound send against the client buffer cap. Streaming
    /// callers pause; request/response callers get `SessionBusy` past the
    /// threshold (§4.6 Backpressure).
    pub async fn admit_outbound(&self, id: SessionId) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let tracked = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if tracked.outbound_pending >= self.config.client_buffer_capacity {
            return Err(SessionError::SessionBusy);
        }
        tracked.outbound_pending += 1;
        Ok(())
    }

    pub async fn complete_outbound(&self, id: SessionId) {
        if let Some(tracked) = self.sessions.write().await.get_mut(&id) {
            tracked.outbound_pending = tracked.outbound_pending.saturating_sub(1);
        }
    }

    /// Periodic liveness sweep: closes idle sessions and unresponsive
    /// clients (§4.6 Idle & liveness).
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<(SessionId, SessionError)> {
        let mut closed = Vec::new();
        let mut sessions = self.sessions.write().await;
        let mut to_remove = Vec::new();
        for (id, tracked) in sessions.iter_mut() {
            if tracked.session.is_idle(now, self.config.idle_timeout) {
                closed.push((*id, SessionError::IdleExpired));
                to_remove.push(*id);
                continue;
            }
            if tracked.missed_pings >= self.config.missed_ping_threshold {
                closed.push((*id, SessionError::ClientUnresponsive));
                to_remove.push(*id);
            }
        }
        for id in to_remove {
            sessions.remove(&id);
        }
        closed
    }

    pub async fn record_missed_ping(&self, id: SessionId) {
        if let Some(tracked) = self.sessions.write().await.get_mut(&id) {
            tracked.missed_pings += 1;
        }
    }

    pub async fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.read().await.get(&id).map(|t| t.session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::identity_verifier::AuthError;

    struct AlwaysOk;

    #[async_trait::async_trait]
    impl IdentityVerifier for AlwaysOk {
        async fn verify(&self, _credential: &str) -> Result<VerifiedIdentity, AuthError> {
            Ok(VerifiedIdentity {
                principal: "alice".to_string(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
        }
    }

    struct AlwaysExpired;

    #[async_trait::async_trait]
    impl IdentityVerifier for AlwaysExpired {
        async fn verify(&self, _credential: &str) -> Result<VerifiedIdentity, AuthError> {
            Ok(VerifiedIdentity {
                principal: "bob".to_string(),
                expires_at: Utc::now() - chrono::Duration::hours(1),
            })
        }
    }

    #[tokio::test]
    async fn connect_creates_bound_session() {
        let layer = SessionLayer::new(Arc::new(AlwaysOk), SessionConfig::default());
        let id = layer.connect("token", Utc::now()).await.unwrap();
        assert!(layer.get(id).await.is_some());
    }

    #[tokio::test]
    async fn expired_credential_rejected() {
        let layer = SessionLayer::new(Arc::new(AlwaysExpired), SessionConfig::default());
        let err = layer.connect("token", Utc::now()).await.unwrap_err();
        assert_eq!(err, SessionError::AuthExpired);
    }

    #[tokio::test]
    async fn backpressure_past_threshold_yields_session_busy() {
        let layer = SessionLayer::new(
            Arc::new(AlwaysOk),
            SessionConfig {
                client_buffer_capacity: 1,
                ..SessionConfig::default()
            },
        );
        let id = layer.connect("token", Utc::now()).await.unwrap();
        layer.admit_outbound(id).await.unwrap();
        let err = layer.admit_outbound(id).await.unwrap_err();
        assert_eq!(err, SessionError::SessionBusy);
    }

    #[tokio::test]
    async fn idle_session_closed_on_sweep() {
        let layer = SessionLayer::new(
            Arc::new(AlwaysOk),
            SessionConfig {
                idle_timeout: chrono::Duration::seconds(1),
                ..SessionConfig::default()
            },
        );
        let now = Utc::now();
        let id = layer.connect("token", now).await.unwrap();
        let closed = layer.sweep(now + chrono::Duration::seconds(2)).await;
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].0, id);
        assert_eq!(closed[0].1, SessionError::IdleExpired);
    }

    fn envelope(seq: u64) -> WireEnvelope {
        use crate::domain::models::message::{WireBody, WireKind};
        WireEnvelope {
            kind: WireKind::Partial,
            session_id: None,
            task_id: None,
            seq,
            payload: WireBody::Empty,
        }
    }

    #[tokio::test]
    async fn resume_replays_unacked_frames_for_same_principal() {
        let layer = SessionLayer::new(Arc::new(AlwaysOk), SessionConfig::default());
        let now = Utc::now();
        let id = layer.connect("token", now).await.unwrap();
        layer.record_outbound(id, envelope(1)).await.unwrap();
        layer.record_outbound(id, envelope(2)).await.unwrap();

        let (resumed_id, replay) = layer
            .connect_or_resume(Some(id), "token", now + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(resumed_id, id);
        assert_eq!(replay.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn ack_trims_replay_buffer() {
        let layer = SessionLayer::new(Arc::new(AlwaysOk), SessionConfig::default());
        let now = Utc::now();
        let id = layer.connect("token", now).await.unwrap();
        layer.record_outbound(id, envelope(1)).await.unwrap();
        layer.record_outbound(id, envelope(2)).await.unwrap();
        layer.ack(id, 1).await.unwrap();

        let (_, replay) = layer
            .connect_or_resume(Some(id), "token", now + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(replay.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test]
    async fn resume_past_idle_window_mints_fresh_session() {
        let layer = SessionLayer::new(
            Arc::new(AlwaysOk),
            SessionConfig {
                idle_timeout: chrono::Duration::seconds(1),
                ..SessionConfig::default()
            },
        );
        let now = Utc::now();
        let id = layer.connect("token", now).await.unwrap();
        layer.record_outbound(id, envelope(1)).await.unwrap();

        let (resumed_id, replay) = layer
            .connect_or_resume(Some(id), "token", now + chrono::Duration::seconds(5))
            .await
            .unwrap();
        assert_ne!(resumed_id, id);
        assert!(replay.is_empty());
    }
}
