//! Per-connection session state for the intercom peripheral.
//!
//! One session exists at a time. A session owns the live challenge
//! nonce, the negotiated directional keys, and the protocol phase; all
//! key material is zeroized when the session is invalidated or dropped.

use std::time::{Duration, Instant};

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::generate_challenge_nonce;
use crate::types::{
    DoorLinkError, Result, CHALLENGE_NONCE_SIZE, NONCE_LIFETIME_SECS, P256_POINT_SIZE,
};

/// Protocol phase of a peripheral session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No live challenge.
    Idle,
    /// A challenge nonce is published and unexpired.
    NonceIssued,
    /// An auth frame is being processed.
    AwaitAuth,
    /// Key agreement and credential validation succeeded.
    Authenticated,
    /// The auth attempt was rejected; the session is closing.
    Rejected,
    /// The credential was accepted and the door actuated.
    CredentialAccepted,
    /// Terminal state; only disconnect remains.
    Done,
}

/// Directional AES-256-GCM session keys. Wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub m2i: [u8; 32],
    pub i2m: [u8; 32],
}

/// State for one BLE connection.
pub struct Session {
    /// Opaque peer handle from the transport.
    pub peer: String,
    /// Negotiated ATT MTU.
    pub mtu: usize,
    pub phase: SessionPhase,
    nonce: Option<[u8; CHALLENGE_NONCE_SIZE]>,
    issued_at: Option<Instant>,
    keys: Option<SessionKeys>,
    /// Authenticated peer public key, once the auth frame is accepted.
    pub peer_public: Option<[u8; P256_POINT_SIZE]>,
}

impl Session {
    fn new(peer: String, mtu: usize, nonce: [u8; CHALLENGE_NONCE_SIZE], now: Instant) -> Self {
        Self {
            peer,
            mtu,
            phase: SessionPhase::NonceIssued,
            nonce: Some(nonce),
            issued_at: Some(now),
            keys: None,
            peer_public: None,
        }
    }

    /// The live nonce, if one exists. Re-reads and re-subscriptions
    /// return the same value; the nonce is never regenerated in place.
    pub fn current_nonce(&self) -> Option<[u8; CHALLENGE_NONCE_SIZE]> {
        self.nonce
    }

    /// Whether the live nonce has passed its lifetime.
    pub fn nonce_expired(&self, now: Instant) -> bool {
        match self.issued_at {
            Some(issued_at) => {
                now.duration_since(issued_at) >= Duration::from_secs(NONCE_LIFETIME_SECS)
            }
            None => true,
        }
    }

    /// Take the live nonce for an auth attempt, enforcing the lifetime.
    ///
    /// The nonce stays live across pre-crypto rejections; callers invoke
    /// this only once the frame has passed structural and rate checks.
    pub fn consume_nonce(&mut self, now: Instant) -> Result<[u8; CHALLENGE_NONCE_SIZE]> {
        match self.phase {
            SessionPhase::NonceIssued => {}
            // The challenge was invalidated by the expiry timer.
            SessionPhase::Idle => return Err(DoorLinkError::ChallengeExpired),
            other => {
                return Err(DoorLinkError::InvalidState(format!(
                    "No live challenge in phase {:?}",
                    other
                )))
            }
        }
        if self.nonce_expired(now) {
            self.invalidate_nonce();
            return Err(DoorLinkError::ChallengeExpired);
        }
        let nonce = self.nonce.take().ok_or(DoorLinkError::ChallengeExpired)?;
        self.issued_at = None;
        self.phase = SessionPhase::AwaitAuth;
        Ok(nonce)
    }

    /// Erase the nonce without consuming it (timeout, failure, teardown).
    pub fn invalidate_nonce(&mut self) {
        if let Some(mut nonce) = self.nonce.take() {
            nonce.zeroize();
        }
        self.issued_at = None;
        if self.phase == SessionPhase::NonceIssued {
            self.phase = SessionPhase::Idle;
        }
    }

    /// Install the derived directional keys.
    pub fn set_keys(&mut self, keys: SessionKeys) {
        self.keys = Some(keys);
    }

    /// The negotiated keys, if key agreement has happened.
    pub fn keys(&self) -> Option<&SessionKeys> {
        self.keys.as_ref()
    }

    /// Erase all secret material held by the session.
    pub fn teardown(&mut self) {
        self.invalidate_nonce();
        self.keys = None;
        self.peer_public = None;
        self.phase = SessionPhase::Done;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Owner of the single live session.
///
/// `on_connect` rejects a second connection while one is active; every
/// teardown path runs synchronously and leaves the manager ready for the
/// next connect.
#[derive(Default)]
pub struct SessionManager {
    session: Option<Session>,
}

impl SessionManager {
    /// Creates a manager with no active session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for a connecting peer with a fresh random nonce.
    pub fn on_connect(&mut self, peer: &str, mtu: usize, now: Instant) -> Result<&mut Session> {
        self.connect_with_nonce(peer, mtu, generate_challenge_nonce(), now)
    }

    /// Open a session with a caller-chosen nonce.
    ///
    /// Exists so deployments that pre-generate challenges, and tests
    /// that need deterministic ones, share the connect path.
    pub fn connect_with_nonce(
        &mut self,
        peer: &str,
        mtu: usize,
        nonce: [u8; CHALLENGE_NONCE_SIZE],
        now: Instant,
    ) -> Result<&mut Session> {
        if self.session.is_some() {
            return Err(DoorLinkError::Busy);
        }
        self.session = Some(Session::new(peer.to_string(), mtu, nonce, now));
        Ok(self.session.as_mut().expect("session just inserted"))
    }

    /// The active session, if any.
    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// The active session, if any.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Expire the nonce if its lifetime has passed. Does not regenerate.
    pub fn on_timer(&mut self, now: Instant) {
        if let Some(session) = self.session.as_mut() {
            if session.phase == SessionPhase::NonceIssued && session.nonce_expired(now) {
                log::info!("Challenge nonce expired for peer {}", session.peer);
                session.invalidate_nonce();
            }
        }
    }

    /// Tear the session down. Safe to call when no session exists.
    pub fn on_disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            log::info!("Session with {} closed", session.peer);
            session.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONCE: [u8; 16] = [0x0F; 16];

    fn manager_with_session(now: Instant) -> SessionManager {
        let mut manager = SessionManager::new();
        manager
            .connect_with_nonce("peer-a", 247, NONCE, now)
            .unwrap();
        manager
    }

    #[test]
    fn test_single_session_busy() {
        let now = Instant::now();
        let mut manager = manager_with_session(now);

        let result = manager.connect_with_nonce("peer-b", 247, NONCE, now);
        assert!(matches!(result, Err(DoorLinkError::Busy)));

        manager.on_disconnect();
        manager
            .connect_with_nonce("peer-b", 247, NONCE, now)
            .unwrap();
    }

    #[test]
    fn test_nonce_stable_across_reads() {
        let now = Instant::now();
        let mut manager = manager_with_session(now);
        let session = manager.session_mut().unwrap();

        assert_eq!(session.current_nonce(), Some(NONCE));
        assert_eq!(session.current_nonce(), Some(NONCE));
    }

    #[test]
    fn test_consume_nonce_single_use() {
        let now = Instant::now();
        let mut manager = manager_with_session(now);
        let session = manager.session_mut().unwrap();

        let nonce = session.consume_nonce(now).unwrap();
        assert_eq!(nonce, NONCE);
        assert_eq!(session.phase, SessionPhase::AwaitAuth);

        // A second consume in the same session fails.
        assert!(session.consume_nonce(now).is_err());
        assert_eq!(session.current_nonce(), None);
    }

    #[test]
    fn test_nonce_lifetime_bound() {
        let now = Instant::now();
        let mut manager = manager_with_session(now);

        let late = now + Duration::from_secs(NONCE_LIFETIME_SECS + 1);
        let session = manager.session_mut().unwrap();
        let result = session.consume_nonce(late);
        assert!(matches!(result, Err(DoorLinkError::ChallengeExpired)));
        assert_eq!(session.current_nonce(), None);
    }

    #[test]
    fn test_nonce_valid_just_before_deadline() {
        let now = Instant::now();
        let mut manager = manager_with_session(now);

        let almost = now + Duration::from_secs(NONCE_LIFETIME_SECS - 1);
        let session = manager.session_mut().unwrap();
        session.consume_nonce(almost).unwrap();
    }

    #[test]
    fn test_timer_invalidates_without_regenerating() {
        let now = Instant::now();
        let mut manager = manager_with_session(now);

        manager.on_timer(now + Duration::from_secs(NONCE_LIFETIME_SECS));
        let session = manager.session_mut().unwrap();
        assert_eq!(session.current_nonce(), None);
        assert_eq!(session.phase, SessionPhase::Idle);
    }

    #[test]
    fn test_consume_after_timer_expiry_is_challenge_expired() {
        let now = Instant::now();
        let mut manager = manager_with_session(now);

        manager.on_timer(now + Duration::from_secs(NONCE_LIFETIME_SECS));
        let session = manager.session_mut().unwrap();
        let result = session.consume_nonce(now + Duration::from_secs(NONCE_LIFETIME_SECS + 1));
        assert!(matches!(result, Err(DoorLinkError::ChallengeExpired)));
    }

    #[test]
    fn test_timer_noop_before_deadline() {
        let now = Instant::now();
        let mut manager = manager_with_session(now);

        manager.on_timer(now + Duration::from_secs(5));
        assert_eq!(
            manager.session_mut().unwrap().current_nonce(),
            Some(NONCE)
        );
    }

    #[test]
    fn test_teardown_clears_keys_and_nonce() {
        let now = Instant::now();
        let mut manager = manager_with_session(now);
        let session = manager.session_mut().unwrap();
        session.set_keys(SessionKeys {
            m2i: [1u8; 32],
            i2m: [2u8; 32],
        });

        session.teardown();
        assert!(session.keys().is_none());
        assert_eq!(session.current_nonce(), None);
        assert_eq!(session.phase, SessionPhase::Done);
    }

    #[test]
    fn test_disconnect_allows_fresh_session() {
        let now = Instant::now();
        let mut manager = manager_with_session(now);
        manager.on_disconnect();
        assert!(manager.session().is_none());

        let fresh = [0xEE; 16];
        manager
            .connect_with_nonce("peer-c", 185, fresh, now)
            .unwrap();
        assert_eq!(
            manager.session().unwrap().current_nonce(),
            Some(fresh)
        );
    }
}
