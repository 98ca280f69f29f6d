//! The intercom peripheral engine.
//!
//! One explicit value owns the long-lived identity, the single live
//! session, the rate limiter, and the door actuator boundary. The BLE
//! transport calls in with connection events and characteristic writes;
//! the engine answers with bytes to notify or indicate. All three
//! protocol variants route through the same entry points.

use std::sync::Arc;
use std::time::Instant;

use ed25519_dalek::VerifyingKey;
use p256::SecretKey;

use crate::credential::{
    verify_credential, DoorIdentity, PackedCredential, UnlockRequest, ACTION_UNLOCK,
};
use crate::crypto::{
    aes_gcm_decrypt, aes_gcm_encrypt, derive_session_keys, ecdh_p256, generate_gcm_nonce,
    parse_public_key,
};
use crate::diversified::{self, TRANSFER_ACCEPTED};
use crate::frame::{ensure_fits_mtu, AuthFrame, ResponseBody, ResponseFrame};
use crate::keys::KeyProvider;
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::session::{SessionKeys, SessionManager, SessionPhase};
use crate::signature::fingerprint;
use crate::store::RevocationList;
use crate::symmetric::{self, CredentialStatus};
use crate::types::{
    DoorState, Result, StatusCode, CHALLENGE_NONCE_SIZE, MTU_REQUEST_ECDH, MTU_REQUEST_SYMMETRIC,
    PROTOCOL_VERSION,
};

/// Protocol variant the intercom is deployed with.
pub enum Variant {
    /// Per-session ECDH with a backend-signed credential.
    EcdhGcm {
        /// The intercom's long-lived P-256 private key.
        identity: SecretKey,
        /// The issuing authority's Ed25519 verifying key.
        authority: VerifyingKey,
    },
    /// Diversified symmetric keys with mutual challenge-response.
    DiversifiedCbc { provider: Box<dyn KeyProvider> },
    /// Two-round symmetric-key flow with an HKDF-derived device key.
    SymmetricDemo { master_key: [u8; 16] },
}

/// What the transport should do with the engine's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineReply {
    /// Nothing to send.
    None,
    /// A full protocol frame to notify or indicate.
    Frame(Vec<u8>),
    /// A one-byte plaintext status; indicate it, then disconnect.
    ///
    /// Used when no session key exists yet so nothing can be encrypted.
    PlainStatus(StatusCode),
}

/// The door-strike boundary. Exclusive; unlocks are serialized by the
/// single-session engine.
pub trait DoorActuator: Send {
    /// Drive the strike. Returns the resulting door state.
    fn unlock(&mut self) -> Result<DoorState>;

    /// Current door state without actuating.
    fn state(&self) -> DoorState;
}

/// Engine configuration.
pub struct EngineConfig {
    /// This intercom's door identity.
    pub door: DoorIdentity,
    pub rate_limit: RateLimitConfig,
}

impl EngineConfig {
    /// Creates a configuration with default limits.
    pub fn new(door: DoorIdentity) -> Self {
        Self {
            door,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// The peripheral protocol engine.
pub struct PeripheralEngine {
    variant: Variant,
    config: EngineConfig,
    /// MTU assumed when the transport reports no negotiated value;
    /// depends on the variant's frame sizes.
    fallback_mtu: usize,
    sessions: SessionManager,
    rate: RateLimiter,
    revocations: Arc<RevocationList>,
    actuator: Box<dyn DoorActuator>,
    symmetric_flow: Option<symmetric::ReaderFlow>,
    diversified_flow: Option<diversified::ReaderEngine>,
}

impl PeripheralEngine {
    /// Creates an engine. No hidden globals: everything the engine
    /// touches is passed in here.
    pub fn new(
        variant: Variant,
        config: EngineConfig,
        revocations: Arc<RevocationList>,
        actuator: Box<dyn DoorActuator>,
    ) -> Self {
        let rate = RateLimiter::new(config.rate_limit.clone());
        let fallback_mtu = match &variant {
            Variant::EcdhGcm { .. } => MTU_REQUEST_ECDH,
            Variant::DiversifiedCbc { .. } | Variant::SymmetricDemo { .. } => {
                MTU_REQUEST_SYMMETRIC
            }
        };
        Self {
            variant,
            config,
            fallback_mtu,
            sessions: SessionManager::new(),
            rate,
            revocations,
            actuator,
            symmetric_flow: None,
            diversified_flow: None,
        }
    }

    /// Handle an incoming connection. Fails with `Busy` while another
    /// session is live.
    pub fn on_connect(&mut self, peer: &str, mtu: Option<usize>, now: Instant) -> Result<()> {
        let mtu = mtu.unwrap_or(self.fallback_mtu);
        self.sessions.on_connect(peer, mtu, now)?;
        self.setup_variant_flow();
        log::info!("Session opened for {}", peer);
        Ok(())
    }

    /// Handle a connection with a caller-chosen challenge nonce.
    pub fn on_connect_with_nonce(
        &mut self,
        peer: &str,
        mtu: Option<usize>,
        nonce: [u8; CHALLENGE_NONCE_SIZE],
        now: Instant,
    ) -> Result<()> {
        let mtu = mtu.unwrap_or(self.fallback_mtu);
        self.sessions.connect_with_nonce(peer, mtu, nonce, now)?;
        self.setup_variant_flow();
        Ok(())
    }

    fn setup_variant_flow(&mut self) {
        match &self.variant {
            Variant::SymmetricDemo { master_key } => {
                self.symmetric_flow = Some(symmetric::ReaderFlow::new(*master_key));
            }
            Variant::DiversifiedCbc { .. } => {
                self.diversified_flow = Some(diversified::ReaderEngine::new());
            }
            Variant::EcdhGcm { .. } => {}
        }
    }

    /// Subscription to the Challenge characteristic: the current nonce.
    ///
    /// Re-subscribing returns the same nonce; it is never regenerated
    /// until invalidated.
    pub fn on_subscribe_challenge(&self) -> Option<[u8; CHALLENGE_NONCE_SIZE]> {
        self.sessions.session().and_then(|s| s.current_nonce())
    }

    /// Direct read of the Challenge characteristic (fallback path).
    pub fn on_read_challenge(&self) -> Option<[u8; CHALLENGE_NONCE_SIZE]> {
        self.on_subscribe_challenge()
    }

    /// Periodic timer tick; expires the challenge nonce when due.
    pub fn on_timer(&mut self, now: Instant) {
        self.sessions.on_timer(now);
    }

    /// Handle a write to the auth / data-transfer characteristic.
    ///
    /// `now` drives nonce lifetime and rate limiting; `unix_now` drives
    /// credential validity.
    pub fn on_write(&mut self, data: &[u8], now: Instant, unix_now: u64) -> EngineReply {
        match &mut self.variant {
            Variant::EcdhGcm {
                identity,
                authority,
            } => Self::handle_ecdh_write(
                identity,
                authority,
                &self.config,
                &mut self.sessions,
                &mut self.rate,
                &self.revocations,
                self.actuator.as_mut(),
                data,
                now,
                unix_now,
            ),
            Variant::SymmetricDemo { .. } => {
                let Some(flow) = self.symmetric_flow.as_mut() else {
                    return EngineReply::PlainStatus(StatusCode::AuthFailed);
                };
                let actuator = self.actuator.as_mut();
                // Mutual auth under the device key is the access gate in
                // this variant; a decryptable credential is accepted.
                let mut validate = |payload: &[u8]| {
                    if payload.is_empty() {
                        return CredentialStatus::InvalidFormat;
                    }
                    match actuator.unlock() {
                        Ok(_) => CredentialStatus::Success,
                        Err(e) => {
                            log::error!("Actuator fault: {}", e);
                            CredentialStatus::Rejected
                        }
                    }
                };
                EngineReply::Frame(flow.handle_message(data, &mut validate))
            }
            Variant::DiversifiedCbc { provider } => {
                let Some(flow) = self.diversified_flow.as_mut() else {
                    return EngineReply::PlainStatus(StatusCode::AuthFailed);
                };
                let actuator = self.actuator.as_mut();
                let mut validate = |credential: &PackedCredential| {
                    log::info!(
                        "Unlock for device {}",
                        hex::encode(credential.device_uid)
                    );
                    match actuator.unlock() {
                        Ok(_) => TRANSFER_ACCEPTED,
                        Err(e) => {
                            log::error!("Actuator fault: {}", e);
                            0x01
                        }
                    }
                };
                match flow.handle_frame(data, provider.as_ref(), &mut validate, unix_now) {
                    Ok(reply) if reply.is_empty() => EngineReply::None,
                    Ok(reply) => EngineReply::Frame(reply),
                    Err(e) => {
                        log::warn!("Diversified flow error: {}", e);
                        if let Some(session) = self.sessions.session_mut() {
                            session.teardown();
                        }
                        EngineReply::PlainStatus(e.status_code())
                    }
                }
            }
        }
    }

    /// Handle a disconnect. Synchronously erases all session material;
    /// an authentication still in flight counts as a finished attempt.
    pub fn on_disconnect(&mut self, now: Instant) {
        if let Some(session) = self.sessions.session() {
            if session.phase == SessionPhase::AwaitAuth {
                if let Some(peer_public) = session.peer_public {
                    self.rate.record(&peer_public, now);
                }
            }
        }
        self.sessions.on_disconnect();
        self.symmetric_flow = None;
        self.diversified_flow = None;
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_ecdh_write(
        identity: &SecretKey,
        authority: &VerifyingKey,
        config: &EngineConfig,
        sessions: &mut SessionManager,
        rate: &mut RateLimiter,
        revocations: &RevocationList,
        actuator: &mut dyn DoorActuator,
        data: &[u8],
        now: Instant,
        unix_now: u64,
    ) -> EngineReply {
        let Some(session) = sessions.session_mut() else {
            return EngineReply::PlainStatus(StatusCode::AuthFailed);
        };

        // Pre-crypto rejections leave the session and its nonce alone so
        // a legitimate retry on the same connection can still succeed.
        if let Err(e) = ensure_fits_mtu(data.len(), session.mtu) {
            log::warn!("Oversize auth frame: {}", e);
            return EngineReply::PlainStatus(e.status_code());
        }

        let frame = match AuthFrame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Auth frame rejected: {}", e);
                return EngineReply::PlainStatus(e.status_code());
            }
        };

        // Rate gate before any curve arithmetic. A limited peer keeps
        // the nonce so a later retry in the window can still use it.
        if rate.check(&frame.mobile_public, now).is_err() {
            rate.record(&frame.mobile_public, now);
            return EngineReply::PlainStatus(StatusCode::RateLimited);
        }
        rate.record(&frame.mobile_public, now);

        let peer_public = match parse_public_key(&frame.mobile_public) {
            Ok(key) => key,
            Err(e) => {
                log::warn!(
                    "Invalid peer point from {}",
                    fingerprint(&frame.mobile_public)
                );
                return EngineReply::PlainStatus(e.status_code());
            }
        };

        // From here on the attempt consumes the nonce.
        let challenge_nonce = match session.consume_nonce(now) {
            Ok(nonce) => nonce,
            Err(e) => {
                log::info!("Auth attempt rejected: {}", e);
                session.teardown();
                return EngineReply::PlainStatus(e.status_code());
            }
        };

        let shared = ecdh_p256(identity, &peer_public);
        let (k_m2i, k_i2m) = match derive_session_keys(&shared, &challenge_nonce) {
            Ok(keys) => keys,
            Err(e) => {
                session.teardown();
                return EngineReply::PlainStatus(e.status_code());
            }
        };
        session.set_keys(SessionKeys {
            m2i: k_m2i,
            i2m: k_i2m,
        });
        session.peer_public = Some(frame.mobile_public);

        let aad = [frame.version];
        let plaintext = match aes_gcm_decrypt(&k_m2i, &frame.gcm_nonce, &aad, &frame.ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                log::info!(
                    "Tag verification failed for {}",
                    fingerprint(&frame.mobile_public)
                );
                return Self::finish(session, &k_i2m, e.status_code(), actuator.state());
            }
        };

        let request = match UnlockRequest::decode(&plaintext) {
            Ok(request) => request,
            Err(e) => return Self::finish(session, &k_i2m, e.status_code(), actuator.state()),
        };
        if request.action != ACTION_UNLOCK {
            return Self::finish(
                session,
                &k_i2m,
                StatusCode::PermissionDenied,
                actuator.state(),
            );
        }

        let revoked = revocations.snapshot();
        let grant = match verify_credential(
            &request.credential,
            authority,
            &config.door,
            &frame.mobile_public,
            &revoked,
            unix_now,
        ) {
            Ok(grant) => grant,
            Err(e) => {
                log::info!(
                    "Credential rejected for {}: {}",
                    fingerprint(&frame.mobile_public),
                    e
                );
                session.phase = SessionPhase::Rejected;
                return Self::finish(session, &k_i2m, e.status_code(), actuator.state());
            }
        };

        match actuator.unlock() {
            Ok(door_state) => {
                session.phase = SessionPhase::CredentialAccepted;
                log::info!(
                    "Unlock granted: credential {} device {}",
                    hex::encode(grant.credential_id),
                    fingerprint(&grant.device_public_key)
                );
                Self::finish(session, &k_i2m, StatusCode::Success, door_state)
            }
            Err(e) => {
                log::error!("Actuator fault after grant: {}", e);
                Self::finish(session, &k_i2m, StatusCode::Jammed, actuator.state())
            }
        }
    }

    /// Encrypt and encode the response, then retire the session.
    fn finish(
        session: &mut crate::session::Session,
        k_i2m: &[u8; 32],
        status: StatusCode,
        door_state: DoorState,
    ) -> EngineReply {
        let body = ResponseBody::new(status, door_state);
        let nonce = generate_gcm_nonce();
        let aad = [PROTOCOL_VERSION];

        let reply = aes_gcm_encrypt(k_i2m, &nonce, &aad, &body.encode())
            .and_then(|ciphertext| {
                ResponseFrame {
                    gcm_nonce: nonce,
                    ciphertext,
                }
                .encode()
            })
            .map(EngineReply::Frame)
            .unwrap_or(EngineReply::PlainStatus(StatusCode::InternalError));

        session.teardown();
        reply
    }
}
