//! Mobile central protocol driver.
//!
//! A finite-state machine advanced by typed transport events. Each
//! transition returns the I/O actions the BLE layer should perform, so
//! the whole driver is testable without a radio. The driver composes
//! the auth frame from the published challenge and decrypts the
//! intercom's response; everything else is plumbing.

use p256::{PublicKey, SecretKey};
use std::time::Duration;

use crate::credential::UnlockRequest;
use crate::crypto::{
    aes_gcm_decrypt, aes_gcm_encrypt, derive_session_keys, ecdh_p256, encode_public_key,
    generate_gcm_nonce,
};
use crate::frame::{AuthFrame, ResponseBody, ResponseFrame};
use crate::session::SessionKeys;
use crate::types::{
    DoorState, StatusCode, CHALLENGE_NONCE_SIZE, MTU_REQUEST_ECDH, P256_POINT_SIZE,
    PROTOCOL_VERSION,
};

/// Driver configuration: per-phase deadlines and the MTU to request.
#[derive(Debug, Clone)]
pub struct CentralConfig {
    pub scan_timeout: Duration,
    pub connect_timeout: Duration,
    pub discovery_timeout: Duration,
    pub auth_timeout: Duration,
    pub credential_timeout: Duration,
    /// ATT MTU to request after connecting. This driver speaks the ECDH
    /// variant, so the default is that variant's request; symmetric-
    /// variant integrations request [`crate::MTU_REQUEST_SYMMETRIC`]
    /// instead.
    pub mtu: usize,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(3),
            credential_timeout: Duration::from_secs(3),
            mtu: MTU_REQUEST_ECDH,
        }
    }
}

/// Driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CentralState {
    Idle,
    Scanning,
    Connecting,
    Discovering,
    Subscribing,
    /// Subscribed; waiting for the challenge notification.
    Authenticating,
    /// Auth frame written; waiting for the response indication.
    SendingCred,
    Complete,
    Failed,
}

/// Transport events fed into the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralEvent {
    /// Caller requests an unlock.
    Start,
    DeviceFound,
    Connected,
    ServicesDiscovered,
    Subscribed,
    /// Notification bytes from the Challenge characteristic.
    Notification(Vec<u8>),
    /// Indication bytes from the Response characteristic.
    Indication(Vec<u8>),
    /// The armed phase timer fired.
    Timeout,
    Disconnected,
}

/// Final outcome reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    Granted { door_state: DoorState },
    Denied { status: StatusCode },
    TransportFailed { reason: &'static str },
}

impl UnlockOutcome {
    /// User-facing message for this outcome.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Granted { .. } => StatusCode::Success.message(),
            Self::Denied { status } => status.message(),
            Self::TransportFailed { reason } => reason,
        }
    }
}

/// I/O the transport layer should perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralAction {
    StartScan(Duration),
    Connect(Duration),
    RequestMtu(usize),
    DiscoverServices(Duration),
    Subscribe(Duration),
    /// Arm the phase timer; a `Timeout` event is expected if it fires.
    ArmTimer(Duration),
    /// Write these bytes to the Auth characteristic.
    WriteAuth(Vec<u8>),
    /// Acknowledge the received indication.
    AckIndication,
    Disconnect,
    Report(UnlockOutcome),
}

/// The mobile driver.
pub struct CentralDriver {
    config: CentralConfig,
    state: CentralState,
    device_secret: SecretKey,
    device_public: [u8; P256_POINT_SIZE],
    intercom_public: PublicKey,
    credential: Vec<u8>,
    session_keys: Option<SessionKeys>,
}

impl CentralDriver {
    /// Creates a driver holding the mobile identity, the intercom's
    /// public key (from provisioning), and the encoded credential.
    pub fn new(
        config: CentralConfig,
        device_secret: SecretKey,
        intercom_public: PublicKey,
        credential: Vec<u8>,
    ) -> Self {
        let device_public = encode_public_key(&device_secret.public_key());
        Self {
            config,
            state: CentralState::Idle,
            device_secret,
            device_public,
            intercom_public,
            credential,
            session_keys: None,
        }
    }

    /// Current driver state.
    pub fn state(&self) -> CentralState {
        self.state
    }

    /// Advance the machine with one event, returning the actions to run.
    pub fn on_event(&mut self, event: CentralEvent) -> Vec<CentralAction> {
        match (self.state, event) {
            (CentralState::Idle, CentralEvent::Start) => {
                self.state = CentralState::Scanning;
                vec![CentralAction::StartScan(self.config.scan_timeout)]
            }
            (CentralState::Scanning, CentralEvent::DeviceFound) => {
                self.state = CentralState::Connecting;
                vec![CentralAction::Connect(self.config.connect_timeout)]
            }
            (CentralState::Connecting, CentralEvent::Connected) => {
                self.state = CentralState::Discovering;
                vec![
                    CentralAction::RequestMtu(self.config.mtu),
                    CentralAction::DiscoverServices(self.config.discovery_timeout),
                ]
            }
            (CentralState::Discovering, CentralEvent::ServicesDiscovered) => {
                self.state = CentralState::Subscribing;
                vec![CentralAction::Subscribe(self.config.discovery_timeout)]
            }
            (CentralState::Subscribing, CentralEvent::Subscribed) => {
                self.state = CentralState::Authenticating;
                vec![CentralAction::ArmTimer(self.config.auth_timeout)]
            }
            (CentralState::Authenticating, CentralEvent::Notification(bytes)) => {
                self.on_challenge(&bytes)
            }
            (CentralState::SendingCred, CentralEvent::Indication(bytes)) => {
                self.on_response(&bytes)
            }
            (
                CentralState::Idle | CentralState::Complete | CentralState::Failed,
                CentralEvent::Timeout | CentralEvent::Disconnected,
            ) => Vec::new(),
            (_, CentralEvent::Timeout) => self.fail(match self.state {
                CentralState::Scanning => "No reader found",
                CentralState::Connecting => "Connection timed out",
                CentralState::Discovering | CentralState::Subscribing => {
                    "Service discovery timed out"
                }
                CentralState::Authenticating => "No challenge from reader",
                CentralState::SendingCred => "No response from reader",
                _ => "Timed out",
            }),
            (_, CentralEvent::Disconnected) => {
                self.session_keys = None;
                self.state = CentralState::Failed;
                vec![CentralAction::Report(UnlockOutcome::TransportFailed {
                    reason: "Reader disconnected",
                })]
            }
            (state, event) => {
                log::debug!("Ignoring {:?} in state {:?}", event, state);
                Vec::new()
            }
        }
    }

    fn fail(&mut self, reason: &'static str) -> Vec<CentralAction> {
        self.session_keys = None;
        self.state = CentralState::Failed;
        vec![
            CentralAction::Disconnect,
            CentralAction::Report(UnlockOutcome::TransportFailed { reason }),
        ]
    }

    /// Compose and send the auth frame for the published challenge.
    fn on_challenge(&mut self, bytes: &[u8]) -> Vec<CentralAction> {
        let Ok(challenge) = <[u8; CHALLENGE_NONCE_SIZE]>::try_from(bytes) else {
            return self.fail("Malformed challenge");
        };

        let shared = ecdh_p256(&self.device_secret, &self.intercom_public);
        let Ok((k_m2i, k_i2m)) = derive_session_keys(&shared, &challenge) else {
            return self.fail("Key derivation failed");
        };

        let payload = UnlockRequest::new(self.credential.clone()).encode();
        let gcm_nonce = generate_gcm_nonce();
        let aad = [PROTOCOL_VERSION];
        let Ok(ciphertext) = aes_gcm_encrypt(&k_m2i, &gcm_nonce, &aad, &payload) else {
            return self.fail("Encryption failed");
        };

        let frame = AuthFrame {
            version: PROTOCOL_VERSION,
            mobile_public: self.device_public,
            gcm_nonce,
            ciphertext,
        };
        let Ok(frame_bytes) = frame.encode() else {
            return self.fail("Auth frame too large");
        };

        self.session_keys = Some(SessionKeys {
            m2i: k_m2i,
            i2m: k_i2m,
        });
        self.state = CentralState::SendingCred;
        vec![
            CentralAction::WriteAuth(frame_bytes),
            CentralAction::ArmTimer(self.config.credential_timeout),
        ]
    }

    /// Decrypt and report the intercom's response.
    fn on_response(&mut self, bytes: &[u8]) -> Vec<CentralAction> {
        // A single plaintext byte is the pre-key failure path.
        if bytes.len() == 1 {
            let outcome = match StatusCode::from_byte(bytes[0]) {
                Some(status) => UnlockOutcome::Denied { status },
                None => UnlockOutcome::TransportFailed {
                    reason: "Unintelligible response",
                },
            };
            self.session_keys = None;
            self.state = CentralState::Failed;
            return vec![
                CentralAction::AckIndication,
                CentralAction::Disconnect,
                CentralAction::Report(outcome),
            ];
        }

        let Some(keys) = self.session_keys.as_ref() else {
            return self.fail("Response before key agreement");
        };

        let body = ResponseFrame::decode(bytes)
            .and_then(|frame| {
                aes_gcm_decrypt(
                    &keys.i2m,
                    &frame.gcm_nonce,
                    &[PROTOCOL_VERSION],
                    &frame.ciphertext,
                )
            })
            .and_then(|plaintext| ResponseBody::decode(&plaintext));

        let outcome = match body {
            Ok(body) if body.status == StatusCode::Success => UnlockOutcome::Granted {
                door_state: body.door_state,
            },
            Ok(body) => UnlockOutcome::Denied {
                status: body.status,
            },
            Err(_) => UnlockOutcome::TransportFailed {
                reason: "Response authentication failed",
            },
        };

        self.session_keys = None;
        self.state = match outcome {
            UnlockOutcome::Granted { .. } | UnlockOutcome::Denied { .. } => CentralState::Complete,
            UnlockOutcome::TransportFailed { .. } => CentralState::Failed,
        };

        vec![
            CentralAction::AckIndication,
            CentralAction::Disconnect,
            CentralAction::Report(outcome),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_p256_keypair;

    fn driver() -> (CentralDriver, SecretKey) {
        let (device_secret, _) = generate_p256_keypair();
        let (intercom_secret, intercom_public) = generate_p256_keypair();
        let driver = CentralDriver::new(
            CentralConfig::default(),
            device_secret,
            intercom_public,
            vec![0x5A; 198],
        );
        (driver, intercom_secret)
    }

    fn advance_to_authenticating(driver: &mut CentralDriver) {
        assert_eq!(
            driver.on_event(CentralEvent::Start),
            vec![CentralAction::StartScan(Duration::from_secs(5))]
        );
        assert_eq!(
            driver.on_event(CentralEvent::DeviceFound),
            vec![CentralAction::Connect(Duration::from_secs(5))]
        );
        let actions = driver.on_event(CentralEvent::Connected);
        assert_eq!(actions[0], CentralAction::RequestMtu(MTU_REQUEST_ECDH));
        driver.on_event(CentralEvent::ServicesDiscovered);
        driver.on_event(CentralEvent::Subscribed);
        assert_eq!(driver.state(), CentralState::Authenticating);
    }

    /// Pull the written auth frame out of the driver's actions.
    fn written_auth(actions: &[CentralAction]) -> Vec<u8> {
        actions
            .iter()
            .find_map(|a| match a {
                CentralAction::WriteAuth(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .expect("no WriteAuth action")
    }

    #[test]
    fn test_happy_path_roundtrip() {
        let (mut driver, intercom_secret) = driver();
        advance_to_authenticating(&mut driver);

        let challenge = [0x0Cu8; 16];
        let actions = driver.on_event(CentralEvent::Notification(challenge.to_vec()));
        let frame_bytes = written_auth(&actions);
        assert_eq!(driver.state(), CentralState::SendingCred);

        // Play the intercom: derive the same keys and answer Success.
        let frame = AuthFrame::decode(&frame_bytes).unwrap();
        let peer = crate::crypto::parse_public_key(&frame.mobile_public).unwrap();
        let shared = ecdh_p256(&intercom_secret, &peer);
        let (k_m2i, k_i2m) = derive_session_keys(&shared, &challenge).unwrap();

        // The intercom can read the inner request.
        let plaintext = aes_gcm_decrypt(
            &k_m2i,
            &frame.gcm_nonce,
            &[PROTOCOL_VERSION],
            &frame.ciphertext,
        )
        .unwrap();
        let request = UnlockRequest::decode(&plaintext).unwrap();
        assert_eq!(request.credential, vec![0x5A; 198]);

        let body = ResponseBody::new(StatusCode::Success, DoorState::Unlocked);
        let nonce = generate_gcm_nonce();
        let ciphertext =
            aes_gcm_encrypt(&k_i2m, &nonce, &[PROTOCOL_VERSION], &body.encode()).unwrap();
        let response = ResponseFrame {
            gcm_nonce: nonce,
            ciphertext,
        }
        .encode()
        .unwrap();

        let actions = driver.on_event(CentralEvent::Indication(response));
        assert_eq!(driver.state(), CentralState::Complete);
        assert!(actions.contains(&CentralAction::Report(UnlockOutcome::Granted {
            door_state: DoorState::Unlocked
        })));
    }

    #[test]
    fn test_denied_status_reported() {
        let (mut driver, intercom_secret) = driver();
        advance_to_authenticating(&mut driver);

        let challenge = [0x0Cu8; 16];
        let actions = driver.on_event(CentralEvent::Notification(challenge.to_vec()));
        let frame = AuthFrame::decode(&written_auth(&actions)).unwrap();
        let peer = crate::crypto::parse_public_key(&frame.mobile_public).unwrap();
        let shared = ecdh_p256(&intercom_secret, &peer);
        let (_, k_i2m) = derive_session_keys(&shared, &challenge).unwrap();

        let body = ResponseBody::new(StatusCode::Expired, DoorState::Locked);
        let nonce = generate_gcm_nonce();
        let ciphertext =
            aes_gcm_encrypt(&k_i2m, &nonce, &[PROTOCOL_VERSION], &body.encode()).unwrap();
        let response = ResponseFrame {
            gcm_nonce: nonce,
            ciphertext,
        }
        .encode()
        .unwrap();

        let actions = driver.on_event(CentralEvent::Indication(response));
        assert!(actions.contains(&CentralAction::Report(UnlockOutcome::Denied {
            status: StatusCode::Expired
        })));
    }

    #[test]
    fn test_tampered_response_fails_closed() {
        let (mut driver, intercom_secret) = driver();
        advance_to_authenticating(&mut driver);

        let challenge = [0x0Cu8; 16];
        let actions = driver.on_event(CentralEvent::Notification(challenge.to_vec()));
        let frame = AuthFrame::decode(&written_auth(&actions)).unwrap();
        let peer = crate::crypto::parse_public_key(&frame.mobile_public).unwrap();
        let shared = ecdh_p256(&intercom_secret, &peer);
        let (_, k_i2m) = derive_session_keys(&shared, &challenge).unwrap();

        let body = ResponseBody::new(StatusCode::Success, DoorState::Unlocked);
        let nonce = generate_gcm_nonce();
        let mut ciphertext =
            aes_gcm_encrypt(&k_i2m, &nonce, &[PROTOCOL_VERSION], &body.encode()).unwrap();
        ciphertext[0] ^= 0x01;
        let response = ResponseFrame {
            gcm_nonce: nonce,
            ciphertext,
        }
        .encode()
        .unwrap();

        let actions = driver.on_event(CentralEvent::Indication(response));
        assert_eq!(driver.state(), CentralState::Failed);
        assert!(actions.contains(&CentralAction::Report(
            UnlockOutcome::TransportFailed {
                reason: "Response authentication failed"
            }
        )));
    }

    #[test]
    fn test_plain_status_byte_reported() {
        let (mut driver, _) = driver();
        advance_to_authenticating(&mut driver);

        driver.on_event(CentralEvent::Notification(vec![0x0C; 16]));
        let actions = driver.on_event(CentralEvent::Indication(vec![
            StatusCode::ChallengeExpired.as_byte(),
        ]));
        assert!(actions.contains(&CentralAction::Report(UnlockOutcome::Denied {
            status: StatusCode::ChallengeExpired
        })));
    }

    #[test]
    fn test_timeouts_disconnect_and_report() {
        let (mut driver, _) = driver();
        driver.on_event(CentralEvent::Start);

        let actions = driver.on_event(CentralEvent::Timeout);
        assert_eq!(driver.state(), CentralState::Failed);
        assert!(actions.contains(&CentralAction::Disconnect));
        assert!(actions.contains(&CentralAction::Report(
            UnlockOutcome::TransportFailed {
                reason: "No reader found"
            }
        )));
    }

    #[test]
    fn test_malformed_challenge_aborts() {
        let (mut driver, _) = driver();
        advance_to_authenticating(&mut driver);

        let actions = driver.on_event(CentralEvent::Notification(vec![0x0C; 8]));
        assert_eq!(driver.state(), CentralState::Failed);
        assert!(actions.contains(&CentralAction::Disconnect));
    }

    #[test]
    fn test_disconnect_mid_flow_reports() {
        let (mut driver, _) = driver();
        advance_to_authenticating(&mut driver);

        let actions = driver.on_event(CentralEvent::Disconnected);
        assert!(actions.contains(&CentralAction::Report(
            UnlockOutcome::TransportFailed {
                reason: "Reader disconnected"
            }
        )));
    }

    #[test]
    fn test_unexpected_events_ignored() {
        let (mut driver, _) = driver();
        assert!(driver.on_event(CentralEvent::Connected).is_empty());
        assert_eq!(driver.state(), CentralState::Idle);
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(
            UnlockOutcome::Granted {
                door_state: DoorState::Unlocked
            }
            .message(),
            "Access granted"
        );
        assert_eq!(
            UnlockOutcome::Denied {
                status: StatusCode::Revoked
            }
            .message(),
            "Credential revoked"
        );
    }

}
