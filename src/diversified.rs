//! Diversified-key authentication variant.
//!
//! Each device carries a 16-byte key diversified from the reader's
//! master key and the device UID. Authentication is a two-round
//! challenge–response with single-block AES: each side proves key
//! possession by returning `AES(K, nonce)` for the other's nonce. After
//! mutual authentication the link switches to encrypted frames whose
//! CBC chain carries over between frames; an IV-reset frame
//! resynchronizes a direction's chain. Centrals request an ATT MTU of
//! [`crate::MTU_REQUEST_SYMMETRIC`] before starting.

use crate::credential::{PackedCredential, TransactionCertificate};
use crate::crypto::{aes_cbc_decrypt, aes_cbc_encrypt, aes_ecb_encrypt_block, generate_challenge_nonce, generate_iv};
use crate::frame::{
    encode_tlvs, parse_tlvs, LinkFrame, LinkTag, SequenceGenerator, SequenceValidator, TlvType,
};
use crate::keys::KeyProvider;
use crate::types::{
    DoorLinkError, Result, AES_BLOCK_SIZE, CHALLENGE_NONCE_SIZE, DEVICE_UID_SIZE,
};

/// Status byte: transfer accepted.
pub const TRANSFER_ACCEPTED: u8 = 0x00;

/// One direction of the encrypted link: key plus rolling CBC IV.
///
/// The IV for each frame is the last ciphertext block of the previous
/// frame in the same direction, so frames cannot be dropped or reordered
/// without breaking the chain.
struct CbcChain {
    key: [u8; AES_BLOCK_SIZE],
    iv: [u8; AES_BLOCK_SIZE],
}

impl CbcChain {
    fn new(key: [u8; AES_BLOCK_SIZE], iv: [u8; AES_BLOCK_SIZE]) -> Self {
        Self { key, iv }
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let ciphertext = aes_cbc_encrypt(&self.key, &self.iv, plaintext)?;
        self.iv
            .copy_from_slice(&ciphertext[ciphertext.len() - AES_BLOCK_SIZE..]);
        Ok(ciphertext)
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let plaintext = aes_cbc_decrypt(&self.key, &self.iv, ciphertext)?;
        self.iv
            .copy_from_slice(&ciphertext[ciphertext.len() - AES_BLOCK_SIZE..]);
        Ok(plaintext)
    }

    fn reset(&mut self, iv: [u8; AES_BLOCK_SIZE]) {
        self.iv = iv;
    }
}

fn tlv_fixed<const N: usize>(tlvs: &[(TlvType, Vec<u8>)], wanted: TlvType) -> Result<[u8; N]> {
    let value = tlvs
        .iter()
        .find(|(t, _)| *t == wanted)
        .map(|(_, v)| v)
        .ok_or_else(|| DoorLinkError::MalformedFrame(format!("Missing {:?} TLV", wanted)))?;
    if value.len() != N {
        return Err(DoorLinkError::MalformedFrame(format!(
            "{:?} TLV is {} bytes, expected {}",
            wanted,
            value.len(),
            N
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(value);
    Ok(out)
}

// ============================================================================
// Reader side
// ============================================================================

/// Reader-side protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderPhase {
    /// Waiting for the device's UID and challenge.
    AwaitChallenge,
    /// Challenge answered; waiting for the device's response to ours.
    AwaitMutual,
    /// Mutual authentication done; encrypted transfer is open.
    Transfer,
    Done,
}

/// Reader-side engine for the diversified flow.
///
/// Fed decoded link frames; any returned error is fatal and the caller
/// must drop the connection.
pub struct ReaderEngine {
    phase: ReaderPhase,
    device_uid: Option<[u8; DEVICE_UID_SIZE]>,
    device_key: Option<[u8; AES_BLOCK_SIZE]>,
    challenge: Option<[u8; CHALLENGE_NONCE_SIZE]>,
    seq_out: SequenceGenerator,
    seq_in: SequenceValidator,
    recv_chain: Option<CbcChain>,
    send_chain: Option<CbcChain>,
}

impl ReaderEngine {
    /// Creates an engine for one connection.
    pub fn new() -> Self {
        Self {
            phase: ReaderPhase::AwaitChallenge,
            device_uid: None,
            device_key: None,
            challenge: None,
            seq_out: SequenceGenerator::new(),
            seq_in: SequenceValidator::new(),
            recv_chain: None,
            send_chain: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ReaderPhase {
        self.phase
    }

    /// Process one raw frame and produce the reply frame bytes.
    ///
    /// `validate` receives the decrypted packed credential and returns a
    /// status byte; `TRANSFER_ACCEPTED` triggers a transaction
    /// certificate in the reply.
    pub fn handle_frame(
        &mut self,
        data: &[u8],
        provider: &dyn KeyProvider,
        validate: &mut dyn FnMut(&PackedCredential) -> u8,
        now: u64,
    ) -> Result<Vec<u8>> {
        let frame = LinkFrame::decode(data)?;
        self.seq_in.accept(frame.tag, frame.seq)?;

        if frame.tag == LinkTag::IvReset {
            return self.handle_iv_reset(&frame);
        }

        match self.phase {
            ReaderPhase::AwaitChallenge => self.handle_challenge(&frame, provider),
            ReaderPhase::AwaitMutual => self.handle_mutual(&frame),
            ReaderPhase::Transfer => self.handle_transfer(&frame, validate, now),
            ReaderPhase::Done => Err(DoorLinkError::InvalidState(
                "Transfer already complete".to_string(),
            )),
        }
    }

    fn handle_iv_reset(&mut self, frame: &LinkFrame) -> Result<Vec<u8>> {
        let chain = self.recv_chain.as_mut().ok_or_else(|| {
            DoorLinkError::InvalidState("IV reset before encrypted link".to_string())
        })?;
        if frame.value.len() != AES_BLOCK_SIZE {
            return Err(DoorLinkError::MalformedFrame(format!(
                "IV reset value is {} bytes",
                frame.value.len()
            )));
        }
        let mut iv = [0u8; AES_BLOCK_SIZE];
        iv.copy_from_slice(&frame.value);
        chain.reset(iv);
        log::debug!("Receive IV chain resynchronized");
        Ok(Vec::new())
    }

    fn handle_challenge(
        &mut self,
        frame: &LinkFrame,
        provider: &dyn KeyProvider,
    ) -> Result<Vec<u8>> {
        if frame.encrypted {
            return Err(DoorLinkError::InvalidState(
                "Encrypted frame before authentication".to_string(),
            ));
        }
        let tlvs = parse_tlvs(&frame.value)?;
        let uid: [u8; DEVICE_UID_SIZE] = tlv_fixed(&tlvs, TlvType::DeviceUid)?;
        let ra: [u8; CHALLENGE_NONCE_SIZE] = tlv_fixed(&tlvs, TlvType::AuthReq)?;

        let key = provider.device_key(&uid)?;
        let ra_response = aes_ecb_encrypt_block(&key, &ra);
        let rb = generate_challenge_nonce();

        self.device_uid = Some(uid);
        self.device_key = Some(key);
        self.challenge = Some(rb);
        self.phase = ReaderPhase::AwaitMutual;

        let value = encode_tlvs(&[
            (TlvType::AuthRsp, ra_response.to_vec()),
            (TlvType::AuthReq, rb.to_vec()),
        ]);
        LinkFrame::data(false, self.seq_out.next(), value).encode()
    }

    fn handle_mutual(&mut self, frame: &LinkFrame) -> Result<Vec<u8>> {
        if frame.encrypted {
            return Err(DoorLinkError::InvalidState(
                "Encrypted frame before authentication".to_string(),
            ));
        }
        let key = self
            .device_key
            .ok_or_else(|| DoorLinkError::InvalidState("No device key".to_string()))?;
        let rb = self
            .challenge
            .ok_or_else(|| DoorLinkError::InvalidState("No outstanding challenge".to_string()))?;

        let tlvs = parse_tlvs(&frame.value)?;
        // A repeated opening challenge in this phase is a protocol
        // violation, not a malformed frame.
        if tlvs.iter().any(|(t, _)| *t == TlvType::DeviceUid) {
            self.phase = ReaderPhase::Done;
            return Err(DoorLinkError::InvalidState(
                "Duplicate authentication challenge".to_string(),
            ));
        }
        let rb_response: [u8; AES_BLOCK_SIZE] = tlv_fixed(&tlvs, TlvType::AuthRsp)?;

        if rb_response != aes_ecb_encrypt_block(&key, &rb) {
            self.phase = ReaderPhase::Done;
            return Err(DoorLinkError::SignatureInvalid);
        }

        // Both sides can compute AES(K, Rb); the reader-to-device chain
        // seeds from it directly, the device-to-reader chain from its
        // successor block.
        let seed = aes_ecb_encrypt_block(&key, &rb);
        self.recv_chain = Some(CbcChain::new(key, aes_ecb_encrypt_block(&key, &seed)));
        self.send_chain = Some(CbcChain::new(key, seed));
        self.phase = ReaderPhase::Transfer;
        log::info!("Mutual authentication complete, link encrypted");

        let ack = encode_tlvs(&[(TlvType::Status, vec![TRANSFER_ACCEPTED])]);
        let ciphertext = self
            .send_chain
            .as_mut()
            .expect("send chain just installed")
            .encrypt(&ack)?;
        LinkFrame::data(true, self.seq_out.next(), ciphertext).encode()
    }

    fn handle_transfer(
        &mut self,
        frame: &LinkFrame,
        validate: &mut dyn FnMut(&PackedCredential) -> u8,
        now: u64,
    ) -> Result<Vec<u8>> {
        if !frame.encrypted {
            return Err(DoorLinkError::InvalidState(
                "Plaintext frame on encrypted link".to_string(),
            ));
        }
        let plaintext = self
            .recv_chain
            .as_mut()
            .ok_or_else(|| DoorLinkError::InvalidState("No receive chain".to_string()))?
            .decrypt(&frame.value)?;

        let tlvs = parse_tlvs(&plaintext)?;
        let credential_bytes = tlvs
            .iter()
            .find(|(t, _)| *t == TlvType::Credential)
            .map(|(_, v)| v)
            .ok_or_else(|| DoorLinkError::MalformedFrame("Missing credential TLV".to_string()))?;
        let credential = PackedCredential::decode(credential_bytes)?;

        // The credential must belong to the device that authenticated.
        if Some(credential.device_uid) != self.device_uid {
            return Err(DoorLinkError::InvalidCredential(
                "Credential UID does not match the authenticated device".to_string(),
            ));
        }

        let status = validate(&credential);
        self.phase = ReaderPhase::Done;

        let mut reply_tlvs = vec![(TlvType::Status, vec![status])];
        if status == TRANSFER_ACCEPTED {
            let key = self
                .device_key
                .ok_or_else(|| DoorLinkError::InvalidState("No device key".to_string()))?;
            let certificate = TransactionCertificate::issue(
                credential.device_uid,
                credential.identifier,
                now,
                status,
                &key,
            )?;
            reply_tlvs.push((TlvType::Credential, certificate.encode()));
        }

        let ciphertext = self
            .send_chain
            .as_mut()
            .ok_or_else(|| DoorLinkError::InvalidState("No send chain".to_string()))?
            .encrypt(&encode_tlvs(&reply_tlvs))?;
        LinkFrame::data(true, self.seq_out.next(), ciphertext).encode()
    }
}

impl Default for ReaderEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Device side
// ============================================================================

/// Device-side protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePhase {
    Idle,
    /// Challenge sent; waiting for the reader's proof and counter-challenge.
    CentralChallenge,
    /// Reader proven; our proof sent, waiting for the encrypted ack.
    MutualAuth,
    /// Encrypted transfer open.
    Transfer,
    Done,
}

/// Device-side engine for the diversified flow.
pub struct DeviceEngine {
    device_uid: [u8; DEVICE_UID_SIZE],
    device_key: [u8; AES_BLOCK_SIZE],
    phase: DevicePhase,
    challenge: Option<[u8; CHALLENGE_NONCE_SIZE]>,
    seq_out: SequenceGenerator,
    seq_in: SequenceValidator,
    recv_chain: Option<CbcChain>,
    send_chain: Option<CbcChain>,
}

impl DeviceEngine {
    /// Creates an engine with the device's provisioned UID and key.
    pub fn new(device_uid: [u8; DEVICE_UID_SIZE], device_key: [u8; AES_BLOCK_SIZE]) -> Self {
        Self {
            device_uid,
            device_key,
            phase: DevicePhase::Idle,
            challenge: None,
            seq_out: SequenceGenerator::new(),
            seq_in: SequenceValidator::new(),
            recv_chain: None,
            send_chain: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> DevicePhase {
        self.phase
    }

    /// Build the opening frame: our UID and challenge.
    pub fn build_challenge(&mut self) -> Result<Vec<u8>> {
        self.build_challenge_with(generate_challenge_nonce())
    }

    /// Build the opening frame from a caller-chosen challenge.
    pub fn build_challenge_with(
        &mut self,
        ra: [u8; CHALLENGE_NONCE_SIZE],
    ) -> Result<Vec<u8>> {
        if self.phase != DevicePhase::Idle {
            return Err(DoorLinkError::InvalidState(format!(
                "Challenge already sent in phase {:?}",
                self.phase
            )));
        }
        self.challenge = Some(ra);
        self.phase = DevicePhase::CentralChallenge;

        let value = encode_tlvs(&[
            (TlvType::DeviceUid, self.device_uid.to_vec()),
            (TlvType::AuthReq, ra.to_vec()),
        ]);
        LinkFrame::data(false, self.seq_out.next(), value).encode()
    }

    /// Handle the reader's proof, returning our proof frame.
    ///
    /// Aborts with `SignatureInvalid` if the reader's response to our
    /// challenge is wrong in any bit.
    pub fn handle_reader_auth(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if self.phase != DevicePhase::CentralChallenge {
            return Err(DoorLinkError::InvalidState(format!(
                "Reader auth in phase {:?}",
                self.phase
            )));
        }
        let frame = LinkFrame::decode(data)?;
        self.seq_in.accept(frame.tag, frame.seq)?;

        let ra = self
            .challenge
            .ok_or_else(|| DoorLinkError::InvalidState("No challenge in flight".to_string()))?;

        let tlvs = parse_tlvs(&frame.value)?;
        let ra_response: [u8; AES_BLOCK_SIZE] = tlv_fixed(&tlvs, TlvType::AuthRsp)?;
        let rb: [u8; CHALLENGE_NONCE_SIZE] = tlv_fixed(&tlvs, TlvType::AuthReq)?;

        let ra_expected = aes_ecb_encrypt_block(&self.device_key, &ra);
        if ra_response != ra_expected {
            self.phase = DevicePhase::Done;
            return Err(DoorLinkError::SignatureInvalid);
        }

        let rb_response = aes_ecb_encrypt_block(&self.device_key, &rb);
        // Chain seeds mirror the reader's: reader-to-device is keyed off
        // AES(K, Rb)'s block, device-to-reader off its successor.
        self.recv_chain = Some(CbcChain::new(self.device_key, rb_response));
        self.send_chain = Some(CbcChain::new(
            self.device_key,
            aes_ecb_encrypt_block(&self.device_key, &rb_response),
        ));
        self.phase = DevicePhase::MutualAuth;

        let value = encode_tlvs(&[(TlvType::AuthRsp, rb_response.to_vec())]);
        LinkFrame::data(false, self.seq_out.next(), value).encode()
    }

    /// Handle the reader's encrypted acknowledgement of mutual auth.
    pub fn handle_mutual_ack(&mut self, data: &[u8]) -> Result<()> {
        if self.phase != DevicePhase::MutualAuth {
            return Err(DoorLinkError::InvalidState(format!(
                "Mutual ack in phase {:?}",
                self.phase
            )));
        }
        let frame = LinkFrame::decode(data)?;
        self.seq_in.accept(frame.tag, frame.seq)?;

        if !frame.encrypted {
            return Err(DoorLinkError::InvalidState(
                "Expected encrypted acknowledgement".to_string(),
            ));
        }
        let plaintext = self
            .recv_chain
            .as_mut()
            .ok_or_else(|| DoorLinkError::InvalidState("No receive chain".to_string()))?
            .decrypt(&frame.value)?;

        let tlvs = parse_tlvs(&plaintext)?;
        let status: [u8; 1] = tlv_fixed(&tlvs, TlvType::Status)?;
        if status[0] != TRANSFER_ACCEPTED {
            self.phase = DevicePhase::Done;
            return Err(DoorLinkError::InvalidState(format!(
                "Reader refused the link: status {:#04x}",
                status[0]
            )));
        }

        self.phase = DevicePhase::Transfer;
        Ok(())
    }

    /// Build the encrypted credential transfer frame.
    pub fn build_credential_frame(&mut self, credential: &PackedCredential) -> Result<Vec<u8>> {
        if self.phase != DevicePhase::Transfer {
            return Err(DoorLinkError::InvalidState(format!(
                "Transfer in phase {:?}",
                self.phase
            )));
        }
        let value = encode_tlvs(&[(TlvType::Credential, credential.encode())]);
        let ciphertext = self
            .send_chain
            .as_mut()
            .ok_or_else(|| DoorLinkError::InvalidState("No send chain".to_string()))?
            .encrypt(&value)?;
        LinkFrame::data(true, self.seq_out.next(), ciphertext).encode()
    }

    /// Build an IV-reset frame, resynchronizing our send chain.
    pub fn build_iv_reset(&mut self) -> Result<Vec<u8>> {
        let chain = self
            .send_chain
            .as_mut()
            .ok_or_else(|| DoorLinkError::InvalidState("No send chain".to_string()))?;
        let iv = generate_iv();
        chain.reset(iv);
        LinkFrame::iv_reset(self.seq_out.next(), iv.to_vec()).encode()
    }

    /// Parse the reader's transfer response.
    ///
    /// # Returns
    /// Tuple of (status byte, transaction certificate if accepted)
    pub fn parse_transfer_response(
        &mut self,
        data: &[u8],
    ) -> Result<(u8, Option<TransactionCertificate>)> {
        if self.phase != DevicePhase::Transfer {
            return Err(DoorLinkError::InvalidState(format!(
                "Transfer response in phase {:?}",
                self.phase
            )));
        }
        let frame = LinkFrame::decode(data)?;
        self.seq_in.accept(frame.tag, frame.seq)?;

        let plaintext = self
            .recv_chain
            .as_mut()
            .ok_or_else(|| DoorLinkError::InvalidState("No receive chain".to_string()))?
            .decrypt(&frame.value)?;

        let tlvs = parse_tlvs(&plaintext)?;
        let status: [u8; 1] = tlv_fixed(&tlvs, TlvType::Status)?;

        let certificate = tlvs
            .iter()
            .find(|(t, _)| *t == TlvType::Credential)
            .map(|(_, v)| TransactionCertificate::decode(v))
            .transpose()?;

        if let Some(cert) = &certificate {
            cert.verify(&self.device_key)?;
        }

        self.phase = DevicePhase::Done;
        Ok((status[0], certificate))
    }
}
