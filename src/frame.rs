//! Frame encoding and decoding for the DoorLink wire protocol.
//!
//! Pure byte-level translation, no cryptography and no session state.
//! Variant A uses a fixed-header auth frame and an indication response
//! frame; Variant B uses a start/tag/length/sequence link frame whose
//! value carries TLV bodies.

use crate::types::{
    DoorLinkError, DoorState, Result, StatusCode, AUTH_FRAME_MAX, AUTH_FRAME_MIN, GCM_NONCE_SIZE,
    GCM_TAG_SIZE, LINK_VALUE_MAX, P256_POINT_SIZE, PROTOCOL_VERSION, RESPONSE_FRAME_MAX,
};

/// Start byte for a Variant-B frame with a plaintext value.
pub const LINK_START_PLAIN: u8 = 0x81;

/// Start byte for a Variant-B frame with a CBC-encrypted value.
pub const LINK_START_ENCRYPTED: u8 = 0xC1;

/// Bytes the link-frame length field covers besides the value:
/// tag(1) + length(2) + seq(1).
const LINK_OVERHEAD: usize = 4;

/// Check that a frame fits the negotiated ATT MTU minus write overhead.
pub fn ensure_fits_mtu(frame_len: usize, mtu: usize) -> Result<()> {
    let budget = mtu.saturating_sub(3);
    if frame_len > budget {
        return Err(DoorLinkError::MtuExceeded(frame_len, budget));
    }
    Ok(())
}

/// Variant-A authentication frame written to the Auth characteristic.
///
/// Wire format (94..512 bytes):
/// - [0]      version (0x01)
/// - [1-65]   mobile public key (65 bytes, uncompressed SEC1)
/// - [66-77]  AES-GCM nonce (12 bytes)
/// - [78..]   ciphertext with the 16-byte tag appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFrame {
    /// Protocol version byte, also the AEAD associated data.
    pub version: u8,
    /// Mobile's P-256 public key, uncompressed SEC1 encoding.
    pub mobile_public: [u8; P256_POINT_SIZE],
    /// Per-frame AES-GCM nonce chosen by the mobile.
    pub gcm_nonce: [u8; GCM_NONCE_SIZE],
    /// Encrypted inner payload, tag included.
    pub ciphertext: Vec<u8>,
}

impl AuthFrame {
    /// Encode the frame to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let total = 1 + P256_POINT_SIZE + GCM_NONCE_SIZE + self.ciphertext.len();
        if total > AUTH_FRAME_MAX {
            return Err(DoorLinkError::MalformedFrame(format!(
                "Auth frame of {} bytes exceeds maximum {}",
                total, AUTH_FRAME_MAX
            )));
        }
        if self.ciphertext.len() < GCM_TAG_SIZE {
            return Err(DoorLinkError::MalformedFrame(format!(
                "Ciphertext of {} bytes is shorter than the tag",
                self.ciphertext.len()
            )));
        }

        let mut data = Vec::with_capacity(total);
        data.push(self.version);
        data.extend_from_slice(&self.mobile_public);
        data.extend_from_slice(&self.gcm_nonce);
        data.extend_from_slice(&self.ciphertext);
        Ok(data)
    }

    /// Decode bytes into an auth frame.
    ///
    /// The public-key prefix byte is checked here so malformed keys are
    /// rejected before any curve arithmetic happens.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < AUTH_FRAME_MIN || data.len() > AUTH_FRAME_MAX {
            return Err(DoorLinkError::MalformedFrame(format!(
                "Auth frame length {} outside [{}, {}]",
                data.len(),
                AUTH_FRAME_MIN,
                AUTH_FRAME_MAX
            )));
        }

        let version = data[0];
        if version != PROTOCOL_VERSION {
            return Err(DoorLinkError::MalformedFrame(format!(
                "Unknown protocol version {:#04x}",
                version
            )));
        }

        let mut offset = 1;
        if data[offset] != 0x04 {
            return Err(DoorLinkError::InvalidPoint);
        }

        let mut mobile_public = [0u8; P256_POINT_SIZE];
        mobile_public.copy_from_slice(&data[offset..offset + P256_POINT_SIZE]);
        offset += P256_POINT_SIZE;

        let mut gcm_nonce = [0u8; GCM_NONCE_SIZE];
        gcm_nonce.copy_from_slice(&data[offset..offset + GCM_NONCE_SIZE]);
        offset += GCM_NONCE_SIZE;

        Ok(Self {
            version,
            mobile_public,
            gcm_nonce,
            ciphertext: data[offset..].to_vec(),
        })
    }
}

/// Variant-A response frame delivered via indication.
///
/// Wire format (≤256 bytes): `nonce(12) | ciphertext+tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Per-frame AES-GCM nonce chosen by the intercom.
    pub gcm_nonce: [u8; GCM_NONCE_SIZE],
    /// Encrypted response body, tag included.
    pub ciphertext: Vec<u8>,
}

impl ResponseFrame {
    /// Encode the frame to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let total = GCM_NONCE_SIZE + self.ciphertext.len();
        if total > RESPONSE_FRAME_MAX {
            return Err(DoorLinkError::MalformedFrame(format!(
                "Response frame of {} bytes exceeds maximum {}",
                total, RESPONSE_FRAME_MAX
            )));
        }

        let mut data = Vec::with_capacity(total);
        data.extend_from_slice(&self.gcm_nonce);
        data.extend_from_slice(&self.ciphertext);
        Ok(data)
    }

    /// Decode bytes into a response frame.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < GCM_NONCE_SIZE + GCM_TAG_SIZE || data.len() > RESPONSE_FRAME_MAX {
            return Err(DoorLinkError::MalformedFrame(format!(
                "Response frame length {} outside [{}, {}]",
                data.len(),
                GCM_NONCE_SIZE + GCM_TAG_SIZE,
                RESPONSE_FRAME_MAX
            )));
        }

        let mut gcm_nonce = [0u8; GCM_NONCE_SIZE];
        gcm_nonce.copy_from_slice(&data[..GCM_NONCE_SIZE]);

        Ok(Self {
            gcm_nonce,
            ciphertext: data[GCM_NONCE_SIZE..].to_vec(),
        })
    }
}

/// Plaintext body of a Variant-A response: `status(1) | door_state(1) |
/// extended(var)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBody {
    pub status: StatusCode,
    pub door_state: DoorState,
    pub extended: Vec<u8>,
}

impl ResponseBody {
    /// Creates a body with no extended data.
    pub fn new(status: StatusCode, door_state: DoorState) -> Self {
        Self {
            status,
            door_state,
            extended: Vec::new(),
        }
    }

    /// Encode the body to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(2 + self.extended.len());
        data.push(self.status.as_byte());
        data.push(self.door_state.as_byte());
        data.extend_from_slice(&self.extended);
        data
    }

    /// Decode bytes into a response body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(DoorLinkError::MalformedFrame(
                "Response body shorter than 2 bytes".to_string(),
            ));
        }
        let status = StatusCode::from_byte(data[0]).ok_or_else(|| {
            DoorLinkError::MalformedFrame(format!("Unknown status byte {:#04x}", data[0]))
        })?;
        let door_state = DoorState::from_byte(data[1]).ok_or_else(|| {
            DoorLinkError::MalformedFrame(format!("Unknown door state byte {:#04x}", data[1]))
        })?;
        Ok(Self {
            status,
            door_state,
            extended: data[2..].to_vec(),
        })
    }
}

/// Variant-B link frame tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkTag {
    /// Ordinary data frame.
    Data = 0x01,
    /// IV resynchronization; resets the CBC chain and sequence baseline.
    IvReset = 0x02,
}

impl TryFrom<u8> for LinkTag {
    type Error = DoorLinkError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Data),
            0x02 => Ok(Self::IvReset),
            other => Err(DoorLinkError::MalformedFrame(format!(
                "Unknown link tag {:#04x}",
                other
            ))),
        }
    }
}

/// Variant-B link frame.
///
/// Wire format: `start(1) | tag(1) | length(2 BE) | seq(1) | value`.
/// `length` counts from the tag byte through the end of the value, so it
/// always equals `4 + value.len()`. Start 0x81 marks a plaintext value,
/// 0xC1 a CBC-encrypted one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    /// Whether the value field is CBC-encrypted.
    pub encrypted: bool,
    pub tag: LinkTag,
    pub seq: u8,
    pub value: Vec<u8>,
}

impl LinkFrame {
    /// Creates a data frame.
    pub fn data(encrypted: bool, seq: u8, value: Vec<u8>) -> Self {
        Self {
            encrypted,
            tag: LinkTag::Data,
            seq,
            value,
        }
    }

    /// Creates an IV-reset frame carrying the fresh IV as its value.
    pub fn iv_reset(seq: u8, iv: Vec<u8>) -> Self {
        Self {
            encrypted: false,
            tag: LinkTag::IvReset,
            seq,
            value: iv,
        }
    }

    /// Encode the frame to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.value.len() > LINK_VALUE_MAX {
            return Err(DoorLinkError::MalformedFrame(format!(
                "Link value of {} bytes exceeds maximum {}",
                self.value.len(),
                LINK_VALUE_MAX
            )));
        }

        let length = (LINK_OVERHEAD + self.value.len()) as u16;
        let mut data = Vec::with_capacity(1 + LINK_OVERHEAD + self.value.len());
        data.push(if self.encrypted {
            LINK_START_ENCRYPTED
        } else {
            LINK_START_PLAIN
        });
        data.push(self.tag as u8);
        data.extend_from_slice(&length.to_be_bytes());
        data.push(self.seq);
        data.extend_from_slice(&self.value);
        Ok(data)
    }

    /// Decode bytes into a link frame.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 1 + LINK_OVERHEAD {
            return Err(DoorLinkError::MalformedFrame(format!(
                "Link frame of {} bytes is shorter than the header",
                data.len()
            )));
        }

        let encrypted = match data[0] {
            LINK_START_PLAIN => false,
            LINK_START_ENCRYPTED => true,
            other => {
                return Err(DoorLinkError::MalformedFrame(format!(
                    "Unknown start byte {:#04x}",
                    other
                )))
            }
        };

        let tag = LinkTag::try_from(data[1])?;
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;

        if length < LINK_OVERHEAD {
            return Err(DoorLinkError::MalformedFrame(format!(
                "Length field {} is shorter than the fields it covers",
                length
            )));
        }
        // Length field claiming beyond the received buffer is the
        // MTU-exceeded case; trailing garbage is a plain size mismatch.
        if 1 + length > data.len() {
            return Err(DoorLinkError::MtuExceeded(1 + length, data.len()));
        }
        if 1 + length < data.len() {
            return Err(DoorLinkError::MalformedFrame(format!(
                "Length field {} does not cover {} received bytes",
                length,
                data.len() - 1
            )));
        }

        let value = data[5..].to_vec();
        if value.len() > LINK_VALUE_MAX {
            return Err(DoorLinkError::MalformedFrame(format!(
                "Link value of {} bytes exceeds maximum {}",
                value.len(),
                LINK_VALUE_MAX
            )));
        }

        Ok(Self {
            encrypted,
            tag,
            seq: data[4],
            value,
        })
    }
}

/// Sender-side sequence counter, wrapping at 255.
#[derive(Debug, Clone, Default)]
pub struct SequenceGenerator {
    next: u8,
}

impl SequenceGenerator {
    /// Creates a generator starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sequence number for the next emitted frame.
    pub fn next(&mut self) -> u8 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }
}

/// Receiver-side sequence validator.
///
/// Accepts only `prev + 1 (mod 256)` (the first frame must carry 0);
/// an IV-reset frame rebaselines to its own sequence number.
#[derive(Debug, Clone, Default)]
pub struct SequenceValidator {
    last: Option<u8>,
}

impl SequenceValidator {
    /// Creates a validator expecting sequence 0 first.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates an incoming frame's tag and sequence number.
    pub fn accept(&mut self, tag: LinkTag, seq: u8) -> Result<()> {
        if tag == LinkTag::IvReset {
            self.last = Some(seq);
            return Ok(());
        }

        let expected = match self.last {
            Some(last) => last.wrapping_add(1),
            None => 0,
        };
        if seq != expected {
            return Err(DoorLinkError::SequenceViolation {
                expected,
                got: seq,
            });
        }
        self.last = Some(seq);
        Ok(())
    }
}

/// TLV type byte inside a Variant-B link-frame value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlvType {
    DeviceUid = 0x01,
    AuthReq = 0x02,
    AuthRsp = 0x03,
    Credential = 0x04,
    Status = 0x05,
}

impl TryFrom<u8> for TlvType {
    type Error = DoorLinkError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::DeviceUid),
            0x02 => Ok(Self::AuthReq),
            0x03 => Ok(Self::AuthRsp),
            0x04 => Ok(Self::Credential),
            0x05 => Ok(Self::Status),
            other => Err(DoorLinkError::MalformedFrame(format!(
                "Unknown TLV type {:#04x}",
                other
            ))),
        }
    }
}

/// Encode a sequence of TLVs: `type(1) | len(2 BE) | value` each.
pub fn encode_tlvs(tlvs: &[(TlvType, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (tlv_type, value) in tlvs {
        out.push(*tlv_type as u8);
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value);
    }
    out
}

/// Parse a byte string into TLVs, failing on truncation or unknown types.
pub fn parse_tlvs(data: &[u8]) -> Result<Vec<(TlvType, Vec<u8>)>> {
    let mut tlvs = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        if data.len() - offset < 3 {
            return Err(DoorLinkError::MalformedFrame(
                "Truncated TLV header".to_string(),
            ));
        }
        let tlv_type = TlvType::try_from(data[offset])?;
        let len = u16::from_be_bytes([data[offset + 1], data[offset + 2]]) as usize;
        offset += 3;

        if data.len() - offset < len {
            return Err(DoorLinkError::MtuExceeded(offset + len, data.len()));
        }
        tlvs.push((tlv_type, data[offset..offset + len].to_vec()));
        offset += len;
    }

    Ok(tlvs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_auth_frame() -> AuthFrame {
        let mut mobile_public = [0u8; P256_POINT_SIZE];
        mobile_public[0] = 0x04;
        AuthFrame {
            version: PROTOCOL_VERSION,
            mobile_public,
            gcm_nonce: [0x10; GCM_NONCE_SIZE],
            ciphertext: vec![0x5A; 48],
        }
    }

    #[test]
    fn test_auth_frame_roundtrip() {
        let frame = sample_auth_frame();
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), 1 + 65 + 12 + 48);

        let decoded = AuthFrame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_auth_frame_min_length_is_empty_payload() {
        let mut frame = sample_auth_frame();
        frame.ciphertext = vec![0u8; GCM_TAG_SIZE];
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), AUTH_FRAME_MIN);
        AuthFrame::decode(&encoded).unwrap();
    }

    #[test]
    fn test_auth_frame_too_short() {
        let result = AuthFrame::decode(&[PROTOCOL_VERSION; 93]);
        assert!(matches!(result, Err(DoorLinkError::MalformedFrame(_))));
    }

    #[test]
    fn test_auth_frame_too_long() {
        let mut frame = sample_auth_frame();
        frame.ciphertext = vec![0u8; 500];
        assert!(frame.encode().is_err());

        let result = AuthFrame::decode(&vec![0u8; AUTH_FRAME_MAX + 1]);
        assert!(matches!(result, Err(DoorLinkError::MalformedFrame(_))));
    }

    #[test]
    fn test_auth_frame_wrong_version() {
        let mut encoded = sample_auth_frame().encode().unwrap();
        encoded[0] = 0x02;
        assert!(matches!(
            AuthFrame::decode(&encoded),
            Err(DoorLinkError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_auth_frame_rejects_bad_point_prefix() {
        let mut encoded = sample_auth_frame().encode().unwrap();
        encoded[1] = 0x02;
        assert!(matches!(
            AuthFrame::decode(&encoded),
            Err(DoorLinkError::InvalidPoint)
        ));
    }

    #[test]
    fn test_response_frame_roundtrip() {
        let frame = ResponseFrame {
            gcm_nonce: [0x20; GCM_NONCE_SIZE],
            ciphertext: vec![0xA5; 18],
        };
        let encoded = frame.encode().unwrap();
        let decoded = ResponseFrame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_response_frame_size_limit() {
        let frame = ResponseFrame {
            gcm_nonce: [0x20; GCM_NONCE_SIZE],
            ciphertext: vec![0xA5; RESPONSE_FRAME_MAX],
        };
        assert!(frame.encode().is_err());
        assert!(ResponseFrame::decode(&vec![0u8; RESPONSE_FRAME_MAX + 1]).is_err());
        assert!(ResponseFrame::decode(&[0u8; 27]).is_err());
    }

    #[test]
    fn test_response_body_roundtrip() {
        let body = ResponseBody {
            status: StatusCode::Success,
            door_state: DoorState::Unlocked,
            extended: vec![0x01, 0x02],
        };
        let decoded = ResponseBody::decode(&body.encode()).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_response_body_unknown_bytes() {
        assert!(ResponseBody::decode(&[0xFF, 0x02]).is_err());
        assert!(ResponseBody::decode(&[0x00, 0xFF]).is_err());
        assert!(ResponseBody::decode(&[0x00]).is_err());
    }

    #[test]
    fn test_link_frame_roundtrip() {
        let frame = LinkFrame::data(true, 7, vec![0xC3; 40]);
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded[0], LINK_START_ENCRYPTED);
        assert_eq!(u16::from_be_bytes([encoded[2], encoded[3]]), 44);

        let decoded = LinkFrame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_link_frame_plain_start_byte() {
        let frame = LinkFrame::data(false, 0, vec![0x01]);
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded[0], LINK_START_PLAIN);
    }

    #[test]
    fn test_link_frame_unknown_start() {
        let mut encoded = LinkFrame::data(false, 0, vec![0x01]).encode().unwrap();
        encoded[0] = 0x82;
        assert!(matches!(
            LinkFrame::decode(&encoded),
            Err(DoorLinkError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_link_frame_unknown_tag() {
        let mut encoded = LinkFrame::data(false, 0, vec![0x01]).encode().unwrap();
        encoded[1] = 0x7F;
        assert!(matches!(
            LinkFrame::decode(&encoded),
            Err(DoorLinkError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_link_frame_length_beyond_buffer() {
        let mut encoded = LinkFrame::data(false, 0, vec![0x01; 4]).encode().unwrap();
        encoded[3] = 0xFF;
        assert!(matches!(
            LinkFrame::decode(&encoded),
            Err(DoorLinkError::MtuExceeded(_, _))
        ));
    }

    #[test]
    fn test_link_frame_length_mismatch() {
        let mut encoded = LinkFrame::data(false, 0, vec![0x01; 4]).encode().unwrap();
        encoded[3] -= 1;
        assert!(matches!(
            LinkFrame::decode(&encoded),
            Err(DoorLinkError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_link_frame_value_cap() {
        let frame = LinkFrame::data(false, 0, vec![0u8; LINK_VALUE_MAX + 1]);
        assert!(frame.encode().is_err());
    }

    #[test]
    fn test_sequence_generator_wraps() {
        let mut gen = SequenceGenerator::new();
        for expected in 0..=255u8 {
            assert_eq!(gen.next(), expected);
        }
        assert_eq!(gen.next(), 0);
    }

    #[test]
    fn test_sequence_validator_in_order() {
        let mut validator = SequenceValidator::new();
        for seq in 0..=255u8 {
            validator.accept(LinkTag::Data, seq).unwrap();
        }
        // Wraps back to zero.
        validator.accept(LinkTag::Data, 0).unwrap();
    }

    #[test]
    fn test_sequence_validator_rejects_skip_and_replay() {
        let mut validator = SequenceValidator::new();
        validator.accept(LinkTag::Data, 0).unwrap();

        let skipped = validator.accept(LinkTag::Data, 2);
        assert!(matches!(
            skipped,
            Err(DoorLinkError::SequenceViolation {
                expected: 1,
                got: 2
            })
        ));

        let replayed = validator.accept(LinkTag::Data, 0);
        assert!(matches!(
            replayed,
            Err(DoorLinkError::SequenceViolation { .. })
        ));
    }

    #[test]
    fn test_sequence_validator_iv_reset_rebaselines() {
        let mut validator = SequenceValidator::new();
        validator.accept(LinkTag::Data, 0).unwrap();
        validator.accept(LinkTag::IvReset, 0x80).unwrap();
        validator.accept(LinkTag::Data, 0x81).unwrap();
    }

    #[test]
    fn test_tlv_roundtrip() {
        let tlvs = vec![
            (TlvType::DeviceUid, vec![0x01; 8]),
            (TlvType::AuthReq, vec![0x02; 16]),
        ];
        let encoded = encode_tlvs(&tlvs);
        let parsed = parse_tlvs(&encoded).unwrap();
        assert_eq!(parsed, tlvs);
    }

    #[test]
    fn test_tlv_empty_input() {
        assert!(parse_tlvs(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_tlv_unknown_type() {
        let result = parse_tlvs(&[0x7F, 0x00, 0x00]);
        assert!(matches!(result, Err(DoorLinkError::MalformedFrame(_))));
    }

    #[test]
    fn test_tlv_truncated_header() {
        let result = parse_tlvs(&[0x01, 0x00]);
        assert!(matches!(result, Err(DoorLinkError::MalformedFrame(_))));
    }

    #[test]
    fn test_tlv_value_beyond_buffer() {
        let result = parse_tlvs(&[0x01, 0x00, 0x10, 0xAA]);
        assert!(matches!(result, Err(DoorLinkError::MtuExceeded(_, _))));
    }
}
