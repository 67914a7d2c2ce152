//! Boundary value types for the training-round registry.
//!
//! All identifiers, version tags and digests are fixed-width and opaque to the
//! registry. Nothing here hashes payloads; digests arrive pre-computed.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

fn parse_hex32(input: &str) -> Result<[u8; 32]> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    if digits.len() != 64 {
        return Err(CoreError::InvalidInput(format!(
            "expected 64 hex digits, got {}",
            digits.len()
        )));
    }
    let bytes = hex::decode(digits)
        .map_err(|e| CoreError::InvalidInput(format!("invalid hex: {}", e)))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Unsigned 256-bit round identifier, stored big-endian.
///
/// Byte-wise ordering of the big-endian representation equals numeric
/// ordering, so the derived `Ord` is the integer order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoundId([u8; 32]);

impl RoundId {
    /// Largest representable id (2^256 - 1)
    pub const MAX: RoundId = RoundId([0xFF; 32]);

    /// Build from raw big-endian bytes.
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw big-endian bytes.
    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Narrow to `u128` when the value fits.
    pub fn to_u128(&self) -> Option<u128> {
        if self.0[..16].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&self.0[16..]);
        Some(u128::from_be_bytes(low))
    }

    fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// `self = self * mul + add`; true on overflow past 256 bits.
    fn mul_add(&mut self, mul: u32, add: u32) -> bool {
        let mut carry = add;
        for byte in self.0.iter_mut().rev() {
            let v = (*byte as u32) * mul + carry;
            *byte = (v & 0xFF) as u8;
            carry = v >> 8;
        }
        carry != 0
    }

    /// `self = self / div`, returning the remainder.
    fn div_rem(&mut self, div: u32) -> u32 {
        let mut rem = 0u32;
        for byte in self.0.iter_mut() {
            let cur = (rem << 8) | *byte as u32;
            *byte = (cur / div) as u8;
            rem = cur % div;
        }
        rem
    }
}

impl From<u64> for RoundId {
    fn from(value: u64) -> Self {
        Self::from(value as u128)
    }
}

impl From<u128> for RoundId {
    fn from(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl FromStr for RoundId {
    type Err = CoreError;

    /// Accepts decimal (`12`) or hex (`0x0c`) notation.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            if digits.is_empty() || digits.len() > 64 {
                return Err(CoreError::InvalidInput(format!(
                    "round id hex must have 1..=64 digits, got {}",
                    digits.len()
                )));
            }
            let padded = format!("{:0>64}", digits);
            return parse_hex32(&padded).map(Self);
        }

        if s.is_empty() {
            return Err(CoreError::InvalidInput("round id is empty".to_string()));
        }

        let mut id = RoundId([0u8; 32]);
        for c in s.chars() {
            let digit = c.to_digit(10).ok_or_else(|| {
                CoreError::InvalidInput(format!("round id contains non-digit {:?}", c))
            })?;
            if id.mul_add(10, digit) {
                return Err(CoreError::InvalidInput(
                    "round id exceeds 256 bits".to_string(),
                ));
            }
        }
        Ok(id)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }
        let mut n = *self;
        let mut digits = Vec::with_capacity(78);
        while !n.is_zero() {
            let rem = n.div_rem(10);
            digits.push(b'0' + rem as u8);
        }
        digits.reverse();
        f.write_str(&String::from_utf8_lossy(&digits))
    }
}

impl fmt::Debug for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoundId({})", self)
    }
}

impl TryFrom<String> for RoundId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RoundId> for String {
    fn from(value: RoundId) -> Self {
        value.to_string()
    }
}

/// Fixed 32-byte model version tag, compared by exact byte equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelVersion([u8; 32]);

impl ModelVersion {
    /// All-zero tag (the empty label)
    pub const ZERO: ModelVersion = ModelVersion([0u8; 32]);

    /// Wrap raw tag bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Encode a short label such as `"v1.0"`.
    ///
    /// UTF-8 bytes are left-aligned and zero-padded. At most 31 bytes are
    /// accepted so the tag always ends with a zero terminator.
    pub fn from_label(label: &str) -> Result<Self> {
        let raw = label.as_bytes();
        if raw.len() > 31 {
            return Err(CoreError::InvalidInput(format!(
                "model version label is {} bytes, max 31",
                raw.len()
            )));
        }
        let mut bytes = [0u8; 32];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self(bytes))
    }

    /// Decode a zero-padded UTF-8 label, if this tag is one.
    pub fn label(&self) -> Option<String> {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(32);
        if self.0[end..].iter().any(|b| *b != 0) {
            return None;
        }
        std::str::from_utf8(&self.0[..end]).ok().map(str::to_string)
    }

    /// Raw tag bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `0x`-prefixed hex encoding.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse `0x`-prefixed (or bare) 64-digit hex.
    pub fn from_hex(input: &str) -> Result<Self> {
        parse_hex32(input).map(Self)
    }

    /// Parse either hex (`0x…`, 64 digits) or a short label.
    pub fn parse(input: &str) -> Result<Self> {
        if input.starts_with("0x") && input.len() == 66 {
            Self::from_hex(input)
        } else {
            Self::from_label(input)
        }
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) if !label.is_empty() && !label.chars().any(char::is_control) => {
                f.write_str(&label)
            }
            _ => f.write_str(&self.to_hex()),
        }
    }
}

impl fmt::Debug for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelVersion({})", self)
    }
}

impl TryFrom<String> for ModelVersion {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<ModelVersion> for String {
    fn from(value: ModelVersion) -> Self {
        value.to_hex()
    }
}

/// 32-byte content-addressed digest supplied by the caller.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest32([u8; 32]);

/// Commitment to a participant's update payload.
pub type UpdateHash = Digest32;

impl Digest32 {
    /// All-zero digest
    pub const ZERO: Digest32 = Digest32([0u8; 32]);

    /// Wrap raw digest bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `0x`-prefixed hex encoding.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse `0x`-prefixed (or bare) 64-digit hex.
    pub fn from_hex(input: &str) -> Result<Self> {
        parse_hex32(input).map(Self)
    }
}

impl From<blake3::Hash> for Digest32 {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Display for Digest32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest32({})", self.to_hex())
    }
}

impl TryFrom<String> for Digest32 {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<Digest32> for String {
    fn from(value: Digest32) -> Self {
        value.to_hex()
    }
}

/// An already-authenticated caller.
///
/// Authentication happens outside the registry; this is the principal the
/// host vouches for (an account address, a hospital name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Create an identity; empty names are rejected.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::InvalidInput("identity is empty".to_string()));
        }
        Ok(Self(name))
    }

    /// The principal name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}

/// Life-cycle phase of an existing round at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundPhase {
    /// Before the deadline and not finalized
    AcceptingSubmissions,
    /// Deadline reached, waiting for the owner to finalize
    AwaitingFinalization,
    /// Terminal
    Finalized,
}

/// A training round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Caller-chosen unique id
    pub round_id: RoundId,
    /// Version every submission must match
    pub expected_model_version: ModelVersion,
    /// Unix seconds; submissions must arrive strictly before this
    pub submit_deadline: u64,
    /// Set exactly once by finalization
    pub finalized: bool,
    /// Aggregation result recorded at finalization
    pub aggregated_update_hash: Option<Digest32>,
    /// Model version produced by the round
    pub new_model_version: Option<ModelVersion>,
}

impl Round {
    /// A freshly created, open round.
    pub fn new(
        round_id: RoundId,
        expected_model_version: ModelVersion,
        submit_deadline: u64,
    ) -> Self {
        Self {
            round_id,
            expected_model_version,
            submit_deadline,
            finalized: false,
            aggregated_update_hash: None,
            new_model_version: None,
        }
    }

    /// Phase at time `now` (Unix seconds).
    pub fn phase(&self, now: u64) -> RoundPhase {
        if self.finalized {
            RoundPhase::Finalized
        } else if now < self.submit_deadline {
            RoundPhase::AcceptingSubmissions
        } else {
            RoundPhase::AwaitingFinalization
        }
    }
}

/// One participant's update for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Submitting participant
    pub participant: Identity,
    /// Round the update belongs to
    pub round_id: RoundId,
    /// Version the participant trained against
    pub model_version: ModelVersion,
    /// Commitment to the off-registry payload
    pub update_hash: UpdateHash,
    /// Clock reading when the submission was accepted
    pub submitted_at: u64,
}

/// Submissions of a single round keyed by participant.
pub type SubmissionMap = HashMap<Identity, Submission>;
