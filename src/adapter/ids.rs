//! Trace and span identifiers
//!
//! Identifiers are either parsed from propagated request headers or drawn
//! from a shared [`IdGenerator`]. The default generator is seeded once from
//! OS entropy and then serves ids from a fast, mutex-guarded
//! non-cryptographic stream, so every adapter can share one instance.

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

/// 128-bit trace identifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TraceId(pub [u8; 16]);

/// 64-bit span identifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SpanId(pub [u8; 8]);

impl TraceId {
    /// A trace id is valid when it is not all zeros
    pub fn is_valid(&self) -> bool {
        self.0.iter().any(|b| *b != 0)
    }

    /// Parse exactly 32 lowercase hex characters
    pub fn from_hex(h: &str) -> Result<Self, IdError> {
        let id = TraceId(decode_hex(h)?);
        if !id.is_valid() {
            return Err(IdError::AllZero);
        }
        Ok(id)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl SpanId {
    /// A span id is valid when it is not all zeros
    pub fn is_valid(&self) -> bool {
        self.0.iter().any(|b| *b != 0)
    }

    /// Parse exactly 16 lowercase hex characters
    pub fn from_hex(h: &str) -> Result<Self, IdError> {
        let id = SpanId(decode_hex(h)?);
        if !id.is_valid() {
            return Err(IdError::AllZero);
        }
        Ok(id)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Display for SpanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

fn decode_hex<const N: usize>(h: &str) -> Result<[u8; N], IdError> {
    if h.len() != N * 2 {
        return Err(IdError::InvalidLength {
            expected: N * 2,
            found: h.len(),
        });
    }
    if !h.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(IdError::InvalidHex);
    }

    let mut out = [0u8; N];
    hex::decode_to_slice(h, &mut out).map_err(|_| IdError::InvalidHex)?;
    Ok(out)
}

/// Identifier parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("hex encoded id must have length {expected}, got {found}")]
    InvalidLength { expected: usize, found: usize },

    #[error("ids can only contain [0-9a-f] characters, all lowercase")]
    InvalidHex,

    #[error("id can't be all zero")]
    AllZero,
}

/// Source of fresh trace and span ids
pub trait IdGenerator: Send + Sync {
    fn new_trace_id(&self) -> TraceId;
    fn new_span_id(&self) -> SpanId;
}

/// Random id generator shared by every adapter in the process
pub struct RandomIdGenerator {
    rng: Mutex<SmallRng>,
}

impl RandomIdGenerator {
    /// Seed from the operating system's entropy source
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(SmallRng::from_entropy()),
        }
    }

    /// Fixed seed, for reproducible id sequences
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    fn fill(&self, bytes: &mut [u8]) {
        let mut rng = self.rng.lock();
        // All-zero ids are invalid on the wire; draw again
        loop {
            rng.fill_bytes(bytes);
            if bytes.iter().any(|b| *b != 0) {
                return;
            }
        }
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        let mut id = TraceId::default();
        self.fill(&mut id.0);
        id
    }

    fn new_span_id(&self) -> SpanId {
        let mut id = SpanId::default();
        self.fill(&mut id.0);
        id
    }
}
