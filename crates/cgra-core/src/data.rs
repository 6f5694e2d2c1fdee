//! The data token.
//!
//! One token is what flows over one `(direction, color)` channel per tick:
//! a short vector of 32-bit words (length 1 for scalar kernels), a validity
//! predicate, a provenance id, and an end-of-stream marker. Tokens with
//! `pred = false` are masked: they occupy a channel slot but carry no live
//! result.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide token id counter.
static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

fn fresh_token_id() -> u64 {
    NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed)
}

/// One data token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    /// Payload words. Length 1 for scalar operations; longer vectors are
    /// reserved for SIMD lanes.
    pub values: Vec<u32>,
    /// Validity predicate. `false` marks the token as invalid/consumed.
    pub pred: bool,
    /// Globally unique id for provenance tracking.
    pub token_id: u64,
    /// End-of-stream marker.
    pub eos: bool,
}

impl Data {
    /// A live scalar token.
    #[must_use]
    pub fn scalar(value: u32) -> Self {
        Self {
            values: vec![value],
            pred: true,
            token_id: fresh_token_id(),
            eos: false,
        }
    }

    /// A scalar token with an explicit predicate.
    #[must_use]
    pub fn scalar_with_pred(value: u32, pred: bool) -> Self {
        Self {
            values: vec![value],
            pred,
            token_id: fresh_token_id(),
            eos: false,
        }
    }

    /// First payload lane, or 0 for an empty vector.
    #[must_use]
    pub fn first(&self) -> u32 {
        self.values.first().copied().unwrap_or(0)
    }

    /// Copy with the predicate replaced.
    #[must_use]
    pub fn with_pred(&self, pred: bool) -> Self {
        Self {
            pred,
            ..self.clone()
        }
    }

    /// Copy with the end-of-stream marker replaced.
    #[must_use]
    pub fn with_eos(&self, eos: bool) -> Self {
        Self {
            eos,
            ..self.clone()
        }
    }
}

impl Default for Data {
    /// The never-written value: `pred = false`, one zero lane.
    fn default() -> Self {
        Self {
            values: vec![0],
            pred: false,
            token_id: 0,
            eos: false,
        }
    }
}
