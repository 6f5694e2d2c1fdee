//! Directional point-to-point link between two ports.
//!
//! A connection is a relation, not an owner: it stores the two endpoint
//! names and the component that owns both ports resolves them on its drain
//! tick. Draining moves at most one message per connection per tick, which
//! realizes the per-hop latency of one tick the timing model assumes.

/// A directional link from one port to another, by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    src: String,
    dst: String,
}

impl Connection {
    #[must_use]
    pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
        let src = src.into();
        let dst = dst.into();
        assert_ne!(src, dst, "connection from `{src}` to itself");
        Self { src, dst }
    }

    /// Name of the port messages are drained from.
    #[must_use]
    pub fn src(&self) -> &str {
        &self.src
    }

    /// Name of the port messages are delivered to.
    #[must_use]
    pub fn dst(&self) -> &str {
        &self.dst
    }
}
