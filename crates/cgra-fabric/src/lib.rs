//! Ports, buffers, and connections of the CGRA dataflow fabric.
//!
//! A port owns a bounded incoming and a bounded outgoing queue. Connections
//! are pure relations between two port names; the component that owns both
//! endpoints (device for tile-tile links, driver for boundary links) resolves
//! the names and drains one message per connection per tick, which is what
//! gives the fabric its one-tick-per-hop latency.

mod connection;
mod multiport;
mod port;

pub use connection::Connection;
pub use multiport::MultiPort;
pub use port::{Port, SendError};
