//! Mesh device and boundary driver.
//!
//! The device owns the 2-D grid of tiles and the inter-tile links; the
//! driver owns one port per boundary tile port, the feed-in/collect tasks,
//! and the run loop that plays the role of the host discrete-event engine.

mod device;
mod dram;
mod driver;
mod tasks;

pub use device::Device;
pub use dram::Dram;
pub use driver::Driver;
pub use tasks::{CollectTask, FeedTask};
