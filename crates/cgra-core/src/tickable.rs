//! Trait for components advanced by simulator ticks.

use crate::SimError;

/// A component that can be advanced by one simulator tick.
///
/// This is the core abstraction of the simulator: tiles, devices, and the
/// driver all tick. A tick runs to completion without yielding — there are
/// no suspension points inside it.
pub trait Tickable {
    /// Advance the component by one tick.
    ///
    /// Returns whether the component made observable progress this tick
    /// (moved a token, executed an operation, advanced its program counter).
    /// A blocked component returns `Ok(false)` and is simply ticked again;
    /// a fatal program error aborts the run.
    fn tick(&mut self) -> Result<bool, SimError>;
}
