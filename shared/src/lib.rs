//! Types shared between the tracking server and its clients
//!
//! This crate defines the grid coordinate model and the wire protocol that
//! every connection speaks. Both ends link against the same codec so they
//! can never disagree about message framing.

pub mod wire;

pub use wire::Request;

use std::fmt;
use std::time::Duration;

/// Side length of the default deployment grid (cells are `[0, N)` squared).
pub const DEFAULT_GRID_SIZE: u32 = 5;

/// Default TCP port the tracking server listens on.
pub const DEFAULT_PORT: u16 = 12345;

/// Cadence of the client-side notification poller and safe-to-move wait.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// A cell on the tracking grid.
///
/// Plain value type: copied on assignment, compared structurally, ordered
/// row-major (x first, then y) so snapshot iteration is deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub x: u32,
    pub y: u32,
}

impl Location {
    /// Sentinel for "not on the grid": the default for users who have never
    /// reported a position, and where infected users are moved when they
    /// vacate the grid. Compares unequal to every valid cell.
    pub const NOWHERE: Location = Location {
        x: u32::MAX,
        y: u32::MAX,
    };

    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// True iff both coordinates fall inside an `n` by `n` grid.
    ///
    /// Coordinates are unsigned, so the lower bound holds by construction;
    /// callers must reject non-numeric or negative text before a location
    /// is ever built.
    pub fn is_within(&self, n: u32) -> bool {
        self.x < n && self.y < n
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}
