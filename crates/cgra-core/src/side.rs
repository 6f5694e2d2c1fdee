//! Tile connection faces.
//!
//! A tile talks to the world through its sides: the four cardinal neighbours,
//! four diagonals (reserved for richer topologies), a router face for the
//! memory bridge, and three dummy faces kept so per-direction state arrays
//! stay a fixed width. Indices are stable and used to address those arrays.

use std::fmt;

use crate::ParseError;

/// Number of sides per tile. Sized for the per-direction state arrays.
pub const NUM_SIDES: usize = 12;

/// The four mesh directions, in canonical order.
pub const CARDINAL_SIDES: [Side; 4] = [Side::North, Side::West, Side::South, Side::East];

/// One connection face of a tile.
///
/// The discriminant is the array index for per-direction state. The set is
/// fixed at compile time; programs name sides by their canonical Title-case
/// name, parsed case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum Side {
    North = 0,
    West = 1,
    South = 2,
    East = 3,
    NorthEast = 4,
    NorthWest = 5,
    SouthEast = 6,
    SouthWest = 7,
    Router = 8,
    Dummy1 = 9,
    Dummy2 = 10,
    Dummy3 = 11,
}

impl Side {
    /// Stable index into per-direction arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The side a message sent out of `self` arrives on at the neighbour.
    ///
    /// `Router` and the dummy sides are their own opposites.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Side::North => Side::South,
            Side::South => Side::North,
            Side::West => Side::East,
            Side::East => Side::West,
            Side::NorthEast => Side::SouthWest,
            Side::SouthWest => Side::NorthEast,
            Side::NorthWest => Side::SouthEast,
            Side::SouthEast => Side::NorthWest,
            other => other,
        }
    }

    /// Grid offset `(dx, dy)` of the neighbour this side faces.
    ///
    /// North faces decreasing `y` (row 0 is the north boundary).
    #[must_use]
    pub const fn delta(self) -> Option<(i64, i64)> {
        match self {
            Side::North => Some((0, -1)),
            Side::South => Some((0, 1)),
            Side::West => Some((-1, 0)),
            Side::East => Some((1, 0)),
            Side::NorthEast => Some((1, -1)),
            Side::NorthWest => Some((-1, -1)),
            Side::SouthEast => Some((1, 1)),
            Side::SouthWest => Some((-1, 1)),
            Side::Router | Side::Dummy1 | Side::Dummy2 | Side::Dummy3 => None,
        }
    }

    /// Canonical Title-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Side::North => "North",
            Side::West => "West",
            Side::South => "South",
            Side::East => "East",
            Side::NorthEast => "NorthEast",
            Side::NorthWest => "NorthWest",
            Side::SouthEast => "SouthEast",
            Side::SouthWest => "SouthWest",
            Side::Router => "Router",
            Side::Dummy1 => "Dummy1",
            Side::Dummy2 => "Dummy2",
            Side::Dummy3 => "Dummy3",
        }
    }

    /// Parse a side name, case-insensitively.
    pub fn from_name(name: &str) -> Result<Self, ParseError> {
        match name.to_ascii_lowercase().as_str() {
            "north" => Ok(Side::North),
            "west" => Ok(Side::West),
            "south" => Ok(Side::South),
            "east" => Ok(Side::East),
            "northeast" => Ok(Side::NorthEast),
            "northwest" => Ok(Side::NorthWest),
            "southeast" => Ok(Side::SouthEast),
            "southwest" => Ok(Side::SouthWest),
            "router" => Ok(Side::Router),
            "dummy1" => Ok(Side::Dummy1),
            "dummy2" => Ok(Side::Dummy2),
            "dummy3" => Ok(Side::Dummy3),
            _ => Err(ParseError::InvalidSide(name.to_string())),
        }
    }

    /// True when `name` parses as a side.
    #[must_use]
    pub fn is_side_name(name: &str) -> bool {
        Self::from_name(name).is_ok()
    }

    /// All sides, in index order.
    #[must_use]
    pub const fn all() -> [Side; NUM_SIDES] {
        [
            Side::North,
            Side::West,
            Side::South,
            Side::East,
            Side::NorthEast,
            Side::NorthWest,
            Side::SouthEast,
            Side::SouthWest,
            Side::Router,
            Side::Dummy1,
            Side::Dummy2,
            Side::Dummy3,
        ]
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_stable() {
        assert_eq!(Side::North.index(), 0);
        assert_eq!(Side::East.index(), 3);
        assert_eq!(Side::Router.index(), 8);
        assert_eq!(Side::Dummy3.index(), NUM_SIDES - 1);
    }

    #[test]
    fn cardinal_opposites() {
        assert_eq!(Side::North.opposite(), Side::South);
        assert_eq!(Side::East.opposite(), Side::West);
        assert_eq!(Side::Router.opposite(), Side::Router);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Side::from_name("north").ok(), Some(Side::North));
        assert_eq!(Side::from_name("EAST").ok(), Some(Side::East));
        assert_eq!(Side::from_name("NorthEast").ok(), Some(Side::NorthEast));
        assert!(Side::from_name("upwards").is_err());
    }

    #[test]
    fn delta_matches_boundary_convention() {
        // North boundary is row 0, so North faces decreasing y.
        assert_eq!(Side::North.delta(), Some((0, -1)));
        assert_eq!(Side::East.delta(), Some((1, 0)));
        assert_eq!(Side::Router.delta(), None);
    }
}
