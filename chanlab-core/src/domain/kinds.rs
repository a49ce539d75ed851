//! Direction and fractal vocabulary shared by every stage.

use serde::{Deserialize, Serialize};

/// Direction of a stroke, segment or feature sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    pub fn is_up(self) -> bool {
        self == Direction::Up
    }

    pub fn is_down(self) -> bool {
        self == Direction::Down
    }
}

/// Outcome of comparing a candidate item against an open merged element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeDir {
    Up,
    Down,
    /// The candidate is merged into the open element.
    Combine,
    /// The candidate strictly contains the open element and containment is excluded.
    Included,
}

impl From<Direction> for MergeDir {
    fn from(dir: Direction) -> Self {
        match dir {
            Direction::Up => MergeDir::Up,
            Direction::Down => MergeDir::Down,
        }
    }
}

/// Fractal classification of a merged element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FxType {
    #[default]
    Unknown,
    Top,
    Bottom,
}

/// Closed-interval overlap test. With `equal`, touching ranges overlap.
pub fn has_overlap(l1: f64, h1: f64, l2: f64, h2: f64, equal: bool) -> bool {
    if equal {
        h2 >= l1 && h1 >= l2
    } else {
        h2 > l1 && h1 > l2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_flips_direction() {
        assert_eq!(Direction::Up.reverse(), Direction::Down);
        assert_eq!(Direction::Down.reverse(), Direction::Up);
    }

    #[test]
    fn touching_ranges_overlap_only_when_equal_allowed() {
        assert!(has_overlap(1.0, 2.0, 2.0, 3.0, true));
        assert!(!has_overlap(1.0, 2.0, 2.0, 3.0, false));
        assert!(has_overlap(1.0, 2.5, 2.0, 3.0, false));
        assert!(!has_overlap(1.0, 2.0, 2.5, 3.0, true));
    }
}
