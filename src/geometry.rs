use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Integer grid cell on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct GridPosition {
    pub x: i32,
    pub y: i32,
}

impl GridPosition {
    pub const fn new(x: i32, y: i32) -> Self {
        GridPosition { x, y }
    }

    /// True when both positions share a row or a column
    pub fn is_axis_aligned_with(&self, other: &GridPosition) -> bool {
        self.x == other.x || self.y == other.y
    }

    pub fn manhattan_distance(&self, other: &GridPosition) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

impl Add for GridPosition {
    type Output = GridPosition;

    fn add(self, rhs: GridPosition) -> GridPosition {
        GridPosition::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl fmt::Display for GridPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Advisory rectangle used as a UI hint; the board itself is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardBounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Default for BoardBounds {
    fn default() -> Self {
        BoardBounds {
            min_x: -50,
            min_y: -50,
            max_x: 50,
            max_y: 50,
        }
    }
}

impl BoardBounds {
    pub fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        BoardBounds {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }

    /// Degenerate bounds covering a single cell
    pub fn around(position: GridPosition) -> Self {
        BoardBounds::new(position.x, position.y, position.x, position.y)
    }

    pub fn contains(&self, position: GridPosition) -> bool {
        position.x >= self.min_x
            && position.x <= self.max_x
            && position.y >= self.min_y
            && position.y <= self.max_y
    }

    /// Grow the rectangle so that it covers `position`
    pub fn include(&mut self, position: GridPosition) {
        self.min_x = self.min_x.min(position.x);
        self.min_y = self.min_y.min(position.y);
        self.max_x = self.max_x.max(position.x);
        self.max_y = self.max_y.max(position.y);
    }

    pub fn width(&self) -> u32 {
        self.min_x.abs_diff(self.max_x) + 1
    }

    pub fn height(&self) -> u32 {
        self.min_y.abs_diff(self.max_y) + 1
    }
}

/// Component rotation in quarter turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Build a rotation from degrees; only multiples of 90 are accepted
    pub fn from_degrees(degrees: i32) -> Option<Rotation> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Rotate a local offset counter-clockwise about the component origin
    pub fn apply(&self, offset: GridPosition) -> GridPosition {
        match self {
            Rotation::Deg0 => offset,
            Rotation::Deg90 => GridPosition::new(-offset.y, offset.x),
            Rotation::Deg180 => GridPosition::new(-offset.x, -offset.y),
            Rotation::Deg270 => GridPosition::new(offset.y, -offset.x),
        }
    }
}

/// Expand a polyline into axis-aligned segments.
///
/// Consecutive points that do not share a row or column get an elbow:
/// horizontal first, then vertical. Repeated points are skipped.
pub fn manhattan_segments(points: &[GridPosition]) -> Vec<(GridPosition, GridPosition)> {
    let mut segments = Vec::new();

    for pair in points.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        if from == to {
            continue;
        }

        if from.is_axis_aligned_with(&to) {
            segments.push((from, to));
        } else {
            let elbow = GridPosition::new(to.x, from.y);
            segments.push((from, elbow));
            segments.push((elbow, to));
        }
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_apply() {
        let offset = GridPosition::new(1, 0);
        assert_eq!(Rotation::Deg0.apply(offset), GridPosition::new(1, 0));
        assert_eq!(Rotation::Deg90.apply(offset), GridPosition::new(0, 1));
        assert_eq!(Rotation::Deg180.apply(offset), GridPosition::new(-1, 0));
        assert_eq!(Rotation::Deg270.apply(offset), GridPosition::new(0, -1));
    }

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(90), Some(Rotation::Deg90));
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::Deg270));
        assert_eq!(Rotation::from_degrees(45), None);
    }

    #[test]
    fn test_bounds_are_advisory() {
        let mut bounds = BoardBounds::new(0, 0, 10, 10);
        let far = GridPosition::new(40, -3);
        assert!(!bounds.contains(far));

        bounds.include(far);
        assert!(bounds.contains(far));
        assert_eq!(bounds.min_y, -3);
        assert_eq!(bounds.width(), 41);
    }

    #[test]
    fn test_manhattan_segments_insert_elbow() {
        let points = [
            GridPosition::new(0, 0),
            GridPosition::new(3, 2),
            GridPosition::new(3, 2),
            GridPosition::new(3, 5),
        ];
        let segments = manhattan_segments(&points);

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], (GridPosition::new(0, 0), GridPosition::new(3, 0)));
        assert_eq!(segments[1], (GridPosition::new(3, 0), GridPosition::new(3, 2)));
        assert_eq!(segments[2], (GridPosition::new(3, 2), GridPosition::new(3, 5)));
    }
}
