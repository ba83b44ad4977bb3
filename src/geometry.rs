use std::ops::Sub;

use crate::models::{Dimension, Position};

impl Position {
  pub const fn new(x: Dimension, y: Dimension) -> Self {
    Position { x, y }
  }

  /// Squared length, the attenuation denominator of the scoring rule.
  pub fn norm2(self) -> Dimension {
    self.x * self.x + self.y * self.y
  }

  pub fn norm(self) -> Dimension {
    self.x.hypot(self.y)
  }

  /// z component of the 2D cross product `self × other`.
  pub fn cross(self, other: Position) -> Dimension {
    self.x * other.y - other.x * self.y
  }
}

impl Sub for Position {
  type Output = Position;

  fn sub(self, rhs: Position) -> Position {
    Position { x: self.x - rhs.x, y: self.y - rhs.y }
  }
}

impl From<[Dimension; 2]> for Position {
  fn from([x, y]: [Dimension; 2]) -> Self {
    Position { x, y }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cross_sign_follows_orientation() {
    let a = Position::new(1.0, 0.0);
    let b = Position::new(0.0, 1.0);

    assert_eq!(a.cross(b), 1.0);
    assert_eq!(b.cross(a), -1.0);
    assert_eq!(a.cross(a), 0.0);
  }

  #[test]
  fn distances() {
    let p = Position::new(3.0, 4.0);
    assert_eq!(p.norm2(), 25.0);
    assert_eq!(p.norm(), 5.0);
    assert_eq!(p - Position::new(1.0, 1.0), Position::new(2.0, 3.0));
    assert_eq!(Position::from([3.0, 4.0]), p);
  }
}
