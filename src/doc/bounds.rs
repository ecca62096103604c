use std::fmt;
use std::str::FromStr;

/// An axis-aligned rectangle in page image coordinates.
///
/// Rendered as `[left,top,right,bottom]` in the tabular sections. Bounds are
/// half-open: `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        BoundingBox {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// True if `other` lies fully inside these bounds.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.left <= other.left
            && self.top <= other.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }

    /// The smallest bounds covering both rectangles.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{},{},{}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Error parsing a `[left,top,right,bottom]` bounds literal.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid bounds literal: '{0}'")]
pub struct ParseBoundsError(pub String);

impl FromStr for BoundingBox {
    type Err = ParseBoundsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .strip_prefix('[')
            .and_then(|t| t.strip_suffix(']'))
            .ok_or_else(|| ParseBoundsError(s.to_string()))?;
        let mut parts = inner.split(',').map(|p| p.trim().parse::<i32>());
        let mut next = || {
            parts
                .next()
                .and_then(|r| r.ok())
                .ok_or_else(|| ParseBoundsError(s.to_string()))
        };
        let bounds = BoundingBox::new(next()?, next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(ParseBoundsError(s.to_string()));
        }
        Ok(bounds)
    }
}
