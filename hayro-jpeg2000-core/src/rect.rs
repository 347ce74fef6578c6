//! Axis-aligned rectangles on the reference grid and its derived grids.

/// A rectangle with inclusive `x0`/`y0` and exclusive `x1`/`y1` borders.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IntRect {
    /// The left border.
    pub x0: u32,
    /// The top border.
    pub y0: u32,
    /// The right border (exclusive).
    pub x1: u32,
    /// The bottom border (exclusive).
    pub y1: u32,
}

impl IntRect {
    /// Create a new rectangle from its borders.
    pub fn from_ltrb(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Create a new rectangle from its origin and size.
    pub fn from_xywh(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self {
            x0: x,
            y0: y,
            x1: x + w,
            y1: y + h,
        }
    }

    /// The width of the rectangle.
    pub fn width(&self) -> u32 {
        // See B-11.
        self.x1.saturating_sub(self.x0)
    }

    /// The height of the rectangle.
    pub fn height(&self) -> u32 {
        // See B-11.
        self.y1.saturating_sub(self.y0)
    }

    /// The number of samples covered by the rectangle.
    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    /// Whether the rectangle covers no samples.
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// The intersection of two rectangles.
    pub fn intersect(&self, other: Self) -> Self {
        if self.x1 < other.x0 || other.x1 < self.x0 || self.y1 < other.y0 || other.y1 < self.y0 {
            Self::from_xywh(0, 0, 0, 0)
        } else {
            Self::from_ltrb(
                u32::max(self.x0, other.x0),
                u32::max(self.y0, other.y0),
                u32::min(self.x1, other.x1),
                u32::min(self.y1, other.y1),
            )
        }
    }

    /// Divide all borders by the given factors, rounding up (B-12).
    pub(crate) fn ceil_div(&self, dx: u32, dy: u32) -> Self {
        Self::from_ltrb(
            self.x0.div_ceil(dx),
            self.y0.div_ceil(dy),
            self.x1.div_ceil(dx),
            self.y1.div_ceil(dy),
        )
    }

    /// Divide all borders by `2^shift`, rounding up (B-14).
    pub(crate) fn ceil_div_pow2(&self, shift: u8) -> Self {
        Self::from_ltrb(
            ceil_div_pow2(self.x0 as i64, shift),
            ceil_div_pow2(self.y0 as i64, shift),
            ceil_div_pow2(self.x1 as i64, shift),
            ceil_div_pow2(self.y1 as i64, shift),
        )
    }
}

/// Compute `ceil(value / 2^shift)`, clamping negative results to zero.
#[inline]
pub(crate) fn ceil_div_pow2(value: i64, shift: u8) -> u32 {
    let divided = (value + (1_i64 << shift) - 1) >> shift;
    divided.clamp(0, u32::MAX as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection() {
        let a = IntRect::from_ltrb(0, 0, 10, 10);
        let b = IntRect::from_ltrb(5, 3, 20, 7);
        assert_eq!(a.intersect(b), IntRect::from_ltrb(5, 3, 10, 7));

        let c = IntRect::from_ltrb(30, 30, 40, 40);
        assert!(a.intersect(c).is_empty());
    }

    #[test]
    fn ceil_division() {
        let rect = IntRect::from_ltrb(3, 5, 17, 9);
        assert_eq!(rect.ceil_div_pow2(1), IntRect::from_ltrb(2, 3, 9, 5));
        assert_eq!(rect.ceil_div(2, 3), IntRect::from_ltrb(2, 2, 9, 3));
        assert_eq!(ceil_div_pow2(-4, 3), 0);
    }
}
