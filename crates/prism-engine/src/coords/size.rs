/// Frame size in pixels.
///
/// Sizes are carried as `f32` so aspect-preserving clamps and scale factors can be
/// expressed without intermediate casts; texture allocation floors them to whole pixels.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    /// Sentinel for "no size constraint" (0×0).
    pub const UNCONSTRAINED: Size = Size::new(0.0, 0.0);

    #[inline]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn from_pixels(width: u32, height: u32) -> Self {
        Self::new(width as f32, height as f32)
    }

    #[inline]
    pub fn is_unconstrained(self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.width.is_finite() && self.height.is_finite()
    }

    /// Returns the size with width and height exchanged.
    #[inline]
    pub const fn swapped(self) -> Self {
        Self::new(self.height, self.width)
    }

    /// Whole-pixel dimensions, flooring fractional sizes. Negative or NaN values map to 0.
    #[inline]
    pub fn to_pixels(self) -> (u32, u32) {
        (self.width.max(0.0).floor() as u32, self.height.max(0.0).floor() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconstrained_sentinel() {
        assert!(Size::UNCONSTRAINED.is_unconstrained());
        assert!(Size::new(0.0, 10.0).is_unconstrained());
        assert!(!Size::new(1.0, 1.0).is_unconstrained());
    }

    #[test]
    fn swapped_exchanges_axes() {
        assert_eq!(Size::new(64.0, 32.0).swapped(), Size::new(32.0, 64.0));
    }

    #[test]
    fn to_pixels_floors() {
        assert_eq!(Size::new(10.9, 3.2).to_pixels(), (10, 3));
        assert_eq!(Size::new(-4.0, f32::NAN).to_pixels(), (0, 0));
    }
}
