use super::Size;

/// Geometric transform applied to a frame as it is sampled by a consumer.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum RotationMode {
    #[default]
    None,
    RotateLeft,
    RotateRight,
    FlipVertical,
    FlipHorizontal,
    RotateRightFlipVertical,
    RotateRightFlipHorizontal,
    Rotate180,
}

/// Quad positions in the order used by [`RotationMode::texture_coordinates`]
/// (triangle strip: bottom-left, bottom-right, top-left, top-right).
pub const QUAD_POSITIONS: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];

impl RotationMode {
    pub const ALL: [RotationMode; 8] = [
        RotationMode::None,
        RotationMode::RotateLeft,
        RotationMode::RotateRight,
        RotationMode::FlipVertical,
        RotationMode::FlipHorizontal,
        RotationMode::RotateRightFlipVertical,
        RotationMode::RotateRightFlipHorizontal,
        RotationMode::Rotate180,
    ];

    /// True for the quarter-turn variants, whose output has width and height exchanged.
    #[inline]
    pub const fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            RotationMode::RotateLeft
                | RotationMode::RotateRight
                | RotationMode::RotateRightFlipVertical
                | RotationMode::RotateRightFlipHorizontal
        )
    }

    /// Size of a frame of `size` after this transform.
    #[inline]
    pub fn apply(self, size: Size) -> Size {
        if self.swaps_dimensions() { size.swapped() } else { size }
    }

    /// Texture coordinates matching [`QUAD_POSITIONS`] that realize this transform.
    pub const fn texture_coordinates(self) -> [f32; 8] {
        match self {
            RotationMode::None => [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
            RotationMode::RotateLeft => [1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            RotationMode::RotateRight => [0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0],
            RotationMode::FlipVertical => [0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0],
            RotationMode::FlipHorizontal => [1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0],
            RotationMode::RotateRightFlipVertical => [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0],
            RotationMode::RotateRightFlipHorizontal => [1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            RotationMode::Rotate180 => [1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corners(coords: [f32; 8]) -> Vec<(u8, u8)> {
        let mut v: Vec<(u8, u8)> = coords
            .chunks_exact(2)
            .map(|c| (c[0] as u8, c[1] as u8))
            .collect();
        v.sort();
        v
    }

    #[test]
    fn only_quarter_turns_swap() {
        let swapping: Vec<_> = RotationMode::ALL
            .into_iter()
            .filter(|m| m.swaps_dimensions())
            .collect();
        assert_eq!(
            swapping,
            vec![
                RotationMode::RotateLeft,
                RotationMode::RotateRight,
                RotationMode::RotateRightFlipVertical,
                RotationMode::RotateRightFlipHorizontal,
            ]
        );
    }

    #[test]
    fn apply_swaps_for_right_rotation() {
        let s = Size::new(64.0, 32.0);
        assert_eq!(RotationMode::RotateRight.apply(s), Size::new(32.0, 64.0));
        assert_eq!(RotationMode::Rotate180.apply(s), s);
    }

    #[test]
    fn coordinates_cover_all_corners() {
        let expected = vec![(0, 0), (0, 1), (1, 0), (1, 1)];
        for mode in RotationMode::ALL {
            assert_eq!(corners(mode.texture_coordinates()), expected, "{mode:?}");
        }
    }

    #[test]
    fn rotate_180_is_both_flips() {
        // Flipping horizontally then vertically maps (u, v) to (1-u, 1-v).
        let none = RotationMode::None.texture_coordinates();
        let r180 = RotationMode::Rotate180.texture_coordinates();
        for (a, b) in none.iter().zip(r180.iter()) {
            assert_eq!(*b, 1.0 - *a);
        }
    }
}
