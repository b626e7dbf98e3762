//! Math utilites.

use num_traits::PrimInt;

/// Rounds up `src` to the power of two `factor`.
pub fn round_up_pot<T: PrimInt>(src: T, factor: T) -> T {
    debug_assert_eq!(factor.count_ones(), 1); // .is_power_of_two()
    let minus1 = factor - T::one();
    (src + minus1) & !minus1
}

/// Performs integer division between a and b rounding up, instead of down
pub fn round_up_div<T: PrimInt>(a: T, b: T) -> T {
    (a + (b - T::one())) / b
}

/// Number of mip levels needed to take the larger of `width` and `height` down to one texel.
pub fn num_mip_levels(width: u32, height: u32) -> u32 {
    let mut levels = 1;
    while (width | height) >> levels != 0 {
        levels += 1;
    }
    levels
}

/// Workgroup count covering `extent` invocations with groups of `group_size`, never zero.
///
/// Intentionally truncates: every extent dispatched this way is a power of two.
pub fn dispatch_count(extent: u32, group_size: u32) -> u32 {
    (extent / group_size).max(1)
}

/// Radical inverse of `index` in `base`, the building block of the Halton sequence.
pub fn halton(mut index: u32, base: u32) -> f32 {
    let mut f = 1.0;
    let mut r = 0.0;
    let inv_base = 1.0 / base as f32;
    while index > 0 {
        f *= inv_base;
        r += f * (index % base) as f32;
        index /= base;
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(round_up_pot(13u32, 8), 16);
        assert_eq!(round_up_pot(16u32, 8), 16);
        assert_eq!(round_up_div(13u32, 8), 2);
        assert_eq!(round_up_div(16u32, 8), 2);
    }

    #[test]
    fn mip_levels_of_powers_of_two() {
        for shift in 0..13 {
            let size = 1u32 << shift;
            let expected = (size as f32).log2().ceil() as u32 + 1;
            assert_eq!(num_mip_levels(size, size), expected, "size {size}");
        }
    }

    #[test]
    fn mip_levels_follow_larger_side() {
        assert_eq!(num_mip_levels(1920, 1080), 11);
        assert_eq!(num_mip_levels(100, 1), 7);
        assert_eq!(num_mip_levels(1, 1), 1);
    }

    #[test]
    fn dispatch_never_zero() {
        assert_eq!(dispatch_count(128, 8), 16);
        assert_eq!(dispatch_count(8, 8), 1);
        assert_eq!(dispatch_count(4, 8), 1);
        assert_eq!(dispatch_count(1, 8), 1);
    }

    #[test]
    fn halton_sequence() {
        assert_eq!(halton(1, 2), 0.5);
        assert!((halton(1, 3) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(halton(2, 2), 0.25);
        assert_eq!(halton(3, 2), 0.75);
        assert!((halton(2, 3) - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(halton(0, 2), 0.0);
    }
}
