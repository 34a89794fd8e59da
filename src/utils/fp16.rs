//! Half-float packing used by RGBA16F images and weight textures.
//!
//! Both directions use the magic-number rescaling trick from
//! <https://gist.github.com/rygorous/2156668>, which avoids per-exponent branching.
//! Narrowing rounds to nearest, ties to even.

const F32_INFTY: u32 = 255 << 23;
const F16_MAX: u32 = (127 + 16) << 23;
const F16_MIN_NORMAL: u32 = 113 << 23;
const DENORM_MAGIC: u32 = ((127 - 15) + (23 - 10) + 1) << 23;
const EXPONENT_REBIAS: u32 = (127 - 15) << 23;
const TO_FLOAT_MAGIC: u32 = 126 << 23;
const SIGN_MASK: u32 = 0x8000_0000;

/// Convert an f32 into IEEE 754 binary16 bits.
///
/// NaN becomes a quiet NaN, infinities stay infinite and values past the half range
/// saturate to infinity.
pub fn f32_to_f16(value: f32) -> u16 {
    let mut bits = value.to_bits();
    let sign = bits & SIGN_MASK;
    bits ^= sign;

    let half = if bits >= F16_MAX {
        if bits > F32_INFTY { 0x7e00 } else { 0x7c00 }
    } else if bits < F16_MIN_NORMAL {
        // the float add lines the mantissa up at the bottom and rounds it
        let aligned = f32::from_bits(bits) + f32::from_bits(DENORM_MAGIC);
        aligned.to_bits() - DENORM_MAGIC
    } else {
        let mant_odd = (bits >> 13) & 1;
        // a carry out of the mantissa bumps the exponent, up to infinity
        (bits - EXPONENT_REBIAS + 0xfff + mant_odd) >> 13
    };

    (half | (sign >> 16)) as u16
}

/// Convert IEEE 754 binary16 bits into an f32.
pub fn f16_to_f32(half: u16) -> f32 {
    let half = half as u32;
    let sign = (half & 0x8000) << 16;
    let exponent = (half >> 10) & 0x1f;
    let mantissa = half & 0x3ff;

    let bits = if exponent == 0 {
        // zero and denormals go through the magic rescale
        let value = f32::from_bits(TO_FLOAT_MAGIC + mantissa) - f32::from_bits(TO_FLOAT_MAGIC);
        value.to_bits()
    } else if exponent == 0x1f {
        (255 << 23) | (mantissa << 13)
    } else {
        ((127 - 15 + exponent) << 23) | (mantissa << 13)
    };

    f32::from_bits(bits | sign)
}

/// Pack a float slice into little-endian half bytes.
pub fn pack_f16(values: &[f32]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|&v| f32_to_f16(v).to_le_bytes())
        .collect()
}

/// Unpack little-endian half bytes into floats.
pub fn unpack_f16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| f16_to_f32(u16::from_le_bytes([c[0], c[1]])))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_values_survive() {
        for v in [0.0f32, 1.0, -1.0, 0.5, 2.0, 1024.0, -0.25, 65504.0] {
            assert_eq!(f16_to_f32(f32_to_f16(v)), v, "value {}", v);
        }
    }

    #[test]
    fn known_bit_patterns() {
        assert_eq!(f32_to_f16(1.0), 0x3c00);
        assert_eq!(f32_to_f16(-2.0), 0xc000);
        assert_eq!(f32_to_f16(f32::INFINITY), 0x7c00);
        assert_eq!(f32_to_f16(f32::NEG_INFINITY), 0xfc00);
        assert_eq!(f16_to_f32(0x3555), 0.333_251_95);
    }

    #[test]
    fn overflow_saturates_to_infinity() {
        assert_eq!(f32_to_f16(1.0e6), 0x7c00);
        assert!(f16_to_f32(f32_to_f16(1.0e6)).is_infinite());
    }

    #[test]
    fn ties_round_to_even() {
        let ulp = 2f32.powi(-10);
        // halfway between 0x3c00 and 0x3c01, the even side wins
        assert_eq!(f32_to_f16(1.0 + ulp / 2.0), 0x3c00);
        // halfway between 0x3c01 and 0x3c02
        assert_eq!(f32_to_f16(1.0 + 3.0 * ulp / 2.0), 0x3c02);
        assert_eq!(f32_to_f16(-(1.0 + ulp / 2.0)), 0xbc00);
        // just past the halfway point rounds up
        assert_eq!(f32_to_f16(f32::from_bits((1.0f32 + ulp / 2.0).to_bits() + 1)), 0x3c01);
    }

    #[test]
    fn largest_half_rounds_by_the_same_rule() {
        assert_eq!(f32_to_f16(65519.0), 0x7bff);
        // 65504 has an odd mantissa, so the tie above it goes to infinity
        assert_eq!(f32_to_f16(65520.0), 0x7c00);
    }

    #[test]
    fn denormal_ties_round_to_even() {
        let tiny = f16_to_f32(0x0001);
        assert_eq!(f32_to_f16(tiny / 2.0), 0x0000);
        assert_eq!(f32_to_f16(tiny * 1.5), 0x0002);
        assert_eq!(f32_to_f16(tiny * 2.5), 0x0002);
    }

    #[test]
    fn nan_stays_nan() {
        assert!(f16_to_f32(f32_to_f16(f32::NAN)).is_nan());
    }

    #[test]
    fn denormals_round_trip() {
        // smallest positive half denormal
        let tiny = f16_to_f32(0x0001);
        assert!(tiny > 0.0 && tiny < 1.0e-7);
        assert_eq!(f32_to_f16(tiny), 0x0001);
    }

    #[test]
    fn relative_error_is_small() {
        for i in 1..1000 {
            let v = i as f32 * 0.0137;
            let back = f16_to_f32(f32_to_f16(v));
            assert!((back - v).abs() / v < 1.0e-3, "{} -> {}", v, back);
        }
    }

    #[test]
    fn packing_is_little_endian() {
        let bytes = pack_f16(&[1.0, -2.0]);
        assert_eq!(bytes, vec![0x00, 0x3c, 0x00, 0xc0]);
        assert_eq!(unpack_f16(&bytes), vec![1.0, -2.0]);
    }
}
