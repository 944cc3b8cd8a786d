//! IEEE-754 binary16 conversion.

/// Round `value` to the nearest binary16 (ties to even).
///
/// Overflow saturates to infinity; NaN stays NaN.
pub fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xFF) as i32;
    let mantissa = bits & 0x007F_FFFF;

    if exponent == 0xFF {
        let nan = if mantissa != 0 { 0x0200 } else { 0 };
        return sign | 0x7C00 | nan;
    }

    let unbiased = exponent - 127;
    if unbiased > 15 {
        return sign | 0x7C00;
    }

    if unbiased >= -14 {
        // Normal range: keep 10 mantissa bits and round on the remaining 13.
        let half_exponent = ((unbiased + 15) as u32) << 10;
        let half_mantissa = mantissa >> 13;
        let rest = mantissa & 0x1FFF;
        let mut half = half_exponent | half_mantissa;
        if rest > 0x1000 || (rest == 0x1000 && half & 1 == 1) {
            // Carry may roll into the exponent, up to infinity.
            half += 1;
        }
        return sign | half as u16;
    }

    if unbiased < -25 {
        return sign;
    }

    // Subnormal: shift the implicit bit in and round.
    let full = mantissa | 0x0080_0000;
    let shift = (-unbiased - 1) as u32;
    let half = full >> shift;
    let rest = full & ((1 << shift) - 1);
    let halfway = 1 << (shift - 1);
    let mut half = half;
    if rest > halfway || (rest == halfway && half & 1 == 1) {
        half += 1;
    }
    sign | half as u16
}

pub fn f16_bits_to_f32(half: u16) -> f32 {
    let sign = u32::from(half & 0x8000) << 16;
    let exponent = u32::from((half >> 10) & 0x1F);
    let mantissa = u32::from(half & 0x03FF);

    let bits = match (exponent, mantissa) {
        (0, 0) => sign,
        (0, m) => {
            // Subnormal: normalize.
            let shift = m.leading_zeros() - 21;
            let m = (m << shift) & 0x03FF;
            let e = 127 - 15 + 1 - shift;
            sign | (e << 23) | (m << 13)
        }
        (0x1F, 0) => sign | 0x7F80_0000,
        (0x1F, m) => sign | 0x7F80_0000 | (m << 13),
        (e, m) => sign | ((e + 127 - 15) << 23) | (m << 13),
    };
    f32::from_bits(bits)
}
