#[derive(Clone, Copy, Debug)]
pub(crate) struct Fnv1a64(u64);

impl Fnv1a64 {
    pub(crate) const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;

    pub(crate) fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub(crate) fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        let mut h = self.0;
        for &b in bytes {
            h ^= u64::from(b);
            h = h.wrapping_mul(Self::PRIME);
        }
        self.0 = h;
    }

    pub(crate) fn finish(self) -> u64 {
        // FNV alone has weak low bits for short inputs; fold through a murmur-style finalizer.
        let mut z = self.0;
        z = (z ^ (z >> 33)).wrapping_mul(0xff51_afd7_ed55_8ccd);
        z = (z ^ (z >> 33)).wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        z ^ (z >> 33)
    }
}

/// Deterministic uniform sample in `[0, 1)` for `(seed, x, y, lane)`.
pub(crate) fn hash_unit_f32(seed: u64, x: u32, y: u32, lane: u32) -> f32 {
    let mut h = Fnv1a64::new(seed ^ Fnv1a64::OFFSET_BASIS);
    h.write_u64(u64::from(x));
    h.write_u64(u64::from(y));
    h.write_u64(u64::from(lane));
    // 24 mantissa bits keep the result strictly below 1.0.
    ((h.finish() >> 40) as f32) / ((1u32 << 24) as f32)
}

pub(crate) fn mul_div255_u16(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

pub(crate) fn mul_div255_u8(x: u16, y: u16) -> u8 {
    mul_div255_u16(x, y) as u8
}

/// Largest power of two `<= v`, with a floor of 1.
pub(crate) fn prev_power_of_two(v: u32) -> u32 {
    if v <= 1 {
        return 1;
    }
    1u32 << (31 - v.leading_zeros())
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/math.rs"]
mod tests;
