use super::*;

/// Check a header hash against a compact target. `bias` widens the target
/// by that many bits, which is how auxiliary chains express targets easier
/// than the compact encoding can represent.
pub fn check_proof_of_work(hash: BlockHash, bits: CompactTarget, bias: u8) -> bool {
    let target = U256::from_big_endian(&Target::from_compact(bits).to_be_bytes());

    if target.is_zero() {
        return false;
    }

    let target = if bias == 0 {
        target
    } else if target.leading_zeros() < u32::from(bias) {
        U256::MAX
    } else {
        target << bias
    };

    U256::from_little_endian(&hash.to_byte_array()) <= target
}

/// The network difficulty implied by a compact target.
pub fn difficulty(bits: CompactTarget) -> f64 {
    Target::from_compact(bits).difficulty_float()
}
