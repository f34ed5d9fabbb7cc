use super::*;

/// The previous-block hash field of `mining.notify`. The wire encoding swaps
/// the bytes of every 32-bit word of the hash, a convention inherited from
/// the earliest stratum servers.
#[derive(Debug, PartialEq, Eq, Clone, Copy, DeserializeFromStr, SerializeDisplay)]
pub struct PrevHash(pub BlockHash);

fn swap_words(bytes: &[u8; 32]) -> [u8; 32] {
    let mut swapped = [0u8; 32];
    for (src, dst) in bytes.chunks_exact(4).zip(swapped.chunks_mut(4)) {
        let word = BigEndian::read_u32(src);
        LittleEndian::write_u32(dst, word);
    }
    swapped
}

impl FromStr for PrevHash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ensure!(s.len() == 64, "prevhash must be exactly 32 bytes / 64 hex");
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(PrevHash(BlockHash::from_byte_array(swap_words(&bytes))))
    }
}

impl fmt::Display for PrevHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(swap_words(&self.0.to_byte_array())))
    }
}

impl From<BlockHash> for PrevHash {
    fn from(hash: BlockHash) -> Self {
        PrevHash(hash)
    }
}

impl From<PrevHash> for BlockHash {
    fn from(prev_hash: PrevHash) -> Self {
        prev_hash.0
    }
}
