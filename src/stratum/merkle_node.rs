use super::*;

/// A branch hash in `mining.notify`, encoded as hex of the natural
/// (in-memory) byte order rather than the reversed display order used for
/// txids elsewhere.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct MerkleNode(sha256d::Hash);

impl MerkleNode {
    pub fn as_byte_array(&self) -> &[u8; 32] {
        self.0.as_byte_array()
    }

    pub fn from_byte_array(b: [u8; 32]) -> Self {
        Self(sha256d::Hash::from_byte_array(b))
    }

    pub fn to_raw_hash(self) -> sha256d::Hash {
        self.0
    }

    pub fn all_zeros() -> Self {
        Self(sha256d::Hash::all_zeros())
    }
}

impl FromStr for MerkleNode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ensure!(s.len() == 64, "merkle node hex must be 64 chars");
        let mut b = [0u8; 32];
        hex::decode_to_slice(s, &mut b)?;
        Ok(MerkleNode(sha256d::Hash::from_byte_array(b)))
    }
}

impl fmt::Display for MerkleNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.to_byte_array()))
    }
}

impl From<sha256d::Hash> for MerkleNode {
    fn from(h: sha256d::Hash) -> Self {
        Self(h)
    }
}

impl From<MerkleNode> for sha256d::Hash {
    fn from(n: MerkleNode) -> Self {
        n.0
    }
}
