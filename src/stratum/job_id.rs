use super::*;

/// A work-template identifier: the hash of the assembled candidate block,
/// carried on the wire as 64 hex digits in natural (in-memory) byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, DeserializeFromStr, SerializeDisplay)]
pub struct JobId([u8; 32]);

impl JobId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_block_hash(self) -> BlockHash {
        BlockHash::from_byte_array(self.0)
    }
}

impl FromStr for JobId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ensure!(s.len() == 64, "job_id must be exactly 32 bytes / 64 hex");
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(JobId(bytes))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<BlockHash> for JobId {
    fn from(hash: BlockHash) -> Self {
        JobId(hash.to_byte_array())
    }
}
