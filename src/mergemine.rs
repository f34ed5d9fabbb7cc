use super::*;

/// Identifier of an auxiliary (merge-mined) chain: its aux-pow path, carried
/// as 64 hex digits in natural byte order wherever it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay)]
pub struct ChainId([u8; 32]);

impl ChainId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// A real aux-pow path is a hash; a value whose trailing 24 bytes are
    /// all zero is almost certainly a miscoded option instead.
    pub fn is_plausible(&self) -> bool {
        self.0[8..].iter().any(|byte| *byte != 0)
    }
}

impl FromStr for ChainId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ensure!(s.len() == 64, "chain id must be exactly 32 bytes / 64 hex");
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(ChainId(bytes))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A work unit for one auxiliary chain: commit to `commit` in the block-final
/// transaction and meet `bits` (widened by `bias`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxWork {
    pub job_id: String,
    pub commit: sha256d::Hash,
    pub bits: CompactTarget,
    pub bias: u8,
}

/// Proof material handed to an auxiliary chain alongside an accepted share:
/// enough to reconstruct the block-final transaction's hash and its place in
/// the block, plus the header fields that were actually mined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxProof {
    pub midstate_hash: [u8; 32],
    pub midstate_buffer: Vec<u8>,
    pub midstate_length: u32,
    pub lock_time: u32,
    pub aux_branch: Vec<sha256d::Hash>,
    pub num_txns: u32,
    pub version: block::Version,
    pub prev_block: BlockHash,
    pub time: u32,
    pub bits: CompactTarget,
    pub nonce: u32,
}

/// An externally assembled work unit delivered through the two-phase
/// submission path. The server only splices the extranonce and verifies.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondStageWork {
    pub job_id: String,
    pub prev_block: BlockHash,
    pub cb1: Vec<u8>,
    pub cb2: Vec<u8>,
    pub cb_branch: Vec<sha256d::Hash>,
    pub version: block::Version,
    pub bits: CompactTarget,
    pub time: u32,
    pub difficulty: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondStageProof {
    pub extranonce1: Vec<u8>,
    pub extranonce2: Vec<u8>,
    pub version: block::Version,
    pub time: u32,
    pub nonce: u32,
}

/// The merge-mining subsystem: upstream connections to auxiliary chain
/// servers. The stratum server only consumes work and routes shares.
pub trait MergeMine: Send + Sync {
    /// Symbolic names accepted in authorize passwords.
    fn chain_names(&self) -> BTreeMap<String, ChainId> {
        BTreeMap::new()
    }

    /// The chain a bare aux address in an authorize password maps onto.
    fn default_aux_pow_path(&self) -> Option<ChainId> {
        None
    }

    /// Announce a miner's credentials so aux notifications flow for them.
    fn register_client(&self, _chain: ChainId, _username: &str, _password: &str) {}

    /// Current aux work for each authorized chain.
    fn get_merge_mine_work(
        &self,
        _auth: &BTreeMap<ChainId, (String, String)>,
    ) -> BTreeMap<ChainId, AuxWork> {
        BTreeMap::new()
    }

    /// A pending second-stage unit, if any. `hint` is the chain the client
    /// is already working on; the same unit is returned while still valid.
    fn get_second_stage_work(&self, _hint: Option<ChainId>) -> Option<(ChainId, SecondStageWork)> {
        None
    }

    fn submit_aux_chain_share(
        &self,
        chain: ChainId,
        username: &str,
        work: &AuxWork,
        proof: &AuxProof,
    );

    fn submit_second_stage_share(
        &self,
        chain: ChainId,
        username: &str,
        work: &SecondStageWork,
        proof: &SecondStageProof,
    );

    /// Re-establish any dropped upstream connections.
    fn reconnect(&self) {}
}

/// Merge mining switched off: no chains, no work, shares dropped with a log.
pub struct Disabled;

impl MergeMine for Disabled {
    fn submit_aux_chain_share(
        &self,
        chain: ChainId,
        username: &str,
        _work: &AuxWork,
        _proof: &AuxProof,
    ) {
        debug!("Dropping aux share for chain 0x{chain} by {username}: merge mining is disabled");
    }

    fn submit_second_stage_share(
        &self,
        chain: ChainId,
        username: &str,
        _work: &SecondStageWork,
        _proof: &SecondStageProof,
    ) {
        debug!(
            "Dropping second stage share for chain 0x{chain} by {username}: merge mining is disabled"
        );
    }
}
