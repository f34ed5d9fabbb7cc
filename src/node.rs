use super::*;

/// Why a node cannot serve work right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    NotConnected,
    InitialBlockDownload,
}

/// A candidate block fresh from the assembler: payout still `OP_FALSE`,
/// merkle root not yet final.
#[derive(Debug, Clone)]
pub struct BlockCandidate {
    pub block: Block,
    pub height: u64,
    pub has_block_final_tx: bool,
}

/// The host node surface the stratum server drives. All calls are
/// synchronous and expected to complete promptly; block submission is the
/// heaviest and is tolerated inline.
pub trait Node: Send + Sync {
    /// Refuse to hand out work while syncing or disconnected.
    fn ready(&self) -> Result<(), NodeStatus> {
        Ok(())
    }

    /// The current chain tip.
    fn tip(&self) -> BlockHash;

    /// A counter that advances whenever the mempool contents change.
    fn transactions_updated(&self) -> u64;

    fn is_witness_enabled(&self, tip: &BlockHash) -> bool;

    /// Assemble a new candidate block on the current tip.
    fn create_block_candidate(&self) -> Result<BlockCandidate>;

    /// Freshen a header's timestamp within consensus bounds. Returns the
    /// adjustment in seconds.
    fn update_time(&self, header: &mut Header) -> i64;

    /// Validate and relay a solved block. Returns acceptance.
    fn process_new_block(&self, block: &Block) -> bool;
}
