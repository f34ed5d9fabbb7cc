use super::*;

/// Which share chain this node participates in. Solo mining carries the
/// share structures but no valid chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ShareChainKind {
    Solo,
    #[default]
    Main,
}

impl ShareChainKind {
    pub fn is_valid(self) -> bool {
        match self {
            Self::Solo => false,
            Self::Main => true,
        }
    }
}

impl fmt::Display for ShareChainKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Solo => "solo",
            Self::Main => "main",
        })
    }
}

impl FromStr for ShareChainKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "solo" => Ok(Self::Solo),
            "main" => Ok(Self::Main),
            other => bail!("unknown share chain '{other}'"),
        }
    }
}

/// The miner's payout identity, segwit style: a witness version and a
/// program. The type of the program is irrelevant here, so any length is
/// carried as-is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MinerScript {
    pub version: u8,
    pub program: Vec<u8>,
}

/// The fields needed to place a share inside the bitcoin block that mined
/// it and reconstruct that block's header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareWitness {
    /// Branch through the commitment merkle map, `(skip, sibling)` pairs.
    pub commit: Vec<(u8, sha256d::Hash)>,
    /// The coinbase transaction serialized up to the commitment root.
    pub cb1: Vec<u8>,
    /// The only coinbase field after the commitment.
    pub lock_time: u32,
    /// Branch from the coinbase (leaf 0) to the block merkle root.
    pub branch: Vec<sha256d::Hash>,
    pub version: i32,
    pub prev_block: BlockHash,
    /// The key of the share-chain slot in the commitment map.
    pub share_chain_path: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

/// One share-chain record. The header fields describe the share itself;
/// the witness ties it to a bitcoin block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub version: u32,
    pub bits: u32,
    pub height: u32,
    /// Aggregate work up to but not including this share, little endian.
    pub total_work: [u8; 32],
    /// Accumulator over the previous shares; only its root is hashed.
    pub prev_shares: mmr::MmrAccumulator,
    pub miner: MinerScript,
    pub wit: ShareWitness,
}

/// Pieter Wuille's variable-length integer: 7 bits per byte, big-endian,
/// continuation in the high bit, each continuation byte offset by one.
pub(crate) fn write_varint(buf: &mut Vec<u8>, mut n: u64) {
    let mut tmp = [0u8; 10];
    let mut len = 0;

    loop {
        tmp[len] = (n & 0x7f) as u8 | if len > 0 { 0x80 } else { 0x00 };
        if n <= 0x7f {
            break;
        }
        n = (n >> 7) - 1;
        len += 1;
    }

    buf.extend(tmp[..=len].iter().rev());
}

impl Share {
    /// Hash of the share header proper: the fixed-width prefix that gets
    /// committed inside the coinbase.
    fn header_hash(&self) -> sha256d::Hash {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.total_work);
        buf.extend_from_slice(self.prev_shares.root().as_byte_array());
        write_varint(&mut buf, u64::from(self.miner.version));
        write_varint(&mut buf, self.miner.program.len() as u64);
        buf.extend_from_slice(&self.miner.program);
        sha256d::Hash::hash(&buf)
    }

    /// Reconstruct the bitcoin block header this share was mined in.
    ///
    /// Returns the header and a `mutated` flag which is set when the
    /// commitment-map proof is malformed; the header is still produced so
    /// the caller can log or ban on its hash.
    pub fn block_header(&self) -> (Header, bool) {
        // The share commitment may be aggregated with other commitments in
        // a merkle hash map; lift it to the map root.
        let mut mutated = false;
        let commitment_root = merkle::map_root_from_branch(
            self.header_hash(),
            &self.wit.commit,
            &self.wit.share_chain_path,
            &mut mutated,
        );

        // Hash of the coinbase transaction: everything before the
        // commitment, the root, the fixed identifier, then the lock time.
        let mut coinbase = Vec::with_capacity(self.wit.cb1.len() + 40);
        coinbase.extend_from_slice(&self.wit.cb1);
        coinbase.extend_from_slice(commitment_root.as_byte_array());
        coinbase.extend_from_slice(&COMMITMENT_ID);
        coinbase.extend_from_slice(&self.wit.lock_time.to_le_bytes());
        let coinbase_hash = sha256d::Hash::hash(&coinbase);

        // The coinbase is always the left-most leaf.
        let merkle_root = merkle::root_from_branch(coinbase_hash, &self.wit.branch, 0);

        let header = Header {
            version: block::Version::from_consensus(self.wit.version),
            prev_blockhash: self.wit.prev_block,
            merkle_root: TxMerkleNode::from_raw_hash(merkle_root),
            time: self.wit.time,
            bits: CompactTarget::from_consensus(self.wit.bits),
            nonce: self.wit.nonce,
        };

        (header, mutated)
    }

    pub fn hash(&self) -> BlockHash {
        self.block_header().0.block_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn varint_case(n: u64, expected: &[u8]) {
        let mut buf = Vec::new();
        write_varint(&mut buf, n);
        assert_eq!(buf, expected, "varint encoding of {n}");
    }

    #[test]
    fn varint_vectors() {
        varint_case(0x00, &[0x00]);
        varint_case(0x01, &[0x01]);
        varint_case(0x7f, &[0x7f]);
        varint_case(0x80, &[0x80, 0x00]);
        varint_case(0xff, &[0x80, 0x7f]);
        varint_case(0x3fff, &[0xfe, 0x7f]);
        varint_case(0x4000, &[0xff, 0x00]);
    }

    fn sample_share() -> Share {
        Share {
            version: 1,
            bits: 0x1d00ffff,
            height: 42,
            total_work: [0x11; 32],
            prev_shares: mmr::MmrAccumulator::new(),
            miner: MinerScript {
                version: 0,
                program: vec![0xab; 20],
            },
            wit: ShareWitness {
                commit: Vec::new(),
                cb1: vec![0x01, 0x02, 0x03],
                lock_time: 0,
                branch: Vec::new(),
                version: 0x2000_0000,
                prev_block: BlockHash::from_byte_array([0x77; 32]),
                share_chain_path: [0x55; 32],
                time: 1_700_000_000,
                bits: 0x207f_ffff,
                nonce: 12345,
            },
        }
    }

    #[test]
    fn header_field_passthrough() {
        let share = sample_share();
        let (header, mutated) = share.block_header();

        assert!(!mutated);
        assert_eq!(header.version.to_consensus(), share.wit.version);
        assert_eq!(header.prev_blockhash, share.wit.prev_block);
        assert_eq!(header.time, share.wit.time);
        assert_eq!(header.bits.to_consensus(), share.wit.bits);
        assert_eq!(header.nonce, share.wit.nonce);
    }

    #[test]
    fn merkle_root_is_the_spliced_coinbase_hash() {
        // With no block branch and no commitment branch the merkle root is
        // exactly the hash of cb1 ‖ share-header-hash ‖ id ‖ lock_time.
        let share = sample_share();
        let (header, _) = share.block_header();

        let mut coinbase = share.wit.cb1.clone();
        coinbase.extend_from_slice(share.header_hash().as_byte_array());
        coinbase.extend_from_slice(&COMMITMENT_ID);
        coinbase.extend_from_slice(&share.wit.lock_time.to_le_bytes());

        assert_eq!(
            header.merkle_root,
            TxMerkleNode::from_raw_hash(sha256d::Hash::hash(&coinbase))
        );
    }

    #[test]
    fn block_branch_lifts_the_coinbase_hash() {
        let mut share = sample_share();
        let sibling = sha256d::Hash::from_byte_array([0x99; 32]);
        share.wit.branch = vec![sibling];

        let plain = sample_share().block_header().0.merkle_root;
        let lifted = share.block_header().0.merkle_root;

        assert_ne!(plain, lifted);
        assert_eq!(
            lifted,
            TxMerkleNode::from_raw_hash(merkle::combine(plain.to_raw_hash(), sibling))
        );
    }

    #[test]
    fn malformed_commit_path_sets_mutated() {
        let mut share = sample_share();
        share.wit.commit = vec![
            (200, sha256d::Hash::all_zeros()),
            (200, sha256d::Hash::all_zeros()),
        ];

        let (_, mutated) = share.block_header();
        assert!(mutated);
    }

    #[test]
    fn prev_share_root_changes_the_header() {
        let share = sample_share();

        let mut other = share.clone();
        other
            .prev_shares
            .append(sha256d::Hash::from_byte_array([0x01; 32]));

        assert_ne!(
            share.block_header().0.merkle_root,
            other.block_header().0.merkle_root
        );

        // Same accumulator contents give the same header.
        let mut again = share.clone();
        again.prev_shares = share.prev_shares.clone();
        assert_eq!(
            share.block_header().0.merkle_root,
            again.block_header().0.merkle_root
        );
    }

    #[test]
    fn share_chain_kind() {
        assert!(ShareChainKind::Main.is_valid());
        assert!(!ShareChainKind::Solo.is_valid());
        assert_eq!("solo".parse::<ShareChainKind>().unwrap(), ShareChainKind::Solo);
        assert_eq!(ShareChainKind::Main.to_string(), "main");
        assert!("pool".parse::<ShareChainKind>().is_err());
    }
}
