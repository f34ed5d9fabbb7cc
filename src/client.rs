use super::*;

/// Per-connection miner state.
pub struct StratumClient {
    pub peer: SocketAddr,
    next_id: u64,
    secret: [u8; 32],
    pub user_agent: Option<String>,
    pub authorized: bool,
    pub address: Option<Address>,
    /// Minimum difficulty requested via the `+D` username suffix; 0 means
    /// use the server default.
    pub mindiff: f64,
    pub version_rolling_mask: u32,
    pub supports_extranonce: bool,
    pub last_tip: Option<BlockHash>,
    pub last_second_stage: Option<(ChainId, BlockHash)>,
    pub send_work: bool,
    /// Chain id → (username, password) for authorized aux chains.
    pub mmauth: BTreeMap<ChainId, (String, String)>,
    /// Merge-mine root → (timestamp ms, aux work set) for recently issued
    /// commitments; bounded like the template store, in milliseconds.
    pub mmwork: HashMap<sha256d::Hash, (u64, BTreeMap<ChainId, AuxWork>)>,
}

impl StratumClient {
    pub fn new(peer: SocketAddr) -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);

        Self {
            peer,
            next_id: 0,
            secret,
            user_agent: None,
            authorized: false,
            address: None,
            mindiff: 0.0,
            version_rolling_mask: 0,
            supports_extranonce: false,
            last_tip: None,
            last_second_stage: None,
            send_work: false,
            mmauth: BTreeMap::new(),
            mmwork: HashMap::new(),
        }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// The server-assigned half of the nonce space: the first 8 bytes of
    /// `SHA-256(secret ‖ context)`, where `context` (a job id or chain id)
    /// participates only for extranonce-subscribed clients. Deterministic
    /// per client, opaque to the miner.
    pub fn extranonce1(&self, context: &[u8; 32]) -> [u8; EXTRANONCE1_SIZE] {
        let mut engine = sha256::Hash::engine();
        engine.input(&self.secret);
        if self.supports_extranonce {
            engine.input(context);
        }
        let digest = sha256::Hash::from_engine(engine);

        let mut extranonce1 = [0u8; EXTRANONCE1_SIZE];
        extranonce1.copy_from_slice(&digest.to_byte_array()[..EXTRANONCE1_SIZE]);
        extranonce1
    }

    /// The difficulty actually sent to this client: the requested minimum
    /// overrides the network value, floored at 0.001.
    pub fn clamp_difficulty(&self, difficulty: f64) -> f64 {
        let difficulty = if self.mindiff > 0.0 {
            self.mindiff
        } else {
            difficulty
        };
        difficulty.max(0.001)
    }

    /// Apply the 30-entry / 900-second retention rule to the merge-mine
    /// work map, timestamps in milliseconds.
    pub fn evict_merge_mine_work(&mut self, now_millis: u64) {
        let cutoff = now_millis.saturating_sub(WORK_EXPIRY_SECS * 1000);

        let mut expired = Vec::new();
        let mut oldest: Option<(sha256d::Hash, u64)> = None;

        for (root, (timestamp, _)) in &self.mmwork {
            if *timestamp < cutoff {
                expired.push(*root);
            }
            if oldest.map_or(true, |(_, oldest_timestamp)| *timestamp <= oldest_timestamp) {
                oldest = Some((*root, *timestamp));
            }
        }

        for root in expired {
            self.mmwork.remove(&root);
            debug!(
                "Removed outdated merge-mining work unit for {} ({} total)",
                self.peer,
                self.mmwork.len()
            );
        }

        if self.mmwork.len() > MAX_WORK_TEMPLATES {
            if let Some((root, _)) = oldest {
                if self.mmwork.remove(&root).is_some() {
                    debug!(
                        "Removed oldest merge-mining work unit for {} ({} total)",
                        self.peer,
                        self.mmwork.len()
                    );
                }
            }
        }
    }
}
