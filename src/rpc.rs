use {
    super::*,
    bitcoincore_rpc::{Auth, Client, RpcApi},
};

/// `getblocktemplate` fields this server consumes.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
pub struct GbtResult {
    pub bits: Nbits,
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: BlockHash,
    #[serde(rename = "curtime")]
    pub current_time: u64,
    pub height: u64,
    #[serde(deserialize_with = "version_from_i32")]
    pub version: Version,
    pub transactions: Vec<GbtTransaction>,
    #[serde(default)]
    pub default_witness_commitment: Option<ScriptBuf>,
    #[serde(rename = "coinbasevalue", with = "bitcoin::amount::serde::as_sat")]
    pub coinbase_value: Amount,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
pub struct GbtTransaction {
    pub txid: bitcoin::Txid,
    #[serde(rename = "data", deserialize_with = "tx_from_hex")]
    pub transaction: Transaction,
}

fn version_from_i32<'de, D>(d: D) -> Result<Version, D::Error>
where
    D: Deserializer<'de>,
{
    let version = i32::deserialize(d)?;
    Ok(Version::from(version))
}

fn tx_from_hex<'de, D>(d: D) -> Result<Transaction, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(d)?;
    consensus::encode::deserialize_hex(&s).map_err(serde::de::Error::custom)
}

struct RpcState {
    tip: BlockHash,
    mempool: (u64, u64),
    transactions_updated: u64,
    witness_enabled: bool,
    initial_block_download: bool,
}

/// A [`Node`] backed by a Bitcoin Core compatible RPC endpoint. Candidate
/// blocks come from `getblocktemplate`; solved blocks leave via
/// `submitblock`. Such a node carries no block-final transaction, so
/// merge-mined commitments are unavailable on this backend.
pub struct RpcNode {
    client: Client,
    network: Network,
    state: std::sync::Mutex<RpcState>,
    tip_tx: watch::Sender<BlockHash>,
}

impl RpcNode {
    pub fn new(
        url: &str,
        auth: Auth,
        network: Network,
    ) -> Result<(Arc<Self>, watch::Receiver<BlockHash>)> {
        let client = Client::new(url, auth).context("failed to create RPC client")?;

        let tip = client
            .get_best_block_hash()
            .context("failed to reach the node RPC")?;

        let (tip_tx, tip_rx) = watch::channel(tip);

        let node = Arc::new(Self {
            client,
            network,
            state: std::sync::Mutex::new(RpcState {
                tip,
                mempool: (0, 0),
                transactions_updated: 0,
                witness_enabled: true,
                initial_block_download: false,
            }),
            tip_tx,
        });

        node.poll()?;

        Ok((node, tip_rx))
    }

    /// One poller pass: publish tip changes, advance the mempool counter
    /// when the pool moved, refresh the sync state.
    pub fn poll(&self) -> Result {
        let tip = self.client.get_best_block_hash()?;
        let mempool_info = self.client.get_mempool_info()?;
        let chain_info = self.client.get_blockchain_info()?;

        let mut state = self.state.lock().expect("rpc state poisoned");

        if state.tip != tip {
            info!("New chain tip: {tip}");
            state.tip = tip;
            let _ = self.tip_tx.send(tip);
        }

        let mempool = (mempool_info.size as u64, mempool_info.bytes as u64);
        if state.mempool != mempool {
            state.mempool = mempool;
            state.transactions_updated += 1;
        }

        state.initial_block_download = chain_info.initial_block_download;

        Ok(())
    }

    fn get_block_template(&self) -> Result<GbtResult> {
        let mut rules = vec!["segwit"];
        if self.network == Network::Signet {
            rules.push("signet");
        }

        let params = json!({
            "capabilities": ["coinbasetxn", "workid", "coinbase/append"],
            "rules": rules,
        });

        let template = self.client.call::<GbtResult>("getblocktemplate", &[params])?;

        Ok(template)
    }
}

impl Node for RpcNode {
    fn ready(&self) -> Result<(), NodeStatus> {
        if self.state.lock().expect("rpc state poisoned").initial_block_download {
            return Err(NodeStatus::InitialBlockDownload);
        }
        Ok(())
    }

    fn tip(&self) -> BlockHash {
        self.state.lock().expect("rpc state poisoned").tip
    }

    fn transactions_updated(&self) -> u64 {
        self.state
            .lock()
            .expect("rpc state poisoned")
            .transactions_updated
    }

    fn is_witness_enabled(&self, _tip: &BlockHash) -> bool {
        self.state.lock().expect("rpc state poisoned").witness_enabled
    }

    fn create_block_candidate(&self) -> Result<BlockCandidate> {
        let gbt = self.get_block_template()?;

        let witness_enabled = gbt.default_witness_commitment.is_some();
        self.state.lock().expect("rpc state poisoned").witness_enabled = witness_enabled;

        let mut output = vec![TxOut {
            value: gbt.coinbase_value,
            script_pubkey: coinbase::op_false_script(),
        }];

        if let Some(commitment) = &gbt.default_witness_commitment {
            output.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: commitment.clone(),
            });
        }

        let coinbase = Transaction {
            version: transaction::Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: if witness_enabled {
                    Witness::from_slice(&[&[0u8; 32][..]])
                } else {
                    Witness::default()
                },
            }],
            output,
        };

        let mut txdata = vec![coinbase];
        txdata.extend(gbt.transactions.iter().map(|tx| tx.transaction.clone()));

        Ok(BlockCandidate {
            block: Block {
                header: Header {
                    version: gbt.version.into(),
                    prev_blockhash: gbt.previous_block_hash,
                    merkle_root: TxMerkleNode::all_zeros(),
                    time: gbt.current_time as u32,
                    bits: gbt.bits.into(),
                    nonce: 0,
                },
                txdata,
            },
            height: gbt.height,
            has_block_final_tx: false,
        })
    }

    fn update_time(&self, header: &mut Header) -> i64 {
        let now = now_secs() as u32;
        if now > header.time {
            let delta = i64::from(now - header.time);
            header.time = now;
            delta
        } else {
            0
        }
    }

    fn process_new_block(&self, block: &Block) -> bool {
        match self.client.submit_block(block) {
            Ok(()) => true,
            Err(err) => {
                warn!("submitblock rejected {}: {err}", block.block_hash());
                false
            }
        }
    }
}
