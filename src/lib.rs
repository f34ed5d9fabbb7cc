use {
    anyhow::{Context, Error, bail, ensure},
    arguments::Arguments,
    bitcoin::{
        Address, Amount, Block, BlockHash, CompactTarget, Network, OutPoint, ScriptBuf, Sequence,
        Target, Transaction, TxIn, TxMerkleNode, TxOut, VarInt, Witness,
        address::NetworkUnchecked,
        block::{self, Header},
        consensus,
        hashes::{Hash, HashEngine, sha256, sha256d},
        locktime::absolute::LockTime,
        opcodes,
        script::{Builder, PushBytesBuf},
        transaction,
    },
    byteorder::{BigEndian, ByteOrder, LittleEndian},
    chain::Chain,
    clap::Parser,
    client::StratumClient,
    derive_more::Display,
    futures::{sink::SinkExt, stream::StreamExt},
    mergemine::{AuxProof, AuxWork, ChainId, MergeMine, SecondStageProof, SecondStageWork},
    node::{BlockCandidate, Node, NodeStatus},
    options::Options,
    primitive_types::U256,
    rand::RngCore,
    serde::{
        Deserialize, Deserializer, Serialize, Serializer, de, ser::SerializeSeq,
    },
    serde_json::{Value, json},
    serde_with::{DeserializeFromStr, SerializeDisplay},
    snafu::Snafu,
    std::{
        collections::{BTreeMap, HashMap},
        env,
        fmt::{self, Formatter},
        io,
        net::{IpAddr, SocketAddr},
        process,
        str::FromStr,
        sync::Arc,
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
    stratum::{
        Authorize, Configure, Extranonce, Id, JobId, Message, MerkleNode, Nbits,
        Notify, Ntime, PrevHash, SetDifficulty, SetExtranonce, StratumError, Submit,
        Subscribe, SubscribeResult, Version,
    },
    subnet::Subnet,
    templates::{TemplateStore, WorkTemplate},
    tokio::{
        net::TcpListener,
        runtime::Runtime,
        sync::{Mutex, mpsc, watch},
        task::JoinSet,
        time::{MissedTickBehavior, interval},
    },
    tokio_util::{
        codec::{FramedRead, FramedWrite, LinesCodec},
        sync::CancellationToken,
    },
    tracing::{debug, error, info, warn},
    tracing_appender::non_blocking,
    tracing_subscriber::EnvFilter,
};

mod arguments;
mod chain;
pub mod client;
pub mod coinbase;
pub mod merkle;
pub mod mergemine;
pub mod mmr;
pub mod node;
mod options;
pub mod pow;
pub mod rpc;
pub mod server;
pub mod sharechain;
pub mod stratum;
mod subcommand;
pub mod subnet;
pub mod templates;
mod verifier;
mod work;

pub const USER_AGENT: &str = "adit/0.1.0";

pub const EXTRANONCE1_SIZE: usize = 8;
pub const EXTRANONCE2_SIZE: usize = 4;
pub const EXTRANONCE_TOTAL_SIZE: usize = EXTRANONCE1_SIZE + EXTRANONCE2_SIZE;
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024;

/// Work templates older than this (by block nTime) are evicted.
pub const WORK_EXPIRY_SECS: u64 = 900;
/// Hard cap on retained work templates, and on per-client merge-mine work.
pub const MAX_WORK_TEMPLATES: usize = 30;
/// Minimum seconds between mempool-driven template rebuilds.
pub const WORK_REFRESH_HOLDOFF_SECS: u64 = 5;
/// Periodic watcher wake-up.
pub const WATCHER_INTERVAL: Duration = Duration::from_secs(15);

/// Version-rolling bits a miner is allowed to claim.
pub const VERSION_ROLLING_ALLOWED: u32 = 0x1fffe000;

/// Identifier spliced after a commitment root, before the coinbase lock time.
pub const COMMITMENT_ID: [u8; 4] = [0x4b, 0x4a, 0x49, 0x48];

type Result<T = (), E = Error> = std::result::Result<T, E>;

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

fn setup_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal (ctrl-c)");
            token_clone.cancel();
        }
    });

    token
}

pub fn main() {
    let (writer, _guard) = non_blocking(io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(writer)
        .init();

    let args = Arguments::parse();

    Runtime::new()
        .expect("Failed to create tokio runtime")
        .block_on(async {
            let cancel_token = setup_signal_handler();

            match args.run(cancel_token).await {
                Err(err) => {
                    error!("error: {err}");

                    if env::var_os("RUST_BACKTRACE")
                        .map(|val| val == "1")
                        .unwrap_or_default()
                    {
                        error!("{}", err.backtrace());
                    }
                    process::exit(1);
                }
                Ok(_) => {
                    process::exit(0);
                }
            }
        });
}
