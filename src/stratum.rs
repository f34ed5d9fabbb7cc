use super::*;

mod authorize;
mod configure;
mod error;
mod extranonce;
mod job_id;
mod merkle_node;
mod message;
mod nbits;
mod nonce;
mod notify;
mod ntime;
mod prev_hash;
mod set_difficulty;
mod set_extranonce;
mod submit;
mod subscribe;
mod version;

pub use {
    authorize::Authorize,
    configure::Configure,
    error::{JsonRpcError, StratumError},
    extranonce::Extranonce,
    job_id::JobId,
    merkle_node::MerkleNode,
    message::{Id, Message},
    nbits::Nbits,
    nonce::Nonce,
    notify::Notify,
    ntime::Ntime,
    prev_hash::PrevHash,
    set_difficulty::SetDifficulty,
    set_extranonce::SetExtranonce,
    submit::Submit,
    subscribe::{Subscribe, SubscribeResult},
    version::Version,
};
