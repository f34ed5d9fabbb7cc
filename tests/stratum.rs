use {
    crate::fixture::{TestMergeMine, TestServer, PAYOUT, TEST_BITS, TEST_VERSION},
    adit::{
        merkle,
        mergemine::{Disabled, MergeMine},
        pow,
        stratum::PrevHash,
    },
    bitcoin::{
        BlockHash, CompactTarget,
        block::{self, Header},
        hashes::{Hash, sha256d},
    },
    serde_json::json,
    std::sync::Arc,
};

fn disabled() -> Arc<dyn MergeMine> {
    Arc::new(Disabled)
}

#[tokio::test]
async fn subscribe_authorize_notify() {
    let server = TestServer::spawn(disabled()).await;
    let mut miner = server.miner().await;

    let result = miner.subscribe().await;

    let extranonce1 = result[1].as_str().unwrap().to_string();
    assert_eq!(extranonce1.len(), 16, "extranonce1 is 8 bytes of hex");
    assert_eq!(
        result,
        json!([
            [
                ["mining.set_difficulty", "1e+06"],
                ["mining.notify", "ae6812eb4cd7735a302a8a9dd95cf71f"]
            ],
            extranonce1,
            4
        ])
    );

    let (result, error) = miner.authorize(PAYOUT, "").await;
    assert!(error.is_none(), "authorize failed: {error:?}");
    assert_eq!(result, Some(json!(true)));

    let difficulty = miner.notification("mining.set_difficulty").await;
    assert!(difficulty[0].as_f64().unwrap() > 0.0);

    let notify = miner.notification("mining.notify").await;
    assert_eq!(notify[8], json!(true), "first notify sets clean_jobs");
    assert_eq!(notify[5], json!("20000000"));
    assert_eq!(notify[6], json!("207fffff"));

    // The announced prev hash is the template's, 32-bit word swapped.
    let prev_hash = notify[1].as_str().unwrap().parse::<PrevHash>().unwrap();
    assert_eq!(prev_hash.0, BlockHash::from_byte_array([1u8; 32]));

    // The job id is 64 hex digits of block hash.
    assert_eq!(notify[0].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn authorize_rejects_bad_address() {
    let server = TestServer::spawn(disabled()).await;
    let mut miner = server.miner().await;

    miner.subscribe().await;
    let (result, error) = miner.authorize("not-an-address", "").await;

    assert!(result.is_none());
    assert_eq!(error.unwrap()["code"], json!(-8));
}

#[tokio::test]
async fn authorize_parses_mindiff_suffix() {
    let server = TestServer::spawn(disabled()).await;
    let mut miner = server.miner().await;

    miner.subscribe().await;
    let (result, error) = miner.authorize(&format!("{PAYOUT}+2048"), "").await;
    assert!(error.is_none(), "authorize failed: {error:?}");
    assert_eq!(result, Some(json!(true)));

    let difficulty = miner.notification("mining.set_difficulty").await;
    assert_eq!(difficulty[0], json!(2048.0));
}

#[tokio::test]
async fn authorize_rejects_malformed_mindiff() {
    let server = TestServer::spawn(disabled()).await;
    let mut miner = server.miner().await;

    miner.subscribe().await;
    let (_, error) = miner.authorize(&format!("{PAYOUT}+banana"), "").await;
    assert_eq!(error.unwrap()["code"], json!(-8));
}

#[tokio::test]
async fn unknown_method_is_an_error() {
    let server = TestServer::spawn(disabled()).await;
    let mut miner = server.miner().await;

    let (result, error) = miner.request("mining.frobnicate", json!([])).await;
    assert!(result.is_none());
    assert_eq!(error.unwrap()["code"], json!(-32601));
}

#[tokio::test]
async fn configure_masks_version_rolling() {
    let server = TestServer::spawn(disabled()).await;
    let mut miner = server.miner().await;

    let (result, error) = miner
        .request(
            "mining.configure",
            json!([
                ["version-rolling"],
                {"version-rolling.mask": "ffffffff", "version-rolling.min-bit-count": 2}
            ]),
        )
        .await;

    assert!(error.is_none(), "configure failed: {error:?}");
    assert_eq!(
        result,
        Some(json!({"version-rolling": true, "version-rolling.mask": "1fffe000"}))
    );
}

#[tokio::test]
async fn submitted_share_becomes_a_block() {
    let server = TestServer::spawn(disabled()).await;
    let mut miner = server.miner().await;

    miner
        .request(
            "mining.configure",
            json!([["version-rolling"], {"version-rolling.mask": "ffffffff"}]),
        )
        .await;

    let subscribe = miner.subscribe().await;
    let extranonce1 = hex::decode(subscribe[1].as_str().unwrap()).unwrap();

    miner.authorize(PAYOUT, "").await;
    let notify = miner.notification("mining.notify").await;

    let job = notify[0].as_str().unwrap().to_string();
    let cb1 = hex::decode(notify[2].as_str().unwrap()).unwrap();
    let cb2 = hex::decode(notify[3].as_str().unwrap()).unwrap();
    assert_eq!(notify[4], json!([]), "single-transaction block has no branch");
    let ntime = u32::from_str_radix(notify[7].as_str().unwrap(), 16).unwrap();

    let extranonce2 = [0u8, 0, 0, 1];

    let mut coinbase = cb1.clone();
    coinbase.extend_from_slice(&extranonce1);
    coinbase.extend_from_slice(&extranonce2);
    coinbase.extend_from_slice(&cb2);

    let leaf = sha256d::Hash::hash(&coinbase);
    let merkle_root = merkle::root_from_branch(leaf, &[], 0);

    // Version rolling: bit 13 comes from the submission, the rest from the
    // template.
    let version = (TEST_VERSION as u32 | 0x2000) as i32;

    let mut header = Header {
        version: block::Version::from_consensus(version),
        prev_blockhash: BlockHash::from_byte_array([1u8; 32]),
        merkle_root: bitcoin::TxMerkleNode::from_raw_hash(merkle_root),
        time: ntime,
        bits: CompactTarget::from_consensus(TEST_BITS),
        nonce: 0,
    };

    while !pow::check_proof_of_work(header.block_hash(), header.bits, 0) {
        header.nonce += 1;
    }

    let (result, error) = miner
        .request(
            "mining.submit",
            json!([
                PAYOUT,
                job,
                "00000001",
                format!("{ntime:08x}"),
                format!("{:08x}", header.nonce),
                "00002000"
            ]),
        )
        .await;

    assert!(error.is_none(), "submit failed: {error:?}");
    assert_eq!(result, Some(json!(true)));

    let blocks = server.node.processed_blocks();
    assert_eq!(blocks.len(), 1, "the solved share was submitted as a block");

    let block = &blocks[0];
    assert_eq!(block.header.version.to_consensus(), version);
    assert_eq!(block.header.nonce, header.nonce);
    assert!(pow::check_proof_of_work(block.header.block_hash(), block.header.bits, 0));

    // The block's coinbase is byte-identical to what the miner hashed.
    assert_eq!(bitcoin::consensus::serialize(&block.txdata[0]), coinbase);
    assert_eq!(block.header.merkle_root, header.merkle_root);

    // A solved block triggers fresh work.
    let refresh = miner.notification("mining.notify").await;
    assert_eq!(refresh[0].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn stale_job_recovers_with_fresh_work() {
    let server = TestServer::spawn(disabled()).await;
    let mut miner = server.miner().await;

    miner.subscribe().await;
    miner.authorize(PAYOUT, "").await;
    miner.notification("mining.notify").await;

    let (result, error) = miner
        .request(
            "mining.submit",
            json!([PAYOUT, "ab".repeat(32), "00000001", "504e86ed", "b2957c02"]),
        )
        .await;

    assert!(error.is_none(), "stale submits are not protocol errors: {error:?}");
    assert_eq!(result, Some(json!(false)));

    // The rejection is followed by a fresh work unit.
    miner.notification("mining.set_difficulty").await;
    let notify = miner.notification("mining.notify").await;
    assert_eq!(notify[0].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn submit_rejects_wrong_extranonce2_width() {
    let server = TestServer::spawn(disabled()).await;
    let mut miner = server.miner().await;

    miner.subscribe().await;
    miner.authorize(PAYOUT, "").await;

    let (_, error) = miner
        .request(
            "mining.submit",
            json!([PAYOUT, "ab".repeat(32), "0000000001", "504e86ed", "b2957c02"]),
        )
        .await;

    assert_eq!(error.unwrap()["code"], json!(-8));
}

#[tokio::test]
async fn extranonce_subscription_adds_set_extranonce() {
    let server = TestServer::spawn(disabled()).await;
    let mut miner = server.miner().await;

    miner.subscribe().await;

    let (result, error) = miner.request("mining.extranonce.subscribe", json!([])).await;
    assert!(error.is_none(), "extranonce.subscribe failed: {error:?}");
    assert_eq!(result, Some(json!(true)));

    miner.authorize(PAYOUT, "").await;

    let set_extranonce = miner.notification("mining.set_extranonce").await;
    assert_eq!(set_extranonce[0].as_str().unwrap().len(), 16);
    assert_eq!(set_extranonce[1], json!(4));
}

#[tokio::test]
async fn merge_mined_share_routes_to_aux_chain() {
    let (mergemine, aux_work) = TestMergeMine::with_aux_work();
    let node = crate::fixture::TestNode::with_block_final();
    let server = TestServer::spawn_with_node(node, mergemine.clone()).await;
    let mut miner = server.miner().await;

    let subscribe = miner.subscribe().await;
    let extranonce1 = hex::decode(subscribe[1].as_str().unwrap()).unwrap();

    let (result, error) = miner.authorize(PAYOUT, "aux=alice:secret").await;
    assert!(error.is_none(), "authorize failed: {error:?}");
    assert_eq!(result, Some(json!(true)));

    let notify = miner.notification("mining.notify").await;

    // Merge-mined work announces job_id:mmroot; a single aux commitment is
    // its own map root.
    let job = notify[0].as_str().unwrap().to_string();
    let (job_id, mmroot) = job.split_once(':').expect("merge-mined job id");
    assert_eq!(job_id.len(), 64);
    assert_eq!(mmroot, "cc".repeat(32));

    let cb1 = hex::decode(notify[2].as_str().unwrap()).unwrap();
    let cb2 = hex::decode(notify[3].as_str().unwrap()).unwrap();
    let ntime = u32::from_str_radix(notify[7].as_str().unwrap(), 16).unwrap();

    let branch = notify[4]
        .as_array()
        .unwrap()
        .iter()
        .map(|node| {
            let mut bytes = [0u8; 32];
            hex::decode_to_slice(node.as_str().unwrap(), &mut bytes).unwrap();
            sha256d::Hash::from_byte_array(bytes)
        })
        .collect::<Vec<sha256d::Hash>>();
    assert_eq!(branch.len(), 1, "two-transaction block has a one-node branch");

    let extranonce2 = [0u8, 0, 0, 1];

    let mut coinbase = cb1.clone();
    coinbase.extend_from_slice(&extranonce1);
    coinbase.extend_from_slice(&extranonce2);
    coinbase.extend_from_slice(&cb2);

    let leaf = sha256d::Hash::hash(&coinbase);
    let merkle_root = merkle::root_from_branch(leaf, &branch, 0);

    let mut header = Header {
        version: block::Version::from_consensus(TEST_VERSION),
        prev_blockhash: BlockHash::from_byte_array([1u8; 32]),
        merkle_root: bitcoin::TxMerkleNode::from_raw_hash(merkle_root),
        time: ntime,
        bits: CompactTarget::from_consensus(TEST_BITS),
        nonce: 0,
    };

    while !pow::check_proof_of_work(header.block_hash(), header.bits, 0) {
        header.nonce += 1;
    }

    let (result, error) = miner
        .request(
            "mining.submit",
            json!([
                PAYOUT,
                job,
                "00000001",
                format!("{ntime:08x}"),
                format!("{:08x}", header.nonce)
            ]),
        )
        .await;

    assert!(error.is_none(), "submit failed: {error:?}");
    assert_eq!(result, Some(json!(true)));

    // The main chain got the block, with the miner's exact coinbase bytes
    // and the branch-derived merkle root.
    let blocks = server.node.processed_blocks();
    assert_eq!(blocks.len(), 1);
    let block = &blocks[0];
    assert_eq!(block.txdata.len(), 2);
    assert_eq!(adit::coinbase::serialize_no_witness(&block.txdata[0]), coinbase);
    assert_eq!(block.header.merkle_root, header.merkle_root);

    // The block-final transaction carries the aux commitment in its
    // trailing bytes.
    let bf = block.txdata.last().unwrap();
    let bf_bytes = adit::coinbase::serialize_no_witness(bf);
    let tail = &bf_bytes[bf_bytes.len() - 40..];
    assert_eq!(&tail[..32], aux_work.commit.as_byte_array());

    // The aux chain received the share with a coherent proof.
    let state = mergemine.state.lock().unwrap();
    assert_eq!(state.aux_shares.len(), 1);
    let (chain, username, work, proof) = &state.aux_shares[0];

    assert_eq!(*chain, TestMergeMine::chain());
    assert_eq!(username, "alice");
    assert_eq!(work.commit, aux_work.commit);
    assert_eq!(proof.num_txns, 2);
    assert_eq!(proof.lock_time, 0);
    assert_eq!(proof.time, ntime);
    assert_eq!(proof.nonce, header.nonce);
    assert_eq!(proof.version.to_consensus(), TEST_VERSION);
    assert_eq!(proof.prev_block, BlockHash::from_byte_array([1u8; 32]));
    assert_eq!(
        proof.aux_branch,
        vec![block.txdata[0].compute_txid().to_raw_hash()],
        "the stable branch proves the block-final position with the coinbase as sibling"
    );
    assert_eq!(
        proof.midstate_length as usize,
        bf_bytes.len() - 40,
        "the midstate covers everything before the commitment"
    );
}

#[tokio::test]
async fn second_stage_round_trip() {
    let (mergemine, work) = TestMergeMine::with_second_stage();
    let server = TestServer::spawn(mergemine.clone()).await;
    let mut miner = server.miner().await;

    miner.subscribe().await;
    let (result, error) = miner.authorize(PAYOUT, "aux=alice:secret").await;
    assert!(error.is_none(), "authorize failed: {error:?}");
    assert_eq!(result, Some(json!(true)));

    {
        let state = mergemine.state.lock().unwrap();
        assert_eq!(
            state.registered,
            vec![(TestMergeMine::chain(), "alice".to_string(), "secret".to_string())]
        );
    }

    let notify = miner.notification("mining.notify").await;
    assert_eq!(notify[0], json!(":xyz"));
    assert_eq!(notify[2], json!(hex::encode(&work.cb1)));
    assert_eq!(notify[3], json!(hex::encode(&work.cb2)));
    assert_eq!(notify[8], json!(true), "first delivery is clean");

    let prev_hash = notify[1].as_str().unwrap().parse::<PrevHash>().unwrap();
    assert_eq!(prev_hash.0, work.prev_block);

    let (result, error) = miner
        .request(
            "mining.submit",
            json!([PAYOUT, ":xyz", "deadbeef", "00000001", "00000002"]),
        )
        .await;

    assert!(error.is_none(), "second stage submit failed: {error:?}");
    assert_eq!(result, Some(json!(true)));

    let state = mergemine.state.lock().unwrap();
    let (chain, username, submitted_work, proof) = &state.second_stage_shares[0];

    assert_eq!(*chain, TestMergeMine::chain());
    assert_eq!(username, "alice");
    assert_eq!(submitted_work.job_id, work.job_id);
    assert_eq!(proof.extranonce1.len(), 8);
    assert_eq!(proof.extranonce2, vec![0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(proof.time, 1);
    assert_eq!(proof.nonce, 2);
    assert_eq!(proof.version.to_consensus(), TEST_VERSION);
}

#[tokio::test]
async fn tip_change_pushes_clean_work() {
    let server = TestServer::spawn(disabled()).await;
    let mut miner = server.miner().await;

    miner.subscribe().await;
    miner.authorize(PAYOUT, "").await;

    let first = miner.notification("mining.notify").await;
    assert_eq!(first[8], json!(true));

    let new_tip = {
        let mut state = server.node.state.lock().unwrap();
        state.tip_seed = 2;
        BlockHash::from_byte_array([2u8; 32])
    };
    server.tip_tx.send(new_tip).unwrap();

    let next = miner.notification("mining.notify").await;
    assert_eq!(next[8], json!(true), "tip change sets clean_jobs");
    assert_ne!(first[0], next[0], "new template, new job id");

    let prev_hash = next[1].as_str().unwrap().parse::<PrevHash>().unwrap();
    assert_eq!(prev_hash.0, new_tip);
}

#[tokio::test]
async fn work_before_authorize_is_refused() {
    let server = TestServer::spawn(disabled()).await;
    let mut miner = server.miner().await;

    miner.subscribe().await;

    // A stale submit flags work delivery, but an unauthorized client gets
    // an error instead of a notify.
    let (result, _) = miner
        .request(
            "mining.submit",
            json!([PAYOUT, "ab".repeat(32), "00000001", "504e86ed", "b2957c02"]),
        )
        .await;
    assert_eq!(result, Some(json!(false)));

    let error = miner.notification_error().await;
    assert_eq!(error["code"], json!(-32600));
}
