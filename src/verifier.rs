use super::*;

/// The miner-supplied half of a submission, version rolling already applied.
pub(crate) struct Submission {
    pub(crate) extranonce2: Vec<u8>,
    pub(crate) time: u32,
    pub(crate) nonce: u32,
    pub(crate) version: block::Version,
}

/// Verify a main-template submission: rebuild the exact block header the
/// miner hashed, check main-chain proof of work (submitting the block on
/// success), then route the share to every authorized aux chain.
///
/// Returns whether the main chain accepted a block.
pub(crate) fn submit_block(
    client: &mut StratumClient,
    job_id: JobId,
    mmroot: sha256d::Hash,
    template: &WorkTemplate,
    submission: &Submission,
    node: &dyn Node,
    mergemine: &dyn MergeMine,
) -> Result<bool, StratumError> {
    if template.block.txdata.is_empty() {
        return Err(StratumError::internal(
            "no transactions in block template; unable to submit work",
        ));
    }

    let mut cb = template.block.txdata[0].clone();
    let mut bf = template.block.txdata.last().expect("non-empty").clone();

    let extranonce1 = client.extranonce1(job_id.as_bytes());
    if extranonce1.len() + submission.extranonce2.len() != EXTRANONCE_TOTAL_SIZE {
        return Err(StratumError::internal(format!(
            "unexpected combined nonce length: extranonce1({}) + extranonce2({}) != {EXTRANONCE_TOTAL_SIZE}; unable to submit work",
            extranonce1.len(),
            submission.extranonce2.len(),
        )));
    }

    let mut nonce = extranonce1.to_vec();
    nonce.extend_from_slice(&submission.extranonce2);

    coinbase::splice_extranonce(&mut cb, template.height, &nonce)?;

    if let Some(address) = &client.address {
        coinbase::apply_payout(&mut cb, address);
    }

    if template.has_block_final_tx
        && coinbase::update_merge_mine_commitment(&mut bf, mmroot)
    {
        debug!("Updated merge-mining commitment in block-final transaction");
    }

    let mut cb_branch = template.cb_branch.clone();
    if template.is_witness_enabled {
        cb_branch = coinbase::update_witness_commitment(&template.block, &mut cb, &mut bf)?;
        debug!("Updated segwit commitment in coinbase");
    }

    let mut header = template.block.header;
    header.merkle_root = TxMerkleNode::from_raw_hash(merkle::root_from_branch(
        cb.compute_txid().to_raw_hash(),
        &cb_branch,
        0,
    ));
    header.time = submission.time;
    header.nonce = submission.nonce;
    header.version = submission.version;

    let hash = header.block_hash();
    let miner = client
        .address
        .as_ref()
        .map(|address| address.to_string())
        .unwrap_or_else(|| client.peer.to_string());

    let mut accepted = false;
    if pow::check_proof_of_work(hash, header.bits, 0) {
        info!("GOT BLOCK!!! by {miner}: {hash}");

        let mut block = template.block.clone();
        block.txdata[0] = cb.clone();
        if template.is_witness_enabled {
            *block.txdata.last_mut().expect("non-empty") = bf.clone();
        }
        block.header.merkle_root = block.compute_merkle_root().expect("non-empty");
        block.header.time = submission.time;
        block.header.nonce = submission.nonce;
        block.header.version = submission.version;

        accepted = node.process_new_block(&block);
    } else {
        info!("NEW SHARE!!! by {miner}: {hash}");
    }

    // Check whether the work meets any of the auxiliary header requirements,
    // and submit where it does.
    if template.is_witness_enabled
        && template.has_block_final_tx
        && client.mmwork.contains_key(&mmroot)
    {
        let proof = build_aux_proof(template, &cb, &bf, &header)?;

        let mmwork = client.mmwork[&mmroot].1.clone();
        for (chain, auxwork) in &mmwork {
            let Some((username, _)) = client.mmauth.get(chain) else {
                debug!("Got share for chain we aren't authorized for; unable to submit work");
                continue;
            };

            mergemine.submit_aux_chain_share(*chain, username, auxwork, &proof);

            if pow::check_proof_of_work(hash, auxwork.bits, auxwork.bias) {
                info!(
                    "GOT AUX CHAIN BLOCK!!! 0x{chain} by {username}: {} {hash}",
                    auxwork.commit
                );
            } else {
                info!(
                    "NEW AUX CHAIN SHARE!!! 0x{chain} by {username}: {} {hash}",
                    auxwork.commit
                );
            }
        }
    }

    if accepted {
        client.send_work = true;
    }

    Ok(accepted)
}

/// Proof material an auxiliary chain needs to verify the share against its
/// own target: a midstate of the block-final transaction up to the
/// commitment, the stable branch placing it in the block, and the mined
/// header fields.
fn build_aux_proof(
    template: &WorkTemplate,
    cb: &Transaction,
    bf: &Transaction,
    header: &Header,
) -> Result<AuxProof, StratumError> {
    let serialized = coinbase::serialize_no_witness(bf);
    if serialized.len() < 40 {
        return Err(StratumError::internal(
            "block-final transaction too small to carry a commitment",
        ));
    }

    // Everything up to the commitment root: the trailing 40 bytes are
    // root ‖ id ‖ lock_time.
    let prefix = &serialized[..serialized.len() - 40];

    let split = prefix.len() - prefix.len() % 64;
    let mut engine = sha256::Hash::engine();
    engine.input(&prefix[..split]);

    let mut leaves = template
        .block
        .txdata
        .iter()
        .map(|tx| tx.compute_txid().to_raw_hash())
        .collect::<Vec<sha256d::Hash>>();
    leaves[0] = cb.compute_txid().to_raw_hash();
    *leaves.last_mut().expect("non-empty") = bf.compute_txid().to_raw_hash();

    Ok(AuxProof {
        midstate_hash: engine.midstate().to_byte_array(),
        midstate_buffer: prefix[split..].to_vec(),
        midstate_length: prefix.len() as u32,
        lock_time: bf.lock_time.to_consensus_u32(),
        aux_branch: merkle::stable_branch(&leaves, leaves.len() - 1),
        num_txns: leaves.len() as u32,
        version: header.version,
        prev_block: header.prev_blockhash,
        time: header.time,
        bits: header.bits,
        nonce: header.nonce,
    })
}

/// Verify a second-stage submission. The share always goes upstream — the
/// aux chain decides its value — while the local proof-of-work check only
/// classifies the log line.
pub(crate) fn submit_second_stage(
    client: &mut StratumClient,
    chain: ChainId,
    work: &SecondStageWork,
    submission: &Submission,
    mergemine: &dyn MergeMine,
) -> bool {
    let Some((username, _)) = client.mmauth.get(&chain) else {
        debug!("Got second stage share for chain we aren't authorized for; unable to submit work");
        return false;
    };
    let username = username.clone();

    let extranonce1 = client.extranonce1(chain.as_bytes());

    mergemine.submit_second_stage_share(
        chain,
        &username,
        work,
        &SecondStageProof {
            extranonce1: extranonce1.to_vec(),
            extranonce2: submission.extranonce2.clone(),
            version: submission.version,
            time: submission.time,
            nonce: submission.nonce,
        },
    );

    let mut coinbase_bin =
        Vec::with_capacity(work.cb1.len() + EXTRANONCE_TOTAL_SIZE + work.cb2.len());
    coinbase_bin.extend_from_slice(&work.cb1);
    coinbase_bin.extend_from_slice(&extranonce1);
    coinbase_bin.extend_from_slice(&submission.extranonce2);
    coinbase_bin.extend_from_slice(&work.cb2);
    let leaf = sha256d::Hash::hash(&coinbase_bin);

    let header = Header {
        version: submission.version,
        prev_blockhash: work.prev_block,
        merkle_root: TxMerkleNode::from_raw_hash(merkle::root_from_branch(
            leaf,
            &work.cb_branch,
            0,
        )),
        time: submission.time,
        bits: work.bits,
        nonce: submission.nonce,
    };

    let hash = header.block_hash();

    let solved = pow::check_proof_of_work(hash, work.bits, 0);
    if solved {
        info!("GOT AUX CHAIN SECOND STAGE BLOCK!!! 0x{chain} by {username}: {hash}");
        client.send_work = true;
    } else {
        info!("NEW AUX CHAIN SECOND STAGE SHARE!!! 0x{chain} by {username}: {hash}");
    }

    solved
}
