use super::*;

/// The merkle-map root over a set of aux commitments. The map supports any
/// number of entries, but proof generation for arbitrary trees does not
/// exist yet, so more than one commitment is refused outright.
pub(crate) fn aux_work_merkle_root(
    mmwork: &BTreeMap<ChainId, AuxWork>,
) -> Result<sha256d::Hash, StratumError> {
    // Nothing to commit to: the zero hash is as good as any other value.
    if mmwork.is_empty() {
        return Ok(sha256d::Hash::all_zeros());
    }

    if mmwork.len() != 1 {
        return Err(StratumError::internal(
            "more than one merge-mining commitment is not supported",
        ));
    }

    let (chain, work) = mmwork.iter().next().expect("exactly one entry");

    let mut invalid = false;
    Ok(merkle::map_root_from_branch(
        work.commit,
        &[],
        chain.as_bytes(),
        &mut invalid,
    ))
}

/// Generate the full work-unit message sequence for one client: an optional
/// `mining.set_extranonce`, then `mining.set_difficulty`, then
/// `mining.notify`, in that order.
pub(crate) fn generate(
    templates: &mut TemplateStore,
    second_stages: &mut HashMap<String, (ChainId, SecondStageWork)>,
    client: &mut StratumClient,
    node: &dyn Node,
    mergemine: &dyn MergeMine,
) -> Result<Vec<String>, StratumError> {
    node.ready().map_err(|status| match status {
        NodeStatus::NotConnected => StratumError::NotConnected,
        NodeStatus::InitialBlockDownload => StratumError::InitialDownload,
    })?;

    if !client.authorized {
        return Err(StratumError::Unauthorized);
    }

    let hint = client.last_second_stage.map(|(chain, _)| chain);
    if let Some((chain, work)) = mergemine.get_second_stage_work(hint) {
        return Ok(second_stage_unit(second_stages, client, chain, work));
    }

    // No second stage pending anywhere: forget the old units.
    client.last_second_stage = None;
    second_stages.clear();

    let (template, refreshed) = templates.maybe_refresh(node, now_secs())?;
    if refreshed {
        client.evict_merge_mine_work(now_millis());
    }

    customize(client, &template, node, mergemine)
}

fn set_extranonce_line(client: &mut StratumClient, context: &[u8; 32]) -> String {
    let params = SetExtranonce {
        extranonce1: Extranonce::from_bytes(&client.extranonce1(context)),
        extranonce2_size: EXTRANONCE2_SIZE as u32,
    };

    Message::Request {
        id: Id::Number(client.next_id()),
        method: "mining.set_extranonce".into(),
        params: json!(params),
    }
    .to_line()
}

fn set_difficulty_line(client: &mut StratumClient, difficulty: f64) -> String {
    Message::Request {
        id: Id::Number(client.next_id()),
        method: "mining.set_difficulty".into(),
        params: json!(SetDifficulty(difficulty)),
    }
    .to_line()
}

fn notify_line(client: &mut StratumClient, notify: Notify) -> String {
    Message::Request {
        id: Id::Number(client.next_id()),
        method: "mining.notify".into(),
        params: json!(notify),
    }
    .to_line()
}

/// Deliver an externally supplied second-stage unit as-is, recording it for
/// the eventual submit.
fn second_stage_unit(
    second_stages: &mut HashMap<String, (ChainId, SecondStageWork)>,
    client: &mut StratumClient,
    chain: ChainId,
    work: SecondStageWork,
) -> Vec<String> {
    let mut lines = Vec::new();

    if client.supports_extranonce {
        // Keyed by the chain id, not the job string.
        lines.push(set_extranonce_line(client, chain.as_bytes()));
    }

    let difficulty = client.clamp_difficulty(work.difficulty);
    lines.push(set_difficulty_line(client, difficulty));

    let clean_jobs = client.last_second_stage != Some((chain, work.prev_block));

    let notify = Notify {
        job: format!(":{}", work.job_id),
        prev_hash: PrevHash::from(work.prev_block),
        coinb1: hex::encode(&work.cb1),
        coinb2: hex::encode(&work.cb2),
        merkle_branches: work.cb_branch.iter().copied().map(MerkleNode::from).collect(),
        version: Version::from(work.version),
        nbits: Nbits::from(work.bits),
        ntime: Ntime::from(work.time),
        clean_jobs,
    };
    lines.push(notify_line(client, notify));

    client.last_second_stage = Some((chain, work.prev_block));
    second_stages.insert(work.job_id.clone(), (chain, work));

    lines
}

/// Customize an immutable template for one client and render the notify
/// bundle.
fn customize(
    client: &mut StratumClient,
    template: &WorkTemplate,
    node: &dyn Node,
    mergemine: &dyn MergeMine,
) -> Result<Vec<String>, StratumError> {
    let mut cb = template
        .block
        .txdata
        .first()
        .cloned()
        .ok_or_else(|| StratumError::internal("no transactions in block template"))?;
    let mut bf = template
        .block
        .txdata
        .last()
        .cloned()
        .expect("non-empty checked above");

    // First customization: the merge-mine commitment, which needs a
    // block-final transaction to live in.
    let mut has_merge_mining = false;
    let mut mmroot = sha256d::Hash::all_zeros();

    if template.has_block_final_tx {
        let mmwork = mergemine.get_merge_mine_work(&client.mmauth);
        if mmwork.is_empty() {
            debug!(
                "No auxiliary work commitments to add to block template for {}",
                client.peer
            );
        } else {
            mmroot = aux_work_merkle_root(&mmwork)?;
            client
                .mmwork
                .entry(mmroot)
                .or_insert_with(|| (now_millis(), mmwork));
            if coinbase::update_merge_mine_commitment(&mut bf, mmroot) {
                debug!("Updated merge-mining commitment in block-final transaction");
                has_merge_mining = true;
            }
        }
    } else if !client.mmauth.is_empty() {
        debug!(
            "Cannot add merge-mining commitments to block template for {}: no block-final transaction",
            client.peer
        );
    }

    let mut cb_branch = template.cb_branch.clone();
    if template.is_witness_enabled {
        cb_branch = coinbase::update_witness_commitment(&template.block, &mut cb, &mut bf)?;
        debug!("Updated segwit commitment in coinbase");
    }

    let difficulty = client.clamp_difficulty(pow::difficulty(template.block.header.bits));

    let mut nonce = client.extranonce1(template.job_id.as_bytes()).to_vec();
    nonce.extend_from_slice(&[0u8; EXTRANONCE2_SIZE]);
    coinbase::splice_extranonce(&mut cb, template.height, &nonce)?;

    if let Some(address) = &client.address {
        coinbase::apply_payout(&mut cb, address);
    }

    let (cb1, cb2) = coinbase::split_coinbase(&cb)?;

    let mut header = template.block.header;
    let delta = node.update_time(&mut header);
    debug!("Updated the timestamp of block template by {delta} seconds");

    let job = if has_merge_mining {
        format!("{}:{}", template.job_id, MerkleNode::from(mmroot))
    } else {
        template.job_id.to_string()
    };

    let clean_jobs = client.last_tip != Some(template.tip);
    client.last_tip = Some(template.tip);

    let mut lines = Vec::new();

    if client.supports_extranonce {
        lines.push(set_extranonce_line(client, template.job_id.as_bytes()));
    }

    lines.push(set_difficulty_line(client, difficulty));

    let notify = Notify {
        job,
        prev_hash: PrevHash::from(header.prev_blockhash),
        coinb1: cb1,
        coinb2: cb2,
        merkle_branches: cb_branch.into_iter().map(MerkleNode::from).collect(),
        version: Version::from(header.version),
        nbits: Nbits::from(header.bits),
        ntime: Ntime::from(header.time),
        clean_jobs,
    };
    lines.push(notify_line(client, notify));

    Ok(lines)
}
