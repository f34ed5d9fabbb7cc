use super::*;

/// The assembler's placeholder payout script, replaced per miner.
pub fn op_false_script() -> ScriptBuf {
    Builder::new().push_opcode(opcodes::OP_FALSE).into_script()
}

/// Rewrite the coinbase scriptSig as `<height> <extranonce1 ‖ extranonce2>`.
/// The 12 nonce bytes are always the final element, which is what lets the
/// serialized transaction be split around them.
pub fn splice_extranonce(
    cb: &mut Transaction,
    height: u64,
    nonce: &[u8],
) -> Result<(), StratumError> {
    if cb.input.len() != 1 {
        return Err(StratumError::internal(
            "unexpected number of inputs; is this even a coinbase transaction?",
        ));
    }

    if nonce.len() != EXTRANONCE_TOTAL_SIZE {
        return Err(StratumError::internal(format!(
            "unexpected combined nonce length: {} != {EXTRANONCE_TOTAL_SIZE}",
            nonce.len()
        )));
    }

    let height = i64::try_from(height)
        .map_err(|_| StratumError::internal(format!("block height {height} out of range")))?;

    let nonce = PushBytesBuf::try_from(nonce.to_vec()).expect("12 bytes is a valid push");

    cb.input[0].script_sig = Builder::new().push_int(height).push_slice(nonce).into_script();

    Ok(())
}

/// Replace the assembler's placeholder payout with the miner's address.
/// A template whose first output is anything else is left alone.
pub fn apply_payout(cb: &mut Transaction, address: &Address) {
    if let Some(output) = cb.output.first_mut() {
        if output.script_pubkey == op_false_script() {
            output.script_pubkey = address.script_pubkey();
        }
    }
}

/// Serialize a transaction in the legacy (witness-stripped) encoding, the
/// form the miner reassembles from `cb1 ‖ extranonce ‖ cb2`.
pub fn serialize_no_witness(tx: &Transaction) -> Vec<u8> {
    let mut stripped = tx.clone();
    for input in &mut stripped.input {
        input.witness = Witness::default();
    }
    consensus::serialize(&stripped)
}

/// Split the serialized coinbase around the 12-byte extranonce spliced by
/// [`splice_extranonce`]. Offsets are computed, not searched: tx version,
/// input count, outpoint, the scriptSig length prefix, and everything in the
/// scriptSig before the nonce push payload.
pub fn split_coinbase(cb: &Transaction) -> Result<(String, String), StratumError> {
    let script = cb
        .input
        .first()
        .map(|input| input.script_sig.as_bytes())
        .ok_or_else(|| StratumError::internal("coinbase transaction has no input"))?;

    if script.len() < EXTRANONCE_TOTAL_SIZE + 2 {
        return Err(StratumError::internal(
            "coinbase scriptSig does not contain an extranonce field",
        ));
    }

    // The nonce push payload sits at the very end of the scriptSig, behind
    // its one-byte push opcode.
    if script[script.len() - EXTRANONCE_TOTAL_SIZE - 1] != EXTRANONCE_TOTAL_SIZE as u8 {
        return Err(StratumError::internal(
            "coinbase scriptSig does not end with the extranonce push",
        ));
    }

    let bin = serialize_no_witness(cb);

    let offset = 4
        + VarInt(cb.input.len() as u64).size()
        + 36
        + VarInt(script.len() as u64).size()
        + (script.len() - EXTRANONCE_TOTAL_SIZE);

    if bin.len() < offset + EXTRANONCE_TOTAL_SIZE {
        return Err(StratumError::internal(
            "serialized coinbase is too small to be split",
        ));
    }

    Ok((
        hex::encode(&bin[..offset]),
        hex::encode(&bin[offset + EXTRANONCE_TOTAL_SIZE..]),
    ))
}

const WITNESS_COMMITMENT_PREFIX: [u8; 6] = [0x6a, 0x24, 0xaa, 0x21, 0xa9, 0xed];

/// Position of the witness commitment output, if any. The consensus rule
/// honors the last matching output.
pub fn witness_commitment_index(tx: &Transaction) -> Option<usize> {
    tx.output
        .iter()
        .rposition(|output| output.script_pubkey.as_bytes().starts_with(&WITNESS_COMMITMENT_PREFIX))
}

/// Rebuild the witness commitment after the coinbase or block-final
/// transaction mutated, and return the fresh coinbase merkle branch.
///
/// Works on a scratch copy of the template block with `cb`/`bf` substituted:
/// strips any stale commitment outputs, recommits over the block's wtxids,
/// and plants the reserved value in the coinbase input witness.
pub fn update_witness_commitment(
    template: &Block,
    cb: &mut Transaction,
    bf: &mut Transaction,
) -> Result<Vec<sha256d::Hash>, StratumError> {
    let mut block = template.clone();

    *block
        .txdata
        .last_mut()
        .ok_or_else(|| StratumError::internal("block template has no transactions"))? = bf.clone();
    block.txdata[0] = cb.clone();

    while let Some(index) = witness_commitment_index(&block.txdata[0]) {
        block.txdata[0].output.remove(index);
    }

    let witness_root = block
        .witness_root()
        .ok_or_else(|| StratumError::internal("block template has no transactions"))?;

    let reserved = [0u8; 32];
    let commitment = Block::compute_witness_commitment(&witness_root, &reserved);

    let mut script = WITNESS_COMMITMENT_PREFIX.to_vec();
    script.extend_from_slice(commitment.as_byte_array());

    block.txdata[0].output.push(TxOut {
        value: Amount::ZERO,
        script_pubkey: ScriptBuf::from_bytes(script),
    });
    block.txdata[0].input[0].witness = Witness::from_slice(&[&reserved[..]]);

    *cb = block.txdata[0].clone();
    *bf = block.txdata.last().expect("checked above").clone();

    Ok(merkle::coinbase_branch(&block))
}

/// Rewrite the merge-mine commitment in the block-final transaction: the
/// final output becomes `OP_RETURN PUSH36(root ‖ id)`, so the transaction's
/// trailing serialized bytes are `root ‖ id ‖ lock_time`.
pub fn update_merge_mine_commitment(bf: &mut Transaction, root: sha256d::Hash) -> bool {
    let Some(output) = bf.output.last_mut() else {
        return false;
    };

    let mut data = [0u8; 36];
    data[..32].copy_from_slice(root.as_byte_array());
    data[32..].copy_from_slice(&COMMITMENT_ID);

    output.script_pubkey = Builder::new()
        .push_opcode(opcodes::all::OP_RETURN)
        .push_slice(data)
        .into_script();

    true
}

#[cfg(test)]
mod tests {
    use {super::*, pretty_assertions::assert_eq as pretty_assert_eq};

    fn address() -> Address {
        "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
            .parse::<Address<NetworkUnchecked>>()
            .unwrap()
            .assume_checked()
    }

    fn coinbase() -> Transaction {
        Transaction {
            version: transaction::Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(50 * 100_000_000),
                script_pubkey: op_false_script(),
            }],
        }
    }

    fn nonce() -> Vec<u8> {
        (0..EXTRANONCE_TOTAL_SIZE as u8).collect()
    }

    #[test]
    fn splice_and_split_reassemble() {
        let mut cb = coinbase();
        splice_extranonce(&mut cb, 800_000, &nonce()).unwrap();

        let (cb1, cb2) = split_coinbase(&cb).unwrap();

        let mut joined = hex::decode(&cb1).unwrap();
        joined.extend_from_slice(&nonce());
        joined.extend_from_slice(&hex::decode(&cb2).unwrap());

        pretty_assert_eq!(joined, serialize_no_witness(&cb));
    }

    #[test]
    fn split_excludes_nonce_bytes() {
        let mut cb = coinbase();
        splice_extranonce(&mut cb, 800_000, &nonce()).unwrap();

        let (cb1, cb2) = split_coinbase(&cb).unwrap();
        let needle = hex::encode(nonce());

        assert!(!cb1.contains(&needle));
        assert!(!cb2.contains(&needle));
    }

    #[test]
    fn splice_rejects_short_nonce() {
        let mut cb = coinbase();
        assert!(splice_extranonce(&mut cb, 100, &[0u8; 8]).is_err());
    }

    #[test]
    fn splice_rejects_multi_input_transaction() {
        let mut cb = coinbase();
        cb.input.push(cb.input[0].clone());
        assert!(splice_extranonce(&mut cb, 100, &nonce()).is_err());
    }

    #[test]
    fn split_requires_spliced_script() {
        assert!(split_coinbase(&coinbase()).is_err());
    }

    #[test]
    fn payout_replaces_only_placeholder() {
        let mut cb = coinbase();
        apply_payout(&mut cb, &address());
        assert_eq!(cb.output[0].script_pubkey, address().script_pubkey());

        // A second application leaves the real payout alone.
        let other = "bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3"
            .parse::<Address<NetworkUnchecked>>()
            .unwrap()
            .assume_checked();
        apply_payout(&mut cb, &other);
        assert_eq!(cb.output[0].script_pubkey, address().script_pubkey());
    }

    #[test]
    fn witness_serialization_is_stripped() {
        let mut cb = coinbase();
        cb.input[0].witness = Witness::from_slice(&[&[0u8; 32][..]]);

        let stripped = serialize_no_witness(&cb);
        assert!(stripped.len() < consensus::serialize(&cb).len());
        assert_eq!(stripped[4], 1, "legacy encoding starts the input count at byte 4");
    }

    #[test]
    fn merge_mine_commitment_is_the_serialized_tail() {
        let mut bf = coinbase();
        let root = sha256d::Hash::from_byte_array([0x42; 32]);

        assert!(update_merge_mine_commitment(&mut bf, root));

        let bin = serialize_no_witness(&bf);
        let tail = &bin[bin.len() - 40..];
        assert_eq!(&tail[..32], root.as_byte_array());
        assert_eq!(&tail[32..36], &COMMITMENT_ID);
        assert_eq!(&tail[36..], &0u32.to_le_bytes());
    }

    #[test]
    fn merge_mine_commitment_requires_outputs() {
        let mut bf = coinbase();
        bf.output.clear();
        assert!(!update_merge_mine_commitment(
            &mut bf,
            sha256d::Hash::all_zeros()
        ));
    }

    #[test]
    fn witness_commitment_regenerates() {
        let mut cb = coinbase();
        splice_extranonce(&mut cb, 100, &nonce()).unwrap();

        let block = Block {
            header: Header {
                version: block::Version::from_consensus(0x2000_0000),
                prev_blockhash: BlockHash::all_zeros(),
                merkle_root: TxMerkleNode::all_zeros(),
                time: 0,
                bits: CompactTarget::from_consensus(0x207f_ffff),
                nonce: 0,
            },
            txdata: vec![cb.clone()],
        };

        let mut bf = cb.clone();
        let branch = update_witness_commitment(&block, &mut cb, &mut bf).unwrap();

        assert!(branch.is_empty(), "single-transaction block has no branch");
        let index = witness_commitment_index(&cb).expect("commitment output added");
        assert_eq!(cb.output[index].value, Amount::ZERO);
        assert_eq!(cb.input[0].witness.len(), 1, "reserved value planted");

        // Mutating the coinbase and recommitting replaces, not appends.
        let before = cb.output.len();
        let mut bf = cb.clone();
        update_witness_commitment(&block, &mut cb, &mut bf).unwrap();
        assert_eq!(cb.output.len(), before);
    }
}
