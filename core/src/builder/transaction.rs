//! # Challenge Transaction Builder
//!
//! Builds the unsigned transaction that exercises one challenge leaf: one
//! input spending the prior challenge outpoint with the leaf's relative
//! timelock in its sequence field, a main output returning the remaining
//! amount to the tree address, and a zero-value OP_RETURN output carrying
//! the dispute commitment. Signing is delegated to an external
//! collaborator; nothing in this module touches a key.

use crate::block::RollupBlock;
use crate::builder::address::{ChallengeLeaf, ChallengeTree};
use crate::builder::sighash::taproot_script_spend_sighash;
use crate::config::CommitmentSource;
use crate::errors::VigilError;
use crate::sha256_hash;
use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::taproot::{ControlBlock, LeafVersion};
use bitcoin::transaction::Version;
use bitcoin::{
    absolute, Amount, OutPoint, ScriptBuf, Sequence, TapSighash, Transaction, TxIn, TxOut, Witness,
};
use serde::{Deserialize, Serialize};

/// Consensus cap on a standard data-carrier output; longer commitment
/// payloads are truncated, which can legitimately drop the commitment.
pub const MAX_COMMITMENT_PAYLOAD: usize = 80;

/// An unsigned challenge spend, ephemeral within one processing cycle.
/// Re-deriving it from the same inputs yields the same transaction and
/// sighash.
#[derive(Debug, Clone)]
pub struct UnsignedSpend {
    pub step_index: usize,
    pub tx: Transaction,
    pub prevout: TxOut,
    pub sighash: TapSighash,
}

/// Everything except the signature needed to finalize a leaf spend.
#[derive(Debug, Clone)]
pub struct WitnessBundle {
    pub script: ScriptBuf,
    pub control_block: ControlBlock,
    pub leaf_version: LeafVersion,
    pub reveal_preimage: Vec<u8>,
}

/// JSON form of the unsigned bundle, written as the `_challenge.psbt`
/// artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengePsbt {
    pub step: usize,
    pub transaction_hex: String,
    pub sighash: String,
    pub expected_hash: String,
    pub script: String,
    pub script_pubkey: String,
    pub control_block: String,
    pub tapleaf_version: String,
    pub witness: Vec<String>,
}

impl ChallengePsbt {
    pub fn from_parts(spend: &UnsignedSpend, bundle: &WitnessBundle, leaf: &ChallengeLeaf) -> Self {
        Self {
            step: leaf.index,
            transaction_hex: bitcoin::consensus::encode::serialize_hex(&spend.tx),
            sighash: spend.sighash.to_string(),
            expected_hash: hex::encode(leaf.expected_hash),
            script: bundle.script.to_asm_string(),
            script_pubkey: hex::encode(spend.prevout.script_pubkey.as_bytes()),
            control_block: hex::encode(bundle.control_block.serialize()),
            tapleaf_version: "c0".to_string(),
            witness: vec![hex::encode(&bundle.reveal_preimage)],
        }
    }
}

/// Builds the unsigned spend of `prior_outpoint` through the given leaf.
///
/// The input sequence is set to the leaf's timeout so the relative
/// timelock branch stays satisfiable; the main output pays
/// `amount - fee` back to the tree address.
pub fn build_challenge_spend(
    prior_outpoint: OutPoint,
    leaf: &ChallengeLeaf,
    tree: &ChallengeTree,
    amount: Amount,
    fee: Amount,
    commitment_payload: &[u8],
) -> Result<UnsignedSpend, VigilError> {
    if fee >= amount {
        return Err(VigilError::InsufficientAmount {
            amount: amount.to_sat(),
            fee: fee.to_sat(),
        });
    }

    let txin = TxIn {
        previous_output: prior_outpoint,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::from_height(leaf.timeout),
        witness: Witness::default(),
    };
    let txout_main = TxOut {
        value: amount - fee,
        script_pubkey: tree.address().script_pubkey(),
    };
    let txout_commitment = TxOut {
        value: Amount::ZERO,
        script_pubkey: create_commitment_script(commitment_payload),
    };
    let tx = Transaction {
        version: Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: vec![txin],
        output: vec![txout_main, txout_commitment],
    };

    let prevout = TxOut {
        value: amount,
        script_pubkey: tree.address().script_pubkey(),
    };
    let sighash =
        taproot_script_spend_sighash(&tx, std::slice::from_ref(&prevout), &leaf.script_buf(), 0)?;

    Ok(UnsignedSpend {
        step_index: leaf.index,
        tx,
        prevout,
        sighash,
    })
}

/// Packages the leaf's script, control block and reveal preimage. This
/// plus an externally supplied signature is sufficient to finalize and
/// broadcast the spend.
pub fn assemble_witness(
    leaf: &ChallengeLeaf,
    tree: &ChallengeTree,
) -> Result<WitnessBundle, VigilError> {
    let script = leaf.script_buf();
    let control_block = tree.control_block_for(&script)?;

    Ok(WitnessBundle {
        script,
        control_block,
        leaf_version: LeafVersion::TapScript,
        reveal_preimage: leaf.reveal_preimage.clone(),
    })
}

/// OP_RETURN data output, payload truncated to the standardness cap.
pub fn create_commitment_script(payload: &[u8]) -> ScriptBuf {
    let len = payload.len().min(MAX_COMMITMENT_PAYLOAD);
    let mut push_bytes = PushBytesBuf::new();
    push_bytes
        .extend_from_slice(&payload[..len])
        .expect("commitment payload is capped below the push limit");

    Builder::new()
        .push_opcode(OP_RETURN)
        .push_slice(push_bytes)
        .into_script()
}

/// Derives the 32-byte dispute commitment for a block.
pub fn derive_commitment(block: &RollupBlock, source: CommitmentSource) -> [u8; 32] {
    let handles = block.pin_handles();
    let use_handles = matches!(source, CommitmentSource::ContentHandles) && !handles.is_empty();
    if use_handles {
        sha256_hash!(handles.concat().as_bytes())
    } else {
        sha256_hash!(block.step_chain.concat().as_bytes())
    }
}

/// Post-broadcast sanity check: does some data output of the transaction
/// contain the expected commitment hex? Not consensus enforcement; a
/// truncated payload is allowed to drop it.
pub fn verify_commitment_present(outputs: &[TxOut], expected_commitment: &str) -> bool {
    outputs.iter().any(|output| {
        output.script_pubkey.is_op_return()
            && hex::encode(output.script_pubkey.as_bytes()).contains(expected_commitment)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::HashChain;
    use bitcoin::{Network, XOnlyPublicKey};
    use std::str::FromStr;

    fn test_tree() -> ChallengeTree {
        let chain = HashChain::build(b"init", 3);
        let challenger = XOnlyPublicKey::from_str(
            "f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9",
        )
        .expect("valid key");
        let operator = XOnlyPublicKey::from_str(
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        )
        .expect("valid key");
        ChallengeTree::from_chain(
            &chain,
            &[80, 160, 240],
            challenger,
            operator,
            300,
            Network::Regtest,
        )
        .expect("tree builds")
    }

    fn spend_args() -> (OutPoint, Amount, Amount) {
        (
            OutPoint::null(),
            Amount::from_sat(21_000),
            Amount::from_sat(1_000),
        )
    }

    #[test]
    fn fee_must_leave_a_spendable_amount() {
        let tree = test_tree();
        let leaf = &tree.leaves()[0];
        let result = build_challenge_spend(
            OutPoint::null(),
            leaf,
            &tree,
            Amount::from_sat(1_000),
            Amount::from_sat(1_000),
            &[0u8; 32],
        );
        assert!(matches!(
            result,
            Err(VigilError::InsufficientAmount {
                amount: 1_000,
                fee: 1_000
            })
        ));
    }

    #[test]
    fn main_output_is_amount_minus_fee() {
        let tree = test_tree();
        let leaf = &tree.leaves()[1];
        let (outpoint, amount, fee) = spend_args();
        let spend = build_challenge_spend(outpoint, leaf, &tree, amount, fee, &[0u8; 32])
            .expect("spend builds");

        assert_eq!(spend.tx.output[0].value, Amount::from_sat(20_000));
        assert_eq!(
            spend.tx.output[0].script_pubkey,
            tree.address().script_pubkey()
        );
        assert_eq!(spend.tx.output[1].value, Amount::ZERO);
        assert!(spend.tx.output[1].script_pubkey.is_op_return());
        assert_eq!(spend.tx.input[0].sequence, Sequence::from_height(160));
    }

    #[test]
    fn rederiving_the_spend_is_deterministic() {
        let tree = test_tree();
        let leaf = &tree.leaves()[0];
        let (outpoint, amount, fee) = spend_args();
        let a = build_challenge_spend(outpoint, leaf, &tree, amount, fee, b"commitment")
            .expect("spend builds");
        let b = build_challenge_spend(outpoint, leaf, &tree, amount, fee, b"commitment")
            .expect("spend builds");
        assert_eq!(a.tx, b.tx);
        assert_eq!(a.sighash, b.sighash);
    }

    #[test]
    fn witness_bundle_matches_leaf() {
        let tree = test_tree();
        let leaf = &tree.leaves()[2];
        let bundle = assemble_witness(leaf, &tree).expect("member leaf");
        assert_eq!(bundle.script, leaf.script_buf());
        assert_eq!(bundle.reveal_preimage, leaf.reveal_preimage);
        assert_eq!(bundle.leaf_version, LeafVersion::TapScript);
    }

    #[test]
    fn commitment_found_iff_payload_survives_truncation() {
        let commitment = sha256_hash!(b"dispute");
        let hex_commitment = hex::encode(commitment);

        let kept = TxOut {
            value: Amount::ZERO,
            script_pubkey: create_commitment_script(&commitment),
        };
        assert!(verify_commitment_present(
            std::slice::from_ref(&kept),
            &hex_commitment
        ));

        // The commitment sits past the 80-byte cap and is dropped.
        let mut long_payload = vec![0xaa; MAX_COMMITMENT_PAYLOAD];
        long_payload.extend_from_slice(&commitment);
        let truncated = TxOut {
            value: Amount::ZERO,
            script_pubkey: create_commitment_script(&long_payload),
        };
        assert!(!verify_commitment_present(
            std::slice::from_ref(&truncated),
            &hex_commitment
        ));

        // Non-data outputs never match.
        let plain = TxOut {
            value: Amount::from_sat(1),
            script_pubkey: ScriptBuf::new(),
        };
        assert!(!verify_commitment_present(
            std::slice::from_ref(&plain),
            ""
        ));
    }

    #[test]
    fn commitment_source_selects_payload() {
        let mut block = RollupBlock {
            step_chain: HashChain::build(b"init", 2).to_hex_steps(),
            outputs: vec![],
            challenged: true,
            proof_generated: false,
            proof_verified: false,
            ipfs_hash: Some("Qm-handle".to_string()),
            ipfs_hashes: None,
            extra: serde_json::Map::new(),
        };

        let from_handles = derive_commitment(&block, CommitmentSource::ContentHandles);
        assert_eq!(from_handles, sha256_hash!(b"Qm-handle".as_slice()));

        let from_chain = derive_commitment(&block, CommitmentSource::StepChain);
        assert_eq!(
            from_chain,
            sha256_hash!(block.step_chain.concat().as_bytes())
        );

        // Without handles, both sources agree on the step chain.
        block.ipfs_hash = None;
        assert_eq!(
            derive_commitment(&block, CommitmentSource::ContentHandles),
            from_chain
        );
    }
}
