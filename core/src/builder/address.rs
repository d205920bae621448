//! # Challenge Tree Builder
//!
//! Assembles the per-step leaves and the operator fallback leaf into one
//! taproot script tree and derives the output key and address the
//! challenge flow pays to.

use crate::builder::script::{SpendableScript, StepScript, TimelockScript};
use crate::chain::HashChain;
use crate::errors::VigilError;
use crate::utils;
use bitcoin::taproot::{ControlBlock, LeafVersion, TaprootBuilder, TaprootSpendInfo};
use bitcoin::{Address, ScriptBuf};
use secp256k1::XOnlyPublicKey;
use serde::{Deserialize, Serialize};

/// Creates a taproot address with either key path spend or script spend
/// path addresses. This depends on given arguments.
///
/// # Arguments
///
/// - `scripts`: If empty, script will be key path spend
/// - `internal_key`: If not given, will be defaulted to an unspendable
///   x-only public key
/// - `network`: Bitcoin network
///
/// # Returns
///
/// - [`Address`]: Generated taproot address
/// - [`TaprootSpendInfo`]: Taproot spending information
pub fn create_taproot_address(
    scripts: &[ScriptBuf],
    internal_key: Option<XOnlyPublicKey>,
    network: bitcoin::Network,
) -> Result<(Address, TaprootSpendInfo), VigilError> {
    let n = scripts.len();

    let taproot_builder = if n == 0 {
        TaprootBuilder::new()
    } else if n > 1 {
        let m: u8 = ((n - 1).ilog2() + 1) as u8; // m = ceil(log(n))
        let k = 2_usize.pow(m.into()) - n;
        (0..n).try_fold(TaprootBuilder::new(), |acc, i| {
            acc.add_leaf(m - ((i >= n - k) as u8), scripts[i].clone())
        })
        .map_err(|_| VigilError::TaprootBuilder)?
    } else {
        TaprootBuilder::new()
            .add_leaf(0, scripts[0].clone())
            .map_err(|_| VigilError::TaprootBuilder)?
    };

    let internal_key = internal_key.unwrap_or(*utils::UNSPENDABLE_XONLY_PUBKEY);
    let tree_info = taproot_builder
        .finalize(&utils::SECP, internal_key)
        .map_err(|_| VigilError::TaprootBuilder)?;
    let taproot_address = Address::p2tr(
        &utils::SECP,
        internal_key,
        tree_info.merkle_root(),
        network,
    );

    Ok((taproot_address, tree_info))
}

/// Per-step relative locktimes, `interval` blocks apart so later steps
/// always time out after earlier ones.
pub fn build_timeout_schedule(steps: usize, interval: u16) -> Vec<u16> {
    (1..=steps as u16).map(|i| interval.saturating_mul(i)).collect()
}

/// One challenge leaf: the step script plus the witness data needed to
/// exercise its reveal path. Owned by the [`ChallengeTree`] that created
/// it.
#[derive(Debug, Clone)]
pub struct ChallengeLeaf {
    pub index: usize,
    pub timeout: u16,
    pub expected_hash: [u8; 32],
    pub reveal_preimage: Vec<u8>,
    script: StepScript,
}

impl ChallengeLeaf {
    pub fn script(&self) -> &StepScript {
        &self.script
    }

    pub fn script_buf(&self) -> ScriptBuf {
        self.script.to_script_buf()
    }
}

/// Human-readable descriptor of one step leaf, exported alongside the
/// other challenge artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafDescriptor {
    pub name: String,
    pub script: String,
    pub tapleaf_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeExport {
    pub tapleaf_tree: Vec<LeafDescriptor>,
}

/// The assembled challenge script tree: the operator fallback leaf
/// followed by one leaf per chain step, finalized against the operator's
/// internal key.
///
/// Construction is deterministic for a given leaf set and order; the
/// derived address is consensus-critical.
#[derive(Debug, Clone)]
pub struct ChallengeTree {
    leaves: Vec<ChallengeLeaf>,
    fallback: TimelockScript,
    spend_info: TaprootSpendInfo,
    address: Address,
}

impl ChallengeTree {
    /// Derives all leaves from a chain and its timeout schedule.
    ///
    /// Step `i` commits to the pair `(chain[i], chain[i+1])`: the witness
    /// must reveal `chain[i]`, whose SHA256 is the expected digest
    /// `chain[i+1]`. A chain of `n + 1` elements therefore yields `n` step
    /// leaves, plus the fallback.
    pub fn from_chain(
        chain: &HashChain,
        schedule: &[u16],
        challenger_xonly_pk: XOnlyPublicKey,
        operator_xonly_pk: XOnlyPublicKey,
        fallback_timeout: u16,
        network: bitcoin::Network,
    ) -> Result<Self, VigilError> {
        chain.validate()?;
        if schedule.len() != chain.steps() {
            return Err(VigilError::TimeoutScheduleMismatch {
                expected: chain.steps(),
                got: schedule.len(),
            });
        }
        if schedule.iter().any(|timeout| *timeout == 0) {
            return Err(VigilError::ConfigError(
                "step timeouts must be positive relative locktimes".to_string(),
            ));
        }
        if let Some(max_step) = schedule.iter().max() {
            if fallback_timeout <= *max_step {
                return Err(VigilError::ConfigError(format!(
                    "fallback timeout {} does not outlast the last step timeout {}",
                    fallback_timeout, max_step
                )));
            }
        }

        let elements = chain.elements();
        let leaves = (0..chain.steps())
            .map(|i| {
                let expected_hash: [u8; 32] =
                    elements[i + 1].as_slice().try_into().map_err(|_| {
                        VigilError::MalformedChain(format!(
                            "element {} is not a 32-byte digest",
                            i + 1
                        ))
                    })?;
                Ok(ChallengeLeaf {
                    index: i,
                    timeout: schedule[i],
                    expected_hash,
                    reveal_preimage: elements[i].clone(),
                    script: StepScript::new(
                        challenger_xonly_pk,
                        expected_hash,
                        schedule[i],
                        operator_xonly_pk,
                    ),
                })
            })
            .collect::<Result<Vec<_>, VigilError>>()?;

        let fallback = TimelockScript::new(operator_xonly_pk, fallback_timeout);

        let mut scripts = Vec::with_capacity(leaves.len() + 1);
        scripts.push(fallback.to_script_buf());
        scripts.extend(leaves.iter().map(|leaf| leaf.script_buf()));

        let (address, spend_info) =
            create_taproot_address(&scripts, Some(operator_xonly_pk), network)?;

        Ok(Self {
            leaves,
            fallback,
            spend_info,
            address,
        })
    }

    pub fn leaves(&self) -> &[ChallengeLeaf] {
        &self.leaves
    }

    pub fn fallback(&self) -> &TimelockScript {
        &self.fallback
    }

    /// Total leaf count, fallback included.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len() + 1
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn output_key(&self) -> XOnlyPublicKey {
        self.spend_info.output_key().to_inner()
    }

    /// Control block proving the given script is a member leaf. Lookup is
    /// keyed by the canonical script encoding, not object identity.
    pub fn control_block_for(&self, script: &ScriptBuf) -> Result<ControlBlock, VigilError> {
        self.spend_info
            .control_block(&(script.clone(), LeafVersion::TapScript))
            .ok_or(VigilError::ScriptNotFound)
    }

    /// Step-leaf descriptors for the `_tree.json` artifact.
    pub fn export(&self) -> TreeExport {
        TreeExport {
            tapleaf_tree: self
                .leaves
                .iter()
                .map(|leaf| LeafDescriptor {
                    name: format!("step_{}", leaf.index),
                    script: leaf.script_buf().to_asm_string(),
                    tapleaf_version: "c0".to_string(),
                })
                .collect(),
        }
    }
}
