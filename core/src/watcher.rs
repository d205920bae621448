//! # Challenge Watcher
//!
//! The polling state machine that turns a stored block's `challenged`
//! flag into proof artifacts, an unsigned challenge spend and a
//! commitment-bearing log entry.
//!
//! Per block the states are `UNCHALLENGED → CHALLENGED_PENDING_PROOF →
//! PROOF_GENERATED → SIGNED_BROADCAST`, where the last transition is
//! keyed on the `_log.json` artifact. One tick processes every eligible
//! block sequentially; failures are attributed per block id and never
//! abort the rest of the tick. The spend stage re-derives
//! deterministically, so retrying a failed block on a later tick is
//! idempotent.

use crate::block::{BlockId, RollupBlock};
use crate::builder::address::{build_timeout_schedule, ChallengeTree};
use crate::builder::transaction::{
    assemble_witness, build_challenge_spend, derive_commitment, verify_commitment_present,
    ChallengePsbt,
};
use crate::chain::HashChain;
use crate::config::VigilConfig;
use crate::database::{self, Database};
use crate::errors::VigilError;
use crate::extended_rpc::BitcoinRpc;
use crate::signer::ChallengeSigner;
use crate::task::Task;
use async_trait::async_trait;
use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// The `_proof.json` artifact: the chain as committed plus the recorded
/// verification outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofExport {
    pub proof_steps: Vec<String>,
    pub verified: bool,
}

/// The `_log.json` artifact written once a challenge resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeLog {
    pub ipfs_hash: String,
    pub txid: String,
    pub commitment: String,
    pub sighash: String,
    pub timestamp: f64,
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Watches the block store for challenged-but-unresolved blocks and
/// drives each through proof generation, signing and broadcast.
///
/// The watcher never deletes or reorders blocks; it only flips the two
/// proof flags and writes derived artifacts addressed by block id.
pub struct ChallengeWatcher {
    config: VigilConfig,
    db: Database,
    rpc: Arc<dyn BitcoinRpc>,
    signer: Arc<dyn ChallengeSigner>,
}

impl ChallengeWatcher {
    pub fn new(
        config: VigilConfig,
        db: Database,
        rpc: Arc<dyn BitcoinRpc>,
        signer: Arc<dyn ChallengeSigner>,
    ) -> Self {
        Self {
            config,
            db,
            rpc,
            signer,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Logs the UTXO count of every address mentioned in stored block
    /// outputs. Startup convenience, not part of the challenge pipeline.
    pub async fn refresh_utxo_state(&self) -> Result<(), VigilError> {
        let mut tracked = BTreeSet::new();
        for id in self.db.list()? {
            let block = match self.db.get(&id) {
                Ok(block) => block,
                Err(e) => {
                    tracing::warn!(block = %id, error = %e, "skipping unreadable block");
                    continue;
                }
            };
            for output in &block.outputs {
                tracked.insert(output.address.clone());
            }
        }

        tracing::info!("auto-updating UTXO state for {} address(es)", tracked.len());
        for addr in tracked {
            let address = match addr
                .parse::<Address<NetworkUnchecked>>()
                .map_err(VigilError::from)
                .and_then(|a| a.require_network(self.config.network).map_err(Into::into))
            {
                Ok(address) => address,
                Err(e) => {
                    tracing::warn!(address = %addr, error = %e, "not a valid address for this network");
                    continue;
                }
            };
            match self.rpc.list_unspent(&address).await {
                Ok(utxos) => tracing::info!(address = %addr, "{} UTXO(s)", utxos.len()),
                Err(e) => tracing::warn!(address = %addr, error = %e, "UTXO fetch failed"),
            }
        }

        Ok(())
    }

    /// Runs one block through the pipeline. Returns whether any state was
    /// advanced this call.
    async fn process_challenge(
        &self,
        id: &BlockId,
        mut block: RollupBlock,
    ) -> Result<bool, VigilError> {
        let chain = HashChain::from_hex_steps(&block.step_chain);

        let mut advanced = false;
        if !block.proof_generated {
            tracing::info!(block = %id, "processing challenge");
            // Verification failing is a recorded terminal outcome, not an
            // error; a chain too short to commit anything is recorded the
            // same way since its content can never change.
            let verified = match &chain {
                Ok(chain) => chain.verify(),
                Err(e) => {
                    tracing::info!(block = %id, error = %e, "malformed step chain recorded as invalid");
                    false
                }
            };
            block.proof_verified = verified;
            block.proof_generated = true;
            self.db.put(&block, Some(id.clone())).await?;
            self.db.write_artifact(
                id,
                database::PROOF_SUFFIX,
                &ProofExport {
                    proof_steps: block.step_chain.clone(),
                    verified,
                },
            )?;
            tracing::info!(block = %id, verified, "proof recorded");
            advanced = true;
        }

        let chain = match chain {
            Ok(chain) => chain,
            // Nothing spendable can be derived from a malformed chain;
            // the recorded proof is this block's final state.
            Err(e) => {
                tracing::debug!(block = %id, error = %e, "no challenge spend derivable");
                return Ok(advanced);
            }
        };

        // Failures past this point leave the block at PROOF_GENERATED;
        // the spend re-derives deterministically on the next tick.
        match self.drive_challenge_spend(id, &block, &chain).await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(block = %id, error = %e, "challenge spend failed; will retry next tick");
                Ok(advanced)
            }
        }
    }

    async fn drive_challenge_spend(
        &self,
        id: &BlockId,
        block: &RollupBlock,
        chain: &HashChain,
    ) -> Result<(), VigilError> {
        let schedule = build_timeout_schedule(chain.steps(), self.config.step_timeout_interval);
        let tree = ChallengeTree::from_chain(
            chain,
            &schedule,
            self.config.challenger_xonly_pk,
            self.config.operator_xonly_pk,
            self.config.fallback_timeout,
            self.config.network,
        )?;
        self.db
            .write_artifact(id, database::TREE_SUFFIX, &tree.export())?;

        // One spend at one outpoint settles the dispute, so the first
        // step leaf is always the one exercised.
        let leaf = tree
            .leaves()
            .first()
            .ok_or_else(|| VigilError::MalformedChain("chain commits no steps".to_string()))?;

        let utxos = self.rpc.list_unspent(tree.address()).await?;
        let utxo = utxos
            .first()
            .ok_or_else(|| VigilError::NoSpendableUtxo(tree.address().to_string()))?;

        let commitment = derive_commitment(block, self.config.commitment_source);
        let spend = build_challenge_spend(
            utxo.outpoint,
            leaf,
            &tree,
            utxo.amount,
            Amount::from_sat(self.config.challenge_fee_sats),
            &commitment,
        )?;
        let bundle = assemble_witness(leaf, &tree)?;
        self.db.write_artifact(
            id,
            database::CHALLENGE_PSBT_SUFFIX,
            &ChallengePsbt::from_parts(&spend, &bundle, leaf),
        )?;

        let signed = self.signer.sign(&spend, &bundle).await?;
        self.db
            .write_artifact(id, database::SIGNED_PSBT_SUFFIX, &signed.export())?;
        let tx_hex = self.signer.finalize(&signed).await?;
        self.db.write_final_tx(id, &tx_hex)?;

        let txid = self
            .rpc
            .send_raw_transaction(&tx_hex)
            .await
            .map_err(|e| VigilError::BroadcastFailed(e.to_string()))?;
        tracing::info!(block = %id, %txid, "challenge transaction broadcast");

        let commitment_hex = hex::encode(commitment);
        let outputs = self.rpc.get_transaction_outputs(&txid).await?;
        if verify_commitment_present(&outputs, &commitment_hex) {
            tracing::info!(block = %id, "OP_RETURN commitment found in tx output");
        } else {
            tracing::warn!(block = %id, "OP_RETURN commitment NOT found in tx outputs");
        }

        let log = ChallengeLog {
            ipfs_hash: block
                .pin_handles()
                .first()
                .cloned()
                .unwrap_or_else(|| "N/A".to_string()),
            txid: txid.to_string(),
            commitment: commitment_hex,
            sighash: spend.sighash.to_string(),
            timestamp: unix_now(),
        };
        self.db.write_artifact(id, database::LOG_SUFFIX, &log)?;
        tracing::info!(block = %id, "challenge resolved");

        Ok(())
    }
}

#[async_trait]
impl Task for ChallengeWatcher {
    type Output = bool;

    /// One poll tick: process every challenged, unresolved block. Returns
    /// whether any block advanced, so the polling driver only sleeps on
    /// idle ticks.
    async fn run_once(&mut self) -> Result<bool, VigilError> {
        let ids = self.db.list()?;
        let mut did_work = false;

        for id in ids {
            let block = match self.db.get(&id) {
                Ok(block) => block,
                Err(e) => {
                    tracing::warn!(block = %id, error = %e, "skipping unreadable block");
                    continue;
                }
            };
            if !block.challenged || self.db.artifact_exists(&id, database::LOG_SUFFIX) {
                continue;
            }
            match self.process_challenge(&id, block).await {
                Ok(advanced) => did_work |= advanced,
                Err(e) => {
                    tracing::warn!(block = %id, error = %e, "proof stage failed; will retry next tick");
                }
            }
        }

        Ok(did_work)
    }
}
