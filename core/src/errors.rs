//! # Errors
//!
//! This module defines errors, returned by the library.

use thiserror::Error;

/// Errors returned by the prover/watcher.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VigilError {
    /// Returned when a hash chain cannot be decoded or is too short to
    /// carry a commitment.
    #[error("Hash chain is malformed: {0}")]
    MalformedChain(String),
    /// Returned when a stored block record fails boundary validation.
    #[error("Rollup block record is malformed: {0}")]
    MalformedBlock(String),
    /// Returned when a block id is not present in the store.
    #[error("Rollup block {0} not found in store")]
    BlockNotFound(String),
    /// Returned when a control block is requested for a script that is not
    /// a member leaf of the challenge tree.
    #[error("Script is not a member leaf of the challenge tree")]
    ScriptNotFound,
    /// Returned when the fee does not leave a spendable main output.
    #[error("Fee of {fee} sats does not leave a spendable amount out of {amount} sats")]
    InsufficientAmount { amount: u64, fee: u64 },
    /// Returned when the external signer collaborator fails.
    #[error("External signer failed: {0}")]
    SigningFailed(String),
    /// Returned when the node collaborator rejects a raw transaction.
    #[error("Transaction broadcast failed: {0}")]
    BroadcastFailed(String),
    /// Returned when fetched content disagrees with the requested handle.
    /// Recoverable: callers log it and keep the fetched content.
    #[error("Fetched content hash {actual} disagrees with requested handle {expected}")]
    CommitmentMismatch { expected: String, actual: String },
    /// Returned by the pin collaborator. Best-effort: the store logs it and
    /// never lets it block local persistence.
    #[error("External pin request failed: {0}")]
    PinFailed(String),
    /// Returned when no UTXO is available on the challenge address.
    #[error("No spendable UTXO on challenge address {0}")]
    NoSpendableUtxo(String),
    /// Returned when the timeout schedule does not line up with the chain.
    #[error("Timeout schedule has {got} entries but the chain has {expected} steps")]
    TimeoutScheduleMismatch { expected: usize, got: usize },
    /// TaprootBuilderError is returned when the taproot builder returns an
    /// error. Errors if the leaves are not provided in DFS walk order.
    #[error("TaprootBuilderError")]
    TaprootBuilder,
    /// ConfigError is returned when the configuration is invalid.
    #[error("ConfigError: {0}")]
    ConfigError(String),

    #[error("BitcoinSighashTaprootError: {0}")]
    BitcoinSighashTaproot(#[from] bitcoin::sighash::TaprootError),
    #[error("BitcoinCoreRPCError: {0}")]
    BitcoinRpc(#[from] bitcoincore_rpc::Error),
    #[error("BitcoinAddressParseError: {0}")]
    BitcoinAddressParse(#[from] bitcoin::address::ParseError),
    #[error("Secp256k1 returned an error: {0}")]
    Secp256k1(#[from] bitcoin::secp256k1::Error),
    #[error("Error while de/serializing object: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
}
