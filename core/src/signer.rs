//! # External Signer Collaborator
//!
//! Contract for whatever produces the challenger's signature, hardware
//! wallet or otherwise. The core treats the signer as opaque; any failure
//! surfaces as `SigningFailed`. An in-process implementation lives in
//! [`crate::actor`].

use crate::builder::transaction::{UnsignedSpend, WitnessBundle};
use crate::errors::VigilError;
use async_trait::async_trait;
use bitcoin::secp256k1::schnorr;
use bitcoin::{TapSighash, Transaction};
use serde::{Deserialize, Serialize};

/// A signed but not yet finalized challenge spend.
#[derive(Debug, Clone)]
pub struct SignedSpend {
    pub tx: Transaction,
    pub sighash: TapSighash,
    pub signature: schnorr::Signature,
    pub bundle: WitnessBundle,
}

impl SignedSpend {
    /// JSON form written as the `_signed.psbt` artifact.
    pub fn export(&self) -> SignedPsbt {
        SignedPsbt {
            transaction_hex: bitcoin::consensus::encode::serialize_hex(&self.tx),
            sighash: self.sighash.to_string(),
            signature: hex::encode(self.signature.serialize()),
            witness: vec![
                hex::encode(&self.bundle.reveal_preimage),
                hex::encode(self.signature.serialize()),
                hex::encode(self.bundle.script.as_bytes()),
                hex::encode(self.bundle.control_block.serialize()),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPsbt {
    pub transaction_hex: String,
    pub sighash: String,
    pub signature: String,
    pub witness: Vec<String>,
}

/// Signs and finalizes challenge spends.
#[async_trait]
pub trait ChallengeSigner: Send + Sync {
    /// Produces a signature over the spend's taproot sighash.
    async fn sign(
        &self,
        spend: &UnsignedSpend,
        bundle: &WitnessBundle,
    ) -> Result<SignedSpend, VigilError>;

    /// Fills the witness stack and serializes the broadcastable
    /// transaction hex.
    async fn finalize(&self, signed: &SignedSpend) -> Result<String, VigilError>;
}
