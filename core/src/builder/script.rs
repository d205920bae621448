//! # Script Builder
//!
//! Script builder provides the taproot leaf scripts of the challenge
//! protocol and their witness assembly.

use bitcoin::opcodes::all::*;
use bitcoin::script::Builder;
use bitcoin::secp256k1::schnorr;
use bitcoin::{ScriptBuf, Witness, XOnlyPublicKey};
use std::any::Any;
use std::fmt::Debug;

/// A trait that marks all script types. Each script has a
/// `generate_script_inputs` function that generates the witness for the
/// script using various arguments. A `dyn SpendableScript` is cast into a
/// concrete [`ScriptKind`] to generate a witness; the trait object can be
/// used to generate the script_buf.
///
/// When creating a new script, make sure you add it to the [`ScriptKind`]
/// enum and cover it in the completeness test below. Otherwise, it will
/// not be spendable.
pub trait SpendableScript: Send + Sync + 'static + Any {
    fn as_any(&self) -> &dyn Any;

    fn kind(&self) -> ScriptKind;

    fn to_script_buf(&self) -> ScriptBuf;
}

impl Debug for dyn SpendableScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SpendableScript")
    }
}

/// The reveal-or-timeout leaf for one chain step.
///
/// One two-branch conditional script, not two separate leaves: a
/// challenger holding the preimage claims immediately, the operator
/// reclaims on the same leaf once the relative timelock expires. Because
/// both paths spend the same outpoint, whichever valid witness confirms
/// first settles the step, so a timely reveal always beats a timeout
/// claim.
///
/// Fields: challenger key, expected SHA256 digest (32 bytes), relative
/// timelock in blocks, operator key.
#[derive(Debug, Clone)]
pub struct StepScript(
    pub(crate) XOnlyPublicKey,
    [u8; 32],
    u16,
    pub(crate) XOnlyPublicKey,
);

impl SpendableScript for StepScript {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn kind(&self) -> ScriptKind {
        ScriptKind::Step(self)
    }

    fn to_script_buf(&self) -> ScriptBuf {
        Builder::new()
            .push_x_only_key(&self.0)
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_opcode(OP_SHA256)
            .push_slice(self.1)
            .push_opcode(OP_EQUAL)
            .push_opcode(OP_IF)
            .push_opcode(OP_PUSHNUM_1)
            .push_opcode(OP_ELSE)
            .push_int(self.2 as i64)
            .push_opcode(OP_CSV)
            .push_opcode(OP_DROP)
            .push_x_only_key(&self.3)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ENDIF)
            .into_script()
    }
}

impl StepScript {
    /// Witness for the reveal path. The signature sits on top of the stack
    /// (consumed by the leading CHECKSIGVERIFY), the preimage below it.
    pub fn generate_script_inputs(
        &self,
        preimage: impl AsRef<[u8]>,
        signature: &schnorr::Signature,
    ) -> Witness {
        let mut witness = Witness::new();
        witness.push(preimage.as_ref());
        witness.push(signature.serialize());
        witness
    }

    pub fn new(
        challenger_xonly_pk: XOnlyPublicKey,
        expected_hash: [u8; 32],
        timeout: u16,
        operator_xonly_pk: XOnlyPublicKey,
    ) -> Self {
        Self(challenger_xonly_pk, expected_hash, timeout, operator_xonly_pk)
    }

    pub fn expected_hash(&self) -> [u8; 32] {
        self.1
    }

    pub fn timeout(&self) -> u16 {
        self.2
    }
}

/// Struct for scripts that include a relative timelock (by block count)
/// and a CHECKSIG against the given key. Used as the operator fallback
/// leaf, with a timeout longer than any step's.
///
/// ATTENTION: to spend a UTXO using this script, the condition is that
/// (`# in the script`) ≤ (`# in the sequence of the tx`) ≤ (`# of blocks
/// mined after UTXO appears on the chain`). See:
///
/// - [BIP-0068](https://github.com/bitcoin/bips/blob/master/bip-0068.mediawiki)
/// - [BIP-0112](https://github.com/bitcoin/bips/blob/master/bip-0112.mediawiki)
#[derive(Debug, Clone)]
pub struct TimelockScript(pub(crate) XOnlyPublicKey, u16);

impl SpendableScript for TimelockScript {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn kind(&self) -> ScriptKind {
        ScriptKind::Timelock(self)
    }

    fn to_script_buf(&self) -> ScriptBuf {
        Builder::new()
            .push_int(self.1 as i64)
            .push_opcode(OP_CSV)
            .push_opcode(OP_DROP)
            .push_x_only_key(&self.0)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }
}

impl TimelockScript {
    pub fn generate_script_inputs(&self, signature: &schnorr::Signature) -> Witness {
        Witness::from_slice(&[signature.serialize()])
    }

    pub fn new(xonly_pk: XOnlyPublicKey, block_count: u16) -> Self {
        Self(xonly_pk, block_count)
    }

    pub fn timeout(&self) -> u16 {
        self.1
    }
}

#[derive(Clone)]
pub enum ScriptKind<'a> {
    Step(&'a StepScript),
    Timelock(&'a TimelockScript),
}
