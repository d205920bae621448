use crate::errors::VigilError;
use bitcoin::sighash::SighashCache;
use bitcoin::taproot::LeafVersion;
use bitcoin::{TapLeafHash, TapSighash, TapSighashType, Transaction, TxOut};

/// Taproot script-path signature hash for one input of a challenge
/// transaction. Binds the signature to this exact transaction, input and
/// leaf script.
pub fn taproot_script_spend_sighash(
    tx: &Transaction,
    prevouts: &[TxOut],
    spend_script: &bitcoin::Script,
    txin_index: usize,
) -> Result<TapSighash, VigilError> {
    let mut sighash_cache: SighashCache<&Transaction> = SighashCache::new(tx);

    let leaf_hash = TapLeafHash::from_script(spend_script, LeafVersion::TapScript);
    let sig_hash = sighash_cache.taproot_script_spend_signature_hash(
        txin_index,
        &bitcoin::sighash::Prevouts::All(prevouts),
        leaf_hash,
        TapSighashType::Default,
    )?;

    Ok(sig_hash)
}
