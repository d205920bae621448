//! # Punishment Transactions
//!
//! A minimal two-output penalty transaction keyed by the punished
//! outpoint, independent of the chain-challenge flow but signed and
//! broadcast through the same collaborator contracts.

use crate::database::Database;
use crate::errors::VigilError;
use crate::extended_rpc::BitcoinRpc;
use bitcoin::transaction::Version;
use bitcoin::{
    absolute, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use serde::{Deserialize, Serialize};

/// Builds the unsigned penalty transaction: one input spending the
/// punished outpoint, 90% of the amount to the recipient as bounty and
/// the remaining 10% alongside it.
pub fn create_punishment_tx(
    punished_outpoint: OutPoint,
    amount: Amount,
    recipient_script: &ScriptBuf,
) -> Result<Transaction, VigilError> {
    let total = amount.to_sat();
    let bounty = total / 10 * 9;
    let remainder = total - bounty;
    if bounty == 0 || remainder == 0 {
        return Err(VigilError::InsufficientAmount {
            amount: total,
            fee: 0,
        });
    }

    Ok(Transaction {
        version: Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: punished_outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::default(),
        }],
        output: vec![
            TxOut {
                value: Amount::from_sat(bounty),
                script_pubkey: recipient_script.clone(),
            },
            TxOut {
                value: Amount::from_sat(remainder),
                script_pubkey: recipient_script.clone(),
            },
        ],
    })
}

/// A persisted penalty record, keyed by the punished outpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PunishmentRecord {
    pub punished_outpoint: OutPoint,
    pub amount_sats: u64,
    pub transaction_hex: String,
}

impl PunishmentRecord {
    pub fn new(
        punished_outpoint: OutPoint,
        amount: Amount,
        recipient_script: &ScriptBuf,
    ) -> Result<Self, VigilError> {
        let tx = create_punishment_tx(punished_outpoint, amount, recipient_script)?;

        Ok(Self {
            punished_outpoint,
            amount_sats: amount.to_sat(),
            transaction_hex: bitcoin::consensus::encode::serialize_hex(&tx),
        })
    }

    pub fn file_name(&self) -> String {
        format!("punishment_{}.json", self.punished_outpoint.txid)
    }

    pub fn persist(&self, db: &Database) -> Result<(), VigilError> {
        db.write_named_artifact(&self.file_name(), self)
    }
}

/// Broadcasts an externally signed penalty transaction.
pub async fn broadcast_punishment(
    rpc: &dyn BitcoinRpc,
    signed_tx_hex: &str,
) -> Result<Txid, VigilError> {
    rpc.send_raw_transaction(signed_tx_hex)
        .await
        .map_err(|e| VigilError::BroadcastFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use tempfile::TempDir;

    fn recipient() -> ScriptBuf {
        ScriptBuf::from_hex("51").expect("valid hex")
    }

    fn outpoint() -> OutPoint {
        OutPoint {
            txid: Txid::all_zeros(),
            vout: 1,
        }
    }

    #[test]
    fn split_is_ninety_ten() {
        let tx = create_punishment_tx(outpoint(), Amount::from_sat(21_000), &recipient())
            .expect("builds");
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.input[0].previous_output, outpoint());
        assert_eq!(tx.output[0].value, Amount::from_sat(18_900));
        assert_eq!(tx.output[1].value, Amount::from_sat(2_100));
        assert_eq!(tx.output[0].script_pubkey, recipient());
        assert_eq!(tx.output[1].script_pubkey, recipient());
    }

    #[test]
    fn dust_amounts_are_rejected() {
        assert!(matches!(
            create_punishment_tx(outpoint(), Amount::from_sat(9), &recipient()),
            Err(VigilError::InsufficientAmount { amount: 9, fee: 0 })
        ));
    }

    #[test]
    fn record_round_trips_through_the_store() {
        let dir = TempDir::new().expect("tempdir");
        let db = Database::new(dir.path()).expect("store root creatable");

        let record = PunishmentRecord::new(outpoint(), Amount::from_sat(50_000), &recipient())
            .expect("builds");
        record.persist(&db).expect("persists");

        let bytes =
            std::fs::read(dir.path().join(record.file_name())).expect("record file exists");
        let decoded: PunishmentRecord = serde_json::from_slice(&bytes).expect("decodable");
        assert_eq!(decoded.punished_outpoint, record.punished_outpoint);
        assert_eq!(decoded.amount_sats, 50_000);
        assert_eq!(decoded.transaction_hex, record.transaction_hex);
    }
}
