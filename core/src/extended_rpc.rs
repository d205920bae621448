//! # Extended Remote Procedure Call
//!
//! The node collaborator contract and its Bitcoin Core implementation.
//! Only the three calls the challenge flow needs are exposed; the RPC
//! protocol itself belongs to `bitcoincore-rpc`.

use crate::errors::VigilError;
use async_trait::async_trait;
use bitcoin::{Address, Amount, OutPoint, ScriptBuf, TxOut, Txid};
use bitcoincore_rpc::{Auth, Client, RpcApi};
use secrecy::ExposeSecret;

/// An unspent output on a watched address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub amount: Amount,
}

/// Node collaborator contract. Implementations may block; callers hold no
/// locks across these calls and tolerate arbitrary latency.
#[async_trait]
pub trait BitcoinRpc: Send + Sync {
    async fn list_unspent(&self, address: &Address) -> Result<Vec<Utxo>, VigilError>;

    async fn send_raw_transaction(&self, tx_hex: &str) -> Result<Txid, VigilError>;

    /// Outputs of a broadcast transaction, for the commitment presence
    /// check.
    async fn get_transaction_outputs(&self, txid: &Txid) -> Result<Vec<TxOut>, VigilError>;
}

#[derive(Debug)]
pub struct ExtendedRpc {
    url: String,
    pub client: Client,
}

impl ExtendedRpc {
    /// Connects to Bitcoin RPC and returns a new `ExtendedRpc`.
    pub fn new(
        url: String,
        user: &secrecy::SecretString,
        password: &secrecy::SecretString,
    ) -> Result<Self, VigilError> {
        let auth = Auth::UserPass(
            user.expose_secret().to_string(),
            password.expose_secret().to_string(),
        );
        let client = Client::new(&url, auth)?;

        Ok(Self { url, client })
    }

    pub fn from_config(config: &crate::config::VigilConfig) -> Result<Self, VigilError> {
        Self::new(
            config.bitcoin_rpc_url.clone(),
            &config.bitcoin_rpc_user,
            &config.bitcoin_rpc_password,
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl BitcoinRpc for ExtendedRpc {
    #[tracing::instrument(skip(self), err(level = tracing::Level::ERROR))]
    async fn list_unspent(&self, address: &Address) -> Result<Vec<Utxo>, VigilError> {
        let entries = self.client.list_unspent(
            Some(0),
            Some(9_999_999),
            Some(&[address]),
            Some(true),
            None,
        )?;

        Ok(entries
            .into_iter()
            .map(|entry| Utxo {
                outpoint: OutPoint::new(entry.txid, entry.vout),
                amount: entry.amount,
            })
            .collect())
    }

    #[tracing::instrument(skip(self, tx_hex), err(level = tracing::Level::ERROR))]
    async fn send_raw_transaction(&self, tx_hex: &str) -> Result<Txid, VigilError> {
        Ok(self.client.send_raw_transaction(tx_hex)?)
    }

    #[tracing::instrument(skip(self), err(level = tracing::Level::ERROR))]
    async fn get_transaction_outputs(&self, txid: &Txid) -> Result<Vec<TxOut>, VigilError> {
        let info = self.client.get_raw_transaction_info(txid, None)?;

        Ok(info
            .vout
            .into_iter()
            .map(|vout| TxOut {
                value: vout.value,
                script_pubkey: ScriptBuf::from_bytes(vout.script_pub_key.hex),
            })
            .collect())
    }
}
