use crate::builder::transaction::{UnsignedSpend, WitnessBundle};
use crate::errors::VigilError;
use crate::signer::{ChallengeSigner, SignedSpend};
use crate::utils;
use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{schnorr, Keypair, Message, SecretKey};
use bitcoin::{Address, TapSighash, Witness, XOnlyPublicKey};

/// An in-process key holder. Implements the external-signer contract for
/// deployments that keep the challenger key in software; hardware-backed
/// signers implement [`ChallengeSigner`] outside this crate.
#[derive(Debug, Clone)]
pub struct Actor {
    keypair: Keypair,
    pub xonly_public_key: XOnlyPublicKey,
    pub address: Address,
}

impl Actor {
    pub fn new(sk: SecretKey, network: bitcoin::Network) -> Self {
        let keypair = Keypair::from_secret_key(&utils::SECP, &sk);
        let (xonly, _parity) = XOnlyPublicKey::from_keypair(&keypair);
        let address = Address::p2tr(&utils::SECP, xonly, None, network);

        Actor {
            keypair,
            xonly_public_key: xonly,
            address,
        }
    }

    /// Schnorr signature over a script-path sighash. No key tweak: script
    /// spends sign with the raw key.
    pub fn sign(&self, sighash: TapSighash) -> schnorr::Signature {
        utils::SECP.sign_schnorr(
            &Message::from_digest(sighash.to_byte_array()),
            &self.keypair,
        )
    }
}

#[async_trait]
impl ChallengeSigner for Actor {
    async fn sign(
        &self,
        spend: &UnsignedSpend,
        bundle: &WitnessBundle,
    ) -> Result<SignedSpend, VigilError> {
        let signature = Actor::sign(self, spend.sighash);

        Ok(SignedSpend {
            tx: spend.tx.clone(),
            sighash: spend.sighash,
            signature,
            bundle: bundle.clone(),
        })
    }

    async fn finalize(&self, signed: &SignedSpend) -> Result<String, VigilError> {
        let mut tx = signed.tx.clone();
        let input = tx
            .input
            .first_mut()
            .ok_or_else(|| VigilError::SigningFailed("transaction has no inputs".to_string()))?;

        // Stack top to bottom: signature, preimage; then the script-path
        // levels.
        let mut witness = Witness::new();
        witness.push(&signed.bundle.reveal_preimage);
        witness.push(signed.signature.serialize());
        witness.push(signed.bundle.script.as_bytes());
        witness.push(signed.bundle.control_block.serialize());
        input.witness = witness;

        Ok(bitcoin::consensus::encode::serialize_hex(&tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::address::ChallengeTree;
    use crate::builder::transaction::{assemble_witness, build_challenge_spend};
    use crate::chain::HashChain;
    use bitcoin::consensus::encode::deserialize_hex;
    use bitcoin::{Amount, Network, OutPoint, Transaction};

    fn actor() -> Actor {
        let sk = SecretKey::from_slice(&[0x17; 32]).expect("valid secret key");
        Actor::new(sk, Network::Regtest)
    }

    fn test_tree(challenger: XOnlyPublicKey) -> ChallengeTree {
        let operator_sk = SecretKey::from_slice(&[0x23; 32]).expect("valid secret key");
        let operator = Actor::new(operator_sk, Network::Regtest).xonly_public_key;
        let chain = HashChain::build(b"init", 3);
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

    #[test]
    fn signature_verifies_against_sighash() {
        let sk = SecretKey::new(&mut rand::thread_rng());
        let actor = Actor::new(sk, Network::Regtest);
        let sighash = TapSighash::from_byte_array([5; 32]);
        let signature = actor.sign(sighash);
        utils::SECP
            .verify_schnorr(
                &signature,
                &Message::from_digest(sighash.to_byte_array()),
                &actor.xonly_public_key,
            )
            .expect("signature verifies");
    }

    #[tokio::test]
    async fn finalize_produces_a_four_element_witness() {
        let actor = actor();
        let tree = test_tree(actor.xonly_public_key);
        let leaf = &tree.leaves()[0];
        let spend = build_challenge_spend(
            OutPoint::null(),
            leaf,
            &tree,
            Amount::from_sat(21_000),
            Amount::from_sat(1_000),
            &[0u8; 32],
        )
        .expect("spend builds");
        let bundle = assemble_witness(leaf, &tree).expect("member leaf");

        let signed = ChallengeSigner::sign(&actor, &spend, &bundle)
            .await
            .expect("signs");
        let tx_hex = actor.finalize(&signed).await.expect("finalizes");

        let tx: Transaction = deserialize_hex(&tx_hex).expect("valid tx hex");
        let witness = &tx.input[0].witness;
        assert_eq!(witness.len(), 4);
        assert_eq!(
            witness.nth(0).expect("preimage"),
            leaf.reveal_preimage.as_slice()
        );
        assert_eq!(
            witness.nth(2).expect("script"),
            leaf.script_buf().as_bytes()
        );
    }
}
