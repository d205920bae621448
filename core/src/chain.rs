//! # Hash Chain Commitment
//!
//! A rollup state transition is committed as a forward SHA256 chain: the
//! first element is the seed, every later element is the SHA256 of the one
//! before it. This ascending order is canonical everywhere the chain
//! appears: construction, verification, the stored `step_chain` field and
//! challenge leaf derivation all use it.

use crate::errors::VigilError;
use crate::sha256_hash;

/// An ordered SHA256 commitment chain, seed first.
///
/// Immutable once committed on-chain. A chain carries at least one step
/// (two elements); shorter inputs are rejected as malformed instead of
/// verifying vacuously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashChain(Vec<Vec<u8>>);

impl HashChain {
    /// Builds a chain of `steps + 1` elements by hashing forward from the
    /// seed.
    pub fn build(seed: &[u8], steps: usize) -> Self {
        let mut elements = Vec::with_capacity(steps + 1);
        elements.push(seed.to_vec());
        for _ in 0..steps {
            let last = elements.last().expect("chain starts with the seed");
            elements.push(sha256_hash!(last.as_slice()).to_vec());
        }
        Self(elements)
    }

    /// Wraps raw elements, rejecting chains too short to commit a step.
    pub fn from_elements(elements: Vec<Vec<u8>>) -> Result<Self, VigilError> {
        let chain = Self(elements);
        chain.validate()?;
        Ok(chain)
    }

    /// Decodes the hex-encoded `step_chain` field of a stored block.
    pub fn from_hex_steps(steps: &[String]) -> Result<Self, VigilError> {
        let elements = steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                hex::decode(step)
                    .map_err(|e| VigilError::MalformedChain(format!("step {} is not hex: {}", i, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_elements(elements)
    }

    /// Hex encoding in committal order, the on-disk `step_chain` format.
    pub fn to_hex_steps(&self) -> Vec<String> {
        self.0.iter().map(hex::encode).collect()
    }

    pub fn elements(&self) -> &[Vec<u8>] {
        &self.0
    }

    /// Number of committed steps (elements minus the seed).
    pub fn steps(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// Pure adjacency predicate: every element must be the SHA256 of its
    /// predecessor. False on the first mismatch, no side effects.
    pub fn verify(&self) -> bool {
        self.0
            .windows(2)
            .all(|pair| sha256_hash!(pair[0].as_slice())[..] == pair[1][..])
    }

    pub fn validate(&self) -> Result<(), VigilError> {
        if self.0.len() < 2 {
            return Err(VigilError::MalformedChain(format!(
                "chain has {} element(s), at least 2 are required",
                self.0.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_verify_holds_for_any_step_count() {
        for steps in 1..8 {
            let chain = HashChain::build(b"rollup_state", steps);
            assert_eq!(chain.elements().len(), steps + 1);
            assert_eq!(chain.steps(), steps);
            assert!(chain.verify());
        }
    }

    #[test]
    fn flipped_interior_byte_fails_verification() {
        let chain = HashChain::build(b"rollup_state", 4);
        let mut elements = chain.elements().to_vec();
        elements[2][0] ^= 0x01;
        let tampered = HashChain::from_elements(elements).expect("length unchanged");
        assert!(!tampered.verify());
    }

    #[test]
    fn hex_round_trip_preserves_order() {
        let chain = HashChain::build(b"init", 3);
        let decoded = HashChain::from_hex_steps(&chain.to_hex_steps()).expect("valid hex");
        assert_eq!(decoded, chain);
        assert!(decoded.verify());
    }

    #[test]
    fn short_or_non_hex_chains_are_malformed() {
        assert!(matches!(
            HashChain::from_elements(vec![b"seed".to_vec()]),
            Err(VigilError::MalformedChain(_))
        ));
        assert!(matches!(
            HashChain::from_hex_steps(&["zz".to_string(), "00".to_string()]),
            Err(VigilError::MalformedChain(_))
        ));
    }

    #[test]
    fn seed_is_first_element() {
        let chain = HashChain::build(b"init", 2);
        assert_eq!(chain.elements()[0], b"init".to_vec());
        assert_eq!(
            chain.elements()[1],
            sha256_hash!(b"init".as_slice()).to_vec()
        );
    }
}
