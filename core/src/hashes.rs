#[macro_export]
macro_rules! sha256_hash {
    ($($data:expr),+) => {{
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        $(
            hasher.update($data);
        )+
        let result: [u8; 32] = hasher.finalize().try_into().expect("SHA256 should produce a 32-byte output");
        result
    }};
}

/// Truncated hex digest (16 chars) used to key content-addressed records.
pub fn short_content_id(content: &[u8]) -> String {
    let digest = hex::encode(crate::sha256_hash!(content));
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_id_is_sha256_prefix() {
        // SHA256("") starts with e3b0c44298fc1c14.
        assert_eq!(short_content_id(b""), "e3b0c44298fc1c14");
        assert_eq!(short_content_id(b"rollup_state").len(), 16);
    }

    #[test]
    fn macro_matches_known_vector() {
        let digest = sha256_hash!(b"abc");
        assert_eq!(
            digest,
            hex_literal::hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }
}
