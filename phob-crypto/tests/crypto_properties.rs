//! Property-based tests for the crypto layer.
//!
//! - Sealing is reversible with the correct key, nonce and path
//! - Any single-bit change in a segment is detected
//! - Any single-bit change in tagged data is detected

use phob_crypto::{compute_tag, generate_random_key, open, random_nonce, seal, verify_tag};
use proptest::prelude::*;

fn plaintext_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

fn path_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9_/]{1,40}\\.php").unwrap()
}

proptest! {
    #[test]
    fn roundtrip_preserves_data(plaintext in plaintext_strategy(), path in path_strategy()) {
        let key = generate_random_key();
        let nonce = random_nonce();
        let sealed = seal(&key, &nonce, path.as_bytes(), &plaintext).unwrap();
        let opened = open(&key, &nonce, path.as_bytes(), &sealed).unwrap();
        prop_assert_eq!(opened, plaintext);
    }

    #[test]
    fn bit_flip_in_segment_detected(
        plaintext in plaintext_strategy(),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let key = generate_random_key();
        let nonce = random_nonce();
        let mut sealed = seal(&key, &nonce, b"f.php", &plaintext).unwrap();
        let i = index.index(sealed.len());
        sealed[i] ^= 1 << bit;
        prop_assert!(open(&key, &nonce, b"f.php", &sealed).is_err());
    }

    #[test]
    fn bit_flip_in_tagged_data_detected(
        data in prop::collection::vec(any::<u8>(), 1..2048),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let key = generate_random_key();
        let tag = compute_tag(&key, &data).unwrap();
        let mut forged = data.clone();
        let i = index.index(forged.len());
        forged[i] ^= 1 << bit;
        prop_assert!(verify_tag(&key, &forged, &tag).is_err());
    }
}
