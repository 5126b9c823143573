#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Property tests for the field-token codec.

use coffre_crypto_core::{looks_encrypted, FieldCipher, VaultSecret};
use proptest::prelude::*;

fn cipher() -> FieldCipher {
    FieldCipher::new(&VaultSecret::new("proptest-secret")).expect("cipher")
}

proptest! {
    /// decrypt(encrypt(p)) == p for arbitrary plaintext.
    #[test]
    fn roundtrip_is_identity(plaintext in ".*") {
        let c = cipher();
        let token = c.encrypt(&plaintext).expect("encrypt");
        prop_assert!(looks_encrypted(&token));
        prop_assert_eq!(c.decrypt(&token), plaintext);
    }

    /// Any string without the token separator passes through decrypt unchanged.
    #[test]
    fn separator_free_input_is_passthrough(input in "[^:]*") {
        let c = cipher();
        prop_assert_eq!(c.decrypt(&input), input);
    }

    /// Strings that merely contain a colon but are not valid tokens also
    /// pass through unchanged (no panic, no mangling).
    #[test]
    fn colon_containing_garbage_is_passthrough(
        left in "[a-z ]{0,16}",
        right in "[a-z ]{0,16}",
    ) {
        let c = cipher();
        let input = format!("{left}:{right}");
        prop_assert_eq!(c.decrypt(&input), input);
    }

    /// Tokens are stable text: lowercase hex on both sides of the separator.
    #[test]
    fn token_alphabet_is_lower_hex(plaintext in ".{0,64}") {
        let c = cipher();
        let token = c.encrypt(&plaintext).expect("encrypt");
        let (iv, ct) = token.split_once(':').expect("separator");
        prop_assert!(iv.chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
        prop_assert!(ct.chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
    }
}
