//! `coffre-crypto-core` — field-level encryption primitives for COFFRE.
//!
//! This crate owns the vault's symmetric field encryption: a PBKDF2-derived
//! key encrypts individual secret values (passwords, note bodies) into
//! `hex(iv):hex(ciphertext)` tokens that the storage layer persists as text.
//!
//! Nothing in here touches the database — the crate is a pure, audit-friendly
//! primitive layer consumed by `coffre-vault`.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod cipher;
pub mod error;
pub mod kdf;
pub mod sealed;
pub mod secret;

pub use cipher::{looks_encrypted, FieldCipher, TOKEN_SEPARATOR};
pub use error::CryptoError;
pub use kdf::derive_field_key;
pub use secret::VaultSecret;
