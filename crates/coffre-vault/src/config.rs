//! Vault configuration sourced from the environment.

use coffre_crypto_core::VaultSecret;

/// Environment variable holding the vault-wide encryption secret.
pub const ENCRYPTION_SECRET_ENV: &str = "COFFRE_ENCRYPTION_SECRET";

/// Development fallback used when no secret is configured.
///
/// Security caveat, not a feature: data encrypted under this value is only
/// as protected as the string is obscure. Production deployments must set
/// [`ENCRYPTION_SECRET_ENV`].
const DEV_FALLBACK_SECRET: &str = "coffre-dev-secret";

/// Load the vault secret from [`ENCRYPTION_SECRET_ENV`], falling back to
/// the fixed development default when unset or empty.
#[must_use]
pub fn vault_secret_from_env() -> VaultSecret {
    match std::env::var(ENCRYPTION_SECRET_ENV) {
        Ok(value) if !value.is_empty() => VaultSecret::new(value),
        _ => {
            tracing::warn!(
                env = ENCRYPTION_SECRET_ENV,
                "encryption secret not configured; using development fallback"
            );
            VaultSecret::new(DEV_FALLBACK_SECRET)
        }
    }
}
