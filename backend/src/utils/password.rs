use std::sync::OnceLock;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};

/// Argon2id memory cost in KiB.
const HASH_MEMORY_KIB: u32 = 19 * 1024;
/// Argon2id iteration count.
const HASH_ITERATIONS: u32 = 2;
/// Argon2id lanes.
const HASH_PARALLELISM: u32 = 1;

#[derive(Debug, thiserror::Error)]
#[error("failed to hash password: {0}")]
pub struct HashingError(String);

fn hasher() -> Argon2<'static> {
    let params = Params::new(HASH_MEMORY_KIB, HASH_ITERATIONS, HASH_PARALLELISM, None)
        .unwrap_or_default();
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

pub fn hash_password(password: &str) -> Result<String, HashingError> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = hasher()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| HashingError(e.to_string()))?;

    Ok(password_hash.to_string())
}

/// Checks `password` against a stored PHC hash string.
///
/// A malformed stored hash is indistinguishable from a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };

    // Parameters come from the PHC string, so older cost settings still verify.
    hasher()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Well-formed PHC string with the production cost parameters. It parses, so
/// verifying against it runs a full Argon2 pass and always mismatches.
const FALLBACK_DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$aWH3zi7DRinXKHb0867k0w$JL3SJlIV3sYVG04GxIOq8BL6Bzm6Krf5TRvXBGJz/To";

/// Hash verified against when the account does not exist, so an unknown email
/// costs the same as a wrong password.
pub fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| {
        hash_password("finboard-timing-equalizer").unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Falling back to the fixed dummy hash");
            FALLBACK_DUMMY_HASH.to_string()
        })
    })
}
