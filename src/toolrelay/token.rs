//! Installation unlock token.
//!
//! Every wrapped tool is gated behind a single installation-scoped token:
//! the AI must fetch it once via the `readme` operation and then supply it
//! as `tool_unlock_token` on every execute call. The token exists to force
//! the AI through the documentation path, not to authenticate anybody, so it
//! is short, stable per installation, and embedded verbatim in the readme.
//!
//! Derivation is a truncated SHA-256 over an installation-local seed plus
//! the crate version, so the token changes when either changes but is
//! otherwise stable. The seed comes from the `TOOLRELAY_INSTALL_SEED`
//! environment variable, with a fixed development fallback.

use lazy_static::lazy_static;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Environment variable naming the installation-local seed.
pub const INSTALL_SEED_ENV: &str = "TOOLRELAY_INSTALL_SEED";

const DEV_INSTALL_SEED: &str = "toolrelay-dev-install";
const TOKEN_LEN: usize = 6;

lazy_static! {
    static ref INSTALL_UNLOCK_TOKEN: String = derive_unlock_token(
        &std::env::var(INSTALL_SEED_ENV).unwrap_or_else(|_| DEV_INSTALL_SEED.to_string()),
        env!("CARGO_PKG_VERSION"),
    );
}

/// The unlock token for this installation.
pub fn unlock_token() -> &'static str {
    &INSTALL_UNLOCK_TOKEN
}

/// Derive an unlock token from an installation seed and a code version.
pub fn derive_unlock_token(install_seed: &str, code_version: &str) -> String {
    let digest = Sha256::digest(format!("{}\n{}", install_seed, code_version).as_bytes());
    let mut hex = String::with_capacity(TOKEN_LEN);
    for byte in digest.iter() {
        hex.push_str(&format!("{:02x}", byte));
        if hex.len() >= TOKEN_LEN {
            break;
        }
    }
    hex.truncate(TOKEN_LEN);
    hex
}

/// Compare a caller-supplied token against the expected one.
///
/// subtle::ConstantTimeEq on SHA-256 digests prevents a timing oracle;
/// the optimizer cannot short-circuit ct_eq() the way it can with `==`.
pub fn verify_unlock_token(candidate: &str, expected: &str) -> bool {
    let candidate_hash = Sha256::digest(candidate.as_bytes());
    let expected_hash = Sha256::digest(expected.as_bytes());
    candidate_hash.ct_eq(&expected_hash).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_stable() {
        let a = derive_unlock_token("seed", "1.0.0");
        let b = derive_unlock_token("seed", "1.0.0");
        assert_eq!(a, b);
    }

    #[test]
    fn test_derivation_varies_with_seed_and_version() {
        let base = derive_unlock_token("seed", "1.0.0");
        assert_ne!(base, derive_unlock_token("other-seed", "1.0.0"));
        assert_ne!(base, derive_unlock_token("seed", "2.0.0"));
    }

    #[test]
    fn test_token_length_and_charset() {
        let token = derive_unlock_token("seed", "1.0.0");
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_verify_accepts_only_exact_match() {
        let token = derive_unlock_token("seed", "1.0.0");
        assert!(verify_unlock_token(&token, &token));
        assert!(!verify_unlock_token("ffffff", &token));
        assert!(!verify_unlock_token("", &token));
    }

    #[test]
    fn test_install_token_is_derived_once() {
        assert_eq!(unlock_token(), unlock_token());
        assert_eq!(unlock_token().len(), TOKEN_LEN);
    }
}
