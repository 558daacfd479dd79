//! Recovery code generation and verification helpers.
//!
//! Recovery codes are shown once at registration and later authorize the
//! enrollment of a new device. Each code is Argon2id-hashed with its own
//! random salt.

use anyhow::{Context, Result};
use rand::{RngCore, rngs::OsRng};

use crate::hashing::{hash_secret, verify_secret};

pub const RECOVERY_CODE_COUNT: usize = 12;
const RECOVERY_CODE_LEN: usize = 12;
const RECOVERY_CODE_GROUP_SIZE: usize = 4;
const RECOVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly generated recovery-code batch (plaintext + hashes).
#[derive(Debug)]
pub struct RecoveryCodeBatch {
    pub codes: Vec<String>,
    pub code_hashes: Vec<String>,
}

impl RecoveryCodeBatch {
    pub fn generate() -> Result<Self> {
        let mut rng = OsRng;
        Self::generate_with_rng(&mut rng)
    }

    fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self> {
        let mut codes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        for _ in 0..RECOVERY_CODE_COUNT {
            let code = generate_code(rng)?;
            let normalized = normalize_recovery_code(&code)?;
            code_hashes.push(hash_secret(&normalized)?);
            codes.push(code);
        }
        Ok(Self { codes, code_hashes })
    }
}

/// Normalize a recovery code for verification.
pub fn normalize_recovery_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != RECOVERY_CODE_LEN {
        return Err(anyhow::anyhow!("invalid recovery code length"));
    }

    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| RECOVERY_CODE_ALPHABET.contains(ch))
    {
        return Err(anyhow::anyhow!("invalid recovery code characters"));
    }

    Ok(normalized)
}

/// Format a normalized recovery code for display.
pub fn format_recovery_code(normalized: &str) -> Result<String> {
    if normalized.len() != RECOVERY_CODE_LEN {
        return Err(anyhow::anyhow!("invalid recovery code length"));
    }
    let mut out = String::with_capacity(RECOVERY_CODE_LEN + 2);
    for (idx, chunk) in normalized
        .as_bytes()
        .chunks(RECOVERY_CODE_GROUP_SIZE)
        .enumerate()
    {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).context("invalid recovery code chunk")?);
    }
    Ok(out)
}

/// Verify a recovery code against a stored hash.
pub fn verify_recovery_code(code: &str, stored_hash: &str) -> bool {
    match normalize_recovery_code(code) {
        Ok(normalized) => verify_secret(&normalized, stored_hash),
        Err(_) => false,
    }
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut raw = [0u8; RECOVERY_CODE_LEN];
    rng.fill_bytes(&mut raw);
    let mut normalized = String::with_capacity(RECOVERY_CODE_LEN);
    for byte in raw {
        // 256 is a multiple of the alphabet size, so there is no modulo bias
        let idx = usize::from(byte) % RECOVERY_CODE_ALPHABET.len();
        if let Some(&char_byte) = RECOVERY_CODE_ALPHABET.get(idx) {
            normalized.push(char_byte as char);
        }
    }
    format_recovery_code(&normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_shape() {
        let batch = RecoveryCodeBatch::generate().unwrap();
        assert_eq!(batch.codes.len(), RECOVERY_CODE_COUNT);
        assert_eq!(batch.code_hashes.len(), RECOVERY_CODE_COUNT);
        for code in &batch.codes {
            assert_eq!(code.len(), RECOVERY_CODE_LEN + 2);
            assert_eq!(code.matches('-').count(), 2);
        }
    }

    #[test]
    fn test_codes_verify_only_against_their_own_hash() {
        let batch = RecoveryCodeBatch::generate().unwrap();
        assert!(verify_recovery_code(&batch.codes[0], &batch.code_hashes[0]));
        assert!(!verify_recovery_code(&batch.codes[0], &batch.code_hashes[1]));
    }

    #[test]
    fn test_verification_tolerates_case_and_separators() {
        let batch = RecoveryCodeBatch::generate().unwrap();
        let sloppy = batch.codes[3].to_lowercase().replace('-', " ");
        assert!(verify_recovery_code(&sloppy, &batch.code_hashes[3]));
    }

    #[test]
    fn test_normalize_rejects_ambiguous_characters() {
        assert!(normalize_recovery_code("ABCD-EFGH-JKL0").is_err());
        assert!(normalize_recovery_code("ABCD-EFGH").is_err());
        assert_eq!(
            normalize_recovery_code("abcd-efgh-jklm").unwrap(),
            "ABCDEFGHJKLM"
        );
    }
}
