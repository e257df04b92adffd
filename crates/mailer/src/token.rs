//! One-time recovery token generation.
//!
//! Tokens gate a credential reset, so they come from the operating system's
//! secure randomness source and nothing weaker. If that source fails the
//! error is surfaced to the caller; there is no silent fallback.

use thiserror::Error;

/// The 62-symbol alphanumeric alphabet tokens are drawn from.
pub const TOKEN_ALPHABET: &[u8; 62] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Default token length. At 62 symbols this is about 190 bits of entropy
/// (log2(62) ~ 5.95 bits per character), which makes collisions between
/// independently generated tokens vanishingly unlikely but not impossible;
/// uniqueness and expiry bookkeeping remain the caller's responsibility.
pub const DEFAULT_TOKEN_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum TokenError {
    /// The OS randomness source failed. This is the only error in the
    /// subsystem that should abort the calling operation.
    #[error("secure randomness source unavailable: {0}")]
    RandomnessUnavailable(String),
    #[error("token length must be at least 1")]
    InvalidLength,
}

/// Generate a recovery token of `length` alphanumeric characters.
///
/// Each character is drawn uniformly from [`TOKEN_ALPHABET`] via rejection
/// sampling, so no symbol is favoured by modulo bias.
pub fn generate_reset_token(length: usize) -> Result<String, TokenError> {
    if length == 0 {
        return Err(TokenError::InvalidLength);
    }

    let mut token = String::with_capacity(length);
    let mut buf = [0u8; 128];
    while token.len() < length {
        getrandom::fill(&mut buf)
            .map_err(|e| TokenError::RandomnessUnavailable(e.to_string()))?;
        for &byte in &buf {
            // 248 is the largest multiple of 62 below 256; rejecting bytes
            // above it keeps the distribution uniform.
            if byte < 248 {
                token.push(TOKEN_ALPHABET[(byte % 62) as usize] as char);
                if token.len() == length {
                    break;
                }
            }
        }
    }

    Ok(token)
}

/// Generate a token of [`DEFAULT_TOKEN_LENGTH`].
pub fn generate_default_token() -> Result<String, TokenError> {
    generate_reset_token(DEFAULT_TOKEN_LENGTH)
}
