use rand::RngCore;
use rand::rngs::OsRng;

/// The size of a password-reset token in bytes.
const RESET_TOKEN_SIZE: usize = 32;

/// Number of hours a password-reset token stays valid.
pub const RESET_TOKEN_TTL_HOURS: i64 = 24;

/// Generates a new random password-reset token.
///
/// # Returns
///
/// A hex-encoded token.
pub fn generate_reset_token() -> String {
    let mut token = [0u8; RESET_TOKEN_SIZE];
    OsRng.fill_bytes(&mut token);
    hex::encode(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_hex_and_unique() {
        let a = generate_reset_token();
        let b = generate_reset_token();
        assert_eq!(a.len(), RESET_TOKEN_SIZE * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
