use argon2::{password_hash::{PasswordHasher, PasswordVerifier, SaltString}, Argon2, PasswordHash};
use rand::rngs::OsRng;

use super::errors::AuthError;

/// Hash a password with argon2 (PHC string format).
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Crypto(e.to_string()))
}

/// `Ok(false)` on mismatch; malformed stored hashes are errors.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(stored).map_err(|e| AuthError::Crypto(e.to_string()))?;
    Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
}

pub fn check_strength(password: &str, min_len: usize) -> Result<(), AuthError> {
    if password.chars().count() < min_len {
        return Err(AuthError::Validation(format!("password too short (>={min_len})")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("Passw0rd!").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("Passw0rd!", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
        assert!(verify_password("x", "not-a-hash").is_err());
    }

    #[test]
    fn strength_counts_chars() {
        assert!(check_strength("short", 8).is_err());
        assert!(check_strength("long enough", 8).is_ok());
    }
}
