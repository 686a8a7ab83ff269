//! bcrypt password hashing at a work factor tuned for ~100ms on commodity
//! hardware (bcrypt cost 10).

use super::SecurityError;

const BCRYPT_COST: u32 = 10;

pub fn hash_password(password: &str) -> Result<String, SecurityError> {
    bcrypt::hash(password, BCRYPT_COST).map_err(|e| SecurityError::Internal(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong", &hash));
    }
}
