use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::errors::ServiceError;
use crate::models::StaffUser;

pub const PIN_LENGTH: usize = 6;

/// A PIN is exactly six ASCII digits.
pub fn validate_pin(pin: &str) -> Result<(), ServiceError> {
    if pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ServiceError::validation("PIN must be exactly 6 digits"))
    }
}

/// Argon2id hasher for staff PINs. Verification reads the cost parameters
/// from the stored PHC string, so hashes made with other costs still verify.
#[derive(Clone)]
pub struct PinHasher {
    argon2: Argon2<'static>,
}

impl Default for PinHasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

impl PinHasher {
    pub fn new(memory_kib: u32, iterations: u32) -> Result<Self, ServiceError> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| ServiceError::HashError(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash(&self, pin: &str) -> Result<String, ServiceError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(pin.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ServiceError::HashError(e.to_string()))
    }

    pub fn verify(&self, pin: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        self.argon2.verify_password(pin.as_bytes(), &parsed).is_ok()
    }

    /// First active staff member whose PIN hash matches.
    pub fn find_active<'a>(&self, pin: &str, roster: &'a [StaffUser]) -> Option<&'a StaffUser> {
        roster
            .iter()
            .filter(|staff| staff.active)
            .find(|staff| self.verify(pin, &staff.pin_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("123456", true)]
    #[case("000000", true)]
    #[case("12345", false)]
    #[case("1234567", false)]
    #[case("12a456", false)]
    #[case("１２３４５６", false)]
    fn pin_format(#[case] pin: &str, #[case] ok: bool) {
        assert_eq!(validate_pin(pin).is_ok(), ok);
    }

    #[test]
    fn hash_verifies_only_the_same_pin() {
        let hasher = PinHasher::new(64, 1).unwrap();
        let hash = hasher.hash("123456").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("123456", &hash));
        assert!(!hasher.verify("654321", &hash));
        assert!(!hasher.verify("123456", "not-a-hash"));
    }
}
