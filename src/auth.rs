use sha2::{Digest, Sha256};

use crate::id::new_token;

pub const ROLE_SCHOOL_ADMIN: &str = "school_admin";
pub const ROLE_SUPER_ADMIN: &str = "super_admin";

/// Hash a password as `salt$hex(sha256(salt || password))`.
pub fn hash_password(password: &str) -> String {
    let salt = new_token();
    let digest = digest_with_salt(&salt, password);
    format!("{salt}${digest}")
}

/// Verify a password against a stored hash. A missing hash never verifies:
/// accounts recreated by restore carry no credential until reset.
pub fn verify_password(stored: Option<&str>, password: &str) -> bool {
    let Some(stored) = stored else {
        return false;
    };
    let Some((salt, expected)) = stored.split_once('$') else {
        return false;
    };
    digest_with_salt(salt, password) == expected
}

fn digest_with_salt(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}
