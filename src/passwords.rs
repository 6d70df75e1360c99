//! One-way password hashing and the password strength policy.
//!
//! Hashes are Argon2id PHC strings with a random per-password salt, so the
//! same password never produces the same stored value twice.

use std::collections::HashMap;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use once_cell::sync::Lazy;

use crate::error::ApiError;

/// Hash a plaintext password for storage.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::PasswordHash(e.to_string()))
}

/// Check a plaintext password against a stored hash.
/// Malformed hashes never verify.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Stands in for the stored hash when the username is unknown, so a miss
/// runs the same Argon2 work as a wrong password.
static UNKNOWN_USER_HASH: Lazy<Option<String>> = Lazy::new(|| hash_password("unknown-user-placeholder").ok());

/// Verifies against [`UNKNOWN_USER_HASH`]. Never succeeds.
pub fn verify_unknown_user(password: &str) -> bool {
    if let Some(hash) = UNKNOWN_USER_HASH.as_deref() {
        verify_password(password, hash);
    }
    false
}

/// Profile values a password must not resemble.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserAttributes<'a> {
    pub username: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
}

impl<'a> UserAttributes<'a> {
    fn named(&self) -> [(&'static str, &'a str); 4] {
        [
            ("username", self.username),
            ("first name", self.first_name),
            ("last name", self.last_name),
            ("email address", self.email),
        ]
    }
}

/// Strength rules for new passwords.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    min_length: usize,
    max_similarity: f64,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::new(8)
    }
}

impl PasswordPolicy {
    pub fn new(min_length: usize) -> Self {
        Self {
            min_length,
            max_similarity: 0.7,
        }
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Help text shown next to password inputs.
    pub fn help_text(&self) -> String {
        format!(
            "Your password must contain at least {} characters, can't be entirely numeric, \
             can't be a commonly used password and can't be too similar to your other personal information.",
            self.min_length
        )
    }

    /// Returns every rule the password breaks, in a stable order.
    pub fn validate(&self, password: &str, attributes: &UserAttributes<'_>) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Some(message) = self.check_similarity(password, attributes) {
            errors.push(message);
        }

        if password.chars().count() < self.min_length {
            let unit = if self.min_length == 1 { "character" } else { "characters" };
            errors.push(format!(
                "This password is too short. It must contain at least {} {}.",
                self.min_length, unit
            ));
        }

        if is_common_password(password) {
            errors.push("This password is too common.".to_string());
        }

        if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
            errors.push("This password is entirely numeric.".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn check_similarity(&self, password: &str, attributes: &UserAttributes<'_>) -> Option<String> {
        let password = password.to_lowercase();
        for (verbose_name, value) in attributes.named() {
            if value.is_empty() {
                continue;
            }
            let value = value.to_lowercase();
            let parts = value
                .split(|c: char| !(c.is_alphanumeric() || c == '_'))
                .filter(|part| !part.is_empty())
                .chain(std::iter::once(value.as_str()));

            for part in parts {
                if self.exceeds_length_ratio(&password, part) {
                    continue;
                }
                if quick_ratio(&password, part) >= self.max_similarity {
                    return Some(format!("The password is too similar to the {}.", verbose_name));
                }
            }
        }
        None
    }

    /// Skips parts far shorter than the password: they cannot reach the
    /// similarity threshold anyway.
    fn exceeds_length_ratio(&self, password: &str, value: &str) -> bool {
        let password_len = password.chars().count();
        let value_len = value.chars().count();
        let length_bound = self.max_similarity / 2.0 * password_len as f64;
        password_len >= 10 * value_len && (value_len as f64) < length_bound
    }
}

/// Upper bound of the sequence similarity of `a` and `b`: twice the size of
/// their character multiset intersection over their combined length.
fn quick_ratio(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }

    let mut available: HashMap<char, usize> = HashMap::new();
    for c in b.chars() {
        *available.entry(c).or_insert(0) += 1;
    }

    let mut matches = 0usize;
    for c in a.chars() {
        if let Some(count) = available.get_mut(&c) {
            if *count > 0 {
                *count -= 1;
                matches += 1;
            }
        }
    }

    2.0 * matches as f64 / total as f64
}

fn is_common_password(password: &str) -> bool {
    let lowered = password.trim().to_lowercase();
    COMMON_PASSWORDS.contains(&lowered.as_str())
}

const COMMON_PASSWORDS: &[&str] = &[
    "123456", "password", "12345678", "qwerty", "123456789", "12345", "1234", "111111",
    "1234567", "dragon", "123123", "baseball", "abc123", "football", "monkey", "letmein",
    "696969", "shadow", "master", "666666", "qwertyuiop", "123321", "mustang", "1234567890",
    "michael", "654321", "superman", "1qaz2wsx", "7777777", "121212", "000000", "qazwsx",
    "123qwe", "killer", "trustno1", "jordan", "jennifer", "zxcvbnm", "asdfgh", "hunter",
    "buster", "soccer", "harley", "batman", "andrew", "tigger", "sunshine", "iloveyou",
    "2000", "charlie", "robert", "thomas", "hockey", "ranger", "daniel", "starwars",
    "klaster", "112233", "george", "computer", "michelle", "jessica", "pepper", "1111",
    "zxcvbn", "555555", "11111111", "131313", "freedom", "777777", "pass", "maggie",
    "159753", "aaaaaa", "ginger", "princess", "joshua", "cheese", "amanda", "summer",
    "love", "ashley", "nicole", "chelsea", "biteme", "matthew", "access", "yankees",
    "987654321", "dallas", "austin", "thunder", "taylor", "matrix", "password1",
    "password123", "welcome", "admin", "admin123", "passw0rd", "qwerty123", "1q2w3e4r",
    "1q2w3e4r5t", "qwe123", "changeme", "secret", "default", "login", "welcome1",
];
