//! Password policy evaluation and Argon2id hashing.
//!
//! Scoring is pure and deterministic so the same rules can run in a browser
//! for feedback, but the server-side evaluation is the one that counts.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use once_cell::sync::Lazy;
use std::str::FromStr;

pub const MAX_SCORE: u8 = 4;
const DEFAULT_MIN_SCORE: u8 = 2;
const DEFAULT_MIN_LENGTH: usize = 8;
const SHORT_PASSWORD_LENGTH: usize = 6;

/// Hash verified against when the account does not exist, so unknown
/// identifiers cost the same as wrong passwords.
static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_password("gatehouse-timing-equalizer").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharClass {
    Lower,
    Upper,
    Digit,
    Symbol,
}

impl CharClass {
    fn of(ch: char) -> Self {
        if ch.is_lowercase() {
            Self::Lower
        } else if ch.is_uppercase() {
            Self::Upper
        } else if ch.is_numeric() {
            Self::Digit
        } else {
            Self::Symbol
        }
    }

    fn present_in(self, password: &str) -> bool {
        password.chars().any(|ch| Self::of(ch) == self)
    }
}

impl FromStr for CharClass {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "lower" | "lowercase" => Ok(Self::Lower),
            "upper" | "uppercase" => Ok(Self::Upper),
            "digit" | "digits" | "number" => Ok(Self::Digit),
            "symbol" | "symbols" | "special" => Ok(Self::Symbol),
            other => Err(format!("unknown character class: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_score: u8,
    pub min_length: usize,
    pub required_classes: Vec<CharClass>,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_SCORE,
            min_length: DEFAULT_MIN_LENGTH,
            required_classes: Vec::new(),
        }
    }
}

/// Score a candidate password on a 0..=4 scale.
///
/// Length brackets contribute up to 3 points and every character class past
/// the first adds one more. Passwords shorter than six characters never score
/// above 1. Adding characters can only keep or raise the score.
#[must_use]
pub fn score(password: &str) -> u8 {
    let length = password.chars().count();
    if length == 0 {
        return 0;
    }

    let length_points: u8 = match length {
        0..=7 => 0,
        8..=11 => 1,
        12..=15 => 2,
        _ => 3,
    };

    let classes = [
        CharClass::Lower,
        CharClass::Upper,
        CharClass::Digit,
        CharClass::Symbol,
    ]
    .into_iter()
    .filter(|class| class.present_in(password))
    .count();
    let diversity_points = u8::try_from(classes.saturating_sub(1)).unwrap_or(MAX_SCORE);

    let cap = if length < SHORT_PASSWORD_LENGTH {
        1
    } else {
        MAX_SCORE
    };
    length_points.saturating_add(diversity_points).min(cap)
}

#[must_use]
pub fn meets_policy(password: &str, policy: &PasswordPolicy) -> bool {
    password.chars().count() >= policy.min_length
        && policy
            .required_classes
            .iter()
            .all(|class| class.present_in(password))
        && score(password) >= policy.min_score
}

/// Hash a password with Argon2id and a random salt, returning a PHC string.
///
/// # Errors
/// Returns an error if the hasher rejects the input.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// Verify a password against a stored PHC hash.
///
/// # Errors
/// Returns an error if the stored hash is malformed.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|err| anyhow!("invalid password hash: {err}"))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(anyhow!("failed to verify password: {err}")),
    }
}

/// Spend the same hashing work as a real verification and report a mismatch.
pub(crate) fn verify_against_dummy(password: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(password, hash);
    }
}
