//! Admin password checks.

use {
    argon2::{
        Argon2,
        password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
    },
    secrecy::{ExposeSecret, Secret},
};

/// The configured admin password: plain text, or an Argon2 PHC string.
pub struct AdminPassword {
    secret: Secret<String>,
}

impl AdminPassword {
    pub fn new(secret: Secret<String>) -> Self {
        Self { secret }
    }

    pub fn is_hashed(&self) -> bool {
        self.secret.expose_secret().starts_with("$argon2")
    }

    /// Whether `candidate` is the admin password.
    pub fn verify(&self, candidate: &str) -> bool {
        let stored = self.secret.expose_secret();
        if self.is_hashed() {
            verify_password(candidate, stored)
        } else {
            safe_equal(candidate, stored)
        }
    }
}

impl std::fmt::Debug for AdminPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminPassword")
            .field("hashed", &self.is_hashed())
            .finish_non_exhaustive()
    }
}

/// Hash `password` into a PHC string suitable for `admin.password`.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash_str: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash_str) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Constant-time string comparison (for equal lengths).
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_password() {
        let pw = AdminPassword::new(Secret::new("admin123".into()));
        assert!(!pw.is_hashed());
        assert!(pw.verify("admin123"));
        assert!(!pw.verify("admin124"));
        assert!(!pw.verify("admin1234"));
        assert!(!pw.verify(""));
    }

    #[test]
    fn hashed_password() {
        let hash = hash_password("s3cret").unwrap();
        assert!(hash.starts_with("$argon2"));
        let pw = AdminPassword::new(Secret::new(hash.clone()));
        assert!(pw.is_hashed());
        assert!(pw.verify("s3cret"));
        assert!(!pw.verify("wrong"));
        assert!(!pw.verify(&hash));
    }

    #[test]
    fn debug_hides_the_secret() {
        let pw = AdminPassword::new(Secret::new("admin123".into()));
        assert!(!format!("{pw:?}").contains("admin123"));
    }
}
