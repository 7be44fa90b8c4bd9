//! Credential store for login requests.
//!
//! Loaded once at startup from a TOML file with a single `[users]` table
//! of `name = "password"` pairs. Lookups are read-only afterwards.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to read auth file '{0}': {1}")]
    FileRead(PathBuf, std::io::Error),

    #[error("failed to parse auth file '{0}': {1}")]
    Parse(PathBuf, toml::de::Error),
}

#[derive(Debug, Deserialize)]
struct AuthFile {
    #[serde(default)]
    users: HashMap<String, String>,
}

/// Username -> password lookup.
pub struct AuthStore {
    users: HashMap<String, String>,
}

impl AuthStore {
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuthError::FileRead(path.to_path_buf(), e))?;
        let file: AuthFile =
            toml::from_str(&contents).map_err(|e| AuthError::Parse(path.to_path_buf(), e))?;
        Ok(Self { users: file.users })
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            users: pairs
                .into_iter()
                .map(|(u, p)| (u.into(), p.into()))
                .collect(),
        }
    }

    /// True only when the user exists and the password matches exactly.
    pub fn verify(&self, user: &str, password: &str) -> bool {
        self.users.get(user).is_some_and(|p| p == password)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_verify() {
        let store = AuthStore::from_pairs([("user1", "0192023a7bbd"), ("user2", "pw2")]);
        assert!(store.verify("user1", "0192023a7bbd"));
        assert!(!store.verify("user1", "wrong"));
        assert!(!store.verify("ghost", "0192023a7bbd"));
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[users]\nuser1 = \"secret\"\nuser2 = \"other\"").unwrap();

        let store = AuthStore::load(file.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.verify("user2", "other"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(matches!(
            AuthStore::load(Path::new("/nonexistent/auth.toml")),
            Err(AuthError::FileRead(_, _))
        ));
    }
}
