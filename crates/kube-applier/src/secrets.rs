//! Delegated credential resolution.
//!
//! A target's credential can be given three ways, checked in this order:
//!
//! 1. **Direct value** (`credential: "..."`), for local testing
//! 2. **File reference** (`credential_file: /var/run/secrets/team-a/token`)
//! 3. **Env var reference** (`credential_env_var: TEAM_A_TOKEN`)

use secrecy::SecretString;
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves an optional secret. Returns `Ok(None)` when no source is set;
/// a source that is set but unreadable is an error.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(Some(SecretString::from(value.to_string())));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        return match fs::read_to_string(path) {
            Ok(content) => Ok(Some(SecretString::from(content.trim().to_string()))),
            Err(e) => Err(SecretError::FileReadError {
                path: path.to_string(),
                source: e,
            }),
        };
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            // Mounted tokens often carry a trailing newline
            Ok(value) => Ok(Some(SecretString::from(value.trim().to_string()))),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_no_source_is_none() {
        assert!(resolve_secret_optional(None, None, None).unwrap().is_none());
        assert!(resolve_secret_optional(Some(""), Some(""), Some(""))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_direct_value_wins() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "from-file").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let secret = resolve_secret_optional(Some("direct"), Some(&path), None)
            .unwrap()
            .unwrap();
        assert_eq!(secret.expose_secret(), "direct");
    }

    #[test]
    fn test_file_is_trimmed() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "token-value").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let secret = resolve_secret_optional(None, Some(&path), None)
            .unwrap()
            .unwrap();
        assert_eq!(secret.expose_secret(), "token-value");
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = resolve_secret_optional(None, Some("/nonexistent/kube-applier/token"), None);
        assert!(matches!(result, Err(SecretError::FileReadError { .. })));
    }

    #[test]
    fn test_missing_env_var_is_error() {
        let result =
            resolve_secret_optional(None, None, Some("KUBE_APPLIER_TEST_UNSET_TOKEN_VAR"));
        assert!(matches!(result, Err(SecretError::EnvVarNotSet { .. })));
    }
}
