//! `secrets.enc` loading/bootstrap (§9 "Secrets at rest", `SPEC_FULL.md`
//! B.3): the encrypted [`Credentials`] bundle never sits in `config.json`,
//! so this is the one place the main controller touches key material
//! directly.
//!
//! First run: if `secrets.enc` doesn't exist yet, credentials are bootstrapped
//! from the `AGENT_API_KEY`/`AGENT_API_SECRET`/`AGENT_SHARED_SECRET`
//! environment variables, sealed, and written out — so provisioning an agent
//! is "set three env vars once" rather than hand-authoring ciphertext.

use std::path::Path;
use std::sync::Arc;

use agent_crypto::secretstore::KeySource;
use agent_crypto::SecretStore;
use agent_types::Credentials;

use crate::config::SecretSourceConfig;
use crate::error::AgentError;

const SECRETS_FILENAME: &str = "secrets.enc";

fn key_source(config: &SecretSourceConfig, agent_id: &str) -> Result<KeySource, AgentError> {
    match config {
        SecretSourceConfig::OsKeychain => Ok(KeySource::OsKeychain {
            service: "trading-agent".to_string(),
            account: agent_id.to_string(),
        }),
        SecretSourceConfig::Passphrase => {
            let passphrase = std::env::var("AGENT_PASSPHRASE").map_err(|_| {
                AgentError::Config(
                    "secretSource.kind is \"passphrase\" but AGENT_PASSPHRASE is not set".into(),
                )
            })?;
            Ok(KeySource::Passphrase(passphrase))
        }
    }
}

fn bootstrap_from_env() -> Option<Credentials> {
    let api_key = std::env::var("AGENT_API_KEY").ok()?;
    let api_secret = std::env::var("AGENT_API_SECRET").ok()?;
    let shared_secret = std::env::var("AGENT_SHARED_SECRET").ok()?;
    Some(Credentials {
        api_key,
        api_secret,
        shared_secret,
    })
}

/// Loads `secrets.enc` from `data_dir`, bootstrapping it from environment
/// variables on first run. Returns [`AgentError::MissingCredentials`] if
/// neither the file nor the bootstrap variables are present (exit code 2).
pub async fn load_or_bootstrap(
    data_dir: &Path,
    secret_source: &SecretSourceConfig,
    agent_id: &str,
) -> Result<Arc<Credentials>, AgentError> {
    let path = data_dir.join(SECRETS_FILENAME);
    let store = SecretStore::new(key_source(secret_source, agent_id)?);

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let creds = store.unseal(&bytes)?;
            Ok(Arc::new(creds))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let creds = bootstrap_from_env().ok_or(AgentError::MissingCredentials { path: path.clone() })?;
            let sealed = store.seal(&creds)?;
            tokio::fs::write(&path, sealed).await?;
            Ok(Arc::new(creds))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_and_missing_env_reports_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        std::env::remove_var("AGENT_API_KEY");
        std::env::remove_var("AGENT_API_SECRET");
        std::env::remove_var("AGENT_SHARED_SECRET");

        let err = load_or_bootstrap(dir.path(), &SecretSourceConfig::OsKeychain, "agent-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MissingCredentials { .. }));
    }

    #[tokio::test]
    async fn bootstraps_and_reloads_via_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("AGENT_API_KEY", "key-1");
        std::env::set_var("AGENT_API_SECRET", "secret-1");
        std::env::set_var("AGENT_SHARED_SECRET", "shared-1");
        std::env::set_var("AGENT_PASSPHRASE", "correct horse battery staple");

        let source = SecretSourceConfig::Passphrase;
        let creds = load_or_bootstrap(dir.path(), &source, "agent-1").await.unwrap();
        assert_eq!(creds.api_key, "key-1");

        // Second load reads the now-sealed file back rather than re-bootstrapping.
        std::env::remove_var("AGENT_API_KEY");
        let reloaded = load_or_bootstrap(dir.path(), &source, "agent-1").await.unwrap();
        assert_eq!(reloaded.api_key, "key-1");

        std::env::remove_var("AGENT_API_SECRET");
        std::env::remove_var("AGENT_SHARED_SECRET");
        std::env::remove_var("AGENT_PASSPHRASE");
    }
}
