/// `load_config` module: reads the static YAML config and builds the
/// credential table from environment secrets.
///
/// The YAML file never carries tokens. It only names the environment
/// variables that hold them, so the same file can be committed and shared
/// between environments.
///
/// # Errors
/// Loading errors use `anyhow::Error` and are surfaced at the CLI boundary.
/// A token variable that is unset is not an error: the affected user simply
/// resolves to no credential and their jobs fail with `CredentialMissing`.
use anyhow::Result;
use repo_analyst_core::config::PipelineConfig;
use repo_analyst_core::credentials::StaticCredentialResolver;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub credentials: CredentialsSection,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct CredentialsSection {
    /// Variable holding the token used for users without their own entry.
    #[serde(default)]
    pub default_token_env: Option<String>,
    /// User id to the variable holding that user's token.
    #[serde(default)]
    pub users: BTreeMap<String, String>,
}

/// Loads a static YAML config file. Secrets are not read here; see
/// [`credential_resolver_from_env`].
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config: AppConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    config.pipeline.trace_loaded();
    debug!(
        bind = %config.server.bind,
        users = config.credentials.users.len(),
        default_token_env = ?config.credentials.default_token_env,
        "Loaded server and credential sections"
    );
    Ok(config)
}

fn read_secret(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        Ok(_) => {
            warn!(env_var = var, "Token variable is set but empty");
            None
        }
        Err(_) => {
            warn!(env_var = var, "Token variable is not set");
            None
        }
    }
}

/// Builds the credential table from the environment variables the config
/// names. Users whose variable is missing are left out.
pub fn credential_resolver_from_env(section: &CredentialsSection) -> StaticCredentialResolver {
    let mut resolver = StaticCredentialResolver::new();
    for (user_id, var) in &section.users {
        if let Some(token) = read_secret(var) {
            resolver = resolver.with_user(user_id.clone(), token);
        }
    }
    if let Some(token) = section.default_token_env.as_deref().and_then(read_secret) {
        resolver = resolver.with_fallback(token);
    }
    info!(
        users = resolver.user_count(),
        has_fallback = resolver.has_fallback(),
        "Credential table built from environment"
    );
    resolver
}
