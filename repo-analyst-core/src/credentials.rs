use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::contract::{AccessCredential, CredentialError, CredentialResolver, Provider};

/// Resolves tokens from a fixed table built at start-up, with an optional
/// fallback token for users that have no entry of their own.
#[derive(Default)]
pub struct StaticCredentialResolver {
    tokens: HashMap<String, AccessCredential>,
    fallback: Option<AccessCredential>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.tokens
            .insert(user_id.into(), AccessCredential::new(token));
        self
    }

    pub fn with_fallback(mut self, token: impl Into<String>) -> Self {
        self.fallback = Some(AccessCredential::new(token));
        self
    }

    pub fn user_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve_token(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<AccessCredential>, CredentialError> {
        let token = match provider {
            Provider::GitHub => self
                .tokens
                .get(user_id)
                .or(self.fallback.as_ref())
                .cloned(),
        };
        debug!(
            user_id,
            provider = provider.as_str(),
            found = token.is_some(),
            "Resolved access token"
        );
        Ok(token)
    }
}
