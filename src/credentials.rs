use std::sync::Mutex;

use crate::error::CommentaryError;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Where the active API key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeySource {
    Env,
    Stored,
    Session,
}

impl ApiKeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::Stored => "stored",
            Self::Session => "session",
        }
    }
}

/// Secure storage for the API key (system keychain or equivalent).
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, api_key: &str) -> Result<(), CommentaryError>;
    fn delete(&self) -> Result<(), CommentaryError>;
}

/// Process-lifetime store, used when no keychain backend is available.
#[derive(Default)]
pub struct SessionStore {
    value: Mutex<Option<String>>,
}

impl CredentialStore for SessionStore {
    fn get(&self) -> Option<String> {
        self.value.lock().ok().and_then(|v| v.clone())
    }

    fn set(&self, api_key: &str) -> Result<(), CommentaryError> {
        let mut guard = self
            .value
            .lock()
            .map_err(|_| CommentaryError::Credential("session store poisoned".into()))?;
        *guard = Some(api_key.to_string());
        Ok(())
    }

    fn delete(&self) -> Result<(), CommentaryError> {
        if let Ok(mut guard) = self.value.lock() {
            *guard = None;
        }
        Ok(())
    }
}

/// A bearer token plus its origin. Debug output never shows the key.
#[derive(Clone)]
pub struct ApiKey {
    value: String,
    pub source: ApiKeySource,
}

impl ApiKey {
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Priority: environment > stored credential > session value.
pub fn resolve_from(
    env_value: Option<String>,
    store: &dyn CredentialStore,
    session: Option<&str>,
) -> Result<ApiKey, CommentaryError> {
    if let Some(value) = non_blank(env_value) {
        return Ok(ApiKey {
            value,
            source: ApiKeySource::Env,
        });
    }
    if let Some(value) = non_blank(store.get()) {
        return Ok(ApiKey {
            value,
            source: ApiKeySource::Stored,
        });
    }
    if let Some(value) = non_blank(session.map(str::to_string)) {
        return Ok(ApiKey {
            value,
            source: ApiKeySource::Session,
        });
    }
    Err(CommentaryError::Credential(format!(
        "no API key configured; set {API_KEY_ENV} or save a key"
    )))
}

pub fn resolve_api_key(
    store: &dyn CredentialStore,
    session: Option<&str>,
) -> Result<ApiKey, CommentaryError> {
    resolve_from(std::env::var(API_KEY_ENV).ok(), store, session)
}

/// Persist a key in the store when possible; otherwise keep it for this session only.
pub fn remember_api_key(store: &dyn CredentialStore, api_key: &str) -> ApiKeySource {
    match store.set(api_key) {
        Ok(()) => ApiKeySource::Stored,
        Err(e) => {
            tracing::warn!("could not store API key, using it for this session only: {e}");
            ApiKeySource::Session
        }
    }
}
