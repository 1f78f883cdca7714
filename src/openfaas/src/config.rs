use std::path::PathBuf;

use crate::OnboardingError;

pub const DB_HOST: &str = "DB_HOST";
pub const DB_NAME: &str = "DB_NAME";
pub const DB_USER: &str = "DB_USER";
pub const DB_PASS: &str = "DB_PASS";
pub const STORAGE_SOURCE_DIR: &str = "STORAGE_SOURCE_DIR";
pub const STORAGE_DESTINATION_DIR: &str = "STORAGE_DESTINATION_DIR";
pub const DESTINATION_URL: &str = "DESTINATION_URL";
pub const ONBOARDING_USER: &str = "ONBOARDING_USER";

const DEFAULT_USER: &str = "onboarding";

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseInfo {
    pub host: String,
    pub name: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnboardingConfig {
    pub db: DatabaseInfo,
    /// Mounted container holding freshly uploaded blobs
    pub source_dir: PathBuf,
    /// Mounted container for permanent blobs
    pub destination_dir: PathBuf,
    /// Public base URL of the permanent container
    pub destination_url: String,
    pub user_name: String,
}

impl OnboardingConfig {
    pub fn from_env() -> Result<Self, OnboardingError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from `lookup`, reporting every missing variable at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, OnboardingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut required = |key: &str| match lookup(key).filter(|v| !v.trim().is_empty()) {
            Some(value) => value,
            None => {
                missing.push(key.to_owned());
                String::new()
            }
        };

        let db = DatabaseInfo {
            host: required(DB_HOST),
            name: required(DB_NAME),
            user: required(DB_USER),
            password: required(DB_PASS),
        };
        let source_dir = PathBuf::from(required(STORAGE_SOURCE_DIR));
        let destination_dir = PathBuf::from(required(STORAGE_DESTINATION_DIR));
        let destination_url = required(DESTINATION_URL);

        if !missing.is_empty() {
            return Err(OnboardingError::MissingEnv(missing));
        }

        Ok(OnboardingConfig {
            db,
            source_dir,
            destination_dir,
            destination_url: destination_url.trim_end_matches('/').to_owned(),
            user_name: lookup(ONBOARDING_USER)
                .or_else(|| lookup("USER"))
                .unwrap_or_else(|| DEFAULT_USER.to_owned()),
        })
    }
}
