use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use identity::SignInMechanism;

#[derive(Debug)]
pub struct Settings {
    pub database_url: String,
    pub blob_root: String,
    pub identity_url: String,
    pub identity_api_key: String,
    pub sign_in_mechanism: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/onsite.db".into(),
            blob_root: "./data/blobs".into(),
            identity_url: "http://127.0.0.1:8787".into(),
            identity_api_key: "devkey".into(),
            sign_in_mechanism: "popup".into(),
        }
    }
}

impl Settings {
    /// Popup is canonical; anything other than an explicit "redirect" falls
    /// back to it.
    pub fn sign_in_mechanism(&self) -> SignInMechanism {
        match self.sign_in_mechanism.as_str() {
            "redirect" => SignInMechanism::Redirect,
            _ => SignInMechanism::Popup,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("onsite.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = v.clone();
            }
            if let Some(v) = file_cfg.get("blob_root") {
                settings.blob_root = v.clone();
            }
            if let Some(v) = file_cfg.get("identity_url") {
                settings.identity_url = v.clone();
            }
            if let Some(v) = file_cfg.get("identity_api_key") {
                settings.identity_api_key = v.clone();
            }
            if let Some(v) = file_cfg.get("sign_in_mechanism") {
                settings.sign_in_mechanism = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("APP__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP__BLOB_ROOT") {
        settings.blob_root = v;
    }
    if let Ok(v) = std::env::var("APP__IDENTITY_URL") {
        settings.identity_url = v;
    }
    if let Ok(v) = std::env::var("APP__IDENTITY_API_KEY") {
        settings.identity_api_key = v;
    }
    if let Ok(v) = std::env::var("APP__SIGN_IN_MECHANISM") {
        settings.sign_in_mechanism = v;
    }

    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}
