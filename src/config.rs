use std::env;
use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::assembler::DEFAULT_FACE_MIME_TYPE;
use crate::backend::BackendSettings;
use crate::coalescer::{CoalescerConfig, DEFAULT_BATCH_SIZE};
use crate::domain::InstanceRef;
use crate::error::Image360Error;
use crate::loader::LoaderSettings;
use crate::query::{DEFAULT_IMAGES_PER_COLLECTION, ViewSettings};

pub const CONFIG_FILE: &str = "image360.json";
pub const TOKEN_ENV: &str = "IMAGE360_TOKEN";

const DEFAULT_BATCH_DELAY_MS: u64 = 50;
const DEFAULT_COOLDOWN_MS: u64 = 50;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub base_url: String,
    pub project: String,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub batch_delay_ms: Option<u64>,
    #[serde(default)]
    pub cooldown_ms: Option<u64>,
    #[serde(default)]
    pub images_per_collection: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub face_mime_type: Option<String>,
    #[serde(default)]
    pub views: Option<ViewSettings>,
    #[serde(default)]
    pub collections: Vec<CollectionEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CollectionEntry {
    Shorthand(String),
    Detailed(InstanceRef),
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub base_url: String,
    pub project: String,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub cooldown: Duration,
    pub images_per_collection: usize,
    pub timeout: Duration,
    pub face_mime_type: String,
    pub views: ViewSettings,
    pub collections: Vec<InstanceRef>,
}

impl ResolvedConfig {
    pub fn coalescer(&self) -> CoalescerConfig {
        CoalescerConfig {
            batch_size: self.batch_size,
            batch_delay: self.batch_delay,
            cooldown: self.cooldown,
        }
    }

    /// Backend settings, with the bearer token taken from `IMAGE360_TOKEN`
    /// when set.
    pub fn backend(&self) -> BackendSettings {
        BackendSettings {
            base_url: self.base_url.clone(),
            project: self.project.clone(),
            timeout: self.timeout,
            token: env::var(TOKEN_ENV).ok().filter(|token| !token.is_empty()),
        }
    }

    pub fn loader(&self) -> LoaderSettings {
        LoaderSettings {
            coalescer: self.coalescer(),
            views: self.views.clone(),
            images_per_collection: self.images_per_collection,
            face_mime_type: self.face_mime_type.clone(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `image360.json` from the working directory, falling
    /// back to the user's config directory.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, Image360Error> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Self::default_path().ok_or(Image360Error::MissingConfig)?,
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| Image360Error::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| Image360Error::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    fn default_path() -> Option<Utf8PathBuf> {
        let local = Utf8PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        let dirs = ProjectDirs::from("", "", "image360")?;
        let user = Utf8PathBuf::from_path_buf(dirs.config_dir().join(CONFIG_FILE)).ok()?;
        user.exists().then_some(user)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, Image360Error> {
        let schema_version = config.schema_version.unwrap_or(1);
        if config.base_url.trim().is_empty() {
            return Err(Image360Error::ConfigParse("base_url must not be empty".to_string()));
        }
        if config.project.trim().is_empty() {
            return Err(Image360Error::ConfigParse("project must not be empty".to_string()));
        }

        let collections = config
            .collections
            .into_iter()
            .map(|entry| match entry {
                CollectionEntry::Shorthand(value) => value.parse(),
                CollectionEntry::Detailed(instance) => Ok(instance),
            })
            .collect::<Result<Vec<_>, Image360Error>>()?;

        Ok(ResolvedConfig {
            schema_version,
            base_url: config.base_url.trim().to_string(),
            project: config.project.trim().to_string(),
            batch_size: config.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1),
            batch_delay: Duration::from_millis(
                config.batch_delay_ms.unwrap_or(DEFAULT_BATCH_DELAY_MS),
            ),
            cooldown: Duration::from_millis(config.cooldown_ms.unwrap_or(DEFAULT_COOLDOWN_MS)),
            images_per_collection: config
                .images_per_collection
                .unwrap_or(DEFAULT_IMAGES_PER_COLLECTION)
                .max(1),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            face_mime_type: config
                .face_mime_type
                .unwrap_or_else(|| DEFAULT_FACE_MIME_TYPE.to_string()),
            views: config.views.unwrap_or_default(),
            collections,
        })
    }
}
