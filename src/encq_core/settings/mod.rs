//! AppConfig persistence: load-with-defaults, validation, forward-only
//! migration, atomic save.

pub(crate) mod io;

use std::path::PathBuf;
use std::sync::Mutex;

use crate::encq_core::domain::{APP_CONFIG_VERSION, AppConfig, validate_app_config};
use crate::encq_core::error::EncqError;
use crate::sync_ext::MutexExt;

pub struct ConfigManager {
    path: PathBuf,
    config: Mutex<AppConfig>,
}

impl ConfigManager {
    pub fn new(path: PathBuf) -> Self {
        ConfigManager {
            path,
            config: Mutex::new(AppConfig::default()),
        }
    }

    /// Loads config.json. A missing file generates defaults; a malformed one
    /// is moved aside to `config.json.broken.<unix_ts>` and regenerated. A
    /// record with an older schema version is migrated and rewritten.
    pub fn load(&self) -> Result<AppConfig, EncqError> {
        if !self.path.exists() {
            let defaults = AppConfig::default();
            self.persist(&defaults)?;
            *self.config.lock_unpoisoned() = defaults.clone();
            return Ok(defaults);
        }

        let loaded = match io::read_json_file::<AppConfig>(&self.path) {
            Ok(cfg) => cfg,
            Err(err) => {
                crate::debug_eprintln!("config.json unreadable, regenerating: {err:#}");
                io::quarantine_broken_file(&self.path);
                let defaults = AppConfig::default();
                self.persist(&defaults)?;
                *self.config.lock_unpoisoned() = defaults.clone();
                return Ok(defaults);
            }
        };

        let (migrated, changed) = migrate_config(loaded);
        if changed {
            self.persist(&migrated)?;
        }
        *self.config.lock_unpoisoned() = migrated.clone();
        Ok(migrated)
    }

    pub fn get(&self) -> AppConfig {
        self.config.lock_unpoisoned().clone()
    }

    /// Validates and persists the config atomically.
    pub fn save(&self, config: AppConfig) -> Result<(), EncqError> {
        let errs = validate_app_config(&config);
        if !errs.is_empty() {
            return Err(EncqError::validation(errs));
        }
        self.persist(&config)?;
        *self.config.lock_unpoisoned() = config;
        Ok(())
    }

    fn persist(&self, config: &AppConfig) -> Result<(), EncqError> {
        io::write_json_file(&self.path, config).map_err(|err| EncqError::Io(format!("{err:#}")))
    }
}

/// Forward-only migration. Version 0 records arrive with missing fields
/// already filled by serde defaults; the pass just stamps the current
/// version. Returns the (possibly updated) config and whether it changed.
pub fn migrate_config(mut config: AppConfig) -> (AppConfig, bool) {
    let mut changed = false;
    if config.version < APP_CONFIG_VERSION {
        config.version = APP_CONFIG_VERSION;
        changed = true;
    }
    (config, changed)
}
