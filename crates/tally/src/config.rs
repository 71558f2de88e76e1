//!Daemon settings and the store that persists configured inputs and outputs.
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use config_rs::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tally_core::{IoRecord, TallyError};
use tracing::debug;

pub const ENV_PREFIX: &str = "TALLYPI";

fn default_config_file() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => Path::new(&home).join(".config").join("tallypi.json"),
        None => PathBuf::from("tallypi.json"),
    }
}

///Settings for the daemon, read from an optional settings file and `TALLYPI_*` variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    ///where the configured inputs and outputs are stored
    #[serde(default = "default_config_file")]
    pub config_file: PathBuf,

    ///don't write changes back to `config_file`
    #[serde(default)]
    pub readonly: bool,

    ///comma separated device backends to mock, `gpio` and/or `rgbmatrix`
    #[serde(default)]
    pub mock: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_file: default_config_file(),
            readonly: false,
            mock: String::new(),
        }
    }
}

impl Settings {
    pub fn load(settings_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(settings_file) = settings_file {
            builder = builder.add_source(File::with_name(settings_file));
        }
        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|config| config.try_deserialize::<Settings>())
    }

    fn mocks(&self, backend: &str) -> bool {
        self.mock
            .split(',')
            .any(|item| item.trim().eq_ignore_ascii_case(backend))
    }

    pub fn mock_gpio(&self) -> bool {
        self.mocks("gpio")
    }

    pub fn mock_rgbmatrix(&self) -> bool {
        self.mocks("rgbmatrix")
    }
}

///Everything the manager persists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigData {
    #[serde(default)]
    pub inputs: BTreeMap<String, IoRecord>,
    #[serde(default)]
    pub outputs: BTreeMap<String, IoRecord>,
}

pub trait ConfigStore: Send + Sync {
    fn read(&self) -> Result<ConfigData, TallyError>;

    fn write(&self, data: &ConfigData) -> Result<(), TallyError>;
}

///Stores [`ConfigData`] as pretty printed json.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, err: io::Error) -> TallyError {
        TallyError::config(format!("{}: {err}", self.path.display()))
    }
}

impl ConfigStore for FileConfigStore {
    ///A missing or empty file reads as no inputs and no outputs.
    fn read(&self) -> Result<ConfigData, TallyError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no config file yet");
                return Ok(ConfigData::default());
            }
            Err(err) => return Err(self.io_error(err)),
        };
        if contents.trim().is_empty() {
            return Ok(ConfigData::default());
        }
        serde_json::from_str(&contents)
            .map_err(|err| TallyError::config(format!("{}: {err}", self.path.display())))
    }

    fn write(&self, data: &ConfigData) -> Result<(), TallyError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }
        let contents = serde_json::to_string_pretty(data)
            .map_err(|err| TallyError::config(err.to_string()))?;
        fs::write(&self.path, contents).map_err(|err| self.io_error(err))?;
        debug!(path = %self.path.display(), "config written");
        Ok(())
    }
}

///Keeps the config in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    data: std::sync::Mutex<ConfigData>,
}

#[cfg(test)]
impl MemoryConfigStore {
    pub fn new(data: ConfigData) -> Self {
        Self {
            data: std::sync::Mutex::new(data),
        }
    }

    pub fn data(&self) -> ConfigData {
        self.data.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ConfigStore for MemoryConfigStore {
    fn read(&self) -> Result<ConfigData, TallyError> {
        Ok(self.data())
    }

    fn write(&self, data: &ConfigData) -> Result<(), TallyError> {
        *self.data.lock().unwrap() = data.clone();
        Ok(())
    }
}
