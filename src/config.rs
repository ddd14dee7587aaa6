use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::errors::Result;
use crate::request::DEFAULT_CHUNK_SIZE;
use crate::source::SourceConfig;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub objects: ObjectsBackend,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub transfer: TransferDefaults,
}

pub type ObjectsBackend = ferry_objectstore::Config;

/// Values used for any transfer setting the invocation leaves out.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TransferDefaults {
    pub bucket: Option<String>,
    pub chunk_size: usize,
    pub concurrency: usize,
    pub timeout_secs: Option<u64>,
}

impl Default for TransferDefaults {
    fn default() -> Self {
        Self {
            bucket: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: 1,
            timeout_secs: None,
        }
    }
}

impl Config {
    pub fn from_path(path: &Path) -> Result<Config> {
        let mut file = File::open(path)?;
        let mut s = String::new();
        file.read_to_string(&mut s)?;
        Ok(serde_yaml::from_str(&s)?)
    }
}
