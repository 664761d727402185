//! Readers for the JSON fixtures under the data directory
//!
//! ```text
//! data/
//!   taplint.json          per-application taplint maximums
//!   tap/queries.json      queries for the TAP service
//!   ssotap/queries.json   queries for the SSOTAP service
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::query::QuerySpec;
use crate::scenario::TapApplication;

#[derive(Debug, Deserialize)]
struct QueryFile {
    #[serde(default)]
    queries: Vec<QuerySpec>,
}

/// Largest taplint error and warning counts accepted for one application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaplintLimits {
    pub errors: u32,
    pub warnings: u32,
}

/// Taplint limits keyed by application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaplintMaximums(HashMap<TapApplication, TaplintLimits>);

impl TaplintMaximums {
    pub fn new(limits: HashMap<TapApplication, TaplintLimits>) -> Self {
        Self(limits)
    }

    pub fn get(&self, app: TapApplication) -> Result<TaplintLimits> {
        self.0.get(&app).copied().ok_or_else(|| {
            Error::Config(format!("No taplint maximums configured for {}", app))
        })
    }
}

/// Path of the query fixture for an application
pub fn queries_path(data_dir: &Path, app: TapApplication) -> PathBuf {
    data_dir.join(app.as_str()).join("queries.json")
}

/// Load the ordered query list for an application.
///
/// A file without a `queries` key yields an empty list.
pub fn load_queries(data_dir: &Path, app: TapApplication) -> Result<Vec<QuerySpec>> {
    let file: QueryFile = read_json(&queries_path(data_dir, app))?;
    debug!("Loaded {} queries for {}", file.queries.len(), app);
    Ok(file.queries)
}

/// Load the taplint maximums from `taplint.json`
pub fn load_taplint_maximums(data_dir: &Path) -> Result<TaplintMaximums> {
    read_json(&data_dir.join("taplint.json"))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    serde_json::from_str(&content).map_err(|e| Error::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
