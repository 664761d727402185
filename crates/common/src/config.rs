//! Validator configuration
//!
//! Everything the suite needs to know about the deployment under test is
//! read once at startup into a [`Config`] and passed by reference from there.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::scenario::{QueryMode, Scenario, TapApplication};

pub const DEFAULT_HOSTNAME: &str = "data-dev.lsst.cloud";

/// Query used to exercise the UWS job lifecycle
pub const TAP_SCHEMA_QUERY: &str = "SELECT TOP 1 * FROM TAP_SCHEMA.tables";

pub const STILTS_URL: &str = "https://www.star.bristol.ac.uk/mbt/stilts/stilts.jar";
pub const STILTS_FILENAME: &str = "libs/stilts.jar";

/// Browser storage state expected in the home directory
pub const AUTH_FILE: &str = "auth.json";

/// Username taplint sends alongside the token as password
pub const TAPLINT_USERNAME: &str = "x-oauth-token";

pub const SELECTOR_TIMEOUT: Duration = Duration::from_millis(180_000);

/// Which optional sections the capabilities document of an app advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityIncludes {
    pub include_datamodel: bool,
    pub include_geometry: bool,
    pub include_upload: bool,
}

/// Platform applications with a user-facing URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceApp {
    Portal,
    Nublado,
    Api,
    Squareone,
    Tap,
    SsoTap,
    Datalink,
}

impl ServiceApp {
    pub fn path(&self) -> &'static str {
        match self {
            ServiceApp::Portal => "/portal/app",
            ServiceApp::Nublado => "/nb",
            ServiceApp::Api => "/api/tap",
            ServiceApp::Squareone => "/",
            ServiceApp::Tap => "/api/tap",
            ServiceApp::SsoTap => "/api/ssotap",
            ServiceApp::Datalink => "/api/datalink",
        }
    }
}

impl From<TapApplication> for ServiceApp {
    fn from(app: TapApplication) -> Self {
        match app {
            TapApplication::Tap => ServiceApp::Tap,
            TapApplication::SsoTap => ServiceApp::SsoTap,
        }
    }
}

impl FromStr for ServiceApp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "portal" => Ok(ServiceApp::Portal),
            "nublado" => Ok(ServiceApp::Nublado),
            "api" => Ok(ServiceApp::Api),
            "squareone" => Ok(ServiceApp::Squareone),
            "tap" => Ok(ServiceApp::Tap),
            "ssotap" => Ok(ServiceApp::SsoTap),
            "datalink" => Ok(ServiceApp::Datalink),
            other => Err(Error::InvalidArgument(format!("Invalid app name: {}", other))),
        }
    }
}

/// VOSI and TAP endpoints of a TAP application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiEndpoint {
    Capabilities,
    Availability,
    LogControl,
    Tables,
    Tap,
}

impl ApiEndpoint {
    fn suffix(&self) -> &'static str {
        match self {
            ApiEndpoint::Capabilities => "/capabilities",
            ApiEndpoint::Availability => "/availability",
            ApiEndpoint::LogControl => "/logging/control",
            ApiEndpoint::Tables => "/tables",
            ApiEndpoint::Tap => "",
        }
    }
}

impl FromStr for ApiEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "capabilities" => Ok(ApiEndpoint::Capabilities),
            "availability" => Ok(ApiEndpoint::Availability),
            "logcontrol" => Ok(ApiEndpoint::LogControl),
            "tables" => Ok(ApiEndpoint::Tables),
            "tap" => Ok(ApiEndpoint::Tap),
            other => Err(Error::InvalidArgument(format!("Invalid endpoint: {}", other))),
        }
    }
}

/// Validator configuration
#[derive(Clone)]
pub struct Config {
    pub hostname: String,
    pub base_url: String,

    /// Bearer token for the platform APIs
    pub token: String,

    /// Run the browser without a window
    pub headless: bool,

    /// Compare page screenshots against stored snapshots
    pub snapshots: bool,

    /// Record Playwright traces
    pub tracing: bool,

    /// Root of the JSON fixtures
    pub data_dir: PathBuf,

    pub selector_timeout: Duration,

    pub capabilities: HashMap<TapApplication, CapabilityIncludes>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("hostname", &self.hostname)
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("headless", &self.headless)
            .field("snapshots", &self.snapshots)
            .field("tracing", &self.tracing)
            .field("data_dir", &self.data_dir)
            .field("selector_timeout", &self.selector_timeout)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl Config {
    /// Build a configuration for `hostname` with default flags
    pub fn new(hostname: impl Into<String>, token: impl Into<String>) -> Self {
        let hostname = hostname.into();
        Self {
            base_url: format!("https://{}", hostname),
            hostname,
            token: token.into(),
            headless: false,
            snapshots: false,
            tracing: false,
            data_dir: PathBuf::from("data"),
            selector_timeout: SELECTOR_TIMEOUT,
            capabilities: default_capabilities(),
        }
    }

    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let hostname = lookup("HOSTNAME").unwrap_or_else(|| DEFAULT_HOSTNAME.to_string());
        if hostname.trim().is_empty() {
            return Err(Error::Config("HOSTNAME environment variable is not set.".to_string()));
        }

        let token = lookup("TOKEN").unwrap_or_default();
        if token.is_empty() {
            return Err(Error::Config("TOKEN environment variable is not set.".to_string()));
        }

        let flag = |key: &str, default: bool| match lookup(key) {
            Some(value) => value.eq_ignore_ascii_case("true"),
            None => default,
        };

        let mut config = Self::new(hostname, token);
        config.headless = flag("HEADLESS", false);
        config.snapshots = flag("RSPVAL_SNAPSHOTS", false);
        config.tracing = flag("RSPVAL_TRACING", false);
        if let Some(dir) = lookup("RSPVAL_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        config.capabilities.insert(
            TapApplication::Tap,
            CapabilityIncludes {
                include_upload: flag("TAP_INCLUDE_UPLOAD", false),
                include_datamodel: flag("TAP_INCLUDE_DATAMODEL", true),
                include_geometry: flag("TAP_INCLUDE_GEOMETRY", false),
            },
        );
        config.capabilities.insert(
            TapApplication::SsoTap,
            CapabilityIncludes {
                include_upload: flag("SSOTAP_INCLUDE_UPLOAD", true),
                include_datamodel: flag("SSOTAP_INCLUDE_DATAMODEL", false),
                include_geometry: flag("SSOTAP_INCLUDE_GEOMETRY", true),
            },
        );

        if config.hostname != DEFAULT_HOSTNAME && !config.hostname.contains('.') {
            warn!("HOSTNAME '{}' does not look like a fully qualified name", config.hostname);
        }

        Ok(config)
    }

    /// URL of a platform application
    pub fn url(&self, app: ServiceApp) -> String {
        format!("{}{}", self.base_url, app.path())
    }

    /// URL of a platform application given by name
    pub fn url_for(&self, app: &str) -> Result<String> {
        Ok(self.url(app.parse()?))
    }

    /// URL of an endpoint of a TAP application
    pub fn api_endpoint(&self, endpoint: ApiEndpoint, app: TapApplication) -> String {
        format!("{}/api/{}{}", self.base_url, app, endpoint.suffix())
    }

    /// Prefix every UWS result link of `app` must start with
    pub fn results_prefix(&self, app: TapApplication) -> String {
        format!("{}/api/{}/results", self.base_url, app)
    }

    pub fn capability_includes(&self, app: TapApplication) -> CapabilityIncludes {
        self.capabilities
            .get(&app)
            .copied()
            .unwrap_or_else(|| default_capabilities()[&app])
    }
}

fn default_capabilities() -> HashMap<TapApplication, CapabilityIncludes> {
    HashMap::from([
        (
            TapApplication::Tap,
            CapabilityIncludes {
                include_datamodel: true,
                include_geometry: false,
                include_upload: false,
            },
        ),
        (
            TapApplication::SsoTap,
            CapabilityIncludes {
                include_datamodel: false,
                include_geometry: true,
                include_upload: true,
            },
        ),
    ])
}

/// The query load scenarios run by default
pub fn default_scenarios() -> Vec<Scenario> {
    let users = |n: usize| NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN);

    vec![
        Scenario::new(TapApplication::SsoTap, QueryMode::Sync, users(5)),
        Scenario::new(TapApplication::SsoTap, QueryMode::Sync, users(10)),
        Scenario::new(TapApplication::SsoTap, QueryMode::Async, users(1)),
        Scenario::new(TapApplication::SsoTap, QueryMode::Async, users(10)),
        Scenario::new(TapApplication::Tap, QueryMode::Sync, users(1)),
        Scenario::new(TapApplication::Tap, QueryMode::Sync, users(10)),
        Scenario::new(TapApplication::Tap, QueryMode::Async, users(1)),
        Scenario::new(TapApplication::Tap, QueryMode::Async, users(10)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_token_required() {
        let err = Config::from_lookup(lookup(&[("HOSTNAME", "rsp.example.org")])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("TOKEN")));
    }

    #[test]
    fn test_empty_hostname_rejected() {
        let err = Config::from_lookup(lookup(&[("HOSTNAME", ""), ("TOKEN", "t")])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("HOSTNAME")));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("TOKEN", "secret")])).unwrap();
        assert_eq!(config.base_url, "https://data-dev.lsst.cloud");
        assert!(!config.headless);
        assert_eq!(
            config.capability_includes(TapApplication::Tap),
            CapabilityIncludes {
                include_datamodel: true,
                include_geometry: false,
                include_upload: false,
            }
        );
        assert!(config.capability_includes(TapApplication::SsoTap).include_upload);
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn test_flags_from_env() {
        let config = Config::from_lookup(lookup(&[
            ("TOKEN", "t"),
            ("HEADLESS", "True"),
            ("TAP_INCLUDE_GEOMETRY", "true"),
            ("SSOTAP_INCLUDE_UPLOAD", "false"),
        ]))
        .unwrap();

        assert!(config.headless);
        assert!(config.capability_includes(TapApplication::Tap).include_geometry);
        assert!(!config.capability_includes(TapApplication::SsoTap).include_upload);
    }

    #[test]
    fn test_urls() {
        let config = Config::new("rsp.example.org", "t");
        assert_eq!(config.url(ServiceApp::Portal), "https://rsp.example.org/portal/app");
        assert_eq!(config.url_for("SquareOne").unwrap(), "https://rsp.example.org/");
        assert!(matches!(config.url_for("grafana"), Err(Error::InvalidArgument(_))));

        assert_eq!(
            config.api_endpoint(ApiEndpoint::Capabilities, TapApplication::SsoTap),
            "https://rsp.example.org/api/ssotap/capabilities"
        );
        assert_eq!(
            config.api_endpoint(ApiEndpoint::LogControl, TapApplication::Tap),
            "https://rsp.example.org/api/tap/logging/control"
        );
        assert_eq!(
            config.api_endpoint(ApiEndpoint::Tap, TapApplication::Tap),
            "https://rsp.example.org/api/tap"
        );
        assert!("users".parse::<ApiEndpoint>().is_err());
    }

    #[test]
    fn test_default_scenarios() {
        let scenarios = default_scenarios();
        assert_eq!(scenarios.len(), 8);
        assert_eq!(scenarios[0].description(), "SSOTAP sync query [5 users]");
        assert_eq!(scenarios[4].description(), "TAP sync query [1 user]");
    }
}
