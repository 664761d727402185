//! Test scenarios for concurrent TAP query validation

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// TAP applications exercised by the query scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TapApplication {
    /// The Qserv backed TAP service
    Tap,
    /// The Solar System Objects TAP service
    #[serde(rename = "ssotap")]
    SsoTap,
}

impl TapApplication {
    pub const ALL: [TapApplication; 2] = [TapApplication::Tap, TapApplication::SsoTap];

    pub fn as_str(&self) -> &'static str {
        match self {
            TapApplication::Tap => "tap",
            TapApplication::SsoTap => "ssotap",
        }
    }
}

impl fmt::Display for TapApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TapApplication {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tap" => Ok(TapApplication::Tap),
            "ssotap" => Ok(TapApplication::SsoTap),
            other => Err(Error::InvalidArgument(format!("Invalid TAP application: {}", other))),
        }
    }
}

/// How a query is submitted to a TAP service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Blocks until the result table is returned
    Sync,
    /// Submitted as a UWS job and polled to completion
    Async,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Sync => "sync",
            QueryMode::Async => "async",
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(QueryMode::Sync),
            "async" => Ok(QueryMode::Async),
            other => Err(Error::InvalidArgument(format!("Invalid query mode: {}", other))),
        }
    }
}

/// One configured query load test: an application hit by `users`
/// simultaneous users in a single execution mode.
///
/// The description is derived once at construction; a scenario is never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    app: TapApplication,
    mode: QueryMode,
    users: NonZeroUsize,
    description: String,
}

impl Scenario {
    pub fn new(app: TapApplication, mode: QueryMode, users: NonZeroUsize) -> Self {
        let description = format!(
            "{} {} query [{} user{}]",
            app.as_str().to_uppercase(),
            mode,
            users,
            if users.get() > 1 { "s" } else { "" }
        );

        Self {
            app,
            mode,
            users,
            description,
        }
    }

    pub fn app(&self) -> TapApplication {
        self.app
    }

    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    pub fn users(&self) -> NonZeroUsize {
        self.users
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}
