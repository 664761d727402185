//! Declarative YAML page checks

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{E2eError, E2eResult};

/// Placeholder replaced with the deployment base URL in step strings
pub const BASE_URL_PLACEHOLDER: &str = "${BASE_URL}";

/// A complete page check parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSpec {
    /// Unique name for this check
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering checks
    #[serde(default)]
    pub tags: Vec<String>,

    /// Load the logged-in browser state from the auth file
    #[serde(default = "default_authenticated")]
    pub authenticated: bool,

    /// Viewport size for the browser
    #[serde(default = "default_viewport")]
    pub viewport: Viewport,

    /// Steps to execute in order
    pub steps: Vec<PageStep>,

    /// Color distance (0.0 - 1.0) tolerated per pixel in snapshot comparison
    #[serde(default = "default_threshold")]
    pub snapshot_threshold: f64,
}

fn default_authenticated() -> bool {
    true
}

fn default_viewport() -> Viewport {
    Viewport { width: 1280, height: 720 }
}

fn default_threshold() -> f64 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// A single step in a page check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PageStep {
    /// Navigate to a platform application or to a URL (relative to base)
    Navigate {
        #[serde(default)]
        app: Option<String>,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Click an element
    Click {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        double: bool,
    },

    /// Fill an input field
    Fill {
        selector: String,
        value: String,
    },

    /// Press a key
    Press {
        #[serde(default)]
        selector: Option<String>,
        key: String,
    },

    /// Wait for an element to appear
    Wait {
        selector: String,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
        #[serde(default)]
        state: WaitState,
    },

    /// Wait for a fixed amount of time (use sparingly)
    Sleep {
        ms: u64,
    },

    /// Assert something about an element
    Assert {
        selector: String,
        #[serde(default)]
        visible: Option<bool>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        text_contains: Option<String>,
        #[serde(default)]
        text_not_contains: Option<String>,
        #[serde(default)]
        count: Option<usize>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Take a screenshot, optionally compared against the stored snapshot
    Screenshot {
        name: String,
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        full_page: bool,
        #[serde(default)]
        snapshot: bool,
    },

    /// Log a message (for debugging)
    Log {
        message: String,
    },
}

fn default_wait_timeout() -> u64 {
    5000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

impl PageStep {
    /// Short label used in logs and results
    pub fn name(&self) -> String {
        match self {
            PageStep::Navigate { app: Some(app), .. } => format!("navigate:{}", app),
            PageStep::Navigate { url, .. } => format!("navigate:{}", url.as_deref().unwrap_or("/")),
            PageStep::Click { selector, .. } => format!("click:{}", selector),
            PageStep::Fill { selector, .. } => format!("fill:{}", selector),
            PageStep::Press { key, .. } => format!("press:{}", key),
            PageStep::Wait { selector, .. } => format!("wait:{}", selector),
            PageStep::Sleep { ms } => format!("sleep:{}ms", ms),
            PageStep::Assert { selector, .. } => format!("assert:{}", selector),
            PageStep::Screenshot { name, .. } => format!("screenshot:{}", name),
            PageStep::Log { message } => {
                format!("log:{}", message.chars().take(30).collect::<String>())
            }
        }
    }
}

impl PageSpec {
    /// Parse a page spec from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        spec.check()?;
        Ok(spec)
    }

    /// Parse a page spec from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all page specs from a directory, sorted by file name
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            specs.push(Self::from_file(entry.path())?);
        }

        Ok(specs)
    }

    /// Filter specs by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    fn check(&self) -> E2eResult<()> {
        for step in &self.steps {
            if let PageStep::Navigate { app: None, url: None, .. } = step {
                return Err(E2eError::SpecParse(format!(
                    "{}: navigate step needs an app or a url",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_homepage_spec() {
        let yaml = r#"
name: squareone-homepage-anonymous
description: Landing page for a logged out visitor
tags:
  - squareone
  - smoke
authenticated: false
steps:
  - action: navigate
    app: squareone
  - action: assert
    selector: h1
    text_contains: Rubin Science Platform
  - action: assert
    selector: role=banner
    text_contains: Log in
  - action: screenshot
    name: squareone-homepage
    snapshot: true
"#;
        let spec = PageSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.name, "squareone-homepage-anonymous");
        assert!(!spec.authenticated);
        assert_eq!(spec.steps.len(), 4);
        assert_eq!(spec.snapshot_threshold, 0.1);
        assert!(matches!(spec.steps[3], PageStep::Screenshot { snapshot: true, .. }));
    }

    #[test]
    fn test_navigate_requires_target() {
        let yaml = r#"
name: broken
steps:
  - action: navigate
"#;
        assert!(matches!(PageSpec::from_yaml(yaml), Err(E2eError::SpecParse(_))));
    }

    #[test]
    fn test_step_names() {
        let step = PageStep::Navigate {
            app: Some("portal".to_string()),
            url: None,
            timeout_ms: None,
        };
        assert_eq!(step.name(), "navigate:portal");

        let step = PageStep::Log {
            message: "a".repeat(40),
        };
        assert_eq!(step.name().len(), "log:".len() + 30);
    }

    #[test]
    fn test_filter_by_tag() {
        let specs = vec![
            PageSpec::from_yaml("name: a\ntags: [portal]\nsteps: []").unwrap(),
            PageSpec::from_yaml("name: b\ntags: [nublado]\nsteps: []").unwrap(),
        ];
        let filtered = PageSpec::filter_by_tag(&specs, "nublado");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "b");
    }
}
