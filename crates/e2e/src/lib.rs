//! Rubin Science Platform validator
//!
//! Checks a deployed platform from the outside:
//! - TAP and SSOTAP queries under concurrent simulated users, judged on
//!   status, duration and row count
//! - VOSI tables and capabilities, and the UWS job lifecycle
//! - STILTS taplint error and warning totals
//! - Squareone, Portal and Nublado pages, driven by Playwright from YAML
//!   page specs with screenshot snapshots
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      rspval (binary)                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  suite                                                      │
//! │    ├── run_query_scenario(scenario)                         │
//! │    │     ├── runner::run_concurrent_test (1 task per user)  │
//! │    │     │     └── tap::TapQueryRunner -> TapClient         │
//! │    │     └── validation::validate_query_results            │
//! │    ├── check_tables / check_uws / check_capabilities        │
//! │    └── check_taplint -> taplint::TaplintService             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ui::UiRunner                                               │
//! │    ├── spec::PageSpec (YAML)                                │
//! │    ├── playwright::PlaywrightHandle (one script per spec)   │
//! │    └── visual::SnapshotComparator                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod capabilities;
pub mod error;
pub mod files;
pub mod playwright;
pub mod runner;
pub mod spec;
pub mod suite;
pub mod tap;
pub mod taplint;
pub mod ui;
pub mod validation;
pub mod visual;

pub use error::{E2eError, E2eResult};
pub use runner::{run_concurrent_test, RunContext};
pub use spec::{PageSpec, PageStep};
pub use tap::{HttpTapClient, QueryOperation, TapClient, TapQueryRunner};
pub use ui::UiRunner;
pub use validation::{query_violations, validate_query_results, TapValidationService};
