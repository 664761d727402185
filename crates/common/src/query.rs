//! Query fixtures and per-query results

use serde::{Deserialize, Serialize};

/// A query to run together with what it is expected to produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub query: String,

    /// Expected execution time in seconds
    pub expected_duration: f64,

    pub expected_row_count: usize,
}

/// Outcome of running one query for one simulated user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Value of the `QUERY_STATUS` info element, `OK` on success
    pub status: String,

    pub row_count: usize,

    /// Observed wall-clock time in seconds
    pub execution_duration: f64,

    pub expected_duration: f64,

    pub expected_row_count: usize,

    pub query: String,
}

/// Status reported by a TAP service for a successful query
pub const STATUS_OK: &str = "OK";

impl QueryResult {
    /// Combine a fixture entry with what the service returned
    pub fn from_spec(spec: &QuerySpec, status: String, row_count: usize, execution_duration: f64) -> Self {
        Self {
            status,
            row_count,
            execution_duration: execution_duration.max(0.0),
            expected_duration: spec.expected_duration,
            expected_row_count: spec.expected_row_count,
            query: spec.query.clone(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Longest acceptable execution time: twice the expected duration
    pub fn duration_limit(&self) -> f64 {
        2.0 * self.expected_duration
    }
}

/// Per-user lists of results, one inner list per simulated user
pub type AggregateResults = Vec<Vec<QueryResult>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_spec_copies_expectations() {
        let spec = QuerySpec {
            query: "SELECT 1".to_string(),
            expected_duration: 2.0,
            expected_row_count: 1,
        };
        let result = QueryResult::from_spec(&spec, STATUS_OK.to_string(), 1, 0.25);

        assert!(result.is_ok());
        assert_eq!(result.query, "SELECT 1");
        assert_eq!(result.expected_row_count, 1);
        assert_eq!(result.duration_limit(), 4.0);
    }

    #[test]
    fn test_duration_never_negative() {
        let spec = QuerySpec {
            query: "SELECT 1".to_string(),
            expected_duration: 1.0,
            expected_row_count: 0,
        };
        let result = QueryResult::from_spec(&spec, "ERROR".to_string(), 0, -0.5);
        assert_eq!(result.execution_duration, 0.0);
        assert!(!result.is_ok());
    }
}
