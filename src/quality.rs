// Data quality checks over the processed table
// Each check counts violating rows; a check passes when the count is zero.
// Checks never abort each other and never raise for a failed check.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// CHECK RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheck {
    pub name: String,
    pub violations: i64,
    pub passed: bool,
    pub detail: String,
}

impl QualityCheck {
    fn from_count(rule: &CheckRule, violations: i64) -> Self {
        QualityCheck {
            name: rule.name.to_string(),
            violations,
            passed: violations == 0,
            detail: format!("{} {}", violations, rule.noun),
        }
    }

    pub fn status(&self) -> &'static str {
        if self.passed {
            "PASS"
        } else {
            "FAIL"
        }
    }
}

// ============================================================================
// QUALITY REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub checks: Vec<QualityCheck>,
}

impl QualityReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failed_count(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }

    pub fn check(&self, name: &str) -> Option<&QualityCheck> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} quality checks passed",
            self.checks.len() - self.failed_count(),
            self.checks.len()
        )
    }
}

// ============================================================================
// RULES
// ============================================================================

struct CheckRule {
    name: &'static str,
    noun: &'static str,
    violation_sql: &'static str,
}

pub const NO_NULL_CRITICAL: &str = "No nulls in critical columns";
pub const PRICES_POSITIVE: &str = "All prices positive";
pub const DISTANCES_VALID: &str = "All distances valid";
pub const PRICE_PER_SQM_CALCULATED: &str = "Price per sqm calculated";

const RULES: [CheckRule; 4] = [
    CheckRule {
        name: NO_NULL_CRITICAL,
        noun: "nulls found",
        violation_sql: "SELECT COUNT(*) FROM properties_processed
                        WHERE price IS NULL OR suburb IS NULL OR type IS NULL",
    },
    CheckRule {
        name: PRICES_POSITIVE,
        noun: "invalid prices",
        violation_sql: "SELECT COUNT(*) FROM properties_processed WHERE price <= 0",
    },
    CheckRule {
        name: DISTANCES_VALID,
        noun: "invalid distances",
        violation_sql: "SELECT COUNT(*) FROM properties_processed WHERE km_from_cbd < 0",
    },
    CheckRule {
        name: PRICE_PER_SQM_CALCULATED,
        noun: "missing",
        violation_sql: "SELECT COUNT(*) FROM properties_processed
                        WHERE property_size > 0 AND price_per_sqm IS NULL",
    },
];

/// Run all four checks and log each as PASS/FAIL.
/// Errors only when a query itself cannot run.
pub fn run_quality_checks(conn: &Connection) -> Result<QualityReport> {
    info!("=== Running data quality checks ===");

    let mut checks = Vec::with_capacity(RULES.len());
    for rule in &RULES {
        let violations: i64 = conn
            .query_row(rule.violation_sql, [], |row| row.get(0))
            .with_context(|| format!("Quality check '{}' could not run", rule.name))?;

        let check = QualityCheck::from_count(rule, violations);
        info!("{}: {} ({})", check.status(), check.name, check.detail);
        checks.push(check);
    }

    let report = QualityReport { checks };
    if report.all_passed() {
        info!("All data quality checks passed!");
    } else {
        warn!("Some data quality checks failed: {}", report.summary());
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{setup_database, Session};

    /// Processed table without CHECK constraints, so violating rows can be injected
    fn unconstrained() -> Session {
        let session = Session::open_in_memory().unwrap();
        session
            .conn()
            .execute_batch(
                "CREATE TABLE properties_processed (
                    price REAL, suburb TEXT, type TEXT, km_from_cbd REAL,
                    property_size REAL, price_per_sqm REAL
                );
                INSERT INTO properties_processed VALUES (500000, 'Ryde', 'House', 12.0, 100, 5000);
                INSERT INTO properties_processed VALUES (900000, 'Manly', 'Unit', 15.0, NULL, NULL);",
            )
            .unwrap();
        session
    }

    #[test]
    fn test_clean_table_passes() {
        let session = unconstrained();
        let report = run_quality_checks(session.conn()).unwrap();

        assert_eq!(report.checks.len(), 4);
        assert!(report.all_passed());
        assert_eq!(report.summary(), "4/4 quality checks passed");
    }

    #[test]
    fn test_negative_price_flips_only_price_check() {
        let session = unconstrained();
        session
            .conn()
            .execute(
                "INSERT INTO properties_processed VALUES (-5, 'Ryde', 'House', 1.0, 50, -0.1)",
                [],
            )
            .unwrap();

        let report = run_quality_checks(session.conn()).unwrap();

        assert!(!report.all_passed());
        assert_eq!(report.failed_count(), 1);
        let price = report.check(PRICES_POSITIVE).unwrap();
        assert!(!price.passed);
        assert_eq!(price.violations, 1);
        assert_eq!(price.detail, "1 invalid prices");
        assert!(report.check(NO_NULL_CRITICAL).unwrap().passed);
        assert!(report.check(DISTANCES_VALID).unwrap().passed);
        assert!(report.check(PRICE_PER_SQM_CALCULATED).unwrap().passed);
    }

    #[test]
    fn test_all_checks_run_when_several_fail() {
        let session = unconstrained();
        session
            .conn()
            .execute_batch(
                "INSERT INTO properties_processed VALUES (100000, NULL, 'House', -2.0, 80, NULL);",
            )
            .unwrap();

        let report = run_quality_checks(session.conn()).unwrap();

        assert_eq!(report.checks.len(), 4);
        assert_eq!(report.failed_count(), 3);
        assert!(report.check(PRICES_POSITIVE).unwrap().passed);
    }

    #[test]
    fn test_empty_constrained_table_passes() {
        let session = Session::open_in_memory().unwrap();
        setup_database(session.conn()).unwrap();

        let report = run_quality_checks(session.conn()).unwrap();
        assert!(report.all_passed());
    }
}
