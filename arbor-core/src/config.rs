//! Planner configuration

use crate::{ArborError, ArborResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for plan generation, repair and resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Temperature for the primary generation call.
    pub primary_temperature: f32,
    /// Temperature for the targeted repair call.
    pub repair_temperature: f32,
    pub base_max_tokens: i32,
    pub tokens_per_operation: i32,
    pub max_tokens_cap: i32,
    pub primary_timeout: Duration,
    pub repair_timeout_base: Duration,
    pub repair_timeout_per_operation: Duration,
    /// Must stay below `primary_timeout`.
    pub repair_timeout_cap: Duration,
    /// Fraction of the tree's nodes an extracted name list must cover before
    /// the query is treated as a bulk rename.
    pub rename_list_coverage: f32,
    /// Conversation turns scanned for names and sent to the model.
    pub history_turns: usize,
    /// Candidates returned per resolve call.
    pub resolver_limit: usize,
    /// Confidence multiplier applied to wider-scope fallback matches.
    pub scope_widening_penalty: f32,
    /// Maximum length of a synthesized summary.
    pub summary_max_chars: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            primary_temperature: 0.2,
            repair_temperature: 0.0,
            base_max_tokens: 2000,
            tokens_per_operation: 150,
            max_tokens_cap: 16000,
            primary_timeout: Duration::from_secs(60),
            repair_timeout_base: Duration::from_secs(10),
            repair_timeout_per_operation: Duration::from_millis(500),
            repair_timeout_cap: Duration::from_secs(45),
            rename_list_coverage: 0.8,
            history_turns: 4,
            resolver_limit: 5,
            scope_widening_penalty: 0.6,
            summary_max_chars: 100,
        }
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ArborError {
    ArborError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl PlannerConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Durations are read in milliseconds, e.g. `ARBOR_PRIMARY_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        let ms = |key: &str, default: Duration| {
            env_parse::<u64>(key)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            primary_temperature: env_parse("ARBOR_PRIMARY_TEMPERATURE")
                .unwrap_or(d.primary_temperature),
            repair_temperature: env_parse("ARBOR_REPAIR_TEMPERATURE")
                .unwrap_or(d.repair_temperature),
            base_max_tokens: env_parse("ARBOR_BASE_MAX_TOKENS").unwrap_or(d.base_max_tokens),
            tokens_per_operation: env_parse("ARBOR_TOKENS_PER_OPERATION")
                .unwrap_or(d.tokens_per_operation),
            max_tokens_cap: env_parse("ARBOR_MAX_TOKENS_CAP").unwrap_or(d.max_tokens_cap),
            primary_timeout: ms("ARBOR_PRIMARY_TIMEOUT_MS", d.primary_timeout),
            repair_timeout_base: ms("ARBOR_REPAIR_TIMEOUT_BASE_MS", d.repair_timeout_base),
            repair_timeout_per_operation: ms(
                "ARBOR_REPAIR_TIMEOUT_PER_OPERATION_MS",
                d.repair_timeout_per_operation,
            ),
            repair_timeout_cap: ms("ARBOR_REPAIR_TIMEOUT_CAP_MS", d.repair_timeout_cap),
            rename_list_coverage: env_parse("ARBOR_RENAME_LIST_COVERAGE")
                .unwrap_or(d.rename_list_coverage),
            history_turns: env_parse("ARBOR_HISTORY_TURNS").unwrap_or(d.history_turns),
            resolver_limit: env_parse("ARBOR_RESOLVER_LIMIT").unwrap_or(d.resolver_limit),
            scope_widening_penalty: env_parse("ARBOR_SCOPE_WIDENING_PENALTY")
                .unwrap_or(d.scope_widening_penalty),
            summary_max_chars: env_parse("ARBOR_SUMMARY_MAX_CHARS").unwrap_or(d.summary_max_chars),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ArborResult<()> {
        for (field, value) in [
            ("primary_temperature", self.primary_temperature),
            ("repair_temperature", self.repair_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(invalid(field, value, "temperature must be between 0.0 and 2.0"));
            }
        }

        if self.base_max_tokens <= 0 {
            return Err(invalid(
                "base_max_tokens",
                self.base_max_tokens,
                "base_max_tokens must be greater than 0",
            ));
        }
        if self.tokens_per_operation < 0 {
            return Err(invalid(
                "tokens_per_operation",
                self.tokens_per_operation,
                "tokens_per_operation must be non-negative",
            ));
        }
        if self.max_tokens_cap < self.base_max_tokens {
            return Err(invalid(
                "max_tokens_cap",
                self.max_tokens_cap,
                "max_tokens_cap must be at least base_max_tokens",
            ));
        }

        if self.primary_timeout.is_zero() {
            return Err(invalid(
                "primary_timeout",
                format!("{:?}", self.primary_timeout),
                "primary_timeout must be greater than 0",
            ));
        }
        if self.repair_timeout_cap >= self.primary_timeout {
            return Err(invalid(
                "repair_timeout_cap",
                format!("{:?}", self.repair_timeout_cap),
                "repair_timeout_cap must be below primary_timeout",
            ));
        }

        if !(0.0..=1.0).contains(&self.rename_list_coverage) || self.rename_list_coverage == 0.0 {
            return Err(invalid(
                "rename_list_coverage",
                self.rename_list_coverage,
                "rename_list_coverage must be within (0.0, 1.0]",
            ));
        }
        if !(0.0..=1.0).contains(&self.scope_widening_penalty) {
            return Err(invalid(
                "scope_widening_penalty",
                self.scope_widening_penalty,
                "scope_widening_penalty must be between 0.0 and 1.0",
            ));
        }
        if self.resolver_limit == 0 {
            return Err(invalid("resolver_limit", 0, "resolver_limit must be greater than 0"));
        }
        if self.summary_max_chars == 0 {
            return Err(invalid(
                "summary_max_chars",
                0,
                "summary_max_chars must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Output-token budget for a response expected to carry `expected_ops`
    /// function calls.
    pub fn token_budget(&self, expected_ops: usize) -> i32 {
        let per_op = i64::from(self.tokens_per_operation) * expected_ops as i64;
        let budget = i64::from(self.base_max_tokens) + per_op;
        budget.min(i64::from(self.max_tokens_cap)) as i32
    }

    /// Wall-clock budget for a repair call asked to produce `missing` operations.
    pub fn repair_timeout(&self, missing: usize) -> Duration {
        let scaled = self.repair_timeout_base
            + self
                .repair_timeout_per_operation
                .saturating_mul(missing.min(u32::MAX as usize) as u32);
        scaled.min(self.repair_timeout_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PlannerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_token_budget_scales_and_caps() {
        let config = PlannerConfig::default();
        assert_eq!(config.token_budget(0), 2000);
        assert_eq!(config.token_budget(10), 3500);
        assert_eq!(config.token_budget(10_000), 16000);
    }

    #[test]
    fn test_repair_timeout_scales_and_caps() {
        let config = PlannerConfig::default();
        assert_eq!(config.repair_timeout(0), Duration::from_secs(10));
        assert_eq!(config.repair_timeout(4), Duration::from_secs(12));
        assert_eq!(config.repair_timeout(1000), Duration::from_secs(45));
        assert!(config.repair_timeout(1000) < config.primary_timeout);
    }

    #[test]
    fn test_validate_rejects_repair_cap_above_primary() {
        let config = PlannerConfig {
            repair_timeout_cap: Duration::from_secs(90),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("repair_timeout_cap"));
    }

    #[test]
    fn test_validate_rejects_bad_coverage() {
        let config = PlannerConfig {
            rename_list_coverage: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_token_budget_monotonic_and_bounded(a in 0usize..500, b in 0usize..500) {
            let config = PlannerConfig::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(config.token_budget(lo) <= config.token_budget(hi));
            prop_assert!(config.token_budget(hi) <= config.max_tokens_cap);
            prop_assert!(config.token_budget(lo) >= config.base_max_tokens);
        }
    }
}
