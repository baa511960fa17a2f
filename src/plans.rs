//! Plan tier → `allowed_containers` table.

use std::collections::HashMap;

use thiserror::Error;

pub const DEFAULT_PLAN: &str = "basic";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid plan quota entry: {0}")]
pub struct PlanParseError(String);

/// Static mapping consulted on license creation and plan changes.
#[derive(Debug, Clone)]
pub struct PlanTable {
    quotas: HashMap<String, i64>,
    default_plan: String,
}

impl Default for PlanTable {
    fn default() -> Self {
        let quotas = [("basic", 1), ("pro", 5), ("enterprise", 25)]
            .into_iter()
            .map(|(plan, quota)| (plan.to_string(), quota))
            .collect();
        Self {
            quotas,
            default_plan: DEFAULT_PLAN.to_string(),
        }
    }
}

impl PlanTable {
    /// Parse `basic=1,pro=5,enterprise=25`. Entries override the defaults.
    pub fn parse(spec: &str) -> Result<Self, PlanParseError> {
        let mut table = Self::default();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (plan, quota) = entry
                .split_once('=')
                .ok_or_else(|| PlanParseError(entry.to_string()))?;
            let quota: i64 = quota
                .trim()
                .parse()
                .map_err(|_| PlanParseError(entry.to_string()))?;
            if quota < 1 {
                return Err(PlanParseError(entry.to_string()));
            }
            table.quotas.insert(normalize_plan(plan), quota);
        }
        Ok(table)
    }

    pub fn default_plan(&self) -> &str {
        &self.default_plan
    }

    /// Quota for a plan; unknown plans get the default plan's quota.
    pub fn quota_for(&self, plan: &str) -> i64 {
        self.quotas
            .get(&normalize_plan(plan))
            .or_else(|| self.quotas.get(&self.default_plan))
            .copied()
            .unwrap_or(1)
    }
}

pub fn normalize_plan(plan: &str) -> String {
    plan.trim().to_lowercase()
}
