//! Trigger parsing and next-run computation.
//!
//! Both time-based scheduled tasks and event-based automation share this
//! small seam so retry, backoff, and logging stay on one code path.

use chrono::{DateTime, Utc};
use croner::Cron;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TriggerError {
    #[error("Invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },
}

/// What causes a task or rule to fire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trigger {
    /// Five-field cron expression, evaluated in UTC
    Cron { expr: String },
    /// Named event descriptor, fired by `evaluate` rather than the clock
    Event { name: String },
}

impl Trigger {
    /// Build a cron trigger, validating the expression up front.
    pub fn cron(expr: &str) -> Result<Self, TriggerError> {
        parse_cron(expr)?;
        Ok(Self::Cron {
            expr: expr.to_string(),
        })
    }

    pub fn event(name: impl Into<String>) -> Self {
        Self::Event { name: name.into() }
    }

    /// Next firing time strictly after `after`. Event triggers have none.
    pub fn next_run_at(
        &self,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, TriggerError> {
        match self {
            Self::Cron { expr } => {
                let cron = parse_cron(expr)?;
                Ok(cron.find_next_occurrence(&after, false).ok())
            }
            Self::Event { .. } => Ok(None),
        }
    }

    pub fn matches_event(&self, event_name: &str) -> bool {
        matches!(self, Self::Event { name } if name == event_name)
    }
}

fn parse_cron(expr: &str) -> Result<Cron, TriggerError> {
    Cron::new(expr)
        .parse()
        .map_err(|e| TriggerError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })
}
