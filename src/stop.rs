//! Stop-condition evaluation
//!
//! Pure logic: a progress snapshot against a list of configured limits.
//! Any satisfied condition stops the crawl (logical OR). Unknown kinds and
//! missing or non-positive values are configuration errors at evaluation
//! time, never silently "never stop".

use crate::error::{Error, Result};
use crate::models::{Progress, StopCondition, StopConditionKind};

/// Evaluate configured limits against a progress snapshot
///
/// Returns `true` when the crawl should stop. Evaluation order is
/// irrelevant: conditions are side-effect free, and every condition is
/// validated even when an earlier one is already satisfied, so a bad
/// configuration always surfaces.
pub fn should_stop(conditions: &[StopCondition], progress: &Progress) -> Result<bool> {
    let mut stop = false;
    for condition in conditions {
        stop |= is_satisfied(condition, progress)?;
    }
    Ok(stop)
}

/// Validate a condition list without evaluating it
///
/// Used at queue time so a misconfigured job is rejected before it can run.
pub fn validate(conditions: &[StopCondition]) -> Result<()> {
    let zero = Progress {
        crawl_count: 0,
        data_count: 0,
        duration: chrono::Duration::zero(),
    };
    for condition in conditions {
        is_satisfied(condition, &zero)?;
    }
    Ok(())
}

fn is_satisfied(condition: &StopCondition, progress: &Progress) -> Result<bool> {
    let limit = match condition.value {
        Some(v) if v > 0 => v,
        Some(v) => {
            return Err(Error::Configuration {
                reason: format!("stop condition {:?} has non-positive value {v}", condition.kind),
            })
        }
        None => {
            return Err(Error::Configuration {
                reason: format!("stop condition {:?} is missing a value", condition.kind),
            })
        }
    };

    match condition.kind {
        StopConditionKind::MaxCrawlCount => Ok(progress.crawl_count >= limit as u64),
        StopConditionKind::MaxDataCount => Ok(progress.data_count >= limit as u64),
        StopConditionKind::MaxDurationSeconds => Ok(progress.duration.num_seconds() >= limit),
        StopConditionKind::Unknown => Err(Error::Configuration {
            reason: "unrecognized stop condition kind".to_string(),
        }),
    }
}
