//! Error policy engine.
//!
//! Turns a step failure into a decision (`decide`) and then applies that
//! decision to the instance (`apply`). Both halves are pure with respect to
//! storage: recording the `ExecutionError` and persisting the instance is the
//! caller's job.

use chrono::{DateTime, Duration, Utc};
use waypoint_types::config::EngineConfig;
use waypoint_types::workflow::{
    ErrorPolicy, ExecutionPointer, PointerStatus, WorkflowInstance, WorkflowStatus,
};

use super::definition::StepDefinition;

/// Upper bound on any scheduled delay (about a century).
const MAX_DELAY_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// `now + delay`, with the delay capped at [`MAX_DELAY_SECS`]. Saturates at
/// the latest representable time instead of overflowing.
pub fn schedule_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delay = delay.min(Duration::seconds(MAX_DELAY_SECS as i64));
    now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// PolicyDefaults
// ---------------------------------------------------------------------------

/// Fallbacks for steps that declare no policy or no retry interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyDefaults {
    pub behavior: ErrorPolicy,
    pub retry_interval: Duration,
}

impl PolicyDefaults {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            behavior: config.default_error_behavior,
            retry_interval: config.default_retry_interval(),
        }
    }
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

// ---------------------------------------------------------------------------
// ErrorDecision
// ---------------------------------------------------------------------------

/// What to do with a failed pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Fail the pointer and terminate the instance.
    Terminate,
    /// Re-run the step at `retry_at`.
    Retry { retry_at: DateTime<Utc> },
    /// The cancel condition fired: stop retrying and move on.
    CancelRetries,
    /// Park the instance until resumed.
    Suspend,
    /// Mark the pointer compensated and move on. The caller runs the
    /// compensation body before applying.
    Compensate,
}

// ---------------------------------------------------------------------------
// ErrorPolicyEngine
// ---------------------------------------------------------------------------

/// Stateless policy engine; all logic lives in associated functions.
pub struct ErrorPolicyEngine;

impl ErrorPolicyEngine {
    /// The policy in force for `step`.
    pub fn effective_policy(step: &StepDefinition, defaults: &PolicyDefaults) -> ErrorPolicy {
        step.on_error.unwrap_or(defaults.behavior)
    }

    /// Delay before the next attempt under `policy`.
    pub fn retry_delay(policy: ErrorPolicy, defaults: &PolicyDefaults) -> Duration {
        match policy {
            ErrorPolicy::Retry {
                interval_secs: Some(secs),
            } => Duration::seconds(secs.min(MAX_DELAY_SECS) as i64),
            _ => defaults.retry_interval,
        }
    }

    /// Decide how to handle a failure of `pointer` running `step`.
    ///
    /// The cancel condition is only consulted under a retry policy. A
    /// compensate policy without a compensation body degrades to terminate.
    pub fn decide(
        step: &StepDefinition,
        pointer: &ExecutionPointer,
        data: &serde_json::Value,
        defaults: &PolicyDefaults,
        now: DateTime<Utc>,
    ) -> ErrorDecision {
        let policy = Self::effective_policy(step, defaults);
        match policy {
            ErrorPolicy::Terminate => ErrorDecision::Terminate,
            ErrorPolicy::Suspend => ErrorDecision::Suspend,
            ErrorPolicy::Compensate if step.compensate_with.is_some() => ErrorDecision::Compensate,
            ErrorPolicy::Compensate => ErrorDecision::Terminate,
            ErrorPolicy::Retry { .. } => {
                let cancelled = step
                    .cancel_when
                    .as_ref()
                    .is_some_and(|predicate| predicate(data, pointer));
                if cancelled {
                    ErrorDecision::CancelRetries
                } else {
                    ErrorDecision::Retry {
                        retry_at: schedule_after(now, Self::retry_delay(policy, defaults)),
                    }
                }
            }
        }
    }

    /// Apply `decision` to the pointer and instance.
    ///
    /// Returns `true` when the instance should advance past this step.
    pub fn apply(
        decision: ErrorDecision,
        instance: &mut WorkflowInstance,
        pointer_id: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(pointer) = instance.pointer_mut(pointer_id) else {
            return false;
        };

        match decision {
            ErrorDecision::Terminate => {
                pointer.finish(PointerStatus::Failed, now);
                instance.status = WorkflowStatus::Terminated;
                instance.next_execution = None;
                instance.complete_time = Some(now);
                false
            }
            ErrorDecision::Retry { retry_at } => {
                pointer.status = PointerStatus::Pending;
                pointer.retry_count += 1;
                pointer.sleep_until = Some(retry_at);
                instance.next_execution = Some(retry_at);
                false
            }
            ErrorDecision::CancelRetries => {
                pointer.finish(PointerStatus::Cancelled, now);
                true
            }
            ErrorDecision::Suspend => {
                pointer.status = PointerStatus::Pending;
                pointer.sleep_until = None;
                instance.status = WorkflowStatus::Suspended;
                instance.next_execution = None;
                false
            }
            ErrorDecision::Compensate => {
                pointer.finish(PointerStatus::Compensated, now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::{StepOutcome, step_fn};
    use serde_json::json;

    fn failing_step() -> StepDefinition {
        StepDefinition::new("boom", step_fn(|_| async { anyhow::bail!("boom") }))
    }

    fn instance_with_pointer(now: DateTime<Utc>) -> (WorkflowInstance, String) {
        let mut wf = WorkflowInstance::new("wf", 1, json!({}), now);
        let pointer = ExecutionPointer::new(0, "boom");
        let id = pointer.id.clone();
        wf.execution_pointers.push(pointer);
        (wf, id)
    }

    #[test]
    fn schedule_after_caps_huge_delays() {
        let now = Utc::now();
        assert_eq!(schedule_after(now, Duration::seconds(5)), now + Duration::seconds(5));

        let century = Duration::seconds(MAX_DELAY_SECS as i64);
        assert_eq!(schedule_after(now, Duration::days(100_000_000)), now + century);
        assert_eq!(schedule_after(now, Duration::MAX), now + century);
        assert_eq!(
            schedule_after(DateTime::<Utc>::MAX_UTC - Duration::days(1), century),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[test]
    fn undeclared_policy_uses_defaults() {
        let defaults = PolicyDefaults {
            behavior: ErrorPolicy::Terminate,
            retry_interval: Duration::seconds(60),
        };
        assert_eq!(
            ErrorPolicyEngine::effective_policy(&failing_step(), &defaults),
            ErrorPolicy::Terminate
        );
    }

    #[test]
    fn retry_delay_prefers_step_interval() {
        let defaults = PolicyDefaults::default();
        assert_eq!(
            ErrorPolicyEngine::retry_delay(ErrorPolicy::retry_after(5), &defaults),
            Duration::seconds(5)
        );
        assert_eq!(
            ErrorPolicyEngine::retry_delay(ErrorPolicy::default(), &defaults),
            Duration::seconds(60)
        );
    }

    #[test]
    fn retry_reschedules_and_counts() {
        let now = Utc::now();
        let (mut wf, pid) = instance_with_pointer(now);
        let step = failing_step().on_error(ErrorPolicy::retry_after(5));
        let defaults = PolicyDefaults::default();

        let decision =
            ErrorPolicyEngine::decide(&step, wf.pointer(&pid).unwrap(), &wf.data, &defaults, now);
        assert_eq!(
            decision,
            ErrorDecision::Retry {
                retry_at: now + Duration::seconds(5)
            }
        );

        let advance = ErrorPolicyEngine::apply(decision, &mut wf, &pid, now);
        assert!(!advance);
        let p = wf.pointer(&pid).unwrap();
        assert_eq!(p.retry_count, 1);
        assert_eq!(p.status, PointerStatus::Pending);
        assert_eq!(p.sleep_until, Some(now + Duration::seconds(5)));
        assert_eq!(wf.next_execution, Some(now + Duration::seconds(5)));
        assert_eq!(wf.status, WorkflowStatus::Runnable);
    }

    #[test]
    fn cancel_condition_stops_retries() {
        let now = Utc::now();
        let (mut wf, pid) = instance_with_pointer(now);
        wf.data = json!({"give_up": true});
        let step = failing_step()
            .on_error(ErrorPolicy::retry_after(5))
            .cancel_when(|data, _| data["give_up"] == json!(true));

        let decision = ErrorPolicyEngine::decide(
            &step,
            wf.pointer(&pid).unwrap(),
            &wf.data,
            &PolicyDefaults::default(),
            now,
        );
        assert_eq!(decision, ErrorDecision::CancelRetries);
        assert!(ErrorPolicyEngine::apply(decision, &mut wf, &pid, now));
        let p = wf.pointer(&pid).unwrap();
        assert_eq!(p.status, PointerStatus::Cancelled);
        assert!(!p.active);
    }

    #[test]
    fn cancel_condition_ignored_for_terminate() {
        let now = Utc::now();
        let (wf, pid) = instance_with_pointer(now);
        let step = failing_step()
            .on_error(ErrorPolicy::Terminate)
            .cancel_when(|_, _| true);

        let decision = ErrorPolicyEngine::decide(
            &step,
            wf.pointer(&pid).unwrap(),
            &wf.data,
            &PolicyDefaults::default(),
            now,
        );
        assert_eq!(decision, ErrorDecision::Terminate);
    }

    #[test]
    fn terminate_ends_the_instance() {
        let now = Utc::now();
        let (mut wf, pid) = instance_with_pointer(now);
        assert!(!ErrorPolicyEngine::apply(ErrorDecision::Terminate, &mut wf, &pid, now));
        assert_eq!(wf.status, WorkflowStatus::Terminated);
        assert_eq!(wf.next_execution, None);
        assert_eq!(wf.complete_time, Some(now));
        assert_eq!(wf.pointer(&pid).unwrap().status, PointerStatus::Failed);
    }

    #[test]
    fn suspend_parks_pointer_as_pending() {
        let now = Utc::now();
        let (mut wf, pid) = instance_with_pointer(now);
        wf.pointer_mut(&pid).unwrap().status = PointerStatus::Running;

        ErrorPolicyEngine::apply(ErrorDecision::Suspend, &mut wf, &pid, now);
        assert_eq!(wf.status, WorkflowStatus::Suspended);
        assert_eq!(wf.next_execution, None);
        let p = wf.pointer(&pid).unwrap();
        assert_eq!(p.status, PointerStatus::Pending);
        assert!(p.active);
    }

    #[test]
    fn compensate_without_body_terminates() {
        let now = Utc::now();
        let (wf, pid) = instance_with_pointer(now);
        let pointer = wf.pointer(&pid).unwrap();
        let defaults = PolicyDefaults::default();

        let bare = failing_step().on_error(ErrorPolicy::Compensate);
        assert_eq!(
            ErrorPolicyEngine::decide(&bare, pointer, &wf.data, &defaults, now),
            ErrorDecision::Terminate
        );

        let with_body = bare.compensate_with(step_fn(|_| async { Ok(StepOutcome::Next) }));
        assert_eq!(
            ErrorPolicyEngine::decide(&with_body, pointer, &wf.data, &defaults, now),
            ErrorDecision::Compensate
        );
    }

    #[test]
    fn apply_on_unknown_pointer_is_inert() {
        let now = Utc::now();
        let (mut wf, _) = instance_with_pointer(now);
        assert!(!ErrorPolicyEngine::apply(ErrorDecision::Terminate, &mut wf, "missing", now));
        assert_eq!(wf.status, WorkflowStatus::Runnable);
    }
}
