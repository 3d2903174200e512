//! Pointer executor.
//!
//! Advances one workflow instance as far as it can go right now: every due
//! execution pointer runs in order, pointers created along the way run in the
//! same pass, and when nothing else is due the instance's `next_execution` is
//! recomputed (or the instance completes).
//!
//! The executor mutates the instance in place and returns the execution
//! errors it produced. Persisting both is the caller's job, with one
//! exception: a pointer that starts waiting for an event registers its
//! subscription (and re-queues already-published matching events) directly.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use waypoint_types::error::PersistenceError;
use waypoint_types::event::{EventSubscription, LifecycleEvent};
use waypoint_types::workflow::{
    ExecutionError, ExecutionPointer, PointerStatus, WorkflowInstance, WorkflowStatus,
};

use super::definition::{StepContext, StepDefinition, StepOutcome, WorkflowDefinition};
use super::retry::{ErrorDecision, ErrorPolicyEngine, PolicyDefaults, schedule_after};
use crate::clock::Clock;
use crate::event::LifecycleBus;
use crate::repository::PersistenceProvider;

/// What a single `execute` pass produced.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Step failures, in the order they happened.
    pub errors: Vec<ExecutionError>,
    /// Number of step bodies invoked.
    pub steps_run: usize,
    /// Store fault that cut the pass short. The instance is left mid-pass
    /// and must not be persisted; `errors` still holds every failure
    /// recorded before the fault.
    pub fault: Option<PersistenceError>,
}

pub struct WorkflowExecutor<P> {
    store: Arc<P>,
    clock: Arc<dyn Clock>,
    bus: LifecycleBus,
    defaults: PolicyDefaults,
}

impl<P: PersistenceProvider> WorkflowExecutor<P> {
    pub fn new(
        store: Arc<P>,
        clock: Arc<dyn Clock>,
        bus: LifecycleBus,
        defaults: PolicyDefaults,
    ) -> Self {
        Self {
            store,
            clock,
            bus,
            defaults,
        }
    }

    /// Run every due pointer of `instance` against `definition`.
    ///
    /// Instances that are not `Runnable` are left untouched. A store fault
    /// stops the pass and is returned in [`ExecutionReport::fault`].
    pub async fn execute(
        &self,
        instance: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        if instance.status != WorkflowStatus::Runnable {
            return report;
        }

        if instance.execution_pointers.is_empty() {
            if let Some(first) = definition.first_step() {
                instance
                    .execution_pointers
                    .push(ExecutionPointer::new(first.id, first.name.clone()));
            }
        }

        // A pointer runs at most once per pass, so a zero-delay retry waits
        // for the next poll instead of spinning here.
        let mut visited: HashSet<String> = HashSet::new();
        'pass: loop {
            let now = self.clock.now();
            let due: Vec<String> = instance
                .execution_pointers
                .iter()
                .filter(|p| p.is_due(now) && !visited.contains(&p.id))
                .map(|p| p.id.clone())
                .collect();
            if due.is_empty() {
                break;
            }

            for pointer_id in due {
                if instance.status != WorkflowStatus::Runnable {
                    break 'pass;
                }
                visited.insert(pointer_id.clone());
                if let Err(e) = self
                    .run_pointer(instance, definition, &pointer_id, &mut report)
                    .await
                {
                    report.fault = Some(e);
                    return report;
                }
            }
        }

        self.finish_pass(instance);
        report
    }

    async fn run_pointer(
        &self,
        instance: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        pointer_id: &str,
        report: &mut ExecutionReport,
    ) -> Result<(), PersistenceError> {
        let now = self.clock.now();
        let Some(pointer) = instance.pointer(pointer_id).cloned() else {
            return Ok(());
        };

        let Some(step) = definition.get_step(pointer.step_id) else {
            tracing::warn!(
                workflow_id = %instance.id,
                step_id = pointer.step_id,
                definition_id = %definition.id,
                "pointer refers to a step missing from the definition"
            );
            report.errors.push(ExecutionError::new(
                &instance.id,
                pointer_id,
                format!(
                    "step {} not found in workflow definition {} v{}",
                    pointer.step_id, definition.id, definition.version
                ),
                now,
            ));
            ErrorPolicyEngine::apply(ErrorDecision::Terminate, instance, pointer_id, now);
            return Ok(());
        };

        // The delay requested by a `Sleep` outcome has elapsed.
        if pointer.status == PointerStatus::Sleeping {
            self.complete_pointer(instance, definition, step, pointer_id, now);
            return Ok(());
        }

        if let Some(p) = instance.pointer_mut(pointer_id) {
            p.status = PointerStatus::Running;
            p.sleep_until = None;
            p.start_time.get_or_insert(now);
        }
        self.bus.publish(LifecycleEvent::StepStarted {
            workflow_id: instance.id.clone(),
            execution_pointer_id: pointer_id.to_string(),
            step_id: step.id,
            step_name: step.name.clone(),
        });
        tracing::debug!(
            workflow_id = %instance.id,
            step_id = step.id,
            step = %step.name,
            attempt = pointer.retry_count + 1,
            "running step"
        );

        let ctx = StepContext {
            workflow_id: instance.id.clone(),
            pointer_id: pointer_id.to_string(),
            step_id: step.id,
            step_name: step.name.clone(),
            data: instance.data.clone(),
            event_data: pointer.event_data.clone(),
            retry_count: pointer.retry_count,
        };
        report.steps_run += 1;
        let result = (step.body)(ctx.clone()).await;
        let now = self.clock.now();

        match result {
            Ok(StepOutcome::Next) => {
                self.complete_pointer(instance, definition, step, pointer_id, now);
            }
            Ok(StepOutcome::Output(data)) => {
                instance.data = data;
                self.complete_pointer(instance, definition, step, pointer_id, now);
            }
            Ok(StepOutcome::Sleep(duration)) => {
                let until = schedule_after(now, duration);
                if let Some(p) = instance.pointer_mut(pointer_id) {
                    p.status = PointerStatus::Sleeping;
                    p.sleep_until = Some(until);
                }
                tracing::debug!(
                    workflow_id = %instance.id,
                    step_id = step.id,
                    %until,
                    "step sleeping"
                );
            }
            Ok(StepOutcome::WaitForEvent {
                event_name,
                event_key,
                effective_time,
            }) => {
                let as_of = effective_time.unwrap_or(instance.create_time);
                self.wait_for_event(instance, step, pointer_id, event_name, event_key, as_of)
                    .await?;
            }
            Err(err) => {
                self.handle_failure(instance, definition, step, pointer_id, ctx, err, report, now)
                    .await;
            }
        }

        Ok(())
    }

    fn complete_pointer(
        &self,
        instance: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        step: &StepDefinition,
        pointer_id: &str,
        now: DateTime<Utc>,
    ) {
        if let Some(p) = instance.pointer_mut(pointer_id) {
            p.finish(PointerStatus::Complete, now);
        }
        self.bus.publish(LifecycleEvent::StepCompleted {
            workflow_id: instance.id.clone(),
            execution_pointer_id: pointer_id.to_string(),
            step_id: step.id,
            step_name: step.name.clone(),
        });
        Self::advance(instance, definition, step.id);
    }

    /// Create the pointer for the step after `step_id`, if there is one.
    fn advance(instance: &mut WorkflowInstance, definition: &WorkflowDefinition, step_id: usize) {
        if let Some(next) = definition.next_step(step_id) {
            instance
                .execution_pointers
                .push(ExecutionPointer::new(next.id, next.name.clone()));
        }
    }

    async fn wait_for_event(
        &self,
        instance: &mut WorkflowInstance,
        step: &StepDefinition,
        pointer_id: &str,
        event_name: String,
        event_key: String,
        as_of: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        if let Some(p) = instance.pointer_mut(pointer_id) {
            p.status = PointerStatus::WaitingForEvent;
            p.event_name = Some(event_name.clone());
            p.event_key = Some(event_key.clone());
            p.event_published = false;
            p.event_data = None;
        }

        let subscription = EventSubscription {
            id: String::new(),
            workflow_id: instance.id.clone(),
            step_id: step.id,
            execution_pointer_id: pointer_id.to_string(),
            event_name: event_name.clone(),
            event_key: event_key.clone(),
            subscribe_as_of: as_of,
        };
        let subscription_id = self.store.create_event_subscription(&subscription).await?;
        tracing::debug!(
            workflow_id = %instance.id,
            %subscription_id,
            %event_name,
            %event_key,
            "waiting for event"
        );

        // Events published before the subscription existed were already
        // dispatched to nobody; put them back in the queue.
        for event_id in self.store.get_events(&event_name, &event_key, as_of).await? {
            self.store.mark_event_unprocessed(&event_id).await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_failure(
        &self,
        instance: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        step: &StepDefinition,
        pointer_id: &str,
        ctx: StepContext,
        err: anyhow::Error,
        report: &mut ExecutionReport,
        now: DateTime<Utc>,
    ) {
        let message = format!("{err:#}");
        report
            .errors
            .push(ExecutionError::new(&instance.id, pointer_id, &message, now));

        let Some(pointer) = instance.pointer(pointer_id) else {
            return;
        };
        let decision =
            ErrorPolicyEngine::decide(step, pointer, &instance.data, &self.defaults, now);

        let compensation = match (&decision, &step.compensate_with) {
            (ErrorDecision::Compensate, Some(compensate)) => Some(compensate(ctx).await),
            _ => None,
        };
        if let Some(Err(comp_err)) = compensation {
            tracing::warn!(
                workflow_id = %instance.id,
                step_id = step.id,
                error = %comp_err,
                "compensation failed"
            );
            report.errors.push(ExecutionError::new(
                &instance.id,
                pointer_id,
                format!("compensation failed: {comp_err:#}"),
                now,
            ));
        }

        let advance = ErrorPolicyEngine::apply(decision, instance, pointer_id, now);
        tracing::warn!(
            workflow_id = %instance.id,
            step_id = step.id,
            step = %step.name,
            error = %message,
            decision = ?decision,
            "step failed"
        );
        self.bus.publish(LifecycleEvent::StepFailed {
            workflow_id: instance.id.clone(),
            execution_pointer_id: pointer_id.to_string(),
            step_id: step.id,
            error: message,
            policy: ErrorPolicyEngine::effective_policy(step, &self.defaults),
            resulting_status: instance.status,
        });

        if advance {
            Self::advance(instance, definition, step.id);
        }
    }

    /// Settle the instance after a pass: complete it, or work out when it is
    /// next due.
    fn finish_pass(&self, instance: &mut WorkflowInstance) {
        let now = self.clock.now();
        match instance.status {
            WorkflowStatus::Runnable if instance.active_pointers().next().is_none() => {
                instance.status = WorkflowStatus::Complete;
                instance.complete_time = Some(now);
                instance.next_execution = None;
                tracing::info!(workflow_id = %instance.id, "workflow complete");
                self.bus.publish(LifecycleEvent::WorkflowCompleted {
                    workflow_id: instance.id.clone(),
                });
            }
            WorkflowStatus::Runnable => {
                instance.next_execution = next_execution(instance, now);
            }
            WorkflowStatus::Terminated => {
                instance.next_execution = None;
                instance.complete_time.get_or_insert(now);
                tracing::info!(workflow_id = %instance.id, "workflow terminated");
                self.bus.publish(LifecycleEvent::WorkflowTerminated {
                    workflow_id: instance.id.clone(),
                });
            }
            WorkflowStatus::Suspended => {
                instance.next_execution = None;
                tracing::info!(workflow_id = %instance.id, "workflow suspended");
                self.bus.publish(LifecycleEvent::WorkflowSuspended {
                    workflow_id: instance.id.clone(),
                });
            }
            WorkflowStatus::Running | WorkflowStatus::Complete => {}
        }
    }
}

/// Earliest time any active pointer can make progress. Pointers parked on an
/// undelivered event never schedule the instance.
pub fn next_execution(instance: &WorkflowInstance, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    instance
        .active_pointers()
        .filter(|p| !p.is_waiting_for_event())
        .map(|p| {
            if p.is_due(now) {
                now
            } else {
                p.sleep_until.unwrap_or(now)
            }
        })
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn pointer(status: PointerStatus, sleep_until: Option<DateTime<Utc>>) -> ExecutionPointer {
        let mut p = ExecutionPointer::new(0, "s");
        p.status = status;
        p.sleep_until = sleep_until;
        p
    }

    #[test]
    fn next_execution_picks_earliest_sleeper() {
        let now = Utc::now();
        let mut wf = WorkflowInstance::new("wf", 1, json!(null), now);
        wf.execution_pointers.push(pointer(
            PointerStatus::Sleeping,
            Some(now + Duration::seconds(30)),
        ));
        wf.execution_pointers.push(pointer(
            PointerStatus::Pending,
            Some(now + Duration::seconds(10)),
        ));
        assert_eq!(next_execution(&wf, now), Some(now + Duration::seconds(10)));
    }

    #[test]
    fn next_execution_is_now_when_something_is_due() {
        let now = Utc::now();
        let mut wf = WorkflowInstance::new("wf", 1, json!(null), now);
        wf.execution_pointers.push(pointer(
            PointerStatus::Sleeping,
            Some(now + Duration::seconds(30)),
        ));
        wf.execution_pointers
            .push(pointer(PointerStatus::Pending, None));
        assert_eq!(next_execution(&wf, now), Some(now));
    }

    #[test]
    fn event_waiters_do_not_schedule() {
        let now = Utc::now();
        let mut wf = WorkflowInstance::new("wf", 1, json!(null), now);
        wf.execution_pointers
            .push(pointer(PointerStatus::WaitingForEvent, None));
        assert_eq!(next_execution(&wf, now), None);

        wf.execution_pointers[0].event_published = true;
        assert_eq!(next_execution(&wf, now), Some(now));
    }

    #[test]
    fn inactive_pointers_are_ignored() {
        let now = Utc::now();
        let mut wf = WorkflowInstance::new("wf", 1, json!(null), now);
        let mut done = pointer(PointerStatus::Pending, None);
        done.finish(PointerStatus::Complete, now);
        wf.execution_pointers.push(done);
        assert_eq!(next_execution(&wf, now), None);
    }
}
