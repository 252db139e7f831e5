//! Forward execution and compensation of a single saga instance.
//!
//! The executor never holds the context table lock across a call into the
//! saga definition. It snapshots the context, releases the lock, awaits the
//! step, then re-acquires the lock and re-checks the saga status before
//! applying the outcome. A saga that left `Running` in the meantime (stopped,
//! compensated externally) gets the late outcome settled per
//! `record_late_results` and is not driven further.

use std::time::Duration;

use common::SagaId;
use tokio::time::Instant;

use crate::context::SagaExecutionContext;
use crate::definition::{SagaDefinition, StepOutcome};
use crate::error::{Result, SagaError, StepError};
use crate::lifecycle::LifecycleRecorder;
use crate::state::{SagaStatus, StepStatus};
use crate::step::SagaStep;
use crate::table::ContextTable;

pub(crate) struct StepExecutor<'a> {
    definition: &'a dyn SagaDefinition,
    table: &'a ContextTable,
    recorder: &'a LifecycleRecorder,
    record_late_results: bool,
}

/// What to do after inspecting the step at the current index.
enum Next {
    Execute {
        step: SagaStep,
        snapshot: SagaExecutionContext,
    },
    Skipped,
    Finished(SagaExecutionContext),
    Halted(SagaExecutionContext),
}

enum Attempt {
    Outcome(StepOutcome),
    DeadlineElapsed,
}

/// A forward run that stopped before completing.
enum Settled {
    /// The saga is no longer `Running`; someone else owns its status.
    Halted(SagaExecutionContext),
    /// The saga reached `Failed` or `Timeout`, optionally followed by
    /// `Compensating`.
    Stopped {
        terminal: SagaExecutionContext,
        compensating: Option<SagaExecutionContext>,
    },
}

enum Applied {
    Advanced,
    Retry(StepError),
    Settled(Settled),
    /// The step succeeded after the saga started compensating; its effect
    /// must be undone too.
    CompensateLate,
}

impl<'a> StepExecutor<'a> {
    pub(crate) fn new(
        definition: &'a dyn SagaDefinition,
        table: &'a ContextTable,
        recorder: &'a LifecycleRecorder,
        record_late_results: bool,
    ) -> Self {
        Self {
            definition,
            table,
            recorder,
            record_late_results,
        }
    }

    /// Drives a `Running` saga from its current step to a terminal status.
    ///
    /// An instance that left `Running` before the executor got to it (stopped
    /// or compensated right after a launch) is returned untouched.
    pub(crate) async fn run(&self, saga_id: SagaId) -> Result<SagaExecutionContext> {
        let started = self
            .table
            .get(saga_id)
            .await
            .ok_or(SagaError::SagaNotFound(saga_id))?;
        if started.status != SagaStatus::Running {
            tracing::debug!(
                %saga_id,
                status = %started.status,
                "saga left Running before execution"
            );
            return Ok(started);
        }

        let deadline = if started.enable_timeout {
            Instant::now().checked_add(started.timeout)
        } else {
            None
        };

        loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return self.time_out(saga_id).await;
            }

            let (step, snapshot) = match self.next_step(saga_id).await? {
                Next::Execute { step, snapshot } => (step, snapshot),
                Next::Skipped => continue,
                Next::Finished(ctx) => {
                    self.recorder.transitioned(SagaStatus::Running, &ctx).await;
                    return Ok(ctx);
                }
                Next::Halted(ctx) => return Ok(ctx),
            };

            if let Some(ctx) = self.execute_step(saga_id, step, snapshot, deadline).await? {
                return Ok(ctx);
            }
        }
    }

    async fn next_step(&self, saga_id: SagaId) -> Result<Next> {
        let snapshot = self
            .table
            .get(saga_id)
            .await
            .ok_or(SagaError::SagaNotFound(saga_id))?;
        if snapshot.status != SagaStatus::Running {
            return Ok(Next::Halted(snapshot));
        }

        let index = snapshot.current_step_index;
        let execute = match snapshot.steps.get(index) {
            Some(step) => self.definition.should_execute_step(step, &snapshot),
            None => true,
        };

        self.table
            .update(saga_id, |ctx| -> Result<Next> {
                if ctx.status != SagaStatus::Running {
                    return Ok(Next::Halted(ctx.clone()));
                }
                if index >= ctx.steps.len() {
                    ctx.set_status(SagaStatus::Completed);
                    return Ok(Next::Finished(ctx.clone()));
                }

                let step = &mut ctx.steps[index];
                if !execute {
                    step.mark_skipped()?;
                    tracing::debug!(%saga_id, step = %step.step_id, "step skipped");
                    ctx.current_step_index += 1;
                    return Ok(Next::Skipped);
                }

                step.mark_executing()?;
                step.attempts = 1;
                let step = step.clone();
                Ok(Next::Execute {
                    step,
                    snapshot: ctx.clone(),
                })
            })
            .await
            .ok_or(SagaError::SagaNotFound(saga_id))?
    }

    /// Runs one step, retrying as allowed. Returns the context when the saga
    /// stops at this step, `None` when it advanced.
    async fn execute_step(
        &self,
        saga_id: SagaId,
        mut step: SagaStep,
        mut snapshot: SagaExecutionContext,
        deadline: Option<Instant>,
    ) -> Result<Option<SagaExecutionContext>> {
        tracing::debug!(%saga_id, step = %step.step_id, order = step.order, "executing step");

        loop {
            let outcome = match self.attempt(&step, &snapshot, deadline).await {
                Attempt::Outcome(outcome) => outcome,
                Attempt::DeadlineElapsed => return self.time_out(saga_id).await.map(Some),
            };

            let error = match self.apply_outcome(saga_id, &step, outcome).await? {
                Applied::Advanced => return Ok(None),
                Applied::Settled(settled) => return self.finish(saga_id, settled).await.map(Some),
                Applied::CompensateLate => {
                    self.compensate_step(saga_id, &step.step_id).await?;
                    return self
                        .table
                        .get(saga_id)
                        .await
                        .ok_or(SagaError::SagaNotFound(saga_id))
                        .map(Some);
                }
                Applied::Retry(error) => error,
            };

            metrics::counter!(
                "saga_step_retries_total",
                "saga_type" => snapshot.saga_type.clone()
            )
            .increment(1);
            tracing::warn!(
                %saga_id,
                step = %step.step_id,
                error = %error,
                delay_ms = step.retry_delay.as_millis() as u64,
                "step failed, retrying"
            );

            if !sleep_before_retry(step.retry_delay, deadline).await {
                return self.time_out(saga_id).await.map(Some);
            }

            match self.begin_retry(saga_id, &step, error).await? {
                Next::Execute {
                    step: retried,
                    snapshot: latest,
                } => {
                    step = retried;
                    snapshot = latest;
                }
                Next::Halted(ctx) | Next::Finished(ctx) => return Ok(Some(ctx)),
                Next::Skipped => return Ok(None),
            }
        }
    }

    async fn attempt(
        &self,
        step: &SagaStep,
        snapshot: &SagaExecutionContext,
        deadline: Option<Instant>,
    ) -> Attempt {
        let call = async {
            let call = self.definition.execute_step(step, snapshot);
            match step.timeout {
                Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                    Err(StepError::new(format!(
                        "step '{}' timed out after {}ms",
                        step.step_name,
                        limit.as_millis()
                    )))
                }),
                None => call.await,
            }
        };

        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, call)
                .await
                .map_or(Attempt::DeadlineElapsed, Attempt::Outcome),
            None => Attempt::Outcome(call.await),
        }
    }

    async fn apply_outcome(
        &self,
        saga_id: SagaId,
        step: &SagaStep,
        outcome: StepOutcome,
    ) -> Result<Applied> {
        let record_late = self.record_late_results;
        self.table
            .update(saga_id, |ctx| -> Result<Applied> {
                if ctx.status != SagaStatus::Running {
                    return match settle_late_step(ctx, &step.step_id, outcome, record_late)? {
                        LateStep::Settled => Ok(Applied::Settled(Settled::Halted(ctx.clone()))),
                        LateStep::NeedsCompensation => Ok(Applied::CompensateLate),
                    };
                }

                let index = ctx.current_step_index;
                match outcome {
                    Ok(value) => {
                        ctx.steps[index].mark_completed(value)?;
                        ctx.current_step_index += 1;
                        tracing::debug!(%saga_id, step = %step.step_id, "step completed");
                        Ok(Applied::Advanced)
                    }
                    Err(error) => {
                        let attempts = ctx.steps[index].attempts;
                        if attempts <= step.max_retries && ctx.retry_count < ctx.max_retries {
                            ctx.retry_count += 1;
                            return Ok(Applied::Retry(error));
                        }

                        ctx.steps[index].mark_failed(error.message())?;
                        ctx.error = Some(format!("step '{}' failed: {error}", step.step_name));
                        Ok(Applied::Settled(stop_forward_run(ctx, SagaStatus::Failed)))
                    }
                }
            })
            .await
            .ok_or(SagaError::SagaNotFound(saga_id))?
    }

    async fn begin_retry(
        &self,
        saga_id: SagaId,
        step: &SagaStep,
        error: StepError,
    ) -> Result<Next> {
        let record_late = self.record_late_results;
        self.table
            .update(saga_id, |ctx| -> Result<Next> {
                if ctx.status != SagaStatus::Running {
                    settle_late_step(ctx, &step.step_id, Err(error), record_late)?;
                    return Ok(Next::Halted(ctx.clone()));
                }
                let index = ctx.current_step_index;
                ctx.steps[index].attempts += 1;
                Ok(Next::Execute {
                    step: ctx.steps[index].clone(),
                    snapshot: ctx.clone(),
                })
            })
            .await
            .ok_or(SagaError::SagaNotFound(saga_id))?
    }

    async fn time_out(&self, saga_id: SagaId) -> Result<SagaExecutionContext> {
        let settled = self
            .table
            .update(saga_id, |ctx| -> Result<Settled> {
                if ctx.status != SagaStatus::Running {
                    return Ok(Settled::Halted(ctx.clone()));
                }
                let index = ctx.current_step_index;
                if let Some(step) = ctx.steps.get_mut(index)
                    && step.status == StepStatus::Executing
                {
                    step.mark_failed("saga timed out")?;
                }
                ctx.error = Some(format!(
                    "saga timed out after {}ms",
                    ctx.timeout.as_millis()
                ));
                Ok(stop_forward_run(ctx, SagaStatus::Timeout))
            })
            .await
            .ok_or(SagaError::SagaNotFound(saga_id))??;
        self.finish(saga_id, settled).await
    }

    async fn finish(&self, saga_id: SagaId, settled: Settled) -> Result<SagaExecutionContext> {
        match settled {
            Settled::Halted(ctx) => Ok(ctx),
            Settled::Stopped {
                terminal,
                compensating,
            } => {
                self.recorder
                    .transitioned(SagaStatus::Running, &terminal)
                    .await;
                match compensating {
                    Some(compensating) => {
                        self.recorder
                            .transitioned(terminal.status, &compensating)
                            .await;
                        self.compensate(saga_id).await
                    }
                    None => Ok(terminal),
                }
            }
        }
    }

    /// Undoes every completed step up to the current index, last first.
    ///
    /// The context must already be `Compensating`. A failing compensation is
    /// recorded on its step and does not stop the remaining ones.
    pub(crate) async fn compensate(&self, saga_id: SagaId) -> Result<SagaExecutionContext> {
        let pending: Vec<String> = self
            .table
            .get(saga_id)
            .await
            .ok_or(SagaError::SagaNotFound(saga_id))?
            .compensable_steps()
            .into_iter()
            .map(|step| step.step_id.clone())
            .collect();
        tracing::info!(%saga_id, steps = pending.len(), "compensating completed steps");

        for step_id in &pending {
            self.compensate_step(saga_id, step_id).await?;
        }

        let finished = self
            .table
            .update(saga_id, |ctx| {
                ctx.set_status(SagaStatus::Compensated);
                ctx.clone()
            })
            .await
            .ok_or(SagaError::SagaNotFound(saga_id))?;
        self.recorder
            .transitioned(SagaStatus::Compensating, &finished)
            .await;
        Ok(finished)
    }

    /// Undoes one completed step. Steps that are no longer `Completed` are
    /// left alone.
    async fn compensate_step(&self, saga_id: SagaId, step_id: &str) -> Result<()> {
        let begun = self
            .table
            .update(saga_id, |ctx| -> Result<Option<(SagaStep, SagaExecutionContext)>> {
                let Some(step) = ctx.step_mut(step_id) else {
                    return Ok(None);
                };
                if step.status != StepStatus::Completed {
                    return Ok(None);
                }
                step.transition(StepStatus::Compensating)?;
                let step = step.clone();
                Ok(Some((step, ctx.clone())))
            })
            .await
            .ok_or(SagaError::SagaNotFound(saga_id))??;
        let Some((step, snapshot)) = begun else {
            return Ok(());
        };

        let outcome = self
            .definition
            .execute_compensation_step(&step, &snapshot)
            .await;

        self.table
            .update(saga_id, |ctx| -> Result<()> {
                let Some(step) = ctx.step_mut(step_id) else {
                    return Ok(());
                };
                match outcome {
                    Ok(_) => {
                        step.transition(StepStatus::Compensated)?;
                        tracing::debug!(%saga_id, step = %step_id, "step compensated");
                    }
                    Err(error) => {
                        tracing::error!(
                            %saga_id,
                            step = %step_id,
                            error = %error,
                            "compensation failed, continuing with remaining steps"
                        );
                        metrics::counter!("saga_compensation_failures_total").increment(1);
                        step.error = Some(error.to_string());
                    }
                }
                Ok(())
            })
            .await
            .ok_or(SagaError::SagaNotFound(saga_id))?
    }
}

/// Moves a running context to `terminal` and, when compensation is enabled,
/// straight on to `Compensating` under the same lock.
fn stop_forward_run(ctx: &mut SagaExecutionContext, terminal: SagaStatus) -> Settled {
    ctx.set_status(terminal);
    let terminal = ctx.clone();
    let compensating = if ctx.enable_compensation {
        ctx.set_status(SagaStatus::Compensating);
        Some(ctx.clone())
    } else {
        None
    };
    Settled::Stopped {
        terminal,
        compensating,
    }
}

enum LateStep {
    Settled,
    NeedsCompensation,
}

/// Settles a step whose outcome arrived after the saga left `Running`.
///
/// A success on a compensating or compensated saga is always recorded so the
/// caller can undo it. Otherwise `record` decides between keeping the outcome
/// and marking the step `Skipped`.
fn settle_late_step(
    ctx: &mut SagaExecutionContext,
    step_id: &str,
    outcome: StepOutcome,
    record: bool,
) -> Result<LateStep> {
    let saga_id = ctx.saga_id;
    let saga_status = ctx.status;
    let Some(step) = ctx.step_mut(step_id) else {
        return Ok(LateStep::Settled);
    };
    if step.status != StepStatus::Executing {
        return Ok(LateStep::Settled);
    }

    let compensating = matches!(
        saga_status,
        SagaStatus::Compensating | SagaStatus::Compensated
    );
    match outcome {
        Ok(value) if compensating => {
            step.mark_completed(value)?;
            tracing::warn!(
                %saga_id,
                step = %step_id,
                %saga_status,
                "late step outcome on a compensated saga, undoing it"
            );
            return Ok(LateStep::NeedsCompensation);
        }
        Ok(value) if record => step.mark_completed(value)?,
        Err(error) if record => step.mark_failed(error.message())?,
        _ => {
            step.mark_skipped()?;
            tracing::warn!(%saga_id, step = %step_id, %saga_status, "discarded late step outcome");
            return Ok(LateStep::Settled);
        }
    }
    tracing::warn!(
        %saga_id,
        step = %step_id,
        %saga_status,
        step_status = %step.status,
        "recorded late step outcome"
    );
    Ok(LateStep::Settled)
}

/// Sleeps for `delay` unless the deadline would pass first. Returns false
/// when the deadline was reached instead.
async fn sleep_before_retry(delay: Duration, deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) if Instant::now() + delay >= deadline => {
            tokio::time::sleep_until(deadline).await;
            false
        }
        _ => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}
