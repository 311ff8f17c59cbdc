use crate::error::{EngineError, LifecycleError};
use crate::lifecycle::{PlanLifecycle, PlanOutcome};
use crate::policy::{BusinessCalendar, RetryPolicy};
use crate::reference::validate_installment;
use chrono::{NaiveDate, NaiveDateTime};
use configuration::SchedulerSettings;
use core_types::{AttemptOutcome, Clock, ExecutionLogEntry, SystematicPlan};
use events::{DaySummary, LifecycleEvent};
use executor::OrderBook;
use futures::FutureExt;
use futures::future::join_all;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

const CUTOFF_REASON: &str = "cut-off passed";

/// How one plan's business day ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanRun {
    Executed,
    Failed,
    /// The plan stopped being due mid-run, e.g. it was cancelled between attempts.
    Skipped,
}

#[derive(Debug, Clone, Copy)]
struct PlanReport {
    run: PlanRun,
    attempts: usize,
}

impl PlanReport {
    fn new(run: PlanRun, attempts: usize) -> Self {
        Self { run, attempts }
    }
}

/// Works every due plan once per business day.
///
/// Every due plan is in flight at once, but at most `worker_pool_size`
/// attempts run at a time. A worker is held only for an attempt and its
/// bookkeeping, never across the wait for a retry slot. Within a plan,
/// attempts are strictly sequential and each one re-reads the plan first, so
/// a cancellation takes effect before the next attempt.
pub struct ExecutionScheduler {
    lifecycle: Arc<PlanLifecycle>,
    order_book: Arc<dyn OrderBook>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    calendar: BusinessCalendar,
    worker_pool_size: usize,
}

impl ExecutionScheduler {
    pub fn new(
        lifecycle: Arc<PlanLifecycle>,
        order_book: Arc<dyn OrderBook>,
        settings: &SchedulerSettings,
    ) -> Result<Self, EngineError> {
        if settings.worker_pool_size == 0 {
            return Err(EngineError::Configuration(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            clock: lifecycle.clock().clone(),
            lifecycle,
            order_book,
            policy: RetryPolicy::from_settings(settings)?,
            calendar: BusinessCalendar::new(settings.skip_weekends),
            worker_pool_size: settings.worker_pool_size,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs forever: waits for each business day's start and works it.
    pub async fn run_forever(&self) {
        let mut last_run: Option<NaiveDate> = None;
        loop {
            let next = self.next_run_at(self.clock.now(), last_run);
            tracing::info!(%next, "Waiting for the next business day.");
            self.clock.sleep_until(next).await;

            let date = next.date();
            if let Err(e) = self.run_business_day(date).await {
                tracing::error!(%date, error = %e, "Business day run failed.");
            }
            last_run = Some(date);
        }
    }

    /// When the driver should next run, given the time now and the last day it ran.
    ///
    /// A start during today's window (before the cut-off) runs today straight away.
    pub fn next_run_at(&self, now: NaiveDateTime, last_run: Option<NaiveDate>) -> NaiveDateTime {
        let today = now.date();
        let ran_today = last_run.is_some_and(|date| date >= today);
        if self.calendar.is_business_day(today) && !ran_today && now < self.policy.cutoff_on(today) {
            return now.max(self.policy.day_start_on(today));
        }
        self.policy.day_start_on(self.calendar.next_business_day(today))
    }

    /// Works every plan due on `date`, plus any that fell due since the previous
    /// business day. Plans left over from earlier days are failed: their cut-off
    /// has passed.
    pub async fn run_business_day(&self, date: NaiveDate) -> Result<DaySummary, EngineError> {
        let run_started = self.clock.now();
        let mut summary = DaySummary {
            date,
            ..DaySummary::default()
        };
        if !self.calendar.is_business_day(date) {
            tracing::info!(%date, "Not a business day; nothing to run.");
            return Ok(summary);
        }

        let window_start = self
            .calendar
            .previous_business_day(date)
            .succ_opt()
            .unwrap_or(date);
        for plan in self.lifecycle.overdue_before(window_start).await? {
            if self.expire_overdue(plan).await {
                summary.failed += 1;
            }
        }

        let due = self.lifecycle.due_between(window_start, date).await?;
        summary.due = due.len();
        tracing::info!(%date, due = due.len(), workers = self.worker_pool_size, "Starting business day run.");

        let workers = Semaphore::new(self.worker_pool_size);
        let reports = join_all(
            due.into_iter()
                .map(|plan| self.run_plan(plan, date, run_started, &workers)),
        )
        .await;

        for report in reports {
            summary.attempts += report.attempts;
            match report.run {
                PlanRun::Executed => summary.executed += 1,
                PlanRun::Failed => summary.failed += 1,
                PlanRun::Skipped => summary.skipped += 1,
            }
        }

        tracing::info!(
            %date,
            due = summary.due,
            executed = summary.executed,
            failed = summary.failed,
            skipped = summary.skipped,
            attempts = summary.attempts,
            "Business day run complete."
        );
        self.lifecycle.publish(LifecycleEvent::DayCompleted(summary.clone()));
        Ok(summary)
    }

    /// Runs one plan and turns any error or panic into a failed plan.
    async fn run_plan(
        &self,
        plan: SystematicPlan,
        date: NaiveDate,
        run_started: NaiveDateTime,
        workers: &Semaphore,
    ) -> PlanReport {
        let plan_id = plan.plan_id;
        let due_date = plan.next_execution_date;

        let error = match AssertUnwindSafe(self.execute_plan(plan, date, run_started, workers))
            .catch_unwind()
            .await
        {
            Ok(Ok(report)) => return report,
            Ok(Err(e)) => e,
            Err(_) => EngineError::Panicked { plan_id },
        };

        tracing::error!(plan_id = %plan_id, %due_date, error = %error, "Plan execution aborted.");
        self.abandon(plan_id, due_date, &error.to_string()).await
    }

    async fn execute_plan(
        &self,
        plan: SystematicPlan,
        date: NaiveDate,
        run_started: NaiveDateTime,
        workers: &Semaphore,
    ) -> Result<PlanReport, EngineError> {
        let plan_id = plan.plan_id;
        let due_date = plan.next_execution_date;
        let cutoff = self.policy.cutoff_on(date);
        let slots = self.policy.slots_on(date);

        // A restart mid-day resumes after the attempts already recorded.
        let mut cursor = plan.retry_count as usize;
        let mut attempt_number = plan.retry_count + 1;
        let mut attempts = 0;

        let Some(first) = slots.get(cursor) else {
            tracing::warn!(plan_id = %plan_id, retry_count = plan.retry_count, "All attempts already made; failing plan.");
            return Ok(PlanReport::new(self.exhaust(plan_id, "attempts exhausted").await?, 0));
        };
        let mut scheduled = (*first).max(run_started);

        loop {
            if scheduled < cutoff {
                self.clock.sleep_until(scheduled).await;
            }
            // Released at the end of the iteration, before the next wait.
            let _worker = workers.acquire().await?;

            let current = self.lifecycle.get(plan_id).await?;
            if !current.is_due_on(due_date) {
                tracing::info!(plan_id = %plan_id, status = %current.status, "Plan no longer due; skipping.");
                return Ok(PlanReport::new(PlanRun::Skipped, attempts));
            }

            let now = self.clock.now();
            if now >= cutoff {
                tracing::warn!(plan_id = %plan_id, %now, "Cut-off reached before the attempt could run.");
                self.append(
                    ExecutionLogEntry::new(plan_id, due_date, now, attempt_number, AttemptOutcome::Failed)
                        .with_reason(CUTOFF_REASON),
                )
                .await;
                return Ok(PlanReport::new(self.exhaust(plan_id, CUTOFF_REASON).await?, attempts));
            }

            let result = self.attempt(&current, date).await;
            attempts += 1;
            let attempted_at = self.clock.now();

            cursor += 1;
            while slots.get(cursor).is_some_and(|slot| *slot <= scheduled) {
                cursor += 1;
            }
            let next_slot = slots.get(cursor).copied().filter(|slot| *slot < cutoff);

            match result {
                Ok(order_id) => {
                    tracing::info!(plan_id = %plan_id, attempt = attempt_number, %order_id, "Installment placed.");
                    self.append(
                        ExecutionLogEntry::new(plan_id, due_date, attempted_at, attempt_number, AttemptOutcome::Executed)
                            .with_order_id(order_id.clone()),
                    )
                    .await;
                    return match self
                        .lifecycle
                        .record_execution_outcome(plan_id, PlanOutcome::Executed { order_id })
                        .await
                    {
                        Ok(_) => Ok(PlanReport::new(PlanRun::Executed, attempts)),
                        Err(LifecycleError::Conflict { status, .. }) => {
                            tracing::warn!(plan_id = %plan_id, %status, "Order placed but the plan left Active mid-attempt.");
                            Ok(PlanReport::new(PlanRun::Skipped, attempts))
                        }
                        Err(e) => Err(e.into()),
                    };
                }
                Err(reason) => match next_slot {
                    Some(next) => {
                        tracing::info!(plan_id = %plan_id, attempt = attempt_number, %reason, retry_at = %next, "Attempt failed; will retry.");
                        self.append(
                            ExecutionLogEntry::new(plan_id, due_date, attempted_at, attempt_number, AttemptOutcome::Retrying)
                                .with_reason(reason.clone()),
                        )
                        .await;
                        match self
                            .lifecycle
                            .record_execution_outcome(plan_id, PlanOutcome::AttemptFailed { reason: reason.clone() })
                            .await
                        {
                            Ok(_) => {}
                            Err(LifecycleError::Conflict { .. }) => {
                                return Ok(PlanReport::new(PlanRun::Skipped, attempts));
                            }
                            Err(e) => return Err(e.into()),
                        }
                        self.lifecycle.publish(LifecycleEvent::AttemptFailed {
                            plan_id,
                            due_date,
                            attempt: attempt_number,
                            reason,
                        });
                        scheduled = next;
                        attempt_number += 1;
                    }
                    None => {
                        tracing::warn!(plan_id = %plan_id, attempt = attempt_number, %reason, "Final attempt failed.");
                        self.append(
                            ExecutionLogEntry::new(plan_id, due_date, attempted_at, attempt_number, AttemptOutcome::Failed)
                                .with_reason(reason.clone()),
                        )
                        .await;
                        return Ok(PlanReport::new(self.exhaust(plan_id, &reason).await?, attempts));
                    }
                },
            }
        }
    }

    /// One attempt: validate against current reference data, then submit.
    /// Returns the order id, or the reason the attempt failed.
    async fn attempt(&self, plan: &SystematicPlan, date: NaiveDate) -> Result<String, String> {
        let validation = validate_installment(
            plan,
            self.lifecycle.validator(),
            self.lifecycle.catalog(),
            self.lifecycle.market_values(),
            date,
        )
        .await
        .map_err(|e| format!("Reference data unavailable: {}", e))?;
        if !validation.is_valid {
            return Err(validation.summary());
        }

        let instruction = plan.installment_instruction();
        match self.order_book.submit_order(&instruction).await {
            Ok(receipt) if receipt.success => Ok(receipt.order_id.unwrap_or_else(|| {
                tracing::warn!(plan_id = %plan.plan_id, "Order accepted without an order id.");
                String::new()
            })),
            Ok(receipt) => Err(receipt.reason.unwrap_or_else(|| "Order rejected".to_string())),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Fails the plan for the day. A plan that left Active meanwhile counts as skipped.
    async fn exhaust(&self, plan_id: Uuid, reason: &str) -> Result<PlanRun, EngineError> {
        match self
            .lifecycle
            .record_execution_outcome(plan_id, PlanOutcome::Exhausted { reason: reason.to_string() })
            .await
        {
            Ok(_) => Ok(PlanRun::Failed),
            Err(LifecycleError::Conflict { .. }) => Ok(PlanRun::Skipped),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort cleanup after an unexpected error: log a failed attempt and fail the plan.
    async fn abandon(&self, plan_id: Uuid, due_date: NaiveDate, reason: &str) -> PlanReport {
        let plan = match self.lifecycle.get(plan_id).await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::error!(plan_id = %plan_id, error = %e, "Cannot reload plan after failure.");
                return PlanReport::new(PlanRun::Failed, 0);
            }
        };
        if !plan.is_due_on(due_date) {
            return PlanReport::new(PlanRun::Skipped, 0);
        }

        if plan.retry_count < self.policy.max_attempts() {
            self.append(
                ExecutionLogEntry::new(plan_id, due_date, self.clock.now(), plan.retry_count + 1, AttemptOutcome::Failed)
                    .with_reason(reason),
            )
            .await;
        }
        match self.exhaust(plan_id, reason).await {
            Ok(run) => PlanReport::new(run, 0),
            Err(e) => {
                tracing::error!(plan_id = %plan_id, error = %e, "Cannot mark plan failed.");
                PlanReport::new(PlanRun::Failed, 0)
            }
        }
    }

    /// Fails a plan whose due date passed without a run. Returns whether it was failed.
    async fn expire_overdue(&self, plan: SystematicPlan) -> bool {
        let reason = format!("{} on {}", CUTOFF_REASON, plan.next_execution_date);
        tracing::warn!(plan_id = %plan.plan_id, due_date = %plan.next_execution_date, "Plan missed its execution day.");

        if plan.retry_count < self.policy.max_attempts() {
            self.append(
                ExecutionLogEntry::new(
                    plan.plan_id,
                    plan.next_execution_date,
                    self.clock.now(),
                    plan.retry_count + 1,
                    AttemptOutcome::Failed,
                )
                .with_reason(reason.clone()),
            )
            .await;
        }
        match self.exhaust(plan.plan_id, &reason).await {
            Ok(run) => run == PlanRun::Failed,
            Err(e) => {
                tracing::error!(plan_id = %plan.plan_id, error = %e, "Cannot fail overdue plan.");
                false
            }
        }
    }

    /// The log is an audit trail; a failed append never changes the plan's fate.
    async fn append(&self, entry: ExecutionLogEntry) {
        if let Err(e) = self.lifecycle.log_attempt(&entry).await {
            tracing::error!(
                plan_id = %entry.plan_id,
                attempt = entry.attempt_number,
                error = %e,
                "Failed to append execution log entry."
            );
        }
    }
}
