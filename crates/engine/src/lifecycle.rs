use crate::error::LifecycleError;
use crate::reference::validate_installment;
use chrono::NaiveDate;
use core_types::{
    Clock, ExecutionLogEntry, PlanChanges, PlanRequest, PlanStatus, PlanType, SystematicPlan,
};
use database::{DbError, LogQuery, PlanQuery, PlanStore};
use events::LifecycleEvent;
use executor::{MarketValueSource, ProductCatalog};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;
use validation::ValidationEngine;

/// Conditional writes attempted before giving up with `LifecycleError::Contention`.
const MAX_WRITE_ATTEMPTS: usize = 3;

/// What the scheduler reports back after working a due installment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    /// The installment was placed as an order.
    Executed { order_id: String },
    /// An attempt failed and another will follow on the same date.
    AttemptFailed { reason: String },
    /// No further attempt is possible for the date.
    Exhausted { reason: String },
}

/// The plan state machine.
///
/// Owns every status transition. Each mutation is read, compute, then a write
/// conditional on the version that was read; a lost race re-reads and
/// re-applies the transition against the fresh copy.
pub struct PlanLifecycle {
    store: Arc<dyn PlanStore>,
    catalog: Arc<dyn ProductCatalog>,
    market_values: Arc<dyn MarketValueSource>,
    validator: ValidationEngine,
    clock: Arc<dyn Clock>,
    event_tx: Option<broadcast::Sender<LifecycleEvent>>,
}

impl PlanLifecycle {
    pub fn new(
        store: Arc<dyn PlanStore>,
        catalog: Arc<dyn ProductCatalog>,
        market_values: Arc<dyn MarketValueSource>,
        validator: ValidationEngine,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            market_values,
            validator,
            clock,
            event_tx: None,
        }
    }

    /// Publishes every successful transition on `event_tx`.
    pub fn with_events(mut self, event_tx: broadcast::Sender<LifecycleEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // --- Commands ---

    /// Validates a request and opens it as an Active plan.
    ///
    /// Nothing is persisted unless every structural and business rule passes.
    pub async fn create(&self, request: PlanRequest) -> Result<SystematicPlan, LifecycleError> {
        let now = self.clock.now();
        let mut errors = structural_errors(&request, now.date());

        let plan = SystematicPlan::from_request(request, now);
        let result = validate_installment(
            &plan,
            &self.validator,
            self.catalog.as_ref(),
            self.market_values.as_ref(),
            now.date(),
        )
        .await?;
        errors.extend(result.errors);

        if !errors.is_empty() {
            tracing::info!(
                plan_type = %plan.plan_type,
                product_id = %plan.product_id,
                errors = errors.len(),
                "Plan request rejected."
            );
            return Err(LifecycleError::Validation(errors));
        }
        for warning in &result.warnings {
            tracing::warn!(plan_id = %plan.plan_id, %warning, "Plan accepted with warning.");
        }

        self.store.insert_plan(&plan).await?;
        tracing::info!(
            plan_id = %plan.plan_id,
            plan_type = %plan.plan_type,
            amount = %plan.amount,
            start_date = %plan.start_date,
            installments = plan.total_installments,
            "Plan created."
        );
        self.publish(LifecycleEvent::PlanCreated(plan.clone()));
        Ok(plan)
    }

    /// Applies `changes` to an Active plan that is not due for execution.
    ///
    /// The modified terms are re-validated in full before anything is written.
    pub async fn modify(&self, plan_id: Uuid, changes: PlanChanges) -> Result<SystematicPlan, LifecycleError> {
        if changes.is_empty() {
            return Err(LifecycleError::Validation(vec!["No changes were requested".to_string()]));
        }

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self.get(plan_id).await?;
            let today = self.clock.today();
            ensure_active(&current, "modify")?;
            if today >= current.next_execution_date {
                return Err(conflict(&current, "modify", "an installment is due for execution"));
            }

            let mut updated = current.clone();
            apply_changes(&mut updated, &changes);

            let mut errors = Vec::new();
            if updated.total_installments < updated.installments_executed + 1 {
                errors.push(format!(
                    "Total installments {} must be at least {} ({} already executed)",
                    updated.total_installments,
                    updated.installments_executed + 1,
                    updated.installments_executed
                ));
            }
            let result = validate_installment(
                &updated,
                &self.validator,
                self.catalog.as_ref(),
                self.market_values.as_ref(),
                today,
            )
            .await?;
            errors.extend(result.errors);
            if !errors.is_empty() {
                return Err(LifecycleError::Validation(errors));
            }

            updated.modified_at = self.clock.now();
            match self.store.update_plan(&updated).await {
                Ok(saved) => {
                    tracing::info!(plan_id = %plan_id, version = saved.version, "Plan modified.");
                    self.publish(LifecycleEvent::PlanModified(saved.clone()));
                    return Ok(saved);
                }
                Err(DbError::VersionConflict { expected, found, .. }) => {
                    tracing::debug!(plan_id = %plan_id, expected, found, "Modify lost a write race; retrying.");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(LifecycleError::Contention(plan_id))
    }

    /// Moves an Active plan to Cancelled. Requires explicit confirmation.
    pub async fn cancel(&self, plan_id: Uuid, confirmed: bool) -> Result<SystematicPlan, LifecycleError> {
        if !confirmed {
            return Err(LifecycleError::ConfirmationRequired(plan_id));
        }

        let saved = self
            .transition(plan_id, "cancel", |plan| {
                ensure_active(plan, "cancel")?;
                plan.status = PlanStatus::Cancelled;
                Ok(())
            })
            .await?;

        tracing::info!(plan_id = %plan_id, "Plan cancelled.");
        self.publish(LifecycleEvent::PlanCancelled {
            plan_id,
            at: saved.modified_at,
        });
        Ok(saved)
    }

    /// Applies the scheduler's verdict on the plan's current installment.
    pub async fn record_execution_outcome(
        &self,
        plan_id: Uuid,
        outcome: PlanOutcome,
    ) -> Result<SystematicPlan, LifecycleError> {
        let saved = self
            .transition(plan_id, "record an execution outcome for", |plan| {
                ensure_active(plan, "record an execution outcome for")?;
                match &outcome {
                    PlanOutcome::Executed { .. } => {
                        plan.installments_executed += 1;
                        plan.retry_count = 0;
                        if plan.installments_executed >= plan.total_installments {
                            plan.status = PlanStatus::Completed;
                        } else {
                            plan.next_execution_date = plan.installment_date(plan.installments_executed)?;
                        }
                    }
                    PlanOutcome::AttemptFailed { .. } => {
                        plan.retry_count += 1;
                    }
                    PlanOutcome::Exhausted { .. } => {
                        plan.status = PlanStatus::Failed;
                    }
                }
                Ok(())
            })
            .await?;

        match outcome {
            PlanOutcome::Executed { order_id } => {
                tracing::info!(
                    plan_id = %plan_id,
                    %order_id,
                    executed = saved.installments_executed,
                    total = saved.total_installments,
                    "Installment executed."
                );
                self.publish(LifecycleEvent::InstallmentExecuted {
                    plan_id,
                    // The installment that just ran is the one before the new progress count.
                    due_date: saved.installment_date(saved.installments_executed - 1)?,
                    order_id,
                    installments_executed: saved.installments_executed,
                });
                if saved.status == PlanStatus::Completed {
                    tracing::info!(plan_id = %plan_id, "Plan completed.");
                    self.publish(LifecycleEvent::PlanCompleted { plan_id });
                }
            }
            PlanOutcome::AttemptFailed { reason } => {
                tracing::debug!(plan_id = %plan_id, retry_count = saved.retry_count, %reason, "Attempt failure recorded.");
            }
            PlanOutcome::Exhausted { reason } => {
                tracing::warn!(plan_id = %plan_id, due_date = %saved.next_execution_date, %reason, "Plan failed.");
                self.publish(LifecycleEvent::PlanFailed {
                    plan_id,
                    due_date: saved.next_execution_date,
                    reason,
                });
            }
        }
        Ok(saved)
    }

    /// Appends one attempt to the execution log.
    pub async fn log_attempt(&self, entry: &ExecutionLogEntry) -> Result<(), LifecycleError> {
        self.store.append_log(entry).await?;
        Ok(())
    }

    // --- Queries ---

    pub async fn get(&self, plan_id: Uuid) -> Result<SystematicPlan, LifecycleError> {
        match self.store.get_plan(plan_id).await {
            Ok(plan) => Ok(plan),
            Err(DbError::NotFound) => Err(LifecycleError::NotFound(plan_id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn query(&self, query: &PlanQuery) -> Result<Vec<SystematicPlan>, LifecycleError> {
        Ok(self.store.query_plans(query).await?)
    }

    pub async fn execution_log(&self, query: &LogQuery) -> Result<Vec<ExecutionLogEntry>, LifecycleError> {
        Ok(self.store.query_log(query).await?)
    }

    pub async fn due_plans(&self, date: NaiveDate) -> Result<Vec<SystematicPlan>, LifecycleError> {
        Ok(self.store.due_plans(date).await?)
    }

    /// Active plans with a next execution date in `from..=to`.
    pub async fn due_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<SystematicPlan>, LifecycleError> {
        Ok(self.store.due_between(from, to).await?)
    }

    pub async fn overdue_before(&self, date: NaiveDate) -> Result<Vec<SystematicPlan>, LifecycleError> {
        Ok(self.store.overdue_before(date).await?)
    }

    // --- Internals ---

    pub(crate) fn validator(&self) -> &ValidationEngine {
        &self.validator
    }

    pub(crate) fn catalog(&self) -> &dyn ProductCatalog {
        self.catalog.as_ref()
    }

    pub(crate) fn market_values(&self) -> &dyn MarketValueSource {
        self.market_values.as_ref()
    }

    pub(crate) fn publish(&self, event: LifecycleEvent) {
        if let Some(tx) = &self.event_tx {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    async fn transition<F>(
        &self,
        plan_id: Uuid,
        operation: &'static str,
        mut apply: F,
    ) -> Result<SystematicPlan, LifecycleError>
    where
        F: FnMut(&mut SystematicPlan) -> Result<(), LifecycleError> + Send,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut plan = self.get(plan_id).await?;
            apply(&mut plan)?;
            plan.modified_at = self.clock.now();
            match self.store.update_plan(&plan).await {
                Ok(saved) => return Ok(saved),
                Err(DbError::VersionConflict { expected, found, .. }) => {
                    tracing::debug!(plan_id = %plan_id, operation, expected, found, "Lost a write race; retrying.");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(LifecycleError::Contention(plan_id))
    }
}

fn conflict(plan: &SystematicPlan, operation: &'static str, reason: impl Into<String>) -> LifecycleError {
    LifecycleError::Conflict {
        plan_id: plan.plan_id,
        status: plan.status,
        operation,
        reason: reason.into(),
    }
}

fn ensure_active(plan: &SystematicPlan, operation: &'static str) -> Result<(), LifecycleError> {
    if plan.status == PlanStatus::Active {
        Ok(())
    } else {
        Err(conflict(plan, operation, format!("plan is {}", plan.status)))
    }
}

/// Shape checks that need no reference data.
fn structural_errors(request: &PlanRequest, today: NaiveDate) -> Vec<String> {
    let mut errors = Vec::new();

    if request.total_installments == 0 {
        errors.push("Total installments must be at least 1".to_string());
    }
    if request.start_date <= today {
        errors.push(format!(
            "Start date {} must be after today ({})",
            request.start_date, today
        ));
    }
    match (request.plan_type, request.target_product_id.as_deref()) {
        (PlanType::Stp, None) => {
            errors.push("STP plans require a target product".to_string());
        }
        (PlanType::Stp, Some(target)) if target == request.product_id => {
            errors.push("STP target product must differ from the source product".to_string());
        }
        (PlanType::Sip | PlanType::Swp, Some(_)) => {
            errors.push(format!("{} plans must not have a target product", request.plan_type));
        }
        _ => {}
    }
    errors
}

fn apply_changes(plan: &mut SystematicPlan, changes: &PlanChanges) {
    if let Some(amount) = changes.amount {
        plan.amount = amount;
    }
    if let Some(total) = changes.total_installments {
        plan.total_installments = total;
    }
    if let Some(opted_out) = changes.opted_out_of_nomination {
        plan.opted_out_of_nomination = opted_out;
    }
    if let Some(nominees) = &changes.nominees {
        plan.nominees = nominees.clone();
    }
    if let Some(broker_code) = &changes.broker_code {
        plan.broker_code = broker_code.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Frequency, ManualClock, Nominee, Product};
    use executor::InMemoryCatalog;
    use rust_decimal_macros::dec;
    use database::InMemoryPlanStore;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    struct Harness {
        lifecycle: PlanLifecycle,
        clock: Arc<ManualClock>,
        catalog: Arc<InMemoryCatalog>,
        events: broadcast::Receiver<LifecycleEvent>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(date(10, 19).and_hms_opt(11, 0, 0).unwrap()));
        let catalog = Arc::new(InMemoryCatalog::with_products([
            Product::new("GROWTH", dec!(500), Some(dec!(100000))),
            Product::new("LIQUID", dec!(1000), None),
        ]));
        let (tx, rx) = broadcast::channel(64);
        let lifecycle = PlanLifecycle::new(
            Arc::new(InMemoryPlanStore::new()),
            catalog.clone(),
            catalog.clone(),
            ValidationEngine::default(),
            clock.clone(),
        )
        .with_events(tx);
        Harness {
            lifecycle,
            clock,
            catalog,
            events: rx,
        }
    }

    fn sip_request() -> PlanRequest {
        PlanRequest {
            plan_type: PlanType::Sip,
            product_id: "GROWTH".to_string(),
            target_product_id: None,
            amount: dec!(5000),
            frequency: Frequency::Monthly,
            start_date: date(11, 5),
            total_installments: 3,
            opted_out_of_nomination: true,
            nominees: vec![],
            broker_code: None,
        }
    }

    fn nominee(percentage: rust_decimal::Decimal) -> Nominee {
        Nominee {
            name: "Ravi".to_string(),
            percentage,
            pan: "ABCDE1234F".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1980, 1, 1).unwrap(),
            guardian_name: None,
            guardian_pan: None,
            guardian_relationship: None,
        }
    }

    #[tokio::test]
    async fn create_persists_an_active_plan() {
        let mut h = harness();
        let plan = h.lifecycle.create(sip_request()).await.unwrap();

        assert_eq!(plan.status, PlanStatus::Active);
        assert_eq!(plan.installments_executed, 0);
        assert_eq!(plan.next_execution_date, date(11, 5));
        assert_eq!(plan.version, 0);
        assert_eq!(h.lifecycle.get(plan.plan_id).await.unwrap(), plan);
        assert!(matches!(h.events.try_recv(), Ok(LifecycleEvent::PlanCreated(_))));
    }

    #[tokio::test]
    async fn create_collects_structural_and_business_errors() {
        let h = harness();
        let request = PlanRequest {
            amount: dec!(100),
            start_date: date(10, 19),
            target_product_id: Some("LIQUID".to_string()),
            ..sip_request()
        };

        let err = h.lifecycle.create(request).await.unwrap_err();
        let LifecycleError::Validation(errors) = err else {
            panic!("expected validation errors, got {:?}", err);
        };
        assert!(errors.iter().any(|e| e.starts_with("Start date")));
        assert!(errors.iter().any(|e| e == "SIP plans must not have a target product"));
        assert!(errors.iter().any(|e| e.contains("below minimum investment of 500 for product GROWTH")));
        assert!(h.lifecycle.query(&PlanQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stp_requires_distinct_target() {
        let h = harness();
        let request = PlanRequest {
            plan_type: PlanType::Stp,
            product_id: "LIQUID".to_string(),
            target_product_id: Some("LIQUID".to_string()),
            ..sip_request()
        };
        let err = h.lifecycle.create(request).await.unwrap_err();
        let LifecycleError::Validation(errors) = err else {
            panic!("expected validation errors");
        };
        assert!(errors.contains(&"STP target product must differ from the source product".to_string()));
    }

    #[tokio::test]
    async fn create_checks_nominees_when_not_opted_out() {
        let h = harness();
        let request = PlanRequest {
            opted_out_of_nomination: false,
            nominees: vec![nominee(dec!(60)), nominee(dec!(30))],
            ..sip_request()
        };
        let err = h.lifecycle.create(request).await.unwrap_err();
        assert!(err.to_string().contains("Nominee percentages must total 100%, got 90%"));
    }

    #[tokio::test]
    async fn modify_revalidates_and_bumps_version() {
        let h = harness();
        let plan = h.lifecycle.create(sip_request()).await.unwrap();

        let changes = PlanChanges {
            amount: Some(dec!(7500)),
            ..PlanChanges::default()
        };
        let saved = h.lifecycle.modify(plan.plan_id, changes).await.unwrap();
        assert_eq!(saved.amount, dec!(7500));
        assert_eq!(saved.version, 1);

        let too_much = PlanChanges {
            amount: Some(dec!(200000)),
            ..PlanChanges::default()
        };
        let err = h.lifecycle.modify(plan.plan_id, too_much).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
        assert_eq!(h.lifecycle.get(plan.plan_id).await.unwrap().amount, dec!(7500));
    }

    #[tokio::test]
    async fn modify_is_rejected_on_the_execution_day() {
        let h = harness();
        let plan = h.lifecycle.create(sip_request()).await.unwrap();
        h.clock.set(date(11, 5).and_hms_opt(8, 0, 0).unwrap());

        let changes = PlanChanges {
            amount: Some(dec!(6000)),
            ..PlanChanges::default()
        };
        let err = h.lifecycle.modify(plan.plan_id, changes).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Conflict { status: PlanStatus::Active, .. }));
        assert_eq!(h.lifecycle.get(plan.plan_id).await.unwrap().amount, dec!(5000));
    }

    #[tokio::test]
    async fn modify_cannot_drop_below_executed_installments() {
        let h = harness();
        let plan = h.lifecycle.create(sip_request()).await.unwrap();
        h.lifecycle
            .record_execution_outcome(plan.plan_id, PlanOutcome::Executed { order_id: "O-1".into() })
            .await
            .unwrap();

        let changes = PlanChanges {
            total_installments: Some(1),
            ..PlanChanges::default()
        };
        let err = h.lifecycle.modify(plan.plan_id, changes).await.unwrap_err();
        let LifecycleError::Validation(errors) = err else {
            panic!("expected validation errors");
        };
        assert_eq!(errors, vec!["Total installments 1 must be at least 2 (1 already executed)"]);
    }

    #[tokio::test]
    async fn empty_changes_are_rejected() {
        let h = harness();
        let plan = h.lifecycle.create(sip_request()).await.unwrap();
        let err = h.lifecycle.modify(plan.plan_id, PlanChanges::default()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }

    #[tokio::test]
    async fn cancel_requires_confirmation_and_happens_once() {
        let h = harness();
        let plan = h.lifecycle.create(sip_request()).await.unwrap();

        let err = h.lifecycle.cancel(plan.plan_id, false).await.unwrap_err();
        assert!(matches!(err, LifecycleError::ConfirmationRequired(_)));
        assert_eq!(h.lifecycle.get(plan.plan_id).await.unwrap().status, PlanStatus::Active);

        let cancelled = h.lifecycle.cancel(plan.plan_id, true).await.unwrap();
        assert_eq!(cancelled.status, PlanStatus::Cancelled);

        let again = h.lifecycle.cancel(plan.plan_id, true).await.unwrap_err();
        assert!(matches!(again, LifecycleError::Conflict { status: PlanStatus::Cancelled, .. }));
        assert_eq!(h.lifecycle.get(plan.plan_id).await.unwrap().version, cancelled.version);
    }

    #[tokio::test]
    async fn unknown_plans_are_not_found() {
        let h = harness();
        let id = Uuid::new_v4();
        assert!(matches!(h.lifecycle.get(id).await, Err(LifecycleError::NotFound(_))));
        assert!(matches!(h.lifecycle.cancel(id, true).await, Err(LifecycleError::NotFound(_))));
    }

    #[tokio::test]
    async fn executions_advance_the_schedule_and_complete() {
        let mut h = harness();
        let plan = h.lifecycle.create(sip_request()).await.unwrap();
        let id = plan.plan_id;

        let outcome = |n: u32| PlanOutcome::Executed { order_id: format!("O-{}", n) };
        let first = h.lifecycle.record_execution_outcome(id, outcome(1)).await.unwrap();
        assert_eq!(first.next_execution_date, date(12, 5));
        assert_eq!(first.installments_executed, 1);

        h.lifecycle.record_execution_outcome(id, outcome(2)).await.unwrap();
        let last = h.lifecycle.record_execution_outcome(id, outcome(3)).await.unwrap();
        assert_eq!(last.status, PlanStatus::Completed);
        assert_eq!(last.installments_executed, 3);

        let err = h.lifecycle.record_execution_outcome(id, outcome(4)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Conflict { status: PlanStatus::Completed, .. }));

        let mut saw_completed = false;
        while let Ok(event) = h.events.try_recv() {
            saw_completed |= matches!(event, LifecycleEvent::PlanCompleted { plan_id } if plan_id == id);
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn failures_count_retries_then_fail_the_plan() {
        let h = harness();
        let plan = h.lifecycle.create(sip_request()).await.unwrap();
        let id = plan.plan_id;

        let failed = h
            .lifecycle
            .record_execution_outcome(id, PlanOutcome::AttemptFailed { reason: "rejected".into() })
            .await
            .unwrap();
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.status, PlanStatus::Active);

        let exhausted = h
            .lifecycle
            .record_execution_outcome(id, PlanOutcome::Exhausted { reason: "rejected".into() })
            .await
            .unwrap();
        assert_eq!(exhausted.status, PlanStatus::Failed);
        assert!(h.lifecycle.due_plans(date(11, 5)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delisting_after_creation_fails_modification() {
        let h = harness();
        let plan = h.lifecycle.create(sip_request()).await.unwrap();
        h.catalog.delist("GROWTH").await;

        let changes = PlanChanges {
            amount: Some(dec!(6000)),
            ..PlanChanges::default()
        };
        let err = h.lifecycle.modify(plan.plan_id, changes).await.unwrap_err();
        let LifecycleError::Validation(errors) = err else {
            panic!("expected validation errors");
        };
        assert_eq!(errors, vec!["Unknown product 'GROWTH'"]);
    }
}
