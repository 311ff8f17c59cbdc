use crate::error::DbError;
use crate::query::{LogQuery, PlanQuery};
use crate::store::PlanStore;
use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::{ExecutionLogEntry, PlanStatus, SystematicPlan};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A `PlanStore` held entirely in process memory.
///
/// Backs the paper mode and the test suites. Every write happens under
/// a single write lock, so readers never observe a half-applied update.
#[derive(Debug, Default)]
pub struct InMemoryPlanStore {
    plans: RwLock<HashMap<Uuid, SystematicPlan>>,
    log: RwLock<Vec<ExecutionLogEntry>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_plans(mut plans: Vec<SystematicPlan>) -> Vec<SystematicPlan> {
    plans.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.plan_id.cmp(&b.plan_id)));
    plans
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn insert_plan(&self, plan: &SystematicPlan) -> Result<(), DbError> {
        let mut plans = self.plans.write().await;
        if plans.contains_key(&plan.plan_id) {
            return Err(DbError::DuplicatePlan { plan_id: plan.plan_id });
        }
        plans.insert(plan.plan_id, plan.clone());
        Ok(())
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<SystematicPlan, DbError> {
        self.plans
            .read()
            .await
            .get(&plan_id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn update_plan(&self, plan: &SystematicPlan) -> Result<SystematicPlan, DbError> {
        let mut plans = self.plans.write().await;
        let stored = plans.get_mut(&plan.plan_id).ok_or(DbError::NotFound)?;
        if stored.version != plan.version {
            return Err(DbError::VersionConflict {
                plan_id: plan.plan_id,
                expected: plan.version,
                found: stored.version,
            });
        }
        let mut updated = plan.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn query_plans(&self, query: &PlanQuery) -> Result<Vec<SystematicPlan>, DbError> {
        let plans = self.plans.read().await;
        Ok(sorted_plans(
            plans.values().filter(|plan| query.matches(plan)).cloned().collect(),
        ))
    }

    async fn due_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<SystematicPlan>, DbError> {
        let plans = self.plans.read().await;
        Ok(sorted_plans(
            plans
                .values()
                .filter(|plan| plan.status == PlanStatus::Active)
                .filter(|plan| (from..=to).contains(&plan.next_execution_date))
                .cloned()
                .collect(),
        ))
    }

    async fn overdue_before(&self, date: NaiveDate) -> Result<Vec<SystematicPlan>, DbError> {
        let plans = self.plans.read().await;
        Ok(sorted_plans(
            plans
                .values()
                .filter(|plan| plan.status == PlanStatus::Active && plan.next_execution_date < date)
                .cloned()
                .collect(),
        ))
    }

    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<(), DbError> {
        let mut log = self.log.write().await;
        let duplicate = log.iter().any(|existing| {
            existing.plan_id == entry.plan_id
                && existing.due_date == entry.due_date
                && existing.attempt_number == entry.attempt_number
        });
        if duplicate {
            return Err(DbError::DuplicateLogEntry {
                plan_id: entry.plan_id,
                due_date: entry.due_date,
                attempt_number: entry.attempt_number,
            });
        }
        log.push(entry.clone());
        Ok(())
    }

    async fn query_log(&self, query: &LogQuery) -> Result<Vec<ExecutionLogEntry>, DbError> {
        let log = self.log.read().await;
        let mut entries: Vec<_> = log.iter().filter(|entry| query.matches(entry)).cloned().collect();
        entries.sort_by(|a, b| {
            (a.plan_id, a.due_date, a.attempt_number).cmp(&(b.plan_id, b.due_date, b.attempt_number))
        });
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{AttemptOutcome, Frequency, PlanRequest, PlanType};
    use rust_decimal_macros::dec;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 11, d).unwrap()
    }

    fn sip(start: NaiveDate) -> SystematicPlan {
        SystematicPlan::from_request(
            PlanRequest {
                plan_type: PlanType::Sip,
                product_id: "GROWTH".to_string(),
                target_product_id: None,
                amount: dec!(5000),
                frequency: Frequency::Monthly,
                start_date: start,
                total_installments: 12,
                opted_out_of_nomination: true,
                nominees: vec![],
                broker_code: None,
            },
            date(1).and_hms_opt(9, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn update_requires_the_current_version() {
        let store = InMemoryPlanStore::new();
        let plan = sip(date(5));
        store.insert_plan(&plan).await.unwrap();

        let mut first = plan.clone();
        first.amount = dec!(6000);
        let saved = store.update_plan(&first).await.unwrap();
        assert_eq!(saved.version, 1);

        // A writer still holding version 0 loses.
        let mut stale = plan.clone();
        stale.status = PlanStatus::Cancelled;
        let err = store.update_plan(&stale).await.unwrap_err();
        assert!(matches!(err, DbError::VersionConflict { expected: 0, found: 1, .. }));

        let stored = store.get_plan(plan.plan_id).await.unwrap();
        assert_eq!(stored.amount, dec!(6000));
        assert_eq!(stored.status, PlanStatus::Active);
    }

    #[tokio::test]
    async fn duplicate_inserts_and_unknown_ids_are_rejected() {
        let store = InMemoryPlanStore::new();
        let plan = sip(date(5));
        store.insert_plan(&plan).await.unwrap();
        assert!(matches!(store.insert_plan(&plan).await, Err(DbError::DuplicatePlan { .. })));
        assert!(matches!(store.get_plan(Uuid::new_v4()).await, Err(DbError::NotFound)));
    }

    #[tokio::test]
    async fn due_plans_only_returns_active_plans_for_the_date() {
        let store = InMemoryPlanStore::new();
        let due = sip(date(5));
        let later = sip(date(6));
        let mut cancelled = sip(date(5));
        cancelled.status = PlanStatus::Cancelled;
        for plan in [&due, &later, &cancelled] {
            store.insert_plan(plan).await.unwrap();
        }

        let selected = store.due_plans(date(5)).await.unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].plan_id, due.plan_id);

        let window = store.due_between(date(4), date(6)).await.unwrap();
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn overdue_plans_are_the_active_ones_before_the_date() {
        let store = InMemoryPlanStore::new();
        let missed = sip(date(3));
        let today = sip(date(5));
        let mut cancelled = sip(date(2));
        cancelled.status = PlanStatus::Cancelled;
        for plan in [&missed, &today, &cancelled] {
            store.insert_plan(plan).await.unwrap();
        }

        let overdue = store.overdue_before(date(5)).await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].plan_id, missed.plan_id);
        assert!(store.overdue_before(date(3)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn log_is_append_only_and_ordered() {
        let store = InMemoryPlanStore::new();
        let plan = sip(date(5));
        let at = date(5).and_hms_opt(9, 30, 0).unwrap();
        let second = ExecutionLogEntry::new(plan.plan_id, date(5), at, 2, AttemptOutcome::Executed);
        let first = ExecutionLogEntry::new(plan.plan_id, date(5), at, 1, AttemptOutcome::Retrying);
        store.append_log(&second).await.unwrap();
        store.append_log(&first).await.unwrap();

        let duplicate = ExecutionLogEntry::new(plan.plan_id, date(5), at, 1, AttemptOutcome::Failed);
        assert!(matches!(store.append_log(&duplicate).await, Err(DbError::DuplicateLogEntry { .. })));

        let entries = store.query_log(&LogQuery::for_plan(plan.plan_id)).await.unwrap();
        let attempts: Vec<u32> = entries.iter().map(|e| e.attempt_number).collect();
        assert_eq!(attempts, vec![1, 2]);
        assert_eq!(entries[0].outcome, AttemptOutcome::Retrying);
    }
}
