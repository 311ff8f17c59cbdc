use crate::error::DbError;
use crate::query::{LogQuery, PlanQuery};
use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::{ExecutionLogEntry, SystematicPlan};
use uuid::Uuid;

/// Persistence for plans and their execution log.
///
/// Plans are never deleted and log entries are never changed once appended.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn insert_plan(&self, plan: &SystematicPlan) -> Result<(), DbError>;

    /// Fails with `DbError::NotFound` for unknown ids.
    async fn get_plan(&self, plan_id: Uuid) -> Result<SystematicPlan, DbError>;

    /// Writes `plan` only if the stored copy still carries `plan.version`.
    ///
    /// Returns the persisted plan with its version bumped, or
    /// `DbError::VersionConflict` if someone else wrote first.
    async fn update_plan(&self, plan: &SystematicPlan) -> Result<SystematicPlan, DbError>;

    /// Plans matching `query`, oldest first.
    async fn query_plans(&self, query: &PlanQuery) -> Result<Vec<SystematicPlan>, DbError>;

    /// Active plans whose next execution date lies in `from..=to`, oldest first.
    async fn due_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<SystematicPlan>, DbError>;

    /// Active plans whose next execution date is strictly before `date`, oldest first.
    async fn overdue_before(&self, date: NaiveDate) -> Result<Vec<SystematicPlan>, DbError>;

    /// Active plans whose next execution date is `date`.
    async fn due_plans(&self, date: NaiveDate) -> Result<Vec<SystematicPlan>, DbError> {
        self.due_between(date, date).await
    }

    /// Fails with `DbError::DuplicateLogEntry` if the attempt is already recorded.
    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<(), DbError>;

    /// Entries matching `query`, ordered by plan, due date and attempt number.
    async fn query_log(&self, query: &LogQuery) -> Result<Vec<ExecutionLogEntry>, DbError>;
}
