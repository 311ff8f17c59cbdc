use crate::error::EventsError;
use chrono::{NaiveDate, NaiveDateTime};
use core_types::SystematicPlan;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Totals for one business day's execution run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    /// Plans selected as due at the start of the run.
    pub due: usize,
    pub executed: usize,
    /// Plans that exhausted their attempts and moved to Failed.
    pub failed: usize,
    /// Plans dropped mid-run because they stopped being active (e.g. cancelled).
    pub skipped: usize,
    pub attempts: usize,
}

/// The top-level lifecycle event enum.
///
/// The `#[serde(tag = "type", content = "payload")]` attribute serializes each
/// variant into a `{ "type": ..., "payload": ... }` object, which keeps
/// consumers in other languages simple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum LifecycleEvent {
    /// A plan passed validation and was opened.
    PlanCreated(SystematicPlan),
    /// An active plan's terms were changed.
    PlanModified(SystematicPlan),
    PlanCancelled {
        plan_id: Uuid,
        at: NaiveDateTime,
    },
    /// One installment was placed as an order.
    InstallmentExecuted {
        plan_id: Uuid,
        due_date: NaiveDate,
        order_id: String,
        installments_executed: u32,
    },
    /// An attempt failed; another attempt follows on the same date.
    AttemptFailed {
        plan_id: Uuid,
        due_date: NaiveDate,
        attempt: u32,
        reason: String,
    },
    PlanCompleted {
        plan_id: Uuid,
    },
    /// Every attempt on a due date failed; the plan needs manual intervention.
    PlanFailed {
        plan_id: Uuid,
        due_date: NaiveDate,
        reason: String,
    },
    /// The scheduler finished a business day.
    DayCompleted(DaySummary),
}

impl LifecycleEvent {
    /// The plan this event concerns, if any.
    pub fn plan_id(&self) -> Option<Uuid> {
        match self {
            LifecycleEvent::PlanCreated(plan) | LifecycleEvent::PlanModified(plan) => Some(plan.plan_id),
            LifecycleEvent::PlanCancelled { plan_id, .. }
            | LifecycleEvent::InstallmentExecuted { plan_id, .. }
            | LifecycleEvent::AttemptFailed { plan_id, .. }
            | LifecycleEvent::PlanCompleted { plan_id }
            | LifecycleEvent::PlanFailed { plan_id, .. } => Some(*plan_id),
            LifecycleEvent::DayCompleted(_) => None,
        }
    }

    pub fn to_json(&self) -> Result<String, EventsError> {
        Ok(serde_json::to_string(self)?)
    }
}
