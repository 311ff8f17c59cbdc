use chrono::NaiveDate;
use core_types::{ExecutionLogEntry, PlanStatus, PlanType, SystematicPlan};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Filters for browsing plans. Every field is optional and set fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanQuery {
    pub plan_type: Option<PlanType>,
    pub status: Option<PlanStatus>,
    /// Matches either the source or the target product.
    pub product_id: Option<String>,
    /// Inclusive lower bound on the next execution date.
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound on the next execution date.
    pub to: Option<NaiveDate>,
    /// Case-insensitive substring of the plan id.
    pub plan_id_contains: Option<String>,
}

impl PlanQuery {
    pub fn with_status(mut self, status: PlanStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_plan_type(mut self, plan_type: PlanType) -> Self {
        self.plan_type = Some(plan_type);
        self
    }

    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_plan_id_text(mut self, text: impl Into<String>) -> Self {
        self.plan_id_contains = Some(text.into());
        self
    }

    pub fn matches(&self, plan: &SystematicPlan) -> bool {
        self.plan_type.is_none_or(|t| plan.plan_type == t)
            && self.status.is_none_or(|s| plan.status == s)
            && self.product_id.as_deref().is_none_or(|p| {
                plan.product_id == p || plan.target_product_id.as_deref() == Some(p)
            })
            && self.from.is_none_or(|from| plan.next_execution_date >= from)
            && self.to.is_none_or(|to| plan.next_execution_date <= to)
            && self.plan_id_contains.as_deref().is_none_or(|text| {
                plan.plan_id
                    .to_string()
                    .contains(&text.trim().to_ascii_lowercase())
            })
    }
}

/// Filters for the execution log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogQuery {
    pub plan_id: Option<Uuid>,
    /// Inclusive lower bound on the due date.
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound on the due date.
    pub to: Option<NaiveDate>,
}

impl LogQuery {
    pub fn for_plan(plan_id: Uuid) -> Self {
        Self {
            plan_id: Some(plan_id),
            ..Self::default()
        }
    }

    pub fn on(date: NaiveDate) -> Self {
        Self {
            plan_id: None,
            from: Some(date),
            to: Some(date),
        }
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn matches(&self, entry: &ExecutionLogEntry) -> bool {
        self.plan_id.is_none_or(|id| entry.plan_id == id)
            && self.from.is_none_or(|from| entry.due_date >= from)
            && self.to.is_none_or(|to| entry.due_date <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use core_types::{Frequency, PlanRequest};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn now() -> NaiveDateTime {
        date(2026, 10, 19).and_hms_opt(9, 0, 0).unwrap()
    }

    fn stp() -> SystematicPlan {
        SystematicPlan::from_request(
            PlanRequest {
                plan_type: PlanType::Stp,
                product_id: "LIQUID".to_string(),
                target_product_id: Some("EQUITY".to_string()),
                amount: dec!(10000),
                frequency: Frequency::Monthly,
                start_date: date(2026, 11, 5),
                total_installments: 6,
                opted_out_of_nomination: true,
                nominees: vec![],
                broker_code: None,
            },
            now(),
        )
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(PlanQuery::default().matches(&stp()));
    }

    #[test]
    fn filters_are_anded() {
        let plan = stp();
        assert!(PlanQuery::default().with_plan_type(PlanType::Stp).with_status(PlanStatus::Active).matches(&plan));
        assert!(!PlanQuery::default().with_plan_type(PlanType::Stp).with_status(PlanStatus::Failed).matches(&plan));
        assert!(PlanQuery::default().with_product("EQUITY").matches(&plan));
        assert!(!PlanQuery::default().with_product("GILT").matches(&plan));
    }

    #[test]
    fn date_range_is_inclusive_on_next_execution() {
        let plan = stp();
        assert!(PlanQuery::default().between(date(2026, 11, 5), date(2026, 11, 5)).matches(&plan));
        assert!(!PlanQuery::default().between(date(2026, 11, 6), date(2026, 12, 1)).matches(&plan));
    }

    #[test]
    fn plan_id_text_is_case_insensitive() {
        let plan = stp();
        let fragment = plan.plan_id.to_string()[..8].to_ascii_uppercase();
        assert!(PlanQuery::default().with_plan_id_text(fragment).matches(&plan));
        assert!(!PlanQuery::default().with_plan_id_text("not-an-id").matches(&plan));
    }

    #[test]
    fn log_query_filters_by_plan_and_due_date() {
        let plan = stp();
        let entry = ExecutionLogEntry::new(
            plan.plan_id,
            date(2026, 11, 5),
            now(),
            1,
            core_types::AttemptOutcome::Executed,
        );
        assert!(LogQuery::for_plan(plan.plan_id).matches(&entry));
        assert!(LogQuery::on(date(2026, 11, 5)).matches(&entry));
        assert!(!LogQuery::on(date(2026, 11, 6)).matches(&entry));
        assert!(!LogQuery::for_plan(uuid::Uuid::new_v4()).matches(&entry));
    }
}
