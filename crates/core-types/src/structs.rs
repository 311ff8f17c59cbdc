use crate::enums::{AttemptOutcome, Frequency, PlanStatus, PlanType, TransactionType};
use crate::error::CoreError;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tradable instrument as published by the product catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub name: String,
    pub min_investment: Decimal,
    pub max_investment: Option<Decimal>,
}

impl Product {
    pub fn new(product_id: impl Into<String>, min_investment: Decimal, max_investment: Option<Decimal>) -> Self {
        let product_id = product_id.into();
        Self {
            name: product_id.clone(),
            product_id,
            min_investment,
            max_investment,
        }
    }
}

/// A beneficiary declared against a plan or order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nominee {
    pub name: String,
    /// Share of the eventual payout, 0-100.
    pub percentage: Decimal,
    pub pan: String,
    pub date_of_birth: NaiveDate,
    pub guardian_name: Option<String>,
    pub guardian_pan: Option<String>,
    pub guardian_relationship: Option<String>,
}

impl Nominee {
    /// Age in whole years on `as_of`: the calendar-year difference, minus one
    /// if the birthday has not yet come round that year.
    pub fn age_on(&self, as_of: NaiveDate) -> i32 {
        let mut age = as_of.year() - self.date_of_birth.year();
        if (as_of.month(), as_of.day()) < (self.date_of_birth.month(), self.date_of_birth.day()) {
            age -= 1;
        }
        age
    }
}

/// One line of a purchase, redemption or switch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderInstruction {
    /// The product bought, or the source product for outflows and switches.
    pub product_id: String,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    /// The product switched into, for switches.
    pub target_product_id: Option<String>,
}

impl OrderInstruction {
    pub fn new(product_id: impl Into<String>, amount: Decimal, transaction_type: TransactionType) -> Self {
        Self {
            product_id: product_id.into(),
            amount,
            transaction_type,
            target_product_id: None,
        }
    }

    pub fn with_target(mut self, target_product_id: impl Into<String>) -> Self {
        self.target_product_id = Some(target_product_id.into());
        self
    }
}

/// The terms an investor or RM submits to open a new plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub plan_type: PlanType,
    pub product_id: String,
    pub target_product_id: Option<String>,
    pub amount: Decimal,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub total_installments: u32,
    pub opted_out_of_nomination: bool,
    pub nominees: Vec<Nominee>,
    pub broker_code: Option<String>,
}

/// A partial update to an active plan. `None` leaves a term unchanged.
///
/// Type, products and frequency are fixed for the life of a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanChanges {
    pub amount: Option<Decimal>,
    pub total_installments: Option<u32>,
    pub opted_out_of_nomination: Option<bool>,
    pub nominees: Option<Vec<Nominee>>,
    /// `Some(None)` clears the broker code.
    pub broker_code: Option<Option<String>>,
}

impl PlanChanges {
    pub fn is_empty(&self) -> bool {
        self == &PlanChanges::default()
    }
}

/// A recurring investment instruction and its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystematicPlan {
    pub plan_id: Uuid,
    pub plan_type: PlanType,
    pub product_id: String,
    pub target_product_id: Option<String>,
    pub amount: Decimal,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub total_installments: u32,
    pub installments_executed: u32,
    pub next_execution_date: NaiveDate,
    pub status: PlanStatus,
    /// Failed attempts on the current due date.
    pub retry_count: u32,
    pub opted_out_of_nomination: bool,
    pub nominees: Vec<Nominee>,
    pub broker_code: Option<String>,
    pub created_at: NaiveDateTime,
    pub modified_at: NaiveDateTime,
    /// Bumped on every write; guards conditional updates.
    pub version: u64,
}

impl SystematicPlan {
    /// Opens a fresh, active plan from an accepted request.
    pub fn from_request(request: PlanRequest, now: NaiveDateTime) -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            plan_type: request.plan_type,
            product_id: request.product_id,
            target_product_id: request.target_product_id,
            amount: request.amount,
            frequency: request.frequency,
            next_execution_date: request.start_date,
            start_date: request.start_date,
            total_installments: request.total_installments,
            installments_executed: 0,
            status: PlanStatus::Active,
            retry_count: 0,
            opted_out_of_nomination: request.opted_out_of_nomination,
            nominees: request.nominees,
            broker_code: request.broker_code,
            created_at: now,
            modified_at: now,
            version: 0,
        }
    }

    /// The instruction placed for one installment of this plan.
    pub fn installment_instruction(&self) -> OrderInstruction {
        OrderInstruction {
            product_id: self.product_id.clone(),
            amount: self.amount,
            transaction_type: self.plan_type.transaction_type(),
            target_product_id: self.target_product_id.clone(),
        }
    }

    /// The due date of the installment after `installments_executed` have run.
    pub fn installment_date(&self, installments_executed: u32) -> Result<NaiveDate, CoreError> {
        self.frequency.step_from(self.start_date, installments_executed)
    }

    pub fn remaining_installments(&self) -> u32 {
        self.total_installments.saturating_sub(self.installments_executed)
    }

    pub fn is_due_on(&self, date: NaiveDate) -> bool {
        self.status == PlanStatus::Active && self.next_execution_date == date
    }
}

/// One attempt to execute a plan on a due date. Never mutated after write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub entry_id: Uuid,
    pub plan_id: Uuid,
    pub due_date: NaiveDate,
    pub attempted_at: NaiveDateTime,
    /// 1-based within the due date.
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub order_id: Option<String>,
    pub reason: Option<String>,
}

impl ExecutionLogEntry {
    pub fn new(
        plan_id: Uuid,
        due_date: NaiveDate,
        attempted_at: NaiveDateTime,
        attempt_number: u32,
        outcome: AttemptOutcome,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            plan_id,
            due_date,
            attempted_at,
            attempt_number,
            outcome,
            order_id: None,
            reason: None,
        }
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn nominee_born(dob: NaiveDate) -> Nominee {
        Nominee {
            name: "Asha".to_string(),
            percentage: dec!(100),
            pan: "ABCDE1234F".to_string(),
            date_of_birth: dob,
            guardian_name: None,
            guardian_pan: None,
            guardian_relationship: None,
        }
    }

    #[test]
    fn age_subtracts_a_year_before_the_birthday() {
        let nominee = nominee_born(date(2008, 6, 15));
        assert_eq!(nominee.age_on(date(2026, 6, 14)), 17);
        assert_eq!(nominee.age_on(date(2026, 6, 15)), 18);
        assert_eq!(nominee.age_on(date(2026, 12, 1)), 18);
    }

    #[test]
    fn plan_opens_active_at_its_start_date() {
        let request = PlanRequest {
            plan_type: PlanType::Stp,
            product_id: "LIQUID".to_string(),
            target_product_id: Some("EQUITY".to_string()),
            amount: dec!(10000),
            frequency: Frequency::Monthly,
            start_date: date(2026, 11, 5),
            total_installments: 12,
            opted_out_of_nomination: true,
            nominees: vec![],
            broker_code: None,
        };
        let now = date(2026, 10, 19).and_hms_opt(10, 0, 0).unwrap();
        let plan = SystematicPlan::from_request(request, now);

        assert_eq!(plan.status, PlanStatus::Active);
        assert_eq!(plan.installments_executed, 0);
        assert_eq!(plan.next_execution_date, date(2026, 11, 5));
        assert_eq!(plan.remaining_installments(), 12);

        let instruction = plan.installment_instruction();
        assert_eq!(instruction.transaction_type, TransactionType::Switch);
        assert_eq!(instruction.target_product_id.as_deref(), Some("EQUITY"));
        assert_eq!(plan.installment_date(2).unwrap(), date(2027, 1, 5));
    }
}
