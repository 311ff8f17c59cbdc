use crate::error::CoreError;
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of order a single instruction represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Purchase,
    Redemption,
    Switch,
    FullRedemption,
    FullSwitch,
}

impl TransactionType {
    /// Full liquidations are exempt from product min/max limits.
    pub fn bypasses_limits(&self) -> bool {
        matches!(self, TransactionType::FullRedemption | TransactionType::FullSwitch)
    }

    /// Only partial outflows are capped by the holding's market value.
    pub fn checks_market_value(&self) -> bool {
        matches!(self, TransactionType::Redemption | TransactionType::Switch)
    }
}

/// The three flavours of systematic plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanType {
    /// Periodic purchase into one product.
    Sip,
    /// Periodic switch from a source product into a target product.
    Stp,
    /// Periodic withdrawal from one product.
    Swp,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Sip => "SIP",
            PlanType::Stp => "STP",
            PlanType::Swp => "SWP",
        }
    }

    /// The transaction type each installment of this plan is placed as.
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            PlanType::Sip => TransactionType::Purchase,
            PlanType::Stp => TransactionType::Switch,
            PlanType::Swp => TransactionType::Redemption,
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SIP" => Ok(PlanType::Sip),
            "STP" => Ok(PlanType::Stp),
            "SWP" => Ok(PlanType::Swp),
            _ => Err(CoreError::InvalidInput("plan type".to_string(), s.to_string())),
        }
    }
}

/// How often a plan's installments fall due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    Monthly,
    Quarterly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Monthly => "Monthly",
            Frequency::Quarterly => "Quarterly",
        }
    }

    pub fn months(&self) -> u32 {
        match self {
            Frequency::Monthly => 1,
            Frequency::Quarterly => 3,
        }
    }

    /// Returns the date `steps` periods after `anchor`.
    ///
    /// Days past the end of the target month clamp to its last day, so an
    /// anchor of Jan 31 yields Feb 28 (or 29) and then Mar 31, without drift.
    pub fn step_from(&self, anchor: NaiveDate, steps: u32) -> Result<NaiveDate, CoreError> {
        let months = self
            .months()
            .checked_mul(steps)
            .ok_or_else(|| CoreError::DateOverflow(format!("{} x {}", self, steps)))?;
        anchor
            .checked_add_months(Months::new(months))
            .ok_or_else(|| CoreError::DateOverflow(format!("{} + {} months", anchor, months)))
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monthly" => Ok(Frequency::Monthly),
            "quarterly" => Ok(Frequency::Quarterly),
            _ => Err(CoreError::InvalidInput("frequency".to_string(), s.to_string())),
        }
    }
}

/// Lifecycle state of a plan. Everything except `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanStatus {
    Active,
    Completed,
    Cancelled,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Active => "Active",
            PlanStatus::Completed => "Completed",
            PlanStatus::Cancelled => "Cancelled",
            PlanStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PlanStatus::Active)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(PlanStatus::Active),
            "completed" => Ok(PlanStatus::Completed),
            "cancelled" => Ok(PlanStatus::Cancelled),
            "failed" => Ok(PlanStatus::Failed),
            _ => Err(CoreError::InvalidInput("plan status".to_string(), s.to_string())),
        }
    }
}

/// The recorded result of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptOutcome {
    /// The order was placed.
    Executed,
    /// The attempt failed and another attempt is scheduled for the same date.
    Retrying,
    /// The attempt failed and no further attempt will be made for the date.
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Executed => "Executed",
            AttemptOutcome::Retrying => "Retrying",
            AttemptOutcome::Failed => "Failed",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptOutcome {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "executed" => Ok(AttemptOutcome::Executed),
            "retrying" => Ok(AttemptOutcome::Retrying),
            "failed" => Ok(AttemptOutcome::Failed),
            _ => Err(CoreError::InvalidInput("attempt outcome".to_string(), s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn full_variants_bypass_limits() {
        assert!(TransactionType::FullRedemption.bypasses_limits());
        assert!(TransactionType::FullSwitch.bypasses_limits());
        assert!(!TransactionType::Purchase.bypasses_limits());
        assert!(!TransactionType::Redemption.bypasses_limits());
    }

    #[test]
    fn only_partial_outflows_check_market_value() {
        assert!(TransactionType::Redemption.checks_market_value());
        assert!(TransactionType::Switch.checks_market_value());
        assert!(!TransactionType::Purchase.checks_market_value());
        assert!(!TransactionType::FullSwitch.checks_market_value());
    }

    #[test]
    fn monthly_steps_clamp_to_month_end_without_drift() {
        let anchor = date(2025, 1, 31);
        assert_eq!(Frequency::Monthly.step_from(anchor, 1).unwrap(), date(2025, 2, 28));
        assert_eq!(Frequency::Monthly.step_from(anchor, 2).unwrap(), date(2025, 3, 31));
        assert_eq!(Frequency::Monthly.step_from(date(2024, 1, 31), 1).unwrap(), date(2024, 2, 29));
    }

    #[test]
    fn quarterly_steps_three_months() {
        assert_eq!(
            Frequency::Quarterly.step_from(date(2025, 11, 15), 1).unwrap(),
            date(2026, 2, 15)
        );
    }

    #[test]
    fn text_forms_parse_case_insensitively() {
        assert_eq!("sip".parse::<PlanType>().unwrap(), PlanType::Sip);
        assert_eq!("CANCELLED".parse::<PlanStatus>().unwrap(), PlanStatus::Cancelled);
        assert_eq!("quarterly".parse::<Frequency>().unwrap(), Frequency::Quarterly);
        assert!("weekly".parse::<Frequency>().is_err());
        assert_eq!(PlanStatus::Failed.to_string().parse::<PlanStatus>().unwrap(), PlanStatus::Failed);
    }
}
