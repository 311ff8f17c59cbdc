use crate::error::ValidationError;
use crate::patterns::{is_valid_broker_code, is_valid_pan};
use crate::report::{ValidationReport, ValidationResult};
use chrono::NaiveDate;
use configuration::ValidationSettings;
use core_types::{Nominee, OrderInstruction, Product, TransactionType};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

/// Everything one validation pass looks at. Built fresh per call; the engine keeps no state.
#[derive(Debug, Clone, Copy)]
pub struct ValidationRequest<'a> {
    pub instructions: &'a [OrderInstruction],
    /// The investor declined to nominate; nominee rules are skipped.
    pub opted_out: bool,
    pub nominees: Option<&'a [Nominee]>,
    pub broker_code: Option<&'a str>,
    pub products: &'a HashMap<String, Product>,
    /// Current market value of the investor's holding, per product.
    pub market_values: Option<&'a HashMap<String, Decimal>>,
    /// The date nominee ages are computed on.
    pub as_of: NaiveDate,
}

impl<'a> ValidationRequest<'a> {
    pub fn new(
        instructions: &'a [OrderInstruction],
        products: &'a HashMap<String, Product>,
        as_of: NaiveDate,
    ) -> Self {
        Self {
            instructions,
            opted_out: false,
            nominees: None,
            broker_code: None,
            products,
            market_values: None,
            as_of,
        }
    }

    pub fn opted_out(mut self, opted_out: bool) -> Self {
        self.opted_out = opted_out;
        self
    }

    pub fn nominees(mut self, nominees: &'a [Nominee]) -> Self {
        self.nominees = Some(nominees);
        self
    }

    pub fn broker_code(mut self, broker_code: Option<&'a str>) -> Self {
        self.broker_code = broker_code;
        self
    }

    pub fn market_values(mut self, market_values: &'a HashMap<String, Decimal>) -> Self {
        self.market_values = Some(market_values);
        self
    }
}

/// The rule gate every order and plan passes through.
///
/// Rules run independently and every violation is collected, so the caller
/// always receives the full list rather than the first problem found.
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    params: ValidationSettings,
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self {
            params: ValidationSettings::default(),
        }
    }
}

impl ValidationEngine {
    /// Creates a new `ValidationEngine` with the given configuration parameters.
    pub fn new(params: ValidationSettings) -> Result<Self, ValidationError> {
        if params.percentage_tolerance <= Decimal::ZERO {
            return Err(ValidationError::InvalidParameters(
                "percentage_tolerance must be greater than 0".to_string(),
            ));
        }
        if params.majority_age == 0 {
            return Err(ValidationError::InvalidParameters(
                "majority_age must be greater than 0".to_string(),
            ));
        }
        Ok(Self { params })
    }

    pub fn validate(&self, request: &ValidationRequest<'_>) -> ValidationResult {
        let mut report = ValidationReport::new();

        if request.instructions.is_empty() {
            report.error("At least one order instruction is required");
            return report.finish();
        }

        for instruction in request.instructions {
            self.check_instruction(instruction, request, &mut report);
        }

        if !request.opted_out {
            let nominees = request.nominees.unwrap_or(&[]);
            self.check_percentage_total(nominees, &mut report);
            for (index, nominee) in nominees.iter().enumerate() {
                self.check_nominee(index + 1, nominee, request.as_of, &mut report);
            }
        }

        if let Some(code) = request.broker_code {
            report.check(!is_valid_broker_code(code), || {
                format!("Invalid broker code format: {}", code)
            });
        }

        let result = report.finish();
        tracing::debug!(
            instructions = request.instructions.len(),
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "Validation completed."
        );
        result
    }

    // --- Per-instruction rules ---

    fn check_instruction(
        &self,
        instruction: &OrderInstruction,
        request: &ValidationRequest<'_>,
        report: &mut ValidationReport,
    ) {
        let kind = instruction.transaction_type;
        let is_switch = matches!(kind, TransactionType::Switch | TransactionType::FullSwitch);

        if is_switch {
            match instruction.target_product_id.as_deref() {
                None => {
                    report.error(format!(
                        "Switch from product {} requires a target product",
                        instruction.product_id
                    ));
                }
                Some(target) if target == instruction.product_id => {
                    report.error(format!("Cannot switch product {} into itself", target));
                }
                Some(_) => {}
            }
        }

        if !kind.bypasses_limits() {
            report.check(instruction.amount <= Decimal::ZERO, || {
                format!("Amount {} must be greater than zero", instruction.amount)
            });
        }

        let source = self.lookup(&instruction.product_id, request, report);
        if !kind.bypasses_limits() {
            if let Some(product) = source {
                check_limits(instruction.amount, product, report);
            }
            // The switched amount is invested into the target, so its limits apply too.
            if is_switch {
                if let Some(target) = instruction.target_product_id.as_deref() {
                    if let Some(product) = self.lookup(target, request, report) {
                        check_limits(instruction.amount, product, report);
                    }
                }
            }
        } else if let Some(target) = instruction.target_product_id.as_deref().filter(|_| is_switch) {
            self.lookup(target, request, report);
        }

        if kind.checks_market_value() {
            let market_value = request
                .market_values
                .and_then(|values| values.get(&instruction.product_id));
            match market_value {
                Some(value) => {
                    report.check(instruction.amount > *value, || {
                        format!(
                            "Amount {} exceeds current market value of {} for product {}",
                            instruction.amount, value, instruction.product_id
                        )
                    });
                }
                None => {
                    report.warn(format!(
                        "Market value unavailable for product {}; amount not checked against holdings",
                        instruction.product_id
                    ));
                }
            }
        }
    }

    fn lookup<'r>(
        &self,
        product_id: &str,
        request: &ValidationRequest<'r>,
        report: &mut ValidationReport,
    ) -> Option<&'r Product> {
        let product = request.products.get(product_id);
        if product.is_none() {
            report.error(format!("Unknown product '{}'", product_id));
        }
        product
    }

    // --- Nominee rules ---

    fn check_percentage_total(&self, nominees: &[Nominee], report: &mut ValidationReport) {
        let total: Decimal = nominees.iter().map(|n| n.percentage).sum();
        report.check((total - dec!(100)).abs() > self.params.percentage_tolerance, || {
            format!("Nominee percentages must total 100%, got {}%", total.normalize())
        });
    }

    fn check_nominee(&self, position: usize, nominee: &Nominee, as_of: NaiveDate, report: &mut ValidationReport) {
        report
            .check(
                nominee.percentage < Decimal::ZERO || nominee.percentage > dec!(100),
                || format!("Nominee {}: percentage must be between 0 and 100", position),
            )
            .check(!is_valid_pan(&nominee.pan), || {
                format!("Nominee {}: Invalid PAN format", position)
            });

        if let Some(guardian_pan) = nominee.guardian_pan.as_deref() {
            report.check(!is_valid_pan(guardian_pan), || {
                format!("Nominee {}: Invalid guardian PAN format", position)
            });
        }

        if nominee.date_of_birth > as_of {
            report.error(format!("Nominee {}: date of birth is in the future", position));
            return;
        }

        if nominee.age_on(as_of) < self.params.majority_age as i32 {
            let missing = |field: &Option<String>| field.as_deref().is_none_or(|v| v.trim().is_empty());
            report
                .check(missing(&nominee.guardian_name), || {
                    format!("Nominee {}: guardian name is required for a minor nominee", position)
                })
                .check(missing(&nominee.guardian_pan), || {
                    format!("Nominee {}: guardian PAN is required for a minor nominee", position)
                })
                .check(missing(&nominee.guardian_relationship), || {
                    format!(
                        "Nominee {}: guardian relationship is required for a minor nominee",
                        position
                    )
                });
        }
    }
}

fn check_limits(amount: Decimal, product: &Product, report: &mut ValidationReport) {
    report.check(amount < product.min_investment, || {
        format!(
            "Amount {} is below minimum investment of {} for product {}",
            amount, product.min_investment, product.product_id
        )
    });
    if let Some(max) = product.max_investment {
        report.check(amount > max, || {
            format!(
                "Amount {} exceeds maximum investment of {} for product {}",
                amount, max, product.product_id
            )
        });
    }
}
