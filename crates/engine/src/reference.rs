use core_types::{OrderInstruction, Product, SystematicPlan};
use executor::{ExecutorError, MarketValueSource, ProductCatalog};
use rust_decimal::Decimal;
use std::collections::HashMap;
use validation::{ValidationEngine, ValidationRequest, ValidationResult};

/// Catalog entries and holdings fetched for one validation pass.
///
/// Products the catalog does not list are simply absent; the validation
/// engine reports them as unknown.
#[derive(Debug, Default)]
pub(crate) struct ReferenceData {
    pub products: HashMap<String, Product>,
    pub market_values: HashMap<String, Decimal>,
}

impl ReferenceData {
    /// Looks up every product the instruction touches, plus the holding of
    /// its source product when the transaction type draws from holdings.
    pub async fn fetch(
        instruction: &OrderInstruction,
        catalog: &dyn ProductCatalog,
        market_values: &dyn MarketValueSource,
    ) -> Result<Self, ExecutorError> {
        let mut data = ReferenceData::default();

        let ids = std::iter::once(instruction.product_id.as_str())
            .chain(instruction.target_product_id.as_deref());
        for id in ids {
            if data.products.contains_key(id) {
                continue;
            }
            if let Some(product) = catalog.get_product(id).await? {
                data.products.insert(id.to_string(), product);
            }
        }

        if instruction.transaction_type.checks_market_value() {
            if let Some(value) = market_values.get_market_value(&instruction.product_id).await? {
                data.market_values.insert(instruction.product_id.clone(), value);
            }
        }

        Ok(data)
    }
}

/// Validates one installment of `plan` against freshly fetched reference data.
pub(crate) async fn validate_installment(
    plan: &SystematicPlan,
    validator: &ValidationEngine,
    catalog: &dyn ProductCatalog,
    market_values: &dyn MarketValueSource,
    as_of: chrono::NaiveDate,
) -> Result<ValidationResult, ExecutorError> {
    let instruction = plan.installment_instruction();
    let data = ReferenceData::fetch(&instruction, catalog, market_values).await?;
    let instructions = [instruction];

    let request = ValidationRequest::new(&instructions, &data.products, as_of)
        .opted_out(plan.opted_out_of_nomination)
        .nominees(&plan.nominees)
        .broker_code(plan.broker_code.as_deref())
        .market_values(&data.market_values);

    Ok(validator.validate(&request))
}
