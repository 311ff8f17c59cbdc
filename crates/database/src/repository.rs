use crate::error::DbError;
use crate::query::{LogQuery, PlanQuery};
use crate::store::PlanStore;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use core_types::{ExecutionLogEntry, Nominee, SystematicPlan};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::{FromRow, QueryBuilder};
use uuid::Uuid;

const PLAN_COLUMNS: &str = "plan_id, plan_type, product_id, target_product_id, amount, frequency, \
     start_date, total_installments, installments_executed, next_execution_date, status, retry_count, \
     opted_out_of_nomination, nominees, broker_code, created_at, modified_at, version";

const LOG_COLUMNS: &str =
    "entry_id, plan_id, due_date, attempted_at, attempt_number, outcome, order_id, reason";

/// The `DbRepository` provides the Postgres-backed `PlanStore`.
/// It encapsulates all SQL queries and row mapping.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

/// Represents a row from the `systematic_plans` table.
#[derive(Debug, Clone, FromRow)]
struct DbPlanRow {
    plan_id: Uuid,
    plan_type: String,
    product_id: String,
    target_product_id: Option<String>,
    amount: Decimal,
    frequency: String,
    start_date: NaiveDate,
    total_installments: i32,
    installments_executed: i32,
    next_execution_date: NaiveDate,
    status: String,
    retry_count: i32,
    opted_out_of_nomination: bool,
    nominees: JsonValue,
    broker_code: Option<String>,
    created_at: NaiveDateTime,
    modified_at: NaiveDateTime,
    version: i64,
}

/// Represents a row from the `execution_log` table.
#[derive(Debug, Clone, FromRow)]
struct DbLogRow {
    entry_id: Uuid,
    plan_id: Uuid,
    due_date: NaiveDate,
    attempted_at: NaiveDateTime,
    attempt_number: i32,
    outcome: String,
    order_id: Option<String>,
    reason: Option<String>,
}

fn corrupt(field: &str, err: impl std::fmt::Display) -> DbError {
    DbError::Corrupt(format!("{}: {}", field, err))
}

fn to_u32(value: i32, field: &str) -> Result<u32, DbError> {
    u32::try_from(value).map_err(|e| corrupt(field, e))
}

fn to_i32(value: u32, field: &str) -> Result<i32, DbError> {
    i32::try_from(value).map_err(|e| corrupt(field, e))
}

impl TryFrom<DbPlanRow> for SystematicPlan {
    type Error = DbError;

    fn try_from(row: DbPlanRow) -> Result<Self, Self::Error> {
        let nominees: Vec<Nominee> = serde_json::from_value(row.nominees)?;
        Ok(SystematicPlan {
            plan_id: row.plan_id,
            plan_type: row.plan_type.parse().map_err(|e| corrupt("plan_type", e))?,
            product_id: row.product_id,
            target_product_id: row.target_product_id,
            amount: row.amount,
            frequency: row.frequency.parse().map_err(|e| corrupt("frequency", e))?,
            start_date: row.start_date,
            total_installments: to_u32(row.total_installments, "total_installments")?,
            installments_executed: to_u32(row.installments_executed, "installments_executed")?,
            next_execution_date: row.next_execution_date,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            retry_count: to_u32(row.retry_count, "retry_count")?,
            opted_out_of_nomination: row.opted_out_of_nomination,
            nominees,
            broker_code: row.broker_code,
            created_at: row.created_at,
            modified_at: row.modified_at,
            version: u64::try_from(row.version).map_err(|e| corrupt("version", e))?,
        })
    }
}

impl TryFrom<DbLogRow> for ExecutionLogEntry {
    type Error = DbError;

    fn try_from(row: DbLogRow) -> Result<Self, Self::Error> {
        Ok(ExecutionLogEntry {
            entry_id: row.entry_id,
            plan_id: row.plan_id,
            due_date: row.due_date,
            attempted_at: row.attempted_at,
            attempt_number: to_u32(row.attempt_number, "attempt_number")?,
            outcome: row.outcome.parse().map_err(|e| corrupt("outcome", e))?,
            order_id: row.order_id,
            reason: row.reason,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn rows_to_plans(rows: Vec<DbPlanRow>) -> Result<Vec<SystematicPlan>, DbError> {
        rows.into_iter().map(SystematicPlan::try_from).collect()
    }
}

#[async_trait]
impl PlanStore for DbRepository {
    async fn insert_plan(&self, plan: &SystematicPlan) -> Result<(), DbError> {
        let nominees = serde_json::to_value(&plan.nominees)?;
        let result = sqlx::query(&format!(
            "INSERT INTO systematic_plans ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            PLAN_COLUMNS
        ))
        .bind(plan.plan_id)
        .bind(plan.plan_type.as_str())
        .bind(&plan.product_id)
        .bind(&plan.target_product_id)
        .bind(plan.amount)
        .bind(plan.frequency.as_str())
        .bind(plan.start_date)
        .bind(to_i32(plan.total_installments, "total_installments")?)
        .bind(to_i32(plan.installments_executed, "installments_executed")?)
        .bind(plan.next_execution_date)
        .bind(plan.status.as_str())
        .bind(to_i32(plan.retry_count, "retry_count")?)
        .bind(plan.opted_out_of_nomination)
        .bind(nominees)
        .bind(&plan.broker_code)
        .bind(plan.created_at)
        .bind(plan.modified_at)
        .bind(i64::try_from(plan.version).map_err(|e| corrupt("version", e))?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(DbError::DuplicatePlan { plan_id: plan.plan_id }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<SystematicPlan, DbError> {
        let row = sqlx::query_as::<_, DbPlanRow>(&format!(
            "SELECT {} FROM systematic_plans WHERE plan_id = $1",
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        row.try_into()
    }

    async fn update_plan(&self, plan: &SystematicPlan) -> Result<SystematicPlan, DbError> {
        let nominees = serde_json::to_value(&plan.nominees)?;
        let expected = i64::try_from(plan.version).map_err(|e| corrupt("version", e))?;

        // Single conditional statement: the row changes only if nobody wrote since we read it.
        let updated = sqlx::query_as::<_, DbPlanRow>(&format!(
            r#"
            UPDATE systematic_plans SET
                amount = $2,
                frequency = $3,
                total_installments = $4,
                installments_executed = $5,
                next_execution_date = $6,
                status = $7,
                retry_count = $8,
                opted_out_of_nomination = $9,
                nominees = $10,
                broker_code = $11,
                modified_at = $12,
                version = version + 1
            WHERE plan_id = $1 AND version = $13
            RETURNING {}
            "#,
            PLAN_COLUMNS
        ))
        .bind(plan.plan_id)
        .bind(plan.amount)
        .bind(plan.frequency.as_str())
        .bind(to_i32(plan.total_installments, "total_installments")?)
        .bind(to_i32(plan.installments_executed, "installments_executed")?)
        .bind(plan.next_execution_date)
        .bind(plan.status.as_str())
        .bind(to_i32(plan.retry_count, "retry_count")?)
        .bind(plan.opted_out_of_nomination)
        .bind(nominees)
        .bind(&plan.broker_code)
        .bind(plan.modified_at)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return row.try_into();
        }

        let found: Option<i64> = sqlx::query_scalar("SELECT version FROM systematic_plans WHERE plan_id = $1")
            .bind(plan.plan_id)
            .fetch_optional(&self.pool)
            .await?;
        match found {
            None => Err(DbError::NotFound),
            Some(found) => Err(DbError::VersionConflict {
                plan_id: plan.plan_id,
                expected: plan.version,
                found: u64::try_from(found).map_err(|e| corrupt("version", e))?,
            }),
        }
    }

    async fn query_plans(&self, query: &PlanQuery) -> Result<Vec<SystematicPlan>, DbError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM systematic_plans WHERE TRUE", PLAN_COLUMNS));

        if let Some(plan_type) = query.plan_type {
            builder.push(" AND plan_type = ").push_bind(plan_type.as_str());
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(product_id) = &query.product_id {
            builder
                .push(" AND (product_id = ")
                .push_bind(product_id.clone())
                .push(" OR target_product_id = ")
                .push_bind(product_id.clone())
                .push(")");
        }
        if let Some(from) = query.from {
            builder.push(" AND next_execution_date >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            builder.push(" AND next_execution_date <= ").push_bind(to);
        }
        if let Some(text) = &query.plan_id_contains {
            builder
                .push(" AND plan_id::text ILIKE ")
                .push_bind(format!("%{}%", text.trim()));
        }
        builder.push(" ORDER BY created_at ASC, plan_id ASC");

        let rows = builder.build_query_as::<DbPlanRow>().fetch_all(&self.pool).await?;
        Self::rows_to_plans(rows)
    }

    async fn due_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<SystematicPlan>, DbError> {
        let rows = sqlx::query_as::<_, DbPlanRow>(&format!(
            "SELECT {} FROM systematic_plans \
             WHERE status = 'Active' AND next_execution_date BETWEEN $1 AND $2 \
             ORDER BY created_at ASC, plan_id ASC",
            PLAN_COLUMNS
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_plans(rows)
    }

    async fn overdue_before(&self, date: NaiveDate) -> Result<Vec<SystematicPlan>, DbError> {
        let rows = sqlx::query_as::<_, DbPlanRow>(&format!(
            "SELECT {} FROM systematic_plans \
             WHERE status = 'Active' AND next_execution_date < $1 \
             ORDER BY created_at ASC, plan_id ASC",
            PLAN_COLUMNS
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_plans(rows)
    }

    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<(), DbError> {
        let result = sqlx::query(&format!(
            "INSERT INTO execution_log ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            LOG_COLUMNS
        ))
        .bind(entry.entry_id)
        .bind(entry.plan_id)
        .bind(entry.due_date)
        .bind(entry.attempted_at)
        .bind(to_i32(entry.attempt_number, "attempt_number")?)
        .bind(entry.outcome.as_str())
        .bind(&entry.order_id)
        .bind(&entry.reason)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(DbError::DuplicateLogEntry {
                plan_id: entry.plan_id,
                due_date: entry.due_date,
                attempt_number: entry.attempt_number,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn query_log(&self, query: &LogQuery) -> Result<Vec<ExecutionLogEntry>, DbError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM execution_log WHERE TRUE", LOG_COLUMNS));
        if let Some(plan_id) = query.plan_id {
            builder.push(" AND plan_id = ").push_bind(plan_id);
        }
        if let Some(from) = query.from {
            builder.push(" AND due_date >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            builder.push(" AND due_date <= ").push_bind(to);
        }
        builder.push(" ORDER BY plan_id ASC, due_date ASC, attempt_number ASC");

        let rows = builder.build_query_as::<DbLogRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(ExecutionLogEntry::try_from).collect()
    }
}
