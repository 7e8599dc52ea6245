// src/store/pg.rs

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{types::Json, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{
    diff_assigned_plans, RecordKind, ServiceOrder, ServiceQuery, Store, StoreError, StoreResult,
};
use crate::models::{
    AssignedPlan, Company, NewCompany, NewPatient, NewPlan, NewService, Patient, Plan,
    ScheduledInstance, Service,
};

/// Postgres-backed store. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AssignedPlanRow {
    plan_id: String,
    custom_duration: Option<i32>,
    total_instances_required: Option<i32>,
    scheduled_instances: Json<Vec<ScheduledInstance>>,
}

impl From<AssignedPlanRow> for AssignedPlan {
    fn from(row: AssignedPlanRow) -> Self {
        AssignedPlan {
            plan_id: row.plan_id,
            custom_duration: row.custom_duration,
            total_instances_required: row.total_instances_required,
            scheduled_instances: row.scheduled_instances.0,
        }
    }
}

const SERVICE_COLUMNS: &str = "id, patient_id, company_id, plan_id, date, start_time, end_time, \
                               description, duration_minutes, user_id";

fn affected_or_not_found(rows: u64, kind: RecordKind, id: &str) -> StoreResult<()> {
    if rows == 0 {
        Err(StoreError::not_found(kind, id))
    } else {
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    /* ============================================================
       Companies
       ============================================================ */

    async fn get_company(&self, id: &str) -> StoreResult<Option<Company>> {
        let row = sqlx::query_as::<_, Company>(
            r#"
            SELECT id, name, address, contact
            FROM companies
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_companies(&self) -> StoreResult<Vec<Company>> {
        let rows = sqlx::query_as::<_, Company>(
            r#"
            SELECT id, name, address, contact
            FROM companies
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_company(&self, data: NewCompany) -> StoreResult<Company> {
        let row = sqlx::query_as::<_, Company>(
            r#"
            INSERT INTO companies (id, name, address, contact)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, address, contact
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(data.name)
        .bind(data.address)
        .bind(data.contact)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_company(&self, company: &Company) -> StoreResult<()> {
        let res = sqlx::query(
            r#"
            UPDATE companies
            SET name = $2, address = $3, contact = $4
            WHERE id = $1
            "#,
        )
        .bind(&company.id)
        .bind(&company.name)
        .bind(&company.address)
        .bind(&company.contact)
        .execute(&self.pool)
        .await?;
        affected_or_not_found(res.rows_affected(), RecordKind::Company, &company.id)
    }

    async fn delete_company(&self, id: &str) -> StoreResult<()> {
        // patients keep their company_id; there is no foreign key on purpose
        let res = sqlx::query(r#"DELETE FROM companies WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        affected_or_not_found(res.rows_affected(), RecordKind::Company, id)
    }

    /* ============================================================
       Plans
       ============================================================ */

    async fn get_plan(&self, id: &str) -> StoreResult<Option<Plan>> {
        let row = sqlx::query_as::<_, Plan>(
            r#"
            SELECT id, name, description, default_duration
            FROM plans
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_plans(&self) -> StoreResult<Vec<Plan>> {
        let rows = sqlx::query_as::<_, Plan>(
            r#"
            SELECT id, name, description, default_duration
            FROM plans
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_plan(&self, data: NewPlan) -> StoreResult<Plan> {
        let row = sqlx::query_as::<_, Plan>(
            r#"
            INSERT INTO plans (id, name, description, default_duration)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, description, default_duration
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(data.name)
        .bind(data.description)
        .bind(data.default_duration)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_plan(&self, plan: &Plan) -> StoreResult<()> {
        let res = sqlx::query(
            r#"
            UPDATE plans
            SET name = $2, description = $3, default_duration = $4
            WHERE id = $1
            "#,
        )
        .bind(&plan.id)
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(plan.default_duration)
        .execute(&self.pool)
        .await?;
        affected_or_not_found(res.rows_affected(), RecordKind::Plan, &plan.id)
    }

    async fn delete_plan(&self, id: &str) -> StoreResult<()> {
        let res = sqlx::query(r#"DELETE FROM plans WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        affected_or_not_found(res.rows_affected(), RecordKind::Plan, id)
    }

    /* ============================================================
       Patients
       ============================================================ */

    async fn get_patient(&self, id: &str) -> StoreResult<Option<Patient>> {
        let row = sqlx::query_as::<_, Patient>(
            r#"
            SELECT id, name, company_id, address, contact
            FROM patients
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_patients(&self) -> StoreResult<Vec<Patient>> {
        let rows = sqlx::query_as::<_, Patient>(
            r#"
            SELECT id, name, company_id, address, contact
            FROM patients
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_patient_with_id(&self, id: &str, data: NewPatient) -> StoreResult<Patient> {
        let row = sqlx::query_as::<_, Patient>(
            r#"
            INSERT INTO patients (id, name, company_id, address, contact)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, company_id, address, contact
            "#,
        )
        .bind(id)
        .bind(data.name)
        .bind(data.company_id)
        .bind(data.address)
        .bind(data.contact)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_patient(&self, patient: &Patient) -> StoreResult<()> {
        let res = sqlx::query(
            r#"
            UPDATE patients
            SET name = $2, company_id = $3, address = $4, contact = $5
            WHERE id = $1
            "#,
        )
        .bind(&patient.id)
        .bind(&patient.name)
        .bind(&patient.company_id)
        .bind(&patient.address)
        .bind(&patient.contact)
        .execute(&self.pool)
        .await?;
        affected_or_not_found(res.rows_affected(), RecordKind::Patient, &patient.id)
    }

    async fn delete_patient(&self, id: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(r#"DELETE FROM assigned_plans WHERE patient_id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let res = sqlx::query(r#"DELETE FROM patients WHERE id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        affected_or_not_found(res.rows_affected(), RecordKind::Patient, id)?;

        tx.commit().await?;
        Ok(())
    }

    /* ============================================================
       Services
       ============================================================ */

    async fn get_service(&self, id: &str) -> StoreResult<Option<Service>> {
        let sql = format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = $1");
        let row = sqlx::query_as::<_, Service>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn query_services(&self, query: &ServiceQuery) -> StoreResult<Vec<Service>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {SERVICE_COLUMNS} FROM services WHERE TRUE"));

        if let Some(patient_id) = &query.patient_id {
            qb.push(" AND patient_id = ").push_bind(patient_id.clone());
        }
        if let Some(company_id) = &query.company_id {
            qb.push(" AND company_id = ").push_bind(company_id.clone());
        }
        if let Some(from) = query.from {
            qb.push(" AND date >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            qb.push(" AND date <= ").push_bind(to);
        }
        qb.push(match query.order {
            ServiceOrder::Chronological => " ORDER BY date ASC, start_time ASC",
            ServiceOrder::NewestFirst => " ORDER BY date DESC, start_time DESC",
        });

        let rows = qb.build_query_as::<Service>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn create_service(&self, data: NewService) -> StoreResult<Service> {
        let sql = format!(
            "INSERT INTO services ({SERVICE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {SERVICE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, Service>(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(data.patient_id)
            .bind(data.company_id)
            .bind(data.plan_id)
            .bind(data.date)
            .bind(data.start_time)
            .bind(data.end_time)
            .bind(data.description)
            .bind(data.duration_minutes)
            .bind(data.user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn update_service_date(&self, id: &str, date: NaiveDate) -> StoreResult<()> {
        let res = sqlx::query(r#"UPDATE services SET date = $2 WHERE id = $1"#)
            .bind(id)
            .bind(date)
            .execute(&self.pool)
            .await?;
        affected_or_not_found(res.rows_affected(), RecordKind::Service, id)
    }

    async fn delete_service(&self, id: &str) -> StoreResult<()> {
        let res = sqlx::query(r#"DELETE FROM services WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        affected_or_not_found(res.rows_affected(), RecordKind::Service, id)
    }

    /* ============================================================
       Counters
       ============================================================ */

    async fn next_sequential_id(&self, counter: &str, prefix: &str) -> StoreResult<String> {
        let count: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO counters (name, count)
            VALUES ($1, 1)
            ON CONFLICT (name)
            DO UPDATE SET count = counters.count + 1
            RETURNING count
            "#,
        )
        .bind(counter)
        .fetch_one(&self.pool)
        .await?;
        Ok(format!("{prefix}{count}"))
    }

    /* ============================================================
       Assigned plans (per-patient sub-collection)
       ============================================================ */

    async fn list_assigned_plans(&self, patient_id: &str) -> StoreResult<Vec<AssignedPlan>> {
        let rows = sqlx::query_as::<_, AssignedPlanRow>(
            r#"
            SELECT plan_id, custom_duration, total_instances_required, scheduled_instances
            FROM assigned_plans
            WHERE patient_id = $1
            ORDER BY plan_id ASC
            "#,
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AssignedPlan::from).collect())
    }

    async fn replace_assigned_plans(
        &self,
        patient_id: &str,
        plans: &[AssignedPlan],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<String> =
            sqlx::query_scalar(r#"SELECT id FROM patients WHERE id = $1 FOR UPDATE"#)
                .bind(patient_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(StoreError::not_found(RecordKind::Patient, patient_id));
        }

        let current: Vec<String> =
            sqlx::query_scalar(r#"SELECT plan_id FROM assigned_plans WHERE patient_id = $1"#)
                .bind(patient_id)
                .fetch_all(&mut *tx)
                .await?;

        let diff = diff_assigned_plans(current, plans);

        for plan_id in &diff.removed {
            sqlx::query(r#"DELETE FROM assigned_plans WHERE patient_id = $1 AND plan_id = $2"#)
                .bind(patient_id)
                .bind(plan_id)
                .execute(&mut *tx)
                .await?;
        }

        for ap in diff.upserts {
            sqlx::query(
                r#"
                INSERT INTO assigned_plans
                  (patient_id, plan_id, custom_duration, total_instances_required, scheduled_instances)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (patient_id, plan_id)
                DO UPDATE SET
                  custom_duration = EXCLUDED.custom_duration,
                  total_instances_required = EXCLUDED.total_instances_required,
                  scheduled_instances = EXCLUDED.scheduled_instances
                "#,
            )
            .bind(patient_id)
            .bind(&ap.plan_id)
            .bind(ap.custom_duration)
            .bind(ap.total_instances_required)
            .bind(Json(&ap.scheduled_instances))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
