// src/store/mod.rs

//! Persistence collaborator consumed by the engine.
//!
//! Records cross this boundary with calendar-day dates only. Both
//! implementations give `replace_assigned_plans` the same meaning: the stored
//! set of a patient's assignments becomes exactly the given set (keys missing
//! from it are deleted, the rest are upserted).

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{
    AssignedPlan, Company, NewCompany, NewPatient, NewPlan, NewService, Patient, Plan, Service,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Company,
    Plan,
    Patient,
    Service,
    AssignedPlan,
    Appointment,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Company => "company",
            RecordKind::Plan => "plan",
            RecordKind::Patient => "patient",
            RecordKind::Service => "service",
            RecordKind::AssignedPlan => "assigned plan",
            RecordKind::Appointment => "appointment",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn not_found(kind: RecordKind, id: &str) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServiceOrder {
    /// date ASC, start_time ASC
    #[default]
    Chronological,
    /// date DESC, start_time DESC
    NewestFirst,
}

/// Equality and inclusive-range filters over services.
#[derive(Debug, Clone, Default)]
pub struct ServiceQuery {
    pub patient_id: Option<String>,
    pub company_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub order: ServiceOrder,
}

impl ServiceQuery {
    pub fn matches(&self, service: &Service) -> bool {
        self.patient_id
            .as_deref()
            .is_none_or(|id| service.patient_id == id)
            && self
                .company_id
                .as_deref()
                .is_none_or(|id| service.company_id == id)
            && self.from.is_none_or(|from| service.date >= from)
            && self.to.is_none_or(|to| service.date <= to)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    // companies, ordered by name
    async fn get_company(&self, id: &str) -> StoreResult<Option<Company>>;
    async fn list_companies(&self) -> StoreResult<Vec<Company>>;
    async fn create_company(&self, data: NewCompany) -> StoreResult<Company>;
    async fn update_company(&self, company: &Company) -> StoreResult<()>;
    async fn delete_company(&self, id: &str) -> StoreResult<()>;

    // plans, ordered by name
    async fn get_plan(&self, id: &str) -> StoreResult<Option<Plan>>;
    async fn list_plans(&self) -> StoreResult<Vec<Plan>>;
    async fn create_plan(&self, data: NewPlan) -> StoreResult<Plan>;
    async fn update_plan(&self, plan: &Plan) -> StoreResult<()>;
    async fn delete_plan(&self, id: &str) -> StoreResult<()>;

    // patients, ordered by name; `assigned_plans` is left empty
    async fn get_patient(&self, id: &str) -> StoreResult<Option<Patient>>;
    async fn list_patients(&self) -> StoreResult<Vec<Patient>>;
    async fn create_patient_with_id(&self, id: &str, data: NewPatient) -> StoreResult<Patient>;
    async fn update_patient(&self, patient: &Patient) -> StoreResult<()>;
    /// Removes the patient and its assigned plans, never its services.
    async fn delete_patient(&self, id: &str) -> StoreResult<()>;

    async fn get_service(&self, id: &str) -> StoreResult<Option<Service>>;
    async fn query_services(&self, query: &ServiceQuery) -> StoreResult<Vec<Service>>;
    async fn create_service(&self, data: NewService) -> StoreResult<Service>;
    async fn update_service_date(&self, id: &str, date: NaiveDate) -> StoreResult<()>;
    async fn delete_service(&self, id: &str) -> StoreResult<()>;

    /// Atomically increments `counter` and returns `{prefix}{value}`.
    async fn next_sequential_id(&self, counter: &str, prefix: &str) -> StoreResult<String>;

    async fn list_assigned_plans(&self, patient_id: &str) -> StoreResult<Vec<AssignedPlan>>;
    async fn replace_assigned_plans(
        &self,
        patient_id: &str,
        plans: &[AssignedPlan],
    ) -> StoreResult<()>;
}

/// Steps turning the stored set of assignments into `desired`.
#[derive(Debug, PartialEq)]
pub struct AssignedPlanDiff<'a> {
    pub removed: Vec<String>,
    pub upserts: &'a [AssignedPlan],
}

pub fn diff_assigned_plans<'a, I>(current_keys: I, desired: &'a [AssignedPlan]) -> AssignedPlanDiff<'a>
where
    I: IntoIterator<Item = String>,
{
    let keep: BTreeSet<&str> = desired.iter().map(|ap| ap.plan_id.as_str()).collect();
    let removed: BTreeSet<String> = current_keys
        .into_iter()
        .filter(|key| !keep.contains(key.as_str()))
        .collect();

    AssignedPlanDiff {
        removed: removed.into_iter().collect(),
        upserts: desired,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_deletes_only_missing_keys() {
        let desired = vec![AssignedPlan::new("b"), AssignedPlan::new("c")];
        let diff = diff_assigned_plans(
            vec!["a".to_string(), "b".to_string(), "d".to_string()],
            &desired,
        );
        assert_eq!(diff.removed, vec!["a".to_string(), "d".to_string()]);
        assert_eq!(diff.upserts.len(), 2);
    }

    #[test]
    fn diff_against_empty_desired_removes_everything() {
        let diff = diff_assigned_plans(vec!["x".to_string()], &[]);
        assert_eq!(diff.removed, vec!["x".to_string()]);
        assert!(diff.upserts.is_empty());
    }

    #[test]
    fn service_query_range_is_inclusive() {
        let day = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        let service = Service {
            id: "s1".into(),
            patient_id: "p1".into(),
            company_id: "c1".into(),
            plan_id: None,
            date: day("2024-06-10"),
            start_time: "09:00".into(),
            end_time: "09:30".into(),
            description: "Prelievo".into(),
            duration_minutes: 30,
            user_id: "u1".into(),
        };
        let q = ServiceQuery {
            from: Some(day("2024-06-10")),
            to: Some(day("2024-06-10")),
            ..Default::default()
        };
        assert!(q.matches(&service));

        let q = ServiceQuery {
            patient_id: Some("p2".into()),
            ..Default::default()
        };
        assert!(!q.matches(&service));
    }
}
