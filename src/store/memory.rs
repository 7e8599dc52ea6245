// src/store/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    diff_assigned_plans, RecordKind, ServiceOrder, ServiceQuery, Store, StoreError, StoreResult,
};
use crate::models::{
    AssignedPlan, Company, NewCompany, NewPatient, NewPlan, NewService, Patient, Plan, Service,
};

#[derive(Default)]
struct Tables {
    companies: BTreeMap<String, Company>,
    plans: BTreeMap<String, Plan>,
    patients: BTreeMap<String, Patient>,
    // patient_id -> plan_id -> assignment
    assigned: BTreeMap<String, BTreeMap<String, AssignedPlan>>,
    services: BTreeMap<String, Service>,
    counters: HashMap<String, u64>,
}

/// Process-local store. Used when no database is configured, and by tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until switched back.
    #[cfg(test)]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("writes are currently rejected".into()))
        } else {
            Ok(())
        }
    }
}

fn sorted_by_name<T: Clone>(values: impl Iterator<Item = T>, name: impl Fn(&T) -> &str) -> Vec<T> {
    let mut out: Vec<T> = values.collect();
    out.sort_by(|a, b| name(a).cmp(name(b)));
    out
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_company(&self, id: &str) -> StoreResult<Option<Company>> {
        Ok(self.tables.read().await.companies.get(id).cloned())
    }

    async fn list_companies(&self) -> StoreResult<Vec<Company>> {
        let t = self.tables.read().await;
        Ok(sorted_by_name(t.companies.values().cloned(), |c| c.name.as_str()))
    }

    async fn create_company(&self, data: NewCompany) -> StoreResult<Company> {
        self.check_writable()?;
        let company = Company {
            id: Uuid::new_v4().to_string(),
            name: data.name,
            address: data.address,
            contact: data.contact,
        };
        self.tables
            .write()
            .await
            .companies
            .insert(company.id.clone(), company.clone());
        Ok(company)
    }

    async fn update_company(&self, company: &Company) -> StoreResult<()> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        let slot = t
            .companies
            .get_mut(&company.id)
            .ok_or_else(|| StoreError::not_found(RecordKind::Company, &company.id))?;
        *slot = company.clone();
        Ok(())
    }

    async fn delete_company(&self, id: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.tables
            .write()
            .await
            .companies
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(RecordKind::Company, id))
    }

    async fn get_plan(&self, id: &str) -> StoreResult<Option<Plan>> {
        Ok(self.tables.read().await.plans.get(id).cloned())
    }

    async fn list_plans(&self) -> StoreResult<Vec<Plan>> {
        let t = self.tables.read().await;
        Ok(sorted_by_name(t.plans.values().cloned(), |p| p.name.as_str()))
    }

    async fn create_plan(&self, data: NewPlan) -> StoreResult<Plan> {
        self.check_writable()?;
        let plan = Plan {
            id: Uuid::new_v4().to_string(),
            name: data.name,
            description: data.description,
            default_duration: data.default_duration,
        };
        self.tables
            .write()
            .await
            .plans
            .insert(plan.id.clone(), plan.clone());
        Ok(plan)
    }

    async fn update_plan(&self, plan: &Plan) -> StoreResult<()> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        let slot = t
            .plans
            .get_mut(&plan.id)
            .ok_or_else(|| StoreError::not_found(RecordKind::Plan, &plan.id))?;
        *slot = plan.clone();
        Ok(())
    }

    async fn delete_plan(&self, id: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.tables
            .write()
            .await
            .plans
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(RecordKind::Plan, id))
    }

    async fn get_patient(&self, id: &str) -> StoreResult<Option<Patient>> {
        Ok(self.tables.read().await.patients.get(id).cloned())
    }

    async fn list_patients(&self) -> StoreResult<Vec<Patient>> {
        let t = self.tables.read().await;
        Ok(sorted_by_name(t.patients.values().cloned(), |p| p.name.as_str()))
    }

    async fn create_patient_with_id(&self, id: &str, data: NewPatient) -> StoreResult<Patient> {
        self.check_writable()?;
        let patient = Patient {
            id: id.to_string(),
            name: data.name,
            company_id: data.company_id,
            address: data.address,
            contact: data.contact,
            assigned_plans: Vec::new(),
        };
        self.tables
            .write()
            .await
            .patients
            .insert(patient.id.clone(), patient.clone());
        Ok(patient)
    }

    async fn update_patient(&self, patient: &Patient) -> StoreResult<()> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        let slot = t
            .patients
            .get_mut(&patient.id)
            .ok_or_else(|| StoreError::not_found(RecordKind::Patient, &patient.id))?;
        *slot = Patient {
            assigned_plans: Vec::new(),
            ..patient.clone()
        };
        Ok(())
    }

    async fn delete_patient(&self, id: &str) -> StoreResult<()> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        t.assigned.remove(id);
        t.patients
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(RecordKind::Patient, id))
    }

    async fn get_service(&self, id: &str) -> StoreResult<Option<Service>> {
        Ok(self.tables.read().await.services.get(id).cloned())
    }

    async fn query_services(&self, query: &ServiceQuery) -> StoreResult<Vec<Service>> {
        let t = self.tables.read().await;
        let mut out: Vec<Service> = t
            .services
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.date, &a.start_time).cmp(&(b.date, &b.start_time)));
        if query.order == ServiceOrder::NewestFirst {
            out.reverse();
        }
        Ok(out)
    }

    async fn create_service(&self, data: NewService) -> StoreResult<Service> {
        self.check_writable()?;
        let service = Service {
            id: Uuid::new_v4().to_string(),
            patient_id: data.patient_id,
            company_id: data.company_id,
            plan_id: data.plan_id,
            date: data.date,
            start_time: data.start_time,
            end_time: data.end_time,
            description: data.description,
            duration_minutes: data.duration_minutes,
            user_id: data.user_id,
        };
        self.tables
            .write()
            .await
            .services
            .insert(service.id.clone(), service.clone());
        Ok(service)
    }

    async fn update_service_date(&self, id: &str, date: NaiveDate) -> StoreResult<()> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        let service = t
            .services
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(RecordKind::Service, id))?;
        service.date = date;
        Ok(())
    }

    async fn delete_service(&self, id: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.tables
            .write()
            .await
            .services
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(RecordKind::Service, id))
    }

    async fn next_sequential_id(&self, counter: &str, prefix: &str) -> StoreResult<String> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        let count = t.counters.entry(counter.to_string()).or_insert(0);
        *count += 1;
        Ok(format!("{prefix}{count}"))
    }

    async fn list_assigned_plans(&self, patient_id: &str) -> StoreResult<Vec<AssignedPlan>> {
        let t = self.tables.read().await;
        Ok(t
            .assigned
            .get(patient_id)
            .map(|plans| plans.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn replace_assigned_plans(
        &self,
        patient_id: &str,
        plans: &[AssignedPlan],
    ) -> StoreResult<()> {
        self.check_writable()?;
        let mut t = self.tables.write().await;
        if !t.patients.contains_key(patient_id) {
            return Err(StoreError::not_found(RecordKind::Patient, patient_id));
        }

        let current = t.assigned.entry(patient_id.to_string()).or_default();
        let diff = diff_assigned_plans(current.keys().cloned().collect::<Vec<_>>(), plans);
        for plan_id in &diff.removed {
            current.remove(plan_id);
        }
        for ap in diff.upserts {
            current.insert(ap.plan_id.clone(), ap.clone());
        }
        Ok(())
    }
}
