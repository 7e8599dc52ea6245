// src/engine/catalog.rs

//! Catalogue maintenance: companies, plans, patients, their assigned plans
//! and manually logged services.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{info, warn};

use super::{generator, Engine, Notice};
use crate::clock;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    AssignedPlan, Company, CompanyPatch, GenerationRule, NewCompany, NewPatient, NewPlan,
    NewService, Patient, PatientPatch, Plan, PlanPatch, Service, ServiceEntry,
};
use crate::store::{RecordKind, ServiceOrder, ServiceQuery};

fn required(value: &str, field: &str) -> EngineResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Absent keeps the old value, `null` or blank clears it.
fn merge_optional(patch: Option<Option<String>>, existing: Option<String>) -> Option<String> {
    match patch {
        None => existing,
        Some(value) => optional(value),
    }
}

fn positive(value: i32, field: &str) -> EngineResult<i32> {
    if value <= 0 {
        return Err(EngineError::validation(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(value)
}

fn hhmm(value: &str, field: &str) -> EngineResult<String> {
    let value = value.trim();
    if !clock::is_valid_hhmm(value) {
        return Err(EngineError::validation(format!(
            "{field} must be HH:MM, got {value:?}"
        )));
    }
    Ok(value.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedPlans {
    pub assigned_plans: Vec<AssignedPlan>,
    pub notices: Vec<Notice>,
}

/// Validate a full set of assignments against the plan catalogue, then
/// normalise it: a custom duration equal to the plan default is dropped,
/// instances are sorted and repeated dates keep their first occurrence.
pub fn normalize_assigned_plans(
    plans: Vec<AssignedPlan>,
    catalogue: &HashMap<String, Plan>,
) -> EngineResult<SavedPlans> {
    let mut seen: HashSet<&str> = HashSet::new();
    for ap in &plans {
        let plan = catalogue
            .get(&ap.plan_id)
            .ok_or_else(|| EngineError::not_found(RecordKind::Plan, &ap.plan_id))?;
        if !seen.insert(ap.plan_id.as_str()) {
            return Err(EngineError::validation(format!(
                "plan {} is assigned more than once",
                ap.plan_id
            )));
        }
        if let Some(custom) = ap.custom_duration {
            positive(custom, "custom_duration")?;
        }
        if let Some(total) = ap.total_instances_required {
            positive(total, "total_instances_required")?;
            if total > generator::MAX_TOTAL_INSTANCES {
                return Err(EngineError::validation(format!(
                    "total_instances_required must not exceed {}",
                    generator::MAX_TOTAL_INSTANCES
                )));
            }
        }
        if ap.effective_duration(Some(plan)).is_none_or(|d| d <= 0) {
            return Err(EngineError::validation(format!(
                "plan {} has no positive duration",
                ap.plan_id
            )));
        }
        for instance in &ap.scheduled_instances {
            if let Some(time) = instance.time.as_deref() {
                if !clock::is_unspecified(Some(time)) {
                    hhmm(time, "time")?;
                }
            }
        }
    }

    let mut notices = Vec::new();
    let mut out = Vec::with_capacity(plans.len());
    for mut ap in plans {
        if ap.custom_duration == catalogue.get(&ap.plan_id).map(|p| p.default_duration) {
            ap.custom_duration = None;
        }

        let mut dates = HashSet::new();
        let mut kept = Vec::with_capacity(ap.scheduled_instances.len());
        for mut instance in ap.scheduled_instances.drain(..) {
            if !dates.insert(instance.date) {
                notices.push(Notice::DuplicateDateDropped {
                    plan_id: ap.plan_id.clone(),
                    date: instance.date,
                });
                continue;
            }
            instance.time = instance
                .time
                .filter(|t| !clock::is_unspecified(Some(t.as_str())))
                .map(|t| t.trim().to_string());
            kept.push(instance);
        }
        ap.scheduled_instances = kept;
        ap.sort_instances();
        out.push(ap);
    }

    Ok(SavedPlans {
        assigned_plans: out,
        notices,
    })
}

impl Engine {
    /* ============================================================
       Companies
       ============================================================ */

    pub async fn list_companies(&self) -> EngineResult<Vec<Company>> {
        self.store
            .list_companies()
            .await
            .map_err(|e| EngineError::persistence("list companies", e))
    }

    pub async fn get_company(&self, id: &str) -> EngineResult<Company> {
        self.store
            .get_company(id)
            .await
            .map_err(|e| EngineError::persistence("load company", e))?
            .ok_or_else(|| EngineError::not_found(RecordKind::Company, id))
    }

    pub async fn create_company(&self, data: NewCompany) -> EngineResult<Company> {
        let data = NewCompany {
            name: required(&data.name, "name")?,
            address: optional(data.address),
            contact: optional(data.contact),
        };
        let company = self
            .store
            .create_company(data)
            .await
            .map_err(|e| EngineError::persistence("create company", e))?;

        self.invalidate().await;
        info!(company = %company.id, "company created");
        Ok(company)
    }

    pub async fn update_company(&self, id: &str, patch: CompanyPatch) -> EngineResult<Company> {
        let existing = self.get_company(id).await?;
        let name = match patch.name {
            Some(name) => required(&name, "name")?,
            None => existing.name,
        };
        let company = Company {
            id: existing.id,
            name,
            address: merge_optional(patch.address, existing.address),
            contact: merge_optional(patch.contact, existing.contact),
        };
        self.store
            .update_company(&company)
            .await
            .map_err(|e| EngineError::persistence("update company", e))?;

        self.invalidate().await;
        info!(company = %company.id, "company updated");
        Ok(company)
    }

    /// Patients keep pointing at the deleted id.
    pub async fn delete_company(&self, id: &str) -> EngineResult<()> {
        self.store
            .delete_company(id)
            .await
            .map_err(|e| EngineError::persistence("delete company", e))?;
        self.invalidate().await;
        info!(company = id, "company deleted");
        Ok(())
    }

    /* ============================================================
       Plans
       ============================================================ */

    pub async fn list_plans(&self) -> EngineResult<Vec<Plan>> {
        self.store
            .list_plans()
            .await
            .map_err(|e| EngineError::persistence("list plans", e))
    }

    pub async fn get_plan(&self, id: &str) -> EngineResult<Plan> {
        self.store
            .get_plan(id)
            .await
            .map_err(|e| EngineError::persistence("load plan", e))?
            .ok_or_else(|| EngineError::not_found(RecordKind::Plan, id))
    }

    pub async fn create_plan(&self, data: NewPlan) -> EngineResult<Plan> {
        let data = NewPlan {
            name: required(&data.name, "name")?,
            description: optional(data.description),
            default_duration: positive(data.default_duration, "default_duration")?,
        };
        let plan = self
            .store
            .create_plan(data)
            .await
            .map_err(|e| EngineError::persistence("create plan", e))?;

        self.invalidate().await;
        info!(plan = %plan.id, name = %plan.name, "plan created");
        Ok(plan)
    }

    pub async fn update_plan(&self, id: &str, patch: PlanPatch) -> EngineResult<Plan> {
        let existing = self.get_plan(id).await?;
        let name = match patch.name {
            Some(name) => required(&name, "name")?,
            None => existing.name,
        };
        let default_duration = match patch.default_duration {
            Some(minutes) => positive(minutes, "default_duration")?,
            None => existing.default_duration,
        };
        let plan = Plan {
            id: existing.id,
            name,
            description: merge_optional(patch.description, existing.description),
            default_duration,
        };
        self.store
            .update_plan(&plan)
            .await
            .map_err(|e| EngineError::persistence("update plan", e))?;

        self.invalidate().await;
        info!(plan = %plan.id, "plan updated");
        Ok(plan)
    }

    pub async fn delete_plan(&self, id: &str) -> EngineResult<()> {
        self.store
            .delete_plan(id)
            .await
            .map_err(|e| EngineError::persistence("delete plan", e))?;
        self.invalidate().await;
        info!(plan = id, "plan deleted");
        Ok(())
    }

    /* ============================================================
       Patients
       ============================================================ */

    /// Case-insensitive substring search on name or id; everyone when blank.
    pub async fn list_patients(&self, query: Option<&str>) -> EngineResult<Vec<Patient>> {
        let snapshot = self.snapshot().await?;
        let needle = query
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());

        Ok(snapshot
            .patients
            .iter()
            .filter(|p| {
                needle.as_deref().is_none_or(|n| {
                    p.name.to_lowercase().contains(n) || p.id.to_lowercase().contains(n)
                })
            })
            .cloned()
            .collect())
    }

    pub async fn get_patient(&self, id: &str) -> EngineResult<Patient> {
        self.snapshot()
            .await?
            .patient(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(RecordKind::Patient, id))
    }

    pub async fn create_patient(&self, data: NewPatient) -> EngineResult<Patient> {
        let name = required(&data.name, "name")?;
        let company_id = required(&data.company_id, "company_id")?;
        self.get_company(&company_id).await?;

        let id = self
            .store
            .next_sequential_id(
                &self.settings.patient_counter,
                &self.settings.patient_id_prefix,
            )
            .await
            .map_err(|e| EngineError::persistence("allocate patient id", e))?;
        let patient = self
            .store
            .create_patient_with_id(
                &id,
                NewPatient {
                    name,
                    company_id,
                    address: data.address.trim().to_string(),
                    contact: data.contact.trim().to_string(),
                },
            )
            .await
            .map_err(|e| EngineError::persistence("create patient", e))?;

        self.invalidate().await;
        info!(patient = %patient.id, "patient created");
        Ok(patient)
    }

    pub async fn update_patient(&self, id: &str, patch: PatientPatch) -> EngineResult<Patient> {
        let existing = self
            .store
            .get_patient(id)
            .await
            .map_err(|e| EngineError::persistence("load patient", e))?
            .ok_or_else(|| EngineError::not_found(RecordKind::Patient, id))?;

        let name = match patch.name {
            Some(name) => required(&name, "name")?,
            None => existing.name,
        };
        let company_id = match patch.company_id {
            Some(company_id) => {
                let company_id = required(&company_id, "company_id")?;
                if company_id != existing.company_id {
                    self.get_company(&company_id).await?;
                }
                company_id
            }
            None => existing.company_id,
        };

        let mut patient = Patient {
            id: existing.id,
            name,
            company_id,
            address: patch
                .address
                .map(|a| a.trim().to_string())
                .unwrap_or(existing.address),
            contact: patch
                .contact
                .map(|c| c.trim().to_string())
                .unwrap_or(existing.contact),
            assigned_plans: Vec::new(),
        };
        self.store
            .update_patient(&patient)
            .await
            .map_err(|e| EngineError::persistence("update patient", e))?;
        self.invalidate().await;

        patient.assigned_plans = self
            .store
            .list_assigned_plans(&patient.id)
            .await
            .map_err(|e| EngineError::persistence("load assigned plans", e))?;
        info!(patient = %patient.id, "patient updated");
        Ok(patient)
    }

    /// Drops the patient and its assignments; logged services stay.
    pub async fn delete_patient(&self, id: &str) -> EngineResult<()> {
        self.store
            .delete_patient(id)
            .await
            .map_err(|e| EngineError::persistence("delete patient", e))?;
        self.invalidate().await;
        info!(patient = id, "patient deleted");
        Ok(())
    }

    /* ============================================================
       Assigned plans
       ============================================================ */

    pub async fn assigned_plans(&self, patient_id: &str) -> EngineResult<Vec<AssignedPlan>> {
        Ok(self.get_patient(patient_id).await?.assigned_plans)
    }

    /// Replace the patient's whole set of assignments.
    pub async fn save_assigned_plans(
        &self,
        patient_id: &str,
        plans: Vec<AssignedPlan>,
    ) -> EngineResult<SavedPlans> {
        let snapshot = self.snapshot().await?;
        if snapshot.patient(patient_id).is_none() {
            return Err(EngineError::not_found(RecordKind::Patient, patient_id));
        }
        let saved = normalize_assigned_plans(plans, &snapshot.plans)?;

        let result = self
            .store
            .replace_assigned_plans(patient_id, &saved.assigned_plans)
            .await
            .map_err(|e| EngineError::persistence("save assigned plans", e));
        self.invalidate().await;
        result?;

        for notice in &saved.notices {
            warn!(patient = patient_id, ?notice, "duplicate scheduled date collapsed");
        }
        info!(
            patient = patient_id,
            plans = saved.assigned_plans.len(),
            "assigned plans saved"
        );
        Ok(saved)
    }

    /// Fill one assignment from a weekday rule, replacing its instances.
    pub async fn generate_for_assignment(
        &self,
        patient_id: &str,
        plan_id: &str,
        rule: GenerationRule,
    ) -> EngineResult<AssignedPlan> {
        let snapshot = self.snapshot().await?;
        let patient = snapshot
            .patient(patient_id)
            .ok_or_else(|| EngineError::not_found(RecordKind::Patient, patient_id))?;

        let mut plans = patient.assigned_plans.clone();
        let assignment = plans
            .iter_mut()
            .find(|ap| ap.plan_id == plan_id)
            .ok_or_else(|| EngineError::not_found(RecordKind::AssignedPlan, plan_id))?;
        let total = assignment
            .total_instances_required
            .filter(|t| *t > 0)
            .ok_or_else(|| {
                EngineError::validation("total_instances_required must be set to generate")
            })?;

        let time = rule
            .time
            .as_deref()
            .filter(|t| !clock::is_unspecified(Some(*t)))
            .map(|t| hhmm(t, "time"))
            .transpose()?;
        let instances =
            generator::try_generate(rule.start_date, total, &rule.weekdays, time.as_deref())?;

        assignment.scheduled_instances = instances;
        let generated = assignment.clone();

        let result = self
            .store
            .replace_assigned_plans(patient_id, &plans)
            .await
            .map_err(|e| EngineError::persistence("save generated instances", e));
        self.invalidate().await;
        result?;

        info!(
            patient = patient_id,
            plan = plan_id,
            count = generated.scheduled_instances.len(),
            "instances generated"
        );
        Ok(generated)
    }

    /* ============================================================
       Services
       ============================================================ */

    pub async fn log_service(&self, entry: ServiceEntry) -> EngineResult<Service> {
        let start_time = hhmm(&entry.start_time, "start_time")?;
        let end_time = hhmm(&entry.end_time, "end_time")?;
        let description = required(&entry.description, "description")?;
        let user_id = required(&entry.user_id, "user_id")?;

        let patient = self
            .store
            .get_patient(&entry.patient_id)
            .await
            .map_err(|e| EngineError::persistence("load patient", e))?
            .ok_or_else(|| EngineError::not_found(RecordKind::Patient, &entry.patient_id))?;
        if patient.company_id.trim().is_empty() {
            return Err(EngineError::validation(format!(
                "patient {} has no company",
                patient.id
            )));
        }

        let plan_id = match optional(entry.plan_id) {
            Some(plan_id) => Some(self.get_plan(&plan_id).await?.id),
            None => None,
        };

        let service = self
            .store
            .create_service(NewService {
                patient_id: patient.id,
                company_id: patient.company_id,
                plan_id,
                date: entry.date,
                duration_minutes: clock::duration_minutes(&start_time, &end_time),
                start_time,
                end_time,
                description,
                user_id,
            })
            .await
            .map_err(|e| EngineError::persistence("log service", e))?;

        self.invalidate().await;
        info!(service = %service.id, patient = %service.patient_id, "service logged");
        Ok(service)
    }

    pub async fn delete_service(&self, id: &str) -> EngineResult<()> {
        self.store
            .delete_service(id)
            .await
            .map_err(|e| EngineError::persistence("delete service", e))?;
        self.invalidate().await;
        info!(service = id, "service deleted");
        Ok(())
    }

    /// Newest first.
    pub async fn list_patient_services(&self, patient_id: &str) -> EngineResult<Vec<Service>> {
        self.get_patient(patient_id).await?;
        self.store
            .query_services(&ServiceQuery {
                patient_id: Some(patient_id.to_string()),
                order: ServiceOrder::NewestFirst,
                ..Default::default()
            })
            .await
            .map_err(|e| EngineError::persistence("list services", e))
    }
}
