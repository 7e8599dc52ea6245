// src/engine/remaining.rs

use serde::Serialize;

use super::Engine;
use crate::error::{EngineError, EngineResult};
use crate::models::{AssignedPlan, Plan, Service, UNKNOWN_PLAN};
use crate::store::{RecordKind, ServiceQuery};

/// Visits still owed on an assignment, or `None` when it tracks no total.
///
/// `services` are the patient's services. Records without an explicit plan
/// link are matched by plan name in the description, so a plan whose name
/// contains another plan's name can be miscounted.
pub fn remaining(assignment: &AssignedPlan, plan: Option<&Plan>, services: &[Service]) -> Option<i32> {
    let total = assignment.total_instances_required.filter(|t| *t > 0)?;
    let plan_name = plan.map(|p| p.name.as_str());
    let done = services
        .iter()
        .filter(|s| s.references_plan(&assignment.plan_id, plan_name))
        .count();
    let done = i32::try_from(done).unwrap_or(i32::MAX);
    Some((total - done).max(0))
}

#[derive(Debug, Clone, Serialize)]
pub struct RemainingCount {
    pub plan_id: String,
    pub plan_name: String,
    pub total_instances_required: Option<i32>,
    pub remaining: Option<i32>,
}

impl Engine {
    pub async fn remaining_for_patient(&self, patient_id: &str) -> EngineResult<Vec<RemainingCount>> {
        let snapshot = self.snapshot().await?;
        let patient = snapshot
            .patient(patient_id)
            .ok_or_else(|| EngineError::not_found(RecordKind::Patient, patient_id))?;

        let services = self
            .store
            .query_services(&ServiceQuery {
                patient_id: Some(patient_id.to_string()),
                ..Default::default()
            })
            .await
            .map_err(|e| EngineError::persistence("load services", e))?;

        Ok(patient
            .assigned_plans
            .iter()
            .map(|ap| {
                let plan = snapshot.plan(&ap.plan_id);
                RemainingCount {
                    plan_id: ap.plan_id.clone(),
                    plan_name: plan.map(|p| p.name.clone()).unwrap_or_else(|| UNKNOWN_PLAN.to_string()),
                    total_instances_required: ap.total_instances_required,
                    remaining: remaining(ap, plan, &services),
                }
            })
            .collect())
    }
}
