use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{de::Deserializer, Deserialize, Serialize};
use sqlx::FromRow;

use crate::clock;
use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub const UNKNOWN_COMPANY: &str = "Azienda Sconosciuta";
pub const UNKNOWN_PATIENT: &str = "Paziente Sconosciuto";
pub const UNKNOWN_PLAN: &str = "Piano Sconosciuto";

const PLAN_DESCRIPTION_PREFIX: &str = "Piano: ";

/// Description written on a service logged from a plan.
pub fn plan_description(plan_name: &str) -> String {
    format!("{PLAN_DESCRIPTION_PREFIX}{plan_name}")
}

/// Inverse of [`plan_description`]; `None` for manually written descriptions.
pub fn plan_name_from_description(description: &str) -> Option<&str> {
    description
        .strip_prefix(PLAN_DESCRIPTION_PREFIX)
        .filter(|name| !name.is_empty())
}

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`) in PATCH bodies.
pub fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    // only called when the field is present
    let inner = Option::<T>::deserialize(deserializer)?;
    Ok(Some(inner))
}

/* -------------------------
   Catalogue records
--------------------------*/

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCompany {
    pub name: String,
    pub address: Option<String>,
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompanyPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub contact: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Minutes, always > 0.
    pub default_duration: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPlan {
    pub name: String,
    pub description: Option<String>,
    pub default_duration: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub description: Option<Option<String>>,
    pub default_duration: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Patient {
    /// Sequential, e.g. "p12".
    pub id: String,
    pub name: String,
    pub company_id: String,
    pub address: String,
    pub contact: String,
    /// Child collection in storage; filled in by the engine.
    #[sqlx(skip)]
    #[serde(default)]
    pub assigned_plans: Vec<AssignedPlan>,
}

impl Patient {
    pub fn assigned_plan(&self, plan_id: &str) -> Option<&AssignedPlan> {
        self.assigned_plans.iter().find(|ap| ap.plan_id == plan_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPatient {
    pub name: String,
    pub company_id: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub contact: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientPatch {
    pub name: Option<String>,
    pub company_id: Option<String>,
    pub address: Option<String>,
    pub contact: Option<String>,
}

/* -------------------------
   Planning
--------------------------*/

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedPlan {
    pub plan_id: String,
    pub custom_duration: Option<i32>,
    pub total_instances_required: Option<i32>,
    #[serde(default)]
    pub scheduled_instances: Vec<ScheduledInstance>,
}

impl AssignedPlan {
    #[cfg(test)]
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            custom_duration: None,
            total_instances_required: None,
            scheduled_instances: Vec::new(),
        }
    }

    /// `customDuration ?? plan.defaultDuration`.
    pub fn effective_duration(&self, plan: Option<&Plan>) -> Option<i32> {
        self.custom_duration
            .filter(|d| *d > 0)
            .or_else(|| plan.map(|p| p.default_duration))
    }

    pub fn sort_instances(&mut self) {
        self.scheduled_instances.sort_by(ScheduledInstance::ordering);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledInstance {
    pub date: NaiveDate,
    pub time: Option<String>,
}

impl ScheduledInstance {
    pub fn new(date: NaiveDate, time: Option<String>) -> Self {
        Self { date, time }
    }

    /// (date, time) with unset times after timed ones.
    pub fn ordering(a: &Self, b: &Self) -> std::cmp::Ordering {
        a.date.cmp(&b.date).then_with(|| {
            clock::compare_times(
                a.time.as_deref().unwrap_or(clock::NOT_SPECIFIED),
                b.time.as_deref().unwrap_or(clock::NOT_SPECIFIED),
            )
        })
    }
}

/// Recurrence used to fill an assignment: weekdays 0 (Sunday) to 6.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRule {
    pub start_date: NaiveDate,
    pub weekdays: Vec<u32>,
    #[serde(default)]
    pub time: Option<String>,
}

/* -------------------------
   Logged services
--------------------------*/

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Service {
    pub id: String,
    pub patient_id: String,
    /// Copied from the patient when the service was logged.
    pub company_id: String,
    /// Absent on legacy records; the description is the fallback link.
    pub plan_id: Option<String>,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub description: String,
    pub duration_minutes: i32,
    pub user_id: String,
}

impl Service {
    /// Whether this service was (probably) performed for the given plan.
    ///
    /// An explicit `plan_id` decides on its own. Records without one fall
    /// back to substring matching of the plan name in the description, which
    /// miscounts when one plan name contains another.
    pub fn references_plan(&self, plan_id: &str, plan_name: Option<&str>) -> bool {
        match &self.plan_id {
            Some(own) => own == plan_id,
            None => plan_name
                .filter(|name| !name.is_empty())
                .is_some_and(|name| {
                    self.description == plan_description(name) || self.description.contains(name)
                }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewService {
    pub patient_id: String,
    pub company_id: String,
    pub plan_id: Option<String>,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub description: String,
    pub duration_minutes: i32,
    pub user_id: String,
}

/// Manually logged visit.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEntry {
    pub patient_id: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub description: String,
    pub user_id: String,
    #[serde(default)]
    pub plan_id: Option<String>,
}

/* -------------------------
   Derived view
--------------------------*/

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppointmentView {
    /// Service id, or a [`CompositeId`] for a planned instance.
    pub id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub patient_contact: Option<String>,
    pub company_name: String,
    /// `HH:MM` or "N/D".
    pub time: String,
    pub date: NaiveDate,
    pub description: String,
    pub plan_id: Option<String>,
    pub plan_name: Option<String>,
    pub is_plan_based: bool,
    pub is_completed: bool,
    pub duration_minutes: Option<i32>,
}

/// Stable key `plan-{patientId}-{planId}-{YYYY-MM-DD}` of a planned instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeId {
    pub patient_id: String,
    pub plan_id: String,
    pub date: NaiveDate,
}

impl CompositeId {
    pub fn new(patient_id: &str, plan_id: &str, date: NaiveDate) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            plan_id: plan_id.to_string(),
            date,
        }
    }

    /// Patient ids never contain '-', plan ids may (uuids): split the patient
    /// at the first dash and the date off the end.
    pub fn parse(id: &str) -> Option<Self> {
        let rest = id.strip_prefix("plan-")?;
        if rest.len() < 12 || !rest.is_char_boundary(rest.len() - 10) {
            return None;
        }
        let (head, date_part) = rest.split_at(rest.len() - 10);
        let head = head.strip_suffix('-')?;
        let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
        let (patient_id, plan_id) = head.split_once('-')?;
        if patient_id.is_empty() || plan_id.is_empty() {
            return None;
        }
        Some(Self::new(patient_id, plan_id, date))
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "plan-{}-{}-{}",
            self.patient_id,
            self.plan_id,
            self.date.format("%Y-%m-%d")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn composite_id_survives_dashed_plan_ids() {
        let id = CompositeId::new("p7", "3f2a-77bc-0001", day("2024-06-10"));
        let text = id.to_string();
        assert_eq!(text, "plan-p7-3f2a-77bc-0001-2024-06-10");
        assert_eq!(CompositeId::parse(&text), Some(id));
    }

    #[test]
    fn composite_id_rejects_service_ids() {
        assert_eq!(CompositeId::parse("a1b2c3"), None);
        assert_eq!(CompositeId::parse("plan-p1-2024-06-10"), None);
        assert_eq!(CompositeId::parse("plan-p1-x-2024-13-40"), None);
    }

    #[test]
    fn plan_description_round_trips() {
        let desc = plan_description("Medicazione");
        assert_eq!(desc, "Piano: Medicazione");
        assert_eq!(plan_name_from_description(&desc), Some("Medicazione"));
        assert_eq!(plan_name_from_description("Visita extra"), None);
    }

    #[test]
    fn explicit_plan_link_beats_description() {
        let mut service = Service {
            id: "s1".into(),
            patient_id: "p1".into(),
            company_id: "c1".into(),
            plan_id: Some("plan-b".into()),
            date: day("2024-06-10"),
            start_time: "10:00".into(),
            end_time: "10:30".into(),
            description: plan_description("Medicazione"),
            duration_minutes: 30,
            user_id: "u1".into(),
        };
        assert!(!service.references_plan("plan-a", Some("Medicazione")));
        assert!(service.references_plan("plan-b", None));

        service.plan_id = None;
        assert!(service.references_plan("plan-a", Some("Medicazione")));
        assert!(!service.references_plan("plan-a", None));
        assert!(!service.references_plan("plan-a", Some("")));
    }

    #[test]
    fn effective_duration_falls_back_to_plan_default() {
        let plan = Plan {
            id: "x".into(),
            name: "Controllo".into(),
            description: None,
            default_duration: 45,
        };
        let mut ap = AssignedPlan::new("x");
        assert_eq!(ap.effective_duration(Some(&plan)), Some(45));
        ap.custom_duration = Some(20);
        assert_eq!(ap.effective_duration(Some(&plan)), Some(20));
        assert_eq!(AssignedPlan::new("y").effective_duration(None), None);
    }
}
