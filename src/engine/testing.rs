// src/engine/testing.rs

//! Seeded engine over a `MemoryStore` for tests.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use super::{Engine, EngineSettings};
use crate::clock::FixedClock;
use crate::models::{
    AssignedPlan, Company, NewCompany, NewPatient, NewPlan, Patient, Plan, ScheduledInstance,
};
use crate::store::MemoryStore;

pub fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn at(date: NaiveDate, hour: u32, minute: u32) -> NaiveDateTime {
    date.and_hms_opt(hour, minute, 0).unwrap()
}

pub struct Fixture {
    pub engine: Arc<Engine>,
    pub store: Arc<MemoryStore>,
    pub company: Company,
    pub plan: Plan,
    pub patient: Patient,
}

/// One company, one 30 minute "Medicazione" plan and one patient, with the
/// clock fixed at 08:00 on `today`.
pub async fn fixture(today: &str) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(Engine::new(
        store.clone(),
        Arc::new(FixedClock(at(day(today), 8, 0))),
        EngineSettings::default(),
    ));

    let company = engine
        .create_company(NewCompany {
            name: "Cooperativa Sole".into(),
            address: None,
            contact: None,
        })
        .await
        .unwrap();
    let plan = engine
        .create_plan(NewPlan {
            name: "Medicazione".into(),
            description: None,
            default_duration: 30,
        })
        .await
        .unwrap();
    let patient = engine
        .create_patient(NewPatient {
            name: "Mario Rossi".into(),
            company_id: company.id.clone(),
            address: "Via Roma 1".into(),
            contact: "333 1234567".into(),
        })
        .await
        .unwrap();

    Fixture {
        engine,
        store,
        company,
        plan,
        patient,
    }
}

impl Fixture {
    /// Replace the patient's assignments with a single one for `plan_id`.
    pub async fn assign(&self, plan_id: &str, instances: &[(&str, Option<&str>)]) {
        let assignment = AssignedPlan {
            scheduled_instances: instances
                .iter()
                .map(|(d, t)| ScheduledInstance::new(day(d), t.map(str::to_string)))
                .collect(),
            ..AssignedPlan::new(plan_id)
        };
        self.engine
            .save_assigned_plans(&self.patient.id, vec![assignment])
            .await
            .unwrap();
    }
}
