// src/engine/stats.rs

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use super::{Engine, Snapshot};
use crate::error::{EngineError, EngineResult};
use crate::models::Service;
use crate::store::ServiceQuery;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub id: String,
    pub name: String,
    pub total_minutes: i64,
    pub service_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub total_minutes: i64,
    pub service_count: usize,
    pub by_company: Vec<Bucket>,
    pub by_patient: Vec<Bucket>,
}

fn into_sorted(buckets: HashMap<String, Bucket>) -> Vec<Bucket> {
    let mut out: Vec<Bucket> = buckets.into_values().collect();
    out.sort_by(|a, b| {
        b.total_minutes
            .cmp(&a.total_minutes)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

fn add(buckets: &mut HashMap<String, Bucket>, id: &str, name: &str, minutes: i64) {
    let bucket = buckets.entry(id.to_string()).or_insert_with(|| Bucket {
        id: id.to_string(),
        name: name.to_string(),
        total_minutes: 0,
        service_count: 0,
    });
    bucket.total_minutes += minutes;
    bucket.service_count += 1;
}

/// Companies are attributed through the company stored on each service.
pub fn compute(services: &[Service], snapshot: &Snapshot) -> Statistics {
    let mut by_company = HashMap::new();
    let mut by_patient = HashMap::new();
    let mut total_minutes = 0i64;

    for s in services {
        let minutes = i64::from(s.duration_minutes.max(0));
        total_minutes += minutes;
        add(
            &mut by_company,
            &s.company_id,
            snapshot.company_name(&s.company_id),
            minutes,
        );
        add(
            &mut by_patient,
            &s.patient_id,
            snapshot.patient_name(&s.patient_id),
            minutes,
        );
    }

    Statistics {
        from: None,
        to: None,
        total_minutes,
        service_count: services.len(),
        by_company: into_sorted(by_company),
        by_patient: into_sorted(by_patient),
    }
}

impl Engine {
    pub async fn statistics(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> EngineResult<Statistics> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(EngineError::validation("from must not be after to"));
            }
        }

        let snapshot = self.snapshot().await?;
        let services = self
            .store
            .query_services(&ServiceQuery {
                from,
                to,
                ..Default::default()
            })
            .await
            .map_err(|e| EngineError::persistence("load services", e))?;

        Ok(Statistics {
            from,
            to,
            ..compute(&services, &snapshot)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{day, fixture};
    use crate::models::{NewCompany, PatientPatch, ServiceEntry, UNKNOWN_COMPANY};

    fn entry(patient_id: &str, date: &str, start: &str, end: &str) -> ServiceEntry {
        ServiceEntry {
            patient_id: patient_id.into(),
            date: day(date),
            start_time: start.into(),
            end_time: end.into(),
            description: "Visita".into(),
            user_id: "u1".into(),
            plan_id: None,
        }
    }

    #[tokio::test]
    async fn totals_follow_historical_company() {
        let fx = fixture("2024-06-01").await;
        fx.engine
            .log_service(entry(&fx.patient.id, "2024-06-03", "09:00", "10:00"))
            .await
            .unwrap();

        let other = fx
            .engine
            .create_company(NewCompany {
                name: "Altra Coop".into(),
                address: None,
                contact: None,
            })
            .await
            .unwrap();
        fx.engine
            .update_patient(
                &fx.patient.id,
                PatientPatch {
                    company_id: Some(other.id.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        fx.engine
            .log_service(entry(&fx.patient.id, "2024-06-04", "09:00", "09:30"))
            .await
            .unwrap();

        let stats = fx.engine.statistics(None, None).await.unwrap();
        assert_eq!(stats.total_minutes, 90);
        assert_eq!(stats.service_count, 2);
        assert_eq!(stats.by_company.len(), 2);
        assert_eq!(stats.by_company[0].name, "Cooperativa Sole");
        assert_eq!(stats.by_company[0].total_minutes, 60);
        assert_eq!(stats.by_company[1].id, other.id);
        assert_eq!(stats.by_patient.len(), 1);
        assert_eq!(stats.by_patient[0].service_count, 2);
    }

    #[tokio::test]
    async fn range_filters_and_unknown_labels() {
        let fx = fixture("2024-06-01").await;
        fx.engine
            .log_service(entry(&fx.patient.id, "2024-06-03", "09:00", "10:00"))
            .await
            .unwrap();
        fx.engine
            .log_service(entry(&fx.patient.id, "2024-07-03", "09:00", "10:00"))
            .await
            .unwrap();
        fx.engine.delete_company(&fx.company.id).await.unwrap();

        let stats = fx
            .engine
            .statistics(Some(day("2024-06-01")), Some(day("2024-06-30")))
            .await
            .unwrap();
        assert_eq!(stats.service_count, 1);
        assert_eq!(stats.by_company[0].name, UNKNOWN_COMPANY);

        assert!(fx
            .engine
            .statistics(Some(day("2024-06-30")), Some(day("2024-06-01")))
            .await
            .is_err());
    }
}
