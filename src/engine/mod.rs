// src/engine/mod.rs

//! Scheduling engine.
//!
//! Owns the read-through snapshot of the catalogue (companies, plans,
//! patients with their assigned plans) and the per-item in-flight flags.
//! Every mutation it performs invalidates the snapshot. Mutations that
//! touch an [`AppointmentBoard`] follow the same two phases: apply the
//! tentative change to the board, persist, and on failure throw the board
//! away and reload it from the store.

pub mod catalog;
pub mod generator;
pub mod merger;
pub mod reconciler;
pub mod remaining;
pub mod rescheduler;
pub mod stats;

#[cfg(test)]
pub mod testing;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    AppointmentView, Company, CompositeId, Patient, Plan, UNKNOWN_COMPANY, UNKNOWN_PATIENT,
};
use crate::store::{RecordKind, ServiceQuery, Store};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub patient_id_prefix: String,
    pub patient_counter: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            patient_id_prefix: "p".to_string(),
            patient_counter: "patientCounter".to_string(),
        }
    }
}

/* ============================================================
   Snapshot
   ============================================================ */

/// Consistent copy of the catalogue handed to the merger and reconciler.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub companies: HashMap<String, Company>,
    pub plans: HashMap<String, Plan>,
    /// Ordered by name, assigned plans filled in.
    pub patients: Vec<Patient>,
    patient_index: HashMap<String, usize>,
}

impl Snapshot {
    pub fn new(companies: Vec<Company>, plans: Vec<Plan>, patients: Vec<Patient>) -> Self {
        let patient_index = patients
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        Self {
            companies: companies.into_iter().map(|c| (c.id.clone(), c)).collect(),
            plans: plans.into_iter().map(|p| (p.id.clone(), p)).collect(),
            patients,
            patient_index,
        }
    }

    pub fn patient(&self, id: &str) -> Option<&Patient> {
        self.patient_index.get(id).map(|&i| &self.patients[i])
    }

    pub fn plan(&self, id: &str) -> Option<&Plan> {
        self.plans.get(id)
    }

    /// Lowest id wins when several plans share a name.
    pub fn plan_by_name(&self, name: &str) -> Option<&Plan> {
        self.plans
            .values()
            .filter(|p| p.name == name)
            .min_by(|a, b| a.id.cmp(&b.id))
    }

    pub fn company_name(&self, id: &str) -> &str {
        self.companies
            .get(id)
            .map(|c| c.name.as_str())
            .unwrap_or(UNKNOWN_COMPANY)
    }

    pub fn patient_name(&self, id: &str) -> &str {
        self.patient(id)
            .map(|p| p.name.as_str())
            .unwrap_or(UNKNOWN_PATIENT)
    }
}

/* ============================================================
   Views
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DateFilter {
    Day { date: NaiveDate },
    Range { from: NaiveDate, to: NaiveDate },
    All,
}

impl DateFilter {
    pub fn contains(&self, date: NaiveDate) -> bool {
        match *self {
            DateFilter::Day { date: day } => date == day,
            DateFilter::Range { from, to } => from <= date && date <= to,
            DateFilter::All => true,
        }
    }

    fn bounds(&self) -> (Option<NaiveDate>, Option<NaiveDate>) {
        match *self {
            DateFilter::Day { date } => (Some(date), Some(date)),
            DateFilter::Range { from, to } => (Some(from), Some(to)),
            DateFilter::All => (None, None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Newest day first, times ascending within a day.
    Calendar,
    /// Oldest day first.
    Agenda,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewQuery {
    pub filter: DateFilter,
    pub patient_id: Option<String>,
    pub order: SortOrder,
}

impl ViewQuery {
    pub fn day(date: NaiveDate) -> Self {
        Self {
            filter: DateFilter::Day { date },
            patient_id: None,
            order: SortOrder::Calendar,
        }
    }

    pub fn range(from: NaiveDate, to: NaiveDate) -> EngineResult<Self> {
        if from > to {
            return Err(EngineError::validation("from must not be after to"));
        }
        Ok(Self {
            filter: DateFilter::Range { from, to },
            patient_id: None,
            order: SortOrder::Calendar,
        })
    }

    pub fn agenda(patient_id: &str, filter: DateFilter) -> Self {
        Self {
            filter,
            patient_id: Some(patient_id.to_string()),
            order: SortOrder::Agenda,
        }
    }
}

/// In-memory appointment view together with the query that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentBoard {
    pub query: ViewQuery,
    pub items: Vec<AppointmentView>,
}

impl AppointmentBoard {
    pub fn find(&self, id: &str) -> Option<&AppointmentView> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    pub fn remove(&mut self, id: &str) -> Option<AppointmentView> {
        let pos = self.items.iter().position(|i| i.id == id)?;
        Some(self.items.remove(pos))
    }

    pub fn set_completed(&mut self, id: &str, completed: bool) {
        if let Some(item) = self.items.iter_mut().find(|i| i.id == id) {
            item.is_completed = completed;
        }
    }

    pub fn insert(&mut self, item: AppointmentView) {
        self.items.push(item);
        merger::sort_view(&mut self.items, self.query.order);
    }
}

/// Informational outcome of a mutation; never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// Two instances of one plan landed on the same day; only one was kept.
    DuplicateDateDropped { plan_id: String, date: NaiveDate },
}

/* ============================================================
   In-flight flags
   ============================================================ */

#[derive(Debug, Default)]
struct InFlight {
    ids: Mutex<HashSet<String>>,
}

impl InFlight {
    fn acquire(&self, id: &str) -> EngineResult<InFlightGuard<'_>> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id.to_string()) {
            return Err(EngineError::Busy(id.to_string()));
        }
        Ok(InFlightGuard {
            owner: self,
            id: id.to_string(),
        })
    }
}

struct InFlightGuard<'a> {
    owner: &'a InFlight,
    id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/* ============================================================
   Engine
   ============================================================ */

pub struct Engine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    cache: RwLock<Option<Arc<Snapshot>>>,
    in_flight: InFlight,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, settings: EngineSettings) -> Self {
        Self {
            store,
            clock,
            settings,
            cache: RwLock::new(None),
            in_flight: InFlight::default(),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub async fn snapshot(&self) -> EngineResult<Arc<Snapshot>> {
        if let Some(snapshot) = self.cache.read().await.as_ref() {
            return Ok(Arc::clone(snapshot));
        }

        let mut slot = self.cache.write().await;
        if let Some(snapshot) = slot.as_ref() {
            return Ok(Arc::clone(snapshot));
        }
        let snapshot = Arc::new(self.load_snapshot().await?);
        *slot = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    async fn load_snapshot(&self) -> EngineResult<Snapshot> {
        let companies = self
            .store
            .list_companies()
            .await
            .map_err(|e| EngineError::persistence("load companies", e))?;
        let plans = self
            .store
            .list_plans()
            .await
            .map_err(|e| EngineError::persistence("load plans", e))?;
        let mut patients = self
            .store
            .list_patients()
            .await
            .map_err(|e| EngineError::persistence("load patients", e))?;

        for patient in &mut patients {
            patient.assigned_plans = self
                .store
                .list_assigned_plans(&patient.id)
                .await
                .map_err(|e| EngineError::persistence("load assigned plans", e))?;
        }

        debug!(
            companies = companies.len(),
            plans = plans.len(),
            patients = patients.len(),
            "snapshot loaded"
        );
        Ok(Snapshot::new(companies, plans, patients))
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    pub async fn load_board(&self, query: ViewQuery) -> EngineResult<AppointmentBoard> {
        let snapshot = self.snapshot().await?;
        let (from, to) = query.filter.bounds();
        let services = self
            .store
            .query_services(&ServiceQuery {
                patient_id: query.patient_id.clone(),
                from,
                to,
                ..Default::default()
            })
            .await
            .map_err(|e| EngineError::persistence("load services", e))?;

        let mut items = merger::build_appointment_view(
            &services,
            &snapshot,
            &query.filter,
            query.patient_id.as_deref(),
        );
        merger::sort_view(&mut items, query.order);

        debug!(
            services = services.len(),
            items = items.len(),
            "appointment board built"
        );
        Ok(AppointmentBoard { query, items })
    }

    /// Day board containing the given appointment id.
    pub async fn board_for_item(&self, id: &str) -> EngineResult<AppointmentBoard> {
        if let Some(composite) = CompositeId::parse(id) {
            return self.load_board(ViewQuery::day(composite.date)).await;
        }

        let service = self
            .store
            .get_service(id)
            .await
            .map_err(|e| EngineError::persistence("load service", e))?
            .ok_or_else(|| EngineError::not_found(RecordKind::Appointment, id))?;
        self.load_board(ViewQuery::day(service.date)).await
    }

    /// Discard a tentative board after a failed mutation.
    async fn reload_board(&self, board: &mut AppointmentBoard) {
        self.invalidate().await;
        match self.load_board(board.query.clone()).await {
            Ok(fresh) => {
                warn!(items = fresh.items.len(), "board reloaded after failed mutation");
                *board = fresh;
            }
            Err(e) => warn!(error = %e, "board reload failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{day, fixture};
    use super::*;

    #[test]
    fn date_filters_are_inclusive() {
        let range = DateFilter::Range {
            from: day("2024-06-03"),
            to: day("2024-06-05"),
        };
        assert!(range.contains(day("2024-06-03")));
        assert!(range.contains(day("2024-06-05")));
        assert!(!range.contains(day("2024-06-06")));
        assert!(DateFilter::All.contains(day("1999-01-01")));
    }

    #[test]
    fn reversed_range_is_rejected() {
        assert!(matches!(
            ViewQuery::range(day("2024-06-05"), day("2024-06-01")),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn second_acquire_on_same_id_is_busy() {
        let flags = InFlight::default();
        let guard = flags.acquire("a").unwrap();
        assert!(matches!(flags.acquire("a"), Err(EngineError::Busy(_))));
        assert!(flags.acquire("b").is_ok());
        drop(guard);
        assert!(flags.acquire("a").is_ok());
    }

    #[tokio::test]
    async fn snapshot_is_cached_until_invalidated() {
        let fx = fixture("2024-06-01").await;
        let first = fx.engine.snapshot().await.unwrap();
        let second = fx.engine.snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        fx.engine.invalidate().await;
        let third = fx.engine.snapshot().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn orphaned_company_reads_as_unknown() {
        let fx = fixture("2024-06-01").await;
        fx.engine.delete_company(&fx.company.id).await.unwrap();

        let snapshot = fx.engine.snapshot().await.unwrap();
        let patient = snapshot.patient(&fx.patient.id).unwrap();
        assert_eq!(patient.company_id, fx.company.id);
        assert_eq!(snapshot.company_name(&patient.company_id), UNKNOWN_COMPANY);
    }
}
