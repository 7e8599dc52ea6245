// src/engine/reconciler.rs

//! Planned <-> logged transitions driven by the completion toggle.

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, warn};

use super::{merger, AppointmentBoard, Engine};
use crate::clock::{self, add_minutes_clamped, format_hhmm, hhmm_of, parse_hhmm};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    plan_description, plan_name_from_description, AppointmentView, CompositeId, NewService, Plan,
    ScheduledInstance, Service,
};
use crate::store::{RecordKind, ServiceQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Planned and incomplete, now complete: create a service.
    LogPlanned,
    /// Logged and complete, now incomplete: delete the service.
    RevertLogged,
    /// Flag out of sync with the backend; flipped without a mutation.
    LocalFlip,
    Unchanged,
}

pub fn transition_for(item: &AppointmentView, completed: bool) -> Transition {
    match (item.is_plan_based, item.is_completed, completed) {
        (_, current, target) if current == target => Transition::Unchanged,
        (true, false, true) => Transition::LogPlanned,
        (false, true, false) => Transition::RevertLogged,
        _ => Transition::LocalFlip,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToggleOutcome {
    pub transition: Transition,
    /// Id of the entry now representing the visit, if any.
    pub item_id: Option<String>,
}

/// Service recording a planned instance. The date stays the scheduled one
/// even when completed late.
pub fn service_for_planned(
    item: &AppointmentView,
    plan: &Plan,
    company_id: &str,
    user_id: &str,
    now: NaiveDateTime,
) -> NewService {
    let start_time = if clock::is_unspecified(Some(item.time.as_str())) {
        hhmm_of(now)
    } else {
        item.time.trim().to_string()
    };
    let duration = item
        .duration_minutes
        .filter(|d| *d > 0)
        .unwrap_or(plan.default_duration);
    let end_time = match parse_hhmm(&start_time) {
        Some(start) => format_hhmm(add_minutes_clamped(start, duration)),
        None => start_time.clone(),
    };

    NewService {
        patient_id: item.patient_id.clone(),
        company_id: company_id.to_string(),
        plan_id: Some(plan.id.clone()),
        date: item.date,
        duration_minutes: clock::duration_minutes(&start_time, &end_time),
        start_time,
        end_time,
        description: plan_description(&plan.name),
        user_id: user_id.to_string(),
    }
}

impl Engine {
    /// Apply a completion toggle to one board item.
    ///
    /// On a failed mutation the flag is reverted, the board is reloaded from
    /// the store and the error is returned.
    pub async fn toggle_completion(
        &self,
        board: &mut AppointmentBoard,
        id: &str,
        completed: bool,
        user_id: &str,
    ) -> EngineResult<ToggleOutcome> {
        let _guard = self.in_flight.acquire(id)?;

        let item = board
            .find(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(RecordKind::Appointment, id))?;
        let transition = transition_for(&item, completed);

        let result = match transition {
            Transition::Unchanged => {
                return Ok(ToggleOutcome {
                    transition,
                    item_id: Some(item.id),
                });
            }
            Transition::LocalFlip => {
                warn!(id, completed, "completion flag out of sync, corrected locally");
                board.set_completed(id, completed);
                return Ok(ToggleOutcome {
                    transition,
                    item_id: Some(item.id),
                });
            }
            Transition::LogPlanned => {
                if user_id.trim().is_empty() {
                    return Err(EngineError::validation("user_id is required"));
                }
                // the board may predate a toggle that already logged this visit
                if let Some(existing) = self.logged_cover(&item).await? {
                    warn!(id, service = %existing.id, "planned visit already logged");
                    let snapshot = self.snapshot().await?;
                    board.remove(id);
                    board.insert(merger::service_view(&existing, &snapshot));
                    return Ok(ToggleOutcome {
                        transition: Transition::Unchanged,
                        item_id: Some(existing.id),
                    });
                }
                board.set_completed(id, true);
                self.log_planned(board, &item, user_id).await
            }
            Transition::RevertLogged => {
                board.set_completed(id, false);
                self.revert_logged(board, &item).await
            }
        };

        match result {
            Ok(item_id) => {
                self.invalidate().await;
                Ok(ToggleOutcome {
                    transition,
                    item_id,
                })
            }
            Err(e) => {
                warn!(id, error = %e, "completion toggle failed");
                board.set_completed(id, item.is_completed);
                self.reload_board(board).await;
                Err(e)
            }
        }
    }

    /// Stored service already standing for a planned item, if any.
    async fn logged_cover(&self, item: &AppointmentView) -> EngineResult<Option<Service>> {
        let Some(plan_id) = item.plan_id.as_deref() else {
            return Ok(None);
        };
        let snapshot = self.snapshot().await?;
        let services = self
            .store
            .query_services(&ServiceQuery {
                patient_id: Some(item.patient_id.clone()),
                from: Some(item.date),
                to: Some(item.date),
                ..Default::default()
            })
            .await
            .map_err(|e| EngineError::persistence("load services", e))?;

        let instance = ScheduledInstance::new(item.date, Some(item.time.clone()));
        Ok(services.into_iter().find(|s| {
            merger::covers(s, &item.patient_id, plan_id, snapshot.plan(plan_id), &instance)
        }))
    }

    async fn log_planned(
        &self,
        board: &mut AppointmentBoard,
        item: &AppointmentView,
        user_id: &str,
    ) -> EngineResult<Option<String>> {
        let composite = CompositeId::parse(&item.id)
            .ok_or_else(|| EngineError::validation(format!("malformed planned id {}", item.id)))?;
        let snapshot = self.snapshot().await?;
        let plan = snapshot
            .plan(&composite.plan_id)
            .ok_or_else(|| EngineError::not_found(RecordKind::Plan, &composite.plan_id))?;
        let patient = snapshot
            .patient(&composite.patient_id)
            .ok_or_else(|| EngineError::not_found(RecordKind::Patient, &composite.patient_id))?;

        let new_service =
            service_for_planned(item, plan, &patient.company_id, user_id, self.clock.now());
        let service = self
            .store
            .create_service(new_service)
            .await
            .map_err(|e| EngineError::persistence("log planned visit", e))?;

        info!(
            planned = %item.id,
            service = %service.id,
            date = %service.date,
            "planned visit logged"
        );

        board.remove(&item.id);
        board.insert(merger::service_view(&service, &snapshot));
        Ok(Some(service.id))
    }

    async fn revert_logged(
        &self,
        board: &mut AppointmentBoard,
        item: &AppointmentView,
    ) -> EngineResult<Option<String>> {
        let snapshot = self.snapshot().await?;
        self.store
            .delete_service(&item.id)
            .await
            .map_err(|e| EngineError::persistence("delete logged visit", e))?;
        board.remove(&item.id);

        let plan = match &item.plan_id {
            Some(plan_id) => snapshot.plan(plan_id),
            None => plan_name_from_description(&item.description)
                .and_then(|name| snapshot.plan_by_name(name)),
        };
        let Some(plan) = plan else {
            info!(service = %item.id, "manual visit removed");
            return Ok(None);
        };

        let planned_id = CompositeId::new(&item.patient_id, &plan.id, item.date).to_string();
        if !board.contains(&planned_id) {
            let duration = snapshot
                .patient(&item.patient_id)
                .and_then(|p| p.assigned_plan(&plan.id))
                .and_then(|ap| ap.effective_duration(Some(plan)))
                .unwrap_or(plan.default_duration);

            board.insert(AppointmentView {
                id: planned_id.clone(),
                description: plan_description(&plan.name),
                plan_id: Some(plan.id.clone()),
                plan_name: Some(plan.name.clone()),
                is_plan_based: true,
                is_completed: false,
                duration_minutes: Some(duration),
                ..item.clone()
            });
        }

        info!(service = %item.id, planned = %planned_id, "logged visit reverted to planned");
        Ok(Some(planned_id))
    }
}
