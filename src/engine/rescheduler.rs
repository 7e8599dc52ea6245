// src/engine/rescheduler.rs

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use super::{AppointmentBoard, Engine, Notice};
use crate::error::{EngineError, EngineResult};
use crate::models::{AppointmentView, AssignedPlan, CompositeId};
use crate::store::RecordKind;

/// Target must not be in the past nor the item's current day.
pub fn validate_target(current: NaiveDate, target: NaiveDate, today: NaiveDate) -> EngineResult<()> {
    if target < today {
        return Err(EngineError::validation(format!(
            "cannot reschedule to {target}, which is in the past"
        )));
    }
    if target == current {
        return Err(EngineError::validation(format!(
            "appointment is already on {target}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    /// Destination already had an instance of the plan; the source was removed.
    DroppedAsDuplicate,
}

pub fn move_instance(
    plans: &mut [AssignedPlan],
    plan_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> EngineResult<MoveOutcome> {
    let assignment = plans
        .iter_mut()
        .find(|ap| ap.plan_id == plan_id)
        .ok_or_else(|| EngineError::not_found(RecordKind::AssignedPlan, plan_id))?;
    let source = assignment
        .scheduled_instances
        .iter()
        .position(|i| i.date == from)
        .ok_or_else(|| {
            EngineError::not_found(RecordKind::Appointment, format!("{plan_id} on {from}"))
        })?;

    if assignment.scheduled_instances.iter().any(|i| i.date == to) {
        assignment.scheduled_instances.remove(source);
        return Ok(MoveOutcome::DroppedAsDuplicate);
    }

    assignment.scheduled_instances[source].date = to;
    assignment.sort_instances();
    Ok(MoveOutcome::Moved)
}

#[derive(Debug, Clone, Serialize)]
pub struct RescheduleOutcome {
    pub id: String,
    pub new_date: NaiveDate,
    pub notice: Option<Notice>,
}

impl Engine {
    /// Move one board item to `new_date`.
    ///
    /// The item leaves the board before the write; a failed write reloads the
    /// board from the store.
    pub async fn reschedule(
        &self,
        board: &mut AppointmentBoard,
        id: &str,
        new_date: NaiveDate,
    ) -> EngineResult<RescheduleOutcome> {
        let _guard = self.in_flight.acquire(id)?;

        let item = board
            .find(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(RecordKind::Appointment, id))?;
        validate_target(item.date, new_date, self.today())?;

        board.remove(id);
        let result = if item.is_plan_based {
            self.move_planned(&item, new_date).await
        } else {
            self.store
                .update_service_date(id, new_date)
                .await
                .map(|()| None)
                .map_err(|e| EngineError::persistence("reschedule logged visit", e))
        };

        match result {
            Ok(notice) => {
                self.invalidate().await;
                info!(id, from = %item.date, to = %new_date, "appointment rescheduled");
                Ok(RescheduleOutcome {
                    id: item.id,
                    new_date,
                    notice,
                })
            }
            Err(e) => {
                warn!(id, error = %e, "reschedule failed");
                self.reload_board(board).await;
                Err(e)
            }
        }
    }

    async fn move_planned(
        &self,
        item: &AppointmentView,
        new_date: NaiveDate,
    ) -> EngineResult<Option<Notice>> {
        let composite = CompositeId::parse(&item.id)
            .ok_or_else(|| EngineError::validation(format!("malformed planned id {}", item.id)))?;

        let mut plans = self
            .store
            .list_assigned_plans(&composite.patient_id)
            .await
            .map_err(|e| EngineError::persistence("load assigned plans", e))?;
        let outcome = move_instance(&mut plans, &composite.plan_id, composite.date, new_date)?;
        self.store
            .replace_assigned_plans(&composite.patient_id, &plans)
            .await
            .map_err(|e| EngineError::persistence("save assigned plans", e))?;

        Ok(match outcome {
            MoveOutcome::Moved => None,
            MoveOutcome::DroppedAsDuplicate => {
                warn!(
                    plan = %composite.plan_id,
                    date = %new_date,
                    "destination already scheduled, moved instance dropped"
                );
                Some(Notice::DuplicateDateDropped {
                    plan_id: composite.plan_id,
                    date: new_date,
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{day, fixture};
    use crate::engine::ViewQuery;
    use crate::models::{ScheduledInstance, ServiceEntry};
    use crate::store::Store;

    #[test]
    fn past_and_same_day_targets_are_rejected() {
        let today = day("2024-06-05");
        assert!(validate_target(day("2024-06-10"), day("2024-06-04"), today).is_err());
        assert!(validate_target(day("2024-06-10"), day("2024-06-10"), today).is_err());
        assert!(validate_target(day("2024-06-10"), day("2024-06-05"), today).is_ok());
    }

    #[test]
    fn duplicate_destination_keeps_one_instance() {
        let mut plans = vec![AssignedPlan {
            scheduled_instances: vec![
                ScheduledInstance::new(day("2024-06-10"), Some("09:00".into())),
                ScheduledInstance::new(day("2024-06-12"), Some("11:00".into())),
            ],
            ..AssignedPlan::new("x")
        }];
        let outcome = move_instance(&mut plans, "x", day("2024-06-10"), day("2024-06-12")).unwrap();
        assert_eq!(outcome, MoveOutcome::DroppedAsDuplicate);
        assert_eq!(
            plans[0].scheduled_instances,
            vec![ScheduledInstance::new(day("2024-06-12"), Some("11:00".into()))]
        );
    }

    #[test]
    fn moved_instance_is_resorted() {
        let mut plans = vec![AssignedPlan {
            scheduled_instances: vec![
                ScheduledInstance::new(day("2024-06-10"), None),
                ScheduledInstance::new(day("2024-06-12"), None),
            ],
            ..AssignedPlan::new("x")
        }];
        move_instance(&mut plans, "x", day("2024-06-10"), day("2024-06-20")).unwrap();
        let dates: Vec<NaiveDate> = plans[0].scheduled_instances.iter().map(|i| i.date).collect();
        assert_eq!(dates, vec![day("2024-06-12"), day("2024-06-20")]);

        assert!(matches!(
            move_instance(&mut plans, "y", day("2024-06-12"), day("2024-06-21")),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn planned_instance_moves_in_storage() {
        let fx = fixture("2024-06-01").await;
        fx.assign(&fx.plan.id, &[("2024-06-10", Some("10:00"))]).await;
        let id = format!("plan-{}-{}-2024-06-10", fx.patient.id, fx.plan.id);
        let mut board = fx.engine.board_for_item(&id).await.unwrap();

        let out = fx.engine.reschedule(&mut board, &id, day("2024-06-14")).await.unwrap();
        assert_eq!(out.notice, None);
        assert!(board.items.is_empty());

        let plans = fx.store.list_assigned_plans(&fx.patient.id).await.unwrap();
        assert_eq!(plans[0].scheduled_instances[0].date, day("2024-06-14"));
        assert_eq!(plans[0].scheduled_instances[0].time.as_deref(), Some("10:00"));
    }

    #[tokio::test]
    async fn same_day_reschedule_changes_nothing() {
        let fx = fixture("2024-06-01").await;
        fx.assign(&fx.plan.id, &[("2024-06-10", None)]).await;
        let id = format!("plan-{}-{}-2024-06-10", fx.patient.id, fx.plan.id);
        let mut board = fx.engine.board_for_item(&id).await.unwrap();

        let err = fx.engine.reschedule(&mut board, &id, day("2024-06-10")).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        let err = fx.engine.reschedule(&mut board, &id, day("2024-05-31")).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        assert!(board.contains(&id));
        let plans = fx.store.list_assigned_plans(&fx.patient.id).await.unwrap();
        assert_eq!(plans[0].scheduled_instances[0].date, day("2024-06-10"));
    }

    #[tokio::test]
    async fn duplicate_destination_reports_notice() {
        let fx = fixture("2024-06-01").await;
        fx.assign(&fx.plan.id, &[("2024-06-10", None), ("2024-06-12", None)]).await;
        let id = format!("plan-{}-{}-2024-06-10", fx.patient.id, fx.plan.id);
        let mut board = fx.engine.board_for_item(&id).await.unwrap();

        let out = fx.engine.reschedule(&mut board, &id, day("2024-06-12")).await.unwrap();
        assert_eq!(
            out.notice,
            Some(Notice::DuplicateDateDropped {
                plan_id: fx.plan.id.clone(),
                date: day("2024-06-12"),
            })
        );
        let plans = fx.store.list_assigned_plans(&fx.patient.id).await.unwrap();
        assert_eq!(plans[0].scheduled_instances.len(), 1);
        assert_eq!(plans[0].scheduled_instances[0].date, day("2024-06-12"));
    }

    #[tokio::test]
    async fn logged_visit_changes_date_only() {
        let fx = fixture("2024-06-01").await;
        let service = fx
            .engine
            .log_service(ServiceEntry {
                patient_id: fx.patient.id.clone(),
                date: day("2024-06-10"),
                start_time: "09:00".into(),
                end_time: "09:30".into(),
                description: "Visita".into(),
                user_id: "u1".into(),
                plan_id: None,
            })
            .await
            .unwrap();
        let mut board = fx.engine.load_board(ViewQuery::day(day("2024-06-10"))).await.unwrap();

        fx.engine.reschedule(&mut board, &service.id, day("2024-06-11")).await.unwrap();
        let moved = fx.store.get_service(&service.id).await.unwrap().unwrap();
        assert_eq!(moved.date, day("2024-06-11"));
        assert_eq!(moved.start_time, "09:00");
    }

    #[tokio::test]
    async fn failed_move_reloads_board() {
        let fx = fixture("2024-06-01").await;
        fx.assign(&fx.plan.id, &[("2024-06-10", None)]).await;
        let id = format!("plan-{}-{}-2024-06-10", fx.patient.id, fx.plan.id);
        let mut board = fx.engine.board_for_item(&id).await.unwrap();

        fx.store.set_fail_writes(true);
        let err = fx.engine.reschedule(&mut board, &id, day("2024-06-11")).await.unwrap_err();
        assert!(matches!(err, EngineError::Persistence { .. }));
        assert!(board.contains(&id));
    }
}
