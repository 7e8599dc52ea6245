// src/engine/merger.rs

//! Builds the unified appointment view out of logged services and the
//! scheduled instances of every assigned plan.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::{DateFilter, Snapshot, SortOrder};
use crate::clock::{self, compare_times};
use crate::models::{
    plan_description, plan_name_from_description, AppointmentView, AssignedPlan, CompositeId,
    Patient, Plan, ScheduledInstance, Service, UNKNOWN_PLAN,
};

/// Pure function of its inputs. `patient_scope` restricts both services and
/// planned instances to one patient.
pub fn build_appointment_view(
    services: &[Service],
    snapshot: &Snapshot,
    filter: &DateFilter,
    patient_scope: Option<&str>,
) -> Vec<AppointmentView> {
    let in_scope = |patient_id: &str| patient_scope.is_none_or(|id| id == patient_id);

    let services: Vec<&Service> = services
        .iter()
        .filter(|s| filter.contains(s.date) && in_scope(s.patient_id.as_str()))
        .collect();

    let mut view: Vec<AppointmentView> = services
        .iter()
        .map(|s| service_view(s, snapshot))
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    for patient in snapshot.patients.iter().filter(|p| in_scope(p.id.as_str())) {
        for assignment in &patient.assigned_plans {
            let plan = snapshot.plan(&assignment.plan_id);
            for instance in assignment
                .scheduled_instances
                .iter()
                .filter(|i| filter.contains(i.date))
            {
                let id = CompositeId::new(&patient.id, &assignment.plan_id, instance.date)
                    .to_string();
                if !seen.insert(id.clone()) {
                    continue;
                }
                let covered = services
                    .iter()
                    .any(|s| covers(s, &patient.id, &assignment.plan_id, plan, instance));
                if covered {
                    continue;
                }
                view.push(planned_view(id, patient, assignment, plan, instance, snapshot));
            }
        }
    }

    view
}

/// Whether a logged service already stands for this planned instance.
pub fn covers(
    service: &Service,
    patient_id: &str,
    plan_id: &str,
    plan: Option<&Plan>,
    instance: &ScheduledInstance,
) -> bool {
    service.patient_id == patient_id
        && service.date == instance.date
        && service.references_plan(plan_id, plan.map(|p| p.name.as_str()))
        && times_compatible(Some(service.start_time.as_str()), instance.time.as_deref())
}

fn times_compatible(a: Option<&str>, b: Option<&str>) -> bool {
    clock::is_unspecified(a) || clock::is_unspecified(b) || a.map(str::trim) == b.map(str::trim)
}

pub(crate) fn service_view(service: &Service, snapshot: &Snapshot) -> AppointmentView {
    let patient = snapshot.patient(&service.patient_id);
    let plan_name = match &service.plan_id {
        Some(plan_id) => snapshot.plan(plan_id).map(|p| p.name.clone()),
        None => plan_name_from_description(&service.description).map(str::to_string),
    };

    AppointmentView {
        id: service.id.clone(),
        patient_id: service.patient_id.clone(),
        patient_name: snapshot.patient_name(&service.patient_id).to_string(),
        patient_contact: patient.map(|p| p.contact.clone()),
        // historical attribution, not the patient's current company
        company_name: snapshot.company_name(&service.company_id).to_string(),
        time: clock::display_time(Some(service.start_time.as_str())),
        date: service.date,
        description: service.description.clone(),
        plan_id: service.plan_id.clone(),
        plan_name,
        is_plan_based: false,
        is_completed: true,
        duration_minutes: Some(service.duration_minutes),
    }
}

fn planned_view(
    id: String,
    patient: &Patient,
    assignment: &AssignedPlan,
    plan: Option<&Plan>,
    instance: &ScheduledInstance,
    snapshot: &Snapshot,
) -> AppointmentView {
    let plan_name = plan.map(|p| p.name.as_str()).unwrap_or(UNKNOWN_PLAN);
    AppointmentView {
        id,
        patient_id: patient.id.clone(),
        patient_name: patient.name.clone(),
        patient_contact: Some(patient.contact.clone()),
        company_name: snapshot.company_name(&patient.company_id).to_string(),
        time: clock::display_time(instance.time.as_deref()),
        date: instance.date,
        description: plan_description(plan_name),
        plan_id: Some(assignment.plan_id.clone()),
        plan_name: Some(plan_name.to_string()),
        is_plan_based: true,
        is_completed: false,
        duration_minutes: assignment.effective_duration(plan),
    }
}

/// Day order per `order`, then time with "N/D" last, then patient name.
pub fn sort_view(items: &mut [AppointmentView], order: SortOrder) {
    items.sort_by(|a, b| {
        let by_date = match order {
            SortOrder::Calendar => b.date.cmp(&a.date),
            SortOrder::Agenda => a.date.cmp(&b.date),
        };
        by_date
            .then_with(|| compare_times(&a.time, &b.time))
            .then_with(|| a.patient_name.cmp(&b.patient_name))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/* ============================================================
   Slot grouping
   ============================================================ */

#[derive(Debug, Clone, Serialize)]
pub struct SlotGroup {
    pub key: String,
    pub patient_id: String,
    pub patient_name: String,
    pub time: String,
    pub items: Vec<AppointmentView>,
}

impl SlotGroup {
    /// Complete only when every item in it is.
    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|i| i.is_completed)
    }
}

pub fn slot_key(item: &AppointmentView) -> String {
    format!("{}-{}", item.patient_id, item.time)
}

/// Groups in first-appearance order.
pub fn group_by_slot(view: &[AppointmentView]) -> Vec<SlotGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<SlotGroup> = Vec::new();

    for item in view {
        let key = slot_key(item);
        match index.get(&key) {
            Some(&i) => groups[i].items.push(item.clone()),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(SlotGroup {
                    key,
                    patient_id: item.patient_id.clone(),
                    patient_name: item.patient_name.clone(),
                    time: item.time.clone(),
                    items: vec![item.clone()],
                });
            }
        }
    }
    groups
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotSplit {
    pub upcoming: Vec<SlotGroup>,
    pub completed: Vec<SlotGroup>,
}

pub fn split_by_completion(groups: Vec<SlotGroup>) -> SlotSplit {
    let (mut completed, mut upcoming): (Vec<_>, Vec<_>) =
        groups.into_iter().partition(SlotGroup::is_complete);
    upcoming.sort_by(|a, b| compare_times(&a.time, &b.time));
    completed.sort_by(|a, b| compare_times(&a.time, &b.time));
    SlotSplit {
        upcoming,
        completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::day;
    use crate::models::{Company, UNKNOWN_COMPANY};

    fn plan(id: &str, name: &str, minutes: i32) -> Plan {
        Plan {
            id: id.into(),
            name: name.into(),
            description: None,
            default_duration: minutes,
        }
    }

    fn patient(id: &str, name: &str, plans: Vec<AssignedPlan>) -> Patient {
        Patient {
            id: id.into(),
            name: name.into(),
            company_id: "c1".into(),
            address: String::new(),
            contact: "333".into(),
            assigned_plans: plans,
        }
    }

    fn assigned(plan_id: &str, instances: &[(&str, Option<&str>)]) -> AssignedPlan {
        AssignedPlan {
            scheduled_instances: instances
                .iter()
                .map(|(d, t)| ScheduledInstance::new(day(d), t.map(str::to_string)))
                .collect(),
            ..AssignedPlan::new(plan_id)
        }
    }

    fn service(id: &str, patient_id: &str, date: &str, start: &str, description: &str) -> Service {
        Service {
            id: id.into(),
            patient_id: patient_id.into(),
            company_id: "c1".into(),
            plan_id: None,
            date: day(date),
            start_time: start.into(),
            end_time: "23:00".into(),
            description: description.into(),
            duration_minutes: 30,
            user_id: "u1".into(),
        }
    }

    fn snapshot(patients: Vec<Patient>) -> Snapshot {
        Snapshot::new(
            vec![Company {
                id: "c1".into(),
                name: "Cooperativa Sole".into(),
                address: None,
                contact: None,
            }],
            vec![plan("pl1", "Medicazione", 30), plan("pl2", "Prelievo", 15)],
            patients,
        )
    }

    #[test]
    fn covered_instance_is_not_duplicated() {
        let snap = snapshot(vec![patient(
            "p1",
            "Rossi",
            vec![assigned("pl1", &[("2024-06-10", Some("10:00"))])],
        )]);
        let services = vec![service("s1", "p1", "2024-06-10", "10:00", "Piano: Medicazione")];
        let filter = DateFilter::Day {
            date: day("2024-06-10"),
        };

        let view = build_appointment_view(&services, &snap, &filter, None);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, "s1");
        assert!(view[0].is_completed && !view[0].is_plan_based);
    }

    #[test]
    fn different_time_does_not_cover() {
        let snap = snapshot(vec![patient(
            "p1",
            "Rossi",
            vec![assigned("pl1", &[("2024-06-10", Some("10:00"))])],
        )]);
        let services = vec![service("s1", "p1", "2024-06-10", "16:00", "Piano: Medicazione")];
        let view = build_appointment_view(&services, &snap, &DateFilter::All, None);
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn untimed_instance_is_covered_by_any_time() {
        let snap = snapshot(vec![patient(
            "p1",
            "Rossi",
            vec![assigned("pl1", &[("2024-06-10", None)])],
        )]);
        let services = vec![service("s1", "p1", "2024-06-10", "07:45", "Medicazione ferita")];
        let view = build_appointment_view(&services, &snap, &DateFilter::All, None);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn planned_entry_carries_composite_id_and_duration() {
        let mut ap = assigned("pl1", &[("2024-06-10", None)]);
        ap.custom_duration = Some(50);
        let snap = snapshot(vec![patient("p1", "Rossi", vec![ap])]);

        let view = build_appointment_view(&[], &snap, &DateFilter::All, None);
        assert_eq!(view.len(), 1);
        let item = &view[0];
        assert_eq!(item.id, "plan-p1-pl1-2024-06-10");
        assert_eq!(item.time, "N/D");
        assert_eq!(item.description, "Piano: Medicazione");
        assert_eq!(item.duration_minutes, Some(50));
        assert!(item.is_plan_based && !item.is_completed);
    }

    #[test]
    fn duplicate_instance_dates_emit_once() {
        let snap = snapshot(vec![patient(
            "p1",
            "Rossi",
            vec![assigned(
                "pl1",
                &[("2024-06-10", Some("09:00")), ("2024-06-10", Some("11:00"))],
            )],
        )]);
        let view = build_appointment_view(&[], &snap, &DateFilter::All, None);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn unknown_plan_never_matches_by_containment() {
        let snap = snapshot(vec![patient(
            "p1",
            "Rossi",
            vec![assigned("gone", &[("2024-06-10", None)])],
        )]);
        let services = vec![service("s1", "p1", "2024-06-10", "10:00", "Piano Sconosciuto")];
        let view = build_appointment_view(&services, &snap, &DateFilter::All, None);
        assert_eq!(view.len(), 2);
        let planned = view.iter().find(|v| v.is_plan_based).unwrap();
        assert_eq!(planned.plan_name.as_deref(), Some(UNKNOWN_PLAN));
    }

    #[test]
    fn merge_is_deterministic() {
        let snap = snapshot(vec![
            patient("p1", "Rossi", vec![assigned("pl1", &[("2024-06-10", Some("10:00"))])]),
            patient("p2", "Bianchi", vec![assigned("pl2", &[("2024-06-10", Some("10:00"))])]),
        ]);
        let services = vec![service("s9", "p2", "2024-06-11", "08:00", "Visita")];

        let mut a = build_appointment_view(&services, &snap, &DateFilter::All, None);
        let mut b = build_appointment_view(&services, &snap, &DateFilter::All, None);
        sort_view(&mut a, SortOrder::Calendar);
        sort_view(&mut b, SortOrder::Calendar);
        assert_eq!(a, b);

        let ids: Vec<&str> = a.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, ["s9", "plan-p2-pl2-2024-06-10", "plan-p1-pl1-2024-06-10"]);
    }

    #[test]
    fn services_of_deleted_patients_stay_visible() {
        let snap = snapshot(vec![]);
        let mut s = service("s1", "p404", "2024-06-10", "10:00", "Visita");
        s.company_id = "c404".into();
        let view = build_appointment_view(&[s], &snap, &DateFilter::All, None);
        assert_eq!(view[0].patient_name, "Paziente Sconosciuto");
        assert_eq!(view[0].company_name, UNKNOWN_COMPANY);
    }

    #[test]
    fn agenda_order_is_ascending_with_unset_times_last() {
        let snap = snapshot(vec![patient(
            "p1",
            "Rossi",
            vec![
                assigned("pl1", &[("2024-06-11", None), ("2024-06-10", Some("12:00"))]),
                assigned("pl2", &[("2024-06-11", Some("08:00"))]),
            ],
        )]);
        let mut view = build_appointment_view(&[], &snap, &DateFilter::All, Some("p1"));
        sort_view(&mut view, SortOrder::Agenda);
        let keys: Vec<(String, String)> = view
            .iter()
            .map(|v| (v.date.to_string(), v.time.clone()))
            .collect();
        assert_eq!(
            keys,
            [
                ("2024-06-10".to_string(), "12:00".to_string()),
                ("2024-06-11".to_string(), "08:00".to_string()),
                ("2024-06-11".to_string(), "N/D".to_string()),
            ]
        );
    }

    #[test]
    fn groups_split_on_partial_completion() {
        let snap = snapshot(vec![patient(
            "p1",
            "Rossi",
            vec![
                assigned("pl1", &[("2024-06-10", Some("09:00"))]),
                assigned("pl2", &[("2024-06-10", Some("09:00"))]),
            ],
        )]);
        let services = vec![
            service("s1", "p1", "2024-06-10", "09:00", "Piano: Medicazione"),
            service("s2", "p1", "2024-06-10", "07:00", "Visita"),
        ];
        let mut view = build_appointment_view(&services, &snap, &DateFilter::All, None);
        sort_view(&mut view, SortOrder::Calendar);

        let groups = group_by_slot(&view);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "p1-07:00");
        assert_eq!(groups[1].items.len(), 2);
        assert!(!groups[1].is_complete());

        let split = split_by_completion(groups);
        assert_eq!(split.upcoming.len(), 1);
        assert_eq!(split.upcoming[0].time, "09:00");
        assert_eq!(split.completed.len(), 1);
    }
}
