//! Assignment dispatcher: the read → compute → commit cycle around the kernel.
//!
//! Each worker has its own async lock. An assignment holds the locks of its
//! assignees and of every worker sharing a task it displaces (acquired in
//! sorted id order) from the snapshot read until the commit, so two
//! assignments touching the same worker never interleave, while assignments
//! on disjoint workers run freely.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};
use workplan_core::{
    Clock, InsertionResult, Priority, ScheduleError, ScheduledTask, SchedulerKernel, TaskId,
    TaskMove, TaskRequirements, TaskStatus, VacationInterval, WorkerCandidate, WorkerId,
};

use crate::snapshot::{Commit, Snapshot, SnapshotStore, StoreError};

/// Cap on per-worker relayout passes for one assignment.
pub const MAX_RELAYOUT_PASSES: usize = 64;

#[derive(Debug, Error)]
pub enum AssignError {
    #[error("no eligible worker for task type {0}")]
    NoCandidate(String),
    #[error("unknown worker {0}")]
    UnknownWorker(WorkerId),
    #[error("cannot place task {task}: {reason}")]
    Conflict { task: TaskId, reason: String },
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct AssignRequest {
    pub task_id: TaskId,
    pub task_type: String,
    pub brand: Option<String>,
    pub priority: Priority,
    pub duration_days: f64,
    /// Empty means "pick one for me".
    pub assignees: Vec<WorkerId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub task: ScheduledTask,
    pub selected: Option<WorkerCandidate>,
    pub insertions: Vec<InsertionResult>,
    pub moves: Vec<TaskMove>,
    /// False when the shared slot could not be cleared of every assignee's vacations.
    pub resolved: bool,
}

/// Everything computed under the locks, before the commit.
struct Plan {
    task: ScheduledTask,
    insertions: Vec<InsertionResult>,
    moves: Vec<TaskMove>,
    resolved: bool,
}

type Slot = (DateTime<Utc>, DateTime<Utc>);

pub struct Dispatcher<C: Clock> {
    kernel: SchedulerKernel<C>,
    store: Arc<SnapshotStore>,
    locks: Mutex<HashMap<WorkerId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<C: Clock> Dispatcher<C> {
    pub fn new(kernel: SchedulerKernel<C>, store: Arc<SnapshotStore>) -> Self {
        Self {
            kernel,
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn kernel(&self) -> &SchedulerKernel<C> {
        &self.kernel
    }

    fn lock_for(&self, worker_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(worker_id.to_string()).or_default().clone()
    }

    pub async fn assign(&self, req: AssignRequest) -> Result<Assignment, AssignError> {
        let (assignees, selected) = self.resolve_assignees(&req).await?;

        // Grows until it covers every worker the displacement reaches.
        let mut locked = assignees.clone();
        loop {
            // BTreeSet iteration gives the global lock order.
            let mut guards = Vec::with_capacity(locked.len());
            for id in &locked {
                guards.push(self.lock_for(id).lock_owned().await);
            }
            debug!(task = %req.task_id, workers = ?locked, "locked workers");

            let snap = self.store.read().await;
            let plan = self.plan(&req, &assignees, &snap)?;

            let touched = touched_workers(&snap, &plan.moves);
            if !touched.is_subset(&locked) {
                debug!(
                    task = %req.task_id,
                    extra = ?touched.difference(&locked).collect::<Vec<_>>(),
                    "displacement reaches unlocked workers, retrying with a wider lock set"
                );
                drop(guards);
                locked.extend(touched);
                continue;
            }

            self.store
                .commit(Commit {
                    task: plan.task.clone(),
                    moves: plan.moves.clone(),
                })
                .await?;
            drop(guards);

            info!(
                task = %plan.task.id,
                workers = ?plan.task.assignee_ids,
                start = %plan.task.start_date,
                deadline = %plan.task.deadline,
                moved = plan.moves.len(),
                "assigned task"
            );

            return Ok(Assignment {
                task: plan.task,
                selected,
                insertions: plan.insertions,
                moves: plan.moves,
                resolved: plan.resolved,
            });
        }
    }

    fn plan(&self, req: &AssignRequest, assignees: &BTreeSet<WorkerId>, snap: &Snapshot) -> Result<Plan, AssignError> {
        if snap.tasks.iter().any(|t| t.id == req.task_id) {
            return Err(StoreError::DuplicateTask(req.task_id.clone()).into());
        }
        let mut insertions = Vec::with_capacity(assignees.len());
        let mut vacations: Vec<VacationInterval> = Vec::new();
        for id in assignees {
            let own = snap.vacations_for(id);
            insertions.push(self.kernel.compute_insertion(
                id,
                req.priority,
                req.duration_days,
                &snap.timeline_for(id),
                &own,
            )?);
            vacations.extend(own);
        }

        // Shared task: everyone gets the latest slot, cleared of all their vacations.
        let Some(latest) = insertions.iter().max_by_key(|r| r.deadline) else {
            return Err(AssignError::NoCandidate(req.task_type.clone()));
        };
        let slot = self
            .kernel
            .resolve_vacations(latest.start_date, req.duration_days, &vacations);

        let task = ScheduledTask {
            id: req.task_id.clone(),
            priority: req.priority,
            start_date: slot.start_date,
            deadline: slot.deadline,
            duration_days: req.duration_days,
            created_at: self.kernel.now(),
            assignee_ids: assignees.clone(),
            status: TaskStatus::New,
        };
        let moves = self.relayout(snap, &task, &insertions)?;

        Ok(Plan {
            task,
            insertions,
            moves,
            resolved: slot.converged,
        })
    }

    /// Re-sequence every affected worker queue around the new task.
    ///
    /// Workers whose insertion displaced work get their tail laid out
    /// back to back behind the new task. A task shared with other workers
    /// only ever moves later, and each such move re-queues the other
    /// holders from that task on. The new task itself never moves here.
    fn relayout(
        &self,
        snap: &Snapshot,
        task: &ScheduledTask,
        insertions: &[InsertionResult],
    ) -> Result<Vec<TaskMove>, AssignError> {
        let cal = self.kernel.calendar();
        let mut slots: HashMap<TaskId, Slot> = snap
            .tasks
            .iter()
            .map(|t| (t.id.clone(), (t.start_date, t.deadline)))
            .collect();
        slots.insert(task.id.clone(), (task.start_date, task.deadline));

        let mut lanes: BTreeMap<WorkerId, Vec<ScheduledTask>> = BTreeMap::new();
        let mut displacing: BTreeSet<WorkerId> = BTreeSet::new();
        let mut dirty: BTreeMap<WorkerId, usize> = BTreeMap::new();

        for res in insertions {
            let mut lane = snap.timeline_for(&res.worker_id).tasks().to_vec();
            match res.insertion_index {
                Some(idx) => {
                    let idx = idx.min(lane.len());
                    lane.insert(idx, task.clone());
                    displacing.insert(res.worker_id.clone());
                    dirty.insert(res.worker_id.clone(), idx);
                }
                // URGENT runs alongside the queue rather than in it.
                None if task.priority == Priority::Urgent => {}
                None => {
                    let idx = lane.partition_point(|t| t.start_date <= task.start_date);
                    lane.insert(idx, task.clone());
                }
            }
            lanes.insert(res.worker_id.clone(), lane);
        }

        for _ in 0..MAX_RELAYOUT_PASSES {
            let Some((worker, from)) = dirty.pop_first() else {
                return Ok(collect_moves(snap, &slots));
            };
            let lane = lanes
                .entry(worker.clone())
                .or_insert_with(|| snap.timeline_for(&worker).tasks().to_vec())
                .clone();
            let push_only = !displacing.contains(&worker);

            let Some(anchor) = lane.get(from) else {
                continue;
            };
            let mut cursor = slots.get(&anchor.id).map_or(anchor.deadline, |s| s.1);
            let mut pushed: Vec<&ScheduledTask> = Vec::new();

            for t in lane.iter().skip(from + 1) {
                let (cur_start, cur_end) = slots.get(&t.id).copied().unwrap_or((t.start_date, t.deadline));
                let shared = t.assignee_ids.len() > 1;
                let mut start = cal.next_available_start(cursor);
                if push_only || shared {
                    start = start.max(cur_start);
                }

                if t.id == task.id {
                    if start > cur_start {
                        return Err(AssignError::Conflict {
                            task: task.id.clone(),
                            reason: format!("displaced work on {worker} would run into it"),
                        });
                    }
                    cursor = cur_end;
                    continue;
                }

                let end = cal.task_deadline(start, t.duration_days);
                if (start, end) != (cur_start, cur_end) {
                    slots.insert(t.id.clone(), (start, end));
                    if shared {
                        pushed.push(t);
                    }
                }
                cursor = end;
            }

            for t in pushed {
                for other in t.assignee_ids.iter().filter(|w| **w != worker) {
                    let other_lane = lanes
                        .entry(other.clone())
                        .or_insert_with(|| snap.timeline_for(other).tasks().to_vec());
                    if let Some(pos) = other_lane.iter().position(|x| x.id == t.id) {
                        let e = dirty.entry(other.clone()).or_insert(pos);
                        *e = (*e).min(pos);
                    }
                }
            }
        }

        Err(AssignError::Conflict {
            task: task.id.clone(),
            reason: format!("shared queues did not settle after {MAX_RELAYOUT_PASSES} passes"),
        })
    }

    async fn resolve_assignees(
        &self,
        req: &AssignRequest,
    ) -> Result<(BTreeSet<WorkerId>, Option<WorkerCandidate>), AssignError> {
        let snap = self.store.read().await;

        if !req.assignees.is_empty() {
            for id in &req.assignees {
                if snap.worker(id).is_none() {
                    return Err(AssignError::UnknownWorker(id.clone()));
                }
            }
            return Ok((req.assignees.iter().cloned().collect(), None));
        }

        let requirements = TaskRequirements {
            task_type: req.task_type.clone(),
            brand: req.brand.clone(),
            duration_days: req.duration_days,
        };
        let pool: Vec<WorkerCandidate> = snap
            .workers
            .iter()
            .filter_map(|w| {
                self.kernel.build_candidate(
                    w,
                    &requirements,
                    &snap.timeline_for(&w.id),
                    &snap.vacations_for(&w.id),
                )
            })
            .collect();

        let chosen = self
            .kernel
            .select_candidate(&pool)
            .ok_or_else(|| AssignError::NoCandidate(req.task_type.clone()))?;
        Ok((BTreeSet::from([chosen.worker_id.clone()]), Some(chosen)))
    }
}


fn collect_moves(snap: &Snapshot, slots: &HashMap<TaskId, Slot>) -> Vec<TaskMove> {
    let mut moves: Vec<TaskMove> = snap
        .tasks
        .iter()
        .filter_map(|t| {
            let (start, end) = slots.get(&t.id)?;
            let m = TaskMove {
                task_id: t.id.clone(),
                new_start_date: *start,
                new_deadline: *end,
            };
            (!m.is_noop_for(t)).then_some(m)
        })
        .collect();
    moves.sort_by(|a, b| {
        a.new_start_date
            .cmp(&b.new_start_date)
            .then_with(|| a.task_id.cmp(&b.task_id))
    });
    moves
}

/// Every worker holding a task that `moves` rewrites.
fn touched_workers(snap: &Snapshot, moves: &[TaskMove]) -> BTreeSet<WorkerId> {
    let moved: BTreeSet<&str> = moves.iter().map(|m| m.task_id.as_str()).collect();
    snap.tasks
        .iter()
        .filter(|t| moved.contains(t.id.as_str()))
        .flat_map(|t| t.assignee_ids.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use workplan_core::{FixedClock, SchedulerConfig, WorkerProfile};

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap()
    }

    fn dispatcher(snap: Snapshot) -> Dispatcher<FixedClock> {
        let kernel = SchedulerKernel::new(&SchedulerConfig::default(), FixedClock(at(2, 9))).unwrap();
        Dispatcher::new(kernel, Arc::new(SnapshotStore::new(snap)))
    }

    fn team() -> Snapshot {
        Snapshot {
            workers: vec![
                WorkerProfile::new("w1", &["design"]),
                WorkerProfile::new("w2", &["design", "copy"]),
            ],
            tasks: vec![
                ScheduledTask::new("busy", Priority::Normal, at(2, 9), at(4, 9), 2.0)
                    .with_assignee("w1")
                    .with_created_at(at(1, 9)),
            ],
            vacations: vec![],
        }
    }

    fn queued(id: &str, p: Priority, start: DateTime<Utc>, end: DateTime<Utc>, days: f64, workers: &[&str]) -> ScheduledTask {
        let mut t = ScheduledTask::new(id, p, start, end, days).with_created_at(at(2, 9));
        for w in workers {
            t = t.with_assignee(*w);
        }
        t
    }

    /// Ids in queue order, after checking no two tasks on `worker` overlap.
    fn queue_of(snap: &Snapshot, worker: &str) -> Vec<String> {
        let tl = snap.timeline_for(worker);
        for pair in tl.tasks().windows(2) {
            assert!(
                pair[1].start_date >= pair[0].deadline,
                "{} overlaps {} on {worker}",
                pair[1].id,
                pair[0].id
            );
        }
        tl.iter().map(|t| t.id.clone()).collect()
    }

    fn request(id: &str, assignees: &[&str]) -> AssignRequest {
        AssignRequest {
            task_id: id.to_string(),
            task_type: "design".to_string(),
            brand: None,
            priority: Priority::Normal,
            duration_days: 1.0,
            assignees: assignees.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn explicit_assignee_is_appended() {
        let d = dispatcher(team());
        let out = d.assign(request("t1", &["w1"])).await.unwrap();

        assert!(out.selected.is_none());
        assert_eq!(out.task.start_date, at(4, 9));
        assert_eq!(out.task.deadline, at(5, 9));
        assert!(out.moves.is_empty());
        assert_eq!(d.store.read().await.tasks.len(), 2);
    }

    #[tokio::test]
    async fn auto_selection_prefers_idle_specialist() {
        let mut snap = team();
        snap.tasks.clear();
        let d = dispatcher(snap);

        let out = d.assign(request("t1", &[])).await.unwrap();
        assert_eq!(out.selected.unwrap().worker_id, "w1");
        assert!(out.task.is_assigned_to("w1"));
        assert_eq!(out.task.start_date, at(2, 9));
    }

    #[tokio::test]
    async fn no_eligible_worker_is_an_error() {
        let d = dispatcher(team());
        let mut req = request("t1", &[]);
        req.task_type = "video".to_string();
        assert!(matches!(d.assign(req).await, Err(AssignError::NoCandidate(_))));

        let err = d.assign(request("t2", &["ghost"])).await.unwrap_err();
        assert!(matches!(err, AssignError::UnknownWorker(w) if w == "ghost"));
    }

    #[tokio::test]
    async fn shared_task_takes_latest_slot() {
        let d = dispatcher(team());
        let out = d.assign(request("t1", &["w2", "w1"])).await.unwrap();

        assert_eq!(out.insertions.len(), 2);
        assert_eq!(out.task.start_date, at(4, 9));
        assert_eq!(out.task.deadline, at(5, 9));
        assert_eq!(out.task.assignee_ids.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_assignments_on_one_worker_do_not_overlap() {
        let mut snap = team();
        snap.tasks.clear();
        let d = dispatcher(snap);

        let (a, b) = tokio::join!(d.assign(request("a", &["w1"])), d.assign(request("b", &["w1"])));
        a.unwrap();
        b.unwrap();

        let snap = d.store.read().await;
        let tl = snap.timeline_for("w1");
        assert_eq!(tl.len(), 2);
        let first = &tl.tasks()[0];
        let second = &tl.tasks()[1];
        assert_eq!(second.start_date, d.kernel().calendar().next_available_start(first.deadline));
    }

    #[tokio::test]
    async fn displaced_low_task_is_committed() {
        let mut snap = team();
        snap.tasks.push(
            ScheduledTask::new("low", Priority::Low, at(4, 9), at(5, 9), 1.0)
                .with_assignee("w1")
                .with_created_at(at(2, 9)),
        );
        let d = dispatcher(snap);

        let out = d.assign(request("t1", &["w1"])).await.unwrap();
        assert_eq!(out.task.start_date, at(4, 9));
        assert_eq!(out.moves.len(), 1);
        assert_eq!(out.moves[0].task_id, "low");

        let snap = d.store.read().await;
        let low = snap.tasks.iter().find(|t| t.id == "low").unwrap();
        assert_eq!(low.start_date, at(5, 9));
        assert_eq!(low.deadline, at(6, 9));
    }

    #[tokio::test]
    async fn rejected_commit_changes_nothing() {
        let d = dispatcher(team());
        let err = d.assign(request("busy", &["w1"])).await.unwrap_err();
        assert!(matches!(err, AssignError::Store(StoreError::DuplicateTask(_))));
        assert_eq!(d.store.read().await, team());
    }

    #[tokio::test]
    async fn shared_slot_clears_every_assignee_vacation() {
        let mut snap = team();
        snap.vacations.push(VacationInterval::new("w2", at(4, 0), at(4, 23)));
        let d = dispatcher(snap);

        let out = d.assign(request("t1", &["w1", "w2"])).await.unwrap();

        // w1 frees up Wednesday morning, but w2 is off all Wednesday.
        assert!(out.resolved);
        assert_eq!(out.task.start_date, at(6, 9));
        assert_eq!(out.task.deadline, at(9, 9));
        let snap = d.store.read().await;
        for v in &snap.vacations {
            assert!(!v.overlaps(out.task.start_date, out.task.deadline));
        }
    }

    #[tokio::test]
    async fn shared_displaced_task_keeps_both_queues_ordered() {
        let snap = Snapshot {
            workers: vec![
                WorkerProfile::new("w1", &["design"]),
                WorkerProfile::new("w2", &["design"]),
            ],
            tasks: vec![
                queued("n1", Priority::Normal, at(2, 9), at(3, 9), 1.0, &["w1"]),
                queued("la", Priority::Low, at(3, 9), at(5, 9), 2.0, &["w1"]),
                queued("x", Priority::Normal, at(5, 9), at(6, 9), 1.0, &["w1", "w2"]),
                queued("lb", Priority::Low, at(2, 9), at(3, 9), 1.0, &["w2"]),
                queued("y", Priority::Normal, at(6, 9), at(9, 9), 1.0, &["w2"]),
            ],
            vacations: vec![],
        };
        let d = dispatcher(snap);

        let out = d.assign(request("t1", &["w1", "w2"])).await.unwrap();
        assert_eq!(out.task.start_date, at(3, 9));
        assert_eq!(out.task.deadline, at(4, 9));

        let snap = d.store.read().await;
        assert_eq!(queue_of(&snap, "w1"), vec!["n1", "t1", "la", "x"]);
        assert_eq!(queue_of(&snap, "w2"), vec!["t1", "lb", "x", "y"]);

        let x = snap.tasks.iter().find(|t| t.id == "x").unwrap();
        assert_eq!((x.start_date, x.deadline), (at(6, 9), at(9, 9)));
        let y = snap.tasks.iter().find(|t| t.id == "y").unwrap();
        assert_eq!(y.start_date, d.kernel().calendar().next_available_start(x.deadline));

        let ids: BTreeSet<&str> = out.moves.iter().map(|m| m.task_id.as_str()).collect();
        assert_eq!(ids, BTreeSet::from(["la", "lb", "x", "y"]));
    }

    #[tokio::test]
    async fn displacement_reaches_workers_outside_the_assignment() {
        let snap = Snapshot {
            workers: vec![
                WorkerProfile::new("w1", &["design"]),
                WorkerProfile::new("w3", &["copy"]),
            ],
            tasks: vec![
                queued("n1", Priority::Normal, at(2, 9), at(3, 9), 1.0, &["w1"]),
                queued("la", Priority::Low, at(3, 9), at(5, 9), 2.0, &["w1"]),
                queued("x", Priority::Normal, at(5, 9), at(6, 9), 1.0, &["w1", "w3"]),
                queued("z", Priority::Normal, at(6, 9), at(9, 9), 1.0, &["w3"]),
            ],
            vacations: vec![],
        };
        let d = dispatcher(snap);

        let out = d.assign(request("t1", &["w1"])).await.unwrap();
        assert_eq!(out.moves.len(), 3);

        let snap = d.store.read().await;
        assert_eq!(queue_of(&snap, "w1"), vec!["n1", "t1", "la", "x"]);
        assert_eq!(queue_of(&snap, "w3"), vec!["x", "z"]);
        let z = snap.tasks.iter().find(|t| t.id == "z").unwrap();
        assert_eq!((z.start_date, z.deadline), (at(9, 9), at(10, 9)));

        // The third worker's lock was taken along the way.
        assert!(d.locks.lock().unwrap().contains_key("w3"));
    }

    #[tokio::test]
    async fn displacement_into_the_new_task_is_rejected() {
        let snap = Snapshot {
            workers: vec![
                WorkerProfile::new("w1", &["design"]),
                WorkerProfile::new("w2", &["design"]),
            ],
            tasks: vec![
                queued("la", Priority::Low, at(2, 9), at(3, 9), 1.0, &["w1"]),
                queued("x", Priority::Normal, at(3, 9), at(4, 9), 1.0, &["w1", "w2"]),
            ],
            vacations: vec![],
        };
        let d = dispatcher(snap.clone());

        // w2 appends after x; w1 inserts ahead of la and pushes x into that slot.
        let err = d.assign(request("t1", &["w1", "w2"])).await.unwrap_err();
        assert!(matches!(err, AssignError::Conflict { .. }));
        assert_eq!(d.store.read().await, snap);
    }
}
