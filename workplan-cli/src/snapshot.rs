//! On-disk scheduling state and the in-process store the dispatcher commits to.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tokio::sync::RwLock;
use workplan_core::{ScheduledTask, TaskId, TaskMove, VacationInterval, WorkerProfile, WorkerTimeline};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub workers: Vec<WorkerProfile>,
    #[serde(default)]
    pub tasks: Vec<ScheduledTask>,
    #[serde(default)]
    pub vacations: Vec<VacationInterval>,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("snapshot not found: {} (pass --snapshot <file>)", path.display());
        }
        let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let snap: Snapshot =
            serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        snap.validate()
            .with_context(|| format!("invalid snapshot {}", path.display()))?;
        Ok(snap)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let s = serde_json::to_string_pretty(self).context("serialize snapshot")?;
        fs::write(path, s).with_context(|| format!("write {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        for t in &self.tasks {
            if let Err(e) = t.validate() {
                bail!(e);
            }
        }
        for v in &self.vacations {
            if let Err(e) = v.validate() {
                bail!(e);
            }
        }
        Ok(())
    }

    pub fn worker(&self, id: &str) -> Option<&WorkerProfile> {
        self.workers.iter().find(|w| w.id == id)
    }

    pub fn timeline_for(&self, worker_id: &str) -> WorkerTimeline {
        WorkerTimeline::from_tasks(worker_id, self.tasks.iter().cloned())
    }

    pub fn vacations_for(&self, worker_id: &str) -> Vec<VacationInterval> {
        self.vacations
            .iter()
            .filter(|v| v.worker_id == worker_id)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("task {0} already exists")]
    DuplicateTask(TaskId),
    #[error("cannot move unknown task {0}")]
    UnknownTask(TaskId),
}

/// One insertion plus the displacement it causes, applied together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub task: ScheduledTask,
    pub moves: Vec<TaskMove>,
}

#[derive(Debug, Default)]
pub struct SnapshotStore {
    inner: RwLock<Snapshot>,
}

impl SnapshotStore {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    pub async fn read(&self) -> Snapshot {
        self.inner.read().await.clone()
    }

    pub async fn commit(&self, commit: Commit) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.tasks.iter().any(|t| t.id == commit.task.id) {
            return Err(StoreError::DuplicateTask(commit.task.id));
        }

        let mut tasks = guard.tasks.clone();
        for m in &commit.moves {
            let t = tasks
                .iter_mut()
                .find(|t| t.id == m.task_id)
                .ok_or_else(|| StoreError::UnknownTask(m.task_id.clone()))?;
            t.start_date = m.new_start_date;
            t.deadline = m.new_deadline;
        }
        tasks.push(commit.task);
        guard.tasks = tasks;
        Ok(())
    }

    pub fn into_inner(self) -> Snapshot {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use workplan_core::Priority;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap()
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            workers: vec![WorkerProfile::new("w1", &["design"])],
            tasks: vec![
                ScheduledTask::new("t1", Priority::Low, at(2, 9), at(3, 9), 1.0).with_assignee("w1"),
            ],
            vacations: vec![VacationInterval::new("w1", at(10, 0), at(12, 0))],
        }
    }

    #[test]
    fn load_round_trips_and_rejects_bad_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        snapshot().save(&path).unwrap();
        assert_eq!(Snapshot::load(&path).unwrap(), snapshot());

        let mut bad = snapshot();
        bad.tasks[0].assignee_ids.clear();
        bad.save(&path).unwrap();
        assert!(Snapshot::load(&path).is_err());

        assert!(Snapshot::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let snap: Snapshot = serde_json::from_str(r#"{"workers":[]}"#).unwrap();
        assert!(snap.tasks.is_empty());
        assert!(snap.vacations.is_empty());
    }

    #[test]
    fn lookups_are_per_worker() {
        let snap = snapshot();
        assert!(snap.worker("w1").is_some());
        assert!(snap.worker("w2").is_none());
        assert_eq!(snap.timeline_for("w1").len(), 1);
        assert!(snap.timeline_for("w2").is_empty());
        assert_eq!(snap.vacations_for("w1").len(), 1);
        assert!(snap.vacations_for("w2").is_empty());
    }

    #[tokio::test]
    async fn commit_applies_task_and_moves() {
        let store = SnapshotStore::new(snapshot());
        let task = ScheduledTask::new("t2", Priority::Normal, at(2, 9), at(3, 9), 1.0).with_assignee("w1");
        let moves = vec![TaskMove {
            task_id: "t1".into(),
            new_start_date: at(3, 9),
            new_deadline: at(4, 9),
        }];

        store.commit(Commit { task, moves }).await.unwrap();

        let snap = store.read().await;
        assert_eq!(snap.tasks.len(), 2);
        assert_eq!(snap.tasks[0].start_date, at(3, 9));
        assert_eq!(snap.tasks[0].deadline, at(4, 9));
    }

    #[tokio::test]
    async fn failed_commit_leaves_state_untouched() {
        let store = SnapshotStore::new(snapshot());
        let task = ScheduledTask::new("t2", Priority::Normal, at(2, 9), at(3, 9), 1.0).with_assignee("w1");
        let moves = vec![
            TaskMove {
                task_id: "t1".into(),
                new_start_date: at(3, 9),
                new_deadline: at(4, 9),
            },
            TaskMove {
                task_id: "ghost".into(),
                new_start_date: at(4, 9),
                new_deadline: at(5, 9),
            },
        ];

        let err = store.commit(Commit { task, moves }).await.unwrap_err();
        assert_eq!(err, StoreError::UnknownTask("ghost".into()));
        assert_eq!(store.into_inner(), snapshot());
    }

    #[tokio::test]
    async fn duplicate_task_is_rejected() {
        let store = SnapshotStore::new(snapshot());
        let dup = snapshot().tasks[0].clone();
        let err = store
            .commit(Commit {
                task: dup,
                moves: vec![],
            })
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateTask("t1".into()));
    }
}
