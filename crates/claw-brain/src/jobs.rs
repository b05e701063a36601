// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable job queue with audit trails.
//!
//! The store exclusively owns its JSON file. Every mutation rewrites the
//! file atomically (write-then-rename), so job state is durable before and
//! after each execution step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Default priority for new jobs; lower sorts first.
pub const DEFAULT_PRIORITY: i64 = 100;

/// Where a job sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a sweep.
    Pending,
    /// Being executed by the current sweep.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error; `retry_failed` re-queues it.
    Failed,
    /// Result recorded, memory write awaiting human approval.
    NeedsApproval,
}

impl JobStatus {
    /// Stable wire tag, also the sort key for listings.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NeedsApproval => "needs_approval",
        }
    }
}

/// How a job chooses its executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStrategy {
    /// Prefer hiring when a candidate exists and policy allows, else run
    /// locally.
    #[default]
    Auto,
    /// Must hire a remote peer.
    Hire,
    /// Must run against the local dispatcher.
    Local,
}

/// Outcome of the memory-persistence step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    /// Waiting for a human to approve the write.
    PendingApproval,
    /// Written to on-chain memory.
    Written,
    /// Policy disabled memory writes for this job.
    Skipped,
}

/// One entry of a job's ordered audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// When the entry was recorded.
    pub ts: DateTime<Utc>,
    /// Machine-readable action tag (`enqueued`, `job-started`, …).
    pub action: String,
    /// Human-readable reason.
    pub reason: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// A unit of autonomous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrainJob {
    /// Unique job id.
    pub id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Executor selection strategy.
    pub strategy: JobStrategy,
    /// Capability to invoke.
    pub capability: String,
    /// Capability params.
    pub params: Value,
    /// Spend cap for this job (provider price + fee), satoshis.
    pub max_sats: u64,
    /// Priority; lower runs first.
    pub priority: i64,
    /// Execution attempts so far.
    pub attempts: u32,
    /// Pinned remote endpoint, when the operator chose one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_endpoint: Option<String>,
    /// Whether the result should be persisted to on-chain memory.
    pub persist_result: bool,
    /// Memory key for persistence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_key: Option<String>,
    /// Memory category for persistence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_category: Option<String>,
    /// Capability result, once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure detail, once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Memory persistence outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_status: Option<MemoryStatus>,
    /// Transaction id of the memory write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_txid: Option<String>,
    /// Ordered audit trail.
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
}

impl BrainJob {
    /// Append an audit entry without touching `updated_at` (the store
    /// stamps that on `update`).
    pub fn audit(&mut self, action: &str, reason: &str, details: Option<Value>) {
        self.audit.push(AuditEntry {
            ts: Utc::now(),
            action: action.to_string(),
            reason: reason.to_string(),
            details,
        });
    }
}

/// Input for enqueuing a job.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct JobInput {
    /// Capability to invoke.
    pub capability: String,
    /// Capability params.
    pub params: Value,
    /// Executor strategy.
    pub strategy: JobStrategy,
    /// Spend cap; defaults to the policy's auto-hire cap.
    pub max_sats: Option<u64>,
    /// Priority; defaults to [`DEFAULT_PRIORITY`].
    pub priority: Option<i64>,
    /// Pinned remote endpoint.
    pub selected_endpoint: Option<String>,
    /// Persist the result to on-chain memory.
    pub persist_result: bool,
    /// Memory key.
    pub memory_key: Option<String>,
    /// Memory category.
    pub memory_category: Option<String>,
}

/// Errors from the job store.
#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    /// Disk I/O failed.
    #[error("job store io: {0}")]
    Io(#[from] std::io::Error),
    /// The queue file could not be encoded.
    #[error("job store encode: {0}")]
    Encode(#[from] serde_json::Error),
    /// No job with the given id.
    #[error("unknown job {0}")]
    UnknownJob(String),
}

/// Durable queue of brain jobs backed by a single JSON file.
pub struct JobStore {
    jobs: Mutex<Vec<BrainJob>>,
    path: Option<PathBuf>,
}

impl JobStore {
    /// In-memory store (tests).
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// Load from `path`, starting empty when absent or malformed.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let jobs = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(jobs) => jobs,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable jobs file; starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            jobs: Mutex::new(jobs),
            path: Some(path.to_path_buf()),
        }
    }

    fn persist(&self, jobs: &[BrainJob]) -> Result<(), JobStoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(jobs)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Enqueue a new job.
    ///
    /// # Errors
    ///
    /// Persistence failures.
    pub fn enqueue(
        &self,
        input: JobInput,
        default_max_sats: u64,
    ) -> Result<BrainJob, JobStoreError> {
        let now = Utc::now();
        let mut job = BrainJob {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            status: JobStatus::Pending,
            strategy: input.strategy,
            capability: input.capability,
            params: input.params,
            max_sats: input.max_sats.unwrap_or(default_max_sats),
            priority: input.priority.unwrap_or(DEFAULT_PRIORITY),
            attempts: 0,
            selected_endpoint: input.selected_endpoint,
            persist_result: input.persist_result,
            memory_key: input.memory_key,
            memory_category: input.memory_category,
            result: None,
            error: None,
            memory_status: None,
            memory_txid: None,
            audit: Vec::new(),
        };
        job.audit("enqueued", "job accepted into the queue", None);

        let mut jobs = self.jobs.lock().expect("job store poisoned");
        jobs.push(job.clone());
        self.persist(&jobs)?;
        Ok(job)
    }

    /// Overwrite a job in place, stamping `updated_at`.
    ///
    /// # Errors
    ///
    /// [`JobStoreError::UnknownJob`] or persistence failures.
    pub fn update(&self, mut job: BrainJob) -> Result<BrainJob, JobStoreError> {
        job.updated_at = Utc::now();
        let mut jobs = self.jobs.lock().expect("job store poisoned");
        let slot = jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| JobStoreError::UnknownJob(job.id.clone()))?;
        *slot = job.clone();
        self.persist(&jobs)?;
        Ok(job)
    }

    /// Fetch a job by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<BrainJob> {
        self.jobs
            .lock()
            .expect("job store poisoned")
            .iter()
            .find(|j| j.id == id)
            .cloned()
    }

    /// All jobs, optionally filtered by status, sorted by
    /// (status, priority, creation time).
    #[must_use]
    pub fn list(&self, status: Option<JobStatus>) -> Vec<BrainJob> {
        let mut jobs: Vec<BrainJob> = self
            .jobs
            .lock()
            .expect("job store poisoned")
            .iter()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            a.status
                .as_str()
                .cmp(b.status.as_str())
                .then_with(|| a.priority.cmp(&b.priority))
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        jobs
    }

    /// Up to `limit` executable jobs (pending or awaiting approval),
    /// sorted by (priority, creation time).
    #[must_use]
    pub fn next_pending(&self, limit: usize) -> Vec<BrainJob> {
        let mut jobs: Vec<BrainJob> = self
            .jobs
            .lock()
            .expect("job store poisoned")
            .iter()
            .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::NeedsApproval))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        jobs.truncate(limit);
        jobs
    }

    /// Re-queue every failed job. Returns how many were reset.
    ///
    /// # Errors
    ///
    /// Persistence failures.
    pub fn retry_failed(&self) -> Result<usize, JobStoreError> {
        let mut jobs = self.jobs.lock().expect("job store poisoned");
        let mut reset = 0;
        for job in jobs.iter_mut() {
            if job.status == JobStatus::Failed {
                job.status = JobStatus::Pending;
                job.error = None;
                job.updated_at = Utc::now();
                job.audit("retry", "operator requeued failed job", None);
                reset += 1;
            }
        }
        if reset > 0 {
            self.persist(&jobs)?;
        }
        Ok(reset)
    }

    /// Total number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.lock().expect("job store poisoned").len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(cap: &str) -> JobInput {
        JobInput {
            capability: cap.into(),
            params: json!({"x": 1}),
            ..JobInput::default()
        }
    }

    #[test]
    fn enqueue_defaults() {
        let store = JobStore::in_memory();
        let job = store.enqueue(input("echo"), 100).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_sats, 100);
        assert_eq!(job.priority, DEFAULT_PRIORITY);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.audit.len(), 1);
        assert_eq!(job.audit[0].action, "enqueued");
    }

    #[test]
    fn next_pending_orders_by_priority_then_age() {
        let store = JobStore::in_memory();
        let mut a = input("echo");
        a.priority = Some(50);
        let job_a = store.enqueue(a, 100).unwrap();
        let job_b = store.enqueue(input("echo"), 100).unwrap(); // priority 100
        let mut c = input("echo");
        c.priority = Some(50);
        let job_c = store.enqueue(c, 100).unwrap();

        let pending = store.next_pending(10);
        assert_eq!(
            pending.iter().map(|j| j.id.as_str()).collect::<Vec<_>>(),
            vec![job_a.id.as_str(), job_c.id.as_str(), job_b.id.as_str()]
        );

        assert_eq!(store.next_pending(1).len(), 1);
    }

    #[test]
    fn next_pending_includes_needs_approval() {
        let store = JobStore::in_memory();
        let mut job = store.enqueue(input("echo"), 100).unwrap();
        job.status = JobStatus::NeedsApproval;
        store.update(job).unwrap();
        let other = store.enqueue(input("echo"), 100).unwrap();
        assert_eq!(store.next_pending(10).len(), 2);

        let mut done = store.get(&other.id).unwrap();
        done.status = JobStatus::Completed;
        store.update(done).unwrap();
        assert_eq!(store.next_pending(10).len(), 1);
    }

    #[test]
    fn update_stamps_updated_at() {
        let store = JobStore::in_memory();
        let job = store.enqueue(input("echo"), 100).unwrap();
        let before = job.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        let updated = store.update(job).unwrap();
        assert!(updated.updated_at > before);
    }

    #[test]
    fn update_unknown_job_fails() {
        let store = JobStore::in_memory();
        let mut ghost = store.enqueue(input("echo"), 100).unwrap();
        ghost.id = "not-a-job".into();
        assert!(matches!(
            store.update(ghost),
            Err(JobStoreError::UnknownJob(_))
        ));
    }

    #[test]
    fn retry_failed_resets_only_failures() {
        let store = JobStore::in_memory();
        let mut failed = store.enqueue(input("echo"), 100).unwrap();
        failed.status = JobStatus::Failed;
        failed.error = Some("boom".into());
        store.update(failed.clone()).unwrap();
        store.enqueue(input("echo"), 100).unwrap();

        assert_eq!(store.retry_failed().unwrap(), 1);
        let job = store.get(&failed.id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error.is_none());
        assert!(job.audit.iter().any(|a| a.action == "retry"));
    }

    #[test]
    fn persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brain-jobs.json");
        let store = JobStore::load(&path);
        let job = store.enqueue(input("dns_resolve"), 64).unwrap();

        let restored = JobStore::load(&path);
        assert_eq!(restored.len(), 1);
        let got = restored.get(&job.id).unwrap();
        assert_eq!(got.capability, "dns_resolve");
        assert_eq!(got.max_sats, 64);
        assert_eq!(got.audit.len(), 1);
    }

    #[test]
    fn status_tags_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::NeedsApproval).unwrap(),
            "\"needs_approval\""
        );
        assert_eq!(
            serde_json::to_string(&MemoryStatus::PendingApproval).unwrap(),
            "\"pending_approval\""
        );
    }
}
