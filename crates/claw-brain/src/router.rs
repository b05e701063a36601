// SPDX-License-Identifier: MIT OR Apache-2.0
//! Goal generation and sweep execution.
//!
//! A sweep pulls the next pending jobs, resolves each one to a local run
//! or a hire, drives the paid call, and records every transition in the
//! job's audit trail and the event log. Job state is durable before and
//! after each step; a single bad job cannot halt the queue.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use claw_client::{NodeClient, PaidCallOptions};
use claw_core::canonical_json;
use claw_peers::PeerRegistry;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::events::EventLog;
use crate::jobs::{BrainJob, JobInput, JobStatus, JobStore, JobStrategy, MemoryStatus};
use crate::memory::MemoryWriter;
use crate::policy::{BrainPolicy, GoalTemplate, PolicyStore};

/// Options for one router sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepOptions {
    /// Allow memory writes this sweep (human approval present).
    pub allow_memory_writes: bool,
    /// Override the policy's jobs-per-sweep bound.
    pub limit: Option<usize>,
}

/// What a sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs examined.
    pub examined: usize,
    /// Jobs completed.
    pub completed: usize,
    /// Jobs failed.
    pub failed: usize,
    /// Jobs left awaiting memory-write approval.
    pub awaiting_approval: usize,
    /// Jobs executed by hiring a peer.
    pub hired: usize,
    /// Jobs executed locally.
    pub local: usize,
}

enum ExecutionMode {
    Local,
    Hire {
        endpoint: String,
        peer: claw_peers::PeerRecord,
    },
}

/// Apply capability-specific param aliases.
#[must_use]
pub fn normalize_params(capability: &str, params: &Value) -> Value {
    let mut params = params.clone();
    let Some(map) = params.as_object_mut() else {
        return params;
    };
    let alias = |map: &mut serde_json::Map<String, Value>, from: &str, to: &str| {
        if !map.contains_key(to) {
            if let Some(v) = map.remove(from) {
                map.insert(to.to_string(), v);
            }
        }
    };
    match capability {
        "dns_resolve" => alias(map, "domain", "hostname"),
        "peer_health_check" => alias(map, "peer", "endpoint"),
        "fetch_url" => alias(map, "endpoint", "url"),
        _ => {}
    }
    params
}

/// Stable identity of a goal: capability plus canonical normalized params.
#[must_use]
pub fn goal_fingerprint(capability: &str, params: &Value) -> String {
    let normalized = normalize_params(capability, params);
    format!(
        "{capability}{}",
        canonical_json(&normalized).unwrap_or_default()
    )
}

/// Whether `template` should produce a job at `now`, given the existing
/// queue: skip while a same-fingerprint job is active, and skip inside the
/// cooldown window after the most recent same-fingerprint job.
#[must_use]
pub fn should_generate(
    template: &GoalTemplate,
    jobs: &[BrainJob],
    now: DateTime<Utc>,
    default_every_seconds: u64,
) -> bool {
    if template.enabled == Some(false) {
        return false;
    }
    let fingerprint = goal_fingerprint(&template.capability, &template.params);
    let same: Vec<&BrainJob> = jobs
        .iter()
        .filter(|j| goal_fingerprint(&j.capability, &j.params) == fingerprint)
        .collect();

    if same.iter().any(|j| {
        matches!(
            j.status,
            JobStatus::Pending | JobStatus::Running | JobStatus::NeedsApproval
        )
    }) {
        return false;
    }

    let every = template.every_seconds.unwrap_or(default_every_seconds);
    if let Some(latest) = same.iter().map(|j| j.updated_at).max() {
        if now - latest < ChronoDuration::seconds(every as i64) {
            return false;
        }
    }
    true
}

/// Executes pending jobs and generates goal jobs.
pub struct TaskRouter {
    store: Arc<JobStore>,
    policy: Arc<PolicyStore>,
    events: Arc<EventLog>,
    peers: Arc<PeerRegistry>,
    client: NodeClient,
    memory: Arc<dyn MemoryWriter>,
    local_port: u16,
}

impl TaskRouter {
    /// Wire up a router over the node's shared state.
    #[must_use]
    pub fn new(
        store: Arc<JobStore>,
        policy: Arc<PolicyStore>,
        events: Arc<EventLog>,
        peers: Arc<PeerRegistry>,
        client: NodeClient,
        memory: Arc<dyn MemoryWriter>,
        local_port: u16,
    ) -> Self {
        Self {
            store,
            policy,
            events,
            peers,
            client,
            memory,
            local_port,
        }
    }

    /// Generate jobs from enabled goal templates. Returns how many were
    /// enqueued.
    pub fn generate_goal_jobs(&self) -> usize {
        let policy = self.policy.get();
        if !policy.goals.auto_generate_jobs {
            return 0;
        }
        let now = Utc::now();
        let mut generated = 0;
        for template in &policy.goals.templates {
            let jobs = self.store.list(None);
            if !should_generate(template, &jobs, now, policy.goals.generate_jobs_every_seconds) {
                continue;
            }
            let input = JobInput {
                capability: template.capability.clone(),
                params: template.params.clone(),
                strategy: template.strategy.unwrap_or_default(),
                max_sats: template.max_sats,
                priority: template.priority,
                selected_endpoint: None,
                persist_result: template.persist_result.unwrap_or(false),
                memory_key: template.memory_key.clone(),
                memory_category: template.memory_category.clone(),
            };
            match self
                .store
                .enqueue(input, policy.decisions.auto_hire_max_sats)
            {
                Ok(mut job) => {
                    job.audit(
                        "goal-generated",
                        "generated from policy template",
                        Some(json!({"capability": template.capability})),
                    );
                    if let Err(e) = self.store.update(job) {
                        warn!(error = %e, "failed to stamp goal-generated audit");
                    }
                    self.events.log(
                        "router",
                        "goal-generated",
                        &format!("template {} produced a job", template.capability),
                        None,
                    );
                    generated += 1;
                }
                Err(e) => warn!(error = %e, "goal enqueue failed"),
            }
        }
        generated
    }

    /// Execute one sweep of pending jobs.
    pub async fn run_sweep(&self, opts: SweepOptions) -> SweepReport {
        let policy = self.policy.get();
        let limit = opts.limit.unwrap_or(policy.decisions.max_jobs_per_sweep);
        let mut report = SweepReport::default();

        for job in self.store.next_pending(limit) {
            report.examined += 1;
            if job.status == JobStatus::NeedsApproval {
                self.handle_approval(job, opts, &mut report).await;
            } else {
                self.execute(job, &policy, opts, &mut report).await;
            }
        }
        report
    }

    async fn handle_approval(
        &self,
        mut job: BrainJob,
        opts: SweepOptions,
        report: &mut SweepReport,
    ) {
        if !opts.allow_memory_writes {
            report.awaiting_approval += 1;
            return;
        }
        let Some(result) = job.result.clone() else {
            job.error = Some("no recorded result to persist".into());
            job.status = JobStatus::Failed;
            job.audit("job-failed", "approval arrived with no result", None);
            self.finish(job, report, false);
            return;
        };
        match self.write_memory(&mut job, &result).await {
            Ok(()) => {
                job.status = JobStatus::Completed;
                job.audit("job-completed", "memory write approved", None);
                self.finish(job, report, true);
            }
            Err(reason) => {
                job.error = Some(reason.clone());
                job.status = JobStatus::Failed;
                job.audit("job-failed", &reason, None);
                self.finish(job, report, false);
            }
        }
    }

    async fn write_memory(&self, job: &mut BrainJob, result: &Value) -> Result<(), String> {
        let key = job
            .memory_key
            .clone()
            .unwrap_or_else(|| format!("job/{}", job.id));
        let category = job
            .memory_category
            .clone()
            .unwrap_or_else(|| "brain".to_string());
        match self.memory.write(&key, &category, result).await {
            Ok(txid) => {
                job.memory_txid = Some(txid.clone());
                job.memory_status = Some(MemoryStatus::Written);
                job.audit("memory-written", "result persisted", Some(json!({"txid": txid})));
                self.events
                    .log("router", "memory-written", &format!("job {} key {key}", job.id), None);
                Ok(())
            }
            Err(e) => Err(format!("memory write failed: {e}")),
        }
    }

    fn pick_candidate(&self, job: &BrainJob) -> Option<claw_peers::PeerRecord> {
        let mut candidates: Vec<claw_peers::PeerRecord> = self
            .peers
            .by_capability(&job.capability)
            .into_iter()
            .filter(|p| p.endpoint.is_some())
            .collect();
        if candidates.is_empty() {
            return None;
        }
        if let Some(selected) = &job.selected_endpoint {
            if let Some(hit) = candidates
                .iter()
                .find(|p| p.endpoint.as_deref() == Some(selected.as_str()))
            {
                return Some(hit.clone());
            }
        }
        candidates.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        candidates.into_iter().next()
    }

    fn hire_allowed(policy: &BrainPolicy, capability: &str) -> bool {
        policy.decisions.hire_enabled
            && (policy.decisions.auto_hire_capabilities.is_empty()
                || policy
                    .decisions
                    .auto_hire_capabilities
                    .iter()
                    .any(|c| c == capability))
    }

    async fn execute(
        &self,
        mut job: BrainJob,
        policy: &BrainPolicy,
        opts: SweepOptions,
        report: &mut SweepReport,
    ) {
        job.status = JobStatus::Running;
        job.attempts += 1;
        job.audit("job-started", "sweep picked up the job", None);
        job = match self.store.update(job) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "job became unreachable at start");
                return;
            }
        };

        let params = normalize_params(&job.capability, &job.params);
        let candidate = self.pick_candidate(&job);

        let mode = match job.strategy {
            JobStrategy::Local => ExecutionMode::Local,
            JobStrategy::Hire => {
                if !policy.decisions.hire_enabled {
                    return self.fail(job, "hiring disabled by policy", report);
                }
                if !Self::hire_allowed(policy, &job.capability) {
                    return self.fail(job, "capability not in the auto-hire allowlist", report);
                }
                match candidate {
                    Some(peer) => {
                        let endpoint = peer.endpoint.clone().unwrap_or_default();
                        ExecutionMode::Hire { endpoint, peer }
                    }
                    None => return self.fail(job, "no peer advertises this capability", report),
                }
            }
            JobStrategy::Auto => match candidate {
                Some(peer) if Self::hire_allowed(policy, &job.capability) => {
                    let endpoint = peer.endpoint.clone().unwrap_or_default();
                    ExecutionMode::Hire { endpoint, peer }
                }
                _ => ExecutionMode::Local,
            },
        };

        let (endpoint, hired_peer) = match &mode {
            ExecutionMode::Local => (format!("http://127.0.0.1:{}", self.local_port), None),
            ExecutionMode::Hire { endpoint, peer } => (endpoint.clone(), Some(peer.clone())),
        };
        match &mode {
            ExecutionMode::Local => report.local += 1,
            ExecutionMode::Hire { .. } => report.hired += 1,
        }

        let call_opts = PaidCallOptions {
            max_sats: Some(job.max_sats),
        };
        match self
            .client
            .paid_call(&endpoint, &job.capability, &params, &call_opts)
            .await
        {
            Ok(outcome) => {
                if let Some(peer) = &hired_peer {
                    self.peers.record_success(&peer.identity_key);
                }
                job.result = Some(outcome.response.result.clone());
                job.audit(
                    "job-executed",
                    "capability call succeeded",
                    Some(json!({
                        "endpoint": endpoint,
                        "satoshisPaid": outcome.response.satoshis_paid,
                        "paymentTxid": outcome.payment_txid,
                    })),
                );

                if job.persist_result {
                    if !policy.decisions.write_memory_enabled {
                        job.memory_status = Some(MemoryStatus::Skipped);
                        job.status = JobStatus::Completed;
                        job.audit("job-completed", "memory writes disabled by policy", None);
                        self.finish(job, report, true);
                    } else if policy.decisions.require_human_approval_for_memory
                        && !opts.allow_memory_writes
                    {
                        job.memory_status = Some(MemoryStatus::PendingApproval);
                        job.status = JobStatus::NeedsApproval;
                        job.audit(
                            "memory-approval-required",
                            "result recorded; awaiting human approval",
                            None,
                        );
                        if let Err(e) = self.store.update(job) {
                            warn!(error = %e, "failed to persist approval-pending job");
                        }
                        report.awaiting_approval += 1;
                        self.events.log(
                            "router",
                            "memory-approval-required",
                            "job parked for approval",
                            None,
                        );
                    } else {
                        let result = outcome.response.result.clone();
                        match self.write_memory(&mut job, &result).await {
                            Ok(()) => {
                                job.status = JobStatus::Completed;
                                job.audit("job-completed", "result persisted to memory", None);
                                self.finish(job, report, true);
                            }
                            Err(reason) => {
                                job.error = Some(reason.clone());
                                job.status = JobStatus::Failed;
                                job.audit("job-failed", &reason, None);
                                self.finish(job, report, false);
                            }
                        }
                    }
                } else {
                    job.status = JobStatus::Completed;
                    job.audit("job-completed", "capability call succeeded", None);
                    self.finish(job, report, true);
                }
            }
            Err(e) => {
                if let Some(peer) = &hired_peer {
                    self.peers.record_failure(&peer.identity_key);
                }
                self.fail(job, &format!("call failed: {e}"), report);
            }
        }
    }

    fn fail(&self, mut job: BrainJob, reason: &str, report: &mut SweepReport) {
        job.error = Some(reason.to_string());
        job.status = JobStatus::Failed;
        job.audit("job-failed", reason, None);
        self.finish(job, report, false);
    }

    fn finish(&self, job: BrainJob, report: &mut SweepReport, completed: bool) {
        let id = job.id.clone();
        let capability = job.capability.clone();
        if completed {
            report.completed += 1;
        } else {
            report.failed += 1;
        }
        let action = if completed { "job-completed" } else { "job-failed" };
        if let Err(e) = self.store.update(job) {
            warn!(error = %e, "failed to persist job outcome");
        }
        info!(job = %id, capability = %capability, action, "job finished");
        self.events
            .log("router", action, &format!("job {id} ({capability})"), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FileMemoryWriter;
    use claw_wallet::DevWallet;
    use serde_json::json;

    fn template(cap: &str, every: Option<u64>) -> GoalTemplate {
        GoalTemplate {
            capability: cap.into(),
            params: json!({"hostname": "x.com", "type": "A"}),
            every_seconds: every,
            ..GoalTemplate::default()
        }
    }

    fn job_with(cap: &str, status: JobStatus, updated_at: DateTime<Utc>) -> BrainJob {
        BrainJob {
            id: "j-1".into(),
            created_at: updated_at,
            updated_at,
            status,
            strategy: JobStrategy::Auto,
            capability: cap.into(),
            params: json!({"hostname": "x.com", "type": "A"}),
            max_sats: 100,
            priority: 100,
            attempts: 0,
            selected_endpoint: None,
            persist_result: false,
            memory_key: None,
            memory_category: None,
            result: None,
            error: None,
            memory_status: None,
            memory_txid: None,
            audit: vec![],
        }
    }

    #[test]
    fn params_aliasing_per_capability() {
        let p = normalize_params("dns_resolve", &json!({"domain": "x.com", "type": "A"}));
        assert_eq!(p, json!({"hostname": "x.com", "type": "A"}));

        let p = normalize_params("peer_health_check", &json!({"peer": "http://a.example.com"}));
        assert_eq!(p, json!({"endpoint": "http://a.example.com"}));

        let p = normalize_params("fetch_url", &json!({"endpoint": "http://a.example.com"}));
        assert_eq!(p, json!({"url": "http://a.example.com"}));

        // An explicit target key wins over its alias.
        let p = normalize_params(
            "dns_resolve",
            &json!({"domain": "old.com", "hostname": "new.com"}),
        );
        assert_eq!(p, json!({"domain": "old.com", "hostname": "new.com"}));

        // Unknown capabilities pass through.
        let p = normalize_params("echo", &json!({"message": "hi"}));
        assert_eq!(p, json!({"message": "hi"}));
    }

    #[test]
    fn fingerprint_sees_through_aliases() {
        assert_eq!(
            goal_fingerprint("dns_resolve", &json!({"domain": "x.com", "type": "A"})),
            goal_fingerprint("dns_resolve", &json!({"hostname": "x.com", "type": "A"})),
        );
        assert_ne!(
            goal_fingerprint("dns_resolve", &json!({"hostname": "x.com", "type": "A"})),
            goal_fingerprint("dns_resolve", &json!({"hostname": "y.com", "type": "A"})),
        );
    }

    #[test]
    fn generation_skips_active_jobs() {
        let now = Utc::now();
        let tpl = template("dns_resolve", Some(900));
        for status in [JobStatus::Pending, JobStatus::Running, JobStatus::NeedsApproval] {
            let jobs = vec![job_with("dns_resolve", status, now)];
            assert!(!should_generate(&tpl, &jobs, now, 900), "{status:?}");
        }
    }

    #[test]
    fn generation_honors_cooldown() {
        let now = Utc::now();
        let tpl = template("dns_resolve", Some(900));

        // Fresh queue: generate.
        assert!(should_generate(&tpl, &[], now, 900));

        // Completed recently: cooldown.
        let jobs = vec![job_with(
            "dns_resolve",
            JobStatus::Completed,
            now - ChronoDuration::seconds(60),
        )];
        assert!(!should_generate(&tpl, &jobs, now, 900));

        // Cooldown elapsed: generate again.
        let jobs = vec![job_with(
            "dns_resolve",
            JobStatus::Completed,
            now - ChronoDuration::seconds(901),
        )];
        assert!(should_generate(&tpl, &jobs, now, 900));
    }

    #[test]
    fn disabled_template_never_generates() {
        let mut tpl = template("dns_resolve", None);
        tpl.enabled = Some(false);
        assert!(!should_generate(&tpl, &[], Utc::now(), 900));
    }

    fn test_router(store: Arc<JobStore>, policy: BrainPolicy, peers: Arc<PeerRegistry>) -> TaskRouter {
        let dir = tempfile::tempdir().unwrap();
        let wallet = Arc::new(DevWallet::generate());
        TaskRouter::new(
            store,
            Arc::new(PolicyStore::in_memory(policy)),
            Arc::new(EventLog::disabled()),
            peers,
            NodeClient::new(reqwest::Client::new(), wallet),
            Arc::new(FileMemoryWriter::at(&dir.path().join("memory-index.json"))),
            1, // port 1 never answers; tests below fail before or at the call
        )
    }

    #[tokio::test]
    async fn hire_without_candidate_fails_the_job() {
        let store = Arc::new(JobStore::in_memory());
        let peers = Arc::new(PeerRegistry::in_memory());
        let router = test_router(store.clone(), BrainPolicy::default(), peers);

        let mut input = JobInput {
            capability: "echo".into(),
            params: json!({"message": "hi"}),
            ..JobInput::default()
        };
        input.strategy = JobStrategy::Hire;
        let job = store.enqueue(input, 100).unwrap();

        let report = router.run_sweep(SweepOptions::default()).await;
        assert_eq!(report.examined, 1);
        assert_eq!(report.failed, 1);

        let job = store.get(&job.id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("no peer"));
        assert_eq!(job.attempts, 1);
        assert!(job.audit.iter().any(|a| a.action == "job-started"));
        assert!(job.audit.iter().any(|a| a.action == "job-failed"));
    }

    #[tokio::test]
    async fn hire_with_hiring_disabled_fails_fast() {
        let store = Arc::new(JobStore::in_memory());
        let mut policy = BrainPolicy::default();
        policy.decisions.hire_enabled = false;
        let router = test_router(store.clone(), policy, Arc::new(PeerRegistry::in_memory()));

        let mut input = JobInput {
            capability: "echo".into(),
            params: json!({"message": "hi"}),
            ..JobInput::default()
        };
        input.strategy = JobStrategy::Hire;
        let job = store.enqueue(input, 100).unwrap();

        router.run_sweep(SweepOptions::default()).await;
        let job = store.get(&job.id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn allowlist_blocks_unlisted_capability() {
        let store = Arc::new(JobStore::in_memory());
        let mut policy = BrainPolicy::default();
        policy.decisions.auto_hire_capabilities = vec!["dns_resolve".into()];
        let router = test_router(store.clone(), policy, Arc::new(PeerRegistry::in_memory()));

        let mut input = JobInput {
            capability: "echo".into(),
            params: json!({"message": "hi"}),
            ..JobInput::default()
        };
        input.strategy = JobStrategy::Hire;
        let job = store.enqueue(input, 100).unwrap();

        router.run_sweep(SweepOptions::default()).await;
        let job = store.get(&job.id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("allowlist"));
    }

    #[tokio::test]
    async fn approval_sweep_without_permission_leaves_job_parked() {
        let store = Arc::new(JobStore::in_memory());
        let router = test_router(
            store.clone(),
            BrainPolicy::default(),
            Arc::new(PeerRegistry::in_memory()),
        );

        let mut job = store
            .enqueue(
                JobInput {
                    capability: "echo".into(),
                    params: json!({"message": "hi"}),
                    persist_result: true,
                    ..JobInput::default()
                },
                100,
            )
            .unwrap();
        job.status = JobStatus::NeedsApproval;
        job.result = Some(json!({"message": "hi"}));
        job.memory_status = Some(MemoryStatus::PendingApproval);
        store.update(job.clone()).unwrap();

        let report = router.run_sweep(SweepOptions::default()).await;
        assert_eq!(report.awaiting_approval, 1);
        assert_eq!(store.get(&job.id).unwrap().status, JobStatus::NeedsApproval);

        // With approval the memory write lands and the job completes.
        let report = router
            .run_sweep(SweepOptions {
                allow_memory_writes: true,
                limit: None,
            })
            .await;
        assert_eq!(report.completed, 1);
        let done = store.get(&job.id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.memory_status, Some(MemoryStatus::Written));
        assert!(done.memory_txid.is_some());
        assert!(done.audit.iter().any(|a| a.action == "memory-written"));
        assert!(done.audit.iter().any(|a| a.action == "job-completed"));
    }
}
