//! Agent runner: the claim → process → commit loop for one capability.
//!
//! ```text
//!   acquire batch ──▶ for each lease:
//!                       process(item)  (own task, call timeout, panic guard)
//!                           │
//!            ┌──────────────┼──────────────┬──────────────┐
//!         Success       Rejected       Retryable       Terminal
//!            │              │              │              │
//!       next status     rejected    same status +    *_failed
//!                                   not_before, or
//!                                   *_failed at ceiling
//!                           │
//!                 commit (CAS guarded by lease owner)
//!                 Conflict/NotFound → counted as lost
//! ```
//!
//! Two modes: [`AgentRunner::run_bounded`] stops after `max_items` (or
//! when nothing is claimable) and returns a [`RunReport`];
//! [`AgentRunner::run_daemon`] polls until its [`CancellationToken`] fires.
//! Cancellation lets the in-flight item finish and commit, then releases
//! every lease in the batch that was not started.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use radio_cortex_core::clock::{duration_millis, Clock};
use radio_cortex_core::error::StoreError;
use radio_cortex_core::models::{Capability, Item, Lease, Status};
use radio_cortex_core::pipeline;
use radio_cortex_core::store::{CatalogStore, Transition};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agents::{Agent, Outcome};
use crate::config::Config;
use crate::lease::LeaseManager;

/// Timing and retry knobs for one runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPolicy {
    pub batch_size: usize,
    pub lease_duration: Duration,
    pub call_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
}

impl RunPolicy {
    pub fn from_config(config: &Config, capability: Capability) -> Self {
        let p = &config.pipeline;
        Self {
            batch_size: p.batch_size,
            lease_duration: p.lease_duration(),
            call_timeout: p.call_timeout(),
            max_attempts: config.max_attempts(capability),
            backoff_base: Duration::from_secs(p.backoff_base_secs),
            backoff_max: Duration::from_secs(p.backoff_max_secs),
            poll_interval: p.poll_interval(),
            sweep_interval: p.sweep_interval(),
        }
    }

    /// Delay before the next try after `attempts` failures:
    /// `base × 2^(attempts-1)`, capped at `backoff_max`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exp)
            .map(|d| d.min(self.backoff_max))
            .unwrap_or(self.backoff_max)
    }
}

/// Tally of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub capability: Option<Capability>,
    pub dry_run: bool,
    pub claimed: u64,
    pub succeeded: u64,
    pub rejected: u64,
    pub retried: u64,
    pub failed: u64,
    pub lost: u64,
    /// Most recent error per item that did not succeed.
    pub errors: BTreeMap<String, String>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(cap) = self.capability {
            write!(f, "run {}", cap)?;
        } else {
            write!(f, "run")?;
        }
        if self.dry_run {
            write!(f, " (dry run)")?;
        }
        writeln!(f)?;
        writeln!(f, "  claimed:   {}", self.claimed)?;
        writeln!(f, "  succeeded: {}", self.succeeded)?;
        writeln!(f, "  rejected:  {}", self.rejected)?;
        writeln!(f, "  retried:   {}", self.retried)?;
        writeln!(f, "  failed:    {}", self.failed)?;
        write!(f, "  lost:      {}", self.lost)?;
        for (id, err) in &self.errors {
            write!(f, "\n  {}: {}", id, err)?;
        }
        Ok(())
    }
}

/// How a decided transition is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Succeeded,
    Rejected,
    Retried,
    Failed,
}

pub struct AgentRunner {
    agent: Arc<dyn Agent>,
    leases: LeaseManager,
    clock: Arc<dyn Clock>,
    capability: Capability,
    status: Status,
    policy: RunPolicy,
}

/// Lease owner for a runner process: capability, pid and a random suffix.
pub fn default_owner(capability: Capability) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", capability, std::process::id(), &suffix[..8])
}

impl AgentRunner {
    /// Fails with `Capability` when the agent may not consume `status`.
    pub fn new(
        agent: Arc<dyn Agent>,
        store: Arc<dyn CatalogStore>,
        clock: Arc<dyn Clock>,
        owner: impl Into<String>,
        status: Status,
        policy: RunPolicy,
    ) -> Result<Self, StoreError> {
        let capability = agent.capability();
        pipeline::authorize(capability, status)?;
        Ok(Self {
            leases: LeaseManager::new(store, clock.clone(), owner),
            agent,
            clock,
            capability,
            status,
            policy,
        })
    }

    pub fn owner(&self) -> &str {
        self.leases.owner()
    }

    /// Process at most `max_items` items, then return.
    ///
    /// With `dry_run`, a single batch is claimed and processed, outcomes are
    /// tallied as if committed, and every lease is released untouched.
    pub async fn run_bounded(
        &self,
        max_items: usize,
        dry_run: bool,
    ) -> Result<RunReport, StoreError> {
        let mut report = self.new_report(dry_run);
        self.leases.expire_sweep().await?;

        if dry_run {
            let leases = self
                .leases
                .acquire(self.capability, self.status, max_items, self.policy.lease_duration)
                .await?;
            report.claimed += leases.len() as u64;
            for lease in &leases {
                let outcome = self.invoke(&lease.item).await;
                let (transition, disposition) = self.decide(&lease.item, outcome);
                record(&mut report, &lease.item.id, &transition, disposition);
                self.release_quietly(lease).await;
            }
            return Ok(report);
        }

        let mut remaining = max_items;
        while remaining > 0 {
            let leases = self
                .leases
                .acquire(
                    self.capability,
                    self.status,
                    remaining.min(self.policy.batch_size),
                    self.policy.lease_duration,
                )
                .await?;
            if leases.is_empty() {
                break;
            }
            remaining = remaining.saturating_sub(leases.len());
            self.run_batch(leases, &mut report, None).await?;
        }

        info!(
            capability = %self.capability,
            owner = %self.owner(),
            claimed = report.claimed,
            succeeded = report.succeeded,
            failed = report.failed,
            "bounded run finished"
        );
        Ok(report)
    }

    /// Poll until `cancel` fires, sweeping expired leases every
    /// `sweep_interval`. Backend errors are logged and polling continues;
    /// anything else ends the run.
    pub async fn run_daemon(&self, cancel: CancellationToken) -> Result<RunReport, StoreError> {
        let mut report = self.new_report(false);
        let mut last_sweep: Option<tokio::time::Instant> = None;
        info!(
            capability = %self.capability,
            owner = %self.owner(),
            status = %self.status,
            "daemon started"
        );

        while !cancel.is_cancelled() {
            if last_sweep.map_or(true, |t| t.elapsed() >= self.policy.sweep_interval) {
                if let Err(e) = self.leases.expire_sweep().await {
                    error!(error = %e, "lease sweep failed");
                }
                last_sweep = Some(tokio::time::Instant::now());
            }

            let leases = match self
                .leases
                .acquire(
                    self.capability,
                    self.status,
                    self.policy.batch_size,
                    self.policy.lease_duration,
                )
                .await
            {
                Ok(leases) => leases,
                Err(StoreError::Backend(e)) => {
                    error!(error = %e, "acquire failed");
                    Vec::new()
                }
                Err(e) => return Err(e),
            };

            if leases.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.policy.poll_interval) => {}
                }
                continue;
            }

            match self.run_batch(leases, &mut report, Some(&cancel)).await {
                Ok(()) => {}
                Err(StoreError::Backend(e)) => error!(error = %e, "commit failed"),
                Err(e) => return Err(e),
            }
        }

        info!(
            capability = %self.capability,
            owner = %self.owner(),
            claimed = report.claimed,
            "daemon stopped"
        );
        Ok(report)
    }

    fn new_report(&self, dry_run: bool) -> RunReport {
        RunReport {
            capability: Some(self.capability),
            dry_run,
            ..RunReport::default()
        }
    }

    /// Process and commit each lease in order. On cancellation or a fatal
    /// commit error, leases not yet started are released.
    async fn run_batch(
        &self,
        leases: Vec<Lease>,
        report: &mut RunReport,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), StoreError> {
        report.claimed += leases.len() as u64;
        let mut pending = leases.into_iter();

        while let Some(lease) = pending.next() {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                self.release_quietly(&lease).await;
                for rest in pending.by_ref() {
                    self.release_quietly(&rest).await;
                }
                break;
            }

            if let Err(e) = self.process_lease(&lease, report).await {
                self.release_quietly(&lease).await;
                for rest in pending.by_ref() {
                    self.release_quietly(&rest).await;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn process_lease(&self, lease: &Lease, report: &mut RunReport) -> Result<(), StoreError> {
        let item_id = lease.item_id();
        let outcome = self.invoke(&lease.item).await;
        let (transition, disposition) = self.decide(&lease.item, outcome);

        match self.leases.commit(self.capability, lease, &transition).await {
            Ok(item) => {
                debug!(item_id, from = %lease.item.status, to = %item.status, "committed");
                if disposition == Disposition::Failed {
                    warn!(
                        item_id,
                        capability = %self.capability,
                        status = %item.status,
                        error = item.last_error.as_deref().unwrap_or(""),
                        "item failed"
                    );
                }
                record(report, item_id, &transition, disposition);
                Ok(())
            }
            Err(e) if e.is_lost_item() => {
                warn!(item_id, owner = %self.owner(), error = %e, "lost item before commit");
                report.lost += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Run the agent in its own task so a panic or a hung collaborator
    /// cannot take the runner down with it.
    async fn invoke(&self, item: &Item) -> Outcome {
        let agent = self.agent.clone();
        let owned = item.clone();
        let mut handle = tokio::spawn(async move { agent.process(&owned).await });

        match tokio::time::timeout(self.policy.call_timeout, &mut handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) if join_err.is_panic() => {
                let msg = panic_message(join_err.into_panic());
                error!(item_id = %item.id, panic = %msg, "agent panicked");
                Outcome::Terminal(format!("agent panicked: {}", msg))
            }
            Ok(Err(join_err)) => Outcome::Retryable(format!("agent task cancelled: {}", join_err)),
            Err(_) => {
                handle.abort();
                Outcome::Retryable(format!(
                    "timed out after {}s",
                    self.policy.call_timeout.as_secs_f64()
                ))
            }
        }
    }

    /// Map an outcome onto the transition to commit.
    fn decide(&self, item: &Item, outcome: Outcome) -> (Transition, Disposition) {
        let cap = self.capability;
        let failed = pipeline::failed_status(cap);
        match outcome {
            Outcome::Success(patch) => (
                Transition::advance(pipeline::success_status(cap), cap, patch),
                Disposition::Succeeded,
            ),
            Outcome::Rejected(reason) => match pipeline::rejected_status(cap) {
                Some(_) => (Transition::reject(reason), Disposition::Rejected),
                None => (Transition::fail(failed, cap, reason), Disposition::Failed),
            },
            Outcome::Retryable(reason) => {
                let attempts = item.attempts_for(cap) + 1;
                if attempts < self.policy.max_attempts {
                    let not_before = self
                        .clock
                        .now_millis()
                        .saturating_add(duration_millis(self.policy.backoff(attempts)));
                    (
                        Transition::retry(item.status, cap, not_before, reason),
                        Disposition::Retried,
                    )
                } else {
                    (
                        Transition::fail(
                            failed,
                            cap,
                            format!("{} (gave up after {} attempts)", reason, attempts),
                        ),
                        Disposition::Failed,
                    )
                }
            }
            Outcome::Terminal(reason) => {
                (Transition::fail(failed, cap, reason), Disposition::Failed)
            }
        }
    }

    async fn release_quietly(&self, lease: &Lease) {
        if let Err(e) = self.leases.release(lease).await {
            debug!(item_id = %lease.item_id(), error = %e, "release failed");
        }
    }
}

/// Command-line overrides for `cortex run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub max_items: usize,
    pub dry_run: bool,
    pub daemon: bool,
    pub batch_size: Option<usize>,
    pub lease_secs: Option<u64>,
    pub poll_secs: Option<u64>,
    pub owner: Option<String>,
}

/// `cortex run <capability>`
pub async fn run_agent(
    config: &Config,
    store: Arc<dyn CatalogStore>,
    clock: Arc<dyn Clock>,
    capability: Capability,
    opts: RunOptions,
) -> anyhow::Result<()> {
    let mut policy = RunPolicy::from_config(config, capability);
    if let Some(n) = opts.batch_size {
        anyhow::ensure!(n > 0, "--batch-size must be >= 1");
        policy.batch_size = n;
    }
    if let Some(secs) = opts.lease_secs {
        policy.lease_duration = Duration::from_secs(secs);
    }
    if let Some(secs) = opts.poll_secs {
        anyhow::ensure!(secs > 0, "--poll-secs must be > 0");
        policy.poll_interval = Duration::from_secs(secs);
    }
    anyhow::ensure!(
        policy.lease_duration > policy.call_timeout,
        "lease ({}s) must be longer than the call timeout ({}s)",
        policy.lease_duration.as_secs(),
        policy.call_timeout.as_secs()
    );

    let status = config.consumes(capability)?;
    let agent = crate::agents::create_agent(config, capability, store.dims())?;
    let owner = opts.owner.unwrap_or_else(|| default_owner(capability));
    let runner = AgentRunner::new(agent, store, clock, owner, status, policy)?;

    if opts.daemon {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested, finishing in-flight item");
                on_signal.cancel();
            }
        });
        let report = runner.run_daemon(cancel).await?;
        println!("{}", report);
    } else {
        let report = runner.run_bounded(opts.max_items, opts.dry_run).await?;
        println!("{}", report);
    }
    println!("ok");
    Ok(())
}

fn record(
    report: &mut RunReport,
    item_id: &str,
    transition: &Transition,
    disposition: Disposition,
) {
    match disposition {
        Disposition::Succeeded => {
            report.succeeded += 1;
            report.errors.remove(item_id);
            return;
        }
        Disposition::Rejected => report.rejected += 1,
        Disposition::Retried => report.retried += 1,
        Disposition::Failed => report.failed += 1,
    }
    if let Some(err) = &transition.last_error {
        report.errors.insert(item_id.to_string(), err.clone());
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
