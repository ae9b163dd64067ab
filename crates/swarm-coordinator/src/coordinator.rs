use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use swarm_audit::AuditLog;
use swarm_cas::{get_cas_store, CasStore};
use swarm_challenge::{AbuseDetector, ChallengeQueue, ChallengeWindows};
use swarm_clock::LamportClock;
use swarm_consensus::{open_register, DecideRegister, EpochManager, QuorumTracker};
use swarm_core::types::TaskId;
use swarm_core::{SwarmError, Verb};
use swarm_crypto::{KeyPair, Keystore};
use swarm_economics::{
    CreditLedger, PayoutDistributor, RelationshipDetector, ReputationTracker, SlashingRules,
    VerifierPool,
};
use swarm_lease::{Lease, LeaseManager, LeaseMonitor, ReleasePublisher, ReleaseReason};
use swarm_plan::PlanLog;
use swarm_policy::{strip_bypass_env, Envelope, GateEnforcer};

use crate::transport::{thread_subject, Transport};

/// Filesystem layout and identity for one coordinator process.
pub struct CoordinatorConfig {
    pub state_dir: PathBuf,
    pub cas_dir: PathBuf,
    pub log_dir: PathBuf,
    pub keys_dir: PathBuf,
    pub agent_id: String,
}

impl CoordinatorConfig {
    /// Read the standard environment (`SWARM_STATE_DIR` etc.), falling back
    /// to the conventional relative paths.
    pub fn from_env(agent_id: &str) -> Self {
        let var = |name: &str, default: &str| {
            PathBuf::from(std::env::var(name).unwrap_or_else(|_| default.into()))
        };
        Self {
            state_dir: var("SWARM_STATE_DIR", ".state"),
            cas_dir: var("SWARM_CAS_DIR", ".cas"),
            log_dir: var("SWARM_LOG_DIR", "logs"),
            keys_dir: var("SWARM_KEYS_DIR", ".keys"),
            agent_id: agent_id.to_string(),
        }
    }
}

/// The verb pipeline: owns every core component and routes envelopes
/// through policy, the plan log, consensus, leases, challenges, and the
/// ledger.
pub struct Coordinator {
    pub plan: Arc<PlanLog>,
    pub register: Arc<dyn DecideRegister>,
    pub register_replicated: bool,
    pub epochs: Arc<EpochManager>,
    pub quorum: Arc<QuorumTracker>,
    pub leases: Arc<LeaseManager>,
    pub windows: Arc<ChallengeWindows>,
    pub challenge_queue: Arc<ChallengeQueue>,
    pub abuse: Arc<AbuseDetector>,
    pub ledger: Arc<CreditLedger>,
    pub pool: Arc<VerifierPool>,
    pub reputation: Arc<ReputationTracker>,
    pub relationships: Arc<RelationshipDetector>,
    pub payouts: Arc<PayoutDistributor>,
    pub slashing: SlashingRules,
    pub gate: Arc<GateEnforcer>,
    pub audit: Arc<AuditLog>,
    pub clock: Arc<LamportClock>,
    pub cas: Arc<dyn CasStore>,
    pub cas_is_ipfs: bool,
    pub keypair: Arc<KeyPair>,
    pub transport: Arc<dyn Transport>,
    /// Per-task K_result, escalated on upheld challenges.
    pub(crate) k_result: Mutex<HashMap<TaskId, u32>>,
    /// Upheld-challenge count per task, driving the escalation curve.
    pub(crate) upheld_challenges: Mutex<HashMap<TaskId, u32>>,
}

impl Coordinator {
    /// Wire the whole core from a config. Strips policy-bypass environment
    /// variables before anything else reads the environment.
    pub async fn open(
        config: &CoordinatorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>, SwarmError> {
        strip_bypass_env();

        let keystore = Keystore::open(&config.keys_dir)?;
        let keypair = Arc::new(keystore.load_or_create(&config.agent_id)?);

        let clock = Arc::new(LamportClock::open(config.state_dir.join("lamport.json"))?);
        let plan = Arc::new(PlanLog::open(config.state_dir.join("plan.db"))?);
        let epochs = Arc::new(EpochManager::open(
            config.state_dir.join("epochs.db"),
            &config.agent_id,
        )?);
        let (register, register_replicated) =
            open_register(config.state_dir.join("decides.db"), Arc::clone(&epochs))?;
        let leases = Arc::new(LeaseManager::open(config.state_dir.join("leases.db"))?);
        let windows = Arc::new(ChallengeWindows::open(
            config.state_dir.join("challenge_windows.db"),
        )?);
        let challenge_queue = Arc::new(ChallengeQueue::open(
            config.state_dir.join("challenge_queue.db"),
        )?);
        let ledger = Arc::new(CreditLedger::open(config.state_dir.join("ledger.db"))?);

        let (cas, cas_is_ipfs) = get_cas_store(&config.cas_dir).await?;
        let gate = Arc::new(GateEnforcer::new(Some(Arc::clone(&cas))));
        let audit = Arc::new(AuditLog::open(&config.log_dir, Arc::clone(&keypair))?);

        let pool = Arc::new(VerifierPool::new());
        let reputation = Arc::new(ReputationTracker::new(Arc::clone(&pool)));
        let relationships = Arc::new(RelationshipDetector::new());
        let payouts = Arc::new(PayoutDistributor::new(
            Arc::clone(&ledger),
            Arc::clone(&relationships),
        ));
        let slashing = SlashingRules::new(Arc::clone(&ledger));

        info!(
            agent_id = %config.agent_id,
            cas_is_ipfs,
            register_replicated,
            "coordinator ready"
        );

        Ok(Arc::new(Self {
            plan,
            register,
            register_replicated,
            epochs,
            quorum: Arc::new(QuorumTracker::new()),
            leases,
            windows,
            challenge_queue,
            abuse: Arc::new(AbuseDetector::new()),
            ledger,
            pool,
            reputation,
            relationships,
            payouts,
            slashing,
            gate,
            audit,
            clock,
            cas,
            cas_is_ipfs,
            keypair,
            transport,
            k_result: Mutex::new(HashMap::new()),
            upheld_challenges: Mutex::new(HashMap::new()),
        }))
    }

    // ── Envelope intake ──────────────────────────────────────────────────────

    /// The single entry point for every envelope, wherever it came from.
    /// Ingress validation runs here, before any handler — calling a handler
    /// without passing this gate is not possible from outside the crate.
    pub async fn handle_envelope(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        self.clock.observe(envelope.lamport)?;

        let decision = self.gate.ingress_validate(envelope).await;
        if !decision.allowed {
            let reasons = decision.reasons.join("; ");
            self.audit.log_event(
                &envelope.thread_id,
                &thread_subject(&envelope.thread_id, "policy"),
                "POLICY.REJECT",
                &json!({
                    "envelope_id": envelope.id.clone(),
                    "kind": envelope.kind,
                    "reasons": decision.reasons.clone(),
                }),
            )?;
            warn!(kind = %envelope.kind, reasons = %reasons, "envelope rejected at ingress");
            return Err(SwarmError::PolicyRejection(reasons));
        }

        self.audit.log_event(
            &envelope.thread_id,
            &thread_subject(&envelope.thread_id, "ingress"),
            "BUS.DELIVER",
            &envelope.to_value(),
        )?;

        self.dispatch(envelope).await
    }

    /// Exhaustive dispatch over the closed verb set.
    pub(crate) async fn dispatch(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        match envelope.kind {
            Verb::Need => self.handle_need(envelope).await,
            Verb::Propose => self.handle_propose(envelope).await,
            Verb::Claim => self.handle_claim(envelope).await,
            Verb::ClaimExtended => self.handle_claim_extended(envelope).await,
            Verb::Commit => self.handle_commit(envelope).await,
            Verb::Attest | Verb::AttestPlan => self.handle_attest(envelope).await,
            Verb::Decide => self.handle_decide(envelope).await,
            Verb::Finalize => self.handle_finalize(envelope).await,
            Verb::Yield => self.handle_yield(envelope).await,
            Verb::Release => self.handle_release(envelope).await,
            Verb::Challenge => self.handle_challenge(envelope).await,
            Verb::Invalidate => self.handle_invalidate(envelope).await,
            Verb::Reconcile => self.handle_reconcile(envelope).await,
            Verb::Checkpoint => self.handle_checkpoint(envelope).await,
            Verb::UpdatePlan => self.handle_update_plan(envelope).await,
        }
    }

    // ── Publishing ───────────────────────────────────────────────────────────

    /// Build, sign, audit, and publish an envelope under this
    /// coordinator's identity.
    pub async fn publish(
        &self,
        kind: Verb,
        thread_id: &str,
        role: &str,
        payload: serde_json::Value,
    ) -> Result<Envelope, SwarmError> {
        let envelope = Envelope::build(kind, thread_id, payload, &self.keypair, &self.clock)?;
        let signed = swarm_policy::sign_envelope(&envelope, &self.keypair)?;

        let preflight = self.gate.preflight_validate(&signed);
        if !preflight.allowed {
            return Err(SwarmError::PolicyRejection(preflight.reasons.join("; ")));
        }

        let subject = thread_subject(thread_id, role);
        self.audit
            .log_event(thread_id, &subject, "BUS.PUBLISH", &signed.to_value())?;
        self.transport
            .publish_envelope(thread_id, &subject, &signed)
            .await?;
        Ok(signed)
    }

    /// Run the intake loop: subscribe to the transport and handle every
    /// envelope until the channel closes.
    pub async fn run(self: &Arc<Self>) {
        let mut rx = self.transport.subscribe();
        info!("coordinator listening");
        while let Ok((subject, envelope)) = rx.recv().await {
            if let Err(e) = self.handle_envelope(&envelope).await {
                warn!(subject = %subject, error = %e, "envelope handling failed");
            }
        }
    }

    /// Start the lease monitor against this coordinator's transport.
    pub fn spawn_lease_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let publisher = Arc::new(CoordinatorReleasePublisher {
            coordinator: Arc::clone(self),
        });
        LeaseMonitor::new(Arc::clone(&self.leases), publisher).spawn()
    }

    /// One lease scan outside the monitor loop. Returns how many leases
    /// were released.
    pub async fn check_leases_once(self: &Arc<Self>) -> Result<usize, SwarmError> {
        let publisher = Arc::new(CoordinatorReleasePublisher {
            coordinator: Arc::clone(self),
        });
        LeaseMonitor::new(Arc::clone(&self.leases), publisher)
            .check_expired_leases()
            .await
    }

    // ── K_result bookkeeping ─────────────────────────────────────────────────

    pub fn k_result_for(&self, task_id: &str) -> u32 {
        self.k_result
            .lock()
            .expect("k_result lock poisoned")
            .get(task_id)
            .copied()
            .unwrap_or(1)
    }
}

/// Lease-monitor publisher: RELEASE envelopes go through the full
/// publish path (signed, audited, policy-checked) like any other verb.
struct CoordinatorReleasePublisher {
    coordinator: Arc<Coordinator>,
}

#[async_trait]
impl ReleasePublisher for CoordinatorReleasePublisher {
    async fn publish_release(
        &self,
        lease: &Lease,
        reason: ReleaseReason,
    ) -> Result<(), SwarmError> {
        self.coordinator
            .publish(
                Verb::Release,
                &lease.task_id,
                "worker",
                json!({
                    "task_id": lease.task_id.clone(),
                    "lease_id": lease.lease_id.clone(),
                    "worker_id": lease.worker_id.clone(),
                    "reason": reason.as_str(),
                }),
            )
            .await?;
        Ok(())
    }
}
