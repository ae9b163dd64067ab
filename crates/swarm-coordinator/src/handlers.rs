//! Verb handlers.
//!
//! Each handler mutates only the components its verb owns: plan log
//! appends, consensus attempts, lease bookkeeping, challenge intake,
//! slashing effects. STATE=DECIDED is produced only by the DECIDE path —
//! CLAIM_EXTENDED routes through the register and never writes task state
//! directly.

use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use swarm_consensus::{escalate_k_result, k_plan_with_bootstrap, mark_orphaned, DecideRecord};
use swarm_core::constants::{
    CHALLENGE_WINDOW_SECS, DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_LEASE_TTL_SECS,
};
use swarm_core::types::TaskState;
use swarm_core::{now_ns, SwarmError};
use swarm_challenge::{bond_for, ComplexityLevel, ProofSchema, ProofType};
use swarm_plan::{OpType, PlanOp};
use swarm_policy::Envelope;

use crate::coordinator::Coordinator;
use crate::transport::thread_subject;

/// Window extension granted when a valid challenge lands (seconds).
const CHALLENGE_EXTENSION_SECS: u64 = 3_600;

fn field<'a>(envelope: &'a Envelope, key: &'static str) -> Result<&'a str, SwarmError> {
    envelope.payload[key]
        .as_str()
        .ok_or(SwarmError::MissingField(key))
}

fn field_or_thread<'a>(envelope: &'a Envelope, key: &str) -> &'a str {
    envelope.payload[key]
        .as_str()
        .unwrap_or(&envelope.thread_id)
}

impl Coordinator {
    // ── NEED ─────────────────────────────────────────────────────────────────

    /// Root request: a new task is born DRAFT in the plan log.
    pub(crate) async fn handle_need(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let task_id = field_or_thread(envelope, "need_id");
        let op = PlanOp::new(
            envelope.thread_id.as_str(),
            envelope.lamport,
            envelope.sender_pk_b64.as_str(),
            OpType::AddTask,
            task_id,
            envelope.payload.clone(),
        );
        self.plan.append_op(&op).await?;
        info!(task_id, thread_id = %envelope.thread_id, "NEED recorded");
        Ok(())
    }

    // ── PROPOSE ──────────────────────────────────────────────────────────────

    /// A planner's ordered plan for a need: the proposal is annotated on
    /// the need and each plan step becomes a DRAFT task linked under it.
    pub(crate) async fn handle_propose(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let proposal_id = field(envelope, "proposal_id")?;
        let need_id = field_or_thread(envelope, "need_id");

        let mut proposal_fields = serde_json::Map::new();
        proposal_fields.insert(format!("proposal:{proposal_id}"), envelope.payload.clone());
        self.plan
            .annotate_task(
                need_id,
                &envelope.thread_id,
                envelope.lamport,
                &envelope.sender_pk_b64,
                Value::Object(proposal_fields),
            )
            .await?;

        if let Some(steps) = envelope.payload["plan"].as_array() {
            for step in steps {
                let Some(task_id) = step["task_id"].as_str() else {
                    continue;
                };
                let add = PlanOp::new(
                    envelope.thread_id.as_str(),
                    envelope.lamport,
                    envelope.sender_pk_b64.as_str(),
                    OpType::AddTask,
                    task_id,
                    json!({"type": step["type"], "proposal_id": proposal_id}),
                );
                self.plan.append_op(&add).await?;
                let link = PlanOp::new(
                    envelope.thread_id.as_str(),
                    envelope.lamport,
                    envelope.sender_pk_b64.as_str(),
                    OpType::Link,
                    task_id,
                    json!({"parent": need_id, "child": task_id}),
                );
                self.plan.append_op(&link).await?;
            }
        }
        info!(need_id, proposal_id, "PROPOSE recorded");
        Ok(())
    }

    // ── CLAIM ────────────────────────────────────────────────────────────────

    /// A worker takes a task under lease.
    pub(crate) async fn handle_claim(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let task_id = field(envelope, "task_id")?;
        let worker_id = envelope.payload["worker_id"]
            .as_str()
            .unwrap_or(&envelope.sender_pk_b64);
        let ttl = envelope.payload["lease_ttl"]
            .as_u64()
            .unwrap_or(DEFAULT_LEASE_TTL_SECS);
        let heartbeat = envelope.payload["heartbeat_interval"]
            .as_u64()
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS);

        let lease = self.leases.create_lease(task_id, worker_id, ttl, heartbeat)?;
        self.plan
            .annotate_task(
                task_id,
                &envelope.thread_id,
                envelope.lamport,
                &envelope.sender_pk_b64,
                json!({"claim": {
                    "worker_id": worker_id,
                    "lease_id": lease.lease_id,
                    "lease_ttl": ttl,
                }}),
            )
            .await?;
        Ok(())
    }

    /// CLAIM_EXTENDED: a claim that also asks for the need to be decided.
    /// It is strictly an intent to trigger DECIDE — a proposal must already
    /// exist in the plan log, and the STATE op comes from the DECIDE path.
    pub(crate) async fn handle_claim_extended(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let task_id = field(envelope, "task_id")?;
        let need_id = field(envelope, "need_id")?;
        let proposal_id = field(envelope, "proposal_id")?;

        let annotations = self.plan.get_annotations(need_id).await?;
        if !annotations.contains_key(&format!("proposal:{proposal_id}")) {
            return Err(SwarmError::PolicyRejection(format!(
                "CLAIM_EXTENDED requires a prior PROPOSE for proposal {proposal_id}"
            )));
        }

        self.handle_claim(envelope).await?;

        let epoch = envelope.payload["epoch"]
            .as_u64()
            .unwrap_or_else(|| self.epochs.current_epoch());
        let k = k_plan_with_bootstrap(self.pool.active_count());
        let decided = self
            .attempt_decide(need_id, proposal_id, epoch, envelope.lamport, k, &envelope.thread_id)
            .await?;
        if decided.is_none() {
            warn!(need_id, proposal_id, task_id, "CLAIM_EXTENDED lost the DECIDE race");
        }
        Ok(())
    }

    // ── COMMIT ───────────────────────────────────────────────────────────────

    /// A worker binds its result: the artifact hash was already checked
    /// against the CAS at the ingress gate.
    pub(crate) async fn handle_commit(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let task_id = field(envelope, "task_id")?;
        let artifact_hash = field(envelope, "artifact_hash")?;
        let commit_id = envelope.payload["commit_id"].as_str().unwrap_or(&envelope.id);

        self.plan
            .annotate_task(
                task_id,
                &envelope.thread_id,
                envelope.lamport,
                &envelope.sender_pk_b64,
                json!({"commit": {
                    "commit_id": commit_id,
                    "artifact_hash": artifact_hash,
                    "worker": envelope.sender_pk_b64.clone(),
                }}),
            )
            .await?;
        info!(task_id, artifact_hash, "COMMIT recorded");
        Ok(())
    }

    // ── ATTEST ───────────────────────────────────────────────────────────────

    /// A verifier endorses a commit. When this attestation completes
    /// K_plan for the (need, proposal), the coordinator attempts the
    /// atomic DECIDE.
    pub(crate) async fn handle_attest(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let need_id = field(envelope, "need_id")?;
        let proposal_id = field(envelope, "proposal_id")?;
        let verifier_id = envelope.payload["verifier_id"]
            .as_str()
            .unwrap_or(&envelope.sender_pk_b64);
        let verdict = envelope.payload["verdict"].as_str().unwrap_or("approved");

        let mut attest_fields = serde_json::Map::new();
        attest_fields.insert(format!("attest:{verifier_id}"), envelope.payload.clone());
        self.plan
            .annotate_task(
                field_or_thread(envelope, "task_id"),
                &envelope.thread_id,
                envelope.lamport,
                &envelope.sender_pk_b64,
                Value::Object(attest_fields),
            )
            .await?;

        if verdict != "approved" {
            return Ok(());
        }
        self.reputation.touch(verifier_id);

        let k = k_plan_with_bootstrap(self.pool.active_count());
        let completed = self
            .quorum
            .record_attestation(need_id, proposal_id, verifier_id, k);
        if completed {
            info!(need_id, proposal_id, k, "quorum reached, attempting DECIDE");
            self.attempt_decide(need_id, proposal_id, self.epochs.current_epoch(), envelope.lamport, k, &envelope.thread_id)
                .await?;
        }
        Ok(())
    }

    // ── DECIDE ───────────────────────────────────────────────────────────────

    /// Explicit DECIDE request. Conflicts surface to the sender.
    pub(crate) async fn handle_decide(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let need_id = field(envelope, "need_id")?;
        let proposal_id = field(envelope, "proposal_id")?;
        let epoch = envelope.payload["epoch"]
            .as_u64()
            .unwrap_or_else(|| self.epochs.current_epoch());
        let k = envelope.payload["k_plan"]
            .as_u64()
            .map(|k| k as u32)
            .unwrap_or_else(|| k_plan_with_bootstrap(self.pool.active_count()));

        match self
            .attempt_decide(need_id, proposal_id, epoch, envelope.lamport, k, &envelope.thread_id)
            .await?
        {
            Some(_) => Ok(()),
            None => {
                let existing = self
                    .register
                    .get_decide(need_id)?
                    .map(|r| r.proposal_id)
                    .unwrap_or_else(|| "<stale epoch>".into());
                Err(SwarmError::ConsensusConflict {
                    need_id: need_id.to_string(),
                    existing_proposal: existing,
                })
            }
        }
    }

    /// Atomic DECIDE plus its plan-log effects. The only code path that
    /// writes STATE=DECIDED.
    pub(crate) async fn attempt_decide(
        &self,
        need_id: &str,
        proposal_id: &str,
        epoch: u64,
        lamport: u64,
        k_plan: u32,
        thread_id: &str,
    ) -> Result<Option<DecideRecord>, SwarmError> {
        let record = DecideRecord {
            need_id: need_id.to_string(),
            proposal_id: proposal_id.to_string(),
            epoch,
            lamport,
            k_plan,
            decider_id: self.keypair.agent_id.clone(),
            timestamp_ns: now_ns(),
        };
        self.audit.log_event(
            thread_id,
            &thread_subject(thread_id, "verifier"),
            "DECIDE.ATTEMPT",
            &json!({"need_id": need_id, "proposal_id": proposal_id, "epoch": epoch}),
        )?;

        let Some(winner) = self.register.try_decide(&record)? else {
            self.audit.log_event(
                thread_id,
                &thread_subject(thread_id, "verifier"),
                "DECIDE.CONFLICT",
                &json!({"need_id": need_id, "proposal_id": proposal_id}),
            )?;
            return Ok(None);
        };

        // Advance the winning proposal's tasks to DECIDED. A proposal with
        // no recorded steps decides the need task itself.
        let annotations = self.plan.get_annotations(need_id).await?;
        let step_tasks: Vec<String> = annotations
            .get(&format!("proposal:{}", winner.proposal_id))
            .and_then(|p| p["plan"].as_array())
            .map(|steps| {
                steps
                    .iter()
                    .filter_map(|s| s["task_id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let targets = if step_tasks.is_empty() {
            vec![need_id.to_string()]
        } else {
            step_tasks
        };

        for task_id in &targets {
            let state_op = PlanOp::new(
                thread_id,
                self.clock.tick()?,
                winner.decider_id.as_str(),
                OpType::State,
                task_id.clone(),
                json!({"state": TaskState::Decided.as_str()}),
            );
            self.plan.append_op(&state_op).await?;
        }
        self.plan
            .annotate_task(
                need_id,
                thread_id,
                self.clock.tick()?,
                &winner.decider_id,
                json!({"decide": {
                    "proposal_id": winner.proposal_id.clone(),
                    "epoch": winner.epoch,
                    "k_plan": winner.k_plan,
                    "decider_id": winner.decider_id.clone(),
                }}),
            )
            .await?;
        Ok(Some(winner))
    }

    // ── FINALIZE ─────────────────────────────────────────────────────────────

    /// Terminal state plus the challenge window. Idempotent: repeating it
    /// leaves the state FINAL, adds an annotation, and keeps the original
    /// window clock.
    pub(crate) async fn handle_finalize(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let task_id = field_or_thread(envelope, "task_id");

        let state_op = PlanOp::new(
            envelope.thread_id.as_str(),
            envelope.lamport,
            envelope.sender_pk_b64.as_str(),
            OpType::State,
            task_id,
            json!({"state": TaskState::Final.as_str()}),
        );
        self.plan.append_op(&state_op).await?;
        self.plan
            .annotate_task(
                task_id,
                &envelope.thread_id,
                envelope.lamport,
                &envelope.sender_pk_b64,
                json!({"finalized": {
                    "lamport": envelope.lamport,
                    "by": envelope.sender_pk_b64.clone(),
                }}),
            )
            .await?;
        self.windows
            .create_window(task_id, Some(CHALLENGE_WINDOW_SECS))?;
        info!(task_id, "task finalized, challenge window open");
        Ok(())
    }

    // ── YIELD / RELEASE ──────────────────────────────────────────────────────

    /// A worker voluntarily gives a task back.
    pub(crate) async fn handle_yield(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let task_id = field(envelope, "task_id")?;
        if let Some(lease) = self.leases.lease_for_task(task_id)? {
            self.leases.delete_lease(&lease.lease_id)?;
        }
        self.plan
            .annotate_task(
                task_id,
                &envelope.thread_id,
                envelope.lamport,
                &envelope.sender_pk_b64,
                json!({"yielded": true}),
            )
            .await?;
        Ok(())
    }

    /// Lease termination from the monitor (timeout or heartbeat miss).
    /// Idempotent: the lease is usually already gone.
    pub(crate) async fn handle_release(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let task_id = field(envelope, "task_id")?;
        let reason = envelope.payload["reason"].as_str().unwrap_or("timeout");
        if let Some(lease_id) = envelope.payload["lease_id"].as_str() {
            self.leases.delete_lease(lease_id)?;
        } else if let Some(lease) = self.leases.lease_for_task(task_id)? {
            self.leases.delete_lease(&lease.lease_id)?;
        }
        self.plan
            .annotate_task(
                task_id,
                &envelope.thread_id,
                envelope.lamport,
                &envelope.sender_pk_b64,
                json!({"release": {"reason": reason}}),
            )
            .await?;
        info!(task_id, reason, "lease released");
        Ok(())
    }

    // ── CHALLENGE ────────────────────────────────────────────────────────────

    /// Challenge intake: rate limits shed load first, then the window,
    /// proof schema, and bond are checked, the bond escrowed, and the
    /// challenge queued for verifiers.
    pub(crate) async fn handle_challenge(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let task_id = field(envelope, "task_id")?;
        let commit_id = field(envelope, "commit_id")?;
        let challenger_id = envelope.sender_pk_b64.clone();

        self.abuse.check_rate_limit(&challenger_id)?;
        self.abuse.check_spam_pattern(&challenger_id)?;
        if self.abuse.is_low_quality(&challenger_id) {
            warn!(
                challenger = %challenger_id,
                reputation = self.abuse.reputation(&challenger_id),
                "low-quality challenger"
            );
        }
        self.abuse.record_challenge(&challenger_id);

        if !self.windows.is_window_open(task_id)? {
            return Err(SwarmError::WindowClosed(task_id.to_string()));
        }

        let proof_type: ProofType = field(envelope, "proof_type")?.parse()?;
        let complexity: ComplexityLevel = envelope.payload["complexity"]
            .as_str()
            .unwrap_or("SIMPLE")
            .parse()?;
        let proof = ProofSchema {
            proof_type,
            evidence_hash: field(envelope, "evidence_hash")?.to_string(),
            size_bytes: envelope.payload["size_bytes"].as_u64().unwrap_or(1) as usize,
            gas_estimate: envelope.payload["gas_estimate"].as_u64().unwrap_or(0),
        };
        proof.validate()?;

        let bond = bond_for(proof_type, complexity);
        let challenge_id = Uuid::new_v4().to_string();
        let escrow_id = format!("challenge_bond_{challenge_id}");
        self.ledger.escrow(&challenger_id, bond, &escrow_id)?;

        self.challenge_queue.add_challenge(
            &challenge_id,
            task_id,
            commit_id,
            &challenger_id,
            json!({
                "proof_type": proof_type.as_str(),
                "evidence_hash": proof.evidence_hash.clone(),
                "size_bytes": proof.size_bytes,
                "gas_estimate": proof.gas_estimate,
                "complexity": envelope.payload["complexity"].as_str().unwrap_or("SIMPLE"),
                "escrow_id": escrow_id.clone(),
            }),
            bond,
        )?;
        self.windows.extend_window(task_id, CHALLENGE_EXTENSION_SECS)?;

        self.plan
            .annotate_task(
                task_id,
                &envelope.thread_id,
                envelope.lamport,
                &challenger_id,
                json!({"challenge": {
                    "challenge_id": challenge_id.clone(),
                    "challenger": challenger_id.clone(),
                    "bond": bond,
                    "proof_type": proof_type.as_str(),
                }}),
            )
            .await?;
        info!(task_id, challenge_id = %challenge_id, bond, "challenge accepted");
        Ok(())
    }

    // ── INVALIDATE ───────────────────────────────────────────────────────────

    /// A challenge verdict against the committed result: slash the
    /// dishonest attesters, distribute, block payout, and re-open the task
    /// under an escalated K_result.
    pub(crate) async fn handle_invalidate(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let task_id = field(envelope, "task_id")?;
        let challenge_id = field(envelope, "challenge_id")?;
        let challenger = field(envelope, "challenger")?;
        let evidence_hash = field(envelope, "evidence_hash")?;
        let slashed: Vec<String> = envelope.payload["slashed_verifiers"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let honest: Vec<String> = envelope.payload["honest_verifiers"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let reason = envelope.payload["reason"].as_str().unwrap_or("challenge upheld");

        self.plan
            .annotate_task(
                task_id,
                &envelope.thread_id,
                envelope.lamport,
                &envelope.sender_pk_b64,
                json!({"invalidated": true, "invalidation_reason": reason, "challenge_id": challenge_id}),
            )
            .await?;

        if !slashed.is_empty() {
            let result = self
                .slashing
                .slash_verifiers(&slashed, &honest, challenger, evidence_hash)?;
            self.audit.log_event(
                &envelope.thread_id,
                &thread_subject(&envelope.thread_id, "verifier"),
                "SLASH",
                &json!({
                    "task_id": task_id,
                    "challenge_id": challenge_id,
                    "total_slashed": result.total_slashed,
                    "challenger_payout": result.challenger_payout,
                    "honest_payout": result.honest_payout,
                    "burned": result.burned,
                }),
            )?;
            for verifier in &slashed {
                self.reputation.record_failed_attestation(verifier);
                if let Some(record) = self.pool.get(verifier) {
                    let slashed_amount = result
                        .slashed_verifiers
                        .iter()
                        .find(|(id, _)| id == verifier)
                        .map(|(_, amount)| *amount)
                        .unwrap_or(0);
                    self.pool
                        .set_stake(verifier, record.stake.saturating_sub(slashed_amount));
                }
            }
        }

        self.payouts.mark_invalidated(task_id);

        let upheld_count = {
            let mut counts = self.upheld_challenges.lock().expect("upheld lock poisoned");
            let count = counts.entry(task_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let new_k = envelope.payload["new_k_result"]
            .as_u64()
            .map(|k| k as u32)
            .unwrap_or_else(|| {
                escalate_k_result(self.k_result_for(task_id), upheld_count, self.pool.active_count(), 1)
            });
        self.k_result
            .lock()
            .expect("k_result lock poisoned")
            .insert(task_id.to_string(), new_k);

        self.plan
            .annotate_task(
                task_id,
                &envelope.thread_id,
                self.clock.tick()?,
                &envelope.sender_pk_b64,
                json!({"reopened": true, "k_result": new_k, "previous_attempt": "invalidated"}),
            )
            .await?;
        self.abuse.record_outcome(challenger, "UPHELD");

        info!(task_id, challenge_id, new_k, "task invalidated and reopened");
        Ok(())
    }

    // ── RECONCILE ────────────────────────────────────────────────────────────

    /// Partition heal: advance the epoch to fence the old partitions and
    /// orphan the losing branches of the merge.
    pub(crate) async fn handle_reconcile(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let reason = envelope.payload["reason"].as_str().unwrap_or("partition_heal");
        let new_epoch = self.epochs.advance_epoch(reason)?;

        if let Some(branches) = envelope.payload["orphaned_branches"].as_array() {
            for branch in branches {
                match serde_json::from_value::<DecideRecord>(branch.clone()) {
                    Ok(loser) => {
                        mark_orphaned(&loser, new_epoch, self.clock.tick()?, &self.plan).await?;
                    }
                    Err(e) => warn!(error = %e, "unparseable orphaned branch in RECONCILE"),
                }
            }
        }
        info!(
            thread_id = %envelope.thread_id,
            new_epoch,
            "reconciled after partition heal"
        );
        Ok(())
    }

    // ── CHECKPOINT / UPDATE_PLAN ─────────────────────────────────────────────

    /// Record a consistency point for fast sync.
    pub(crate) async fn handle_checkpoint(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let task_id = field_or_thread(envelope, "task_id");
        self.plan
            .annotate_task(
                task_id,
                &envelope.thread_id,
                envelope.lamport,
                &envelope.sender_pk_b64,
                json!({"checkpoint": {
                    "epoch": self.epochs.current_epoch(),
                    "lamport": envelope.lamport,
                }}),
            )
            .await?;
        Ok(())
    }

    /// Batch of raw plan ops (planner refinements after DECIDE).
    pub(crate) async fn handle_update_plan(&self, envelope: &Envelope) -> Result<(), SwarmError> {
        let Some(ops) = envelope.payload["ops"].as_array() else {
            return Err(SwarmError::MissingField("ops"));
        };
        for spec in ops {
            let Ok(op_type) = serde_json::from_value::<OpType>(spec["op_type"].clone()) else {
                warn!(op = %spec["op_type"], "skipping unknown op_type in UPDATE_PLAN");
                continue;
            };
            let Some(task_id) = spec["task_id"].as_str() else {
                continue;
            };
            let op = PlanOp::new(
                envelope.thread_id.as_str(),
                self.clock.tick()?,
                envelope.sender_pk_b64.as_str(),
                op_type,
                task_id,
                spec["payload"].clone(),
            );
            self.plan.append_op(&op).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use swarm_cas::CasStore;
    use swarm_clock::LamportClock;
    use swarm_consensus::DecideRegister;
    use swarm_core::constants::SYSTEM_ACCOUNT;
    use swarm_core::types::TaskState;
    use swarm_core::Verb;
    use swarm_crypto::KeyPair;
    use swarm_economics::VerifierMetadata;
    use swarm_policy::{sign_envelope, Envelope};

    use crate::coordinator::{Coordinator, CoordinatorConfig};
    use crate::transport::LocalTransport;

    struct Agent {
        keypair: KeyPair,
        clock: LamportClock,
    }

    impl Agent {
        fn new(name: &str, test: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("swarm_handler_agent_{test}_{name}"));
            let _ = std::fs::remove_dir_all(&dir);
            Self {
                keypair: KeyPair::generate(),
                clock: LamportClock::open(dir.join("lamport.json")).unwrap(),
            }
        }

        fn envelope(&self, kind: Verb, thread: &str, payload: serde_json::Value) -> Envelope {
            let env = Envelope::build(kind, thread, payload, &self.keypair, &self.clock).unwrap();
            sign_envelope(&env, &self.keypair).unwrap()
        }

        fn id(&self) -> String {
            self.keypair.public_key_b64()
        }
    }

    async fn coordinator(test: &str) -> Arc<Coordinator> {
        let base = std::env::temp_dir().join(format!("swarm_handler_test_{test}"));
        let _ = std::fs::remove_dir_all(&base);
        let config = CoordinatorConfig {
            state_dir: base.join("state"),
            cas_dir: base.join("cas"),
            log_dir: base.join("logs"),
            keys_dir: base.join("keys"),
            agent_id: "coordinator".into(),
        };
        Coordinator::open(&config, Arc::new(LocalTransport::default()))
            .await
            .unwrap()
    }

    // ── S1: happy path at K=1 ────────────────────────────────────────────────

    #[tokio::test]
    async fn happy_path_need_to_final() {
        let coord = coordinator("happy_path").await;
        let planner = Agent::new("planner", "happy_path");
        let worker = Agent::new("worker", "happy_path");
        let verifier = Agent::new("verifier", "happy_path");

        coord
            .handle_envelope(&planner.envelope(
                Verb::Need,
                "T1",
                json!({"need_id": "N1", "task": "classify", "data": "x"}),
            ))
            .await
            .unwrap();

        coord
            .handle_envelope(&planner.envelope(
                Verb::Propose,
                "T1",
                json!({
                    "need_id": "N1",
                    "proposal_id": "P1",
                    "plan": [{"task_id": "W1", "type": "worker"}],
                }),
            ))
            .await
            .unwrap();
        assert_eq!(
            coord.plan.get_task("W1").await.unwrap().unwrap().state,
            TaskState::Draft
        );

        coord
            .handle_envelope(&worker.envelope(
                Verb::Claim,
                "T1",
                json!({"task_id": "W1", "lease_ttl": 30}),
            ))
            .await
            .unwrap();
        assert!(coord.leases.lease_for_task("W1").unwrap().is_some());

        let artifact = coord
            .cas
            .put_json(&json!({"status": "success", "output": "x"}))
            .await
            .unwrap();
        coord
            .handle_envelope(&worker.envelope(
                Verb::Commit,
                "T1",
                json!({"task_id": "W1", "artifact_hash": artifact, "commit_id": "C1"}),
            ))
            .await
            .unwrap();

        // Empty pool → bootstrap mode → K_plan = 1: one attestation decides.
        coord
            .handle_envelope(&verifier.envelope(
                Verb::Attest,
                "T1",
                json!({
                    "need_id": "N1",
                    "proposal_id": "P1",
                    "task_id": "W1",
                    "commit_id": "C1",
                    "verdict": "approved",
                }),
            ))
            .await
            .unwrap();

        let decide = coord.register.get_decide("N1").unwrap().unwrap();
        assert_eq!(decide.proposal_id, "P1");
        assert_eq!(
            coord.plan.get_task("W1").await.unwrap().unwrap().state,
            TaskState::Decided
        );

        coord
            .handle_envelope(&verifier.envelope(Verb::Finalize, "T1", json!({"task_id": "W1"})))
            .await
            .unwrap();
        assert_eq!(
            coord.plan.get_task("W1").await.unwrap().unwrap().state,
            TaskState::Final
        );
        assert!(coord.windows.is_window_open("W1").unwrap());
    }

    // ── S2: conflicting DECIDE, same epoch ───────────────────────────────────

    #[tokio::test]
    async fn conflicting_decide_has_one_winner() {
        let coord = coordinator("decide_race").await;
        let a = coord
            .attempt_decide("N1", "P1", 1, 10, 1, "T1")
            .await
            .unwrap();
        let b = coord
            .attempt_decide("N1", "P2", 1, 11, 1, "T1")
            .await
            .unwrap();
        assert!(a.is_some());
        assert!(b.is_none());
        assert_eq!(coord.register.get_decide("N1").unwrap().unwrap().proposal_id, "P1");
    }

    // ── CLAIM_EXTENDED routes through consensus ──────────────────────────────

    #[tokio::test]
    async fn claim_extended_requires_propose_and_decides_via_register() {
        let coord = coordinator("claim_extended").await;
        let planner = Agent::new("planner", "claim_extended");
        let worker = Agent::new("worker", "claim_extended");

        // Without a prior PROPOSE the claim is rejected.
        let premature = worker.envelope(
            Verb::ClaimExtended,
            "T1",
            json!({"task_id": "W1", "need_id": "N1", "proposal_id": "P1", "lease_ttl": 120}),
        );
        assert!(coord.handle_envelope(&premature).await.is_err());

        coord
            .handle_envelope(&planner.envelope(
                Verb::Propose,
                "T1",
                json!({"need_id": "N1", "proposal_id": "P1", "plan": [{"task_id": "W1", "type": "worker"}]}),
            ))
            .await
            .unwrap();

        coord
            .handle_envelope(&worker.envelope(
                Verb::ClaimExtended,
                "T1",
                json!({"task_id": "W1", "need_id": "N1", "proposal_id": "P1", "lease_ttl": 120}),
            ))
            .await
            .unwrap();

        // The DECIDE went through the register, and only the register path
        // produced the STATE op.
        assert!(coord.register.get_decide("N1").unwrap().is_some());
        assert_eq!(
            coord.plan.get_task("W1").await.unwrap().unwrap().state,
            TaskState::Decided
        );
        let ops = coord.plan.get_ops_for_thread("T1").await.unwrap();
        let state_ops = ops
            .iter()
            .filter(|o| o.op_type == swarm_plan::OpType::State)
            .count();
        assert_eq!(state_ops, 1);
    }

    // ── S6: COMMIT without CAS artifact ──────────────────────────────────────

    #[tokio::test]
    async fn commit_without_artifact_is_policy_rejected() {
        let coord = coordinator("commit_missing").await;
        let worker = Agent::new("worker", "commit_missing");

        let env = worker.envelope(
            Verb::Commit,
            "T1",
            json!({"task_id": "W1", "artifact_hash": "0".repeat(64)}),
        );
        let err = coord.handle_envelope(&env).await.unwrap_err();
        assert!(matches!(err, swarm_core::SwarmError::PolicyRejection(_)));
        // No plan op was appended.
        assert!(coord.plan.get_ops_for_thread("T1").await.unwrap().is_empty());
        assert!(coord.plan.get_task("W1").await.unwrap().is_none());
    }

    // ── Challenge intake ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn challenge_escrows_bond_and_queues() {
        let coord = coordinator("challenge_intake").await;
        let challenger = Agent::new("challenger", "challenge_intake");
        let finalizer = Agent::new("finalizer", "challenge_intake");

        coord
            .ledger
            .create_account(&challenger.id(), 1_000, SYSTEM_ACCOUNT)
            .unwrap();
        coord
            .handle_envelope(&finalizer.envelope(Verb::Finalize, "T1", json!({"task_id": "W1"})))
            .await
            .unwrap();

        coord
            .handle_envelope(&challenger.envelope(
                Verb::Challenge,
                "T1",
                json!({
                    "task_id": "W1",
                    "commit_id": "C1",
                    "proof_type": "SCHEMA_VIOLATION",
                    "complexity": "SIMPLE",
                    "evidence_hash": "a".repeat(64),
                    "size_bytes": 256,
                    "gas_estimate": 10,
                }),
            ))
            .await
            .unwrap();

        // Bond of 10 escrowed.
        let account = coord.ledger.get_account(&challenger.id()).unwrap().unwrap();
        assert_eq!(account.balance, 990);
        assert_eq!(account.locked, 10);
        assert_eq!(coord.challenge_queue.queue_size(None).unwrap(), 1);
        // Valid challenge extended the window.
        let window = coord.windows.get_window("W1").unwrap().unwrap();
        assert_eq!(window.extended_count, 1);
    }

    #[tokio::test]
    async fn challenge_after_window_rejected() {
        let coord = coordinator("challenge_late").await;
        let challenger = Agent::new("challenger", "challenge_late");
        coord
            .ledger
            .create_account(&challenger.id(), 1_000, SYSTEM_ACCOUNT)
            .unwrap();
        // No FINALIZE → no window.
        let env = challenger.envelope(
            Verb::Challenge,
            "T1",
            json!({
                "task_id": "W-unfinalized",
                "commit_id": "C1",
                "proof_type": "SCHEMA_VIOLATION",
                "evidence_hash": "a".repeat(64),
                "size_bytes": 16,
            }),
        );
        let err = coord.handle_envelope(&env).await.unwrap_err();
        assert!(matches!(err, swarm_core::SwarmError::WindowClosed(_)));
        assert_eq!(coord.challenge_queue.queue_size(None).unwrap(), 0);
    }

    // ── INVALIDATE slashes and escalates ─────────────────────────────────────

    #[tokio::test]
    async fn invalidate_slashes_blocks_payout_and_escalates() {
        let coord = coordinator("invalidate").await;
        let sender = Agent::new("sender", "invalidate");

        coord.ledger.create_account("v1", 10_000, SYSTEM_ACCOUNT).unwrap();
        swarm_economics::StakeManager::new(Arc::clone(&coord.ledger))
            .stake("v1", 10_000)
            .unwrap();
        coord.pool.register("v1", 10_000, VerifierMetadata::default());
        coord.ledger.create_account("challenger", 0, "x").unwrap();

        coord
            .handle_envelope(&sender.envelope(
                Verb::Invalidate,
                "T1",
                json!({
                    "task_id": "W1",
                    "challenge_id": "CH1",
                    "challenger": "challenger",
                    "evidence_hash": "e".repeat(64),
                    "slashed_verifiers": ["v1"],
                    "honest_verifiers": [],
                }),
            ))
            .await
            .unwrap();

        // 50% slash, 50% of that to the challenger.
        assert_eq!(coord.ledger.get_account("v1").unwrap().unwrap().locked, 5_000);
        assert_eq!(coord.ledger.get_balance("challenger"), 2_500);
        assert!(coord.payouts.is_invalidated("W1"));
        // K_result: one upheld challenge → 1 + 2.
        assert_eq!(coord.k_result_for("W1"), 3);

        let annotations = coord.plan.get_annotations("W1").await.unwrap();
        assert_eq!(annotations["invalidated"], json!(true));
        assert_eq!(annotations["reopened"], json!(true));
    }

    // ── RECONCILE advances the epoch and orphans losers ──────────────────────

    #[tokio::test]
    async fn reconcile_fences_and_orphans() {
        let coord = coordinator("reconcile").await;
        let sender = Agent::new("sender", "reconcile");
        assert_eq!(coord.epochs.current_epoch(), 1);

        coord
            .handle_envelope(&sender.envelope(
                Verb::Reconcile,
                "T1",
                json!({
                    "reason": "partition_heal",
                    "orphaned_branches": [{
                        "need_id": "N1",
                        "proposal_id": "P1",
                        "epoch": 1,
                        "lamport": 5,
                        "k_plan": 1,
                        "decider_id": "coord-a",
                        "timestamp_ns": 0,
                    }],
                }),
            ))
            .await
            .unwrap();

        assert_eq!(coord.epochs.current_epoch(), 2);
        let annotations = coord.plan.get_annotations("N1").await.unwrap();
        assert_eq!(annotations["orphaned"], json!(true));
        assert_eq!(annotations["orphaned_by_epoch"], json!(2));

        // Decisions from the fenced epoch are now rejected.
        assert!(coord.attempt_decide("N2", "P9", 1, 7, 1, "T1").await.unwrap().is_none());
        assert!(coord.attempt_decide("N2", "P9", 2, 8, 1, "T1").await.unwrap().is_some());
    }

    // ── FINALIZE idempotence ─────────────────────────────────────────────────

    #[tokio::test]
    async fn refinalize_is_idempotent() {
        let coord = coordinator("refinalize").await;
        let sender = Agent::new("sender", "refinalize");

        coord
            .handle_envelope(&sender.envelope(Verb::Finalize, "T1", json!({"task_id": "W1"})))
            .await
            .unwrap();
        let window_before = coord.windows.get_window("W1").unwrap().unwrap();

        coord
            .handle_envelope(&sender.envelope(Verb::Finalize, "T1", json!({"task_id": "W1"})))
            .await
            .unwrap();
        assert_eq!(
            coord.plan.get_task("W1").await.unwrap().unwrap().state,
            TaskState::Final
        );
        // The original window clock is untouched.
        let window_after = coord.windows.get_window("W1").unwrap().unwrap();
        assert_eq!(window_before.opened_at_ns, window_after.opened_at_ns);
    }

    // ── Quorum needs distinct attesters ──────────────────────────────────────

    #[tokio::test]
    async fn duplicate_attestations_do_not_decide() {
        let coord = coordinator("quorum_dedup").await;
        let planner = Agent::new("planner", "quorum_dedup");
        let verifier = Agent::new("verifier", "quorum_dedup");

        // 10 active verifiers → K_plan = 3.
        for i in 0..10 {
            coord.pool.register(
                &format!("v{i}"),
                swarm_core::constants::MIN_VERIFIER_STAKE,
                VerifierMetadata::default(),
            );
        }

        coord
            .handle_envelope(&planner.envelope(
                Verb::Propose,
                "T1",
                json!({"need_id": "N1", "proposal_id": "P1", "plan": [{"task_id": "W1", "type": "worker"}]}),
            ))
            .await
            .unwrap();

        for _ in 0..3 {
            coord
                .handle_envelope(&verifier.envelope(
                    Verb::Attest,
                    "T1",
                    json!({"need_id": "N1", "proposal_id": "P1", "verifier_id": "v0", "verdict": "approved"}),
                ))
                .await
                .unwrap();
        }
        // Three attestations from one verifier are one vote.
        assert!(coord.register.get_decide("N1").unwrap().is_none());

        for v in ["v1", "v2"] {
            coord
                .handle_envelope(&verifier.envelope(
                    Verb::Attest,
                    "T1",
                    json!({"need_id": "N1", "proposal_id": "P1", "verifier_id": v, "verdict": "approved"}),
                ))
                .await
                .unwrap();
        }
        assert!(coord.register.get_decide("N1").unwrap().is_some());
    }

    // ── RELEASE is idempotent ────────────────────────────────────────────────

    #[tokio::test]
    async fn release_for_missing_lease_is_noop() {
        let coord = coordinator("release_noop").await;
        let sender = Agent::new("sender", "release_noop");
        coord
            .handle_envelope(&sender.envelope(
                Verb::Release,
                "W1",
                json!({"task_id": "W1", "lease_id": "gone", "reason": "timeout"}),
            ))
            .await
            .unwrap();
        let annotations = coord.plan.get_annotations("W1").await.unwrap();
        assert_eq!(annotations["release"]["reason"], json!("timeout"));
    }

    // ── UPDATE_PLAN appends raw ops ──────────────────────────────────────────

    #[tokio::test]
    async fn update_plan_appends_ops() {
        let coord = coordinator("update_plan").await;
        let planner = Agent::new("planner", "update_plan");
        coord
            .handle_envelope(&planner.envelope(
                Verb::UpdatePlan,
                "T1",
                json!({"ops": [
                    {"op_type": "ADD_TASK", "task_id": "W5", "payload": {"type": "worker"}},
                    {"op_type": "LINK", "task_id": "W5", "payload": {"parent": "N1", "child": "W5"}},
                ]}),
            ))
            .await
            .unwrap();
        assert!(coord.plan.get_task("W5").await.unwrap().is_some());
        assert_eq!(coord.plan.get_edges().await.unwrap().len(), 1);
    }
}
