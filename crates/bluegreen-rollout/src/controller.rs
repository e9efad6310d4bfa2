//! Deployment controller: drives deployments against the infrastructure.
//!
//! The controller owns every live `Deployment`, one `HealthGate` per
//! deployment, and the shared `TaskSetRegistry`. It is the only place
//! that calls the `WeightSetter` and `Provisioner`.
//!
//! # Locking
//!
//! Each deployment sits behind its own mutex, so ticks for one deployment
//! serialize while different deployments proceed independently. The
//! registry, the active-deployment table and the pool index are held only
//! for short map updates, always after the deployment lock. Sample
//! ingestion touches the pool index and the gate, never the deployment.
//! The deployment table may be write-locked while a deployment is held,
//! so no code path locks a deployment while holding the table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use bluegreen_core::config::HealthGateConfig;
use bluegreen_core::{
    ControllerConfig, DeploymentId, DeploymentOutcome, DeploymentState, HealthSample,
    HealthStatus, InstanceHandle, PoolColor, PoolId, PoolSpec, PoolsSpec, Provisioner,
    RollbackTrigger, WeightSetter, epoch_secs,
};
use bluegreen_health::{AlarmDefinition, HealthError, HealthGate, application_alarms};
use bluegreen_state::{DeploymentRecord, PoolVerdicts, StateChangeRecord, StateStore};
use bluegreen_taskset::{
    TaskSet, TaskSetError, TaskSetRegistry, TaskSetStatus, TerminateOutcome,
};

use crate::error::{RolloutError, RolloutResult};
use crate::machine::Deployment;
use crate::plan::PlanRequest;
use crate::shifter::{ShiftDecision, TrafficSplit};

struct DeploymentSlot {
    deployment: Mutex<Deployment>,
    gate: HealthGate,
}

impl DeploymentSlot {
    fn lock(&self) -> MutexGuard<'_, Deployment> {
        self.deployment.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct DeploymentController {
    health: HealthGateConfig,
    default_preset: String,
    termination_wait_secs: u64,
    weights: Arc<dyn WeightSetter>,
    provisioner: Arc<dyn Provisioner>,
    store: Option<StateStore>,
    /// Application -> its non-terminal deployment.
    active: Mutex<HashMap<String, DeploymentId>>,
    /// Application -> the pool currently serving all of its traffic.
    live_pools: Mutex<HashMap<String, PoolId>>,
    deployments: RwLock<HashMap<DeploymentId, Arc<DeploymentSlot>>>,
    /// Pool -> the deployment whose gate watches it. The latest claimant wins.
    pool_index: RwLock<HashMap<PoolId, DeploymentId>>,
    registry: Mutex<TaskSetRegistry>,
    seq: AtomicU64,
}

impl DeploymentController {
    pub fn new(
        config: &ControllerConfig,
        weights: Arc<dyn WeightSetter>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            health: config.health.clone(),
            default_preset: config.deployment.preset.clone(),
            termination_wait_secs: config.deployment.termination_wait_secs(),
            weights,
            provisioner,
            store: None,
            active: Mutex::new(HashMap::new()),
            live_pools: Mutex::new(HashMap::new()),
            deployments: RwLock::new(HashMap::new()),
            pool_index: RwLock::new(HashMap::new()),
            registry: Mutex::new(TaskSetRegistry::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Persist records and history to `store`.
    ///
    /// Deployments the store still lists as active belong to a previous
    /// process whose infrastructure handles are gone; they are marked
    /// `FAILED` and the transition is appended to their history. Every
    /// stored deployment ends up archived. Id numbering continues after the
    /// highest stored id.
    ///
    /// With a store attached, archived deployments are dropped from memory
    /// and served from the store.
    pub fn with_store(mut self, store: StateStore) -> RolloutResult<Self> {
        let mut highest = 0;
        for mut record in store.list_deployments()? {
            if let Some(n) = record
                .id
                .rsplit_once('-')
                .and_then(|(_, n)| n.parse::<u64>().ok())
            {
                highest = highest.max(n);
            }
            if record.archived {
                continue;
            }
            let at = epoch_secs();
            if record.state.is_terminal() {
                // Its retired pool belonged to the previous process.
                info!(deployment = %record.id, state = %record.state, "archiving finished deployment");
            } else {
                warn!(
                    deployment = %record.id,
                    state = %record.state,
                    "abandoning deployment left active by a previous run"
                );
                let seq = store
                    .list_history(&record.id)?
                    .last()
                    .map_or(0, |change| change.seq + 1);
                store.append_history(&[StateChangeRecord {
                    deployment_id: record.id.clone(),
                    seq,
                    from: record.state,
                    to: DeploymentState::Failed,
                    at,
                }])?;
                record.state = DeploymentState::Failed;
                record.outcome = Some(DeploymentOutcome::Failed);
                record.failure_reason = Some("controller restarted".to_string());
            }
            record.archived = true;
            record.updated_at = at;
            store.put_deployment(&record)?;
        }
        self.seq = AtomicU64::new(highest);
        self.store = Some(store);
        Ok(self)
    }

    /// Plan used when a create request does not name one.
    pub fn default_plan(&self) -> PlanRequest {
        PlanRequest::Preset {
            name: self.default_preset.clone(),
        }
    }

    // ── Locks ──────────────────────────────────────────────────────

    fn active(&self) -> MutexGuard<'_, HashMap<String, DeploymentId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_pools(&self) -> MutexGuard<'_, HashMap<String, PoolId>> {
        self.live_pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry(&self) -> MutexGuard<'_, TaskSetRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, id: &str) -> Option<Arc<DeploymentSlot>> {
        self.deployments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    // ── Create ─────────────────────────────────────────────────────

    /// Validate the plan, provision both pools and start shifting.
    pub fn create_deployment(
        &self,
        application: &str,
        plan: PlanRequest,
        pools: &PoolsSpec,
        now: u64,
    ) -> RolloutResult<DeploymentId> {
        let plan = plan.into_plan()?;

        let id = {
            let mut active = self.active();
            if let Some(existing) = active.get(application) {
                return Err(RolloutError::ConflictingDeployment {
                    application: application.to_string(),
                    active: existing.clone(),
                });
            }
            let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("{application}-{n:06}");
            active.insert(application.to_string(), id.clone());
            id
        };

        let live = self.live_pools().get(application).cloned();
        let reuse_blue = live.filter(|pool| {
            self.registry()
                .get(pool)
                .is_some_and(|s| s.status == TaskSetStatus::Active)
        });
        let blue_pool = reuse_blue.clone().unwrap_or_else(|| format!("{id}-blue"));
        let green_pool = format!("{id}-green");

        let mut deployment = Deployment::new(
            &id,
            application,
            &blue_pool,
            &green_pool,
            plan,
            self.termination_wait_secs,
            now,
        );
        deployment.begin_provisioning(now)?;
        info!(
            deployment = %id,
            application,
            blue = %blue_pool,
            green = %green_pool,
            reused_blue = reuse_blue.is_some(),
            steps = deployment.shifter().plan().len(),
            "deployment created"
        );

        let mut fresh = Vec::new();
        if reuse_blue.is_none() {
            fresh.push(blue_pool.clone());
        }
        fresh.push(green_pool.clone());

        if let Err(e) = self.provision_pools(&deployment, reuse_blue.is_none(), pools) {
            deployment.fail(&e.to_string(), now)?;
            self.cleanup_pools(&fresh, now);
            self.release(application, &id);
            self.archive(&mut deployment, now);
            let events = deployment.take_events();
            let record = deployment.status();
            self.persist(&record, &events);
            if self.store.is_none() {
                self.insert(deployment, None);
            }
            return Err(e);
        }

        deployment.provisioned(now)?;
        let gate = HealthGate::new(application, self.health.clone());
        gate.watch(&blue_pool, PoolColor::Blue);
        gate.watch(&green_pool, PoolColor::Green);
        {
            let mut index = self.pool_index.write().unwrap_or_else(PoisonError::into_inner);
            index.insert(blue_pool, id.clone());
            index.insert(green_pool, id.clone());
        }

        let events = deployment.take_events();
        let record = deployment.status();
        self.persist(&record, &events);
        self.insert(deployment, Some(gate));
        Ok(id)
    }

    fn insert(&self, deployment: Deployment, gate: Option<HealthGate>) {
        let id = deployment.id().to_string();
        let gate = gate.unwrap_or_else(|| HealthGate::new(deployment.application(), self.health.clone()));
        let slot = Arc::new(DeploymentSlot {
            deployment: Mutex::new(deployment),
            gate,
        });
        self.deployments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, slot);
    }

    fn provision_pools(
        &self,
        deployment: &Deployment,
        provision_blue: bool,
        pools: &PoolsSpec,
    ) -> RolloutResult<()> {
        let blue = deployment.pool(PoolColor::Blue);
        let green = deployment.pool(PoolColor::Green);
        if provision_blue {
            self.provision_pool(deployment.application(), blue, PoolColor::Blue, &pools.blue)?;
            self.registry().set_weight(blue, 100)?;
        }
        self.provision_pool(deployment.application(), green, PoolColor::Green, &pools.green)?;

        self.weights
            .set_weights(&blue.to_string(), 100, &green.to_string(), 0)
            .map_err(|source| {
                error!(deployment = %deployment.id(), error = %source, "initial weight update failed");
                RolloutError::ProvisioningFailure {
                    application: deployment.application().to_string(),
                    source,
                }
            })?;
        Ok(())
    }

    fn provision_pool(
        &self,
        application: &str,
        pool_id: &str,
        color: PoolColor,
        spec: &PoolSpec,
    ) -> RolloutResult<Vec<InstanceHandle>> {
        self.registry()
            .begin_provisioning(pool_id, color, spec.desired_count)?;
        let instances = self.provisioner.provision(spec).map_err(|source| {
            error!(pool = %pool_id, revision = %spec.revision, error = %source, "provisioning failed");
            RolloutError::ProvisioningFailure {
                application: application.to_string(),
                source,
            }
        })?;
        let mut registry = self.registry();
        registry.register(pool_id, instances.clone())?;
        registry.activate(pool_id)?;
        info!(pool = %pool_id, %color, count = instances.len(), revision = %spec.revision, "pool provisioned");
        Ok(instances)
    }

    /// Tear down pools created for a deployment that never started.
    fn cleanup_pools(&self, pools: &[PoolId], now: u64) {
        for pool in pools {
            let outcome = {
                let mut registry = self.registry();
                if registry.get(pool).is_none() {
                    continue;
                }
                let outcome = registry.terminate(pool, now);
                registry.forget(pool);
                outcome
            };
            if let Ok(TerminateOutcome::Terminated { instances }) = outcome {
                self.stop_instances(pool, &instances);
            }
        }
    }

    fn stop_instances(&self, pool: &str, instances: &[InstanceHandle]) {
        if instances.is_empty() {
            return;
        }
        if let Err(e) = self.provisioner.terminate_instances(instances) {
            error!(pool, error = %e, "failed to stop instances");
        }
    }

    fn release(&self, application: &str, id: &str) {
        let mut active = self.active();
        if active.get(application).is_some_and(|a| a == id) {
            active.remove(application);
        }
    }

    // ── Control cycle ──────────────────────────────────────────────

    /// Run one evaluation cycle for a deployment.
    pub fn tick(&self, id: &str, now: u64) -> RolloutResult<DeploymentRecord> {
        let Some(slot) = self.slot(id) else {
            return self.stored(id);
        };
        let mut d = slot.lock();
        if d.is_archived() {
            return Ok(d.status());
        }

        let blue = slot.gate.verdict(d.pool(PoolColor::Blue));
        let green = slot.gate.verdict(d.pool(PoolColor::Green));
        d.set_verdicts(PoolVerdicts { blue, green });

        if d.state() == DeploymentState::Shifting {
            match d.shifter().tick(now, blue, green) {
                ShiftDecision::Rollback { unhealthy } => {
                    let alarms: Vec<String> = unhealthy
                        .iter()
                        .flat_map(|color| slot.gate.tripped_alarms(d.pool(*color)))
                        .collect();
                    let reason = if alarms.is_empty() {
                        "health gate tripped".to_string()
                    } else {
                        alarms.join(", ")
                    };
                    self.roll_back(&mut d, RollbackTrigger::Alarm, &reason, now)?;
                }
                ShiftDecision::Apply { step, split } => {
                    self.apply_step(&mut d, step, split, now)?;
                }
                ShiftDecision::Holding { remaining_secs } => {
                    debug!(deployment = %id, remaining_secs, "holding before next step");
                }
                ShiftDecision::Finished => {}
            }
        }

        Ok(self.settle(&mut d, now))
    }

    fn apply_step(
        &self,
        d: &mut Deployment,
        step: usize,
        split: TrafficSplit,
        now: u64,
    ) -> RolloutResult<()> {
        let blue = d.pool(PoolColor::Blue).to_string();
        let green = d.pool(PoolColor::Green).to_string();
        match self
            .weights
            .set_weights(&blue, split.blue(), &green, split.green())
        {
            Ok(()) => {
                d.commit_shift(step, split, now);
                self.record_weights(&blue, &green, split);
                info!(
                    deployment = %d.id(),
                    step = step + 1,
                    total = d.shifter().plan().len(),
                    blue_weight = split.blue(),
                    green_weight = split.green(),
                    "traffic shifted"
                );
                Ok(())
            }
            Err(e) => {
                error!(deployment = %d.id(), error = %e, "traffic shift failed");
                self.roll_back(d, RollbackTrigger::Failure, &format!("traffic shift failed: {e}"), now)
            }
        }
    }

    fn record_weights(&self, blue: &str, green: &str, split: TrafficSplit) {
        let mut registry = self.registry();
        for (pool, weight) in [(blue, split.blue()), (green, split.green())] {
            if let Err(e) = registry.set_weight(pool, weight) {
                warn!(pool, error = %e, "task set weight not recorded");
            }
        }
    }

    /// Start a rollback and put all traffic back on blue. If the weights
    /// cannot be restored the deployment fails.
    fn roll_back(
        &self,
        d: &mut Deployment,
        trigger: RollbackTrigger,
        reason: &str,
        now: u64,
    ) -> RolloutResult<()> {
        let split = d.rollback(trigger, reason, now)?;
        let blue = d.pool(PoolColor::Blue).to_string();
        let green = d.pool(PoolColor::Green).to_string();
        match self
            .weights
            .set_weights(&blue, split.blue(), &green, split.green())
        {
            Ok(()) => self.record_weights(&blue, &green, split),
            Err(e) => {
                error!(deployment = %d.id(), error = %e, "failed to restore blue weights");
                d.fail(&format!("rollback failed: {e}"), now)?;
            }
        }
        Ok(())
    }

    /// Run automatic transitions, act on them, reap the retired pool and
    /// persist.
    fn settle(&self, d: &mut Deployment, now: u64) -> DeploymentRecord {
        while d.advance(now).is_some() {}
        let events = d.take_events();
        for event in &events {
            self.on_transition(d, event, now);
        }
        self.reap(d, now);
        let record = d.status();
        self.persist(&record, &events);
        if record.archived {
            self.evict(&record.id);
        }
        record
    }

    /// Drop an archived deployment from memory once the store holds it.
    fn evict(&self, id: &str) {
        if self.store.is_none() {
            return;
        }
        self.deployments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        debug!(deployment = %id, "archived deployment evicted from memory");
    }

    fn on_transition(&self, d: &Deployment, event: &StateChangeRecord, now: u64) {
        let application = d.application();
        let blue = d.pool(PoolColor::Blue);
        let green = d.pool(PoolColor::Green);
        match event.to {
            DeploymentState::Complete => {
                self.live_pools().insert(application.to_string(), green.to_string());
                self.release(application, d.id());
                self.schedule_retirement(blue, d.termination_wait_secs(), now);
                info!(deployment = %d.id(), application, live = %green, "deployment complete");
            }
            DeploymentState::RolledBack => {
                self.live_pools().insert(application.to_string(), blue.to_string());
                self.release(application, d.id());
                self.schedule_retirement(green, 0, now);
                info!(deployment = %d.id(), application, live = %blue, "deployment rolled back");
            }
            DeploymentState::Failed => {
                self.release(application, d.id());
            }
            _ => {}
        }
    }

    fn schedule_retirement(&self, pool: &str, after_secs: u64, now: u64) {
        if let Err(e) = self.registry().schedule_termination(pool, after_secs, now) {
            warn!(pool, error = %e, "could not schedule pool termination");
        }
    }

    /// Terminate the retired pool once its wait is over, then archive.
    fn reap(&self, d: &mut Deployment, now: u64) {
        let retired = match d.state() {
            DeploymentState::Complete => d.pool(PoolColor::Blue).to_string(),
            DeploymentState::RolledBack => d.pool(PoolColor::Green).to_string(),
            DeploymentState::Failed => {
                self.archive(d, now);
                return;
            }
            _ => return,
        };

        let outcome = {
            let mut registry = self.registry();
            let outcome = match registry.get(&retired).map(|s| s.status) {
                None | Some(TaskSetStatus::Terminated) => None,
                Some(TaskSetStatus::Draining { .. }) => Some(registry.terminate(&retired, now)),
                Some(_) => return,
            };
            if matches!(outcome, None | Some(Ok(TerminateOutcome::Terminated { .. }))) {
                registry.forget(&retired);
            }
            outcome
        };

        match outcome {
            None => self.archive(d, now),
            Some(Ok(TerminateOutcome::Terminated { instances })) => {
                self.stop_instances(&retired, &instances);
                self.archive(d, now);
            }
            Some(Ok(TerminateOutcome::Deferred { remaining_secs })) => {
                debug!(deployment = %d.id(), pool = %retired, remaining_secs, "retired pool draining");
            }
            Some(Err(e)) => warn!(deployment = %d.id(), pool = %retired, error = %e, "termination failed"),
        }
    }

    fn archive(&self, d: &mut Deployment, now: u64) {
        d.mark_archived(now);
        let mut index = self.pool_index.write().unwrap_or_else(PoisonError::into_inner);
        for color in [PoolColor::Blue, PoolColor::Green] {
            let pool = d.pool(color);
            if index.get(pool).is_some_and(|owner| owner == d.id()) {
                index.remove(pool);
            }
        }
    }

    fn persist(&self, record: &DeploymentRecord, events: &[StateChangeRecord]) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.append_history(events) {
            error!(deployment = %record.id, error = %e, "failed to persist history");
        }
        if let Err(e) = store.put_deployment(record) {
            error!(deployment = %record.id, error = %e, "failed to persist deployment");
        }
    }

    /// Tick every deployment that is not archived, in id order.
    pub fn tick_all(&self, now: u64) -> Vec<DeploymentRecord> {
        let slots: Vec<(DeploymentId, Arc<DeploymentSlot>)> = self
            .deployments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();
        let mut ids: Vec<DeploymentId> = slots
            .into_iter()
            .filter(|(_, slot)| !slot.lock().is_archived())
            .map(|(id, _)| id)
            .collect();
        ids.sort();

        ids.iter()
            .filter_map(|id| match self.tick(id, now) {
                Ok(record) => Some(record),
                Err(e) => {
                    error!(deployment = %id, error = %e, "tick failed");
                    None
                }
            })
            .collect()
    }

    /// Roll a deployment back on operator request.
    pub fn force_rollback(
        &self,
        id: &str,
        reason: &str,
        now: u64,
    ) -> RolloutResult<DeploymentRecord> {
        let Some(slot) = self.slot(id) else {
            // Evicted deployments are archived, so they are past rolling back.
            let record = self.stored(id)?;
            return Err(RolloutError::InvalidTransition {
                deployment: record.id,
                from: record.state,
                to: DeploymentState::RollingBack,
            });
        };
        let mut d = slot.lock();
        self.roll_back(&mut d, RollbackTrigger::Request, reason, now)?;
        Ok(self.settle(&mut d, now))
    }

    // ── Health ─────────────────────────────────────────────────────

    /// Route a health sample to the gate watching its pool.
    pub fn ingest_sample(&self, sample: HealthSample) -> RolloutResult<HealthStatus> {
        let owner = self
            .pool_index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&sample.pool_id)
            .cloned()
            .ok_or_else(|| RolloutError::UnknownPool(sample.pool_id.clone()))?;
        let slot = self
            .slot(&owner)
            .ok_or_else(|| RolloutError::UnknownPool(sample.pool_id.clone()))?;
        slot.gate.ingest(sample).map_err(|e| match e {
            HealthError::UnknownPool(pool) => RolloutError::UnknownPool(pool),
        })
    }

    /// Alarm definitions for both pools of an application.
    pub fn alarms(&self, application: &str) -> Vec<AlarmDefinition> {
        application_alarms(application, &self.health)
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Current status of a deployment. Never mutates.
    pub fn get_status(&self, id: &str) -> RolloutResult<DeploymentRecord> {
        match self.slot(id) {
            Some(slot) => Ok(slot.lock().status()),
            None => self.stored(id),
        }
    }

    fn stored(&self, id: &str) -> RolloutResult<DeploymentRecord> {
        match &self.store {
            Some(store) => store
                .get_deployment(id)?
                .ok_or_else(|| RolloutError::DeploymentNotFound(id.to_string())),
            None => Err(RolloutError::DeploymentNotFound(id.to_string())),
        }
    }

    /// Every known deployment, oldest first.
    pub fn list(&self) -> RolloutResult<Vec<DeploymentRecord>> {
        let mut records: HashMap<DeploymentId, DeploymentRecord> = HashMap::new();
        if let Some(store) = &self.store {
            for record in store.list_deployments()? {
                records.insert(record.id.clone(), record);
            }
        }
        let slots: Vec<Arc<DeploymentSlot>> = self
            .deployments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for slot in slots {
            let record = slot.lock().status();
            records.insert(record.id.clone(), record);
        }
        let mut records: Vec<DeploymentRecord> = records.into_values().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Remove an archived deployment, and its history, from memory and the
    /// store.
    pub fn purge(&self, id: &str) -> RolloutResult<()> {
        match self.slot(id) {
            Some(slot) => {
                if !slot.lock().is_archived() {
                    return Err(RolloutError::NotArchived(id.to_string()));
                }
                self.deployments
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(id);
            }
            None => {
                if !self.stored(id)?.archived {
                    return Err(RolloutError::NotArchived(id.to_string()));
                }
            }
        }
        if let Some(store) = &self.store {
            store.delete_deployment(id)?;
        }
        info!(deployment = %id, "deployment purged");
        Ok(())
    }

    /// State changes of a deployment in order.
    pub fn history(&self, id: &str) -> RolloutResult<Vec<StateChangeRecord>> {
        if let Some(slot) = self.slot(id) {
            return Ok(slot.lock().history().to_vec());
        }
        // Fails with NotFound when the deployment is unknown.
        self.stored(id)?;
        match &self.store {
            Some(store) => Ok(store.list_history(id)?),
            None => Ok(Vec::new()),
        }
    }

    // ── Task sets ──────────────────────────────────────────────────

    pub fn task_set(&self, pool_id: &str) -> Option<TaskSet> {
        self.registry().get(pool_id).cloned()
    }

    /// Record the number of instances actually running in a pool and
    /// return the updated task set.
    pub fn observe_pool(&self, pool_id: &str, running: u32) -> RolloutResult<TaskSet> {
        let mut registry = self.registry();
        registry.observe(pool_id, running).map_err(|e| match e {
            TaskSetError::UnknownPool(pool) => RolloutError::UnknownPool(pool),
            other => RolloutError::TaskSet(other),
        })?;
        registry
            .get(pool_id)
            .cloned()
            .ok_or_else(|| RolloutError::UnknownPool(pool_id.to_string()))
    }

    /// Terminate a pool now. A draining pool whose wait has not elapsed is
    /// left in place and `Deferred` is returned.
    pub fn terminate_pool(&self, pool_id: &str, now: u64) -> RolloutResult<TerminateOutcome> {
        let outcome = self.registry().terminate(pool_id, now)?;
        if let TerminateOutcome::Terminated { instances } = &outcome {
            self.stop_instances(pool_id, instances);
        }
        Ok(outcome)
    }

    /// The pool serving all traffic for an application, if any.
    pub fn live_pool(&self, application: &str) -> Option<PoolId> {
        self.live_pools().get(application).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluegreen_core::DriverError;
    use bluegreen_core::config::DeploymentDefaults;

    struct NullDriver;

    impl WeightSetter for NullDriver {
        fn set_weights(&self, _: &PoolId, _: u32, _: &PoolId, _: u32) -> Result<(), DriverError> {
            Ok(())
        }
    }

    impl Provisioner for NullDriver {
        fn provision(&self, spec: &PoolSpec) -> Result<Vec<InstanceHandle>, DriverError> {
            Ok((0..spec.desired_count)
                .map(|i| format!("{}/{i}", spec.revision))
                .collect())
        }

        fn terminate_instances(&self, _: &[InstanceHandle]) -> Result<(), DriverError> {
            Ok(())
        }
    }

    fn controller() -> DeploymentController {
        let config = ControllerConfig {
            deployment: DeploymentDefaults {
                preset: "all-at-once".to_string(),
                termination_wait_minutes: 0,
            },
            ..ControllerConfig::default()
        };
        let driver = Arc::new(NullDriver);
        DeploymentController::new(&config, driver.clone(), driver)
    }

    fn pools() -> PoolsSpec {
        PoolsSpec {
            blue: PoolSpec {
                revision: "web:1".to_string(),
                desired_count: 2,
            },
            green: PoolSpec {
                revision: "web:2".to_string(),
                desired_count: 2,
            },
        }
    }

    #[test]
    fn ids_are_sequential_per_controller() {
        let c = controller();
        let a = c.create_deployment("web", c.default_plan(), &pools(), 0).unwrap();
        let b = c.create_deployment("api", c.default_plan(), &pools(), 0).unwrap();
        assert_eq!(a, "web-000001");
        assert_eq!(b, "api-000002");
    }

    #[test]
    fn next_deployment_reuses_live_pool_as_blue() {
        let c = controller();
        let first = c.create_deployment("web", c.default_plan(), &pools(), 0).unwrap();
        let record = c.tick(&first, 0).unwrap();
        assert_eq!(record.state, DeploymentState::Complete);
        assert!(record.archived);
        assert_eq!(c.live_pool("web").as_deref(), Some("web-000001-green"));

        let second = c.create_deployment("web", c.default_plan(), &pools(), 10).unwrap();
        let status = c.get_status(&second).unwrap();
        assert_eq!(status.blue_pool, "web-000001-green");
        assert_eq!(status.green_pool, "web-000002-green");
    }

    #[test]
    fn unknown_deployment_not_found() {
        let c = controller();
        assert!(matches!(
            c.get_status("nope"),
            Err(RolloutError::DeploymentNotFound(_))
        ));
        assert!(matches!(c.tick("nope", 0), Err(RolloutError::DeploymentNotFound(_))));
        assert!(matches!(c.history("nope"), Err(RolloutError::DeploymentNotFound(_))));
    }

    #[test]
    fn sample_for_unwatched_pool_rejected() {
        let c = controller();
        let err = c
            .ingest_sample(HealthSample {
                pool_id: "ghost".to_string(),
                timestamp: 0,
                unhealthy_hosts: 0,
                http_5xx: 0,
                window_secs: 300,
            })
            .unwrap_err();
        assert!(matches!(err, RolloutError::UnknownPool(p) if p == "ghost"));
    }

    #[test]
    fn store_restores_numbering_and_abandons_active_records() {
        let store = StateStore::open_in_memory().unwrap();
        {
            let c = controller().with_store(store.clone()).unwrap();
            c.create_deployment("web", PlanRequest::Linear { percent: 10, interval_secs: 60 }, &pools(), 0)
                .unwrap();
        }

        let c = controller().with_store(store.clone()).unwrap();
        let old = c.get_status("web-000001").unwrap();
        assert_eq!(old.state, DeploymentState::Failed);
        assert_eq!(old.failure_reason.as_deref(), Some("controller restarted"));

        assert!(old.archived);

        let next = c.create_deployment("web", c.default_plan(), &pools(), 100).unwrap();
        assert_eq!(next, "web-000002");
        assert_eq!(c.list().unwrap().len(), 2);

        let history = c.history("web-000001").unwrap();
        let steps: Vec<(DeploymentState, DeploymentState, u32)> =
            history.iter().map(|h| (h.from, h.to, h.seq)).collect();
        assert_eq!(
            steps,
            vec![
                (DeploymentState::Created, DeploymentState::Provisioning, 0),
                (DeploymentState::Provisioning, DeploymentState::Shifting, 1),
                (DeploymentState::Shifting, DeploymentState::Failed, 2),
            ]
        );
    }

    #[test]
    fn archived_deployments_leave_memory_when_stored() {
        let store = StateStore::open_in_memory().unwrap();
        let c = controller().with_store(store).unwrap();
        for n in 0..50u64 {
            let id = c.create_deployment("web", c.default_plan(), &pools(), n * 10).unwrap();
            let record = c.tick(&id, n * 10).unwrap();
            assert!(record.archived, "{record:?}");
        }

        assert!(c.deployments.read().unwrap().is_empty());
        // Only the live pool is still tracked.
        assert_eq!(c.registry().len(), 1);
        assert!(c.task_set("web-000001-blue").is_none());
        assert_eq!(c.live_pool("web").as_deref(), Some("web-000050-green"));

        let first = c.get_status("web-000001").unwrap();
        assert_eq!(first.state, DeploymentState::Complete);
        assert_eq!(c.history("web-000001").unwrap().len(), 4);
        assert_eq!(c.list().unwrap().len(), 50);
        assert_eq!(c.tick_all(1000).len(), 0);
        assert!(matches!(
            c.force_rollback("web-000001", "too late", 1000),
            Err(RolloutError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn purge_removes_archived_records() {
        let store = StateStore::open_in_memory().unwrap();
        let c = controller().with_store(store.clone()).unwrap();
        let done = c.create_deployment("web", c.default_plan(), &pools(), 0).unwrap();
        c.tick(&done, 0).unwrap();
        let live = c
            .create_deployment("web", PlanRequest::Linear { percent: 10, interval_secs: 60 }, &pools(), 5)
            .unwrap();

        assert!(matches!(c.purge(&live), Err(RolloutError::NotArchived(_))));
        c.purge(&done).unwrap();
        assert!(store.get_deployment(&done).unwrap().is_none());
        assert!(store.list_history(&done).unwrap().is_empty());
        assert!(matches!(c.get_status(&done), Err(RolloutError::DeploymentNotFound(_))));
        assert!(matches!(c.purge(&done), Err(RolloutError::DeploymentNotFound(_))));
    }

    #[test]
    fn failed_provisioning_is_archived_at_once() {
        struct NoCapacity;
        impl WeightSetter for NoCapacity {
            fn set_weights(&self, _: &PoolId, _: u32, _: &PoolId, _: u32) -> Result<(), DriverError> {
                Ok(())
            }
        }
        impl Provisioner for NoCapacity {
            fn provision(&self, _: &PoolSpec) -> Result<Vec<InstanceHandle>, DriverError> {
                Err(DriverError::Provision("no capacity".to_string()))
            }
            fn terminate_instances(&self, _: &[InstanceHandle]) -> Result<(), DriverError> {
                Ok(())
            }
        }

        let driver = Arc::new(NoCapacity);
        let c = DeploymentController::new(&ControllerConfig::default(), driver.clone(), driver)
            .with_store(StateStore::open_in_memory().unwrap())
            .unwrap();
        assert!(c.create_deployment("web", c.default_plan(), &pools(), 0).is_err());

        assert!(c.deployments.read().unwrap().is_empty());
        assert!(c.registry().is_empty());
        let record = c.get_status("web-000001").unwrap();
        assert_eq!(record.state, DeploymentState::Failed);
        assert!(record.archived);
    }

    #[test]
    fn completing_frees_application_before_retiring_blue() {
        let c = controller();
        let id = c.create_deployment("web", c.default_plan(), &pools(), 0).unwrap();
        // The old blue pool is gone from the registry before completion, so
        // scheduling its retirement fails. The application must still be free.
        c.registry().terminate("web-000001-blue", 0).unwrap();
        c.registry().forget("web-000001-blue");

        let record = c.tick(&id, 0).unwrap();
        assert_eq!(record.state, DeploymentState::Complete);
        assert_eq!(c.live_pool("web").as_deref(), Some("web-000001-green"));
        c.create_deployment("web", c.default_plan(), &pools(), 10).unwrap();
    }
}
