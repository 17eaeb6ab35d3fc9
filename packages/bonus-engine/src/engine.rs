//! [`BonusEngine`] — the entry point the client-approval workflow calls.

use tracing::{debug, info, warn};

use crate::{
    config::EngineConfig,
    distribution::SliceWalker,
    error::{Error, Result},
    rank::{evaluate_rank, Rank},
    store::{AgentDirectory, Ledger, LedgerOp},
    types::{AgentId, BonusPool, ClientId, NewPool, PoolId, PoolReport, PoolStatus},
};

/// Pool creation, slice distribution and rank upkeep over a store.
///
/// ```rust,no_run
/// # use bonus_engine::{BonusEngine, InMemoryStore, ClientId};
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = BonusEngine::new(InMemoryStore::new());
/// let pool = engine.ensure_bonus_pool(ClientId(42)).await?;
/// println!("pool {} recycled {} slices", pool.id, pool.recycled_slices);
/// # Ok(())
/// # }
/// ```
pub struct BonusEngine<S> {
    store:  S,
    config: EngineConfig,
}

impl<S> BonusEngine<S>
where
    S: AgentDirectory + Ledger,
{
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Rank ──────────────────────────────────────────────────────────────────

    /// Recount the agent's approved clients and persist the resulting rank.
    pub async fn recalculate_rank(&self, agent_id: AgentId) -> Result<Rank> {
        let previous = self.store.get_agent(agent_id).await?.rank();
        let approved = self.store.count_approved_clients(agent_id).await?;
        let rank = evaluate_rank(approved);
        self.store.set_rank(agent_id, rank).await?;

        if rank != previous {
            info!(agent = %agent_id, approved, from = %previous.tier, to = %rank.tier, "rank changed");
        } else {
            debug!(agent = %agent_id, approved, tier = %rank.tier, "rank unchanged");
        }
        Ok(rank)
    }

    // ── Pool factory ──────────────────────────────────────────────────────────

    /// Return the client's bonus pool, creating and distributing it on first call.
    ///
    /// An existing pool is returned untouched, whatever its status. A pending
    /// pool left by an earlier failure is finished with [`BonusEngine::distribute`].
    pub async fn ensure_bonus_pool(&self, client_id: ClientId) -> Result<BonusPool> {
        if let Some(pool) = self.store.find_pool_by_client(client_id).await? {
            debug!(client = %client_id, pool = %pool.id, status = ?pool.status, "bonus pool already exists");
            return Ok(pool);
        }

        let client = self.store.get_client(client_id).await?;
        if !client.is_approved() {
            return Err(Error::ClientNotApproved(client_id));
        }
        let closer = self.store.get_agent(client.closer_id).await?;

        let pool = match self.store.create_pool(NewPool::new(client_id, closer.id)).await {
            Ok(pool) => pool,
            Err(Error::DuplicatePool(_)) => {
                warn!(client = %client_id, "lost pool creation race; returning existing pool");
                return self
                    .store
                    .find_pool_by_client(client_id)
                    .await?
                    .ok_or_else(|| Error::Storage(format!(
                        "uniqueness violation for client {client_id} but no pool found"
                    )));
            }
            Err(e) => return Err(e),
        };
        info!(client = %client_id, pool = %pool.id, closer = %closer.id, tier = %closer.tier, "bonus pool created");

        self.distribute(pool.id).await?;
        self.recalculate_rank(closer.id).await?;

        self.store.get_pool(pool.id).await
    }

    // ── Distribution ──────────────────────────────────────────────────────────

    /// Split a pending pool into allocations. No-op when already distributed.
    ///
    /// All allocations and the pool transition are committed in one batch;
    /// any failure leaves the pool pending with no allocations.
    pub async fn distribute(&self, pool_id: PoolId) -> Result<()> {
        let pool = self.store.get_pool(pool_id).await?;
        if pool.is_distributed() {
            debug!(pool = %pool_id, "already distributed");
            return Ok(());
        }

        let mut walker = SliceWalker::new(&pool, self.config.max_chain_depth);
        let mut next = Some(walker.start());
        while let Some(agent_id) = next {
            let agent = self.store.get_agent(agent_id).await?;
            next = walker.visit(&agent)?;
        }
        let plan = walker.finish()?;
        plan.verify_conservation(&pool)?;

        let update = plan.pool_update(self.config.capture_snapshot);
        let allocation_count = plan.allocations.len();
        let mut ops: Vec<LedgerOp> =
            plan.allocations.into_iter().map(LedgerOp::CreateAllocation).collect();
        ops.push(LedgerOp::UpdatePool { id: pool_id, from: PoolStatus::Pending, update });

        match self.store.run_atomic(ops).await {
            Ok(()) => {}
            Err(Error::PoolConflict(_)) => {
                let current = self.store.get_pool(pool_id).await?;
                if current.is_distributed() {
                    warn!(pool = %pool_id, "distributed concurrently; discarding duplicate plan");
                    return Ok(());
                }
                return Err(Error::PoolConflict(pool_id));
            }
            Err(e) => return Err(e),
        }

        info!(
            pool = %pool_id,
            closer = %pool.closer_id,
            allocations = allocation_count,
            distributed_slices = plan.distributed_slices,
            recycled_slices = plan.recycled_slices,
            "bonus pool distributed"
        );
        Ok(())
    }

    // ── Reporting ─────────────────────────────────────────────────────────────

    /// Pool with its allocations, audited against the conservation invariant.
    pub async fn pool_report(&self, pool_id: PoolId) -> Result<PoolReport> {
        let pool = self.store.get_pool(pool_id).await?;
        let allocations = self.store.allocations_for_pool(pool_id).await?;
        let report = PoolReport { pool, allocations };

        let allocated = report.allocated_amount();
        let recycled = report.pool.recycled_amount();
        let consistent = match report.pool.status {
            PoolStatus::Pending => report.allocations.is_empty()
                && report.pool.distributed_slices == 0
                && report.pool.recycled_slices == 0,
            PoolStatus::Distributed => {
                allocated + recycled == report.pool.total_amount
                    && report.pool.distributed_slices as u16 + report.pool.recycled_slices as u16
                        == report.pool.total_slices as u16
            }
        };
        if !consistent {
            return Err(Error::ConservationViolated {
                pool: pool_id,
                allocated,
                recycled,
                total: report.pool.total_amount,
            });
        }
        Ok(report)
    }
}
