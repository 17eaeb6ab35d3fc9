//! Persistence seam: the agent directory and the allocation ledger.
//!
//! Both are external collaborators. [`crate::memory::InMemoryStore`] is the
//! reference implementation; a relational backend implements the same traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::rank::Rank;
use crate::types::{
    Agent, AgentId, BonusAllocation, BonusPool, Client, ClientId, NewAllocation, NewPool,
    PoolId, PoolStatus, PoolUpdate,
};

/// Agents, their ranks and their supervisor links.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// `Err(AgentNotFound)` for an unknown id.
    async fn get_agent(&self, id: AgentId) -> Result<Agent>;

    async fn count_approved_clients(&self, agent: AgentId) -> Result<u64>;

    /// Persist tier and star level together.
    async fn set_rank(&self, agent: AgentId, rank: Rank) -> Result<()>;
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOp {
    CreateAllocation(NewAllocation),
    /// Applied only while the pool is still in `from`; otherwise the whole
    /// batch fails with `Err(PoolConflict)`.
    UpdatePool { id: PoolId, from: PoolStatus, update: PoolUpdate },
}

/// Pools, allocations and the transaction primitive over them.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get_client(&self, id: ClientId) -> Result<Client>;

    async fn find_pool_by_client(&self, client: ClientId) -> Result<Option<BonusPool>>;

    /// `Err(PoolNotFound)` for an unknown id.
    async fn get_pool(&self, id: PoolId) -> Result<BonusPool>;

    /// Insert a pending pool. Must fail with `Err(DuplicatePool)` when a pool
    /// already exists for `pool.client_id`.
    async fn create_pool(&self, pool: NewPool) -> Result<BonusPool>;

    async fn allocations_for_pool(&self, pool: PoolId) -> Result<Vec<BonusAllocation>>;

    /// Apply every op or none of them.
    async fn run_atomic(&self, ops: Vec<LedgerOp>) -> Result<()>;
}
