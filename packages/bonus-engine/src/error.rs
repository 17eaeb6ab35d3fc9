//! Engine error type.

use crate::types::{AgentId, ClientId, PoolId};

/// All errors returned by the bonus engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    // ── Lookups ──────────────────────────────────────────────────────────────
    /// The agent directory has no record for this id.
    #[error("Agent {0} not found")]
    AgentNotFound(AgentId),

    #[error("Client {0} not found")]
    ClientNotFound(ClientId),

    #[error("Bonus pool {0} not found")]
    PoolNotFound(PoolId),

    /// Only approved clients generate a pool.
    #[error("Client {0} is not approved — no bonus pool can be created")]
    ClientNotApproved(ClientId),

    // ── Hierarchy walk ───────────────────────────────────────────────────────
    /// An agent was reached twice while walking supervisor links.
    #[error("Supervisor chain loops back to agent {agent}")]
    HierarchyCycle { agent: AgentId },

    /// The chain above `closer` is longer than the configured guard.
    #[error("Supervisor chain above agent {closer} exceeds {limit} levels")]
    ChainTooDeep { closer: AgentId, limit: usize },

    // ── Storage ──────────────────────────────────────────────────────────────
    /// Uniqueness violation on `client_id`; another writer created the pool.
    #[error("A bonus pool already exists for client {0}")]
    DuplicatePool(ClientId),

    /// A guarded pool transition found the pool in another state.
    #[error("Bonus pool {0} changed under a concurrent writer")]
    PoolConflict(PoolId),

    /// A persistence fault, surfaced unchanged.
    #[error("Storage error: {0}")]
    Storage(String),

    // ── Accounting ───────────────────────────────────────────────────────────
    /// Allocations plus recycled value do not add up to the pool total.
    #[error("Conservation violated on pool {pool}: allocated={allocated}, recycled={recycled}, total={total}")]
    ConservationViolated {
        pool:      PoolId,
        allocated: u64,
        recycled:  u64,
        total:     u64,
    },

    // ── Validation ───────────────────────────────────────────────────────────
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Convenience alias so every module can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;
