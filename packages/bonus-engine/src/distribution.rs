//! Slice distribution: direct bonus plus a bottom-up walk of the supervisor chain.
//!
//! The walk is a small state machine ([`SliceWalker`]) so the caller decides how
//! agents are fetched. [`crate::BonusEngine`] feeds it from async storage one
//! ancestor at a time; [`plan_distribution`] feeds it from a synchronous lookup.
//!
//! Per visited agent:
//! `claim = min(star_level, remaining)`; a positive claim becomes one
//! `star_slice` allocation worth `claim × slice_value`. The walk stops when
//! `remaining == 0` or the top of the chain is reached. Leftover slices are
//! recycled, never paid.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{
    Agent, AgentId, AllocationType, BonusPool, HierarchySnapshot, NewAllocation, PoolId,
    PoolStatus, PoolUpdate, SnapshotEntry,
};

// ─── Plan ─────────────────────────────────────────────────────────────────────

/// Everything distribution will write, computed before any write happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionPlan {
    pub pool_id:            PoolId,
    /// Direct allocation first, then star slices in claim order.
    pub allocations:        Vec<NewAllocation>,
    pub distributed_slices: u8,
    pub recycled_slices:    u8,
    pub snapshot:           HierarchySnapshot,
}

impl DistributionPlan {
    /// Pool transition to commit alongside the allocations.
    pub fn pool_update(&self, capture_snapshot: bool) -> PoolUpdate {
        PoolUpdate {
            status:             PoolStatus::Distributed,
            distributed_slices: self.distributed_slices,
            recycled_slices:    self.recycled_slices,
            snapshot:           capture_snapshot.then(|| self.snapshot.clone()),
        }
    }

    pub fn allocated_amount(&self) -> u64 {
        self.allocations.iter().map(|a| a.amount).sum()
    }

    /// `allocated + recycled × slice_value == total_amount` and the slice counts add up.
    pub fn verify_conservation(&self, pool: &BonusPool) -> Result<()> {
        let allocated = self.allocated_amount();
        let recycled = self.recycled_slices as u64 * pool.slice_value;
        let slices_ok =
            self.distributed_slices as u16 + self.recycled_slices as u16 == pool.total_slices as u16;
        if !slices_ok || allocated + recycled != pool.total_amount {
            return Err(Error::ConservationViolated {
                pool: pool.id,
                allocated,
                recycled,
                total: pool.total_amount,
            });
        }
        Ok(())
    }
}

// ─── Walker ───────────────────────────────────────────────────────────────────

/// Incremental walk over one pool's supervisor chain.
#[derive(Debug)]
pub struct SliceWalker {
    pool_id:        PoolId,
    closer_id:      AgentId,
    direct_amount:  u64,
    slice_value:    u64,
    total_slices:   u8,
    remaining:      u8,
    max_depth:      Option<usize>,
    visited:        HashSet<AgentId>,
    allocations:    Vec<NewAllocation>,
    snapshot:       Vec<SnapshotEntry>,
}

impl SliceWalker {
    /// `max_depth`, when set, bounds the supervisor links followed above the closer.
    /// Without it the walk runs to the top of the chain; the visited set still
    /// catches cycles.
    pub fn new(pool: &BonusPool, max_depth: Option<usize>) -> Self {
        Self {
            pool_id:       pool.id,
            closer_id:     pool.closer_id,
            direct_amount: pool.direct_amount,
            slice_value:   pool.slice_value,
            total_slices:  pool.total_slices,
            remaining:     pool.total_slices,
            max_depth,
            visited:       HashSet::new(),
            allocations:   Vec::new(),
            snapshot:      Vec::new(),
        }
    }

    /// The first agent to feed into [`SliceWalker::visit`].
    pub fn start(&self) -> AgentId {
        self.closer_id
    }

    pub fn remaining(&self) -> u8 {
        self.remaining
    }

    /// Apply `agent`'s claim and return the next agent to visit, or `None` when done.
    pub fn visit(&mut self, agent: &Agent) -> Result<Option<AgentId>> {
        if self.visited.is_empty() {
            if agent.id != self.closer_id {
                return Err(Error::InvalidArgument(format!(
                    "walk for pool {} must start at closer {}, got {}",
                    self.pool_id, self.closer_id, agent.id
                )));
            }
            self.allocations.push(NewAllocation {
                bonus_pool_id:      self.pool_id,
                agent_id:           agent.id,
                kind:               AllocationType::Direct,
                slices:             0,
                amount:             self.direct_amount,
                star_level_at_time: agent.star_level,
            });
        }

        if !self.visited.insert(agent.id) {
            return Err(Error::HierarchyCycle { agent: agent.id });
        }
        self.snapshot.push(SnapshotEntry { agent_id: agent.id, star_level: agent.star_level });

        let claim = agent.star_level.min(self.remaining);
        if claim > 0 {
            self.allocations.push(NewAllocation {
                bonus_pool_id:      self.pool_id,
                agent_id:           agent.id,
                kind:               AllocationType::StarSlice,
                slices:             claim,
                amount:             claim as u64 * self.slice_value,
                star_level_at_time: agent.star_level,
            });
            self.remaining -= claim;
        }
        debug!(
            pool = %self.pool_id,
            agent = %agent.id,
            star_level = agent.star_level,
            claim,
            remaining = self.remaining,
            "slice claim"
        );

        if self.remaining == 0 {
            return Ok(None);
        }
        match agent.supervisor_id {
            None => Ok(None),
            Some(next) => {
                if self.visited.contains(&next) {
                    return Err(Error::HierarchyCycle { agent: next });
                }
                // visited includes the closer, which is not a supervisor link
                if let Some(limit) = self.max_depth {
                    if self.visited.len() > limit {
                        return Err(Error::ChainTooDeep { closer: self.closer_id, limit });
                    }
                }
                Ok(Some(next))
            }
        }
    }

    /// Close the walk. Fails if the closer was never visited.
    pub fn finish(self) -> Result<DistributionPlan> {
        if self.visited.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "walk for pool {} finished before visiting closer {}",
                self.pool_id, self.closer_id
            )));
        }
        Ok(DistributionPlan {
            pool_id:            self.pool_id,
            allocations:        self.allocations,
            distributed_slices: self.total_slices - self.remaining,
            recycled_slices:    self.remaining,
            snapshot:           HierarchySnapshot(self.snapshot),
        })
    }
}

/// Run the whole walk against a synchronous agent lookup.
pub fn plan_distribution<F>(
    pool: &BonusPool,
    max_depth: Option<usize>,
    mut lookup: F,
) -> Result<DistributionPlan>
where
    F: FnMut(AgentId) -> Result<Agent>,
{
    let mut walker = SliceWalker::new(pool, max_depth);
    let mut next = Some(walker.start());
    while let Some(id) = next {
        let agent = lookup(id)?;
        next = walker.visit(&agent)?;
    }
    walker.finish()
}
