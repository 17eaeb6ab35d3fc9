//! Public data model: agents, clients, pools and allocations.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DIRECT_AMOUNT, SLICE_VALUE, STAR_POOL_AMOUNT, TOTAL_AMOUNT, TOTAL_SLICES,
};
use crate::rank::{Rank, Tier};

// ─── Identifiers ──────────────────────────────────────────────────────────────

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

id_type!(AgentId);
id_type!(ClientId);
id_type!(PoolId);
id_type!(AllocationId);

// ─── Agent ────────────────────────────────────────────────────────────────────

/// A participant in the reporting forest.
///
/// `supervisor_id` is the only link; children are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id:            AgentId,
    pub star_level:    u8,
    pub tier:          Tier,
    pub supervisor_id: Option<AgentId>,
}

impl Agent {
    /// New rookie agent.
    pub fn new(id: AgentId, supervisor_id: Option<AgentId>) -> Self {
        Self { id, star_level: 0, tier: Tier::Rookie, supervisor_id }
    }

    /// Agent at a fixed star level; `tier` is derived from it.
    pub fn with_star_level(id: AgentId, star_level: u8, supervisor_id: Option<AgentId>) -> Self {
        let rank = Rank::from_star_level(star_level);
        Self { id, star_level: rank.star_level, tier: rank.tier, supervisor_id }
    }

    pub fn rank(&self) -> Rank {
        Rank { tier: self.tier, star_level: self.star_level }
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id:        ClientId,
    /// Agent credited with the approval.
    pub closer_id: AgentId,
    pub approval:  ApprovalState,
}

impl Client {
    pub fn is_approved(&self) -> bool {
        self.approval == ApprovalState::Approved
    }
}

// ─── Bonus pool ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Pending,
    Distributed,
}

/// One link of the supervisor chain as it stood at distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub agent_id:   AgentId,
    pub star_level: u8,
}

/// Closer first, then each supervisor upward.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HierarchySnapshot(pub Vec<SnapshotEntry>);

impl HierarchySnapshot {
    pub fn agents(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.0.iter().map(|e| e.agent_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The fixed-size monetary unit created once per approved client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusPool {
    pub id:                 PoolId,
    pub client_id:          ClientId,
    pub closer_id:          AgentId,
    pub total_amount:       u64,
    pub direct_amount:      u64,
    pub star_pool_amount:   u64,
    pub total_slices:       u8,
    pub slice_value:        u64,
    pub distributed_slices: u8,
    pub recycled_slices:    u8,
    pub status:             PoolStatus,
    /// Supervisor chain as walked when the pool was distributed.
    pub snapshot:           Option<HierarchySnapshot>,
}

impl BonusPool {
    pub fn is_distributed(&self) -> bool {
        self.status == PoolStatus::Distributed
    }

    /// Value forfeited through unclaimed slices.
    pub fn recycled_amount(&self) -> u64 {
        self.recycled_slices as u64 * self.slice_value
    }
}

/// Fields the storage layer needs to create a pool; constants are filled in by [`NewPool::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPool {
    pub client_id:        ClientId,
    pub closer_id:        AgentId,
    pub total_amount:     u64,
    pub direct_amount:    u64,
    pub star_pool_amount: u64,
    pub total_slices:     u8,
    pub slice_value:      u64,
}

impl NewPool {
    pub fn new(client_id: ClientId, closer_id: AgentId) -> Self {
        Self {
            client_id,
            closer_id,
            total_amount:     TOTAL_AMOUNT,
            direct_amount:    DIRECT_AMOUNT,
            star_pool_amount: STAR_POOL_AMOUNT,
            total_slices:     TOTAL_SLICES,
            slice_value:      SLICE_VALUE,
        }
    }

    /// Materialize as a freshly created, pending pool.
    pub fn into_pool(self, id: PoolId) -> BonusPool {
        BonusPool {
            id,
            client_id:          self.client_id,
            closer_id:          self.closer_id,
            total_amount:       self.total_amount,
            direct_amount:      self.direct_amount,
            star_pool_amount:   self.star_pool_amount,
            total_slices:       self.total_slices,
            slice_value:        self.slice_value,
            distributed_slices: 0,
            recycled_slices:    0,
            status:             PoolStatus::Pending,
            snapshot:           None,
        }
    }
}

/// The pool transition written by distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolUpdate {
    pub status:             PoolStatus,
    pub distributed_slices: u8,
    pub recycled_slices:    u8,
    pub snapshot:           Option<HierarchySnapshot>,
}

// ─── Allocation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationType {
    Direct,
    StarSlice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Pending,
    Paid,
}

/// One grant to one agent from one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusAllocation {
    pub id:                 AllocationId,
    pub bonus_pool_id:      PoolId,
    pub agent_id:           AgentId,
    #[serde(rename = "type")]
    pub kind:               AllocationType,
    /// Zero for `direct`.
    pub slices:             u8,
    pub amount:             u64,
    pub status:             AllocationStatus,
    /// Rank at distribution time; frozen for audit.
    pub star_level_at_time: u8,
}

/// An allocation before the store assigns it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAllocation {
    pub bonus_pool_id:      PoolId,
    pub agent_id:           AgentId,
    #[serde(rename = "type")]
    pub kind:               AllocationType,
    pub slices:             u8,
    pub amount:             u64,
    pub star_level_at_time: u8,
}

impl NewAllocation {
    pub fn into_allocation(self, id: AllocationId) -> BonusAllocation {
        BonusAllocation {
            id,
            bonus_pool_id:      self.bonus_pool_id,
            agent_id:           self.agent_id,
            kind:               self.kind,
            slices:             self.slices,
            amount:             self.amount,
            status:             AllocationStatus::Pending,
            star_level_at_time: self.star_level_at_time,
        }
    }
}

// ─── Reporting ────────────────────────────────────────────────────────────────

/// A pool with every allocation it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolReport {
    pub pool:        BonusPool,
    pub allocations: Vec<BonusAllocation>,
}

impl PoolReport {
    pub fn allocated_amount(&self) -> u64 {
        self.allocations.iter().map(|a| a.amount).sum()
    }

    pub fn star_slices_for(&self, agent: AgentId) -> u8 {
        self.allocations
            .iter()
            .filter(|a| a.agent_id == agent && a.kind == AllocationType::StarSlice)
            .map(|a| a.slices)
            .sum()
    }
}
