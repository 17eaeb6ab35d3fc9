//! In-memory [`AgentDirectory`] + [`Ledger`].
//!
//! Backs the test suite and the CLI. One mutex guards all state, so a
//! `run_atomic` batch is validated and applied without interleaving.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::rank::Rank;
use crate::store::{AgentDirectory, Ledger, LedgerOp};
use crate::types::{
    Agent, AgentId, AllocationId, ApprovalState, BonusAllocation, BonusPool, Client, ClientId,
    NewPool, PoolId, PoolStatus,
};

// ─── Fixture ──────────────────────────────────────────────────────────────────

/// Agent as written in a fixture; `tier` is derived from `star_level`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id:            AgentId,
    #[serde(default)]
    pub star_level:    u8,
    #[serde(default)]
    pub supervisor_id: Option<AgentId>,
}

/// Seed data for an [`InMemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub agents:  Vec<AgentRecord>,
    #[serde(default)]
    pub clients: Vec<Client>,
}

impl Fixture {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::InvalidArgument(format!("fixture: {e}")))
    }
}

// ─── Store ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Inner {
    agents:          HashMap<AgentId, Agent>,
    clients:         BTreeMap<ClientId, Client>,
    pools:           BTreeMap<PoolId, BonusPool>,
    pool_by_client:  HashMap<ClientId, PoolId>,
    allocations:     BTreeMap<AllocationId, BonusAllocation>,
    next_pool:       u64,
    next_allocation: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Result<Self> {
        let mut inner = Inner::default();
        for rec in fixture.agents {
            if rec.star_level > crate::constants::MAX_STAR_LEVEL {
                return Err(Error::InvalidArgument(format!(
                    "agent {} has star level {}",
                    rec.id, rec.star_level
                )));
            }
            if inner.agents.contains_key(&rec.id) {
                return Err(Error::InvalidArgument(format!("agent {} appears twice", rec.id)));
            }
            inner
                .agents
                .insert(rec.id, Agent::with_star_level(rec.id, rec.star_level, rec.supervisor_id));
        }
        for client in fixture.clients {
            if !inner.agents.contains_key(&client.closer_id) {
                return Err(Error::AgentNotFound(client.closer_id));
            }
            inner.clients.insert(client.id, client);
        }
        Ok(Self { inner: Mutex::new(inner) })
    }

    // ── Seeding ───────────────────────────────────────────────────────────────

    pub async fn insert_agent(&self, agent: Agent) {
        self.inner.lock().await.agents.insert(agent.id, agent);
    }

    pub async fn insert_client(&self, client: Client) {
        self.inner.lock().await.clients.insert(client.id, client);
    }

    pub async fn set_approval(&self, id: ClientId, approval: ApprovalState) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let client = inner.clients.get_mut(&id).ok_or(Error::ClientNotFound(id))?;
        client.approval = approval;
        Ok(())
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    pub async fn pools(&self) -> Vec<BonusPool> {
        self.inner.lock().await.pools.values().cloned().collect()
    }

    pub async fn clients(&self) -> Vec<Client> {
        self.inner.lock().await.clients.values().cloned().collect()
    }

    pub async fn allocations(&self) -> Vec<BonusAllocation> {
        self.inner.lock().await.allocations.values().cloned().collect()
    }
}

#[async_trait]
impl AgentDirectory for InMemoryStore {
    async fn get_agent(&self, id: AgentId) -> Result<Agent> {
        self.inner.lock().await.agents.get(&id).cloned().ok_or(Error::AgentNotFound(id))
    }

    async fn count_approved_clients(&self, agent: AgentId) -> Result<u64> {
        let inner = self.inner.lock().await;
        if !inner.agents.contains_key(&agent) {
            return Err(Error::AgentNotFound(agent));
        }
        Ok(inner
            .clients
            .values()
            .filter(|c| c.closer_id == agent && c.is_approved())
            .count() as u64)
    }

    async fn set_rank(&self, agent: AgentId, rank: Rank) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let record = inner.agents.get_mut(&agent).ok_or(Error::AgentNotFound(agent))?;
        record.tier = rank.tier;
        record.star_level = rank.star_level;
        Ok(())
    }
}

#[async_trait]
impl Ledger for InMemoryStore {
    async fn get_client(&self, id: ClientId) -> Result<Client> {
        self.inner.lock().await.clients.get(&id).cloned().ok_or(Error::ClientNotFound(id))
    }

    async fn find_pool_by_client(&self, client: ClientId) -> Result<Option<BonusPool>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .pool_by_client
            .get(&client)
            .and_then(|id| inner.pools.get(id))
            .cloned())
    }

    async fn get_pool(&self, id: PoolId) -> Result<BonusPool> {
        self.inner.lock().await.pools.get(&id).cloned().ok_or(Error::PoolNotFound(id))
    }

    async fn create_pool(&self, pool: NewPool) -> Result<BonusPool> {
        let mut inner = self.inner.lock().await;
        if inner.pool_by_client.contains_key(&pool.client_id) {
            return Err(Error::DuplicatePool(pool.client_id));
        }
        inner.next_pool += 1;
        let id = PoolId(inner.next_pool);
        let client_id = pool.client_id;
        let pool = pool.into_pool(id);
        inner.pools.insert(id, pool.clone());
        inner.pool_by_client.insert(client_id, id);
        Ok(pool)
    }

    async fn allocations_for_pool(&self, pool: PoolId) -> Result<Vec<BonusAllocation>> {
        let inner = self.inner.lock().await;
        if !inner.pools.contains_key(&pool) {
            return Err(Error::PoolNotFound(pool));
        }
        Ok(inner
            .allocations
            .values()
            .filter(|a| a.bonus_pool_id == pool)
            .cloned()
            .collect())
    }

    async fn run_atomic(&self, ops: Vec<LedgerOp>) -> Result<()> {
        let mut inner = self.inner.lock().await;

        // Validate the whole batch against staged pool states before touching anything.
        let mut staged: HashMap<PoolId, PoolStatus> = HashMap::new();
        for op in &ops {
            match op {
                LedgerOp::CreateAllocation(new) => {
                    if !inner.pools.contains_key(&new.bonus_pool_id) {
                        return Err(Error::PoolNotFound(new.bonus_pool_id));
                    }
                    if !inner.agents.contains_key(&new.agent_id) {
                        return Err(Error::AgentNotFound(new.agent_id));
                    }
                }
                LedgerOp::UpdatePool { id, from, update } => {
                    let current = match staged.get(id) {
                        Some(status) => *status,
                        None => inner.pools.get(id).ok_or(Error::PoolNotFound(*id))?.status,
                    };
                    if current != *from {
                        return Err(Error::PoolConflict(*id));
                    }
                    staged.insert(*id, update.status);
                }
            }
        }

        for op in ops {
            match op {
                LedgerOp::CreateAllocation(new) => {
                    inner.next_allocation += 1;
                    let id = AllocationId(inner.next_allocation);
                    inner.allocations.insert(id, new.into_allocation(id));
                }
                LedgerOp::UpdatePool { id, update, .. } => {
                    if let Some(pool) = inner.pools.get_mut(&id) {
                        pool.status = update.status;
                        pool.distributed_slices = update.distributed_slices;
                        pool.recycled_slices = update.recycled_slices;
                        pool.snapshot = update.snapshot;
                    }
                }
            }
        }
        Ok(())
    }
}
