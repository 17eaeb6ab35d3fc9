use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bonus_engine::{
    evaluate_rank, plan_distribution, Agent, AgentDirectory, AgentId, AllocationType,
    ApprovalState, BonusAllocation, BonusEngine, BonusPool, Client, ClientId, Error,
    InMemoryStore, Ledger, LedgerOp, NewPool, PoolId, PoolStatus, Rank, Result, Tier,
};

const CLIENT: ClientId = ClientId(100);

/// Chain given top-down as star levels. Ids run 1..=n; agent n closes `CLIENT`.
async fn chain_store(levels: &[u8]) -> InMemoryStore {
    let store = InMemoryStore::new();
    for (i, &lvl) in levels.iter().enumerate() {
        let id = AgentId(i as u64 + 1);
        let sup = if i == 0 { None } else { Some(AgentId(i as u64)) };
        store.insert_agent(Agent::with_star_level(id, lvl, sup)).await;
    }
    store
        .insert_client(Client {
            id:        CLIENT,
            closer_id: AgentId(levels.len() as u64),
            approval:  ApprovalState::Approved,
        })
        .await;
    store
}

fn star_slices(allocs: &[BonusAllocation]) -> Vec<(u64, u8, u64)> {
    allocs
        .iter()
        .filter(|a| a.kind == AllocationType::StarSlice)
        .map(|a| (a.agent_id.0, a.slices, a.amount))
        .collect()
}

fn assert_conserved(pool: &BonusPool, allocs: &[BonusAllocation]) {
    assert_eq!(pool.status, PoolStatus::Distributed);
    assert_eq!(pool.distributed_slices + pool.recycled_slices, 4);
    let paid: u64 = allocs.iter().map(|a| a.amount).sum();
    assert_eq!(paid + pool.recycled_slices as u64 * 50, 400);
}

async fn run(levels: &[u8]) -> (BonusPool, Vec<BonusAllocation>) {
    let engine = BonusEngine::new(chain_store(levels).await);
    let pool = engine.ensure_bonus_pool(CLIENT).await.unwrap();
    let report = engine.pool_report(pool.id).await.unwrap();
    assert_conserved(&report.pool, &report.allocations);
    (report.pool, report.allocations)
}

// ===== CONCRETE SCENARIOS =====

#[tokio::test]
async fn test_rookie_without_supervisor() {
    let (pool, allocs) = run(&[0]).await;
    assert_eq!(allocs.len(), 1);
    assert_eq!(allocs[0].kind, AllocationType::Direct);
    assert_eq!(allocs[0].amount, 200);
    assert_eq!(allocs[0].slices, 0);
    assert_eq!(pool.recycled_slices, 4);
}

#[tokio::test]
async fn test_one_star_without_supervisor() {
    let (pool, allocs) = run(&[1]).await;
    assert_eq!(allocs.len(), 2);
    assert_eq!(star_slices(&allocs), vec![(1, 1, 50)]);
    assert_eq!(pool.recycled_slices, 3);
}

#[tokio::test]
async fn test_four_level_chain_exhausts_before_top() {
    // 4 → 3 → 2 → 1; the rank-1 agent closes
    let (pool, allocs) = run(&[4, 3, 2, 1]).await;
    assert_eq!(allocs.len(), 4);
    assert_eq!(star_slices(&allocs), vec![(4, 1, 50), (3, 2, 100), (2, 1, 50)]);
    assert_eq!(pool.recycled_slices, 0);
    // top agent was never reached
    let snapshot = pool.snapshot.unwrap();
    assert_eq!(snapshot.agents().collect::<Vec<_>>(), vec![AgentId(4), AgentId(3), AgentId(2)]);
}

#[tokio::test]
async fn test_two_star_closer_under_four_star() {
    let (pool, allocs) = run(&[4, 2]).await;
    assert_eq!(star_slices(&allocs), vec![(2, 2, 100), (1, 2, 100)]);
    assert_eq!(pool.recycled_slices, 0);
}

#[tokio::test]
async fn test_short_chain_recycles_remainder() {
    let (pool, allocs) = run(&[2, 1]).await;
    assert_eq!(star_slices(&allocs), vec![(2, 1, 50), (1, 2, 100)]);
    assert_eq!(pool.recycled_slices, 1);
    assert_eq!(pool.distributed_slices, 3);
}

#[tokio::test]
async fn test_four_star_closer_keeps_every_slice() {
    let (pool, allocs) = run(&[4, 4]).await;
    assert_eq!(allocs.len(), 2);
    assert_eq!(star_slices(&allocs), vec![(2, 4, 200)]);
    assert_eq!(pool.recycled_slices, 0);
}

#[tokio::test]
async fn test_rank_recorded_at_distribution_time() {
    let (_, allocs) = run(&[2, 1]).await;
    let levels: Vec<(u64, u8)> = allocs.iter().map(|a| (a.agent_id.0, a.star_level_at_time)).collect();
    assert_eq!(levels, vec![(2, 1), (2, 1), (1, 2)]);
}

#[tokio::test]
async fn test_seventy_link_chain_reaches_the_top() {
    // 4-star at the top, 69 rookies below; agent 70 closes
    let mut levels = vec![0u8; 70];
    levels[0] = 4;
    let (pool, allocs) = run(&levels).await;
    assert_eq!(star_slices(&allocs), vec![(1, 4, 200)]);
    assert_eq!(pool.recycled_slices, 0);
    assert_eq!(pool.snapshot.unwrap().len(), 70);
}

#[test]
fn test_rank_boundaries() {
    let expected = [
        (2, Tier::Rookie),
        (3, Tier::OneStar),
        (6, Tier::OneStar),
        (7, Tier::TwoStar),
        (12, Tier::TwoStar),
        (13, Tier::ThreeStar),
        (20, Tier::ThreeStar),
        (21, Tier::FourStar),
    ];
    for (count, tier) in expected {
        assert_eq!(evaluate_rank(count), Rank::from(tier), "count {count}");
    }
}

// ===== IDEMPOTENCE =====

#[tokio::test]
async fn test_ensure_twice_returns_same_pool() {
    let engine = BonusEngine::new(chain_store(&[3, 1]).await);
    let first = engine.ensure_bonus_pool(CLIENT).await.unwrap();
    let allocs_once = engine.store().allocations().await;

    let second = engine.ensure_bonus_pool(CLIENT).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first, second);
    assert_eq!(engine.store().pools().await.len(), 1);
    assert_eq!(engine.store().allocations().await, allocs_once);
}

#[tokio::test]
async fn test_distribute_twice_is_noop() {
    let engine = BonusEngine::new(chain_store(&[2, 2]).await);
    let pool = engine.ensure_bonus_pool(CLIENT).await.unwrap();
    let before = engine.pool_report(pool.id).await.unwrap();

    engine.distribute(pool.id).await.unwrap();
    engine.distribute(pool.id).await.unwrap();
    assert_eq!(engine.pool_report(pool.id).await.unwrap(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ensure_creates_one_pool() {
    let engine = Arc::new(BonusEngine::new(chain_store(&[4, 3, 2, 1]).await));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.ensure_bonus_pool(CLIENT).await })
        })
        .collect();

    let mut ids = Vec::new();
    for h in handles {
        ids.push(h.await.unwrap().unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(engine.store().pools().await.len(), 1);
    assert_eq!(engine.store().allocations().await.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distribute_writes_once() {
    let store = chain_store(&[3, 2]).await;
    let pool_id = store.create_pool(NewPool::new(CLIENT, AgentId(2))).await.unwrap().id;
    let engine = Arc::new(BonusEngine::new(store));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.distribute(pool_id).await })
        })
        .collect();
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let report = engine.pool_report(pool_id).await.unwrap();
    assert_eq!(report.allocations.len(), 3);
    assert_conserved(&report.pool, &report.allocations);
}

// ===== FAILURES =====

#[tokio::test]
async fn test_broken_supervisor_leaves_pool_pending() {
    let store = InMemoryStore::new();
    store.insert_agent(Agent::with_star_level(AgentId(1), 1, Some(AgentId(99)))).await;
    store
        .insert_client(Client { id: CLIENT, closer_id: AgentId(1), approval: ApprovalState::Approved })
        .await;
    let engine = BonusEngine::new(store);

    let err = engine.ensure_bonus_pool(CLIENT).await.unwrap_err();
    assert_eq!(err, Error::AgentNotFound(AgentId(99)));

    let pool = engine.ensure_bonus_pool(CLIENT).await.unwrap();
    assert_eq!(pool.status, PoolStatus::Pending);
    assert!(engine.store().allocations().await.is_empty());

    // repair the hierarchy and retry against the same pool
    engine.store().insert_agent(Agent::with_star_level(AgentId(99), 3, None)).await;
    engine.distribute(pool.id).await.unwrap();
    let report = engine.pool_report(pool.id).await.unwrap();
    assert_eq!(star_slices(&report.allocations), vec![(1, 1, 50), (99, 3, 150)]);
    assert_eq!(engine.store().pools().await.len(), 1);
}

#[tokio::test]
async fn test_supervisor_cycle_is_fatal() {
    let store = InMemoryStore::new();
    store.insert_agent(Agent::with_star_level(AgentId(1), 0, Some(AgentId(2)))).await;
    store.insert_agent(Agent::with_star_level(AgentId(2), 0, Some(AgentId(1)))).await;
    store
        .insert_client(Client { id: CLIENT, closer_id: AgentId(2), approval: ApprovalState::Approved })
        .await;
    let engine = BonusEngine::new(store);

    let err = engine.ensure_bonus_pool(CLIENT).await.unwrap_err();
    assert_eq!(err, Error::HierarchyCycle { agent: AgentId(2) });
    assert!(engine.store().allocations().await.is_empty());
}

/// Delegates to an [`InMemoryStore`] but can fail the next batch or hide the
/// next pool lookup.
struct FlakyLedger {
    inner:            InMemoryStore,
    fail_batch:       AtomicBool,
    hide_next_lookup: AtomicBool,
}

impl FlakyLedger {
    fn new(inner: InMemoryStore) -> Self {
        Self { inner, fail_batch: AtomicBool::new(false), hide_next_lookup: AtomicBool::new(false) }
    }
}

#[async_trait]
impl AgentDirectory for FlakyLedger {
    async fn get_agent(&self, id: AgentId) -> Result<Agent> {
        self.inner.get_agent(id).await
    }
    async fn count_approved_clients(&self, agent: AgentId) -> Result<u64> {
        self.inner.count_approved_clients(agent).await
    }
    async fn set_rank(&self, agent: AgentId, rank: Rank) -> Result<()> {
        self.inner.set_rank(agent, rank).await
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn get_client(&self, id: ClientId) -> Result<Client> {
        self.inner.get_client(id).await
    }
    async fn find_pool_by_client(&self, client: ClientId) -> Result<Option<BonusPool>> {
        if self.hide_next_lookup.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_pool_by_client(client).await
    }
    async fn get_pool(&self, id: PoolId) -> Result<BonusPool> {
        self.inner.get_pool(id).await
    }
    async fn create_pool(&self, pool: NewPool) -> Result<BonusPool> {
        self.inner.create_pool(pool).await
    }
    async fn allocations_for_pool(&self, pool: PoolId) -> Result<Vec<BonusAllocation>> {
        self.inner.allocations_for_pool(pool).await
    }
    async fn run_atomic(&self, ops: Vec<LedgerOp>) -> Result<()> {
        if self.fail_batch.swap(false, Ordering::SeqCst) {
            return Err(Error::Storage("connection reset".into()));
        }
        self.inner.run_atomic(ops).await
    }
}

#[tokio::test]
async fn test_storage_fault_is_surfaced_and_retryable() {
    let ledger = FlakyLedger::new(chain_store(&[2, 1]).await);
    ledger.fail_batch.store(true, Ordering::SeqCst);
    let engine = BonusEngine::new(ledger);

    let err = engine.ensure_bonus_pool(CLIENT).await.unwrap_err();
    assert_eq!(err, Error::Storage("connection reset".into()));

    let pool = engine.store().find_pool_by_client(CLIENT).await.unwrap().unwrap();
    assert_eq!(pool.status, PoolStatus::Pending);
    assert!(engine.store().allocations_for_pool(pool.id).await.unwrap().is_empty());

    engine.distribute(pool.id).await.unwrap();
    let report = engine.pool_report(pool.id).await.unwrap();
    assert_conserved(&report.pool, &report.allocations);
    assert_eq!(report.pool.recycled_slices, 1);
}

#[tokio::test]
async fn test_lost_creation_race_returns_existing_pool() {
    let engine = BonusEngine::new(FlakyLedger::new(chain_store(&[3, 1]).await));
    let first = engine.ensure_bonus_pool(CLIENT).await.unwrap();
    let allocs_once = engine.store().inner.allocations().await;

    // the lookup misses, so creation runs into the uniqueness constraint
    engine.store().hide_next_lookup.store(true, Ordering::SeqCst);
    let second = engine.ensure_bonus_pool(CLIENT).await.unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second, first);
    assert_eq!(engine.store().inner.pools().await.len(), 1);
    assert_eq!(engine.store().inner.allocations().await, allocs_once);
}

// ===== RANK UPKEEP =====

#[tokio::test]
async fn test_only_closer_is_reranked() {
    // supervisor holds level 3 with no clients of its own; it must keep it
    let store = chain_store(&[3, 0]).await;
    for id in 101..=103 {
        store
            .insert_client(Client { id: ClientId(id), closer_id: AgentId(2), approval: ApprovalState::Approved })
            .await;
    }
    let engine = BonusEngine::new(store);
    engine.ensure_bonus_pool(CLIENT).await.unwrap();

    let closer = engine.store().get_agent(AgentId(2)).await.unwrap();
    assert_eq!(closer.rank(), evaluate_rank(4));
    let supervisor = engine.store().get_agent(AgentId(1)).await.unwrap();
    assert_eq!(supervisor.star_level, 3);
}

#[tokio::test]
async fn test_recalculate_rank_matches_table() {
    let store = InMemoryStore::new();
    store.insert_agent(Agent::new(AgentId(1), None)).await;
    let engine = BonusEngine::new(store);
    for n in 1..=22u64 {
        engine
            .store()
            .insert_client(Client { id: ClientId(n), closer_id: AgentId(1), approval: ApprovalState::Approved })
            .await;
        let rank = engine.recalculate_rank(AgentId(1)).await.unwrap();
        assert_eq!(rank, evaluate_rank(n));
        let agent = engine.store().get_agent(AgentId(1)).await.unwrap();
        assert_eq!(agent.tier, Tier::from_star_level(agent.star_level));
    }
}

// ===== CONSERVATION OVER SHORT CHAINS =====

#[test]
fn test_every_short_chain_conserves_money() {
    let mut chains: Vec<Vec<u8>> = vec![vec![]];
    for _ in 0..4 {
        chains = chains
            .into_iter()
            .flat_map(|c| (0..=4u8).map(move |lvl| [c.clone(), vec![lvl]].concat()))
            .collect();

        for levels in &chains {
            let n = levels.len() as u64;
            let pool = NewPool::new(CLIENT, AgentId(n)).into_pool(PoolId(1));
            let plan = plan_distribution(&pool, None, |id| {
                let i = (id.0 - 1) as usize;
                let sup = if i == 0 { None } else { Some(AgentId(id.0 - 1)) };
                Ok(Agent::with_star_level(id, levels[i], sup))
            })
            .unwrap();

            plan.verify_conservation(&pool).unwrap();

            // bottom-up claims, each capped by what was left
            let mut remaining = 4u8;
            let mut expected = Vec::new();
            for (id, &lvl) in levels.iter().enumerate().rev() {
                let claim = lvl.min(remaining);
                if claim > 0 {
                    expected.push((id as u64 + 1, claim));
                }
                remaining -= claim;
                if remaining == 0 {
                    break;
                }
            }
            let got: Vec<(u64, u8)> = plan
                .allocations
                .iter()
                .filter(|a| a.kind == AllocationType::StarSlice)
                .map(|a| (a.agent_id.0, a.slices))
                .collect();
            assert_eq!(got, expected, "chain {levels:?}");
            assert_eq!(plan.recycled_slices, remaining, "chain {levels:?}");
        }
    }
}
