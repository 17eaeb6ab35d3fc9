use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use bonus_engine::{
    constants::{DIRECT_AMOUNT, SLICE_VALUE, TOTAL_AMOUNT, TOTAL_SLICES},
    evaluate_rank, AgentDirectory, AgentId, AllocationType, ApprovalState, BonusEngine, ClientId,
    DistributionPlan, EngineConfig, Fixture, InMemoryStore, NewPool, PoolId, PoolReport, SliceWalker,
};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::json;
use tracing::debug;

// ─── Loading ──────────────────────────────────────────────────────────────────

/// Expand `~/` to `$HOME/` in file paths.
fn expand_home(path: &str) -> String {
    if path.starts_with("~/") {
        format!("{}{}", std::env::var("HOME").unwrap_or_default(), &path[1..])
    } else {
        path.to_string()
    }
}

fn load_config(path: Option<&str>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let expanded = expand_home(path);
    let raw = std::fs::read_to_string(&expanded)
        .with_context(|| format!("Cannot read config '{expanded}'"))?;
    Ok(EngineConfig::from_json(&raw)?)
}

fn load_fixture(path: &str) -> Result<Fixture> {
    let expanded = expand_home(path);
    let raw = std::fs::read_to_string(&expanded).map_err(|e| anyhow!(
        "Cannot read fixture '{}': {}\n  \
         Set BONUS_ENGINE_FIXTURE or pass --fixture to specify a different path.",
        expanded, e
    ))?;
    Ok(Fixture::from_json(&raw)?)
}

fn load_engine(cli: &Cli) -> Result<BonusEngine<InMemoryStore>> {
    let config = load_config(cli.config.as_deref())?;
    let fixture = load_fixture(&cli.fixture)?;
    debug!(agents = fixture.agents.len(), clients = fixture.clients.len(), "fixture loaded");
    let store = InMemoryStore::from_fixture(fixture).context("Fixture is inconsistent")?;
    Ok(BonusEngine::with_config(store, config))
}

/// Print the banner to stdout.
fn print_banner() {
    let ver = env!("CARGO_PKG_VERSION");
    println!();
    println!("  Bonus Engine  v{ver}  ·  per-client commission pools");
    println!("  {}", "─".repeat(62));
    println!("  Pool      {TOTAL_AMOUNT}  =  {DIRECT_AMOUNT} direct  +  {TOTAL_SLICES} × {SLICE_VALUE} star slices");
    println!("  Claims    bottom-up, min(star level, slices left)");
    println!("  Leftover  recycled, paid to no one");
    println!();
}

// ─── CLI definition ───────────────────────────────────────────────────────────

/// Bonus Engine — commission pools over an agent hierarchy.
///
/// Every command supports --json for machine-readable output.
/// Global options can also be set via environment variables:
///   BONUS_ENGINE_FIXTURE — hierarchy fixture JSON
///   BONUS_ENGINE_CONFIG  — engine config JSON
#[derive(Parser)]
#[command(
    name    = "bonus-engine",
    version = env!("CARGO_PKG_VERSION"),
    about   = "Create, distribute and audit per-client bonus pools against a hierarchy fixture.",
    after_help = "\
ENVIRONMENT:
  BONUS_ENGINE_FIXTURE   Hierarchy fixture JSON  [default: ./hierarchy.json]
  BONUS_ENGINE_CONFIG    Engine config JSON (max_chain_depth, capture_snapshot)
  RUST_LOG               Log filter  [default: warn]

QUICK START:
  bonus-engine rank    --count 7
  bonus-engine preview --closer 4
  bonus-engine approve --client 100
  bonus-engine run"
)]
struct Cli {
    /// Hierarchy fixture: agents (id, star_level, supervisor_id) and clients
    #[arg(
        long,
        global     = true,
        value_name = "PATH",
        default_value = "hierarchy.json",
        env = "BONUS_ENGINE_FIXTURE"
    )]
    fixture: String,

    /// Engine config JSON; defaults apply when omitted
    #[arg(long, global = true, value_name = "PATH", env = "BONUS_ENGINE_CONFIG")]
    config: Option<String>,

    /// Output machine-readable JSON instead of human-readable text
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the tier earned by a number of approved clients
    Rank {
        /// Approved-client count
        #[arg(long, value_name = "N")]
        count: u64,
    },

    /// Show how a new pool closed by an agent would be split, without writing anything
    #[command(
        after_help = "\
EXAMPLES:
  # Who gets paid if agent 4 closes a client today
  bonus-engine preview --closer 4"
    )]
    Preview {
        /// Closing agent id
        #[arg(long, value_name = "ID")]
        closer: u64,
    },

    /// Approve a client, then create and distribute its bonus pool
    ///
    /// Pools are created once per client; approving the same client again
    /// returns the existing pool.
    Approve {
        /// Client id from the fixture
        #[arg(long, value_name = "ID")]
        client: u64,
    },

    /// Create pools for every client already approved in the fixture, in id order
    Run,

    /// Recount an agent's approved clients and update their rank
    Recalc {
        /// Agent id
        #[arg(long, value_name = "ID")]
        agent: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // When invoked with no arguments, show banner + full help and exit cleanly.
    if std::env::args().len() == 1 {
        print_banner();
        Cli::command().print_long_help().ok();
        println!();
        return Ok(());
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::Rank { count } => cmd_rank(*count, cli.json),
        Commands::Preview { closer } => cmd_preview(&cli, AgentId(*closer)).await,
        Commands::Approve { client } => cmd_approve(&cli, ClientId(*client)).await,
        Commands::Run => cmd_run(&cli).await,
        Commands::Recalc { agent } => cmd_recalc(&cli, AgentId(*agent)).await,
    }
}

// ─── rank ─────────────────────────────────────────────────────────────────────

fn cmd_rank(count: u64, json_output: bool) -> Result<()> {
    let rank = evaluate_rank(count);
    if json_output {
        println!("{}", json!({
            "status":     "ok",
            "command":    "rank",
            "approved":   count,
            "tier":       rank.tier,
            "star_level": rank.star_level,
        }));
    } else {
        println!("  {count} approved clients  →  {}  (claims up to {} slices)", rank.tier, rank.star_level);
    }
    Ok(())
}

// ─── preview ──────────────────────────────────────────────────────────────────

/// Same step-by-step walk as distribution: ancestors past exhaustion are never read.
async fn preview_plan(
    store: &InMemoryStore,
    closer: AgentId,
    max_depth: Option<usize>,
) -> Result<DistributionPlan> {
    let pool = NewPool::new(ClientId(0), closer).into_pool(PoolId(0));
    let mut walker = SliceWalker::new(&pool, max_depth);
    let mut next = Some(walker.start());
    while let Some(id) = next {
        let agent = store.get_agent(id).await
            .with_context(|| format!("Agent {id} is referenced but not in the fixture"))?;
        next = walker.visit(&agent)?;
    }
    Ok(walker.finish()?)
}

async fn cmd_preview(cli: &Cli, closer: AgentId) -> Result<()> {
    let fixture = load_fixture(&cli.fixture)?;
    let config = load_config(cli.config.as_deref())?;
    let store = InMemoryStore::from_fixture(fixture).context("Fixture is inconsistent")?;

    let plan = preview_plan(&store, closer, config.max_chain_depth).await?;

    if cli.json {
        println!("{}", json!({
            "status":             "ok",
            "command":            "preview",
            "closer":             closer,
            "allocations":        plan.allocations,
            "distributed_slices": plan.distributed_slices,
            "recycled_slices":    plan.recycled_slices,
            "chain":              plan.snapshot,
        }));
    } else {
        println!("─── Preview: closer {closer} ───────────────────────────────────────────");
        for a in &plan.allocations {
            print_allocation_line(a.agent_id, a.kind, a.slices, a.amount, a.star_level_at_time);
        }
        println!();
        println!("  Distributed      {} / {} slices", plan.distributed_slices, TOTAL_SLICES);
        println!("  Recycled         {} slices  ({})", plan.recycled_slices, plan.recycled_slices as u64 * SLICE_VALUE);
    }
    Ok(())
}

// ─── approve ──────────────────────────────────────────────────────────────────

async fn cmd_approve(cli: &Cli, client: ClientId) -> Result<()> {
    let engine = load_engine(cli)?;
    engine.store().set_approval(client, ApprovalState::Approved).await
        .with_context(|| format!("Client {client} is not in the fixture"))?;

    let pool = engine.ensure_bonus_pool(client).await
        .with_context(|| format!("Bonus pool for client {client} was not distributed"))?;
    let report = engine.pool_report(pool.id).await?;
    let closer = engine.store().get_agent(pool.closer_id).await?;

    if cli.json {
        println!("{}", json!({
            "status":  "ok",
            "command": "approve",
            "client":  client,
            "pool":    report.pool,
            "allocations": report.allocations,
            "closer_rank": closer.rank(),
        }));
    } else {
        print_report(&report);
        println!("  Closer rank      {}", closer.rank());
    }
    Ok(())
}

// ─── run ──────────────────────────────────────────────────────────────────────

async fn cmd_run(cli: &Cli) -> Result<()> {
    let engine = load_engine(cli)?;
    let approved: Vec<ClientId> = engine.store().clients().await
        .into_iter()
        .filter(|c| c.is_approved())
        .map(|c| c.id)
        .collect();

    let mut reports = Vec::with_capacity(approved.len());
    for client in approved {
        let pool = engine.ensure_bonus_pool(client).await
            .with_context(|| format!("Bonus pool for client {client} was not distributed"))?;
        reports.push(engine.pool_report(pool.id).await?);
    }

    let mut per_agent: BTreeMap<AgentId, u64> = BTreeMap::new();
    for a in reports.iter().flat_map(|r| &r.allocations) {
        *per_agent.entry(a.agent_id).or_default() += a.amount;
    }
    let recycled: u64 = reports.iter().map(|r| r.pool.recycled_amount()).sum();

    if cli.json {
        let totals: Vec<_> = per_agent
            .iter()
            .map(|(agent, amount)| json!({ "agent_id": agent, "amount": amount }))
            .collect();
        println!("{}", json!({
            "status":   "ok",
            "command":  "run",
            "pools":    reports,
            "totals":   totals,
            "recycled": recycled,
        }));
    } else {
        for report in &reports {
            print_report(report);
            println!();
        }
        println!("─── Totals ({} pools) ──────────────────────────────────────────────", reports.len());
        for (agent, amount) in &per_agent {
            println!("  Agent {:<10} {:>10}", agent.to_string(), amount);
        }
        println!("  Recycled         {:>10}", recycled);
    }
    Ok(())
}

// ─── recalc ───────────────────────────────────────────────────────────────────

async fn cmd_recalc(cli: &Cli, agent: AgentId) -> Result<()> {
    let engine = load_engine(cli)?;
    let before = engine.store().get_agent(agent).await
        .with_context(|| format!("Agent {agent} is not in the fixture"))?
        .rank();
    let after = engine.recalculate_rank(agent).await?;

    if cli.json {
        println!("{}", json!({
            "status":  "ok",
            "command": "recalc",
            "agent":   agent,
            "before":  before,
            "after":   after,
        }));
    } else {
        println!("  Agent {agent}  {before}  →  {after}");
    }
    Ok(())
}

// ─── Output ───────────────────────────────────────────────────────────────────

fn print_allocation_line(agent: AgentId, kind: AllocationType, slices: u8, amount: u64, level: u8) {
    let label = match kind {
        AllocationType::Direct    => "direct".to_string(),
        AllocationType::StarSlice => format!("{slices} slice{}", if slices == 1 { "" } else { "s" }),
    };
    println!("  Agent {:<10} {:<10} {:>8}   (level {level})", agent.to_string(), label, amount);
}

fn print_report(report: &PoolReport) {
    let pool = &report.pool;
    println!("─── Pool {} · client {} ─────────────────────────────────────────────", pool.id, pool.client_id);
    println!("  Closer           {}", pool.closer_id);
    println!("  Status           {:?}", pool.status);
    println!();
    for a in &report.allocations {
        print_allocation_line(a.agent_id, a.kind, a.slices, a.amount, a.star_level_at_time);
    }
    println!();
    println!("  Distributed      {} / {} slices", pool.distributed_slices, pool.total_slices);
    println!("  Recycled         {} slices  ({})", pool.recycled_slices, pool.recycled_amount());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_from(raw: &str) -> InMemoryStore {
        InMemoryStore::from_fixture(Fixture::from_json(raw).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_preview_ignores_broken_link_above_exhaustion() {
        let raw = r#"{
            "agents":  [{ "id": 1, "star_level": 4, "supervisor_id": 99 }],
            "clients": [{ "id": 100, "closer_id": 1, "approval": "approved" }]
        }"#;

        let plan = preview_plan(&store_from(raw), AgentId(1), None).await.unwrap();
        assert_eq!(plan.recycled_slices, 0);
        assert_eq!(plan.snapshot.len(), 1);

        // the real distribution agrees with the preview
        let engine = BonusEngine::new(store_from(raw));
        let pool = engine.ensure_bonus_pool(ClientId(100)).await.unwrap();
        let report = engine.pool_report(pool.id).await.unwrap();
        let previewed: Vec<_> = plan.allocations.iter().map(|a| (a.agent_id, a.kind, a.amount)).collect();
        let written: Vec<_> = report.allocations.iter().map(|a| (a.agent_id, a.kind, a.amount)).collect();
        assert_eq!(previewed, written);
    }

    #[tokio::test]
    async fn test_preview_reports_missing_supervisor_it_needs() {
        let raw = r#"{ "agents": [{ "id": 1, "star_level": 1, "supervisor_id": 99 }] }"#;
        let err = preview_plan(&store_from(raw), AgentId(1), None).await.unwrap_err();
        assert!(err.to_string().contains("#99"), "{err}");
    }
}
