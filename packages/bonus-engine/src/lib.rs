//! Bonus engine
//!
//! Commission accounting for an agent hierarchy. Every approved client gets
//! exactly one bonus pool of 400: a flat 200 to the closer and a 200 star
//! pool cut into four 50-unit slices, claimed bottom-up along the closer's
//! supervisor chain by star level. Unclaimed slices are recycled.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bonus_engine::{Agent, AgentId, ApprovalState, BonusEngine, Client, ClientId, InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryStore::new();
//!     store.insert_agent(Agent::with_star_level(AgentId(1), 2, None)).await;
//!     store.insert_agent(Agent::with_star_level(AgentId(2), 1, Some(AgentId(1)))).await;
//!     store.insert_client(Client {
//!         id:        ClientId(100),
//!         closer_id: AgentId(2),
//!         approval:  ApprovalState::Approved,
//!     }).await;
//!
//!     let engine = BonusEngine::new(store);
//!     let pool = engine.ensure_bonus_pool(ClientId(100)).await?;
//!     let report = engine.pool_report(pool.id).await?;
//!     for a in &report.allocations {
//!         println!("{} {:?} {} slices → {}", a.agent_id, a.kind, a.slices, a.amount);
//!     }
//!     println!("recycled: {}", pool.recycled_slices);
//!     Ok(())
//! }
//! ```
//!
//! # Feature Overview
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`BonusEngine::ensure_bonus_pool`] | Idempotent pool creation + distribution + closer rank refresh |
//! | [`BonusEngine::distribute`] | Split a pending pool into allocations in one atomic batch |
//! | [`BonusEngine::recalculate_rank`] | Recount approved clients and persist tier/star level |
//! | [`BonusEngine::pool_report`] | Pool plus allocations, checked for conservation |
//! | [`evaluate_rank`] | Pure approved-count → rank table |
//! | [`plan_distribution`] | Pure slice walk over a synchronous agent lookup |

pub mod config;
pub mod constants;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod memory;
pub mod rank;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use distribution::{plan_distribution, DistributionPlan, SliceWalker};
pub use engine::BonusEngine;
pub use error::{Error, Result};
pub use memory::{Fixture, InMemoryStore};
pub use rank::{evaluate_rank, Rank, Tier};
pub use store::{AgentDirectory, Ledger, LedgerOp};
pub use types::*;
