//! Headless session runner for CI and determinism checks.
//!
//! Loads RON content from disk and drives `lockstep_core` sessions without
//! rendering:
//!
//! - **Runs**: simulate N ticks with scripted AI and report JSON metrics
//! - **Replays**: record sessions to disk and verify them later
//! - **Batches**: run the same session in parallel and compare final hashes
//!
//! # Example
//!
//! ```bash
//! cargo run -p lockstep_headless -- run --content content/skirmish --ticks 2400
//! cargo run -p lockstep_headless -- run --ticks 2400 --replay out/skirmish.replay
//! cargo run -p lockstep_headless -- verify --replay out/skirmish.replay
//! cargo run -p lockstep_headless -- batch --runs 16 --ticks 4800
//! ```

pub mod batch;
pub mod metrics;
pub mod runner;
pub mod scenario;

pub use batch::{run_batch, BatchConfig, BatchResults};
pub use metrics::{FactionMetrics, GameMetrics};
pub use runner::{run_session, verify_replay, RunConfig, VerifyReport};
pub use scenario::{Scenario, ScenarioError};
