//! Single session runs and replay verification.

use std::path::{Path, PathBuf};

use lockstep_core::replay::ReplayPlayer;
use serde::{Deserialize, Serialize};

use crate::metrics::GameMetrics;
use crate::scenario::{load_replay, save_replay, Scenario, ScenarioError};

/// Options of a single run.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Ticks to simulate. The run ends early once the game is decided.
    pub ticks: u64,
    /// Replay output path.
    pub replay: Option<PathBuf>,
}

impl RunConfig {
    /// Run for `ticks` without recording.
    #[must_use]
    pub fn new(ticks: u64) -> Self {
        Self {
            ticks,
            replay: None,
        }
    }

    /// Record a replay to `path`.
    #[must_use]
    pub fn with_replay(mut self, path: PathBuf) -> Self {
        self.replay = Some(path);
        self
    }
}

/// Run a scenario headless and collect its metrics.
pub fn run_session(scenario: &Scenario, config: &RunConfig) -> Result<GameMetrics, ScenarioError> {
    let mut game = scenario.start()?;
    if config.replay.is_some() {
        game.start_recording()?;
    }

    for _ in 0..config.ticks {
        game.tick()?;
        if game.outcome().is_some() {
            break;
        }
    }

    let mut metrics = GameMetrics::collect(&game);
    if let Some(path) = &config.replay {
        if let Some(replay) = game.finish_recording() {
            metrics.recorded_commands = Some(replay.command_count());
            save_replay(&replay, path)?;
        }
    }
    tracing::info!(
        ticks = metrics.duration_ticks,
        hash = metrics.final_state_hash,
        winners = ?metrics.winners,
        "session finished"
    );
    Ok(metrics)
}

/// Outcome of replaying a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Replay file.
    pub file: PathBuf,
    /// Recorded final tick.
    pub final_tick: u64,
    /// Recorded final hash.
    pub expected_hash: u64,
    /// Hash reached on playback.
    pub actual_hash: u64,
    /// Recorded commands.
    pub commands: usize,
    /// Whether the replay was recorded with this content, when checked.
    pub content_matches: Option<bool>,
    /// Whether playback reproduced the recorded hash.
    pub verified: bool,
}

/// Replay a file and compare the final hash. With a scenario, also check the
/// replay was recorded against the same tech tree and map.
pub fn verify_replay(path: &Path, content: Option<&Scenario>) -> Result<VerifyReport, ScenarioError> {
    let replay = load_replay(path)?;
    let content_matches = content
        .map(|s| replay.matches_content(&s.tech, &s.map))
        .transpose()?;
    let final_tick = replay.final_tick;
    let expected_hash = replay.final_hash;
    let commands = replay.command_count();

    let mut player = ReplayPlayer::new(replay)?;
    let verified = player.verify()?;
    let report = VerifyReport {
        file: path.to_path_buf(),
        final_tick,
        expected_hash,
        actual_hash: player.world().state_hash(),
        commands,
        content_matches,
        verified,
    };
    if verified {
        tracing::info!(file = %path.display(), final_tick, "replay verified");
    } else {
        tracing::warn!(
            file = %path.display(),
            expected = expected_hash,
            actual = report.actual_hash,
            "replay diverged"
        );
    }
    Ok(report)
}
