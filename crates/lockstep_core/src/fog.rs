//! Per-team fog of war.
//!
//! Each team has an explored grid, which only ever grows, and a visible grid
//! recomputed every tick from unit sight. The cells that changed visibility
//! are reported as [`FogDelta`]s.

use serde::{Deserialize, Serialize};

use crate::math::GridPos;
use crate::world::constants::INDIRECT_SIGHT_RANGE;

/// A sight source: team, center cell and sight radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SightSource {
    /// Observing team.
    pub team: usize,
    /// Center cell.
    pub center: GridPos,
    /// Radius in cells.
    pub sight: i32,
}

/// Visibility changes of one team during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FogDelta {
    /// Team.
    pub team: usize,
    /// Cells that became visible, row-major.
    pub revealed: Vec<GridPos>,
    /// Cells that stopped being visible, row-major.
    pub hidden: Vec<GridPos>,
}

impl FogDelta {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revealed.is_empty() && self.hidden.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct TeamFog {
    explored: Vec<bool>,
    visible: Vec<bool>,
}

/// Explored and visible grids for every team.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FogOfWar {
    width: i32,
    height: i32,
    enabled: bool,
    teams: Vec<TeamFog>,
}

impl FogOfWar {
    /// Fully hidden fog for `team_count` teams. When disabled every cell is
    /// visible and explored for everyone.
    #[must_use]
    pub fn new(width: i32, height: i32, team_count: usize, enabled: bool) -> Self {
        let cells = (width.max(0) * height.max(0)) as usize;
        let team = TeamFog {
            explored: vec![!enabled; cells],
            visible: vec![!enabled; cells],
        };
        Self {
            width,
            height,
            enabled,
            teams: vec![team; team_count],
        }
    }

    /// Whether fog hides anything.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn index(&self, pos: GridPos) -> Option<usize> {
        (pos.x >= 0 && pos.y >= 0 && pos.x < self.width && pos.y < self.height)
            .then(|| (pos.y * self.width + pos.x) as usize)
    }

    /// Whether a team currently sees a cell.
    #[must_use]
    pub fn is_visible(&self, team: usize, pos: GridPos) -> bool {
        match (self.teams.get(team), self.index(pos)) {
            (Some(t), Some(i)) => t.visible[i],
            _ => false,
        }
    }

    /// Whether a team has ever seen a cell.
    #[must_use]
    pub fn is_explored(&self, team: usize, pos: GridPos) -> bool {
        match (self.teams.get(team), self.index(pos)) {
            (Some(t), Some(i)) => t.explored[i],
            _ => false,
        }
    }

    /// Recompute visibility from sight sources and report what changed.
    ///
    /// A cell is visible within `sight` and explored within
    /// `sight + INDIRECT_SIGHT_RANGE + 1`, both by strict squared distance.
    pub fn update(&mut self, sources: impl IntoIterator<Item = SightSource>) -> Vec<FogDelta> {
        if !self.enabled {
            return Vec::new();
        }
        let cells = self.teams.first().map_or(0, |t| t.visible.len());
        let mut now: Vec<Vec<bool>> = vec![vec![false; cells]; self.teams.len()];

        for source in sources {
            let Some(visible) = now.get_mut(source.team) else {
                continue;
            };
            let explore_radius = source.sight + INDIRECT_SIGHT_RANGE + 1;
            let sight_sq = i64::from(source.sight) * i64::from(source.sight);
            let explore_sq = i64::from(explore_radius) * i64::from(explore_radius);
            for y in (source.center.y - explore_radius)..=(source.center.y + explore_radius) {
                for x in (source.center.x - explore_radius)..=(source.center.x + explore_radius) {
                    let pos = GridPos::new(x, y);
                    let Some(i) = self.index(pos) else {
                        continue;
                    };
                    let dist_sq = pos.dist_sq(source.center);
                    if dist_sq < explore_sq {
                        self.teams[source.team].explored[i] = true;
                    }
                    if dist_sq < sight_sq {
                        visible[i] = true;
                    }
                }
            }
        }

        let width = self.width;
        let mut deltas = Vec::new();
        for (team, (fog, now)) in self.teams.iter_mut().zip(now).enumerate() {
            let mut delta = FogDelta {
                team,
                ..FogDelta::default()
            };
            for (i, (&was, &is)) in fog.visible.iter().zip(&now).enumerate() {
                let pos = GridPos::new(i as i32 % width, i as i32 / width);
                match (was, is) {
                    (false, true) => delta.revealed.push(pos),
                    (true, false) => delta.hidden.push(pos),
                    _ => {}
                }
            }
            fog.visible = now;
            if !delta.is_empty() {
                deltas.push(delta);
            }
        }
        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(team: usize, x: i32, y: i32, sight: i32) -> SightSource {
        SightSource {
            team,
            center: GridPos::new(x, y),
            sight,
        }
    }

    #[test]
    fn test_sight_reveals_and_explores() {
        let mut fog = FogOfWar::new(32, 32, 2, true);
        let deltas = fog.update([source(0, 10, 10, 3)]);
        assert_eq!(deltas.len(), 1);
        assert!(fog.is_visible(0, GridPos::new(12, 10)));
        assert!(!fog.is_visible(0, GridPos::new(13, 10)));
        assert!(fog.is_explored(0, GridPos::new(18, 10)));
        assert!(!fog.is_explored(0, GridPos::new(19, 10)));
        assert!(!fog.is_visible(1, GridPos::new(10, 10)));
    }

    #[test]
    fn test_leaving_hides_but_stays_explored() {
        let mut fog = FogOfWar::new(32, 32, 1, true);
        fog.update([source(0, 5, 5, 2)]);
        let deltas = fog.update([source(0, 25, 25, 2)]);
        let delta = &deltas[0];
        assert!(delta.hidden.contains(&GridPos::new(5, 5)));
        assert!(delta.revealed.contains(&GridPos::new(25, 25)));
        assert!(!fog.is_visible(0, GridPos::new(5, 5)));
        assert!(fog.is_explored(0, GridPos::new(5, 5)));
    }

    #[test]
    fn test_no_change_no_delta() {
        let mut fog = FogOfWar::new(16, 16, 1, true);
        fog.update([source(0, 5, 5, 2)]);
        assert!(fog.update([source(0, 5, 5, 2)]).is_empty());
    }

    #[test]
    fn test_disabled_fog_sees_everything() {
        let mut fog = FogOfWar::new(8, 8, 2, false);
        assert!(fog.update([]).is_empty());
        assert!(fog.is_visible(1, GridPos::new(7, 7)));
        assert!(fog.is_explored(0, GridPos::new(0, 0)));
        assert!(!fog.is_visible(0, GridPos::new(8, 0)));
    }
}
