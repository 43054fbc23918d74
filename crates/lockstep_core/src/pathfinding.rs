//! Grid pathfinding using the A* algorithm.
//!
//! Passability is supplied by the caller as a predicate over anchor cells,
//! so the search knows nothing about units, footprints or fields. Node
//! ordering is fully deterministic: equal f-scores break ties by position.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use crate::math::GridPos;

/// Upper bound on expanded nodes per search.
pub const NODE_LIMIT: usize = 4096;

/// A node in the A* open set priority queue.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct AStarNode {
    pos: GridPos,
    /// g + h
    f_score: i32,
    /// Lower coordinates first on equal f-score.
    tie_breaker: u64,
}

impl Ord for AStarNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse for min-heap behavior.
        match other.f_score.cmp(&self.f_score) {
            Ordering::Equal => other.tie_breaker.cmp(&self.tie_breaker),
            ord => ord,
        }
    }
}

impl PartialOrd for AStarNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Direction offsets for 8-directional movement.
const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),   // East
    (1, 1),   // Southeast
    (0, 1),   // South
    (-1, 1),  // Southwest
    (-1, 0),  // West
    (-1, -1), // Northwest
    (0, -1),  // North
    (1, -1),  // Northeast
];

#[inline]
fn tie_breaker(pos: GridPos) -> u64 {
    (u64::from(pos.y as u32) << 32) | u64::from(pos.x as u32)
}

/// Find a path from `start` toward `goal`.
///
/// `can_enter` reports whether a unit may stand anchored at a cell. The
/// goal itself does not need to be enterable: when it is unreachable the
/// path leads to the explored cell closest to it. Diagonal steps may not
/// cut corners.
///
/// Returns the waypoints after `start`, or `None` when no step brings the
/// unit closer than it already is.
pub fn find_path(
    start: GridPos,
    goal: GridPos,
    can_enter: impl Fn(GridPos) -> bool,
) -> Option<Vec<GridPos>> {
    if start == goal {
        return Some(Vec::new());
    }

    let mut open_set = BinaryHeap::new();
    let mut came_from: BTreeMap<GridPos, GridPos> = BTreeMap::new();
    let mut g_score: BTreeMap<GridPos, i32> = BTreeMap::new();

    let mut closest = start;
    let mut closest_h = start.chebyshev(goal);

    g_score.insert(start, 0);
    open_set.push(AStarNode {
        pos: start,
        f_score: closest_h,
        tie_breaker: tie_breaker(start),
    });

    let mut expanded = 0;
    while let Some(current) = open_set.pop() {
        if current.pos == goal {
            closest = goal;
            break;
        }
        expanded += 1;
        if expanded > NODE_LIMIT {
            break;
        }

        let current_g = g_score.get(&current.pos).copied().unwrap_or(i32::MAX);
        if current.f_score > current_g.saturating_add(current.pos.chebyshev(goal)) {
            // stale heap entry
            continue;
        }

        for &(dx, dy) in &DIRECTIONS {
            let next = GridPos::new(current.pos.x + dx, current.pos.y + dy);
            if !can_enter(next) {
                continue;
            }
            if dx != 0 && dy != 0 {
                let side_a = GridPos::new(current.pos.x + dx, current.pos.y);
                let side_b = GridPos::new(current.pos.x, current.pos.y + dy);
                if !can_enter(side_a) || !can_enter(side_b) {
                    continue;
                }
            }

            let tentative_g = current_g + 1;
            if tentative_g < g_score.get(&next).copied().unwrap_or(i32::MAX) {
                came_from.insert(next, current.pos);
                g_score.insert(next, tentative_g);

                let h = next.chebyshev(goal);
                if h < closest_h || (h == closest_h && tie_breaker(next) < tie_breaker(closest)) {
                    closest = next;
                    closest_h = h;
                }
                open_set.push(AStarNode {
                    pos: next,
                    f_score: tentative_g + h,
                    tie_breaker: tie_breaker(next),
                });
            }
        }
    }

    if closest == start {
        return None;
    }
    Some(reconstruct_path(&came_from, closest))
}

fn reconstruct_path(came_from: &BTreeMap<GridPos, GridPos>, end: GridPos) -> Vec<GridPos> {
    let mut path = vec![end];
    let mut current = end;
    while let Some(&prev) = came_from.get(&current) {
        path.push(prev);
        current = prev;
    }
    // drop the start cell
    path.pop();
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn open_grid(w: i32, h: i32, blocked: &[(i32, i32)]) -> impl Fn(GridPos) -> bool {
        let blocked: BTreeSet<GridPos> = blocked.iter().map(|&(x, y)| GridPos::new(x, y)).collect();
        move |p: GridPos| p.x >= 0 && p.y >= 0 && p.x < w && p.y < h && !blocked.contains(&p)
    }

    #[test]
    fn test_simple_path() {
        let path = find_path(GridPos::new(0, 0), GridPos::new(4, 0), open_grid(8, 8, &[]))
            .expect("path");
        assert_eq!(path.len(), 4);
        assert_eq!(path.last(), Some(&GridPos::new(4, 0)));
    }

    #[test]
    fn test_diagonal_path_is_chebyshev_length() {
        let path = find_path(GridPos::new(0, 0), GridPos::new(5, 3), open_grid(8, 8, &[]))
            .expect("path");
        assert_eq!(path.len(), 5);
    }

    #[test]
    fn test_path_around_obstacle() {
        let wall: Vec<(i32, i32)> = (0..6).map(|y| (3, y)).collect();
        let path = find_path(GridPos::new(0, 0), GridPos::new(6, 0), open_grid(8, 8, &wall))
            .expect("path");
        assert_eq!(path.last(), Some(&GridPos::new(6, 0)));
        assert!(path.iter().all(|p| !(p.x == 3 && p.y < 6)));
        assert!(path.iter().any(|p| p.y >= 6));
    }

    #[test]
    fn test_no_corner_cutting() {
        let path = find_path(
            GridPos::new(0, 0),
            GridPos::new(1, 1),
            open_grid(4, 4, &[(1, 0)]),
        )
        .expect("path");
        assert_eq!(path, vec![GridPos::new(0, 1), GridPos::new(1, 1)]);
    }

    #[test]
    fn test_unreachable_goal_leads_to_closest_cell() {
        // goal enclosed by a ring
        let ring = [
            (4, 4), (5, 4), (6, 4), (4, 5), (6, 5), (4, 6), (5, 6), (6, 6),
        ];
        let path = find_path(GridPos::new(0, 5), GridPos::new(5, 5), open_grid(10, 10, &ring))
            .expect("partial path");
        let end = *path.last().expect("non-empty");
        assert_eq!(end.chebyshev(GridPos::new(5, 5)), 2);
    }

    #[test]
    fn test_no_progress_possible() {
        let boxed = [(1, 0), (0, 1), (1, 1)];
        assert!(find_path(GridPos::new(0, 0), GridPos::new(5, 5), open_grid(8, 8, &boxed)).is_none());
    }

    #[test]
    fn test_path_to_same_cell() {
        let path = find_path(GridPos::new(2, 2), GridPos::new(2, 2), open_grid(4, 4, &[]));
        assert_eq!(path, Some(Vec::new()));
    }

    #[test]
    fn test_determinism() {
        let blocked = [(2, 2), (3, 3), (4, 1)];
        let a = find_path(GridPos::new(0, 0), GridPos::new(7, 7), open_grid(8, 8, &blocked));
        for _ in 0..10 {
            let b = find_path(GridPos::new(0, 0), GridPos::new(7, 7), open_grid(8, 8, &blocked));
            assert_eq!(a, b);
        }
    }
}
