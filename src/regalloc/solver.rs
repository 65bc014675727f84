//! Bipartite matching between operand values and registers.
//!
//! At a constrained instruction every participating value (left side) must
//! receive a distinct register (right side) out of its admissible set. All
//! edges weigh the same, so a maximum matching solver is all that is
//! needed; two interchangeable algorithms are provided behind one trait
//! and chosen at construction time.

use crate::fx::FxHashSet;

/// A maximum bipartite matching instance.
pub trait MatchingSolver {
    /// Allow left node `left` to be assigned right node `right`.
    fn add_edge(&mut self, left: usize, right: usize);

    /// Compute a maximum matching; entry `i` of the result is the right
    /// node assigned to left node `i`, or `None` when `i` stayed
    /// unmatched.
    fn solve(&mut self) -> Vec<Option<usize>>;
}

/// The matching algorithm to instantiate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatcherKind {
    /// Single-path augmentation (Kuhn's algorithm). The default.
    #[default]
    Augmenting,
    /// Layered multi-path augmentation (Hopcroft–Karp). Equivalent
    /// results; asymptotically faster on large instances.
    Layered,
}

/// Create a solver for an `n_left` x `n_right` instance.
pub fn make_solver(kind: MatcherKind, n_left: usize, n_right: usize) -> Box<dyn MatchingSolver> {
    match kind {
        MatcherKind::Augmenting => Box::new(Augmenting::new(n_left, n_right)),
        MatcherKind::Layered => Box::new(Layered::new(n_left, n_right)),
    }
}

/// Kuhn's augmenting path algorithm: for every left node, search for an
/// alternating path to a free right node.
pub struct Augmenting {
    adj: Vec<Vec<usize>>,
    n_right: usize,
}

impl Augmenting {
    /// Create an empty instance.
    pub fn new(n_left: usize, n_right: usize) -> Self {
        Self {
            adj: vec![Vec::new(); n_left],
            n_right,
        }
    }

    fn try_augment(
        &self,
        left: usize,
        visited: &mut FxHashSet<usize>,
        match_right: &mut [Option<usize>],
    ) -> bool {
        for &right in &self.adj[left] {
            if !visited.insert(right) {
                continue;
            }
            match match_right[right] {
                None => {
                    match_right[right] = Some(left);
                    return true;
                }
                Some(other) => {
                    if self.try_augment(other, visited, match_right) {
                        match_right[right] = Some(left);
                        return true;
                    }
                }
            }
        }
        false
    }
}

impl MatchingSolver for Augmenting {
    fn add_edge(&mut self, left: usize, right: usize) {
        debug_assert!(right < self.n_right);
        self.adj[left].push(right);
    }

    fn solve(&mut self) -> Vec<Option<usize>> {
        let mut match_right: Vec<Option<usize>> = vec![None; self.n_right];
        for left in 0..self.adj.len() {
            let mut visited = FxHashSet::default();
            self.try_augment(left, &mut visited, &mut match_right);
        }
        let mut result = vec![None; self.adj.len()];
        for (right, &left) in match_right.iter().enumerate() {
            if let Some(left) = left {
                result[left] = Some(right);
            }
        }
        result
    }
}

/// Hopcroft–Karp: breadth-first layering followed by depth-first
/// augmentation along shortest paths, repeated until no augmenting path
/// remains.
pub struct Layered {
    adj: Vec<Vec<usize>>,
    n_right: usize,
}

const INF: u32 = u32::MAX;

impl Layered {
    /// Create an empty instance.
    pub fn new(n_left: usize, n_right: usize) -> Self {
        Self {
            adj: vec![Vec::new(); n_left],
            n_right,
        }
    }

    fn bfs(&self, match_left: &[Option<usize>], match_right: &[Option<usize>], dist: &mut [u32]) -> bool {
        let mut queue = std::collections::VecDeque::new();
        for left in 0..self.adj.len() {
            if match_left[left].is_none() {
                dist[left] = 0;
                queue.push_back(left);
            } else {
                dist[left] = INF;
            }
        }
        let mut found = false;
        while let Some(left) = queue.pop_front() {
            for &right in &self.adj[left] {
                match match_right[right] {
                    None => found = true,
                    Some(next) => {
                        if dist[next] == INF {
                            dist[next] = dist[left] + 1;
                            queue.push_back(next);
                        }
                    }
                }
            }
        }
        found
    }

    fn dfs(
        &self,
        left: usize,
        match_left: &mut [Option<usize>],
        match_right: &mut [Option<usize>],
        dist: &mut [u32],
    ) -> bool {
        for i in 0..self.adj[left].len() {
            let right = self.adj[left][i];
            let ok = match match_right[right] {
                None => true,
                Some(next) => {
                    dist[next] == dist[left] + 1
                        && self.dfs(next, match_left, match_right, dist)
                }
            };
            if ok {
                match_left[left] = Some(right);
                match_right[right] = Some(left);
                return true;
            }
        }
        dist[left] = INF;
        false
    }
}

impl MatchingSolver for Layered {
    fn add_edge(&mut self, left: usize, right: usize) {
        debug_assert!(right < self.n_right);
        self.adj[left].push(right);
    }

    fn solve(&mut self) -> Vec<Option<usize>> {
        let n_left = self.adj.len();
        let mut match_left: Vec<Option<usize>> = vec![None; n_left];
        let mut match_right: Vec<Option<usize>> = vec![None; self.n_right];
        let mut dist = vec![INF; n_left];
        while self.bfs(&match_left, &match_right, &mut dist) {
            for left in 0..n_left {
                if match_left[left].is_none() {
                    self.dfs(left, &mut match_left, &mut match_right, &mut dist);
                }
            }
        }
        match_left
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solve_with(kind: MatcherKind, n: usize, edges: &[(usize, usize)]) -> Vec<Option<usize>> {
        let mut solver = make_solver(kind, n, n);
        for &(l, r) in edges {
            solver.add_edge(l, r);
        }
        solver.solve()
    }

    #[test]
    fn perfect_matching_both_algorithms() {
        // 0 -> {0, 1}, 1 -> {0}, 2 -> {1, 2}: the only perfect matching
        // is 0->1? No: 1 must take 0, so 0 takes 1, 2 takes 2.
        let edges = [(0, 0), (0, 1), (1, 0), (2, 1), (2, 2)];
        for kind in [MatcherKind::Augmenting, MatcherKind::Layered] {
            let m = solve_with(kind, 3, &edges);
            assert_eq!(m[1], Some(0));
            assert_eq!(m[0], Some(1));
            assert_eq!(m[2], Some(2));
        }
    }

    #[test]
    fn distinct_assignments() {
        // Fully connected: any permutation works, but it must be a
        // permutation.
        let mut edges = Vec::new();
        for l in 0..4 {
            for r in 0..4 {
                edges.push((l, r));
            }
        }
        for kind in [MatcherKind::Augmenting, MatcherKind::Layered] {
            let m = solve_with(kind, 4, &edges);
            let mut taken = std::collections::HashSet::new();
            for assignment in &m {
                let r = assignment.expect("full instance must match perfectly");
                assert!(taken.insert(r));
            }
        }
    }

    #[test]
    fn over_constrained_leaves_unmatched() {
        // Two nodes demand the single register 0; one must lose.
        let edges = [(0, 0), (1, 0)];
        for kind in [MatcherKind::Augmenting, MatcherKind::Layered] {
            let m = solve_with(kind, 2, &edges);
            let matched = m.iter().filter(|a| a.is_some()).count();
            assert_eq!(matched, 1);
        }
    }

    #[test]
    fn empty_constraint_never_matches() {
        let edges = [(0, 0)];
        for kind in [MatcherKind::Augmenting, MatcherKind::Layered] {
            let m = solve_with(kind, 2, &edges);
            assert_eq!(m[0], Some(0));
            assert_eq!(m[1], None);
        }
    }
}
