// graph.rs — Requirement graph: which passes were built on top of which
//
// The inverse of every descriptor's `requires` list, indexed by PassId.
// Built once at registry initialization and read-only afterwards. The
// scheduler walks it forward to propagate invalidation: when a pass result
// goes stale, everything that (directly or indirectly) required it is stale
// too.

use std::collections::BTreeSet;

use crate::id::PassId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementGraph {
    /// `required_by[p]` = passes that list `p` in their `requires`, in
    /// ascending PassId order.
    required_by: Vec<Vec<PassId>>,
}

impl RequirementGraph {
    /// Build from `(prerequisite, dependent)` edges over `pass_count` passes.
    pub fn from_edges(
        pass_count: usize,
        edges: impl IntoIterator<Item = (PassId, PassId)>,
    ) -> Self {
        let mut sets: Vec<BTreeSet<PassId>> = vec![BTreeSet::new(); pass_count];
        for (prerequisite, dependent) in edges {
            sets[prerequisite.index()].insert(dependent);
        }
        Self {
            required_by: sets.into_iter().map(|s| s.into_iter().collect()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.required_by.len()
    }

    pub fn is_empty(&self) -> bool {
        self.required_by.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.required_by.iter().map(Vec::len).sum()
    }

    /// Passes that directly require `id`.
    pub fn dependents(&self, id: PassId) -> &[PassId] {
        self.required_by
            .get(id.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every pass that directly or indirectly requires `id`, excluding `id`
    /// itself unless it sits on a requirement cycle. Ascending PassId order.
    pub fn transitive_dependents(&self, id: PassId) -> Vec<PassId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<PassId> = self.dependents(id).to_vec();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend_from_slice(self.dependents(next));
            }
        }
        seen.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(n: u32) -> PassId {
        PassId(n)
    }

    // 0 <- 1 <- 2, 0 <- 3, 4 isolated
    fn sample() -> RequirementGraph {
        RequirementGraph::from_edges(5, [(p(0), p(1)), (p(1), p(2)), (p(0), p(3))])
    }

    #[test]
    fn direct_dependents_are_sorted() {
        let g = RequirementGraph::from_edges(3, [(p(0), p(2)), (p(0), p(1)), (p(0), p(2))]);
        assert_eq!(g.dependents(p(0)), &[p(1), p(2)]);
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn transitive_walk() {
        let g = sample();
        assert_eq!(g.transitive_dependents(p(0)), vec![p(1), p(2), p(3)]);
        assert_eq!(g.transitive_dependents(p(1)), vec![p(2)]);
        assert!(g.transitive_dependents(p(2)).is_empty());
        assert!(g.transitive_dependents(p(4)).is_empty());
    }

    #[test]
    fn cycle_terminates() {
        let g = RequirementGraph::from_edges(2, [(p(0), p(1)), (p(1), p(0))]);
        assert_eq!(g.transitive_dependents(p(0)), vec![p(0), p(1)]);
    }

    #[test]
    fn out_of_range_id_has_no_dependents() {
        assert!(sample().dependents(p(99)).is_empty());
    }
}
