use super::error::{GraphError, GraphResult};
use super::plan::{ExecutionPlan, PlanStats};
use std::collections::VecDeque;

/// Compiles a composite's block graph into an execution plan
pub struct PlanCompiler;

impl PlanCompiler {
    /// Compile a block graph into a topological execution order.
    ///
    /// # Arguments
    /// * `names` - Block names, indexed like the blocks; used for cycle reports
    /// * `edges` - `(from, to)` block indices, one per edge, in insertion order
    /// * `generation` - Generation counter for cache invalidation
    ///
    /// Blocks become ready in index order and are emitted first-in first-out,
    /// so the same graph always yields the same order.
    pub fn compile(
        names: &[String],
        edges: &[(usize, usize)],
        generation: u64,
    ) -> GraphResult<ExecutionPlan> {
        let start_time = std::time::Instant::now();
        let n = names.len();

        let mut inbound = vec![Vec::new(); n];
        let mut outbound = vec![Vec::new(); n];
        for (idx, &(from, to)) in edges.iter().enumerate() {
            outbound[from].push(idx);
            inbound[to].push(idx);
        }

        let (fwd_adj, bwd_adj) = Self::build_adjacency(n, edges);
        let order = Self::topological_sort(&fwd_adj, &bwd_adj)
            .map_err(|cycle| GraphError::Cycle(cycle.iter().map(|&i| names[i].clone()).collect()))?;

        let stats = PlanStats {
            total_blocks: n,
            total_edges: edges.len(),
            source_blocks: inbound.iter().filter(|e| e.is_empty()).count(),
            sink_blocks: outbound.iter().filter(|e| e.is_empty()).count(),
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        Ok(ExecutionPlan {
            order,
            inbound,
            outbound,
            generation,
            stats,
        })
    }

    /// Path of block indices from `start` to `goal` following edge direction,
    /// both ends included. Used to reject an edge that would close a cycle.
    pub fn find_path(
        n: usize,
        edges: &[(usize, usize)],
        start: usize,
        goal: usize,
    ) -> Option<Vec<usize>> {
        if start == goal {
            return Some(vec![start]);
        }
        let (fwd_adj, _) = Self::build_adjacency(n, edges);
        let mut parent: Vec<Option<usize>> = vec![None; n];
        let mut seen = vec![false; n];
        let mut queue = VecDeque::from([start]);
        seen[start] = true;

        while let Some(node) = queue.pop_front() {
            for &next in &fwd_adj[node] {
                if seen[next] {
                    continue;
                }
                seen[next] = true;
                parent[next] = Some(node);
                if next == goal {
                    let mut path = vec![goal];
                    let mut cur = goal;
                    while let Some(p) = parent[cur] {
                        path.push(p);
                        cur = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// Build forward and backward adjacency lists
    fn build_adjacency(n: usize, edges: &[(usize, usize)]) -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
        let mut fwd_adj = vec![Vec::new(); n];
        let mut bwd_adj = vec![Vec::new(); n];

        for &(from, to) in edges {
            if from >= n || to >= n {
                continue;
            }
            fwd_adj[from].push(to);
            bwd_adj[to].push(from);
        }

        (fwd_adj, bwd_adj)
    }

    /// Kahn's algorithm. On failure returns one cycle, first block repeated
    /// at the end.
    fn topological_sort(
        fwd_adj: &[Vec<usize>],
        bwd_adj: &[Vec<usize>],
    ) -> Result<Vec<usize>, Vec<usize>> {
        let n = fwd_adj.len();
        let mut in_degree: Vec<usize> = bwd_adj.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut result = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            result.push(node);
            for &neighbor in &fwd_adj[node] {
                in_degree[neighbor] -= 1;
                if in_degree[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        if result.len() == n {
            return Ok(result);
        }

        // Every block left over has a left-over predecessor; walking
        // predecessors must revisit a block.
        let mut pos = vec![None; n];
        let mut walk = Vec::new();
        let mut node = (0..n).find(|&i| in_degree[i] > 0).unwrap_or(0);
        loop {
            if let Some(start) = pos[node] {
                let mut cycle: Vec<usize> = walk[start..].to_vec();
                cycle.reverse();
                cycle.push(cycle[0]);
                return Err(cycle);
            }
            pos[node] = Some(walk.len());
            walk.push(node);
            match bwd_adj[node].iter().find(|&&p| in_degree[p] > 0) {
                Some(&prev) => node = prev,
                None => return Err(walk),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("b{}", i)).collect()
    }

    #[test]
    fn test_compile_linear_chain() {
        let plan = PlanCompiler::compile(&names(3), &[(0, 1), (1, 2)], 7).unwrap();
        assert_eq!(plan.order, vec![0, 1, 2]);
        assert_eq!(plan.inbound[2], vec![1]);
        assert_eq!(plan.outbound[0], vec![0]);
        assert_eq!(plan.generation, 7);
        assert_eq!(plan.stats.source_blocks, 1);
        assert_eq!(plan.stats.sink_blocks, 1);
    }

    #[test]
    fn test_compile_follows_edges_not_insertion() {
        // b2 feeds b0 feeds b1
        let plan = PlanCompiler::compile(&names(3), &[(2, 0), (0, 1)], 1).unwrap();
        assert_eq!(plan.order, vec![2, 0, 1]);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let edges = [(0, 3), (1, 3), (2, 4), (3, 4)];
        let first = PlanCompiler::compile(&names(5), &edges, 1).unwrap();
        for _ in 0..10 {
            let again = PlanCompiler::compile(&names(5), &edges, 1).unwrap();
            assert_eq!(again.order, first.order);
        }
        assert_eq!(first.order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_compile_disconnected_blocks() {
        let plan = PlanCompiler::compile(&names(3), &[], 1).unwrap();
        assert_eq!(plan.order, vec![0, 1, 2]);
        assert_eq!(plan.stats.source_blocks, 3);
        assert_eq!(plan.stats.sink_blocks, 3);
    }

    #[test]
    fn test_compile_reports_cycle() {
        let err = PlanCompiler::compile(&names(4), &[(0, 1), (1, 2), (2, 1), (2, 3)], 1)
            .unwrap_err();
        match err {
            GraphError::Cycle(path) => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"b1".to_string()));
                assert!(path.contains(&"b2".to_string()));
                assert!(!path.contains(&"b0".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_find_path() {
        let edges = [(0, 1), (1, 2), (3, 2)];
        assert_eq!(PlanCompiler::find_path(4, &edges, 0, 2), Some(vec![0, 1, 2]));
        assert_eq!(PlanCompiler::find_path(4, &edges, 2, 0), None);
        assert_eq!(PlanCompiler::find_path(4, &edges, 3, 3), Some(vec![3]));
    }
}
