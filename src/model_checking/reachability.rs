use std::collections::VecDeque;
use petgraph::{Graph, graph::NodeIndex, Direction};
use petgraph::visit::Dfs;
use super::sts::TransitionMatrix;

/// Graph of the transition matrix. Node `i` is state `i` and every matrix entry becomes an
/// edge weighted by the choice it belongs to.
pub fn generate_graph(matrix: &TransitionMatrix) -> Graph<usize, usize> {
    let mut graph: Graph<usize, usize> = Graph::with_capacity(matrix.num_states(), matrix.num_entries());
    for state in 0..matrix.num_states() {
        graph.add_node(state);
    }
    for state in 0..matrix.num_states() {
        for choice in matrix.row_group(state) {
            for t in matrix.row(choice) {
                graph.add_edge(NodeIndex::new(state), NodeIndex::new(t.s), choice);
            }
        }
    }
    graph
}

/// States reachable from any of `seeds` in zero or more steps
pub fn forward_reachable<I: IntoIterator<Item = usize>>(matrix: &TransitionMatrix, seeds: I) -> Vec<bool> {
    let g = generate_graph(matrix);
    let mut reachable: Vec<bool> = vec![false; matrix.num_states()];
    let mut dfs = Dfs::empty(&g);
    for seed in seeds {
        dfs.move_to(NodeIndex::new(seed));
        while let Some(node) = dfs.next(&g) {
            reachable[g[node]] = true;
        }
    }
    reachable
}

/// States reachable in one or more steps from any of `seeds`
pub fn successors_reachable<I: IntoIterator<Item = usize>>(matrix: &TransitionMatrix, seeds: I) -> Vec<bool> {
    let successors: Vec<usize> = seeds.into_iter()
        .flat_map(|s| matrix.successors(s).collect::<Vec<_>>())
        .collect();
    forward_reachable(matrix, successors)
}

/// States from which some scheduler reaches `targets` with positive probability while only
/// passing through `constraint` states.
pub fn backward_prob_greater_zero(matrix: &TransitionMatrix, constraint: &[bool], targets: &[bool]) -> Vec<bool> {
    let g = generate_graph(matrix);
    let mut reachable: Vec<bool> = targets.to_vec();
    let mut queue: VecDeque<NodeIndex> = targets.iter().enumerate()
        .filter(|(_, t)| **t)
        .map(|(s, _)| NodeIndex::new(s))
        .collect();
    while let Some(node) = queue.pop_front() {
        for predecessor in g.neighbors_directed(node, Direction::Incoming) {
            let s = g[predecessor];
            if !reachable[s] && constraint[s] {
                reachable[s] = true;
                queue.push_back(predecessor);
            }
        }
    }
    reachable
}
