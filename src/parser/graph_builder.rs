use std::cmp::Reverse;
use std::collections::BinaryHeap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::{Error, Result};
use crate::model::{Graph, GraphNode, NodeId};

/// Dependency graph with an edge from every producer to each of its consumers.
/// Node weights are declaration ids, edge weights the consumed output slot.
pub type DependencyGraph = DiGraph<NodeId, usize>;

/// Graph builder responsible for dependency analysis and ordering
pub struct GraphBuilder;

impl GraphBuilder {
    /// Build the producer -> consumer dependency graph.
    ///
    /// Petgraph indices coincide with declaration ids because nodes are added in order.
    pub fn build_dependency_graph(graph: &Graph) -> Result<DependencyGraph> {
        let node_count = graph.nodes.len();
        let mut deps = DiGraph::with_capacity(node_count, node_count);

        for node in &graph.nodes {
            deps.add_node(node.id);
        }

        for (index, node) in graph.nodes.iter().enumerate() {
            if node.id != index {
                return Err(Error::Parse(format!(
                    "node `{}` has id {} but is declared at position {}",
                    node.name, node.id, index
                )));
            }
            for input in &node.inputs {
                if input.node >= node_count {
                    return Err(Error::Parse(format!(
                        "node `{}` references undeclared node {}",
                        node.name, input.node
                    )));
                }
                deps.add_edge(NodeIndex::new(input.node), NodeIndex::new(index), input.slot);
            }
        }

        Ok(deps)
    }

    /// Stable topological order of node ids.
    ///
    /// Kahn's algorithm with a min-heap of ready nodes: whenever several nodes are
    /// ready the smallest declaration id goes first, so the result depends only on
    /// the graph and never on hashing or insertion order.
    pub fn topological_order(graph: &Graph) -> Result<Vec<NodeId>> {
        let deps = Self::build_dependency_graph(graph)?;

        let mut in_degree: Vec<usize> = deps
            .node_indices()
            .map(|idx| deps.edges_directed(idx, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(id, _)| Reverse(id))
            .collect();

        let mut sorted = Vec::with_capacity(in_degree.len());

        while let Some(Reverse(id)) = ready.pop() {
            sorted.push(id);

            // One decrement per edge, parallel edges included
            for consumer in deps.neighbors_directed(NodeIndex::new(id), Direction::Outgoing) {
                let degree = &mut in_degree[consumer.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(consumer.index()));
                }
            }
        }

        if sorted.len() != graph.nodes.len() {
            let stuck: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, &degree)| degree > 0)
                .map(|(id, _)| graph.nodes[id].name.as_str())
                .collect();
            return Err(Error::Cycle(format!(
                "no valid ordering, nodes on or behind a cycle: {:?}",
                stuck
            )));
        }

        Ok(sorted)
    }

    /// Sort nodes topologically
    pub fn topological_sort(graph: &Graph) -> Result<Vec<&GraphNode>> {
        let order = Self::topological_order(graph)?;
        Ok(order.into_iter().map(|id| &graph.nodes[id]).collect())
    }

    /// Fail with a cycle error if the graph is not a DAG
    pub fn check_acyclic(graph: &Graph) -> Result<()> {
        let deps = Self::build_dependency_graph(graph)?;
        if petgraph::algo::is_cyclic_directed(&deps) {
            // Re-run the ordering to name the offending nodes
            Self::topological_order(graph)?;
        }
        Ok(())
    }

    /// Ids of the direct producers feeding a node, without duplicates
    pub fn producers_of(graph: &Graph, id: NodeId) -> Vec<NodeId> {
        let mut producers: Vec<NodeId> = graph
            .nodes
            .get(id)
            .map(|node| node.inputs.iter().map(|input| input.node).collect())
            .unwrap_or_default();
        producers.sort_unstable();
        producers.dedup();
        producers
    }
}

impl Graph {
    /// Nodes in stable topological order (ties broken by ascending id)
    pub fn topologically_sorted_nodes(&self) -> Result<Vec<&GraphNode>> {
        GraphBuilder::topological_sort(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InputRef;

    fn node(id: NodeId, op: &str, inputs: &[NodeId]) -> GraphNode {
        GraphNode {
            id,
            op: op.to_string(),
            name: format!("{}{}", op.to_lowercase(), id),
            inputs: inputs.iter().map(|&node| InputRef { node, slot: 0 }).collect(),
            attributes: Default::default(),
        }
    }

    #[test]
    fn test_ties_broken_by_declaration_id() {
        // 3 and 1 are both roots; 2 depends on 3, 0 depends on 1
        let graph = Graph {
            nodes: vec![
                node(0, "Activation", &[1]),
                node(1, "null", &[]),
                node(2, "Activation", &[3]),
                node(3, "null", &[]),
            ],
            ..Default::default()
        };
        assert_eq!(GraphBuilder::topological_order(&graph).unwrap(), vec![1, 0, 3, 2]);
    }

    #[test]
    fn test_parallel_edges_counted_once_each() {
        let graph = Graph {
            nodes: vec![
                node(0, "null", &[]),
                GraphNode {
                    inputs: vec![InputRef { node: 0, slot: 0 }, InputRef { node: 0, slot: 1 }],
                    ..node(1, "elemwise_add", &[])
                },
            ],
            ..Default::default()
        };
        assert_eq!(GraphBuilder::topological_order(&graph).unwrap(), vec![0, 1]);
        assert_eq!(GraphBuilder::producers_of(&graph, 1), vec![0]);
    }

    #[test]
    fn test_cycle_detected() {
        let graph = Graph {
            nodes: vec![node(0, "null", &[]), node(1, "Activation", &[2]), node(2, "Activation", &[1])],
            ..Default::default()
        };
        assert!(matches!(GraphBuilder::topological_order(&graph), Err(Error::Cycle(_))));
        assert!(matches!(GraphBuilder::check_acyclic(&graph), Err(Error::Cycle(_))));
    }
}
