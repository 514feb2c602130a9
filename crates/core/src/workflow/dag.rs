use crate::types::{StepDefinition, StepId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};

/// Producer -> consumer graph over a workflow's steps, used to order
/// pipeline execution
pub struct DataFlowGraph {
    graph: DiGraph<StepId, ()>,
    step_indices: HashMap<StepId, NodeIndex>,
}

impl DataFlowGraph {
    /// Build the graph from a data-flow map (`producer -> "consumer,consumer"`).
    ///
    /// Producers and consumers that are not steps of the workflow are ignored.
    /// An empty map is derived from the declared step dependencies.
    pub fn build(steps: &[StepDefinition], data_flow: &HashMap<StepId, String>) -> Self {
        let mut graph = DiGraph::new();
        let mut step_indices = HashMap::new();

        for step in steps {
            let node = graph.add_node(step.id.clone());
            step_indices.insert(step.id.clone(), node);
        }

        let flow = if data_flow.is_empty() {
            derive_data_flow(steps)
        } else {
            data_flow.clone()
        };

        // Walk producers in step order so edge insertion order is stable
        for step in steps {
            let Some(consumers) = flow.get(&step.id) else {
                continue;
            };
            let producer = step_indices[&step.id];
            for consumer in parse_consumers(consumers) {
                if let Some(&target) = step_indices.get(&consumer) {
                    graph.add_edge(producer, target, ());
                }
            }
        }

        Self {
            graph,
            step_indices,
        }
    }

    /// Topological order (Kahn's algorithm). Ties keep input order and
    /// consumers are visited in the order they were listed. When a cycle
    /// prevents a full ordering, the input order is returned unchanged.
    pub fn execution_order(&self) -> Vec<StepId> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.edges_directed(n, Direction::Incoming).count())
            .collect();

        let mut queue: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(node) = queue.pop_front() {
            order.push(self.graph[node].clone());

            let mut edges: Vec<_> = self.graph.edges_directed(node, Direction::Outgoing).collect();
            edges.sort_by_key(|e| e.id());
            for edge in edges {
                let target = edge.target();
                in_degree[target.index()] -= 1;
                if in_degree[target.index()] == 0 {
                    queue.push_back(target);
                }
            }
        }

        if order.len() == self.graph.node_count() {
            order
        } else {
            tracing::warn!(
                ordered = order.len(),
                total = self.graph.node_count(),
                "data flow is cyclic, falling back to declared step order"
            );
            self.graph.node_indices().map(|n| self.graph[n].clone()).collect()
        }
    }

    /// Steps whose output flows into the given step
    pub fn producers(&self, step_id: &StepId) -> Vec<StepId> {
        let Some(&node) = self.step_indices.get(step_id) else {
            return Vec::new();
        };

        let mut edges: Vec<_> = self.graph.edges_directed(node, Direction::Incoming).collect();
        edges.sort_by_key(|e| e.id());
        edges
            .into_iter()
            .map(|e| self.graph[e.source()].clone())
            .collect()
    }

    pub fn has_cycle(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }
}

/// Data-flow map implied by declared dependencies: every dependency feeds
/// the step that depends on it
pub fn derive_data_flow(steps: &[StepDefinition]) -> HashMap<StepId, String> {
    let mut consumers: HashMap<StepId, Vec<String>> = HashMap::new();
    for step in steps {
        for dep in &step.dependencies {
            consumers
                .entry(dep.clone())
                .or_default()
                .push(step.id.0.clone());
        }
    }

    consumers
        .into_iter()
        .map(|(producer, targets)| (producer, targets.join(",")))
        .collect()
}

fn parse_consumers(consumers: &str) -> impl Iterator<Item = StepId> + '_ {
    consumers
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(StepId::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(ids: &[&str]) -> Vec<StepDefinition> {
        ids.iter()
            .map(|id| StepDefinition::new(*id, "tool", "act"))
            .collect()
    }

    fn flow(pairs: &[(&str, &str)]) -> HashMap<StepId, String> {
        pairs
            .iter()
            .map(|(p, c)| (StepId::new(*p), c.to_string()))
            .collect()
    }

    fn ids(order: &[StepId]) -> Vec<&str> {
        order.iter().map(|s| s.as_str()).collect()
    }

    #[test]
    fn test_linear_flow() {
        let graph = DataFlowGraph::build(
            &steps(&["c", "b", "a"]),
            &flow(&[("a", "b"), ("b", "c")]),
        );
        assert_eq!(ids(&graph.execution_order()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fan_out_keeps_listed_order() {
        let graph = DataFlowGraph::build(
            &steps(&["design", "backend", "frontend", "impl", "test", "audit"]),
            &flow(&[
                ("design", "frontend,backend"),
                ("backend", "impl"),
                ("impl", "test"),
                ("frontend", "test"),
                ("test", "audit"),
            ]),
        );

        assert_eq!(
            ids(&graph.execution_order()),
            vec!["design", "frontend", "backend", "impl", "test", "audit"]
        );
        assert_eq!(
            ids(&graph.producers(&StepId::new("test"))),
            vec!["frontend", "impl"]
        );
    }

    #[test]
    fn test_unmapped_steps_keep_input_order() {
        let graph = DataFlowGraph::build(
            &steps(&["x", "a", "y", "b"]),
            &flow(&[("a", "b"), ("a", "ghost")]),
        );
        assert_eq!(ids(&graph.execution_order()), vec!["x", "a", "y", "b"]);
    }

    #[test]
    fn test_cycle_falls_back_to_input_order() {
        let graph = DataFlowGraph::build(
            &steps(&["b", "a", "c"]),
            &flow(&[("a", "b"), ("b", "a"), ("c", "a")]),
        );
        assert!(graph.has_cycle());
        assert_eq!(ids(&graph.execution_order()), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_empty_flow_derived_from_dependencies() {
        let definitions = vec![
            StepDefinition::new("report", "tool", "act").depends_on(["fetch", "parse"]),
            StepDefinition::new("parse", "tool", "act").depends_on(["fetch"]),
            StepDefinition::new("fetch", "tool", "act"),
        ];
        let graph = DataFlowGraph::build(&definitions, &HashMap::new());

        assert_eq!(ids(&graph.execution_order()), vec!["fetch", "parse", "report"]);
        assert_eq!(
            ids(&graph.producers(&StepId::new("report"))),
            vec!["parse", "fetch"]
        );
    }
}
