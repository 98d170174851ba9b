//! Service registry (DF) vocabulary.

use serde::{Deserialize, Serialize};

use crate::types::AgentId;

/// A service an agent offers to the rest of its MAS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Assigned by the registry on registration.
    #[serde(default)]
    pub id: String,
    #[serde(rename = "agentid", default)]
    pub agent_id: AgentId,
    /// Graph node the offering agent is attached to.
    #[serde(rename = "nodeid", default)]
    pub node_id: i32,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub dist: f64,
}

impl Service {
    pub fn new(desc: impl Into<String>) -> Self {
        Self {
            desc: desc.into(),
            ..Self::default()
        }
    }

    pub fn with_node(mut self, node_id: i32) -> Self {
        self.node_id = node_id;
        self
    }
}

/// Topology of a MAS, used for locality-aware service search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub node: Vec<GraphNode>,
    #[serde(default)]
    pub edge: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: i32,
    #[serde(default)]
    pub agents: Vec<AgentId>,
}

/// Undirected, weighted edge between two nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub n1: i32,
    pub n2: i32,
    #[serde(default)]
    pub weight: f64,
}

impl Graph {
    /// Shortest weighted distance from `from` to every reachable node.
    pub fn distances(&self, from: i32) -> Vec<(i32, f64)> {
        let mut dist: Vec<(i32, f64)> = vec![(from, 0.0)];
        // Relax until stable; graphs here are small.
        loop {
            let mut changed = false;
            for edge in &self.edge {
                for (a, b) in [(edge.n1, edge.n2), (edge.n2, edge.n1)] {
                    let Some(da) = dist.iter().find(|(n, _)| *n == a).map(|(_, d)| *d) else {
                        continue;
                    };
                    let candidate = da + edge.weight;
                    match dist.iter_mut().find(|(n, _)| *n == b) {
                        Some((_, db)) if candidate < *db => {
                            *db = candidate;
                            changed = true;
                        }
                        Some(_) => {}
                        None => {
                            dist.push((b, candidate));
                            changed = true;
                        }
                    }
                }
            }
            if !changed {
                return dist;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_wire_names() {
        let svc = Service {
            id: "s1".into(),
            agent_id: 4,
            node_id: 2,
            desc: "battery".into(),
            dist: 0.0,
        };
        let json = serde_json::to_value(&svc).unwrap();
        assert_eq!(json["agentid"], 4);
        assert_eq!(json["nodeid"], 2);
        assert_eq!(json["desc"], "battery");
    }

    #[test]
    fn test_distances_take_shortest_path() {
        let graph = Graph {
            node: vec![],
            edge: vec![
                GraphEdge { n1: 1, n2: 2, weight: 1.0 },
                GraphEdge { n1: 2, n2: 3, weight: 1.0 },
                GraphEdge { n1: 1, n2: 3, weight: 5.0 },
            ],
        };
        let dist = graph.distances(1);
        let to3 = dist.iter().find(|(n, _)| *n == 3).unwrap().1;
        assert_eq!(to3, 2.0);
        assert!(!dist.iter().any(|(n, _)| *n == 9));
    }
}
