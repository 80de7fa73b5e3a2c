use std::{collections::VecDeque, fmt};

use kairos_backend::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn index(self) -> usize {
        self.0
    }

    pub(crate) fn from_usize(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// How a node depends on its upstream node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// The downstream node consumes the result and is skipped when the upstream node did not complete
    Data,
    /// The downstream node only has to run after the upstream node, however it finished
    Order,
}

/// Directed graph of nodes with typed edges.
///
/// Nodes can only be added, never removed. A changed graph is built anew.
#[derive(Debug, Clone)]
pub struct Dag<T> {
    nodes: Vec<T>,
    upstream: Vec<Vec<(NodeIndex, EdgeKind)>>,
    downstream: Vec<Vec<(NodeIndex, EdgeKind)>>,
}

impl<T> Default for Dag<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            upstream: Vec::new(),
            downstream: Vec::new(),
        }
    }
}

impl<T> Dag<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: T) -> NodeIndex {
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(node);
        self.upstream.push(Vec::new());
        self.downstream.push(Vec::new());
        index
    }

    /// Adds an edge so that `to` runs after `from`.
    ///
    /// Adding an existing edge again keeps a single edge. A data edge wins over an order edge.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, kind: EdgeKind) -> Result<()> {
        self.check(from)?;
        self.check(to)?;
        if from == to {
            return Err(Error::CyclicGraph);
        }
        if let Some(existing) = self.upstream[to.0].iter_mut().find(|(node, _)| *node == from) {
            if kind == EdgeKind::Data {
                existing.1 = EdgeKind::Data;
                if let Some(existing) = self.downstream[from.0].iter_mut().find(|(node, _)| *node == to) {
                    existing.1 = EdgeKind::Data;
                }
            }
            return Ok(());
        }
        self.upstream[to.0].push((from, kind));
        self.downstream[from.0].push((to, kind));
        Ok(())
    }

    fn check(&self, index: NodeIndex) -> Result<()> {
        if index.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(Error::UnknownNode(index.0))
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the node. Panics when the index doesn't belong to this graph.
    pub fn node(&self, index: NodeIndex) -> &T {
        &self.nodes[index.0]
    }

    pub fn get(&self, index: NodeIndex) -> Option<&T> {
        self.nodes.get(index.0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &T)> {
        self.nodes.iter().enumerate().map(|(index, node)| (NodeIndex(index), node))
    }

    pub fn upstream(&self, index: NodeIndex) -> &[(NodeIndex, EdgeKind)] {
        &self.upstream[index.0]
    }

    pub fn downstream(&self, index: NodeIndex) -> &[(NodeIndex, EdgeKind)] {
        &self.downstream[index.0]
    }

    pub fn edge_count(&self) -> usize {
        self.upstream.iter().map(Vec::len).sum()
    }

    /// Nodes without upstream nodes
    pub fn roots(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.upstream
            .iter()
            .enumerate()
            .filter(|(_, upstream)| upstream.is_empty())
            .map(|(index, _)| NodeIndex(index))
    }

    /// Whether `to` is reachable from `from`
    pub fn depends_on(&self, to: NodeIndex, from: NodeIndex) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([from]);
        while let Some(node) = queue.pop_front() {
            for &(next, _) in &self.downstream[node.0] {
                if next == to {
                    return true;
                }
                if !visited[next.0] {
                    visited[next.0] = true;
                    queue.push_back(next);
                }
            }
        }
        false
    }

    /// Returns the nodes in an order in which every node comes after its upstream nodes
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>> {
        let mut pending = self.upstream.iter().map(Vec::len).collect::<Vec<_>>();
        let mut queue = self.roots().collect::<VecDeque<_>>();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &(next, _) in &self.downstream[node.0] {
                pending[next.0] -= 1;
                if pending[next.0] == 0 {
                    queue.push_back(next);
                }
            }
        }
        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            Err(Error::CyclicGraph)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topological_order_respects_edges() {
        let mut dag = Dag::new();
        let a = dag.add_node("a");
        let b = dag.add_node("b");
        let c = dag.add_node("c");
        let d = dag.add_node("d");
        dag.add_edge(a, c, EdgeKind::Data).unwrap();
        dag.add_edge(b, c, EdgeKind::Order).unwrap();
        dag.add_edge(c, d, EdgeKind::Data).unwrap();

        let order = dag.topological_order().unwrap();
        let position = |node: NodeIndex| order.iter().position(|n| *n == node).unwrap();
        assert!(position(a) < position(c));
        assert!(position(b) < position(c));
        assert!(position(c) < position(d));
        assert_eq!(dag.roots().collect::<Vec<_>>(), vec![a, b]);
        assert!(dag.depends_on(d, a));
        assert!(!dag.depends_on(a, d));
    }

    #[test]
    fn cycle_is_detected() {
        let mut dag = Dag::new();
        let a = dag.add_node(());
        let b = dag.add_node(());
        let c = dag.add_node(());
        dag.add_edge(a, b, EdgeKind::Data).unwrap();
        dag.add_edge(b, c, EdgeKind::Data).unwrap();
        dag.add_edge(c, a, EdgeKind::Order).unwrap();
        assert!(matches!(dag.topological_order(), Err(Error::CyclicGraph)));
    }

    #[test]
    fn self_edge_is_rejected() {
        let mut dag = Dag::new();
        let a = dag.add_node(());
        assert!(matches!(dag.add_edge(a, a, EdgeKind::Data), Err(Error::CyclicGraph)));
    }

    #[test]
    fn unknown_node_is_rejected() {
        let mut dag = Dag::new();
        let a = dag.add_node(());
        assert!(matches!(dag.add_edge(a, NodeIndex(5), EdgeKind::Data), Err(Error::UnknownNode(5))));
    }

    #[test]
    fn duplicate_edge_is_merged() {
        let mut dag = Dag::new();
        let a = dag.add_node(());
        let b = dag.add_node(());
        dag.add_edge(a, b, EdgeKind::Order).unwrap();
        dag.add_edge(a, b, EdgeKind::Data).unwrap();
        dag.add_edge(a, b, EdgeKind::Order).unwrap();
        assert_eq!(dag.edge_count(), 1);
        assert_eq!(dag.upstream(b), &[(a, EdgeKind::Data)]);
        assert_eq!(dag.downstream(a), &[(b, EdgeKind::Data)]);
    }
}
