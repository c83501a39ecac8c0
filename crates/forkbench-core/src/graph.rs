//! Lineage graph of a workflow.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;

use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ops::{OpKind, OpStep};
use crate::schema::SchemaMap;

/// Node payload: one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageNode {
    pub label: String,
    pub schema_map: SchemaMap,
    pub row_count: usize,
}

/// Edge payload: the operation chain that derived the target and the
/// backend code text that executed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEdge {
    pub op_list: Vec<OpStep>,
    pub code: String,
}

/// `(source, destination, op kinds)` triple used to compare lineage shapes.
pub type EdgeSignature = (String, String, Vec<OpKind>);

/// Directed lineage graph keyed by artifact label.
///
/// Nodes are inserted in creation order and every edge must point from an
/// earlier node to a later one, which keeps the graph acyclic.
#[derive(Debug, Clone, Default)]
pub struct LineageGraph {
    graph: DiGraph<LineageNode, LineageEdge>,
    node_indices: HashMap<String, NodeIndex>,
}

impl LineageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.node_indices.contains_key(label)
    }

    pub fn add_node(&mut self, node: LineageNode) -> Result<()> {
        if self.node_indices.contains_key(&node.label) {
            return Err(Error::Lineage(format!(
                "artifact '{}' is already in the lineage graph",
                node.label
            )));
        }
        let label = node.label.clone();
        let index = self.graph.add_node(node);
        self.node_indices.insert(label, index);
        Ok(())
    }

    pub fn node(&self, label: &str) -> Option<&LineageNode> {
        let index = self.node_indices.get(label)?;
        self.graph.node_weight(*index)
    }

    pub fn add_edge(&mut self, source: &str, target: &str, edge: LineageEdge) -> Result<()> {
        let from = self.index_of(source)?;
        let to = self.index_of(target)?;
        if from >= to {
            return Err(Error::Lineage(format!(
                "edge {source} -> {target} does not point to a later artifact"
            )));
        }
        self.graph.add_edge(from, to, edge);
        Ok(())
    }

    /// Adds a derived artifact together with one edge per source. Nothing
    /// is inserted unless every source is already present.
    pub fn add_derived(
        &mut self,
        node: LineageNode,
        sources: &[String],
        edge: LineageEdge,
    ) -> Result<()> {
        if sources.is_empty() {
            return Err(Error::Lineage(format!(
                "derived artifact '{}' has no sources",
                node.label
            )));
        }
        let from = sources
            .iter()
            .map(|source| self.index_of(source))
            .collect::<Result<Vec<_>>>()?;
        let target = node.label.clone();
        self.add_node(node)?;
        let to = self.index_of(&target)?;
        for index in from {
            self.graph.add_edge(index, to, edge.clone());
        }
        Ok(())
    }

    /// Labels in creation order.
    pub fn node_labels(&self) -> impl Iterator<Item = &str> {
        self.graph
            .node_indices()
            .filter_map(|index| self.graph.node_weight(index))
            .map(|node| node.label.as_str())
    }

    /// Edges as `(source, target, payload)` in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, &LineageEdge)> {
        self.graph.edge_references().map(|edge| {
            (
                self.graph[edge.source()].label.as_str(),
                self.graph[edge.target()].label.as_str(),
                edge.weight(),
            )
        })
    }

    pub fn in_degree(&self, label: &str) -> usize {
        self.node_indices
            .get(label)
            .map(|index| {
                self.graph
                    .edges_directed(*index, Direction::Incoming)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Artifacts with no incoming edge: bases and join partners.
    pub fn roots(&self) -> Vec<&str> {
        self.node_labels()
            .filter(|label| self.in_degree(label) == 0)
            .collect()
    }

    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.graph)
    }

    /// Set of `(source, target, op kinds)` triples, independent of edge
    /// insertion order and code text.
    pub fn edge_signatures(&self) -> BTreeSet<EdgeSignature> {
        self.edges()
            .map(|(source, target, edge)| {
                (
                    source.to_string(),
                    target.to_string(),
                    edge.op_list.iter().map(OpStep::kind).collect(),
                )
            })
            .collect()
    }

    /// Write one tab-separated `source target {json payload}` line per edge.
    /// The payload is compact JSON, so it never contains a raw tab.
    pub fn write_edgelist<W: Write>(&self, writer: &mut W) -> Result<()> {
        for (source, target, edge) in self.edges() {
            let payload = serde_json::to_string(edge)?;
            writeln!(writer, "{source}\t{target}\t{payload}")?;
        }
        Ok(())
    }

    fn index_of(&self, label: &str) -> Result<NodeIndex> {
        self.node_indices
            .get(label)
            .copied()
            .ok_or_else(|| Error::Lineage(format!("unknown artifact '{label}'")))
    }
}
