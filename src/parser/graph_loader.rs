use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::{AttrValue, Attributes, Graph, GraphNode, InputRef, NodeId};
use crate::parser::graph_builder::GraphBuilder;

// On-disk layout of an MXNet symbol file. Everything is optional so that
// missing fields surface as descriptive parse errors instead of serde noise.
#[derive(Debug, Deserialize)]
struct SymbolFile {
    #[serde(default)]
    nodes: Option<Vec<SymbolNode>>,
    #[serde(default)]
    arg_nodes: Vec<usize>,
    #[serde(default)]
    node_row_ptr: Vec<usize>,
    #[serde(default)]
    heads: Vec<Vec<i64>>,
    #[serde(default)]
    attrs: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct SymbolNode {
    op: Option<String>,
    name: Option<String>,
    #[serde(default)]
    inputs: Vec<Vec<i64>>,
    // Newer files use `attrs`, 0.x files use `param`, some exporters `attr`
    #[serde(default)]
    attrs: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    attr: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    param: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Loader for MXNet symbolic graph files
pub struct GraphLoader;

impl GraphLoader {
    /// Load a graph from a symbol file path
    pub fn load_file(path: &Path) -> Result<Graph> {
        let mut file = File::open(path)?;

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        Self::load(&buffer)
    }

    /// Load a graph from the bytes of a symbol file.
    ///
    /// Node ids are the declaration indices. Every input reference must name a
    /// declared node and the resulting graph must be acyclic.
    pub fn load(bytes: &[u8]) -> Result<Graph> {
        let file: SymbolFile = serde_json::from_slice(bytes)
            .map_err(|e| Error::Parse(format!("malformed symbol file: {}", e)))?;

        let raw_nodes = file
            .nodes
            .ok_or_else(|| Error::Parse("symbol file has no `nodes` array".to_string()))?;

        let node_count = raw_nodes.len();
        let nodes = raw_nodes
            .into_iter()
            .enumerate()
            .map(|(id, node)| Self::convert_node(id, node, node_count))
            .collect::<Result<Vec<_>>>()?;

        for &arg in &file.arg_nodes {
            if arg >= node_count {
                return Err(Error::Parse(format!(
                    "arg_nodes entry {} is out of range ({} nodes)",
                    arg, node_count
                )));
            }
        }

        let heads = file
            .heads
            .iter()
            .map(|entry| Self::convert_input_ref(entry, node_count, "heads"))
            .collect::<Result<Vec<_>>>()?;

        let graph = Graph {
            nodes,
            arg_nodes: file.arg_nodes,
            node_row_ptr: file.node_row_ptr,
            heads,
            attributes: file.attrs.as_ref().map(Self::convert_attributes).unwrap_or_default(),
        };

        GraphBuilder::check_acyclic(&graph)?;

        log::debug!(
            "loaded symbol graph with {} nodes ({} arguments, {} heads)",
            graph.nodes.len(),
            graph.arg_nodes.len(),
            graph.heads.len()
        );

        Ok(graph)
    }

    fn convert_node(id: NodeId, node: SymbolNode, node_count: usize) -> Result<GraphNode> {
        let op = node
            .op
            .ok_or_else(|| Error::Parse(format!("node {} is missing its `op` field", id)))?;
        let name = node
            .name
            .ok_or_else(|| Error::Parse(format!("node {} ({}) is missing its `name` field", id, op)))?;

        let inputs = node
            .inputs
            .iter()
            .map(|entry| Self::convert_input_ref(entry, node_count, &name))
            .collect::<Result<Vec<_>>>()?;

        let attributes = node
            .attrs
            .or(node.attr)
            .or(node.param)
            .as_ref()
            .map(Self::convert_attributes)
            .unwrap_or_default();

        Ok(GraphNode {
            id,
            op,
            name,
            inputs,
            attributes,
        })
    }

    // Entries are `[node, slot]` or `[node, slot, version]`
    fn convert_input_ref(entry: &[i64], node_count: usize, owner: &str) -> Result<InputRef> {
        if entry.len() < 2 {
            return Err(Error::Parse(format!(
                "input reference {:?} of {} needs at least a node id and a slot",
                entry, owner
            )));
        }
        let (node, slot) = (entry[0], entry[1]);
        if node < 0 || node as usize >= node_count || slot < 0 {
            return Err(Error::Parse(format!(
                "input reference {:?} of {} does not resolve to a declared node",
                entry, owner
            )));
        }
        Ok(InputRef {
            node: node as usize,
            slot: slot as usize,
        })
    }

    fn convert_attributes(map: &serde_json::Map<String, serde_json::Value>) -> Attributes {
        map.iter()
            .map(|(key, value)| (key.clone(), AttrValue::from_json(value)))
            .collect()
    }
}

impl Graph {
    /// Parse a graph from symbol file bytes
    pub fn load(bytes: &[u8]) -> Result<Graph> {
        GraphLoader::load(bytes)
    }

    /// Parse a graph from a symbol file on disk
    pub fn load_file(path: &Path) -> Result<Graph> {
        GraphLoader::load_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_op_is_parse_error() {
        let json = br#"{"nodes": [{"name": "data", "inputs": []}]}"#;
        let err = GraphLoader::load(json).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert!(err.to_string().contains("op"));
    }

    #[test]
    fn test_missing_name_is_parse_error() {
        let json = br#"{"nodes": [{"op": "null", "inputs": []}]}"#;
        assert!(matches!(GraphLoader::load(json), Err(Error::Parse(_))));
    }

    #[test]
    fn test_attribute_aliases() {
        let json = br#"{
            "nodes": [
                {"op": "null", "name": "data", "inputs": []},
                {"op": "Pooling", "name": "pool", "param": {"kernel": "(2, 2)"}, "inputs": [[0, 0]]},
                {"op": "Flatten", "name": "flat", "attr": {"__layout__": "NC"}, "inputs": [[1, 0, 0]]}
            ],
            "arg_nodes": [0],
            "heads": [[2, 0, 0]],
            "attrs": {"mxnet_version": ["int", 10500]}
        }"#;
        let graph = GraphLoader::load(json).unwrap();
        assert_eq!(graph.nodes[1].attributes["kernel"], AttrValue::from("(2, 2)"));
        assert_eq!(graph.nodes[2].attributes["__layout__"], AttrValue::from("NC"));
        assert_eq!(graph.nodes[2].inputs, vec![InputRef { node: 1, slot: 0 }]);
        assert_eq!(
            graph.attributes["mxnet_version"],
            AttrValue::from("[\"int\",10500]")
        );
        assert_eq!(graph.heads, vec![InputRef { node: 2, slot: 0 }]);
    }

    #[test]
    fn test_dangling_reference_is_parse_error() {
        let json = br#"{"nodes": [{"op": "Activation", "name": "relu", "inputs": [[4, 0]]}]}"#;
        assert!(matches!(GraphLoader::load(json), Err(Error::Parse(_))));
    }
}
