//! DSL module: builder API for filter graphs.

use crate::format::MediaType;
use crate::graph::{Edge, Graph, GraphError, NodeId, PadId};
use std::collections::HashMap;

/// Handle to a filter in the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterHandle(pub NodeId);

/// The graph builder.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Graph,
    filter_names: HashMap<String, NodeId>,
}

impl GraphBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named filter with one pad per listed media type.
    pub fn filter(
        &mut self,
        name: &str,
        inputs: &[MediaType],
        outputs: &[MediaType],
    ) -> Result<FilterHandle, DslError> {
        if self.filter_names.contains_key(name) {
            return Err(DslError::DuplicateName(name.to_string()));
        }
        let id = self.graph.add_filter(name, inputs, outputs);
        self.filter_names.insert(name.to_string(), id);
        Ok(FilterHandle(id))
    }

    /// Look up a filter by name.
    pub fn handle(&self, name: &str) -> Result<FilterHandle, DslError> {
        self.filter_names
            .get(name)
            .copied()
            .map(FilterHandle)
            .ok_or_else(|| DslError::MissingFilter(name.to_string()))
    }

    /// Connect an output pad to an input pad.
    pub fn connect(
        &mut self,
        from: FilterHandle,
        from_pad: PadId,
        to: FilterHandle,
        to_pad: PadId,
        media: MediaType,
    ) -> Result<(), DslError> {
        let edge = Edge {
            from_node: from.0,
            from_pad,
            to_node: to.0,
            to_pad,
            media,
        };
        self.graph.add_link(edge).map_err(DslError::Graph)?;
        Ok(())
    }

    /// Connect pad 0 of each named filter to pad 0 of the next.
    pub fn chain(&mut self, names: &[&str], media: MediaType) -> Result<(), DslError> {
        for pair in names.windows(2) {
            let from = self.handle(pair[0])?;
            let to = self.handle(pair[1])?;
            self.connect(from, PadId(0), to, PadId(0), media)?;
        }
        Ok(())
    }

    /// Build the graph.
    pub fn build(self) -> Graph {
        self.graph
    }
}

/// DSL-specific errors.
#[derive(Debug, Clone, PartialEq)]
pub enum DslError {
    /// The graph rejected a connection.
    Graph(GraphError),
    /// No filter has this name.
    MissingFilter(String),
    /// A filter with this name already exists.
    DuplicateName(String),
}
