//! Pure transformations from a registry snapshot into the exported views.
//!
//! Nothing in here locks or mutates the registry; callers hand in a
//! [`RegistrySnapshot`](crate::registry::RegistrySnapshot) taken beforehand.

mod graph;
mod nodelist;
mod stats;

pub use graph::{build_graph, Graph, Link, LinkProtocol};
pub use nodelist::{
    node_list, nodes_v1, nodes_v2, NodeList, NodeListVersion, NodeView, NodesV1, NodesV2,
    StatisticsView,
};
pub use stats::{CounterMap, GlobalStats};
