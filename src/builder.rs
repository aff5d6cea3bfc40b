use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::level::DependencyLevel;
use crate::pass::RenderPass;
use crate::resolver::{PassRecord, ResourceResolver};
use crate::resource::ResourceId;
use crate::rhi::FrameContext;
use crate::{GraphError, RenderGraph, Result};

/// Collects the frame's pass list and compiles it into an executable
/// schedule: per-pass resource sets, the dependency graph, a topological
/// order, per-resource lifetimes, and the dependency-level grouping.
pub struct GraphBuilder<'a> {
    graph: &'a mut RenderGraph,
    passes: Vec<Box<dyn RenderPass>>,
}

impl<'a> GraphBuilder<'a> {
    pub(crate) fn new(graph: &'a mut RenderGraph) -> Self {
        Self {
            graph,
            passes: Vec::new(),
        }
    }

    /// Append a pass. Passes resolve and, within a level, dispatch in the
    /// order they were added.
    pub fn add_pass(&mut self, pass: Box<dyn RenderPass>) -> &mut dyn RenderPass {
        self.passes.push(pass);
        self.passes.last_mut().unwrap().as_mut()
    }

    /// Compile the declared passes. Malformed declarations panic during the
    /// resolve step, before any scheduling state exists; a dependency cycle
    /// is rejected with [`GraphError::CyclicDependency`] and leaves the
    /// graph without a schedule. There is no partial build.
    pub fn build(self, frame: &FrameContext) -> Result<()> {
        let Self { graph, mut passes } = self;

        let mut records = Vec::with_capacity(passes.len());
        for pass in &mut passes {
            let mut resolver = ResourceResolver::new(&mut graph.storage, frame);
            pass.resolve(&mut resolver);
            records.push(resolver.finish());
        }

        let dag = build_adjacency(&records);
        let order = petgraph::algo::toposort(&dag, None).map_err(|cycle| {
            GraphError::CyclicDependency {
                pass: passes[cycle.node_id().index()].name().to_string(),
            }
        })?;

        let destroy = resource_lifetimes(graph, &records, &order);
        let levels = build_dependency_levels(&dag, &order, passes, records, destroy);

        log::debug!(
            "compiled {} passes into {} dependency levels ({} dependency edges)",
            dag.node_count(),
            levels.len(),
            dag.edge_count()
        );

        let edges = dag
            .edge_references()
            .map(|edge| {
                (
                    edge.source().index(),
                    edge.target().index(),
                    edge.weight().clone(),
                )
            })
            .collect();
        graph.install(
            levels,
            order.iter().map(|node| node.index()).collect(),
            edges,
        );
        Ok(())
    }
}

/// One node per pass; an edge i -> j, weighted by the causing resource,
/// whenever pass j reads something pass i writes. Considering every ordered
/// pair (not just declaration-order-forward ones) is what lets a genuinely
/// cyclic read/write pattern surface as a cycle instead of silently losing
/// the backward dependency.
fn build_adjacency(records: &[PassRecord]) -> DiGraph<usize, ResourceId> {
    let mut dag = DiGraph::with_capacity(records.len(), records.len());
    let nodes: Vec<NodeIndex> = (0..records.len()).map(|i| dag.add_node(i)).collect();

    for (i, writer) in records.iter().enumerate() {
        for (j, reader) in records.iter().enumerate() {
            if i == j {
                continue;
            }
            if let Some(resource) = reader.read.iter().find(|id| writer.written.contains(*id)) {
                dag.add_edge(nodes[i], nodes[j], resource.clone());
            }
        }
    }
    dag
}

/// For every resource, the last pass in topological order that references
/// it; the resource is released after that pass's level. Imported resources
/// are excluded (never pooled), and a resource nothing references after its
/// creation degenerates to being released at its creating pass.
fn resource_lifetimes(
    graph: &RenderGraph,
    records: &[PassRecord],
    order: &[NodeIndex],
) -> Vec<Vec<ResourceId>> {
    let mut last_user: HashMap<ResourceId, usize> = HashMap::new();
    for &node in order {
        let pass_index = node.index();
        let record = &records[pass_index];
        for id in record
            .created
            .iter()
            .chain(record.read.iter())
            .chain(record.written.iter())
        {
            if graph.storage.resource(id).is_imported() {
                continue;
            }
            last_user.insert(id.clone(), pass_index);
        }
    }

    let mut destroy = vec![Vec::new(); records.len()];
    for (id, pass_index) in last_user {
        destroy[pass_index].push(id);
    }
    destroy
}

/// Group passes by their longest-path depth in the dependency graph. Passes
/// sharing a depth have no edges between them and land in one level.
fn build_dependency_levels(
    dag: &DiGraph<usize, ResourceId>,
    order: &[NodeIndex],
    passes: Vec<Box<dyn RenderPass>>,
    records: Vec<PassRecord>,
    mut destroy: Vec<Vec<ResourceId>>,
) -> Vec<DependencyLevel> {
    let mut depth = vec![0usize; passes.len()];
    for &node in order {
        for edge in dag.edges(node) {
            let target = edge.target().index();
            depth[target] = depth[target].max(depth[node.index()] + 1);
        }
    }

    let level_count = depth.iter().map(|d| d + 1).max().unwrap_or(0);
    let mut levels: Vec<DependencyLevel> = (0..level_count).map(DependencyLevel::new).collect();

    for (index, (pass, record)) in passes.into_iter().zip(records).enumerate() {
        levels[depth[index]].add_pass(
            pass,
            record.render_targets,
            record.depth_stencil,
            record.created,
            std::mem::take(&mut destroy[index]),
            record.states,
        );
    }
    levels
}
