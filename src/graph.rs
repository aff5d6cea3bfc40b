use crate::builder::GraphBuilder;
use crate::level::DependencyLevel;
use crate::resource::ResourceId;
use crate::rhi::{CommandEncoder, FrameContext, ResourceFactory};
use crate::storage::GraphStorage;

/// Top-level owner of the graph's storage and compiled dependency levels.
///
/// Per frame: [`reset`](Self::reset) for a builder, declare the frame's
/// passes, [`GraphBuilder::build`], then [`execute`](Self::execute) against
/// the backend's factory and encoder.
pub struct RenderGraph {
    pub(crate) storage: GraphStorage,
    levels: Vec<DependencyLevel>,
    execution_order: Vec<usize>,
    dependency_edges: Vec<(usize, usize, ResourceId)>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            storage: GraphStorage::new(),
            levels: Vec::new(),
            execution_order: Vec::new(),
            dependency_edges: Vec::new(),
        }
    }

    /// Discard the previous frame's schedule and logical resources and start
    /// collecting the next frame's pass list. Pooled physical memory is kept
    /// for reuse.
    pub fn reset(&mut self) -> GraphBuilder<'_> {
        self.storage.reset();
        self.clear_schedule();
        GraphBuilder::new(self)
    }

    /// [`reset`](Self::reset), additionally releasing every pooled physical
    /// allocation. For teardown-grade resets such as surface loss.
    pub fn reset_full(&mut self) -> GraphBuilder<'_> {
        self.storage.reset();
        self.storage.flush_resources();
        self.clear_schedule();
        GraphBuilder::new(self)
    }

    fn clear_schedule(&mut self) {
        self.levels.clear();
        self.execution_order.clear();
        self.dependency_edges.clear();
    }

    pub fn storage(&self) -> &GraphStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut GraphStorage {
        &mut self.storage
    }

    /// The compiled dependency levels, in execution order.
    pub fn levels(&self) -> &[DependencyLevel] {
        &self.levels
    }

    /// Pass indices (in declaration order) as topologically sorted.
    pub fn execution_order(&self) -> &[usize] {
        &self.execution_order
    }

    /// Dependency edges `(writer, reader, resource)` between pass indices.
    pub fn dependency_edges(&self) -> &[(usize, usize, ResourceId)] {
        &self.dependency_edges
    }

    pub(crate) fn install(
        &mut self,
        levels: Vec<DependencyLevel>,
        execution_order: Vec<usize>,
        dependency_edges: Vec<(usize, usize, ResourceId)>,
    ) {
        self.levels = levels;
        self.execution_order = execution_order;
        self.dependency_edges = dependency_edges;
    }

    /// Run the compiled schedule: create views for imported resources, then
    /// execute every level in order. Each level allocates its resources,
    /// replays its barriers, dispatches its passes, and releases resources
    /// whose lifetime ended.
    pub fn execute(
        &mut self,
        factory: &dyn ResourceFactory,
        frame: &FrameContext,
        encoder: &mut dyn CommandEncoder,
    ) {
        let imported: Vec<ResourceId> = self.storage.imported_ids().to_vec();
        for id in &imported {
            self.storage.create_views(id, factory);
        }
        for level in &mut self.levels {
            level.execute(&mut self.storage, factory, frame, encoder);
        }
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}
