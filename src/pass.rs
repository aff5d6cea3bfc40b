use std::sync::Arc;

use crate::resolver::ResourceResolver;
use crate::resource::{ResourceId, ResourceViewId};
use crate::rhi::{CommandEncoder, GpuResource, ViewHandle};
use crate::storage::GraphStorage;

/// A unit of GPU work. `resolve` runs during the build phase and declares
/// every resource the pass creates, reads, and writes; `execute` runs once
/// the pass's dependency level is reached and records commands into the
/// supplied encoder.
pub trait RenderPass {
    fn name(&self) -> &str;

    fn resolve(&mut self, resolver: &mut ResourceResolver<'_>);

    fn execute(&mut self, context: &mut PassContext<'_, '_>);
}

/// What a pass sees while executing: read-only storage lookups, the target
/// views it declared, and the command encoder for the frame.
pub struct PassContext<'r, 'e> {
    storage: &'r GraphStorage,
    pub encoder: &'e mut dyn CommandEncoder,
    render_targets: &'r [ResourceViewId],
    depth_stencil: Option<&'r ResourceViewId>,
}

impl<'r, 'e> PassContext<'r, 'e> {
    pub(crate) fn new(
        storage: &'r GraphStorage,
        encoder: &'e mut dyn CommandEncoder,
        render_targets: &'r [ResourceViewId],
        depth_stencil: Option<&'r ResourceViewId>,
    ) -> Self {
        Self {
            storage,
            encoder,
            render_targets,
            depth_stencil,
        }
    }

    pub fn storage(&self) -> &GraphStorage {
        self.storage
    }

    /// Render-target views the pass declared, in declaration order.
    pub fn render_targets(&self) -> &[ResourceViewId] {
        self.render_targets
    }

    pub fn depth_stencil(&self) -> Option<&ResourceViewId> {
        self.depth_stencil
    }

    /// Backend view for a declared view id. Panics on dangling ids.
    pub fn view(&self, view_id: &ResourceViewId) -> ViewHandle {
        self.storage.view_handle(view_id)
    }

    /// Physical resource backing `id`. Panics if it was never allocated.
    pub fn resource(&self, id: &ResourceId) -> &Arc<dyn GpuResource> {
        self.storage.resource(id).expect_physical()
    }
}
