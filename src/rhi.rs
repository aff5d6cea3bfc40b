//! The seam between the graph and the concrete graphics backend. The graph
//! allocates through [`ResourceFactory`], emits state transitions through
//! [`CommandEncoder`], and otherwise never touches the device.

use std::any::Any;
use std::sync::Arc;

use crate::resource::{BufferDesc, Format, ResourceKind, ResourceStates, Subresource, TextureDesc, ViewDesc};

/// An opaque physical resource owned by the backend.
pub trait GpuResource: Send + Sync {
    fn kind(&self) -> ResourceKind;
}

/// Opaque handle to a backend descriptor/view object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewHandle(pub u64);

/// Creates physical resources and views on behalf of the graph. Allocation
/// failure is a backend-level fatality; these calls do not return errors.
pub trait ResourceFactory {
    fn create_buffer(&self, desc: &BufferDesc) -> Arc<dyn GpuResource>;

    fn create_texture(&self, desc: &TextureDesc) -> Arc<dyn GpuResource>;

    fn create_view(
        &self,
        resource: &Arc<dyn GpuResource>,
        desc: &ViewDesc,
        subresource: Subresource,
    ) -> ViewHandle;
}

/// The command sink a frame is recorded into. The graph itself only emits
/// state transitions; passes downcast through [`CommandEncoder::as_any_mut`]
/// to reach the concrete encoder for draw/dispatch/copy recording.
pub trait CommandEncoder {
    fn transition(
        &mut self,
        resource: &Arc<dyn GpuResource>,
        subresource: Subresource,
        before: ResourceStates,
        after: ResourceStates,
    );

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Per-frame presentation surface parameters, threaded explicitly through
/// build and execute instead of being looked up from process-wide state.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub surface_width: u32,
    pub surface_height: u32,
    pub surface_format: Format,
}
