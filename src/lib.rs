mod builder;
mod graph;
mod level;
mod pass;
mod resolver;
mod resource;
mod rhi;
mod storage;

pub use builder::GraphBuilder;
pub use graph::RenderGraph;
pub use level::DependencyLevel;
pub use pass::{PassContext, RenderPass};
pub use resolver::{ReadAccess, ResourceResolver};
pub use resource::{
    BindingFlags, BufferDesc, ClearValue, Format, ResourceDesc, ResourceFlags, ResourceHandle,
    ResourceId, ResourceKind, ResourceStates, ResourceViewId, Subresource, TextureDesc, ViewDesc,
};
pub use rhi::{CommandEncoder, FrameContext, GpuResource, ResourceFactory, ViewHandle};
pub use storage::GraphStorage;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("frame graph contains a dependency cycle through pass '{pass}'")]
    CyclicDependency { pass: String },
}

pub type Result<T> = std::result::Result<T, GraphError>;
