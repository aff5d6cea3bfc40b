use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::resource::{
    BindingFlags, BufferDesc, ResourceFlags, ResourceId, ResourceStates, ResourceViewId,
    TextureDesc, ViewDesc,
};
use crate::rhi::{FrameContext, GpuResource};
use crate::storage::GraphStorage;

/// Shader stages a read is visible to; folded into the required resource
/// state alongside the view descriptor kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAccess {
    PixelShader,
    NonPixelShader,
    Any,
}

/// Everything one pass declared through its resolver, folded into the
/// builder's aggregate state once the resolve phase ends.
pub(crate) struct PassRecord {
    pub created: BTreeSet<ResourceId>,
    pub read: BTreeSet<ResourceId>,
    pub written: BTreeSet<ResourceId>,
    pub states: BTreeMap<ResourceViewId, ResourceStates>,
    pub render_targets: Vec<ResourceViewId>,
    pub depth_stencil: Option<ResourceViewId>,
}

/// The declaration surface a pass sees during the resolve phase. Pure
/// metadata accumulation: resources and views are registered with storage,
/// required states are derived, and nothing touches the backend.
///
/// Referencing an id that does not exist, creating a duplicate id, or using
/// a descriptor kind the operation does not accept is a programmer error and
/// panics immediately.
pub struct ResourceResolver<'a> {
    storage: &'a mut GraphStorage,
    frame: &'a FrameContext,
    created: BTreeSet<ResourceId>,
    read: BTreeSet<ResourceId>,
    written: BTreeSet<ResourceId>,
    states: BTreeMap<ResourceViewId, ResourceStates>,
    render_targets: Vec<ResourceViewId>,
    depth_stencil: Option<ResourceViewId>,
}

impl<'a> ResourceResolver<'a> {
    pub(crate) fn new(storage: &'a mut GraphStorage, frame: &'a FrameContext) -> Self {
        Self {
            storage,
            frame,
            created: BTreeSet::new(),
            read: BTreeSet::new(),
            written: BTreeSet::new(),
            states: BTreeMap::new(),
            render_targets: Vec::new(),
            depth_stencil: None,
        }
    }

    pub fn surface_format(&self) -> crate::resource::Format {
        self.frame.surface_format
    }

    pub fn surface_size(&self) -> (u32, u32) {
        (self.frame.surface_width, self.frame.surface_height)
    }

    /// Register a new transient buffer created by this pass.
    pub fn create_buffer(&mut self, id: ResourceId, desc: BufferDesc) -> ResourceId {
        self.storage.declare_buffer(id.clone(), desc);
        self.created.insert(id.clone());
        id
    }

    /// Register a new transient texture created by this pass.
    pub fn create_texture(
        &mut self,
        id: ResourceId,
        desc: TextureDesc,
        flags: ResourceFlags,
    ) -> ResourceId {
        self.storage.declare_texture(id.clone(), desc, flags);
        self.created.insert(id.clone());
        id
    }

    /// Like [`create_texture`](Self::create_texture), but the texture tracks
    /// the presentation surface dimensions across resizes.
    pub fn create_window_texture(
        &mut self,
        id: ResourceId,
        desc: TextureDesc,
        flags: ResourceFlags,
    ) -> ResourceId {
        self.create_texture(id, desc, flags | ResourceFlags::WINDOW_SIZE_DEPENDENT)
    }

    /// Declare a write through a view. Render-target views are additionally
    /// remembered as the pass's bound targets, depth-stencil views as its
    /// depth attachment.
    pub fn write(&mut self, view_id: ResourceViewId, desc: ViewDesc) -> ResourceViewId {
        let id = view_id.resource().clone();
        if !self.storage.contains_resource(&id) {
            panic!("cannot write to undeclared resource '{id}'");
        }
        self.written.insert(id);

        let (state, binding) = match desc {
            ViewDesc::ConstantBuffer => (ResourceStates::CONSTANT_BUFFER, BindingFlags::empty()),
            ViewDesc::UnorderedAccess { .. } => (
                ResourceStates::UNORDERED_ACCESS,
                BindingFlags::UNORDERED_ACCESS,
            ),
            ViewDesc::RenderTarget { .. } => {
                self.render_targets.push(view_id.clone());
                (ResourceStates::RENDER_TARGET, BindingFlags::RENDER_TARGET)
            }
            ViewDesc::DepthStencil { .. } => {
                self.depth_stencil = Some(view_id.clone());
                (ResourceStates::DEPTH_WRITE, BindingFlags::DEPTH_STENCIL)
            }
            ViewDesc::ShaderResource { .. } => panic!(
                "{} view '{view_id}' cannot be written by a pass",
                desc.kind_name()
            ),
        };

        self.set_state(&view_id, state, binding);
        self.storage.declare_resource_view(view_id.clone(), desc);
        view_id
    }

    /// Declare a copy-destination write without binding a view.
    pub fn write_copy_dst(&mut self, view_id: ResourceViewId) -> ResourceViewId {
        let id = view_id.resource().clone();
        if !self.storage.contains_resource(&id) {
            panic!("cannot write to undeclared resource '{id}'");
        }
        self.written.insert(id);
        self.set_state(&view_id, ResourceStates::COPY_DEST, BindingFlags::empty());
        view_id
    }

    /// Register an ordering-only write: later readers of `id` depend on this
    /// pass, but no view or state is involved.
    pub fn write_empty(&mut self, id: ResourceId) {
        if !self.storage.contains_resource(&id) {
            panic!("cannot write to undeclared resource '{id}'");
        }
        self.written.insert(id);
    }

    /// Declare a read through a view, visible to the given shader stages.
    pub fn read(
        &mut self,
        view_id: ResourceViewId,
        access: ReadAccess,
        desc: ViewDesc,
    ) -> ResourceViewId {
        let id = view_id.resource().clone();
        if !self.storage.contains_resource(&id) {
            panic!("cannot read undeclared resource '{id}'");
        }
        self.read.insert(id);

        let (mut state, binding) = match desc {
            ViewDesc::ConstantBuffer => (ResourceStates::CONSTANT_BUFFER, BindingFlags::empty()),
            ViewDesc::ShaderResource { .. } => (ResourceStates::COMMON, BindingFlags::empty()),
            ViewDesc::UnorderedAccess { .. } => (
                ResourceStates::UNORDERED_ACCESS,
                BindingFlags::UNORDERED_ACCESS,
            ),
            ViewDesc::DepthStencil { .. } => {
                self.depth_stencil = Some(view_id.clone());
                (ResourceStates::DEPTH_READ, BindingFlags::DEPTH_STENCIL)
            }
            ViewDesc::RenderTarget { .. } => panic!(
                "{} view '{view_id}' cannot be read by a pass",
                desc.kind_name()
            ),
        };
        state |= match access {
            ReadAccess::PixelShader => ResourceStates::PIXEL_SHADER_RESOURCE,
            ReadAccess::NonPixelShader => ResourceStates::NON_PIXEL_SHADER_RESOURCE,
            ReadAccess::Any => ResourceStates::ALL_SHADER_RESOURCE,
        };

        self.set_state(&view_id, state, binding);
        self.storage.declare_resource_view(view_id.clone(), desc);
        view_id
    }

    /// Declare a copy-source read without binding a view.
    pub fn read_copy_src(&mut self, view_id: ResourceViewId) -> ResourceViewId {
        let id = view_id.resource().clone();
        if !self.storage.contains_resource(&id) {
            panic!("cannot read undeclared resource '{id}'");
        }
        self.read.insert(id);
        self.set_state(&view_id, ResourceStates::COPY_SOURCE, BindingFlags::empty());
        view_id
    }

    /// Register an ordering-only read on `id` without binding a view.
    pub fn read_empty(&mut self, id: ResourceId) {
        if !self.storage.contains_resource(&id) {
            panic!("cannot read undeclared resource '{id}'");
        }
        self.read.insert(id);
    }

    /// Register an externally owned buffer. Imported resources are never
    /// pooled or aliased.
    pub fn import_buffer(
        &mut self,
        id: ResourceId,
        resource: Arc<dyn GpuResource>,
        desc: BufferDesc,
    ) -> ResourceId {
        self.storage.import_buffer(id.clone(), resource, desc);
        id
    }

    /// Register an externally owned texture, e.g. the presentation surface.
    pub fn import_texture(
        &mut self,
        id: ResourceId,
        resource: Arc<dyn GpuResource>,
        desc: TextureDesc,
    ) -> ResourceId {
        self.storage.import_texture(id.clone(), resource, desc);
        id
    }

    fn set_state(&mut self, view_id: &ResourceViewId, state: ResourceStates, binding: BindingFlags) {
        self.storage
            .resource_mut(view_id.resource())
            .desc_mut()
            .merge_binding(binding);
        *self
            .states
            .entry(view_id.clone())
            .or_insert(ResourceStates::COMMON) |= state;
    }

    pub(crate) fn finish(self) -> PassRecord {
        PassRecord {
            created: self.created,
            read: self.read,
            written: self.written,
            states: self.states,
            render_targets: self.render_targets,
            depth_stencil: self.depth_stencil,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Format, ResourceDesc};

    fn frame() -> FrameContext {
        FrameContext {
            surface_width: 1280,
            surface_height: 720,
            surface_format: Format::Bgra8Unorm,
        }
    }

    fn texture() -> TextureDesc {
        TextureDesc::new_2d(Format::Rgba8Unorm, 256, 256)
    }

    #[test]
    fn write_render_target_records_state_target_and_binding() {
        let mut storage = GraphStorage::new();
        let frame = frame();
        let mut resolver = ResourceResolver::new(&mut storage, &frame);

        let id = ResourceId::new("color");
        resolver.create_texture(id.clone(), texture(), ResourceFlags::empty());
        let view = resolver.write(id.view("rtv"), ViewDesc::RenderTarget { format: None });

        let record = resolver.finish();
        assert_eq!(record.render_targets, vec![view.clone()]);
        assert_eq!(record.states[&view], ResourceStates::RENDER_TARGET);
        assert!(record.written.contains(&id));
        match storage.resource(&id).desc() {
            ResourceDesc::Texture(desc) => {
                assert!(desc.binding.contains(BindingFlags::RENDER_TARGET))
            }
            ResourceDesc::Buffer(_) => unreachable!(),
        }
    }

    #[test]
    fn read_access_selects_shader_visibility_bits() {
        let mut storage = GraphStorage::new();
        let frame = frame();
        let mut resolver = ResourceResolver::new(&mut storage, &frame);

        let id = ResourceId::new("history");
        resolver.create_texture(id.clone(), texture(), ResourceFlags::empty());
        let pixel = resolver.read(
            id.view("srv-ps"),
            ReadAccess::PixelShader,
            ViewDesc::ShaderResource { format: None },
        );
        let any = resolver.read(
            id.view("srv-any"),
            ReadAccess::Any,
            ViewDesc::ShaderResource { format: None },
        );

        let record = resolver.finish();
        assert_eq!(record.states[&pixel], ResourceStates::PIXEL_SHADER_RESOURCE);
        assert_eq!(record.states[&any], ResourceStates::ALL_SHADER_RESOURCE);
    }

    #[test]
    fn depth_read_marks_depth_attachment() {
        let mut storage = GraphStorage::new();
        let frame = frame();
        let mut resolver = ResourceResolver::new(&mut storage, &frame);

        let id = ResourceId::new("depth");
        resolver.create_texture(id.clone(), texture(), ResourceFlags::empty());
        let view = resolver.read(
            id.view("dsv"),
            ReadAccess::NonPixelShader,
            ViewDesc::DepthStencil { format: None },
        );

        let record = resolver.finish();
        assert_eq!(record.depth_stencil, Some(view.clone()));
        assert_eq!(
            record.states[&view],
            ResourceStates::DEPTH_READ | ResourceStates::NON_PIXEL_SHADER_RESOURCE
        );
    }

    #[test]
    #[should_panic(expected = "cannot read undeclared resource")]
    fn reading_an_undeclared_resource_panics() {
        let mut storage = GraphStorage::new();
        let frame = frame();
        let mut resolver = ResourceResolver::new(&mut storage, &frame);
        resolver.read(
            ResourceId::new("ghost").view("srv"),
            ReadAccess::Any,
            ViewDesc::ShaderResource { format: None },
        );
    }

    #[test]
    #[should_panic(expected = "cannot be written")]
    fn writing_through_a_shader_resource_view_panics() {
        let mut storage = GraphStorage::new();
        let frame = frame();
        let mut resolver = ResourceResolver::new(&mut storage, &frame);
        let id = ResourceId::new("color");
        resolver.create_texture(id.clone(), texture(), ResourceFlags::empty());
        resolver.write(id.view("srv"), ViewDesc::ShaderResource { format: None });
    }
}
