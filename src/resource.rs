use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bitflags::bitflags;

use crate::rhi::{GpuResource, ViewHandle};
use crate::storage::PoolHandle;

fn hash_name(name: &str) -> u64 {
    // DefaultHasher::new() is keyed with constants, so the same name always
    // hashes to the same id.
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

/// Identifies a logical resource slot in the graph by the hash of its name.
///
/// The human-readable name is retained in debug builds for diagnostics;
/// equality, ordering, and hashing only ever consider the hash.
#[derive(Clone)]
pub struct ResourceId {
    id: u64,
    #[cfg(debug_assertions)]
    name: Arc<str>,
}

impl ResourceId {
    pub fn new(name: &str) -> Self {
        Self {
            id: hash_name(name),
            #[cfg(debug_assertions)]
            name: Arc::from(name),
        }
    }

    pub fn get(&self) -> u64 {
        self.id
    }

    /// Derive a view id covering the whole resource.
    pub fn view(&self, view_name: &str) -> ResourceViewId {
        ResourceViewId {
            resource: self.clone(),
            view: hash_name(view_name),
            subresource: Subresource::All,
        }
    }

    /// Derive a view id targeting a single subresource.
    pub fn view_at(&self, view_name: &str, subresource: u32) -> ResourceViewId {
        ResourceViewId {
            resource: self.clone(),
            view: hash_name(view_name),
            subresource: Subresource::Index(subresource),
        }
    }
}

impl PartialEq for ResourceId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceId {}

impl PartialOrd for ResourceId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for ResourceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[cfg(debug_assertions)]
        return write!(f, "{}", self.name);
        #[cfg(not(debug_assertions))]
        return write!(f, "{:#018x}", self.id);
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({self})")
    }
}

/// One subresource of a texture, or the whole resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Subresource {
    All,
    Index(u32),
}

/// Identifies one view of a resource: resource id + view-name hash +
/// the subresource the view covers.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceViewId {
    resource: ResourceId,
    view: u64,
    subresource: Subresource,
}

impl ResourceViewId {
    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn get(&self) -> u64 {
        self.view
    }

    pub fn subresource(&self) -> Subresource {
        self.subresource
    }
}

impl fmt::Display for ResourceViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subresource {
            Subresource::All => write!(f, "{}/{:#x}", self.resource, self.view),
            Subresource::Index(index) => {
                write!(f, "{}/{:#x}[{}]", self.resource, self.view, index)
            }
        }
    }
}

impl fmt::Debug for ResourceViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceViewId({self})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Unknown,
    R8Unorm,
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Rg16Float,
    Rgba32Float,
    R32Uint,
    R32Float,
    Depth32Float,
    Depth24UnormStencil8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
}

bitflags! {
    /// GPU usage states a resource can occupy. Combinable; the empty set is
    /// the common (undecorated) state freshly allocated resources start in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceStates: u32 {
        const CONSTANT_BUFFER = 1 << 0;
        const PIXEL_SHADER_RESOURCE = 1 << 1;
        const NON_PIXEL_SHADER_RESOURCE = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        const RENDER_TARGET = 1 << 4;
        const DEPTH_WRITE = 1 << 5;
        const DEPTH_READ = 1 << 6;
        const COPY_DEST = 1 << 7;
        const COPY_SOURCE = 1 << 8;
    }
}

impl ResourceStates {
    pub const COMMON: Self = Self::empty();
    pub const ALL_SHADER_RESOURCE: Self = Self::PIXEL_SHADER_RESOURCE
        .union(Self::NON_PIXEL_SHADER_RESOURCE);
}

bitflags! {
    /// Capabilities a physical allocation must support, accumulated from
    /// every view the graph declared on the resource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BindingFlags: u32 {
        const RENDER_TARGET = 1 << 0;
        const DEPTH_STENCIL = 1 << 1;
        const UNORDERED_ACCESS = 1 << 2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u32 {
        /// Externally owned; never pooled or aliased.
        const IMPORTED = 1 << 0;
        /// Texture tracks the presentation surface dimensions.
        const WINDOW_SIZE_DEPENDENT = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub format: Format,
    pub binding: BindingFlags,
    pub clear_value: Option<ClearValue>,
}

impl TextureDesc {
    pub fn new_2d(format: Format, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth_or_array_layers: 1,
            mip_level_count: 1,
            sample_count: 1,
            format,
            binding: BindingFlags::empty(),
            clear_value: None,
        }
    }

    pub fn mip_levels(mut self, levels: u32) -> Self {
        self.mip_level_count = levels;
        self
    }

    pub fn array_layers(mut self, layers: u32) -> Self {
        self.depth_or_array_layers = layers;
        self
    }

    pub fn clear_value(mut self, clear_value: ClearValue) -> Self {
        self.clear_value = Some(clear_value);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub size: u64,
    pub binding: BindingFlags,
}

impl BufferDesc {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            binding: BindingFlags::empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceDesc {
    Buffer(BufferDesc),
    Texture(TextureDesc),
}

impl ResourceDesc {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceDesc::Buffer(_) => ResourceKind::Buffer,
            ResourceDesc::Texture(_) => ResourceKind::Texture,
        }
    }

    pub fn subresource_count(&self) -> u32 {
        match self {
            ResourceDesc::Buffer(_) => 1,
            ResourceDesc::Texture(desc) => desc.mip_level_count * desc.depth_or_array_layers,
        }
    }

    pub(crate) fn merge_binding(&mut self, flags: BindingFlags) {
        match self {
            ResourceDesc::Buffer(desc) => desc.binding |= flags,
            ResourceDesc::Texture(desc) => desc.binding |= flags,
        }
    }

    /// Whether a pooled allocation of `self` can back a resource declared
    /// with `other`. Clear values are carried over on adoption and do not
    /// participate in the match.
    pub(crate) fn aliases_with(&self, other: &ResourceDesc) -> bool {
        match (self, other) {
            (ResourceDesc::Buffer(a), ResourceDesc::Buffer(b)) => a == b,
            (ResourceDesc::Texture(a), ResourceDesc::Texture(b)) => {
                a.width == b.width
                    && a.height == b.height
                    && a.depth_or_array_layers == b.depth_or_array_layers
                    && a.mip_level_count == b.mip_level_count
                    && a.sample_count == b.sample_count
                    && a.format == b.format
                    && a.binding == b.binding
            }
            _ => false,
        }
    }
}

/// Descriptor for one view of a resource. Which variants are legal depends
/// on the declaring operation: passes may write through constant-buffer,
/// unordered-access, render-target, and depth-stencil views, and read
/// through constant-buffer, shader-resource, unordered-access, and
/// depth-stencil views.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewDesc {
    ConstantBuffer,
    ShaderResource { format: Option<Format> },
    UnorderedAccess { format: Option<Format> },
    RenderTarget { format: Option<Format> },
    DepthStencil { format: Option<Format> },
}

impl ViewDesc {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ViewDesc::ConstantBuffer => "constant-buffer",
            ViewDesc::ShaderResource { .. } => "shader-resource",
            ViewDesc::UnorderedAccess { .. } => "unordered-access",
            ViewDesc::RenderTarget { .. } => "render-target",
            ViewDesc::DepthStencil { .. } => "depth-stencil",
        }
    }
}

pub(crate) struct ViewEntry {
    pub desc: ViewDesc,
    pub view: Option<ViewHandle>,
}

/// A logical resource slot owned by [`GraphStorage`](crate::GraphStorage):
/// the declared description, the views declared on it, and the physical
/// resource currently backing it, if any. Transient handles have no backing
/// between declaration and the execution of the level that creates them.
pub struct ResourceHandle {
    id: ResourceId,
    desc: ResourceDesc,
    flags: ResourceFlags,
    physical: Option<Arc<dyn GpuResource>>,
    pool_slot: Option<PoolHandle>,
    views: BTreeMap<ResourceViewId, ViewEntry>,
    tracked: Vec<ResourceStates>,
}

impl ResourceHandle {
    pub(crate) fn new(id: ResourceId, desc: ResourceDesc, flags: ResourceFlags) -> Self {
        Self {
            id,
            desc,
            flags,
            physical: None,
            pool_slot: None,
            views: BTreeMap::new(),
            tracked: Vec::new(),
        }
    }

    pub(crate) fn imported(
        id: ResourceId,
        desc: ResourceDesc,
        resource: Arc<dyn GpuResource>,
    ) -> Self {
        let mut handle = Self::new(id, desc, ResourceFlags::IMPORTED);
        handle.bind_physical(resource, None, None);
        handle
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub(crate) fn desc_mut(&mut self) -> &mut ResourceDesc {
        &mut self.desc
    }

    pub fn flags(&self) -> ResourceFlags {
        self.flags
    }

    pub fn is_imported(&self) -> bool {
        self.flags.contains(ResourceFlags::IMPORTED)
    }

    pub fn is_window_sized(&self) -> bool {
        self.flags.contains(ResourceFlags::WINDOW_SIZE_DEPENDENT)
    }

    pub fn physical(&self) -> Option<&Arc<dyn GpuResource>> {
        self.physical.as_ref()
    }

    /// The physical resource backing this handle. Panics if the handle's
    /// owning level has not allocated it yet.
    pub fn expect_physical(&self) -> &Arc<dyn GpuResource> {
        match &self.physical {
            Some(resource) => resource,
            None => panic!("resource '{}' has no physical allocation", self.id),
        }
    }

    pub(crate) fn bind_physical(
        &mut self,
        resource: Arc<dyn GpuResource>,
        slot: Option<PoolHandle>,
        tracked: Option<Vec<ResourceStates>>,
    ) {
        let count = self.desc.subresource_count() as usize;
        self.tracked = match tracked {
            Some(states) => {
                assert_eq!(states.len(), count);
                states
            }
            None => vec![ResourceStates::COMMON; count],
        };
        self.physical = Some(resource);
        self.pool_slot = slot;
        for entry in self.views.values_mut() {
            entry.view = None;
        }
    }

    pub(crate) fn take_physical(
        &mut self,
    ) -> Option<(Arc<dyn GpuResource>, Option<PoolHandle>, Vec<ResourceStates>)> {
        let resource = self.physical.take()?;
        let slot = self.pool_slot.take();
        let states = std::mem::take(&mut self.tracked);
        for entry in self.views.values_mut() {
            entry.view = None;
        }
        Some((resource, slot, states))
    }

    /// Redeclaring a view with the descriptor it already carries is a no-op;
    /// redeclaring it with a different descriptor is a programmer error.
    pub(crate) fn declare_view(&mut self, view_id: ResourceViewId, desc: ViewDesc) {
        match self.views.entry(view_id) {
            Entry::Vacant(entry) => {
                entry.insert(ViewEntry { desc, view: None });
            }
            Entry::Occupied(entry) => {
                if entry.get().desc != desc {
                    panic!(
                        "view '{}' redeclared as {} but was already declared as {}",
                        entry.key(),
                        desc.kind_name(),
                        entry.get().desc.kind_name()
                    );
                }
            }
        }
    }

    pub fn contains_view(&self, view_id: &ResourceViewId) -> bool {
        self.views.contains_key(view_id)
    }

    pub fn view_desc(&self, view_id: &ResourceViewId) -> Option<&ViewDesc> {
        self.views.get(view_id).map(|entry| &entry.desc)
    }

    /// The backend view created for a declared view. Panics on a dangling
    /// view id or a view whose level has not run yet.
    pub fn view_handle(&self, view_id: &ResourceViewId) -> ViewHandle {
        match self.views.get(view_id) {
            Some(ViewEntry {
                view: Some(handle), ..
            }) => *handle,
            Some(ViewEntry { view: None, .. }) => {
                panic!("view '{view_id}' has not been created yet")
            }
            None => panic!("view '{view_id}' was never declared"),
        }
    }

    pub(crate) fn views_mut(&mut self) -> impl Iterator<Item = (&ResourceViewId, &mut ViewEntry)> {
        self.views.iter_mut()
    }

    pub(crate) fn tracked_state(&self, subresource: usize) -> ResourceStates {
        self.tracked[subresource]
    }

    pub(crate) fn set_tracked_state(&mut self, subresource: usize, state: ResourceStates) {
        self.tracked[subresource] = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_hash_is_stable_per_name() {
        assert_eq!(ResourceId::new("g-buffer"), ResourceId::new("g-buffer"));
        assert_ne!(ResourceId::new("g-buffer"), ResourceId::new("depth"));
    }

    #[test]
    fn view_ids_distinguish_view_name_and_subresource() {
        let id = ResourceId::new("color");
        assert_eq!(id.view("rtv"), id.view("rtv"));
        assert_ne!(id.view("rtv"), id.view("srv"));
        assert_ne!(id.view("rtv"), id.view_at("rtv", 0));
        assert_eq!(id.view_at("rtv", 1).subresource(), Subresource::Index(1));
    }

    #[test]
    fn subresource_count_spans_mips_and_layers() {
        let desc = ResourceDesc::Texture(
            TextureDesc::new_2d(Format::Rgba8Unorm, 256, 256)
                .mip_levels(4)
                .array_layers(2),
        );
        assert_eq!(desc.subresource_count(), 8);
        assert_eq!(ResourceDesc::Buffer(BufferDesc::new(64)).subresource_count(), 1);
    }

    #[test]
    fn aliasing_ignores_clear_values() {
        let a = ResourceDesc::Texture(
            TextureDesc::new_2d(Format::Rgba8Unorm, 128, 128)
                .clear_value(ClearValue::Color([0.0; 4])),
        );
        let b = ResourceDesc::Texture(TextureDesc::new_2d(Format::Rgba8Unorm, 128, 128));
        let c = ResourceDesc::Texture(TextureDesc::new_2d(Format::Rgba16Float, 128, 128));
        assert!(a.aliases_with(&b));
        assert!(!a.aliases_with(&c));
        assert!(!a.aliases_with(&ResourceDesc::Buffer(BufferDesc::new(128))));
    }

    #[test]
    #[should_panic(expected = "redeclared")]
    fn conflicting_view_redeclaration_panics() {
        let id = ResourceId::new("target");
        let mut handle = ResourceHandle::new(
            id.clone(),
            ResourceDesc::Texture(TextureDesc::new_2d(Format::Rgba8Unorm, 64, 64)),
            ResourceFlags::empty(),
        );
        handle.declare_view(id.view("v"), ViewDesc::RenderTarget { format: None });
        handle.declare_view(id.view("v"), ViewDesc::ShaderResource { format: None });
    }
}
