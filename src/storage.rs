use std::collections::HashMap;
use std::sync::Arc;

use crate::resource::{
    BufferDesc, ClearValue, ResourceDesc, ResourceFlags, ResourceHandle, ResourceId,
    ResourceStates, ResourceViewId, TextureDesc, ViewDesc,
};
use crate::rhi::{FrameContext, GpuResource, ResourceFactory};

/// Addresses a slot in the transient pool. Stale handles (the slot has been
/// flushed or adopted by another resource since) fail the generation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolHandle {
    index: usize,
    generation: u32,
}

struct PoolSlot {
    resource: Option<Arc<dyn GpuResource>>,
    desc: ResourceDesc,
    states: Vec<ResourceStates>,
    generation: u32,
}

/// Arena of pooled physical resources. `free` lists slots whose backing is
/// inactive and adoptable; `vacant` lists slots with no backing at all,
/// recycled for future allocations.
#[derive(Default)]
struct TransientPool {
    slots: Vec<PoolSlot>,
    free: Vec<usize>,
    vacant: Vec<usize>,
}

impl TransientPool {
    fn insert(&mut self, resource: Arc<dyn GpuResource>, desc: ResourceDesc) -> PoolHandle {
        let states = vec![ResourceStates::COMMON; desc.subresource_count() as usize];
        if let Some(index) = self.vacant.pop() {
            let slot = &mut self.slots[index];
            slot.resource = Some(resource);
            slot.desc = desc;
            slot.states = states;
            slot.generation += 1;
            PoolHandle {
                index,
                generation: slot.generation,
            }
        } else {
            self.slots.push(PoolSlot {
                resource: Some(resource),
                desc,
                states,
                generation: 0,
            });
            PoolHandle {
                index: self.slots.len() - 1,
                generation: 0,
            }
        }
    }

    fn release(&mut self, handle: PoolHandle, states: Vec<ResourceStates>) {
        let slot = &mut self.slots[handle.index];
        assert_eq!(
            slot.generation, handle.generation,
            "stale pool handle released"
        );
        slot.states = states;
        self.free.push(handle.index);
    }

    /// Adopt an inactive slot whose description matches. Bumps the slot
    /// generation so any handle minted before the adoption reads as stale.
    fn adopt(
        &mut self,
        desc: &ResourceDesc,
    ) -> Option<(PoolHandle, Arc<dyn GpuResource>, Option<ClearValue>, Vec<ResourceStates>)> {
        let position = self
            .free
            .iter()
            .position(|&index| self.slots[index].desc.aliases_with(desc))?;
        let index = self.free.swap_remove(position);
        let slot = &mut self.slots[index];
        slot.generation += 1;
        let resource = slot.resource.clone().expect("free slot lost its backing");
        let clear_value = match &slot.desc {
            ResourceDesc::Texture(desc) => desc.clear_value,
            ResourceDesc::Buffer(_) => None,
        };
        let states = slot.states.clone();
        Some((
            PoolHandle {
                index,
                generation: slot.generation,
            },
            resource,
            clear_value,
            states,
        ))
    }

    #[cfg(test)]
    fn resolve(&self, handle: PoolHandle) -> Option<&Arc<dyn GpuResource>> {
        let slot = self.slots.get(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.resource.as_ref()
    }

    fn flush(&mut self) -> usize {
        let flushed = self.free.len();
        for index in self.free.drain(..) {
            let slot = &mut self.slots[index];
            slot.resource = None;
            slot.states.clear();
            slot.generation += 1;
            self.vacant.push(index);
        }
        flushed
    }

    fn inactive_len(&self) -> usize {
        self.free.len()
    }
}

/// Sole owner of the graph's logical resources, their views, and the pool of
/// reusable physical allocations backing transient resources.
pub struct GraphStorage {
    resources: HashMap<ResourceId, ResourceHandle>,
    imported: Vec<ResourceId>,
    pool: TransientPool,
}

impl GraphStorage {
    pub(crate) fn new() -> Self {
        Self {
            resources: HashMap::new(),
            imported: Vec::new(),
            pool: TransientPool::default(),
        }
    }

    /// Drop all logical resources for the next frame's declarations. Pooled
    /// physical memory survives so the next build can reuse it.
    pub(crate) fn reset(&mut self) {
        for handle in self.resources.values_mut() {
            if handle.is_imported() {
                continue;
            }
            if let Some((_, Some(slot), states)) = handle.take_physical() {
                self.pool.release(slot, states);
            }
        }
        self.resources.clear();
        self.imported.clear();
    }

    pub fn contains_resource(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn contains_view(&self, view_id: &ResourceViewId) -> bool {
        self.resources
            .get(view_id.resource())
            .is_some_and(|handle| handle.contains_view(view_id))
    }

    pub fn resource(&self, id: &ResourceId) -> &ResourceHandle {
        match self.resources.get(id) {
            Some(handle) => handle,
            None => panic!("resource '{id}' does not exist"),
        }
    }

    pub fn resource_mut(&mut self, id: &ResourceId) -> &mut ResourceHandle {
        match self.resources.get_mut(id) {
            Some(handle) => handle,
            None => panic!("resource '{id}' does not exist"),
        }
    }

    pub(crate) fn declare_resource(
        &mut self,
        id: ResourceId,
        desc: ResourceDesc,
        flags: ResourceFlags,
    ) {
        if self.resources.contains_key(&id) {
            panic!("resource '{id}' already declared");
        }
        self.resources
            .insert(id.clone(), ResourceHandle::new(id, desc, flags));
    }

    pub(crate) fn declare_buffer(&mut self, id: ResourceId, desc: BufferDesc) {
        self.declare_resource(id, ResourceDesc::Buffer(desc), ResourceFlags::empty());
    }

    pub(crate) fn declare_texture(
        &mut self,
        id: ResourceId,
        desc: TextureDesc,
        flags: ResourceFlags,
    ) {
        self.declare_resource(id, ResourceDesc::Texture(desc), flags);
    }

    pub(crate) fn import_buffer(
        &mut self,
        id: ResourceId,
        resource: Arc<dyn GpuResource>,
        desc: BufferDesc,
    ) {
        self.import_resource(id, resource, ResourceDesc::Buffer(desc));
    }

    pub(crate) fn import_texture(
        &mut self,
        id: ResourceId,
        resource: Arc<dyn GpuResource>,
        desc: TextureDesc,
    ) {
        self.import_resource(id, resource, ResourceDesc::Texture(desc));
    }

    fn import_resource(
        &mut self,
        id: ResourceId,
        resource: Arc<dyn GpuResource>,
        desc: ResourceDesc,
    ) {
        if self.resources.contains_key(&id) {
            panic!("resource '{id}' already declared");
        }
        self.resources
            .insert(id.clone(), ResourceHandle::imported(id.clone(), desc, resource));
        self.imported.push(id);
    }

    pub(crate) fn declare_resource_view(&mut self, view_id: ResourceViewId, desc: ViewDesc) {
        let id = view_id.resource().clone();
        match self.resources.get_mut(&id) {
            Some(handle) => handle.declare_view(view_id, desc),
            None => panic!("cannot declare view '{view_id}': resource does not exist"),
        }
    }

    pub(crate) fn imported_ids(&self) -> &[ResourceId] {
        &self.imported
    }

    /// Give `id` a physical backing: window-size-dependent descriptions are
    /// resized to the current surface first, then an inactive pooled
    /// allocation with a matching description is adopted (its clear value
    /// carried over), and only failing that is a fresh allocation made.
    pub(crate) fn reallocate(
        &mut self,
        id: &ResourceId,
        factory: &dyn ResourceFactory,
        frame: &FrameContext,
    ) {
        let handle = match self.resources.get_mut(id) {
            Some(handle) => handle,
            None => panic!("resource '{id}' does not exist"),
        };
        debug_assert!(!handle.is_imported(), "imported resources are not reallocated");

        if handle.is_window_sized()
            && let ResourceDesc::Texture(desc) = handle.desc_mut()
        {
            desc.width = frame.surface_width;
            desc.height = frame.surface_height;
        }
        if handle.physical().is_some() {
            return;
        }

        if let Some((slot, resource, clear_value, states)) = self.pool.adopt(handle.desc()) {
            log::trace!("resource '{id}' adopts a pooled allocation");
            if let ResourceDesc::Texture(desc) = handle.desc_mut() {
                desc.clear_value = clear_value;
            }
            handle.bind_physical(resource, Some(slot), Some(states));
        } else {
            log::trace!("allocating backing for resource '{id}'");
            let resource = match handle.desc() {
                ResourceDesc::Buffer(desc) => factory.create_buffer(desc),
                ResourceDesc::Texture(desc) => factory.create_texture(desc),
            };
            let slot = self.pool.insert(resource.clone(), handle.desc().clone());
            handle.bind_physical(resource, Some(slot), None);
        }
    }

    /// Return `id`'s backing to the inactive pool for deferred reuse.
    /// Imported resources are never pooled and are left untouched.
    pub(crate) fn free_resource(&mut self, id: &ResourceId) {
        let handle = match self.resources.get_mut(id) {
            Some(handle) => handle,
            None => panic!("resource '{id}' does not exist"),
        };
        if handle.is_imported() {
            return;
        }
        if let Some((resource, slot, states)) = handle.take_physical() {
            match slot {
                Some(slot) => self.pool.release(slot, states),
                // Not pool-managed; dropping the reference releases it.
                None => drop(resource),
            }
        }
    }

    /// Drop every inactive pooled allocation, releasing unreused backing
    /// memory. Invoked on a full graph reset.
    pub(crate) fn flush_resources(&mut self) {
        let flushed = self.pool.flush();
        if flushed > 0 {
            log::debug!("flushed {flushed} pooled resources");
        }
    }

    /// Lazily create the backend view object for every view declared on
    /// `id`, dispatching on the descriptor variant.
    pub(crate) fn create_views(&mut self, id: &ResourceId, factory: &dyn ResourceFactory) {
        let handle = match self.resources.get_mut(id) {
            Some(handle) => handle,
            None => panic!("resource '{id}' does not exist"),
        };
        let resource = handle.expect_physical().clone();
        for (view_id, entry) in handle.views_mut() {
            if entry.view.is_none() {
                entry.view =
                    Some(factory.create_view(&resource, &entry.desc, view_id.subresource()));
            }
        }
    }

    /// The backend view for a declared view id. Panics on dangling ids.
    pub fn view_handle(&self, view_id: &ResourceViewId) -> crate::rhi::ViewHandle {
        self.resource(view_id.resource()).view_handle(view_id)
    }

    /// Number of inactive pooled allocations awaiting reuse.
    pub fn pooled_resources(&self) -> usize {
        self.pool.inactive_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Format, ResourceKind};

    struct FakeResource(ResourceKind);

    impl GpuResource for FakeResource {
        fn kind(&self) -> ResourceKind {
            self.0
        }
    }

    fn texture_desc() -> ResourceDesc {
        ResourceDesc::Texture(TextureDesc::new_2d(Format::Rgba8Unorm, 64, 64))
    }

    fn fake_texture() -> Arc<dyn GpuResource> {
        Arc::new(FakeResource(ResourceKind::Texture))
    }

    #[test]
    fn released_slots_are_adoptable_by_matching_descriptions() {
        let mut pool = TransientPool::default();
        let first = fake_texture();
        let handle = pool.insert(first.clone(), texture_desc());
        pool.release(handle, vec![ResourceStates::RENDER_TARGET]);

        let (_, adopted, _, states) = pool.adopt(&texture_desc()).expect("description matches");
        assert!(Arc::ptr_eq(&first, &adopted));
        assert_eq!(states, vec![ResourceStates::RENDER_TARGET]);
        assert!(pool.adopt(&texture_desc()).is_none());
    }

    #[test]
    fn adoption_invalidates_stale_pool_handles() {
        let mut pool = TransientPool::default();
        let stale = pool.insert(fake_texture(), texture_desc());
        pool.release(stale, vec![ResourceStates::COMMON]);
        let (fresh, ..) = pool.adopt(&texture_desc()).unwrap();

        assert!(pool.resolve(stale).is_none());
        assert!(pool.resolve(fresh).is_some());
    }

    #[test]
    fn flush_drops_inactive_backing_and_recycles_slots() {
        let mut pool = TransientPool::default();
        let handle = pool.insert(fake_texture(), texture_desc());
        pool.release(handle, vec![ResourceStates::COMMON]);
        assert_eq!(pool.flush(), 1);
        assert!(pool.adopt(&texture_desc()).is_none());

        // The vacated slot is reused for the next allocation.
        let reused = pool.insert(fake_texture(), texture_desc());
        assert_eq!(reused.index, handle.index);
        assert_ne!(reused.generation, handle.generation);
    }

    #[test]
    #[should_panic(expected = "already declared")]
    fn duplicate_declaration_panics() {
        let mut storage = GraphStorage::new();
        let id = ResourceId::new("color");
        storage.declare_texture(
            id.clone(),
            TextureDesc::new_2d(Format::Rgba8Unorm, 64, 64),
            ResourceFlags::empty(),
        );
        storage.declare_texture(
            id,
            TextureDesc::new_2d(Format::Rgba8Unorm, 64, 64),
            ResourceFlags::empty(),
        );
    }

    #[test]
    #[should_panic(expected = "does not exist")]
    fn view_on_missing_resource_panics() {
        let mut storage = GraphStorage::new();
        let id = ResourceId::new("ghost");
        storage.declare_resource_view(id.view("srv"), ViewDesc::ShaderResource { format: None });
    }

    #[test]
    fn freeing_an_imported_resource_never_pools_it() {
        let mut storage = GraphStorage::new();
        let id = ResourceId::new("backbuffer");
        storage.import_texture(
            id.clone(),
            fake_texture(),
            TextureDesc::new_2d(Format::Bgra8Unorm, 64, 64),
        );
        storage.free_resource(&id);
        assert_eq!(storage.pooled_resources(), 0);
        assert!(storage.resource(&id).physical().is_some());
    }
}
