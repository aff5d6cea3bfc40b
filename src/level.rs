use std::collections::{BTreeMap, BTreeSet};

use crate::pass::{PassContext, RenderPass};
use crate::resource::{ResourceId, ResourceStates, ResourceViewId, Subresource};
use crate::rhi::{CommandEncoder, FrameContext, ResourceFactory};
use crate::storage::GraphStorage;

struct PassEntry {
    pass: Box<dyn RenderPass>,
    render_targets: Vec<ResourceViewId>,
    depth_stencil: Option<ResourceViewId>,
}

/// An ordered group of passes sharing one dependency depth. Passes within a
/// level have no edges between them; levels execute strictly in order.
///
/// Per frame a level moves through: allocate the resources it creates, emit
/// the state transitions its passes require, dispatch the passes in
/// declaration order, and finally return the resources whose lifetime ends
/// here to the inactive pool.
pub struct DependencyLevel {
    index: usize,
    passes: Vec<PassEntry>,
    create: BTreeSet<ResourceId>,
    destroy: BTreeSet<ResourceId>,
    states: BTreeMap<ResourceViewId, ResourceStates>,
}

impl DependencyLevel {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            passes: Vec::new(),
            create: BTreeSet::new(),
            destroy: BTreeSet::new(),
            states: BTreeMap::new(),
        }
    }

    pub(crate) fn add_pass(
        &mut self,
        pass: Box<dyn RenderPass>,
        render_targets: Vec<ResourceViewId>,
        depth_stencil: Option<ResourceViewId>,
        create: impl IntoIterator<Item = ResourceId>,
        destroy: impl IntoIterator<Item = ResourceId>,
        states: impl IntoIterator<Item = (ResourceViewId, ResourceStates)>,
    ) {
        self.passes.push(PassEntry {
            pass,
            render_targets,
            depth_stencil,
        });
        self.create.extend(create);
        self.destroy.extend(destroy);
        for (view_id, state) in states {
            *self
                .states
                .entry(view_id)
                .or_insert(ResourceStates::COMMON) |= state;
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn passes(&self) -> impl Iterator<Item = &dyn RenderPass> {
        self.passes.iter().map(|entry| entry.pass.as_ref())
    }

    /// Resources allocated before this level runs.
    pub fn resources_created(&self) -> impl Iterator<Item = &ResourceId> {
        self.create.iter()
    }

    /// Resources returned to the pool after this level runs.
    pub fn resources_released(&self) -> impl Iterator<Item = &ResourceId> {
        self.destroy.iter()
    }

    /// The state every pass in this level collectively requires of a view.
    pub fn required_state(&self, view_id: &ResourceViewId) -> Option<ResourceStates> {
        self.states.get(view_id).copied()
    }

    pub(crate) fn execute(
        &mut self,
        storage: &mut GraphStorage,
        factory: &dyn ResourceFactory,
        frame: &FrameContext,
        encoder: &mut dyn CommandEncoder,
    ) {
        for id in &self.create {
            storage.reallocate(id, factory, frame);
            storage.create_views(id, factory);
        }

        self.record_barriers(storage, encoder);

        for entry in &mut self.passes {
            let mut context = PassContext::new(
                storage,
                encoder,
                &entry.render_targets,
                entry.depth_stencil.as_ref(),
            );
            entry.pass.execute(&mut context);
        }

        for id in &self.destroy {
            storage.free_resource(id);
        }
    }

    /// Diff the level's required states against the tracked states and emit
    /// transitions for the differences. When every subresource of a resource
    /// undergoes the identical transition, one all-subresources barrier
    /// replaces the per-subresource ones.
    fn record_barriers(&self, storage: &mut GraphStorage, encoder: &mut dyn CommandEncoder) {
        let mut per_resource: BTreeMap<ResourceId, Vec<(Subresource, ResourceStates)>> =
            BTreeMap::new();
        for (view_id, state) in &self.states {
            per_resource
                .entry(view_id.resource().clone())
                .or_default()
                .push((view_id.subresource(), *state));
        }

        for (id, requirements) in per_resource {
            let handle = storage.resource_mut(&id);
            let resource = handle.expect_physical().clone();
            let subresource_count = handle.desc().subresource_count() as usize;

            let mut required: Vec<Option<ResourceStates>> = vec![None; subresource_count];
            for (subresource, state) in requirements {
                match subresource {
                    Subresource::All => {
                        for slot in &mut required {
                            *slot = Some(slot.unwrap_or(ResourceStates::COMMON) | state);
                        }
                    }
                    Subresource::Index(index) => {
                        let slot = &mut required[index as usize];
                        *slot = Some(slot.unwrap_or(ResourceStates::COMMON) | state);
                    }
                }
            }

            let mut transitions = Vec::new();
            for (index, state) in required.iter().enumerate() {
                if let Some(next) = state {
                    let previous = handle.tracked_state(index);
                    if previous != *next {
                        transitions.push((index as u32, previous, *next));
                        handle.set_tracked_state(index, *next);
                    }
                }
            }
            if transitions.is_empty() {
                continue;
            }

            let uniform = transitions.len() == subresource_count
                && transitions
                    .windows(2)
                    .all(|pair| pair[0].1 == pair[1].1 && pair[0].2 == pair[1].2);
            if uniform {
                let (_, before, after) = transitions[0];
                log::trace!("transition '{id}' {before:?} -> {after:?}");
                encoder.transition(&resource, Subresource::All, before, after);
            } else {
                for (index, before, after) in transitions {
                    log::trace!("transition '{id}'[{index}] {before:?} -> {after:?}");
                    encoder.transition(&resource, Subresource::Index(index), before, after);
                }
            }
        }
    }
}
