//! Typed-handle ownership of long-lived renderer objects.
//!
//! Meshes, textures, offscreen passes, drawables and pipelines live in
//! per-kind slot vectors and are referred to by small copyable ids. A freed
//! slot is never reused, so a stale id always resolves to
//! [`RendererError::UnknownHandle`] rather than to a different object.

use std::fmt;
use std::marker::PhantomData;

use crate::drawable::Drawable;
use crate::error::{RendererError, RendererResult};
use crate::mesh::Mesh;
use crate::offscreen::OffscreenPass;
use crate::pipeline::Pipeline;
use crate::texture::Texture;

/// A typed index into one slot vector.
pub trait SlotId: Copy + Eq + fmt::Debug {
    const KIND: &'static str;

    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

macro_rules! slot_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(usize);

        impl SlotId for $name {
            const KIND: &'static str = $kind;

            #[inline]
            fn from_index(index: usize) -> Self {
                Self(index)
            }

            #[inline]
            fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $kind, self.0)
            }
        }
    };
}

slot_id!(
    /// Handle to a [`Mesh`].
    MeshId,
    "mesh"
);
slot_id!(
    /// Handle to a [`Texture`].
    TextureId,
    "texture"
);
slot_id!(
    /// Handle to an [`OffscreenPass`].
    OffscreenId,
    "offscreen pass"
);
slot_id!(
    /// Handle to a [`Drawable`].
    DrawableId,
    "drawable"
);
slot_id!(
    /// Handle to a [`Pipeline`].
    PipelineId,
    "pipeline"
);

/// Append-only slot storage for one kind of object.
pub struct Slots<I, T> {
    items: Vec<Option<T>>,
    _id: PhantomData<I>,
}

impl<I: SlotId, T> Default for Slots<I, T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            _id: PhantomData,
        }
    }
}

impl<I: SlotId, T> Slots<I, T> {
    pub fn insert(&mut self, item: T) -> I {
        self.items.push(Some(item));
        I::from_index(self.items.len() - 1)
    }

    /// Inserts the value `make` builds once it knows the id it will get.
    pub fn try_insert_with<E, F>(&mut self, make: F) -> Result<I, E>
    where
        F: FnOnce(I) -> Result<T, E>,
    {
        let id = I::from_index(self.items.len());
        let item = make(id)?;
        self.items.push(Some(item));
        Ok(id)
    }

    pub fn get(&self, id: I) -> RendererResult<&T> {
        self.items
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| unknown(id))
    }

    pub fn get_mut(&mut self, id: I) -> RendererResult<&mut T> {
        self.items
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| unknown(id))
    }

    pub fn remove(&mut self, id: I) -> RendererResult<T> {
        self.items
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or_else(|| unknown(id))
    }

    pub fn contains(&self, id: I) -> bool {
        self.items.get(id.index()).is_some_and(Option::is_some)
    }

    /// Live entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| item.as_ref().map(|item| (I::from_index(i), item)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> {
        self.items
            .iter_mut()
            .enumerate()
            .filter_map(|(i, item)| item.as_mut().map(|item| (I::from_index(i), item)))
    }

    /// Ids of live entries in registration order.
    pub fn ids(&self) -> Vec<I> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Removes every live entry, in registration order.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.iter_mut().filter_map(Option::take)
    }

    pub fn len(&self) -> usize {
        self.items.iter().filter(|item| item.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn unknown<I: SlotId>(id: I) -> RendererError {
    RendererError::UnknownHandle {
        kind: I::KIND,
        index: id.index(),
    }
}

/// Owner of every long-lived renderer object.
///
/// Fields are public so the lifecycle can borrow several kinds at once
/// (pipelines mutably while reading textures, for example).
#[derive(Default)]
pub struct ResourceRegistry {
    pub meshes: Slots<MeshId, Mesh>,
    pub textures: Slots<TextureId, Texture>,
    pub offscreen_passes: Slots<OffscreenId, OffscreenPass>,
    pub drawables: Slots<DrawableId, Drawable>,
    pub pipelines: Slots<PipelineId, Pipeline>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mesh(&self, id: MeshId) -> RendererResult<&Mesh> {
        self.meshes.get(id)
    }

    pub fn texture(&self, id: TextureId) -> RendererResult<&Texture> {
        self.textures.get(id)
    }

    pub fn offscreen_pass(&self, id: OffscreenId) -> RendererResult<&OffscreenPass> {
        self.offscreen_passes.get(id)
    }

    pub fn drawable(&self, id: DrawableId) -> RendererResult<&Drawable> {
        self.drawables.get(id)
    }

    pub fn pipeline(&self, id: PipelineId) -> RendererResult<&Pipeline> {
        self.pipelines.get(id)
    }

    /// The pipeline whose draw list holds `drawable`, if any.
    pub fn owning_pipeline(&self, drawable: DrawableId) -> Option<PipelineId> {
        self.pipelines
            .iter()
            .find(|(_, pipeline)| pipeline.draw_list().contains(&drawable))
            .map(|(id, _)| id)
    }

    /// Appends `drawable` to the draw list of `pipeline`. A drawable belongs
    /// to at most one draw list.
    pub fn add_draw_object(
        &mut self,
        pipeline: PipelineId,
        drawable: DrawableId,
    ) -> RendererResult<()> {
        if let Some(owner) = self.owning_pipeline(drawable) {
            return Err(RendererError::AlreadyRegistered {
                drawable,
                pipeline: owner,
            });
        }
        let object = self.drawables.get(drawable)?;
        self.pipelines
            .get_mut(pipeline)?
            .add_draw_object(drawable, object)
    }

    /// Drawables registered in some pipeline, and how many of them sample.
    pub fn descriptor_demand(&self) -> (u32, u32) {
        let mut drawables = 0;
        let mut sampled = 0;
        for (_, pipeline) in self.pipelines.iter() {
            for id in pipeline.draw_list() {
                if let Ok(drawable) = self.drawables.get(*id) {
                    drawables += 1;
                    if drawable.source().is_sampled() {
                        sampled += 1;
                    }
                }
            }
        }
        (drawables, sampled)
    }
}
