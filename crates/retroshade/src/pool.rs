//! Render target pool
//!
//! Owns every offscreen target the renderer draws into. Callers hold [`TargetHandle`]s
//! carrying the generation of the slot they were issued for; a slot's generation moves
//! on whenever it is handed out for a new purpose, so a handle kept past its release is
//! rejected instead of silently aliasing someone else's target.
//!
//! Backend textures are created lazily: a slot is only backed by a texture once
//! [`RenderTargetPool::texture`] is asked for it, and a slot whose size changed is
//! reallocated the same way.

use crate::backend::{BackendError, RenderBackend, TextureDesc, TextureId};
use retroshade_compiler::graph::{ExecutionPlan, PhysicalTarget, Size};
use retroshade_compiler::preset::TargetFormat;

/// A slot of the pool as seen by its current user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetHandle {
    slot: u32,
    generation: u32,
}

impl TargetHandle {
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    InUse,
    /// Holding history; never handed out until released
    Retained,
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    generation: u32,
    size: Size,
    format: TargetFormat,
    texture: Option<TextureId>,
    /// Size of the allocated texture differs from `size`
    stale: bool,
    /// Physical target of the active plan this slot backs
    planned: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("target {slot} is at generation {current}, handle is from generation {handle}")]
    StaleHandle { slot: u32, handle: u32, current: u32 },
    #[error("no target {0}")]
    UnknownSlot(u32),
    #[error("target {0} is not in use")]
    NotInUse(u32),
    #[error("target has zero size")]
    EmptySize,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Allocates, sizes and recycles offscreen targets
#[derive(Debug, Default)]
pub struct RenderTargetPool {
    slots: Vec<Slot>,
}

impl RenderTargetPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a target of the given size and format
    ///
    /// A free slot is reused and its generation advanced, preferring one with matching
    /// size and format; a new slot is created only when none is free. A reused slot of
    /// another shape keeps its old texture until [`Self::texture`] replaces it.
    pub fn acquire(&mut self, size: Size, format: TargetFormat) -> Result<TargetHandle, PoolError> {
        if size.is_empty() {
            return Err(PoolError::EmptySize);
        }
        let exact = self.slots.iter().position(|s| s.state == SlotState::Free && s.size == size && s.format == format);
        let reusable = exact.or_else(|| self.slots.iter().position(|s| s.state == SlotState::Free));
        let slot = match reusable {
            Some(index) => {
                let slot = &mut self.slots[index];
                if slot.size != size || slot.format != format {
                    slot.size = size;
                    slot.format = format;
                    slot.stale = true;
                }
                slot.generation = slot.generation.wrapping_add(1);
                slot.state = SlotState::InUse;
                index
            }
            None => {
                self.slots.push(Slot {
                    state: SlotState::InUse,
                    generation: 0,
                    size,
                    format,
                    texture: None,
                    stale: false,
                    planned: None,
                });
                self.slots.len() - 1
            }
        };
        Ok(TargetHandle {
            slot: slot as u32,
            generation: self.slots[slot].generation,
        })
    }

    /// Acquires the target backing a physical target of a plan
    ///
    /// The slot remembers which target it backs so [`Self::resize`] can follow the plan's
    /// size expressions.
    pub fn acquire_planned(&mut self, target: &PhysicalTarget, original: Size, viewport: Size) -> Result<TargetHandle, PoolError> {
        let handle = self.acquire(target.size.resolve(original, viewport), target.format)?;
        self.slots[handle.slot as usize].planned = Some(target.id);
        Ok(handle)
    }

    /// Returns a target to the pool; the handle becomes stale once the slot is reused
    pub fn release(&mut self, handle: TargetHandle) -> Result<(), PoolError> {
        let slot = self.slot_mut(handle)?;
        if slot.state == SlotState::Free {
            return Err(PoolError::NotInUse(handle.slot));
        }
        slot.state = SlotState::Free;
        slot.planned = None;
        Ok(())
    }

    /// Marks a target as holding history so it survives until released
    pub fn retain(&mut self, handle: TargetHandle) -> Result<(), PoolError> {
        let slot = self.slot_mut(handle)?;
        if slot.state == SlotState::Free {
            return Err(PoolError::NotInUse(handle.slot));
        }
        slot.state = SlotState::Retained;
        Ok(())
    }

    /// Follows a change of the original or viewport size
    ///
    /// Every in-use planned target whose size changes is marked stale; its texture is
    /// reallocated on next use. Retained history keeps the size it was captured at.
    pub fn resize(&mut self, plan: &ExecutionPlan, original: Size, viewport: Size) {
        for slot in &mut self.slots {
            if slot.state != SlotState::InUse {
                continue;
            }
            let Some(target) = slot.planned.and_then(|id| plan.targets.iter().find(|t| t.id == id)) else {
                continue;
            };
            if !target.size.is_relative() {
                continue;
            }
            let size = target.size.resolve(original, viewport);
            if size != slot.size {
                tracing::debug!(target = target.id, from = %slot.size, to = %size, "render target resized");
                slot.size = size;
                slot.stale = true;
            }
        }
    }

    /// The backend texture of a target, allocating or reallocating it first if needed
    pub fn texture<B: RenderBackend + ?Sized>(&mut self, backend: &mut B, handle: TargetHandle) -> Result<TextureId, PoolError> {
        let slot = self.slot_mut(handle)?;
        if slot.state == SlotState::Free {
            return Err(PoolError::NotInUse(handle.slot));
        }
        match slot.texture {
            Some(texture) if !slot.stale => Ok(texture),
            current => {
                if let Some(texture) = current {
                    backend.destroy_texture(texture);
                    slot.texture = None;
                }
                let texture = backend.create_texture(&TextureDesc {
                    label: format!("render target {}", handle.slot),
                    size: slot.size,
                    format: slot.format,
                })?;
                slot.texture = Some(texture);
                slot.stale = false;
                Ok(texture)
            }
        }
    }

    /// Size a target will have when next used
    pub fn size(&self, handle: TargetHandle) -> Result<Size, PoolError> {
        self.slot(handle).map(|s| s.size)
    }

    /// Checks that a handle still refers to the slot's current occupant
    pub fn validate(&self, handle: TargetHandle) -> Result<(), PoolError> {
        self.slot(handle).map(|_| ())
    }

    /// Destroys the textures of all free slots
    pub fn trim<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        for slot in self.slots.iter_mut().filter(|s| s.state == SlotState::Free) {
            if let Some(texture) = slot.texture.take() {
                backend.destroy_texture(texture);
            }
        }
    }

    /// Number of slots currently handed out, retained ones included
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.state != SlotState::Free).count()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, handle: TargetHandle) -> Result<&Slot, PoolError> {
        let slot = self.slots.get(handle.slot as usize).ok_or(PoolError::UnknownSlot(handle.slot))?;
        if slot.generation != handle.generation {
            return Err(PoolError::StaleHandle {
                slot: handle.slot,
                handle: handle.generation,
                current: slot.generation,
            });
        }
        Ok(slot)
    }

    fn slot_mut(&mut self, handle: TargetHandle) -> Result<&mut Slot, PoolError> {
        let slot = self.slots.get_mut(handle.slot as usize).ok_or(PoolError::UnknownSlot(handle.slot))?;
        if slot.generation != handle.generation {
            return Err(PoolError::StaleHandle {
                slot: handle.slot,
                handle: handle.generation,
                current: slot.generation,
            });
        }
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordedCall, RecordingBackend};
    use retroshade_compiler::graph::{AxisExpr, SizeBase, SizeExpr};

    const SMALL: Size = Size::new(320, 240);

    #[test]
    fn test_reuse_advances_generation() {
        let mut pool = RenderTargetPool::new();
        let first = pool.acquire(SMALL, TargetFormat::Rgba8Unorm).unwrap();
        pool.release(first).unwrap();

        let second = pool.acquire(SMALL, TargetFormat::Rgba8Unorm).unwrap();
        assert_eq!(second.slot(), first.slot());
        assert_eq!(second.generation(), first.generation() + 1);
        assert!(matches!(pool.validate(first), Err(PoolError::StaleHandle { .. })));
        assert!(matches!(pool.release(first), Err(PoolError::StaleHandle { .. })));

        let other_format = pool.acquire(SMALL, TargetFormat::Rgba16Float).unwrap();
        assert_ne!(other_format.slot(), second.slot());
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn test_retained_slots_are_not_handed_out() {
        let mut pool = RenderTargetPool::new();
        let history = pool.acquire(SMALL, TargetFormat::Rgba8Unorm).unwrap();
        pool.retain(history).unwrap();

        let fresh = pool.acquire(SMALL, TargetFormat::Rgba8Unorm).unwrap();
        assert_ne!(fresh.slot(), history.slot());
        assert_eq!(pool.validate(history), Ok(()));

        pool.release(history).unwrap();
        assert_eq!(pool.acquire(SMALL, TargetFormat::Rgba8Unorm).unwrap().slot(), history.slot());
    }

    #[test]
    fn test_textures_are_allocated_lazily() {
        let mut backend = RecordingBackend::default();
        let mut pool = RenderTargetPool::new();
        let handle = pool.acquire(SMALL, TargetFormat::Rgba8Unorm).unwrap();
        assert_eq!(backend.live_textures(), 0);

        let texture = pool.texture(&mut backend, handle).unwrap();
        assert_eq!(pool.texture(&mut backend, handle).unwrap(), texture);
        assert_eq!(backend.live_textures(), 1);

        pool.release(handle).unwrap();
        assert_eq!(pool.texture(&mut backend, handle), Err(PoolError::NotInUse(handle.slot())));
        pool.trim(&mut backend);
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn test_resize_reallocates_relative_targets_on_use() {
        let viewport_sized = PhysicalTarget {
            id: 0,
            format: TargetFormat::Rgba8Unorm,
            size: SizeExpr {
                x: AxisExpr { base: SizeBase::Viewport, factors: Vec::new() },
                y: AxisExpr { base: SizeBase::Viewport, factors: Vec::new() },
            },
            persistent: false,
            passes: vec![0],
        };
        let fixed = PhysicalTarget {
            id: 1,
            size: SizeExpr {
                x: AxisExpr { base: SizeBase::Absolute(64), factors: Vec::new() },
                y: AxisExpr { base: SizeBase::Absolute(64), factors: Vec::new() },
            },
            passes: vec![1],
            ..viewport_sized.clone()
        };
        let plan = ExecutionPlan {
            passes: Vec::new(),
            targets: vec![viewport_sized.clone(), fixed.clone()],
            presentation: retroshade_compiler::graph::Presentation::Blit,
            final_pass: 1,
            retention: Default::default(),
            textures: Default::default(),
            parameters: Default::default(),
            parameter_decls: Vec::new(),
        };

        let mut backend = RecordingBackend::default();
        let mut pool = RenderTargetPool::new();
        let relative = pool.acquire_planned(&viewport_sized, SMALL, Size::new(640, 480)).unwrap();
        let absolute = pool.acquire_planned(&fixed, SMALL, Size::new(640, 480)).unwrap();
        let before = pool.texture(&mut backend, relative).unwrap();
        let absolute_texture = pool.texture(&mut backend, absolute).unwrap();

        pool.resize(&plan, SMALL, Size::new(1280, 960));
        assert_eq!(pool.size(relative), Ok(Size::new(1280, 960)));
        assert_eq!(pool.size(absolute), Ok(Size::new(64, 64)));
        // Nothing is reallocated until the target is used
        assert!(!backend.calls().iter().any(|c| matches!(c, RecordedCall::DestroyTexture(_))));

        let after = pool.texture(&mut backend, relative).unwrap();
        assert_ne!(after, before);
        assert_eq!(backend.texture_desc(after).map(|d| d.size), Some(Size::new(1280, 960)));
        assert_eq!(pool.texture(&mut backend, absolute).unwrap(), absolute_texture);
        // Resizing is not a new purpose
        assert_eq!(pool.validate(relative), Ok(()));
    }

    #[test]
    fn test_changing_sizes_recycle_free_slots() {
        let mut backend = RecordingBackend::default();
        let mut pool = RenderTargetPool::new();
        let mut previous = None;
        for step in 1..=12 {
            let size = Size::new(100 + step, 80 + step);
            let handle = pool.acquire(size, TargetFormat::Rgba8Unorm).unwrap();
            let texture = pool.texture(&mut backend, handle).unwrap();
            assert_eq!(backend.texture_desc(texture).map(|d| d.size), Some(size));
            if let Some(old) = previous.replace(handle) {
                pool.release(old).unwrap();
            }
        }
        assert_eq!(pool.len(), 2);
        assert_eq!(backend.live_textures(), 2);

        // Format changes recycle too
        let float = pool.acquire(SMALL, TargetFormat::Rgba16Float).unwrap();
        let texture = pool.texture(&mut backend, float).unwrap();
        assert_eq!(backend.texture_desc(texture).map(|d| d.format), Some(TargetFormat::Rgba16Float));
        assert_eq!(pool.len(), 2);
        assert_eq!(backend.live_textures(), 2);
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let mut pool = RenderTargetPool::new();
        assert_eq!(pool.acquire(Size::new(0, 10), TargetFormat::Rgba8Unorm), Err(PoolError::EmptySize));
    }
}
