//! Per-frame state and retained history
//!
//! A [`HistoryRing`] keeps the last `depth` captures of one producer, newest first.
//! Captures happen at the end of a frame, so while frame N draws, depth 1 is frame N-1.
//! Slots that fall out of the window go back to the pool.

use crate::backend::TextureId;
use crate::pool::{PoolError, RenderTargetPool, TargetHandle};
use retroshade_compiler::graph::{HistoryProducer, HistoryRetention, Size};
use std::collections::{BTreeMap, VecDeque};

/// What the host hands the renderer for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInput {
    /// The game's framebuffer for this frame
    pub source: TextureId,
    pub source_size: Size,
    /// Size of the canvas the result is presented into
    pub viewport: Size,
    /// Seconds since the host started presenting
    pub time: f32,
    /// 1 when playing forward, -1 when rewinding
    pub frame_direction: i32,
}

impl FrameInput {
    pub fn new(source: TextureId, source_size: Size, viewport: Size) -> Self {
        Self {
            source,
            source_size,
            viewport,
            time: 0.0,
            frame_direction: 1,
        }
    }

    pub fn with_time(mut self, time: f32) -> Self {
        self.time = time;
        self
    }
}

/// Everything one frame of the executor reads, fixed when the frame starts
#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    /// Frames rendered since activation
    pub frame: u64,
    pub time: f32,
    pub frame_direction: i32,
    pub original: TextureId,
    pub original_size: Size,
    pub viewport: Size,
    /// Global parameters as they were when the frame started
    pub parameters: BTreeMap<String, f32>,
}

impl FrameState {
    pub fn new(frame: u64, input: &FrameInput, parameters: &BTreeMap<String, f32>) -> Self {
        Self {
            frame,
            time: input.time,
            frame_direction: input.frame_direction,
            original: input.source,
            original_size: input.source_size,
            viewport: input.viewport,
            parameters: parameters.clone(),
        }
    }
}

/// A retained output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub handle: TargetHandle,
    /// Frame the output was produced in
    pub frame: u64,
    pub size: Size,
}

/// The last `depth` outputs of one producer
#[derive(Debug, Clone)]
pub struct HistoryRing {
    depth: u32,
    entries: VecDeque<HistoryEntry>,
}

impl HistoryRing {
    pub fn new(depth: u32) -> Self {
        Self {
            depth,
            entries: VecDeque::with_capacity(depth as usize),
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The output from `depth` frames back, if it has been captured yet
    pub fn get(&self, depth: u32) -> Option<&HistoryEntry> {
        let index = (depth as usize).checked_sub(1)?;
        self.entries.get(index)
    }

    /// Adds the newest capture and returns the one that left the window, if any
    pub fn push(&mut self, entry: HistoryEntry) -> Option<HistoryEntry> {
        self.entries.push_front(entry);
        if self.entries.len() > self.depth as usize { self.entries.pop_back() } else { None }
    }

    /// Removes the oldest capture if the next push would evict it
    pub fn retire(&mut self) -> Option<HistoryEntry> {
        if self.entries.len() >= self.depth as usize { self.entries.pop_back() } else { None }
    }

    pub fn drain(&mut self) -> impl Iterator<Item = HistoryEntry> + '_ {
        self.entries.drain(..)
    }
}

/// History rings of every producer a plan retains
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    rings: BTreeMap<HistoryProducer, HistoryRing>,
}

impl HistoryStore {
    pub fn new(retention: &HistoryRetention) -> Self {
        let mut rings = BTreeMap::new();
        if retention.original > 0 {
            rings.insert(HistoryProducer::Original, HistoryRing::new(retention.original));
        }
        for (pass, &depth) in retention.passes.iter().enumerate() {
            if depth > 0 {
                rings.insert(HistoryProducer::Pass(pass), HistoryRing::new(depth));
            }
        }
        Self { rings }
    }

    /// Producers with a ring, in a stable order
    pub fn producers(&self) -> impl Iterator<Item = HistoryProducer> + '_ {
        self.rings.keys().copied()
    }

    pub fn ring(&self, producer: HistoryProducer) -> Option<&HistoryRing> {
        self.rings.get(&producer)
    }

    /// The output of `producer` from `depth` frames back, or `None` when there is no data yet
    pub fn sample(&self, producer: HistoryProducer, depth: u32) -> Option<&HistoryEntry> {
        self.rings.get(&producer)?.get(depth)
    }

    /// Releases the slot about to leave the window of `producer`, so the next capture can reuse it
    pub fn retire(&mut self, producer: HistoryProducer, pool: &mut RenderTargetPool) -> Result<(), PoolError> {
        match self.rings.get_mut(&producer).and_then(HistoryRing::retire) {
            Some(retired) => pool.release(retired.handle),
            None => Ok(()),
        }
    }

    /// Records a capture; the evicted entry's slot is released to the pool
    pub fn capture(&mut self, producer: HistoryProducer, entry: HistoryEntry, pool: &mut RenderTargetPool) -> Result<(), PoolError> {
        let Some(ring) = self.rings.get_mut(&producer) else {
            return pool.release(entry.handle);
        };
        pool.retain(entry.handle)?;
        if let Some(evicted) = ring.push(entry) {
            pool.release(evicted.handle)?;
        }
        Ok(())
    }

    /// Releases every retained slot
    pub fn clear(&mut self, pool: &mut RenderTargetPool) {
        for ring in self.rings.values_mut() {
            for entry in ring.drain() {
                // Slots retained by this store cannot have been reissued
                let _ = pool.release(entry.handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retroshade_compiler::preset::TargetFormat;

    const SIZE: Size = Size::new(4, 4);

    fn entry(pool: &mut RenderTargetPool, frame: u64) -> HistoryEntry {
        HistoryEntry {
            handle: pool.acquire(SIZE, TargetFormat::Rgba8Unorm).unwrap(),
            frame,
            size: SIZE,
        }
    }

    #[test]
    fn test_ring_depths() {
        let mut pool = RenderTargetPool::new();
        let mut ring = HistoryRing::new(2);
        assert_eq!(ring.get(1), None);

        assert_eq!(ring.push(entry(&mut pool, 0)), None);
        assert_eq!(ring.get(1).map(|e| e.frame), Some(0));
        assert_eq!(ring.get(2), None);
        assert!(ring.retire().is_none());

        ring.push(entry(&mut pool, 1));
        assert_eq!(ring.get(1).map(|e| e.frame), Some(1));
        assert_eq!(ring.get(2).map(|e| e.frame), Some(0));

        assert_eq!(ring.push(entry(&mut pool, 2)).map(|e| e.frame), Some(0));
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.get(0), None);

        assert_eq!(ring.retire().map(|e| e.frame), Some(1));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_store_releases_evicted_slots() {
        let retention = HistoryRetention {
            original: 0,
            passes: vec![1, 0],
        };
        let mut pool = RenderTargetPool::new();
        let mut store = HistoryStore::new(&retention);
        assert_eq!(store.producers().collect::<Vec<_>>(), vec![HistoryProducer::Pass(0)]);

        let first = entry(&mut pool, 0);
        store.capture(HistoryProducer::Pass(0), first, &mut pool).unwrap();
        let second = entry(&mut pool, 1);
        assert_ne!(second.handle.slot(), first.handle.slot());

        store.capture(HistoryProducer::Pass(0), second, &mut pool).unwrap();
        assert_eq!(store.sample(HistoryProducer::Pass(0), 1).map(|e| e.frame), Some(1));
        assert_eq!(pool.in_use(), 1);

        // Not retained by the plan: handed straight back
        let orphan = entry(&mut pool, 1);
        store.capture(HistoryProducer::Pass(1), orphan, &mut pool).unwrap();
        assert_eq!(pool.in_use(), 1);

        // Retiring first lets the next capture take over the same slot
        store.retire(HistoryProducer::Pass(0), &mut pool).unwrap();
        assert_eq!(pool.in_use(), 0);
        let third = entry(&mut pool, 2);
        assert_eq!(pool.len(), 2);
        store.capture(HistoryProducer::Pass(0), third, &mut pool).unwrap();

        store.clear(&mut pool);
        assert_eq!(pool.in_use(), 0);
    }
}
