use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use assume::assume;

use crate::{
    utils::{panning_factors, window::WindowTable, zeroed_buffer},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Playback state of a newly triggered grain.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GrainSpawn {
    /// Start position in source frames.
    pub start: f64,
    /// Playback rate multiplier.
    pub pitch: f64,
    /// Grain length in samples.
    pub duration: f32,
    /// Grain gain.
    pub amplitude: f32,
    /// Stereo position in range \[-1, 1\].
    pub pan: f32,
    /// Frame offset in the next processed block at which the grain starts playing.
    pub onset: u32,
}

/// Normalized playback position and panning of a single active grain, for visualizations.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct GrainPosition {
    /// Normalized position where the grain started.
    pub start: f32,
    /// Normalized current playback position.
    pub position: f32,
    pub pan: f32,
}

// -------------------------------------------------------------------------------------------------

/// Fixed capacity pool of grain states, stored as structure of arrays.
///
/// Slots get claimed atomically in [`GrainPool::allocate`], so no two callers can ever own the
/// same slot, and so the number of active grains can be monitored from other threads. All other
/// state is only mutated by the owner of the pool, which is the audio thread.
///
/// Mixing processes the grains in fixed size batches of lanes, so the per lane arithmetic can be
/// vectorized by the compiler for the best available instruction set.
///
/// When the pool is saturated, [`GrainPool::allocate_or_evict`] steals the oldest grain. A stolen
/// grain keeps playing until the onset of the grain which replaces it.
pub struct GrainPool {
    active: Box<[AtomicBool]>,
    cursor: AtomicUsize,
    active_count: AtomicUsize,
    position: Box<[f64]>,
    start: Box<[f64]>,
    pitch: Box<[f64]>,
    age: Box<[f32]>,
    duration: Box<[f32]>,
    amplitude: Box<[f32]>,
    pan: Box<[f32]>,
    gain_l: Box<[f32]>,
    gain_r: Box<[f32]>,
    onset: Box<[u32]>,
    stolen: Box<[bool]>,
    handoff: Box<[Option<GrainSpawn>]>,
    arch: pulp::Arch,
}

impl GrainPool {
    /// Default number of grain slots.
    pub const DEFAULT_CAPACITY: usize = 512;

    /// Number of grains which are mixed together in one batch.
    const BATCH: usize = 8;

    /// Create a new pool with the given number of slots. All slots are initially inactive.
    pub fn new(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::ParameterError(
                "Grain pool capacity must be > 0".to_string(),
            ));
        }
        let mut active = Vec::new();
        active.try_reserve_exact(capacity)?;
        active.extend((0..capacity).map(|_| AtomicBool::new(false)));
        Ok(Self {
            active: active.into_boxed_slice(),
            cursor: AtomicUsize::new(0),
            active_count: AtomicUsize::new(0),
            position: zeroed_buffer(capacity)?.into_boxed_slice(),
            start: zeroed_buffer(capacity)?.into_boxed_slice(),
            pitch: zeroed_buffer(capacity)?.into_boxed_slice(),
            age: zeroed_buffer(capacity)?.into_boxed_slice(),
            duration: zeroed_buffer(capacity)?.into_boxed_slice(),
            amplitude: zeroed_buffer(capacity)?.into_boxed_slice(),
            pan: zeroed_buffer(capacity)?.into_boxed_slice(),
            gain_l: zeroed_buffer(capacity)?.into_boxed_slice(),
            gain_r: zeroed_buffer(capacity)?.into_boxed_slice(),
            onset: zeroed_buffer(capacity)?.into_boxed_slice(),
            stolen: zeroed_buffer(capacity)?.into_boxed_slice(),
            handoff: zeroed_buffer(capacity)?.into_boxed_slice(),
            arch: pulp::Arch::new(),
        })
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.active.len()
    }

    /// Number of active grains. Only approximate when called while other threads allocate.
    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Test if the given slot is active.
    pub fn is_active(&self, slot: usize) -> bool {
        self.active
            .get(slot)
            .is_some_and(|active| active.load(Ordering::Acquire))
    }

    /// Claim a free slot, scanning forward from a rotating cursor.
    /// Returns `None` when all slots are active. Never blocks and never allocates.
    pub fn allocate(&self) -> Option<usize> {
        let capacity = self.capacity();
        let cursor = self.cursor.load(Ordering::Relaxed) % capacity;
        for offset in 0..capacity {
            let slot = (cursor + offset) % capacity;
            if self.active[slot]
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.cursor.store((slot + 1) % capacity, Ordering::Relaxed);
                self.active_count.fetch_add(1, Ordering::Relaxed);
                return Some(slot);
            }
        }
        None
    }

    /// Force-free the active grain which played the longest. Returns the freed slot.
    pub fn evict_oldest(&mut self) -> Option<usize> {
        let slot = self.oldest_slot()?;
        self.deactivate(slot);
        Some(slot)
    }

    /// Mark the active grain which played the longest as stolen, without freeing its slot.
    /// The stolen grain keeps playing until the onset of the grain which gets spawned into the
    /// returned slot.
    pub fn steal_oldest(&mut self) -> Option<usize> {
        let slot = self.oldest_slot()?;
        self.stolen[slot] = true;
        Some(slot)
    }

    /// Claim a free slot, stealing the oldest grain when the pool is saturated.
    pub fn allocate_or_evict(&mut self) -> Option<usize> {
        self.allocate().or_else(|| self.steal_oldest())
    }

    /// Initialize the playback state of a slot which got claimed via `allocate` or
    /// `allocate_or_evict`. A stolen slot switches to the new grain at the grain's onset.
    pub fn spawn(&mut self, slot: usize, spawn: GrainSpawn) {
        debug_assert!(self.is_active(slot), "Slot must be allocated before spawning");
        if slot >= self.capacity() {
            return;
        }
        if std::mem::take(&mut self.stolen[slot]) && spawn.onset > 0 {
            self.handoff[slot] = Some(spawn);
            return;
        }
        self.handoff[slot] = None;
        self.start_grain(slot, &spawn);
    }

    fn start_grain(&mut self, slot: usize, spawn: &GrainSpawn) {
        let (gain_l, gain_r) = panning_factors(spawn.pan);
        self.position[slot] = spawn.start.max(0.0);
        self.start[slot] = spawn.start.max(0.0);
        self.pitch[slot] = spawn.pitch;
        self.age[slot] = 0.0;
        self.duration[slot] = spawn.duration.max(1.0);
        self.amplitude[slot] = spawn.amplitude;
        self.pan[slot] = spawn.pan.clamp(-1.0, 1.0);
        self.gain_l[slot] = gain_l;
        self.gain_r[slot] = gain_r;
        self.onset[slot] = spawn.onset;
    }

    /// Deactivate all slots. Silences all grains immediately.
    pub fn reset(&mut self) {
        for active in self.active.iter() {
            active.store(false, Ordering::Release);
        }
        self.stolen.fill(false);
        self.handoff.fill(None);
        self.active_count.store(0, Ordering::Relaxed);
        self.cursor.store(0, Ordering::Relaxed);
    }

    /// Fill `positions` with the normalized position and panning of active grains.
    /// Returns the number of written positions.
    pub fn positions(&self, source_len: usize, positions: &mut [GrainPosition]) -> usize {
        let scale = if source_len > 0 {
            1.0 / source_len as f64
        } else {
            0.0
        };
        let mut count = 0;
        for (slot, active) in self.active.iter().enumerate() {
            if count >= positions.len() {
                break;
            }
            if active.load(Ordering::Relaxed) {
                positions[count] = GrainPosition {
                    start: (self.start[slot] * scale).clamp(0.0, 1.0) as f32,
                    position: (self.position[slot] * scale).clamp(0.0, 1.0) as f32,
                    pan: self.pan[slot],
                };
                count += 1;
            }
        }
        count
    }

    /// Mix all active grains into the given stereo buffers, reading from the given mono source.
    ///
    /// Grains which reach their duration or the end of the source get deactivated. Reads are
    /// clamped against the length of the passed source, so grains which got started on a longer
    /// source never read out of bounds.
    pub fn process(
        &mut self,
        source: &[f32],
        window: &WindowTable,
        left: &mut [f32],
        right: &mut [f32],
    ) {
        if self.active_count() == 0 {
            return;
        }
        let frames = left.len().min(right.len());
        let (left, right) = (&mut left[..frames], &mut right[..frames]);
        if source.is_empty() {
            self.reset();
            return;
        }
        let arch = self.arch;
        arch.dispatch(|| {
            for base in (0..self.capacity()).step_by(Self::BATCH) {
                self.process_batch(base, source, window, left, right);
            }
        });
    }

    #[inline(always)]
    fn process_batch(
        &mut self,
        base: usize,
        source: &[f32],
        window: &WindowTable,
        left: &mut [f32],
        right: &mut [f32],
    ) {
        const BATCH: usize = GrainPool::BATCH;
        let lanes = BATCH.min(self.capacity() - base);

        let mut alive = [false; BATCH];
        for (lane, alive) in alive.iter_mut().enumerate().take(lanes) {
            *alive = self.active[base + lane].load(Ordering::Acquire);
        }
        if !alive.iter().any(|a| *a) {
            return;
        }

        // load lanes
        let mut position = [0.0f64; BATCH];
        let mut pitch = [0.0f64; BATCH];
        let mut age = [0.0f32; BATCH];
        let mut duration = [1.0f32; BATCH];
        let mut amplitude = [0.0f32; BATCH];
        let mut gain_l = [0.0f32; BATCH];
        let mut gain_r = [0.0f32; BATCH];
        let mut onset = [0usize; BATCH];
        let mut handoff = [None::<GrainSpawn>; BATCH];
        let mut handed_over = [false; BATCH];
        for lane in 0..lanes {
            let slot = base + lane;
            position[lane] = self.position[slot];
            pitch[lane] = self.pitch[slot];
            age[lane] = self.age[slot];
            duration[lane] = self.duration[slot];
            amplitude[lane] = self.amplitude[slot];
            gain_l[lane] = self.gain_l[slot];
            gain_r[lane] = self.gain_r[slot];
            onset[lane] = self.onset[slot] as usize;
            handoff[lane] = self.handoff[slot].take();
        }

        let source_len = source.len();
        let end = source_len as f64;
        for frame in 0..left.len() {
            for lane in 0..BATCH {
                if let Some(spawn) = handoff[lane].filter(|spawn| spawn.onset as usize == frame) {
                    // replace the stolen grain
                    let (l, r) = panning_factors(spawn.pan);
                    position[lane] = spawn.start.max(0.0);
                    pitch[lane] = spawn.pitch;
                    age[lane] = 0.0;
                    duration[lane] = spawn.duration.max(1.0);
                    amplitude[lane] = spawn.amplitude;
                    gain_l[lane] = l;
                    gain_r[lane] = r;
                    onset[lane] = frame;
                    alive[lane] = true;
                    handed_over[lane] = true;
                }
            }
            let mut sample = [0.0f32; BATCH];
            for lane in 0..BATCH {
                if alive[lane] && frame >= onset[lane] {
                    let envelope = window.lookup(age[lane] / duration[lane]);
                    sample[lane] = Self::read_source(source, position[lane]) * envelope;
                }
            }
            let mut mix_l = 0.0;
            let mut mix_r = 0.0;
            for lane in 0..BATCH {
                let value = sample[lane] * amplitude[lane];
                mix_l += value * gain_l[lane];
                mix_r += value * gain_r[lane];
            }
            left[frame] += mix_l;
            right[frame] += mix_r;

            for lane in 0..BATCH {
                if alive[lane] && frame >= onset[lane] {
                    position[lane] += pitch[lane];
                    age[lane] += 1.0;
                    if age[lane] >= duration[lane] || position[lane] >= end {
                        alive[lane] = false;
                    }
                }
            }
        }

        // store lanes
        for lane in 0..lanes {
            let slot = base + lane;
            if let Some(spawn) = handoff[lane] {
                if !handed_over[lane] {
                    // block ended before the onset: start with the next block
                    self.start_grain(slot, &GrainSpawn { onset: 0, ..spawn });
                    continue;
                }
                self.start_grain(slot, &spawn);
            }
            self.position[slot] = position[lane];
            self.age[slot] = age[lane];
            self.onset[slot] = 0;
            if !alive[lane] && self.active[slot].load(Ordering::Relaxed) {
                self.deactivate(slot);
            }
        }
    }

    /// Linearly interpolated read at the given fractional frame position.
    #[inline(always)]
    fn read_source(source: &[f32], position: f64) -> f32 {
        let len = source.len();
        assume!(unsafe: len > 0, "source len is checked in process");
        let max_index = len - 1;
        let index = (position.max(0.0) as usize).min(max_index);
        let next_index = (index + 1).min(max_index);
        let fraction = (position - index as f64).clamp(0.0, 1.0) as f32;
        assume!(unsafe: index < len && next_index < len);
        let a = source[index];
        let b = source[next_index];
        a + (b - a) * fraction
    }

    fn oldest_slot(&self) -> Option<usize> {
        let mut oldest: Option<(usize, f32)> = None;
        for (slot, active) in self.active.iter().enumerate() {
            if active.load(Ordering::Relaxed)
                && !self.stolen[slot]
                && self.handoff[slot].is_none()
                && oldest.is_none_or(|(_, age)| self.age[slot] > age)
            {
                oldest = Some((slot, self.age[slot]));
            }
        }
        oldest.map(|(slot, _)| slot)
    }

    fn deactivate(&mut self, slot: usize) {
        self.stolen[slot] = false;
        self.handoff[slot] = None;
        if self.active[slot].swap(false, Ordering::AcqRel) {
            self.active_count.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc, thread};

    fn spawn(start: f64, pitch: f64, duration: f32) -> GrainSpawn {
        GrainSpawn {
            start,
            pitch,
            duration,
            amplitude: 1.0,
            pan: 0.0,
            onset: 0,
        }
    }

    #[test]
    fn concurrent_allocation_is_exclusive() {
        const CAPACITY: usize = 64;
        let pool = Arc::new(GrainPool::new(CAPACITY).unwrap());
        let threads = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || (0..9).filter_map(|_| pool.allocate()).collect::<Vec<_>>())
            })
            .collect::<Vec<_>>();
        let slots = threads
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(slots.len(), CAPACITY);
        assert_eq!(slots.iter().collect::<HashSet<_>>().len(), CAPACITY);
        assert_eq!(pool.active_count(), CAPACITY);
        assert_eq!(pool.allocate(), None);
    }

    #[test]
    fn eviction_frees_oldest_grain() {
        let mut pool = GrainPool::new(4).unwrap();
        for age in [5.0, 50.0, 7.0, 1.0] {
            let slot = pool.allocate().unwrap();
            pool.spawn(slot, spawn(0.0, 1.0, 100.0));
            pool.age[slot] = age;
        }
        assert_eq!(pool.allocate(), None);
        assert_eq!(pool.evict_oldest(), Some(1));
        assert_eq!(pool.active_count(), 3);
        assert_eq!(pool.allocate(), Some(1));
        assert_eq!(pool.allocate(), None);

        pool.age[1] = 0.0;
        assert_eq!(pool.allocate_or_evict(), Some(2));
        assert_eq!(pool.active_count(), 4);

        pool.reset();
        assert_eq!(pool.active_count(), 0);
        assert!((0..4).all(|slot| !pool.is_active(slot)));
    }

    #[test]
    fn stolen_grains_play_until_onset() {
        let source = vec![1.0; 10_000];
        let window = WindowTable::default();
        let mut pool = GrainPool::new(1).unwrap();
        let slot = pool.allocate().unwrap();
        pool.spawn(slot, spawn(0.0, 1.0, 1000.0));
        let (mut left, mut right) = ([0.0; 64], [0.0; 64]);
        pool.process(&source, &window, &mut left, &mut right);

        // replace the playing grain with a hard left panned one in the middle of the block
        assert_eq!(pool.allocate(), None);
        assert_eq!(pool.allocate_or_evict(), Some(slot));
        let replacement = GrainSpawn {
            pan: -1.0,
            onset: 32,
            ..spawn(5000.0, 1.0, 1000.0)
        };
        pool.spawn(slot, replacement);
        assert_eq!(pool.active_count(), 1);
        let (mut left, mut right) = ([0.0; 64], [0.0; 64]);
        pool.process(&source, &window, &mut left, &mut right);
        assert!(right[..32].iter().all(|v| *v > 0.0));
        assert!(right[32..].iter().all(|v| v.abs() < 1e-6));
        assert_eq!(left[32], 0.0);
        assert!(left[33..].iter().all(|v| *v > 0.0));
        assert_eq!(pool.age[slot], 32.0);
        assert_eq!(pool.position[slot], 5032.0);

        // onsets behind the processed block start with the next one
        assert_eq!(pool.allocate_or_evict(), Some(slot));
        pool.spawn(
            slot,
            GrainSpawn {
                onset: 100,
                ..replacement
            },
        );
        let (mut left, mut right) = ([0.0; 64], [0.0; 64]);
        pool.process(&source, &window, &mut left, &mut right);
        assert!(left.iter().all(|v| *v > 0.0));
        let (mut left, mut right) = ([0.0; 64], [0.0; 64]);
        pool.process(&source, &window, &mut left, &mut right);
        assert_eq!(left[0], 0.0);
        assert!(left[1..].iter().all(|v| *v > 0.0));
        assert_eq!(pool.age[slot], 64.0);
        assert!(pool.is_active(slot));
    }

    #[test]
    fn grains_end_after_duration() {
        let source = vec![0.5; 10_000];
        let window = WindowTable::default();
        for (pitch, duration) in [(1.0, 10.5), (0.25, 64.0), (3.7, 1.0), (1.5, 333.3)] {
            let mut pool = GrainPool::new(8).unwrap();
            let slot = pool.allocate().unwrap();
            pool.spawn(slot, spawn(100.0, pitch, duration));
            let mut ticks = 0;
            while pool.is_active(slot) {
                let (mut left, mut right) = ([0.0; 1], [0.0; 1]);
                pool.process(&source, &window, &mut left, &mut right);
                ticks += 1;
                assert!(ticks <= duration.ceil() as usize);
            }
            assert_eq!(ticks, duration.ceil() as usize);
            assert_eq!(pool.active_count(), 0);
        }
    }

    #[test]
    fn grains_end_at_source_end() {
        let source = vec![1.0; 100];
        let window = WindowTable::default();
        let mut pool = GrainPool::new(1).unwrap();
        let pitch = 2.5;
        let slot = pool.allocate().unwrap();
        pool.spawn(slot, spawn(90.0, pitch, 10_000.0));
        let (mut left, mut right) = ([0.0; 64], [0.0; 64]);
        pool.process(&source, &window, &mut left, &mut right);
        assert!(!pool.is_active(slot));
        assert!(pool.position[slot] <= source.len() as f64 + pitch);
        // 90, 92.5, 95, 97.5 got played, then the grain ended. The window starts at zero.
        assert!(left[1..4].iter().all(|v| *v > 0.0));
        assert!(left[4..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn shorter_source_never_reads_out_of_bounds() {
        let window = WindowTable::default();
        let mut pool = GrainPool::new(16).unwrap();
        for start in [0.0, 5000.0, 9000.0] {
            let slot = pool.allocate().unwrap();
            pool.spawn(slot, spawn(start, 1.0, 2000.0));
        }
        let (mut left, mut right) = ([0.0; 128], [0.0; 128]);
        pool.process(&vec![0.1; 10_000], &window, &mut left, &mut right);
        assert_eq!(pool.active_count(), 3);
        // swap in a much shorter source
        pool.process(&[0.1; 32], &window, &mut left, &mut right);
        assert_eq!(pool.active_count(), 0);
        assert!(left.iter().chain(right.iter()).all(|v| v.is_finite()));
    }

    #[test]
    fn onset_and_panning() {
        let source = vec![1.0; 1000];
        let window = WindowTable::default();
        let mut pool = GrainPool::new(2).unwrap();
        let slot = pool.allocate().unwrap();
        pool.spawn(
            slot,
            GrainSpawn {
                pan: -1.0,
                onset: 10,
                ..spawn(0.0, 1.0, 100.0)
            },
        );
        let (mut left, mut right) = ([0.0; 32], [0.0; 32]);
        pool.process(&source, &window, &mut left, &mut right);
        assert!(left[..10].iter().all(|v| *v == 0.0));
        assert!(left[11..].iter().all(|v| *v > 0.0));
        assert!(right.iter().all(|v| v.abs() < 1e-6));

        let mut positions = [GrainPosition::default(); 4];
        assert_eq!(pool.positions(source.len(), &mut positions), 1);
        assert!((positions[0].position - 22.0 / 1000.0).abs() < 1e-6);
        assert_eq!(positions[0].start, 0.0);
        assert_eq!(positions[0].pan, -1.0);
    }
}
