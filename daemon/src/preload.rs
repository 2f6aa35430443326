//! Preload pool: loads upcoming clips ahead of time and bounds memory use
//!
//! The pool is the only owner of media resources. Entries are created lazily
//! on first reference, ordered by how recently they were needed, and
//! released (playback stopped, source cleared, detached) when evicted or when
//! the pool is torn down.

use crate::media::{MediaBackend, MediaError, MediaResource, Readiness};
use crate::playlist::Playlist;
use common::ClipId;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Pool sizing and loading limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreloadOptions {
    /// Upper bound on resident resources after an eviction pass
    pub max_resident: usize,
    /// How many playlist entries ahead to keep loaded
    pub distance: usize,
    /// Bounded wait for a clip to become ready
    pub timeout: Duration,
}

impl Default for PreloadOptions {
    fn default() -> Self {
        Self {
            max_resident: 3,
            distance: 2,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Result of a preload request
#[derive(Debug, Clone, PartialEq)]
pub enum PreloadStatus {
    Ready,
    /// Load in flight; completion is reported by [`PreloadPool::poll`]
    Pending,
    /// Load failed; the entry is gone and the clip should be skipped
    Failed(MediaError),
}

/// Completion of an in-flight load
#[derive(Debug, Clone, PartialEq)]
pub enum PreloadEvent {
    Ready(ClipId),
    Failed(MediaError),
}

enum EntryState {
    /// `None` when the timeout does not fit on the clock
    Loading { deadline: Option<Instant> },
    Ready,
}

struct PoolEntry<R> {
    resource: R,
    state: EntryState,
}

/// Bounded cache of clip id -> media resource
pub struct PreloadPool<B: MediaBackend> {
    backend: B,
    options: PreloadOptions,
    entries: HashMap<ClipId, PoolEntry<B::Resource>>,
    /// Least recently needed first
    lru_order: VecDeque<ClipId>,
}

impl<B: MediaBackend> PreloadPool<B> {
    pub fn new(backend: B, options: PreloadOptions) -> Self {
        Self {
            backend,
            options,
            entries: HashMap::new(),
            lru_order: VecDeque::new(),
        }
    }

    /// Make sure `clip` is loading or loaded.
    ///
    /// Idempotent: an existing entry (ready or in flight) is reused and
    /// marked as recently needed.
    pub fn preload(&mut self, clip: &ClipId, now: Instant) -> PreloadStatus {
        if let Some(entry) = self.entries.get(clip) {
            let status = match entry.state {
                EntryState::Ready => PreloadStatus::Ready,
                EntryState::Loading { .. } => PreloadStatus::Pending,
            };
            self.touch(clip);
            return status;
        }

        log::debug!("Preloading clip: {}", clip.file_name());

        let resource = match self.backend.open(clip, now) {
            Ok(resource) => resource,
            Err(e) => {
                log::warn!("Failed to open {}: {}", clip, e);
                return PreloadStatus::Failed(e);
            }
        };

        self.entries.insert(
            clip.clone(),
            PoolEntry {
                resource,
                state: EntryState::Loading {
                    deadline: now.checked_add(self.options.timeout),
                },
            },
        );
        self.touch(clip);

        match self.check_entry(clip, now) {
            Some(PreloadEvent::Ready(_)) => PreloadStatus::Ready,
            Some(PreloadEvent::Failed(e)) => PreloadStatus::Failed(e),
            None => PreloadStatus::Pending,
        }
    }

    /// Drive every in-flight load and report the ones that finished
    pub fn poll(&mut self, now: Instant) -> Vec<PreloadEvent> {
        let loading: Vec<ClipId> = self
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry.state, EntryState::Loading { .. }))
            .map(|(clip, _)| clip.clone())
            .collect();

        loading
            .iter()
            .filter_map(|clip| self.check_entry(clip, now))
            .collect()
    }

    fn check_entry(&mut self, clip: &ClipId, now: Instant) -> Option<PreloadEvent> {
        let entry = self.entries.get_mut(clip)?;
        let EntryState::Loading { deadline } = entry.state else {
            return None;
        };

        let failure = match entry.resource.poll_ready(now) {
            Readiness::Loading if deadline.is_none_or(|deadline| now < deadline) => return None,
            Readiness::Ready => {
                entry.state = EntryState::Ready;
                log::debug!("✓ Clip ready: {}", clip.file_name());
                return Some(PreloadEvent::Ready(clip.clone()));
            }
            Readiness::Loading => MediaError::LoadTimeout {
                clip: clip.clone(),
                timeout: self.options.timeout,
            },
            Readiness::Failed(e) => e,
        };

        log::warn!("Skipping clip: {}", failure);
        self.remove(clip);
        Some(PreloadEvent::Failed(failure))
    }

    /// Best-effort preload of the `distance` entries after `index`.
    ///
    /// A failing entry does not stop the others from loading.
    pub fn preload_ahead(&mut self, playlist: &Playlist, index: usize, now: Instant) {
        let upcoming: Vec<ClipId> = playlist
            .upcoming(index, self.options.distance)
            .map(|(_, clip)| clip.clone())
            .collect();

        for clip in upcoming {
            if let PreloadStatus::Failed(e) = self.preload(&clip, now) {
                log::debug!("Preload ahead continues past {}: {}", clip.file_name(), e);
            }
        }
    }

    /// Release least recently needed entries until at most `max_resident`
    /// remain. Entries listed in `protected` are never evicted.
    pub fn evict(&mut self, max_resident: usize, protected: &[&ClipId]) -> usize {
        let mut evicted = 0;
        let mut i = 0;

        while self.entries.len() > max_resident && i < self.lru_order.len() {
            let clip = self.lru_order[i].clone();
            if protected.contains(&&clip) {
                i += 1;
                continue;
            }
            log::debug!("🧹 Evicting clip: {}", clip.file_name());
            self.remove(&clip);
            evicted += 1;
        }

        evicted
    }

    /// Release entries outside the window `index ..= index + distance`
    pub fn cleanup_unused(&mut self, playlist: &Playlist, index: usize) -> usize {
        let mut keep: Vec<&ClipId> = vec![playlist.get(index)];
        keep.extend(
            playlist
                .upcoming(index, self.options.distance)
                .map(|(_, clip)| clip),
        );

        let unused: Vec<ClipId> = self
            .entries
            .keys()
            .filter(|clip| !keep.contains(clip))
            .cloned()
            .collect();

        for clip in &unused {
            log::debug!("🧹 Releasing unused clip: {}", clip.file_name());
            self.remove(clip);
        }

        unused.len()
    }

    /// Release one clip
    pub fn release(&mut self, clip: &ClipId) -> bool {
        self.remove(clip)
    }

    /// Release every resource; used on teardown
    pub fn release_all(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        log::debug!("Releasing all {} pooled clip(s)", self.entries.len());
        for entry in self.entries.values_mut() {
            log::trace!("Releasing {}", entry.resource.clip());
            entry.resource.release();
        }
        self.entries.clear();
        self.lru_order.clear();
    }

    fn remove(&mut self, clip: &ClipId) -> bool {
        let Some(mut entry) = self.entries.remove(clip) else {
            return false;
        };
        entry.resource.release();
        self.lru_order.retain(|c| c != clip);
        true
    }

    fn touch(&mut self, clip: &ClipId) {
        if let Some(index) = self.lru_order.iter().position(|existing| existing == clip) {
            let _ = self.lru_order.remove(index);
        }
        self.lru_order.push_back(clip.clone());
    }

    pub fn get(&self, clip: &ClipId) -> Option<&B::Resource> {
        self.entries.get(clip).map(|entry| &entry.resource)
    }

    pub fn get_mut(&mut self, clip: &ClipId) -> Option<&mut B::Resource> {
        self.entries.get_mut(clip).map(|entry| &mut entry.resource)
    }

    pub fn contains(&self, clip: &ClipId) -> bool {
        self.entries.contains_key(clip)
    }

    pub fn is_ready(&self, clip: &ClipId) -> bool {
        self.entries
            .get(clip)
            .is_some_and(|entry| matches!(entry.state, EntryState::Ready))
    }

    pub fn is_loading(&self, clip: &ClipId) -> bool {
        self.entries
            .get(clip)
            .is_some_and(|entry| matches!(entry.state, EntryState::Loading { .. }))
    }

    /// Resources held, loaded or loading
    pub fn resident(&self) -> usize {
        self.entries.len()
    }

    /// Resources still loading
    pub fn loading(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry.state, EntryState::Loading { .. }))
            .count()
    }

    pub fn options(&self) -> &PreloadOptions {
        &self.options
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

impl<B: MediaBackend> Drop for PreloadPool<B> {
    fn drop(&mut self) {
        self.release_all();
    }
}
