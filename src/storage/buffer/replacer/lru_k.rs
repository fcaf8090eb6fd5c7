use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU-K page replacement policy.
///
/// Evicts the evictable frame with the largest backward K-distance: the time
/// since the frame's K-th most recent access. Frames with fewer than K
/// recorded accesses have infinite distance and are preferred as victims,
/// ordered by their first access (so re-reading a young frame does not save
/// it from eviction).
pub struct LruKReplacer {
    inner: Mutex<ReplacerInner>,
}

struct ReplacerInner {
    frames: HashMap<FrameId, FrameHistory>,
    /// Number of evictable frames currently tracked
    curr_size: usize,
    replacer_size: usize,
    k: usize,
    /// Logical clock, advanced on every recorded access
    clock: u64,
}

struct FrameHistory {
    /// Up to K most recent access timestamps, oldest first
    history: VecDeque<u64>,
    evictable: bool,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "LRU-K requires k >= 1");
        Self {
            inner: Mutex::new(ReplacerInner {
                frames: HashMap::with_capacity(num_frames),
                curr_size: 0,
                replacer_size: num_frames,
                k,
                clock: 0,
            }),
        }
    }

    /// Pick and remove the victim frame, if any frame is evictable.
    ///
    /// Frames that never reached K accesses go first (oldest first access
    /// wins); otherwise the frame whose K-th most recent access is oldest.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.curr_size == 0 {
            return None;
        }

        let mut history_victim: Option<(FrameId, u64)> = None;
        let mut cached_victim: Option<(FrameId, u64)> = None;

        for (&frame_id, node) in &inner.frames {
            if !node.evictable {
                continue;
            }
            let first = *node.history.front().expect("tracked frame has accesses");
            if node.history.len() < inner.k {
                match history_victim {
                    Some((_, oldest)) if oldest <= first => {}
                    _ => history_victim = Some((frame_id, first)),
                }
            } else {
                // `history` is capped at K entries, so the front is the
                // K-th most recent access.
                match cached_victim {
                    Some((_, oldest)) if oldest <= first => {}
                    _ => cached_victim = Some((frame_id, first)),
                }
            }
        }

        let victim = history_victim.or(cached_victim).map(|(id, _)| id)?;
        inner.frames.remove(&victim);
        inner.curr_size -= 1;
        Some(victim)
    }

    /// Record an access to the frame at the current logical timestamp,
    /// registering the frame if it has not been seen before.
    pub fn record_access(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        assert!(
            frame_id < inner.replacer_size,
            "frame id {} out of range",
            frame_id
        );

        inner.clock += 1;
        let now = inner.clock;
        let k = inner.k;
        let node = inner.frames.entry(frame_id).or_insert_with(|| FrameHistory {
            history: VecDeque::with_capacity(k),
            evictable: false,
        });
        if node.history.len() == k {
            node.history.pop_front();
        }
        node.history.push_back(now);
    }

    /// Toggle whether the frame may be chosen as an eviction victim
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        assert!(
            frame_id < inner.replacer_size,
            "frame id {} out of range",
            frame_id
        );
        let node = inner
            .frames
            .get_mut(&frame_id)
            .expect("set_evictable on untracked frame");
        if node.evictable != evictable {
            node.evictable = evictable;
            if evictable {
                inner.curr_size += 1;
            } else {
                inner.curr_size -= 1;
            }
        }
    }

    /// Drop the frame and its access history. The frame must be evictable;
    /// removing an untracked frame is a no-op.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let Some(node) = inner.frames.get(&frame_id) else {
            return;
        };
        assert!(node.evictable, "cannot remove a pinned frame");
        inner.frames.remove(&frame_id);
        inner.curr_size -= 1;
    }

    /// Number of evictable frames
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }
}
