use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

/// Access history for one tracked frame
#[derive(Debug, Default)]
struct FrameHistory {
    /// Recent access timestamps, oldest first, at most k entries
    timestamps: VecDeque<Timestamp>,
    evictable: bool,
}

impl FrameHistory {
    /// Sort key for victim selection. Frames still short of k accesses have
    /// infinite backward k-distance and sort before full-history frames;
    /// within each group the smallest decisive timestamp wins: the first
    /// access for short histories (plain LRU on the cold set), the k-th most
    /// recent access for full ones (smallest k-th access = largest backward
    /// distance). Timestamps are unique, so the ordering is total.
    fn eviction_rank(&self, k: usize) -> (bool, Timestamp) {
        let len = self.timestamps.len();
        if len >= k {
            (true, self.timestamps[len - k])
        } else {
            (false, self.timestamps[0])
        }
    }
}

/// State guarded by the replacer's single mutex
struct ReplacerState {
    /// Histories of all tracked frames
    frames: HashMap<FrameId, FrameHistory>,
    /// Number of tracked frames currently marked evictable
    evictable_count: usize,
    /// Logical clock, bumped once per recorded access
    now: Timestamp,
}

/// LRU-K Replacement Policy
///
/// Evicts the evictable frame with the largest backward k-distance, the gap
/// between the current time and a frame's k-th most recent access. Frames
/// with fewer than k recorded accesses count as infinitely distant and are
/// preferred as victims, oldest first access first, so one-shot scans drain
/// ahead of frames with any reuse history.
pub struct LruKReplacer {
    /// K value for the LRU-K algorithm
    k: usize,
    /// Highest frame id the replacer will track, exclusive
    max_frames: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer with the given k value and maximum frame count.
    pub fn new(k: usize, max_frames: usize) -> Self {
        assert!(k >= 1, "k must be at least 1");
        Self {
            k,
            max_frames,
            state: Mutex::new(ReplacerState {
                frames: HashMap::new(),
                evictable_count: 0,
                now: 0,
            }),
        }
    }

    /// Picks the evictable frame with the largest backward k-distance and
    /// stops tracking it. Returns None if no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();

        let victim = state
            .frames
            .iter()
            .filter(|(_, history)| history.evictable)
            .min_by_key(|(_, history)| history.eviction_rank(self.k))
            .map(|(&frame_id, _)| frame_id)?;

        state.frames.remove(&victim);
        state.evictable_count -= 1;
        Some(victim)
    }

    /// Records an access to the given frame at the current time. A frame
    /// seen for the first time starts out non-evictable.
    pub fn record_access(&self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }

        let mut state = self.state.lock();
        let timestamp = state.now;
        state.now += 1;

        let history = state.frames.entry(frame_id).or_default();
        history.timestamps.push_back(timestamp);
        if history.timestamps.len() > self.k {
            history.timestamps.pop_front();
        }
    }

    /// Sets whether a frame may be evicted. Untracked frames are ignored;
    /// repeating the current value is a no-op.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }

        let mut state = self.state.lock();
        match state.frames.get_mut(&frame_id) {
            Some(history) if history.evictable != evictable => {
                history.evictable = evictable;
            }
            _ => return,
        }
        if evictable {
            state.evictable_count += 1;
        } else {
            state.evictable_count -= 1;
        }
    }

    /// Stops tracking a frame entirely. No-op if the frame is untracked;
    /// removing a tracked non-evictable frame is a caller bug.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();

        if let Some(history) = state.frames.remove(&frame_id) {
            debug_assert!(history.evictable, "cannot remove a non-evictable frame");
            if history.evictable {
                state.evictable_count -= 1;
            }
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().evictable_count
    }

    /// Returns the k value of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_replacer_is_empty() {
        let replacer = LruKReplacer::new(2, 10);
        assert_eq!(replacer.k(), 2);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_untracked_frames_are_ignored() {
        let replacer = LruKReplacer::new(2, 10);

        // Neither call may create a tracking entry.
        replacer.set_evictable(FrameId::new(3), true);
        replacer.remove(FrameId::new(3));

        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);

        // Ids past the capacity are ignored outright.
        replacer.record_access(FrameId::new(10));
        replacer.set_evictable(FrameId::new(10), true);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_frame_lifecycle() {
        let replacer = LruKReplacer::new(2, 10);

        // Tracked but pinned until told otherwise.
        replacer.record_access(FrameId::new(0));
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);

        replacer.set_evictable(FrameId::new(0), true);
        replacer.set_evictable(FrameId::new(0), true);
        assert_eq!(replacer.size(), 1);

        replacer.set_evictable(FrameId::new(0), false);
        assert_eq!(replacer.size(), 0);

        replacer.set_evictable(FrameId::new(0), true);
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));

        // Eviction forgets the frame entirely.
        assert_eq!(replacer.size(), 0);
        replacer.set_evictable(FrameId::new(0), true);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_remove_drops_tracking() {
        let replacer = LruKReplacer::new(2, 10);

        replacer.record_access(FrameId::new(4));
        replacer.set_evictable(FrameId::new(4), true);
        replacer.remove(FrameId::new(4));

        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_truncated_history_and_both_distance_classes() {
        let replacer = LruKReplacer::new(2, 10);

        // Frame 0 is accessed five times; only its last two accesses may
        // count. Frame 1 gets two later accesses, frame 2 a single one.
        for _ in 0..5 {
            replacer.record_access(FrameId::new(0));
        }
        replacer.record_access(FrameId::new(1));
        replacer.record_access(FrameId::new(1));
        replacer.record_access(FrameId::new(2));

        for i in 0..3 {
            replacer.set_evictable(FrameId::new(i), true);
        }

        // Frame 2 is the only infinitely distant frame and goes first; the
        // full-history frames follow by k-th most recent access.
        assert_eq!(replacer.evict(), Some(FrameId::new(2)));
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    }
}
