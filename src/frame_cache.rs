//! Frame cache: the `Nframes`/`TTL` ring that feeds live streaming.
//!
//! New relative to the teacher (it persists one thumbnail per completed
//! track; it never serves a live annotated stream). Per-camera mutual
//! exclusion via `DashMap`'s sharded locking, matching the registry design
//! note in §9 ("registry keyed by camera_id with a read-write mutex").

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Clone)]
pub struct CachedFrame {
    pub seq: u64,
    pub jpeg_bytes: std::sync::Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    inserted_at: Instant,
}

pub struct FrameCache {
    per_camera: DashMap<String, VecDeque<CachedFrame>>,
    max_frames: usize,
    ttl: Duration,
}

impl FrameCache {
    pub fn new(max_frames: usize, ttl: Duration) -> Self {
        Self { per_camera: DashMap::new(), max_frames, ttl }
    }

    pub fn put(&self, camera_id: &str, seq: u64, jpeg_bytes: Vec<u8>, width: u32, height: u32) {
        let mut entry = self.per_camera.entry(camera_id.to_string()).or_default();
        evict_expired_locked(&mut entry, self.ttl);
        entry.push_back(CachedFrame {
            seq,
            jpeg_bytes: std::sync::Arc::new(jpeg_bytes),
            width,
            height,
            inserted_at: Instant::now(),
        });
        while entry.len() > self.max_frames {
            entry.pop_front();
        }
    }

    pub fn get_latest(&self, camera_id: &str) -> Option<CachedFrame> {
        let mut entry = self.per_camera.get_mut(camera_id)?;
        evict_expired_locked(&mut entry, self.ttl);
        entry.back().cloned()
    }

    /// Explicit sweep, useful for background cleanup of idle cameras;
    /// `put`/`get_latest` already evict lazily on every call.
    pub fn evict_expired(&self) {
        for mut entry in self.per_camera.iter_mut() {
            evict_expired_locked(&mut entry, self.ttl);
        }
    }
}

fn evict_expired_locked(queue: &mut VecDeque<CachedFrame>, ttl: Duration) {
    while let Some(front) = queue.front() {
        if front.inserted_at.elapsed() > ttl {
            queue.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn get_latest_returns_newest_put() {
        let cache = FrameCache::new(10, Duration::from_secs(5));
        cache.put("cam0", 1, vec![1], 10, 10);
        cache.put("cam0", 2, vec![2], 10, 10);
        let latest = cache.get_latest("cam0").unwrap();
        assert_eq!(latest.seq, 2);
    }

    #[test]
    fn empty_cache_returns_none() {
        let cache = FrameCache::new(10, Duration::from_secs(5));
        assert!(cache.get_latest("unknown").is_none());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = FrameCache::new(10, Duration::from_millis(20));
        cache.put("cam0", 1, vec![1], 10, 10);
        sleep(Duration::from_millis(40));
        assert!(cache.get_latest("cam0").is_none());
    }

    #[test]
    fn bounded_to_max_frames() {
        let cache = FrameCache::new(2, Duration::from_secs(5));
        cache.put("cam0", 1, vec![1], 10, 10);
        cache.put("cam0", 2, vec![2], 10, 10);
        cache.put("cam0", 3, vec![3], 10, 10);
        let entry = cache.per_camera.get("cam0").unwrap();
        assert_eq!(entry.len(), 2);
        assert_eq!(entry.front().unwrap().seq, 2);
    }
}
