//! Render-target reuse.
//!
//! Textures are keyed by their full [`TextureDesc`]. A released texture goes
//! back on its key's free list and is handed to the next `acquire` with an
//! identical key; GPU memory is only returned on [`TexturePool::trim`] or
//! [`TexturePool::clear`].

use std::collections::HashMap;
use std::hash::Hash;

use log::{debug, trace, warn};

use super::backend::Backend;
use super::error::CompositorError;
use super::texture::TextureDesc;

pub const DEFAULT_MAX_TEXTURES: usize = 1000;

#[derive(Debug)]
pub struct TexturePool<T> {
    free: HashMap<TextureDesc, Vec<T>>,
    live: HashMap<T, TextureDesc>,
    limit: usize,
    /// Highest simultaneous live count since the last `reset_peak`.
    peak: usize,
    allocations: u64,
}

impl<T> Default for TexturePool<T> {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_TEXTURES)
    }
}

impl<T> TexturePool<T> {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            free: HashMap::new(),
            live: HashMap::new(),
            limit: limit.max(1),
            peak: 0,
            allocations: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    /// Live plus free: every texture the pool currently owns GPU memory for.
    pub fn allocated_count(&self) -> usize {
        self.live_count() + self.free_count()
    }

    pub fn free_count_for(&self, desc: &TextureDesc) -> usize {
        self.free.get(desc).map_or(0, Vec::len)
    }

    pub fn live_count_for(&self, desc: &TextureDesc) -> usize {
        self.live.values().filter(|d| *d == desc).count()
    }

    /// Total backend allocations over the pool's lifetime.
    pub fn total_allocations(&self) -> u64 {
        self.allocations
    }

    pub fn peak_live(&self) -> usize {
        self.peak
    }

    pub fn reset_peak(&mut self) {
        self.peak = self.live.len();
    }
}

impl<T: Clone + Eq + Hash + std::fmt::Debug> TexturePool<T> {
    /// Returns a texture matching `desc` exactly, reusing a released one when
    /// possible.
    pub fn acquire<B>(&mut self, backend: &mut B, desc: &TextureDesc) -> Result<T, CompositorError>
    where
        B: Backend<Texture = T>,
    {
        if let Some(texture) = self.free.get_mut(desc).and_then(Vec::pop) {
            trace!("pool: reuse {:?} {}x{}", texture, desc.width, desc.height);
            self.mark_live(texture.clone(), *desc);
            return Ok(texture);
        }

        if self.allocated_count() >= self.limit && !self.evict_one(backend) {
            warn!("pool: limit of {} textures reached", self.limit);
            return Err(CompositorError::PoolExhausted { limit: self.limit });
        }

        let texture = backend.create_texture(desc)?;
        self.allocations += 1;
        debug!(
            "pool: allocate {:?} {}x{} {:?} ({} owned)",
            texture,
            desc.width,
            desc.height,
            desc.format,
            self.allocated_count() + 1
        );
        self.mark_live(texture.clone(), *desc);
        Ok(texture)
    }

    /// Makes a live texture available for reuse.
    ///
    /// Returns `false` (and changes nothing) when the texture is not live.
    pub fn release(&mut self, texture: T) -> bool {
        match self.live.remove(&texture) {
            Some(desc) => {
                trace!("pool: release {:?}", texture);
                self.free.entry(desc).or_default().push(texture);
                true
            }
            None => {
                warn!("pool: ignoring release of {:?}, it is not live", texture);
                false
            }
        }
    }

    pub fn is_live(&self, texture: &T) -> bool {
        self.live.contains_key(texture)
    }

    pub fn desc_of(&self, texture: &T) -> Option<&TextureDesc> {
        self.live.get(texture)
    }

    /// Destroys every free texture.
    pub fn trim<B>(&mut self, backend: &mut B) -> usize
    where
        B: Backend<Texture = T>,
    {
        let mut destroyed = 0;
        for (_, list) in self.free.drain() {
            for texture in list {
                backend.destroy_texture(texture);
                destroyed += 1;
            }
        }
        if destroyed > 0 {
            debug!("pool: trimmed {destroyed} free textures");
        }
        destroyed
    }

    /// Destroys every texture the pool owns, live ones included.
    pub fn clear<B>(&mut self, backend: &mut B)
    where
        B: Backend<Texture = T>,
    {
        self.trim(backend);
        for (texture, _) in self.live.drain() {
            backend.destroy_texture(texture);
        }
        self.peak = 0;
    }

    fn mark_live(&mut self, texture: T, desc: TextureDesc) {
        self.live.insert(texture, desc);
        self.peak = self.peak.max(self.live.len());
    }

    fn evict_one<B>(&mut self, backend: &mut B) -> bool
    where
        B: Backend<Texture = T>,
    {
        let Some(key) = self.free.iter().find(|(_, l)| !l.is_empty()).map(|(k, _)| *k) else {
            return false;
        };
        let Some(list) = self.free.get_mut(&key) else {
            return false;
        };
        let evicted = list.pop();
        if list.is_empty() {
            self.free.remove(&key);
        }
        match evicted {
            Some(texture) => {
                debug!("pool: evict {:?} {}x{}", texture, key.width, key.height);
                backend.destroy_texture(texture);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::headless::HeadlessBackend;
    use crate::coords::Viewport;

    fn backend() -> HeadlessBackend {
        HeadlessBackend::new(Viewport::new(64.0, 64.0, 1.0))
    }

    #[test]
    fn released_texture_is_reused_for_same_key() {
        let mut b = backend();
        let mut pool = TexturePool::default();
        let desc = TextureDesc::new(32, 32);

        let a = pool.acquire(&mut b, &desc).unwrap();
        assert!(pool.release(a));
        let again = pool.acquire(&mut b, &desc).unwrap();

        assert_eq!(a, again);
        assert_eq!(pool.total_allocations(), 1);
    }

    #[test]
    fn different_key_allocates() {
        let mut b = backend();
        let mut pool = TexturePool::default();

        let a = pool.acquire(&mut b, &TextureDesc::new(32, 32)).unwrap();
        pool.release(a);
        let c = pool.acquire(&mut b, &TextureDesc::new(16, 16)).unwrap();

        assert_ne!(a, c);
        assert_eq!(pool.free_count_for(&TextureDesc::new(32, 32)), 1);
        assert_eq!(pool.live_count_for(&TextureDesc::new(16, 16)), 1);
    }

    #[test]
    fn double_release_is_ignored() {
        let mut b = backend();
        let mut pool = TexturePool::default();
        let desc = TextureDesc::new(8, 8);

        let a = pool.acquire(&mut b, &desc).unwrap();
        assert!(pool.release(a));
        assert!(!pool.release(a));
        assert_eq!(pool.free_count_for(&desc), 1);

        let x = pool.acquire(&mut b, &desc).unwrap();
        let y = pool.acquire(&mut b, &desc).unwrap();
        assert_ne!(x, y);
    }

    #[test]
    fn limit_evicts_free_then_fails() {
        let mut b = backend();
        let mut pool = TexturePool::with_limit(2);

        let a = pool.acquire(&mut b, &TextureDesc::new(1, 1)).unwrap();
        let _c = pool.acquire(&mut b, &TextureDesc::new(2, 2)).unwrap();
        pool.release(a);

        // Free 1x1 is evicted to make room.
        let _d = pool.acquire(&mut b, &TextureDesc::new(3, 3)).unwrap();
        assert_eq!(pool.allocated_count(), 2);
        assert!(!b.is_alive(a));

        let err = pool.acquire(&mut b, &TextureDesc::new(4, 4)).unwrap_err();
        assert!(matches!(err, CompositorError::PoolExhausted { limit: 2 }));
    }

    #[test]
    fn backend_failure_is_surfaced() {
        let mut b = backend();
        b.fail_next_allocations(1);
        let mut pool = TexturePool::default();

        let err = pool.acquire(&mut b, &TextureDesc::new(4, 4)).unwrap_err();
        assert!(matches!(err, CompositorError::Backend(_)));
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn trim_and_clear_destroy_textures() {
        let mut b = backend();
        let mut pool = TexturePool::default();
        let desc = TextureDesc::new(4, 4);

        let a = pool.acquire(&mut b, &desc).unwrap();
        let c = pool.acquire(&mut b, &desc).unwrap();
        pool.release(a);

        assert_eq!(pool.trim(&mut b), 1);
        assert!(!b.is_alive(a));
        assert!(b.is_alive(c));

        pool.clear(&mut b);
        assert!(!b.is_alive(c));
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn peak_tracks_simultaneous_live() {
        let mut b = backend();
        let mut pool = TexturePool::default();
        let desc = TextureDesc::new(4, 4);

        let a = pool.acquire(&mut b, &desc).unwrap();
        let c = pool.acquire(&mut b, &desc).unwrap();
        pool.release(a);
        pool.release(c);
        pool.reset_peak();
        assert_eq!(pool.peak_live(), 0);

        let a = pool.acquire(&mut b, &desc).unwrap();
        pool.release(a);
        let _ = pool.acquire(&mut b, &desc).unwrap();
        assert_eq!(pool.peak_live(), 1);
    }
}
