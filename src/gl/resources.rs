//! Keyed cache of device resources.
//!
//! Every data texture, colour map texture and vertex cache goes through the
//! same cycle: claim the entry for a key, compare its stored hash against a
//! hash of the current inputs, and regenerate in place when they differ.
//! Entries shared between consumers are reference counted; the last
//! [`ResourceCache::delete`] destroys the device objects.

use std::collections::HashMap;

use super::context::GlContext;

/// Something that owns device handles.
pub trait GlResource {
    fn destroy(&mut self, gl: &mut dyn GlContext);
}

struct Entry<R> {
    resource: R,
    refs: usize,
    hash: Option<u64>,
    generations: usize,
}

pub struct ResourceCache<R> {
    entries: HashMap<String, Entry<R>>,
}

impl<R> Default for ResourceCache<R> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<R: GlResource> ResourceCache<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The resource for `key`. Returns `None` while no context is current,
    /// so callers can defer their work to a later frame.
    pub fn get(&self, gl: &dyn GlContext, key: &str) -> Option<&R> {
        if !gl.is_current() {
            return None;
        }
        self.entries.get(key).map(|e| &e.resource)
    }

    pub fn get_mut(&mut self, gl: &dyn GlContext, key: &str) -> Option<&mut R> {
        if !gl.is_current() {
            return None;
        }
        self.entries.get_mut(key).map(|e| &mut e.resource)
    }

    /// Store `resource` under `key` with one reference. Replacing an
    /// existing entry requires `overwrite`; the old resource is destroyed.
    pub fn set(&mut self, gl: &mut dyn GlContext, key: &str, resource: R, overwrite: bool) {
        assert!(
            overwrite || !self.entries.contains_key(key),
            "resource {key} already exists"
        );
        if let Some(mut old) = self.entries.remove(key) {
            log::debug!("Replacing resource {key}");
            old.resource.destroy(gl);
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                resource,
                refs: 1,
                hash: None,
                generations: 0,
            },
        );
    }

    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Add a reference to an existing entry.
    pub fn acquire(&mut self, key: &str) -> bool {
        match self.entries.get_mut(key) {
            Some(e) => {
                e.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drop one reference to `key`, destroying the resource when none are
    /// left. Returns `true` if the resource was destroyed.
    pub fn delete(&mut self, gl: &mut dyn GlContext, key: &str) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return false;
        }
        if let Some(mut entry) = self.entries.remove(key) {
            log::debug!("Destroying resource {key}");
            entry.resource.destroy(gl);
        }
        true
    }

    /// Take a reference to `key`, creating the resource if it does not exist
    /// yet. Returns `None` while no context is current.
    pub fn claim(
        &mut self,
        gl: &mut dyn GlContext,
        key: &str,
        create: impl FnOnce(&mut dyn GlContext) -> R,
    ) -> Option<&mut R> {
        if !gl.is_current() {
            return None;
        }
        if !self.acquire(key) {
            log::debug!("Creating resource {key}");
            let resource = create(gl);
            self.set(gl, key, resource, false);
        }
        self.entries.get_mut(key).map(|e| &mut e.resource)
    }

    /// Regenerate the content of `key` in place if `hash` differs from the
    /// hash it was last generated with. Returns `true` if `regen` ran.
    pub fn refresh(
        &mut self,
        gl: &mut dyn GlContext,
        key: &str,
        hash: u64,
        regen: impl FnOnce(&mut R, &mut dyn GlContext),
    ) -> bool {
        if !gl.is_current() {
            return false;
        }
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        if entry.hash == Some(hash) {
            return false;
        }
        regen(&mut entry.resource, gl);
        entry.hash = Some(hash);
        entry.generations += 1;
        true
    }

    pub fn hash(&self, key: &str) -> Option<u64> {
        self.entries.get(key).and_then(|e| e.hash)
    }

    /// How many times the content of `key` has been generated.
    pub fn generation_count(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, |e| e.generations)
    }

    pub fn refs(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, |e| e.refs)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Destroy every entry regardless of its references.
    pub fn clear(&mut self, gl: &mut dyn GlContext) {
        for (key, mut entry) in self.entries.drain() {
            log::debug!("Destroying resource {key}");
            entry.resource.destroy(gl);
        }
    }
}

/// A cache entry held by one consumer. Remembers the key it claimed so the
/// reference can be moved when the key changes and dropped on destroy.
#[derive(Debug, Default)]
pub struct CacheSlot {
    key: Option<String>,
}

impl CacheSlot {
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Hold a reference to `key`, releasing any other key held before.
    /// Returns `false` while no context is current.
    pub fn hold<R: GlResource>(
        &mut self,
        cache: &mut ResourceCache<R>,
        gl: &mut dyn GlContext,
        key: String,
        create: impl FnOnce(&mut dyn GlContext) -> R,
    ) -> bool {
        if self.key.as_deref() == Some(key.as_str()) && cache.exists(&key) {
            return gl.is_current();
        }
        if cache.claim(gl, &key, create).is_none() {
            return false;
        }
        self.release(cache, gl);
        self.key = Some(key);
        true
    }

    pub fn release<R: GlResource>(&mut self, cache: &mut ResourceCache<R>, gl: &mut dyn GlContext) {
        if let Some(key) = self.key.take() {
            cache.delete(gl, &key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::context::{Filter, TexDims, TexFormat, TextureDesc, TextureId, Wrap};
    use crate::gl::software::SoftwareContext;

    struct Tex(TextureId);

    impl GlResource for Tex {
        fn destroy(&mut self, gl: &mut dyn GlContext) {
            gl.delete_texture(self.0);
        }
    }

    fn make(gl: &mut dyn GlContext) -> Tex {
        Tex(gl.create_texture(&TextureDesc {
            dims: TexDims::D1(4),
            format: TexFormat::Rgba8,
            filter: Filter::Nearest,
            wrap: Wrap::ClampToEdge,
        }))
    }

    #[test]
    fn get_is_none_without_context() {
        let mut gl = SoftwareContext::new(1, 1);
        let mut cache = ResourceCache::new();
        cache.claim(&mut gl, "a", make);
        assert!(cache.get(&gl, "a").is_some());
        gl.set_current(false);
        assert!(cache.get(&gl, "a").is_none());
        assert!(cache.claim(&mut gl, "b", make).is_none());
        assert!(!cache.exists("b"));
    }

    #[test]
    fn shared_entries_are_destroyed_by_last_reference() {
        let mut gl = SoftwareContext::new(1, 1);
        let mut cache = ResourceCache::new();
        cache.claim(&mut gl, "stack", make);
        cache.claim(&mut gl, "stack", make);
        assert_eq!(gl.stats().textures, 1);
        assert!(!cache.delete(&mut gl, "stack"));
        assert_eq!(gl.stats().textures, 1);
        assert!(cache.delete(&mut gl, "stack"));
        assert_eq!(gl.stats().textures, 0);
    }

    #[test]
    fn refresh_is_hash_gated() {
        let mut gl = SoftwareContext::new(1, 1);
        let mut cache = ResourceCache::new();
        cache.claim(&mut gl, "t", make);
        let mut runs = 0;
        assert!(cache.refresh(&mut gl, "t", 7, |_, _| runs += 1));
        assert!(!cache.refresh(&mut gl, "t", 7, |_, _| runs += 1));
        assert!(cache.refresh(&mut gl, "t", 8, |_, _| runs += 1));
        assert_eq!(runs, 2);
        assert_eq!(cache.generation_count("t"), 2);
    }

    #[test]
    #[should_panic]
    fn set_without_overwrite_panics() {
        let mut gl = SoftwareContext::new(1, 1);
        let mut cache = ResourceCache::new();
        let t = make(&mut gl);
        cache.set(&mut gl, "t", t, false);
        let t = make(&mut gl);
        cache.set(&mut gl, "t", t, false);
    }

    #[test]
    fn refused_overwrite_keeps_the_entry() {
        let mut gl = SoftwareContext::new(1, 1);
        let mut cache = ResourceCache::new();
        let t = make(&mut gl);
        cache.set(&mut gl, "t", t, false);
        let again = make(&mut gl);
        let refused = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cache.set(&mut gl, "t", again, false);
        }));
        assert!(refused.is_err());
        assert!(cache.exists("t"));
        assert_eq!(cache.refs("t"), 1);

        let t = make(&mut gl);
        cache.set(&mut gl, "t", t, true);
        assert!(cache.delete(&mut gl, "t"));
        assert_eq!(gl.stats().textures, 1);
    }

    #[test]
    fn slot_moves_between_keys() {
        let mut gl = SoftwareContext::new(1, 1);
        let mut cache = ResourceCache::new();
        let mut slot = CacheSlot::default();
        assert!(slot.hold(&mut cache, &mut gl, "a".into(), make));
        assert!(slot.hold(&mut cache, &mut gl, "a".into(), make));
        assert_eq!(cache.refs("a"), 1);
        assert!(slot.hold(&mut cache, &mut gl, "b".into(), make));
        assert!(!cache.exists("a"));
        slot.release(&mut cache, &mut gl);
        assert!(cache.is_empty());
        assert_eq!(gl.stats().textures, 0);
    }
}
