pub mod cache;
pub mod handle;

use std::sync::atomic::{AtomicU64, Ordering};

pub use cache::AssetCache;
pub use handle::Handle;

use crate::renderer::{Geometry, Material, Texture};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique id for a CPU-side descriptor. GPU tables key on it, so a
/// cloned descriptor always gets a fresh one.
pub(crate) fn next_resource_id() -> u64 {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Descriptor storage owned by a scene. Drawables and materials reference entries by
/// [`Handle`].
pub struct Assets {
    pub geometries: AssetCache<Geometry>,
    pub materials: AssetCache<Material>,
    pub textures: AssetCache<Texture>,
}

impl Assets {
    pub fn new() -> Self {
        Self {
            geometries: AssetCache::new(),
            materials: AssetCache::new(),
            textures: AssetCache::new(),
        }
    }
}

impl Default for Assets {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_ids_are_unique() {
        let a = next_resource_id();
        let b = next_resource_id();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
