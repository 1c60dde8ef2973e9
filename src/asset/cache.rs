use super::handle::Handle;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage for scene descriptors. Removed slots are reused with a bumped
/// generation so stale handles resolve to `None`.
pub struct AssetCache<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for AssetCache<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> AssetCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: T) -> Handle<T> {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(item);
            return Handle::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(item),
        });
        Handle::new(index, 0)
    }

    /// Get a reference to an asset by handle.
    /// Returns None if the handle is invalid or was removed.
    pub fn get(&self, h: Handle<T>) -> Option<&T> {
        self.slots
            .get(h.index())
            .filter(|slot| slot.generation == h.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, h: Handle<T>) -> Option<&mut T> {
        self.slots
            .get_mut(h.index())
            .filter(|slot| slot.generation == h.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, h: Handle<T>) -> bool {
        self.get(h).is_some()
    }

    /// Removes the asset and hands it back so the caller can dispose its GPU side.
    pub fn remove(&mut self, h: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(h.index())?;
        if slot.generation != h.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(h.index() as u32);
        self.len -= 1;
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Handle::new(index as u32, slot.generation), value))
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_invalid_handle_returns_none() {
        let cache: AssetCache<u32> = AssetCache::default();
        let fake_handle = Handle::new(999, 0);
        assert!(cache.get(fake_handle).is_none());
    }

    #[test]
    fn get_valid_handle_returns_some() {
        let mut cache = AssetCache::default();
        let handle = cache.insert(42u32);
        assert_eq!(cache.get(handle), Some(&42));
    }

    #[test]
    fn removed_handle_stays_dead_after_slot_reuse() {
        let mut cache = AssetCache::default();
        let first = cache.insert(1u32);
        assert_eq!(cache.remove(first), Some(1));
        let second = cache.insert(2u32);
        assert_eq!(first.index(), second.index());
        assert!(cache.get(first).is_none());
        assert_eq!(cache.get(second), Some(&2));
        assert_eq!(cache.len(), 1);
    }
}
