//! Fixed-capacity circular storage keyed by SN or COUNT
//!
//! Used for the PDCP Tx/Rx windows and the RLC Tx/Rx windows. The slot of a
//! key is `key % capacity`; each slot remembers the key it was added with so
//! that a later key aliasing the same slot can be told apart.

use tracing::error;

#[derive(Debug)]
pub struct SduWindow<T> {
    slots: Vec<Option<(u32, T)>>,
    len: usize,
}

impl<T> SduWindow<T> {
    /// Create a window with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity.max(1), || None);
        Self { slots, len: 0 }
    }

    fn slot(&self, key: u32) -> usize {
        key as usize % self.slots.len()
    }

    /// Store `value` under `key`. An entry with a different key in the same slot is replaced.
    pub fn insert(&mut self, key: u32, value: T) -> &mut T {
        let idx = self.slot(key);
        match self.slots[idx].take() {
            Some((old, _)) => {
                if old != key {
                    error!("SDU window slot {} held key {} while adding key {}", idx, old, key);
                }
            }
            None => self.len += 1,
        }
        let (_, value) = self.slots[idx].insert((key, value));
        value
    }

    /// True if `key` itself is stored
    pub fn has_sn(&self, key: u32) -> bool {
        matches!(&self.slots[self.slot(key)], Some((k, _)) if *k == key)
    }

    /// Key currently occupying the slot of `key`, if any
    pub fn occupant(&self, key: u32) -> Option<u32> {
        self.slots[self.slot(key)].as_ref().map(|(k, _)| *k)
    }

    pub fn get(&self, key: u32) -> Option<&T> {
        match &self.slots[self.slot(key)] {
            Some((k, v)) if *k == key => Some(v),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: u32) -> Option<&mut T> {
        let idx = self.slot(key);
        match &mut self.slots[idx] {
            Some((k, v)) if *k == key => Some(v),
            _ => None,
        }
    }

    /// Remove and return the entry stored under `key`
    pub fn remove_sn(&mut self, key: u32) -> Option<T> {
        if !self.has_sn(key) {
            return None;
        }
        let idx = self.slot(key);
        self.len -= 1;
        self.slots[idx].take().map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when every slot is occupied
    pub fn full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupied entries in slot order (not key order)
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots.iter().filter_map(|s| s.as_ref().map(|(k, v)| (*k, v)))
    }
}

impl<T: Default> SduWindow<T> {
    /// Add a default entry under `key` and return it
    pub fn add_sn(&mut self, key: u32) -> &mut T {
        self.insert(key, T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove() {
        let mut window: SduWindow<u32> = SduWindow::new(8);
        *window.add_sn(3) = 30;
        assert!(window.has_sn(3));
        assert!(!window.has_sn(11));
        assert_eq!(window.occupant(11), Some(3));
        assert_eq!(window.get(3), Some(&30));
        assert_eq!(window.len(), 1);
        assert_eq!(window.remove_sn(11), None);
        assert_eq!(window.remove_sn(3), Some(30));
        assert!(window.is_empty());
    }

    #[test]
    fn test_aliasing_key_replaces_entry() {
        let mut window: SduWindow<&str> = SduWindow::new(4);
        window.insert(1, "old");
        window.insert(5, "new");
        assert_eq!(window.len(), 1);
        assert!(!window.has_sn(1));
        assert_eq!(window.get(5), Some(&"new"));
    }

    #[test]
    fn test_full_and_clear() {
        let mut window: SduWindow<u8> = SduWindow::new(2);
        window.add_sn(0);
        window.add_sn(1);
        assert!(window.full());
        assert_eq!(window.iter().count(), 2);
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.capacity(), 2);
    }
}
