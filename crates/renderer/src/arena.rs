//! Append-only storage with index handles.

use std::marker::PhantomData;

/// Growable array that never removes entries, so an index stays valid for
/// the life of the arena.
#[derive(Debug)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Appends `item` and returns its index.
    pub fn push(&mut self, item: T) -> u32 {
        let index = self.items.len() as u32;
        self.items.push(item);
        index
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        self.items.get(index as usize)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        self.items.get_mut(index as usize)
    }

    pub fn contains(&self, index: u32) -> bool {
        (index as usize) < self.items.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed index into an [`Arena`].
///
/// `Tag` only distinguishes handle kinds at compile time.
pub struct Handle<Tag> {
    index: u32,
    _tag: PhantomData<fn() -> Tag>,
}

impl<Tag> Handle<Tag> {
    pub const fn from_index(index: u32) -> Self {
        Self {
            index,
            _tag: PhantomData,
        }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }
}

// Manual impls: derives would put bounds on `Tag`.
impl<Tag> Clone for Handle<Tag> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Tag> Copy for Handle<Tag> {}

impl<Tag> PartialEq for Handle<Tag> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<Tag> Eq for Handle<Tag> {}

impl<Tag> std::hash::Hash for Handle<Tag> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<Tag> std::fmt::Debug for Handle<Tag> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = std::any::type_name::<Tag>();
        let short = name.rsplit("::").next().unwrap_or(name);
        write!(f, "{}({})", short.trim_end_matches("Tag"), self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum ThingTag {}

    #[test]
    fn test_push_returns_sequential_indices() {
        let mut arena = Arena::new();
        assert_eq!(arena.push("a"), 0);
        assert_eq!(arena.push("b"), 1);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(1), Some(&"b"));
        assert_eq!(arena.get(2), None);
    }

    #[test]
    fn test_indices_survive_growth() {
        let mut arena = Arena::new();
        let first = arena.push(String::from("first"));
        for i in 0..1000 {
            arena.push(i.to_string());
        }
        assert_eq!(arena.get(first).map(String::as_str), Some("first"));
    }

    #[test]
    fn test_handle_equality_and_debug() {
        let a = Handle::<ThingTag>::from_index(3);
        let b = Handle::<ThingTag>::from_index(3);
        assert_eq!(a, b);
        assert_eq!(a.index(), 3);
        assert_eq!(format!("{:?}", a), "Thing(3)");
    }
}
