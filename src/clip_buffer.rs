use std::fmt;

/// Bounded, ordered buffer that hands its whole content out once full.
pub struct ClipBuffer<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T: Clone> Clone for ClipBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> fmt::Debug for ClipBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClipBuffer")
            .field("len", &self.items.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T> ClipBuffer<T> {
    #[inline]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            items: Vec::with_capacity(cap),
            capacity: cap,
        }
    }

    /// Appends `item`. When this fills the buffer the full clip is returned
    /// and the buffer is left empty.
    #[inline]
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.items.push(item);

        if self.is_full() {
            Some(self.drain())
        } else {
            None
        }
    }

    #[inline]
    pub fn drain(&mut self) -> Vec<T> {
        std::mem::replace(&mut self.items, Vec::with_capacity(self.capacity))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn clear(&mut self) {
        self.items.clear()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &'_ T> {
        self.items.iter()
    }
}
