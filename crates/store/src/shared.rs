//! Shared Copy-on-Write Cells
//!
//! `Shared<T>` is an atomically reference-counted cell whose mutable
//! accessor detaches: if the cell is shared, the content is cloned and
//! this cell becomes sole owner before the mutable borrow is handed
//! out. Field vectors and time-sample time arrays use this so that
//! specs loaded from one field set stay deduplicated until edited.

use std::fmt;
use std::sync::Arc;

pub struct Shared<T>(Arc<T>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Shared<T> {
        Shared(Arc::new(value))
    }

    #[inline]
    pub fn get(&self) -> &T {
        &self.0
    }

    /// True if both cells share the same content allocation.
    pub fn ptr_eq(&self, other: &Shared<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// True if this cell is the sole owner of its content.
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.0) == 1
    }
}

impl<T: Clone> Shared<T> {
    /// Detach from any sharing, then borrow mutably.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        Arc::make_mut(&mut self.0)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared(self.0.clone())
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Shared::new(T::default())
    }
}

impl<T: PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharing_and_detach() {
        let mut a = Shared::new(vec![1, 2, 3]);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        a.get_mut().push(4);
        assert!(!a.ptr_eq(&b));
        assert_eq!(a.get(), &vec![1, 2, 3, 4]);
        assert_eq!(b.get(), &vec![1, 2, 3]);
    }

    #[test]
    fn test_unique() {
        let a = Shared::new(1);
        assert!(a.is_unique());
        let b = a.clone();
        assert!(!a.is_unique());
        drop(b);
        assert!(a.is_unique());
    }
}
