//! Single-writer, many-reader "latest value" cell.
//!
//! Writers replace the whole value behind a new `Arc`; readers clone the
//! current `Arc` and keep using it for as long as they like. The internal lock
//! is only held for the pointer copy, never across an await or a fetch.

use std::sync::Arc;

use tokio::sync::watch;

pub struct Published<T> {
    tx: watch::Sender<Option<Arc<T>>>,
}

impl<T> Published<T> {
    /// A cell with nothing published yet.
    pub fn empty() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn new(value: T) -> Self {
        let (tx, _) = watch::channel(Some(Arc::new(value)));
        Self { tx }
    }

    /// The most recently published value, if any.
    pub fn load(&self) -> Option<Arc<T>> {
        self.tx.borrow().clone()
    }

    /// Replaces the current value wholesale and returns the new one.
    pub fn publish(&self, value: T) -> Arc<T> {
        self.publish_with(|_| value)
    }

    /// Builds the next value from the current one and swaps it in, without
    /// another writer slipping in between.
    pub fn publish_with(&self, next: impl FnOnce(Option<&T>) -> T) -> Arc<T> {
        let mut installed = None;
        self.tx.send_modify(|current| {
            let value = Arc::new(next(current.as_deref()));
            installed = Some(Arc::clone(&value));
            *current = Some(value);
        });
        match installed {
            Some(value) => value,
            None => unreachable!("send_modify always runs its closure"),
        }
    }
}

impl<T> Default for Published<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cell_loads_none() {
        let cell: Published<u32> = Published::empty();
        assert!(cell.load().is_none());
    }

    #[test]
    fn test_old_readers_keep_their_value() {
        let cell = Published::new(vec![1, 2, 3]);
        let before = cell.load().unwrap();

        cell.publish(vec![4]);

        assert_eq!(*before, vec![1, 2, 3]);
        assert_eq!(*cell.load().unwrap(), vec![4]);
    }

    #[test]
    fn test_publish_with_sees_previous_value() {
        let cell = Published::new(1u64);
        let next = cell.publish_with(|prev| prev.copied().unwrap_or(0) + 1);
        assert_eq!(*next, 2);
        assert_eq!(*cell.load().unwrap(), 2);
    }
}
