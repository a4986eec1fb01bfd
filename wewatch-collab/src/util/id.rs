use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crossbeam::atomic::AtomicCell;

pub type IdType = u64;
static ID_COUNTER: AtomicCell<IdType> = AtomicCell::new(1);

/// A process-unique identifier for in-memory things that never touch the database,
/// such as live connections.
pub struct Id<T> {
    value: IdType,
    kind: PhantomData<T>,
}

impl<T> Id<T> {
    pub fn new() -> Self {
        Self {
            value: ID_COUNTER.fetch_add(1),
            kind: PhantomData,
        }
    }

    pub fn value(&self) -> IdType {
        self.value
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state)
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}
impl<T> Eq for Id<T> {}

#[cfg(test)]
mod test {
    use super::Id;

    struct Thing;

    #[test]
    fn ids_are_unique() {
        let first = Id::<Thing>::new();
        let second = Id::<Thing>::new();

        assert_ne!(first, second, "two new ids never collide");
        assert!(second.value() > first.value(), "ids are monotonic");
    }
}
