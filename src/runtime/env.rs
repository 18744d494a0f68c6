//! Persistent, structurally shared lists.
//!
//! [`Env`] is addressed by de Bruijn index: index 0 is the most recent binding. Extending
//! returns a new handle sharing the old tail and unwinding returns a suffix, so every token
//! can hold its own view of the environment without copying, and no view is ever mutated.
//! The same list backs the return-frame [`Stack`] of tokens.

use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::orc::value::{Binding, Value};
use crate::runtime::graph::{Index, Node};

pub struct List<T>(Option<Arc<Cons<T>>>);

struct Cons<T> {
    head: T,
    tail: List<T>,
    depth: usize,
}

impl<T> List<T> {
    pub const fn new() -> Self {
        Self(None)
    }

    pub fn depth(&self) -> usize {
        self.0.as_ref().map_or(0, |cons| cons.depth)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn extend(&self, head: T) -> Self {
        Self(Some(Arc::new(Cons {
            head,
            tail: self.clone(),
            depth: self.depth() + 1,
        })))
    }

    pub fn lookup(&self, index: usize) -> Option<&T> {
        let mut current = self;
        for _ in 0..index {
            current = &current.0.as_ref()?.tail;
        }
        current.0.as_ref().map(|cons| &cons.head)
    }

    pub fn head(&self) -> Option<&T> {
        self.lookup(0)
    }

    /// Drops `n` frames. `None` if the list is shorter than `n`.
    pub fn unwind(&self, n: usize) -> Option<Self> {
        let mut current = self;
        for _ in 0..n {
            current = &current.0.as_ref()?.tail;
        }
        Some(current.clone())
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter(self)
    }
}

impl<T> Clone for List<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Long lists would otherwise drop recursively, one stack frame per cell.
impl<T> Drop for List<T> {
    fn drop(&mut self) {
        let mut next = self.0.take();
        while let Some(cons) = next {
            match Arc::try_unwrap(cons) {
                Ok(mut cons) => next = cons.tail.0.take(),
                Err(_) => break,
            }
        }
    }
}

impl<T: Debug> Debug for List<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

pub struct Iter<'a, T>(&'a List<T>);

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let cons = self.0 .0.as_ref()?;
        self.0 = &cons.tail;
        Some(&cons.head)
    }
}

pub type Env = List<Binding>;

impl Env {
    pub fn bind(&self, value: Value) -> Self {
        self.extend(Binding::Value(value))
    }
}

/// Where a non-tail call returns to.
#[derive(Clone, Debug)]
pub struct Frame {
    pub next: Index<Node>,
    pub env: Env,
}

pub type Stack = List<Frame>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_by_de_bruijn_index() {
        let list = List::new().extend(1).extend(2).extend(3);
        assert_eq!(list.lookup(0), Some(&3));
        assert_eq!(list.lookup(2), Some(&1));
        assert_eq!(list.lookup(3), None);
        assert_eq!(list.depth(), 3);
    }

    #[test]
    fn unwind_leaves_shared_views_intact() {
        let base = List::new().extend("outer");
        let inner = base.extend("x").extend("y");
        let popped = inner.unwind(2).unwrap();
        assert_eq!(popped.lookup(0), Some(&"outer"));
        assert_eq!(inner.lookup(0), Some(&"y"));
        assert_eq!(base.depth(), popped.depth());
        assert!(inner.unwind(4).is_none());
        assert_eq!(inner.iter().copied().collect::<Vec<_>>(), vec!["y", "x", "outer"]);
    }

    #[test]
    fn dropping_a_long_list_does_not_recurse() {
        let mut list = List::new();
        for i in 0..200_000 {
            list = list.extend(i);
        }
        assert_eq!(list.head(), Some(&199_999));
        drop(list);
    }
}
