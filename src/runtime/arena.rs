//! Generational storage for the dynamic records of a run: tokens, groups, regions and
//! transactions.
//!
//! Records refer to each other by [`Id`] instead of by pointer, so the parent/child trees can
//! be torn down by a plain traversal and a stale reference (a worker returning to a token that
//! was killed in the meantime) is detected by its generation instead of dangling.

use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// A typed handle into a [`Pool<T>`].
pub struct Id<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    #[cfg(test)]
    pub(crate) fn from_raw(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64((u64::from(self.index) << 32) | u64::from(self.generation));
    }
}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pool<T> {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a record built from its own final id.
    pub fn insert_with(&mut self, f: impl FnOnce(Id<T>) -> T) -> Id<T> {
        self.len += 1;
        match self.free_head {
            Some(index) => {
                let generation = match &self.slots[index as usize] {
                    Slot::Vacant {
                        next_free,
                        generation,
                    } => {
                        self.free_head = *next_free;
                        *generation
                    }
                    Slot::Occupied { .. } => unreachable!("free list pointed to occupied slot"),
                };
                let id = Id {
                    index,
                    generation,
                    _marker: PhantomData,
                };
                self.slots[index as usize] = Slot::Occupied {
                    value: f(id),
                    generation,
                };
                id
            }
            None => {
                let index = u32::try_from(self.slots.len()).expect("pool overflow");
                let id = Id {
                    index,
                    generation: 0,
                    _marker: PhantomData,
                };
                self.slots.push(Slot::Occupied {
                    value: f(id),
                    generation: 0,
                });
                id
            }
        }
    }

    pub fn insert(&mut self, value: T) -> Id<T> {
        self.insert_with(|_| value)
    }

    pub fn get(&self, id: Id<T>) -> Option<&T> {
        match self.slots.get(id.index as usize)? {
            Slot::Occupied { value, generation } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        match self.slots.get_mut(id.index as usize)? {
            Slot::Occupied { value, generation } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, id: Id<T>) -> bool {
        self.get(id).is_some()
    }

    /// Removes a record; its slot comes back with a bumped generation so old ids stay dead.
    pub fn remove(&mut self, id: Id<T>) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == id.generation => {
                let next = Slot::Vacant {
                    next_free: self.free_head,
                    generation: generation.wrapping_add(1),
                };
                let Slot::Occupied { value, .. } = std::mem::replace(slot, next) else {
                    unreachable!()
                };
                self.free_head = Some(id.index);
                self.len -= 1;
                Some(value)
            }
            _ => None,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = Id<T>> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, .. } => Some(Id {
                    index: index as u32,
                    generation: *generation,
                    _marker: PhantomData,
                }),
                Slot::Vacant { .. } => None,
            })
    }
}
