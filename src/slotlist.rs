//! A dense slot table indexed by small integers, predecessor of the id
//! registry and still the right shape when ids double as array positions
//! (serialized scenes that reconstruct objects at known slots).

use std::fmt;

use crate::error::RefError;
use crate::object::ObjId;

/// Slots grow in fixed chunks so scattered `insert_at` calls don't reallocate
/// per id.
const RESERVE_CHUNK: usize = 20;

/// A vector of optional slots with integer ids equal to slot positions.
///
/// Unlike registry ids, slot ids *are* reused: removing an item vacates its
/// slot for the next insertion. `first_vacant` is a search hint, not an
/// invariant; it may point at an occupied slot and insertion scans forward
/// from it for a truly vacant one.
pub struct SlotList<T>
{
    slots: Vec<Option<T>>,
    first_vacant: usize,
}

impl<T> SlotList<T>
{
    pub fn new() -> Self
    {
        SlotList {
            slots: Vec::new(),
            first_vacant: 0,
        }
    }

    /// Place `item` in the lowest vacant slot and return its id.
    pub fn insert(&mut self, item: T) -> usize
    {
        let mut id = self.first_vacant;
        while id < self.slots.len() && self.slots[id].is_some() {
            id += 1;
        }
        if id >= self.slots.len() {
            self.reserve_through(id);
        }
        self.slots[id] = Some(item);
        self.first_vacant = id + 1;
        id
    }

    /// Place `item` at exactly `id`, growing the table as needed. Any
    /// previous occupant of the slot is dropped.
    pub fn insert_at(&mut self, id: usize, item: T)
    {
        if id >= self.slots.len() {
            self.reserve_through(id);
        }
        self.slots[id] = Some(item);
        if self.first_vacant == id {
            self.first_vacant = id + 1;
        }
    }

    fn reserve_through(&mut self, id: usize)
    {
        let mut len = self.slots.len();
        while len <= id {
            len += RESERVE_CHUNK;
        }
        self.slots.resize_with(len, || None);
    }

    /// Vacate `id` and hand back its occupant, if any.
    pub fn remove(&mut self, id: usize) -> Option<T>
    {
        let item = self.slots.get_mut(id)?.take();
        if item.is_some() && id < self.first_vacant {
            self.first_vacant = id;
        }
        item
    }

    pub fn is_valid_id(&self, id: usize) -> bool
    {
        self.slots.get(id).map_or(false, Option::is_some)
    }

    pub fn get(&self, id: usize) -> Option<&T>
    {
        self.slots.get(id)?.as_ref()
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut T>
    {
        self.slots.get_mut(id)?.as_mut()
    }

    pub fn get_checked(&self, id: usize) -> Result<&T, RefError>
    {
        self.get(id).ok_or(RefError::InvalidId(ObjId::from(id as u64)))
    }

    pub fn clear(&mut self)
    {
        self.slots.clear();
        self.first_vacant = 0;
    }

    /// Number of occupied slots. Linear; the table is expected to stay
    /// small.
    pub fn count(&self) -> usize
    {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Total slots allocated, occupied or not.
    pub fn capacity(&self) -> usize { self.slots.len() }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)>
    {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|item| (id, item)))
    }

    pub fn valid_ids(&self) -> impl Iterator<Item = usize> + '_
    {
        self.iter().map(|(id, _)| id)
    }
}

impl<T> Default for SlotList<T>
{
    fn default() -> Self { SlotList::new() }
}

impl<T> fmt::Debug for SlotList<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("SlotList")
            .field("count", &self.count())
            .field("capacity", &self.capacity())
            .field("first_vacant", &self.first_vacant)
            .finish()
    }
}
