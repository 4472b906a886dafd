//! The object registry: hands out integer ids for managed objects and
//! resolves them back, so script-level code can pass ids around where native
//! code passes references.

use std::{cell::Cell, cell::RefCell, collections::BTreeMap, fmt, ptr::NonNull};

use crate::error::RefError;
use crate::handle::WeakHandle;
use crate::object::{erase, ObjId, Object};
use crate::pointers::{downcast, RefType, RefVis, SoftRef};

/// A registry mapping ids to objects.
///
/// Ids are issued from a monotonically increasing counter and never reused,
/// so a live id names exactly one object ever, and a dead id stays dead.
/// Entries whose object has died are pruned lazily, on the lookup that
/// notices them.
///
/// The registry is an explicit context value: construct one at startup and
/// thread it to whatever creates objects. Nothing in this crate reaches for
/// a process-wide instance.
pub struct ObjDb
{
    table: RefCell<BTreeMap<ObjId, SoftRef<dyn Object>>>,
    next_id: Cell<u64>,
    default_vis: Cell<RefVis>,
}

impl ObjDb
{
    pub fn new() -> Self
    {
        ObjDb {
            table: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(1),
            default_vis: Cell::new(RefVis::Private),
        }
    }

    /// The visibility that [`RefVis::Default`] resolves to for this
    /// registry.
    pub fn default_vis(&self) -> RefVis { self.default_vis.get() }

    pub fn set_default_vis(&self, vis: RefVis)
    {
        if vis == RefVis::Default {
            panic!("the registry's default visibility must be a concrete one");
        }
        self.default_vis.set(vis);
    }

    fn resolve_vis(&self, vis: RefVis) -> RefVis
    {
        match vis {
            RefVis::Default => self.default_vis.get(),
            concrete => concrete,
        }
    }

    /// Assign an id (first contact only) and take up whatever reference the
    /// resolved visibility calls for.
    pub(crate) fn register(&self, obj: NonNull<dyn Object>, vis: RefVis)
    {
        self.assign_id(obj);
        let vis = self.resolve_vis(vis);
        log::trace!(
            "registering {} '{}' as {:?}",
            unsafe { obj.as_ref() }.typename(),
            unsafe { obj.as_ref() }.id(),
            vis
        );
        match vis {
            RefVis::Private => {}
            RefVis::Protected => self.insert_entry(obj, RefType::Weak),
            RefVis::Public => self.insert_entry(obj, RefType::Strong),
            RefVis::Default => unreachable!("default visibility already resolved"),
        }
    }

    fn assign_id(&self, obj: NonNull<dyn Object>)
    {
        let meta = unsafe { obj.as_ref() }.meta();
        if meta.id().is_null() {
            let id = ObjId::from(self.next_id.get());
            self.next_id.set(self.next_id.get() + 1);
            meta.set_id(id);
        }
    }

    fn insert_entry(&self, obj: NonNull<dyn Object>, tp: RefType)
    {
        let id = unsafe { obj.as_ref() }.id();
        let entry = SoftRef::from_handle(unsafe { WeakHandle::new(obj, tp) });
        let old;
        {
            let mut table = self.table.borrow_mut();
            if let Some(existing) = table.get(&id).and_then(SoftRef::peek_ptr) {
                if existing.cast::<()>() != obj.cast::<()>() {
                    panic!("a different object is already registered as '{id}'");
                }
            }
            old = table.insert(id, entry);
        }
        // The displaced entry (a visibility upgrade for the same object)
        // drops outside the table borrow.
        drop(old);
    }

    /// The single lookup primitive. A failed lookup has no effect beyond
    /// pruning the stale entry that caused it.
    pub(crate) fn get_checked(&self, id: ObjId) -> Result<NonNull<dyn Object>, RefError>
    {
        let mut table = self.table.borrow_mut();
        match table.get(&id) {
            Some(entry) => match entry.peek_ptr() {
                Some(obj) => Ok(obj),
                None => {
                    table.remove(&id);
                    Err(RefError::InvalidId(id))
                }
            },
            None => Err(RefError::InvalidId(id)),
        }
    }

    /// Does `id` currently resolve to a live object?
    pub fn is_valid_id(&self, id: ObjId) -> bool { self.get_checked(id).is_ok() }

    /// Number of currently valid entries.
    pub fn count(&self) -> usize
    {
        self.table.borrow().values().filter(|e| e.is_valid()).count()
    }

    /// Wrap `owner` in a strong registry entry and hand back its id.
    ///
    /// Refuses unshareable objects: the registry could only hold such an
    /// object weakly, and with no other owner in sight the id would be
    /// stale before the caller ever used it.
    pub fn insert<T: Object>(&self, owner: Box<T>) -> Result<ObjId, RefError>
    {
        if owner.is_not_shareable() {
            return Err(RefError::Unshareable(owner.typename()));
        }
        let obj = erase(NonNull::from(Box::leak(owner)));
        self.register(obj, RefVis::Public);
        Ok(unsafe { obj.as_ref() }.id())
    }

    /// Register a weak entry watching an externally owned object, and hand
    /// back its id. The entry goes stale when the owner drops the object.
    ///
    /// # Safety
    ///
    /// Same contract as [`SoftRef::watching`]: the object must stay at this
    /// address until it is dropped, so keep it behind a `Box` (or otherwise
    /// pinned) and never move it by value.
    pub unsafe fn insert_weak<T: Object>(&self, owner: &T) -> ObjId
    {
        let obj = erase(NonNull::from(owner));
        self.register(obj, RefVis::Protected);
        obj.as_ref().id()
    }

    /// Drop the registry's own reference to `id`, if it holds one. The
    /// object survives as long as anyone else holds it.
    pub fn release(&self, id: ObjId)
    {
        let victim = self.table.borrow_mut().remove(&id);
        // Dropped outside the table borrow: this may be the object's last
        // strong count, and its destructor may use the registry.
        drop(victim);
    }

    /// Drop the registry's reference to `id` with the intent of destroying
    /// the object; refuses if anything else still shares it.
    pub fn remove(&self, id: ObjId) -> Result<(), RefError>
    {
        let victim;
        {
            let mut table = self.table.borrow_mut();
            let entry = table.get(&id).ok_or(RefError::InvalidId(id))?;
            let obj = match entry.peek_ptr() {
                Some(obj) => obj,
                None => {
                    table.remove(&id);
                    return Err(RefError::InvalidId(id));
                }
            };
            if strong_beyond_entry(entry, obj) > 0 {
                return Err(RefError::SharedObject(id));
            }
            victim = table.remove(&id);
        }
        drop(victim);
        Ok(())
    }

    /// Drop every entry whose object nothing else holds; reports how many
    /// entries went.
    pub fn purge(&self) -> usize
    {
        let mut victims = Vec::new();
        {
            let mut table = self.table.borrow_mut();
            let doomed: Vec<ObjId> = table
                .iter()
                .filter(|(_, entry)| match entry.peek_ptr() {
                    Some(obj) => strong_beyond_entry(entry, obj) == 0,
                    None => true,
                })
                .map(|(&id, _)| id)
                .collect();
            for id in doomed {
                if let Some(entry) = table.remove(&id) {
                    victims.push(entry);
                }
            }
        }
        let n = victims.len();
        if n > 0 {
            log::trace!("purged {n} registry entries");
        }
        drop(victims);
        n
    }

    /// Purge to a fixpoint: objects released in one sweep may have been the
    /// only holders of others, freeing them for the next.
    pub fn clear(&self)
    {
        while self.purge() > 0 {}
    }

    /// Drop every entry regardless of sharing, for process shutdown.
    /// Objects still held externally survive until their holders let go.
    pub fn clear_on_exit(&self)
    {
        let victims = std::mem::take(&mut *self.table.borrow_mut());
        log::trace!("dropping {} registry entries at exit", victims.len());
        drop(victims);
    }

    /// Snapshot of all currently valid ids.
    pub fn ids(&self) -> Vec<ObjId>
    {
        self.table
            .borrow()
            .iter()
            .filter(|(_, entry)| entry.is_valid())
            .map(|(&id, _)| id)
            .collect()
    }

    /// Snapshot of all currently valid entries.
    pub fn objects(&self) -> Vec<SoftRef<dyn Object>>
    {
        self.table
            .borrow()
            .values()
            .filter(|entry| entry.is_valid())
            .cloned()
            .collect()
    }

    /// Snapshot of the valid entries whose dynamic type is `T`.
    pub fn objects_of_type<T: Object>(&self) -> Vec<SoftRef<T>>
    {
        let table = self.table.borrow();
        let mut out = Vec::new();
        for entry in table.values() {
            if let Some(obj) = entry.peek_ptr() {
                if let Ok(target) = downcast::<T>(obj) {
                    let handle = unsafe { WeakHandle::new(target, entry.ref_type()) };
                    out.push(SoftRef::from_handle(handle));
                }
            }
        }
        out
    }
}

/// Strong counts on `obj` not accounted for by the registry's own entry.
fn strong_beyond_entry(entry: &SoftRef<dyn Object>, obj: NonNull<dyn Object>) -> i32
{
    let own = if entry.ref_type() == RefType::Strong { 1 } else { 0 };
    unsafe { obj.as_ref() }.meta().counts().strong_count() - own
}

impl Default for ObjDb
{
    fn default() -> Self { ObjDb::new() }
}

impl fmt::Debug for ObjDb
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("ObjDb")
            .field("entries", &self.table.borrow().len())
            .field("next_id", &self.next_id.get())
            .field("default_vis", &self.default_vis.get())
            .finish()
    }
}
