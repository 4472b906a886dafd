//! The user-facing reference types: [`Ref`] for never-null strong access,
//! [`SoftRef`] for possibly-invalid access with [`Guard`]-checked reads, and
//! [`FloatingRef`] for borrow-scoped pinning of an object that may still be
//! at count zero.

use std::{
    any::type_name,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    ops::Deref,
    ptr::NonNull,
};

use crate::counts::{self, RefCounts};
use crate::error::RefError;
use crate::handle::{Handle, UnrefDrop, UnrefKeep, WeakHandle};
use crate::object::{erase, ObjId, Object};
use crate::objdb::ObjDb;

/// Strength of the hold a [`SoftRef`] keeps on its target.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RefType
{
    /// Participate in ownership; the target cannot die under the reference.
    Strong,
    /// Observe only; the target may die, and the reference notices.
    Weak,
}

/// How visible a newly wrapped object is through its registry.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum RefVis
{
    /// Resolve through the registry's configured default visibility.
    #[default]
    Default,
    /// The registry keeps no reference at all; the object is reachable only
    /// through the references its creator hands out.
    Private,
    /// The registry keeps a weak entry: the id resolves while the object
    /// lives elsewhere, and goes stale with it.
    Protected,
    /// The registry keeps a strong entry of its own; the id resolves until
    /// the entry is explicitly released.
    Public,
}

/// Resolve the dynamic type behind a registry entry, or report what it
/// actually was.
pub(crate) fn downcast<T: Object>(obj: NonNull<dyn Object>) -> Result<NonNull<T>, RefError>
{
    let r = unsafe { obj.as_ref() };
    match r.as_any().downcast_ref::<T>() {
        Some(t) => Ok(NonNull::from(t)),
        None => Err(RefError::BadCast {
            from: r.typename(),
            to: type_name::<T>(),
        }),
    }
}

/// A never-null strong reference.
///
/// Holding a `Ref<T>` is proof the object is alive, so access never fails;
/// every fallible step (unshareable targets, stale ids, type mismatches)
/// happens at construction. Equality, ordering and hashing all go by object
/// identity, not contents.
pub struct Ref<T: Object + ?Sized>
{
    handle: Handle<T, UnrefDrop>,
}

impl<T: Object> Ref<T>
{
    /// Take ownership of `owner` and register it with `db` under `vis`.
    ///
    /// Fails only for unshareable objects, in which case the box is dropped
    /// and nothing leaks.
    pub fn new(db: &ObjDb, owner: Box<T>, vis: RefVis) -> Result<Self, RefError>
    {
        if owner.is_not_shareable() {
            return Err(RefError::Unshareable(type_name::<T>()));
        }
        let master = NonNull::from(Box::leak(owner));
        let handle = unsafe { Handle::new(master) }?;
        db.register(erase(master), vis);
        Ok(Ref { handle })
    }

    /// Re-acquire a strong reference from an id.
    pub fn from_id(db: &ObjDb, id: ObjId) -> Result<Self, RefError>
    {
        let target = downcast::<T>(db.get_checked(id)?)?;
        let handle = unsafe { Handle::new(target) }?;
        Ok(Ref { handle })
    }

    /// Upcast to the type-erased form.
    pub fn as_obj(&self) -> Ref<dyn Object>
    {
        Ref {
            handle: unsafe { Handle::acquire(erase(self.handle.get())) },
        }
    }
}

impl<T: Object + ?Sized> Ref<T>
{
    pub fn get(&self) -> &T { unsafe { self.handle.get().as_ref() } }

    pub fn id(&self) -> ObjId { self.get().id() }

    /// Do the two references name the very same object?
    pub fn ptr_eq(&self, other: &Ref<T>) -> bool { self.addr() == other.addr() }

    fn addr(&self) -> usize { self.handle.get().cast::<()>().as_ptr() as usize }
}

/// Checked downcast between strong references; the target stays alive
/// across the cast no matter the outcome.
pub fn dyn_cast<To: Object>(from: &Ref<dyn Object>) -> Result<Ref<To>, RefError>
{
    let target = downcast::<To>(from.handle.get())?;
    Ok(Ref {
        handle: unsafe { Handle::acquire(target) },
    })
}

impl<T: Object + ?Sized> Deref for Ref<T>
{
    type Target = T;

    fn deref(&self) -> &T { self.get() }
}

impl<T: Object + ?Sized> Clone for Ref<T>
{
    fn clone(&self) -> Self
    {
        Ref {
            handle: self.handle.clone(),
        }
    }
}

impl<T: Object + ?Sized> PartialEq for Ref<T>
{
    fn eq(&self, other: &Self) -> bool { self.addr() == other.addr() }
}

impl<T: Object + ?Sized> Eq for Ref<T> {}

impl<T: Object + ?Sized> PartialOrd for Ref<T>
{
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering>
    {
        Some(self.cmp(other))
    }
}

impl<T: Object + ?Sized> Ord for Ref<T>
{
    fn cmp(&self, other: &Self) -> std::cmp::Ordering { self.addr().cmp(&other.addr()) }
}

impl<T: Object + ?Sized> Hash for Ref<T>
{
    fn hash<H: Hasher>(&self, state: &mut H) { self.addr().hash(state) }
}

impl<T: Object + ?Sized> TryFrom<&SoftRef<T>> for Ref<T>
{
    type Error = RefError;

    /// Promote a soft reference; fails if it is empty, dead, or names an
    /// unshareable object.
    fn try_from(soft: &SoftRef<T>) -> Result<Self, RefError>
    {
        let master = soft.handle.get()?;
        let handle = unsafe { Handle::new(master) }?;
        Ok(Ref { handle })
    }
}

impl<T: Object + ?Sized> fmt::Debug for Ref<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "Ref<{}>('{}')", self.get().typename(), self.id())
    }
}

/// A possibly-invalid reference.
///
/// Starts either empty (never bound) or bound to an object; a bound weak
/// reference goes invalid when its target dies, observed lazily at the next
/// access and never reversed. All access is checked and yields a [`Guard`].
pub struct SoftRef<T: Object + ?Sized>
{
    handle: WeakHandle<T>,
}

impl<T: Object> SoftRef<T>
{
    /// Take ownership of `owner` and register it with `db` under `vis`,
    /// holding it with the requested strength. Never fails: if once the
    /// handle and registry entry are in place nothing in the world holds a
    /// strong count, the object is destroyed on the spot and the returned
    /// reference is born invalid.
    pub fn new(db: &ObjDb, owner: Box<T>, tp: RefType, vis: RefVis) -> Self
    {
        let master = NonNull::from(Box::leak(owner));
        let handle = unsafe { WeakHandle::new(master, tp) };
        db.register(erase(master), vis);
        if unsafe { master.as_ref() }.meta().counts().strong_count() == 0 {
            log::trace!(
                "destroying unowned {} '{}' at birth",
                unsafe { master.as_ref() }.typename(),
                unsafe { master.as_ref() }.id()
            );
            unsafe { drop(Box::from_raw(master.as_ptr())) };
        }
        SoftRef { handle }
    }

    /// Re-acquire a reference from an id. An id that no longer resolves
    /// yields an *empty* soft reference, not an error; only a live object of
    /// the wrong type is reported.
    pub fn from_id(db: &ObjDb, id: ObjId, tp: RefType) -> Result<Self, RefError>
    {
        let obj = match db.get_checked(id) {
            Ok(obj) => obj,
            Err(_) => return Ok(SoftRef::default()),
        };
        let target = downcast::<T>(obj)?;
        Ok(SoftRef {
            handle: unsafe { WeakHandle::new(target, tp) },
        })
    }

    /// Weakly observe an object owned outside any registry, typically one
    /// whose lifetime is dictated by a host toolkit. The reference goes
    /// invalid when the owner drops the object; dropping the owner while
    /// guards are outstanding is a logic error and panics.
    ///
    /// # Safety
    ///
    /// Validity is tracked through the counts block, not the borrow, so the
    /// object must stay at this address until it is dropped: keep it behind
    /// a `Box` (or otherwise pinned) and never move it by value. A moved
    /// owner leaves the reference pointing at its old location while still
    /// reporting valid.
    pub unsafe fn watching(owner: &T) -> Self
    {
        SoftRef {
            handle: WeakHandle::new(NonNull::from(owner), RefType::Weak),
        }
    }

    /// Upcast to the type-erased form.
    pub fn as_obj(&self) -> SoftRef<dyn Object>
    {
        SoftRef {
            handle: self.handle.erased(),
        }
    }
}

impl<T: Object + ?Sized> SoftRef<T>
{
    pub(crate) fn from_handle(handle: WeakHandle<T>) -> Self { SoftRef { handle } }

    pub fn is_valid(&self) -> bool { self.handle.is_valid() }

    pub fn is_invalid(&self) -> bool { !self.is_valid() }

    /// Checked access. The guard keeps the object's storage in place for as
    /// long as it lives, even if the object dies logically in the meantime.
    pub fn get(&self) -> Result<Guard<'_, T>, RefError>
    {
        let master = self.handle.get()?;
        Ok(unsafe { Guard::new(master) })
    }

    /// Non-throwing access; `None` when empty or dead.
    pub fn get_weak(&self) -> Option<Guard<'_, T>> { self.get().ok() }

    /// The target's id, or [`ObjId::NULL`] when the reference is empty or
    /// dead.
    pub fn id(&self) -> ObjId
    {
        match self.handle.peek() {
            Some(master) => unsafe { master.as_ref() }.id(),
            None => ObjId::NULL,
        }
    }

    pub fn ref_type(&self) -> RefType { self.handle.ref_type() }

    pub(crate) fn peek_ptr(&self) -> Option<NonNull<T>> { self.handle.peek() }
}

/// Checked downcast between soft references; a mismatch (or a dead source)
/// yields an empty soft reference rather than an error.
pub fn dyn_cast_soft<To: Object>(from: &SoftRef<dyn Object>) -> SoftRef<To>
{
    match from.handle.peek() {
        Some(obj) => match downcast::<To>(obj) {
            Ok(target) => SoftRef {
                handle: unsafe { WeakHandle::new(target, from.ref_type()) },
            },
            Err(_) => SoftRef::default(),
        },
        None => SoftRef::default(),
    }
}

impl<T: Object + ?Sized> Default for SoftRef<T>
{
    /// Valid-but-empty; touches no counts block.
    fn default() -> Self
    {
        SoftRef {
            handle: WeakHandle::empty(),
        }
    }
}

impl<T: Object + ?Sized> Clone for SoftRef<T>
{
    fn clone(&self) -> Self
    {
        SoftRef {
            handle: self.handle.clone(),
        }
    }
}

impl<T: Object + ?Sized> From<&Ref<T>> for SoftRef<T>
{
    fn from(r: &Ref<T>) -> Self
    {
        SoftRef {
            handle: unsafe { WeakHandle::new(r.handle.get(), RefType::Strong) },
        }
    }
}

impl<T: Object + ?Sized> fmt::Debug for SoftRef<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.handle.peek() {
            Some(master) => {
                let obj = unsafe { master.as_ref() };
                write!(f, "SoftRef<{}>('{}')", obj.typename(), obj.id())
            }
            None => write!(f, "SoftRef<{}>(invalid)", type_name::<T>()),
        }
    }
}

/// Proof of validity returned by [`SoftRef::get`] and [`SoftRef::get_weak`].
///
/// Holds one guard count and one weak count on the target's block: while any
/// guard lives the object's storage cannot be freed, though the object may
/// still die logically (its id goes stale, other soft references turn
/// invalid). The last guard of an object that died this way performs the
/// deferred reclamation.
pub struct Guard<'a, T: Object + ?Sized>
{
    master: NonNull<T>,
    counts: NonNull<RefCounts>,
    _marker: PhantomData<&'a T>,
}

impl<T: Object + ?Sized> Guard<'_, T>
{
    /// # Safety
    ///
    /// `master` must point at a live managed object.
    unsafe fn new(master: NonNull<T>) -> Self
    {
        let counts = master.as_ref().meta().counts_ptr();
        counts.as_ref().acquire_guard();
        counts.as_ref().acquire_weak();
        Guard {
            master,
            counts,
            _marker: PhantomData,
        }
    }
}

impl<T: Object + ?Sized> Deref for Guard<'_, T>
{
    type Target = T;

    fn deref(&self) -> &T { unsafe { self.master.as_ref() } }
}

impl<T: Object + ?Sized> Clone for Guard<'_, T>
{
    fn clone(&self) -> Self
    {
        let counts = unsafe { self.counts.as_ref() };
        counts.acquire_guard();
        counts.acquire_weak();
        Guard {
            master: self.master,
            counts: self.counts,
            _marker: PhantomData,
        }
    }
}

impl<T: Object + ?Sized> Drop for Guard<'_, T>
{
    fn drop(&mut self)
    {
        unsafe {
            let counts = self.counts.as_ref();
            if counts.release_guard() == 0 && counts.is_doomed() {
                log::trace!(
                    "reclaiming deferred {} '{}'",
                    self.master.as_ref().typename(),
                    self.master.as_ref().id()
                );
                drop(Box::from_raw(self.master.as_ptr()));
            }
            counts::release_weak(self.counts);
        }
    }
}

/// Borrow-scoped strong pin.
///
/// Takes one strong count for the duration of the borrow and gives it back
/// without the destroy-at-zero step, so an object that arrived with no
/// owners leaves the same way, still alive. Used to keep an object stable
/// across a call that might otherwise reap it. Deliberately not clonable.
pub struct FloatingRef<'a, T: Object + ?Sized>
{
    handle: Handle<T, UnrefKeep>,
    _marker: PhantomData<&'a T>,
}

impl<'a, T: Object + ?Sized> FloatingRef<'a, T>
{
    /// Pin `target` for the borrow's duration; refuses unshareable objects.
    pub fn new(target: &'a T) -> Result<Self, RefError>
    {
        let handle = unsafe { Handle::new(NonNull::from(target)) }?;
        Ok(FloatingRef {
            handle,
            _marker: PhantomData,
        })
    }

    pub fn get(&self) -> &T { unsafe { self.handle.get().as_ref() } }
}

impl<T: Object + ?Sized> Deref for FloatingRef<'_, T>
{
    type Target = T;

    fn deref(&self) -> &T { self.get() }
}
