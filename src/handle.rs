use std::{any::type_name, marker::PhantomData, ptr::NonNull};

use crate::counts;
use crate::error::RefError;
use crate::object::Object;
use crate::pointers::RefType;

/// Drop one strong count on `master`, destroying the object if it was the
/// last. When checked-access guards are outstanding the object dies
/// logically at once (ids and soft refs go invalid) but its storage is
/// retained for the last guard to reclaim.
///
/// # Safety
///
/// The caller must own one strong count on a live `master` and must not use
/// the pointer afterwards.
pub(crate) unsafe fn release_strong_ref<T: Object + ?Sized>(master: NonNull<T>)
{
    let counts_ptr = master.as_ref().meta().counts_ptr();
    let counts = counts_ptr.as_ref();

    if counts.release_strong() == 0 {
        counts.set_owner_dead();
        if counts.guard_count() == 0 {
            log::trace!(
                "destroying {} '{}'",
                master.as_ref().typename(),
                master.as_ref().id()
            );
            drop(Box::from_raw(master.as_ptr()));
        } else {
            log::trace!(
                "deferring destruction of {} '{}' ({} guards outstanding)",
                master.as_ref().typename(),
                master.as_ref().id(),
                counts.guard_count()
            );
            counts.mark_doomed();
        }
    }
}

/// What a strong handle does with its count on the way out.
pub(crate) trait UnrefPolicy
{
    /// # Safety
    ///
    /// The caller must own one strong count on a live `master`.
    unsafe fn unref<T: Object + ?Sized>(master: NonNull<T>);
}

/// Normal strong semantics: decrement, destroy at zero.
pub(crate) struct UnrefDrop;

impl UnrefPolicy for UnrefDrop
{
    unsafe fn unref<T: Object + ?Sized>(master: NonNull<T>)
    {
        release_strong_ref(master);
    }
}

/// Floating semantics: decrement only, never destroy, so the object may
/// return to the zero-count state alive.
pub(crate) struct UnrefKeep;

impl UnrefPolicy for UnrefKeep
{
    unsafe fn unref<T: Object + ?Sized>(master: NonNull<T>)
    {
        master.as_ref().meta().counts().release_strong_keep();
    }
}

/// Never-null strong RAII core shared by `Ref` and `FloatingRef`.
///
/// The only fallible operation is construction, which refuses unshareable
/// targets; from then on the held pointer is valid for the handle's whole
/// lifetime by construction.
pub(crate) struct Handle<T: Object + ?Sized, P: UnrefPolicy>
{
    master: NonNull<T>,
    _policy: PhantomData<P>,
}

impl<T: Object + ?Sized, P: UnrefPolicy> Handle<T, P>
{
    /// # Safety
    ///
    /// `master` must point at a live managed object.
    pub(crate) unsafe fn new(master: NonNull<T>) -> Result<Self, RefError>
    {
        if master.as_ref().is_not_shareable() {
            return Err(RefError::Unshareable(type_name::<T>()));
        }
        master.as_ref().meta().counts().acquire_strong();
        Ok(Handle {
            master,
            _policy: PhantomData,
        })
    }

    /// # Safety
    ///
    /// `master` must be live and shareable; callers hold an existing strong
    /// count proving both, so no check is repeated here.
    pub(crate) unsafe fn acquire(master: NonNull<T>) -> Self
    {
        master.as_ref().meta().counts().acquire_strong();
        Handle {
            master,
            _policy: PhantomData,
        }
    }

    pub(crate) fn get(&self) -> NonNull<T> { self.master }
}

impl<T: Object + ?Sized, P: UnrefPolicy> Clone for Handle<T, P>
{
    fn clone(&self) -> Self
    {
        // A live handle implies the target is alive and shareable, so
        // re-acquiring cannot fail.
        unsafe { self.master.as_ref() }.meta().counts().acquire_strong();
        Handle {
            master: self.master,
            _policy: PhantomData,
        }
    }
}

impl<T: Object + ?Sized, P: UnrefPolicy> Drop for Handle<T, P>
{
    fn drop(&mut self)
    {
        unsafe { P::unref(self.master) }
    }
}

/// The binding state of a `WeakHandle`, spelled out as an enum rather than
/// encoded in a pointer's nullness: a handle is in exactly one of these
/// modes for its whole life.
pub(crate) enum Grip<T: Object + ?Sized>
{
    /// Never bound to anything.
    Empty,
    /// Strong count held directly on the object; the fast path when weak
    /// semantics aren't actually needed.
    Direct(NonNull<T>),
    /// Weak count held on the shared counts block, which outlives the
    /// object and records whether the owner is still alive.
    Shared(NonNull<T>, NonNull<counts::RefCounts>),
}

/// Possibly-invalid RAII core behind `SoftRef`.
///
/// Chooses its grip at construction: callers asking for weak semantics, and
/// any target that is unshareable, get the `Shared` path; everything else
/// gets a plain strong count. The choice is permanent for this handle.
pub(crate) struct WeakHandle<T: Object + ?Sized>
{
    grip: Grip<T>,
}

impl<T: Object + ?Sized> WeakHandle<T>
{
    pub(crate) fn empty() -> Self { WeakHandle { grip: Grip::Empty } }

    /// # Safety
    ///
    /// `master` must point at a live managed object.
    pub(crate) unsafe fn new(master: NonNull<T>, tp: RefType) -> Self
    {
        let meta = master.as_ref().meta();
        let grip = if tp == RefType::Weak || meta.counts().is_unshareable() {
            let counts = meta.counts_ptr();
            counts.as_ref().acquire_weak();
            Grip::Shared(master, counts)
        } else {
            meta.counts().acquire_strong();
            Grip::Direct(master)
        };
        WeakHandle { grip }
    }

    pub(crate) fn is_valid(&self) -> bool
    {
        match self.grip {
            Grip::Empty => false,
            Grip::Direct(_) => true,
            Grip::Shared(_, counts) => unsafe { counts.as_ref() }.is_owner_alive(),
        }
    }

    /// Checked access: never hands back a pointer to a dead or absent
    /// object.
    pub(crate) fn get(&self) -> Result<NonNull<T>, RefError>
    {
        match self.grip {
            Grip::Empty => Err(RefError::NullRef(type_name::<T>())),
            Grip::Direct(master) => Ok(master),
            Grip::Shared(master, counts) => {
                if unsafe { counts.as_ref() }.is_owner_alive() {
                    Ok(master)
                } else {
                    Err(RefError::InvalidSoftRef(type_name::<T>()))
                }
            }
        }
    }

    /// Non-throwing access: `None` when invalid.
    pub(crate) fn peek(&self) -> Option<NonNull<T>> { self.get().ok() }

    pub(crate) fn ref_type(&self) -> RefType
    {
        match self.grip {
            Grip::Shared(..) => RefType::Weak,
            _ => RefType::Strong,
        }
    }
}

impl<T: Object> WeakHandle<T>
{
    /// Clone into the type-erased form used by the registry table.
    pub(crate) fn erased(&self) -> WeakHandle<dyn Object>
    {
        let grip = match self.grip {
            Grip::Empty => Grip::Empty,
            Grip::Direct(master) => {
                unsafe { master.as_ref() }.meta().counts().acquire_strong();
                Grip::Direct(crate::object::erase(master))
            }
            // The master pointer may already be dangling here; erasing it is
            // a pure cast and the counts block is what gets consulted.
            Grip::Shared(master, counts) => {
                unsafe { counts.as_ref() }.acquire_weak();
                Grip::Shared(crate::object::erase(master), counts)
            }
        };
        WeakHandle { grip }
    }
}

impl<T: Object + ?Sized> Clone for WeakHandle<T>
{
    fn clone(&self) -> Self
    {
        let grip = match self.grip {
            Grip::Empty => Grip::Empty,
            Grip::Direct(master) => {
                unsafe { master.as_ref() }.meta().counts().acquire_strong();
                Grip::Direct(master)
            }
            Grip::Shared(master, counts) => {
                unsafe { counts.as_ref() }.acquire_weak();
                Grip::Shared(master, counts)
            }
        };
        WeakHandle { grip }
    }
}

impl<T: Object + ?Sized> Drop for WeakHandle<T>
{
    fn drop(&mut self)
    {
        match self.grip {
            Grip::Empty => {}
            Grip::Direct(master) => unsafe { release_strong_ref(master) },
            Grip::Shared(_, counts) => unsafe { counts::release_weak(counts) },
        }
    }
}
