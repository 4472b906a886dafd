use std::{
    any::{type_name, Any},
    cell::Cell,
    fmt,
    ptr::NonNull,
};

use crate::counts::{alloc_counts, release_weak, RefCounts};

/// Integer handle issued by an [`ObjDb`](crate::objdb::ObjDb), used by
/// script code in place of a native pointer. Zero is never issued and acts
/// as the "no object" sentinel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ObjId(u64);

impl ObjId
{
    pub const NULL: ObjId = ObjId(0);

    pub fn is_null(self) -> bool { self.0 == 0 }

    pub fn as_u64(self) -> u64 { self.0 }
}

impl From<u64> for ObjId
{
    fn from(raw: u64) -> Self { ObjId(raw) }
}

impl fmt::Display for ObjId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// The intrusive base every managed type embeds: one counts block plus the
/// registry-assigned id.
///
/// A `Meta` is in one-to-one correspondence with its object, so it is
/// deliberately neither `Clone` nor `Copy`; embedding it makes the enclosing
/// type non-clonable too, which is exactly right for identity-carrying
/// objects.
///
/// ```
/// use refdb::{Meta, Object};
/// use std::any::Any;
///
/// #[derive(Default)]
/// struct Face { meta: Meta, eye_height: f64 }
///
/// impl Object for Face {
///     fn meta(&self) -> &Meta { &self.meta }
///     fn as_any(&self) -> &dyn Any { self }
/// }
/// ```
pub struct Meta
{
    counts: NonNull<RefCounts>,
    id: Cell<ObjId>,
}

impl Meta
{
    pub fn new() -> Self
    {
        let counts = alloc_counts();
        // The object itself holds one weak count, keeping the block alive
        // for as long as anyone could ask for it.
        unsafe { counts.as_ref() }.acquire_weak();
        Meta {
            counts,
            id: Cell::new(ObjId::NULL),
        }
    }

    /// Declare the object volatile: its lifetime is controlled by something
    /// other than reference counting, so strong references are refused from
    /// here on. Only legal while no strong references exist.
    pub fn mark_unshareable(&self)
    {
        self.counts().mark_unshareable();
    }

    /// The registry-assigned id; [`ObjId::NULL`] until first insertion.
    pub fn id(&self) -> ObjId { self.id.get() }

    pub(crate) fn set_id(&self, id: ObjId) { self.id.set(id); }

    pub(crate) fn counts(&self) -> &RefCounts { unsafe { self.counts.as_ref() } }

    pub(crate) fn counts_ptr(&self) -> NonNull<RefCounts> { self.counts }

    /// Current strong count, for tests and debug assertions; ordinary code
    /// should reason through the reference types instead.
    pub fn dbg_strong_count(&self) -> i32 { self.counts().strong_count() }

    /// Current weak count, for tests and debug assertions.
    pub fn dbg_weak_count(&self) -> i32 { self.counts().weak_count() }
}

impl Default for Meta
{
    fn default() -> Self { Meta::new() }
}

impl Drop for Meta
{
    fn drop(&mut self)
    {
        let counts = self.counts();

        // Destroying an object that still has strong holders would leave
        // every weak reference convinced it is alive; that is a logic error
        // in the owner, not something to limp past.
        if counts.strong_count() > 0 {
            panic!("object destroyed before its strong refcount fell to 0");
        }
        if counts.guard_count() > 0 {
            panic!("object destroyed while access guards are outstanding");
        }

        counts.set_owner_dead();
        unsafe { release_weak(self.counts) };
    }
}

impl fmt::Debug for Meta
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Meta")
            .field("id", &self.id.get())
            .field("counts", self.counts())
            .finish()
    }
}

/// Unsize a concrete object pointer into the type-erased form the registry
/// stores. A pure cast; never dereferences.
pub(crate) fn erase<T: Object>(master: NonNull<T>) -> NonNull<dyn Object>
{
    unsafe { NonNull::new_unchecked(master.as_ptr() as *mut dyn Object) }
}

/// Trait for objects managed through [`Ref`](crate::Ref) /
/// [`SoftRef`](crate::SoftRef) and registered in an
/// [`ObjDb`](crate::objdb::ObjDb).
///
/// Implementations embed a [`Meta`] and hand it back from `meta()`;
/// `as_any()` is the usual `{ self }` shim that enables checked downcasting
/// from a type-erased registry entry.
pub trait Object: Any
{
    fn meta(&self) -> &Meta;

    fn as_any(&self) -> &dyn Any;

    /// Runtime type label, used in error messages and logs. Proxy objects
    /// may override this to masquerade as the type they stand in for.
    fn typename(&self) -> &'static str { type_name::<Self>() }

    /// The registry-assigned id of this object.
    fn id(&self) -> ObjId { self.meta().id() }

    /// True when no single external holder has sole ownership: either more
    /// than one strong reference exists, or the object is unshareable (and
    /// so is its own only owner).
    fn is_shared(&self) -> bool
    {
        self.meta().counts().strong_count() > 1 || self.is_not_shareable()
    }

    fn is_unshared(&self) -> bool { !self.is_shared() }

    /// True for volatile objects, which refuse strong references outright.
    fn is_not_shareable(&self) -> bool { self.meta().counts().is_unshareable() }
}
