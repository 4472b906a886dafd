use std::{cell::Cell, fmt, ptr::NonNull};

/// Shared strong/weak bookkeeping block for one managed object.
///
/// The block is allocated separately from the object so that weak holders can
/// keep consulting it after the object itself is gone: the owner flips
/// `owner_alive` on death, and the block only frees itself once the weak
/// count reaches zero. The object holds one weak count for its whole life,
/// so the block strictly outlives the object.
///
/// All counts are plain `Cell`s: the crate assumes one logical thread of
/// control, and none of its types are `Send` or `Sync`. A multi-threaded
/// host must replace these with atomics and put a lock around the registry
/// table; that is a required adaptation, not an oversight here.
pub(crate) struct RefCounts
{
    strong: Cell<i32>,
    weak: Cell<i32>,
    /// Outstanding checked-access guards. While nonzero, storage of a
    /// logically dead object is retained (`doomed`) for the last guard to
    /// reclaim.
    guards: Cell<i32>,
    owner_alive: Cell<bool>,
    unshareable: Cell<bool>,
    doomed: Cell<bool>,
}

impl RefCounts
{
    fn new() -> Self
    {
        RefCounts {
            strong: Cell::new(0),
            weak: Cell::new(0),
            guards: Cell::new(0),
            owner_alive: Cell::new(true),
            unshareable: Cell::new(false),
            doomed: Cell::new(false),
        }
    }

    pub(crate) fn is_owner_alive(&self) -> bool { self.owner_alive.get() }

    pub(crate) fn set_owner_dead(&self) { self.owner_alive.set(false); }

    pub(crate) fn is_unshareable(&self) -> bool { self.unshareable.get() }

    pub(crate) fn mark_unshareable(&self)
    {
        if self.strong.get() > 0 {
            panic!("can't mark an object unshareable once it has strong refs");
        }
        if self.unshareable.get() {
            panic!("object already marked unshareable");
        }
        self.unshareable.set(true);
    }

    pub(crate) fn is_doomed(&self) -> bool { self.doomed.get() }

    pub(crate) fn mark_doomed(&self) { self.doomed.set(true); }

    pub(crate) fn acquire_strong(&self)
    {
        if self.unshareable.get() {
            panic!("attempt to take a strong count on an unshareable object");
        }
        let n = self.strong.get();
        if n == i32::MAX {
            panic!("strong refcount overflow");
        }
        self.strong.set(n + 1);
    }

    /// Decrement the strong count and report the remainder. The caller owns
    /// the destroy-at-zero decision, since only it knows the pointee.
    pub(crate) fn release_strong(&self) -> i32
    {
        if self.unshareable.get() {
            panic!("attempt to drop a strong count on an unshareable object");
        }
        if self.weak.get() == 0 {
            panic!("weak refcount prematurely fell to 0");
        }
        let n = self.strong.get() - 1;
        if n < 0 {
            panic!("strong refcount already 0 in release_strong()");
        }
        self.strong.set(n);
        n
    }

    /// Decrement without any destruction side effect; the floating-reference
    /// policy, letting an object return to the zero-count state alive.
    pub(crate) fn release_strong_keep(&self)
    {
        let n = self.strong.get() - 1;
        if n < 0 {
            panic!("strong refcount already 0 in release_strong_keep()");
        }
        self.strong.set(n);
    }

    pub(crate) fn acquire_weak(&self)
    {
        let n = self.weak.get();
        if n == i32::MAX {
            panic!("weak refcount overflow");
        }
        self.weak.set(n + 1);
    }

    fn release_weak_count(&self) -> i32
    {
        let n = self.weak.get() - 1;
        if n < 0 {
            panic!("weak refcount already 0 in release_weak()");
        }
        self.weak.set(n);
        n
    }

    pub(crate) fn acquire_guard(&self)
    {
        self.guards.set(self.guards.get() + 1);
    }

    pub(crate) fn release_guard(&self) -> i32
    {
        let n = self.guards.get() - 1;
        if n < 0 {
            panic!("guard count already 0 in release_guard()");
        }
        self.guards.set(n);
        n
    }

    pub(crate) fn strong_count(&self) -> i32 { self.strong.get() }

    pub(crate) fn weak_count(&self) -> i32 { self.weak.get() }

    pub(crate) fn guard_count(&self) -> i32 { self.guards.get() }
}

impl Drop for RefCounts
{
    fn drop(&mut self)
    {
        if self.strong.get() > 0 {
            panic!("counts block destroyed before strong refcount fell to 0");
        }
        if self.weak.get() > 0 {
            panic!("counts block destroyed before weak refcount fell to 0");
        }
    }
}

impl fmt::Debug for RefCounts
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("RefCounts")
            .field("strong", &self.strong.get())
            .field("weak", &self.weak.get())
            .field("guards", &self.guards.get())
            .field("owner_alive", &self.owner_alive.get())
            .finish()
    }
}

pub(crate) fn alloc_counts() -> NonNull<RefCounts>
{
    unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(RefCounts::new()))) }
}

/// Drop one weak count; frees the block when the last weak holder lets go.
///
/// # Safety
///
/// `counts` must come from `alloc_counts` and the caller must own one weak
/// count on it. The pointer must not be used afterwards.
pub(crate) unsafe fn release_weak(counts: NonNull<RefCounts>)
{
    if counts.as_ref().release_weak_count() == 0 {
        if counts.as_ref().is_owner_alive() {
            panic!("weak refcount fell to 0 while the owner is still alive");
        }
        drop(Box::from_raw(counts.as_ptr()));
    }
}
