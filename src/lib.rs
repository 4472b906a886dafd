//! Reference-counted objects with integer identities, for embedding a
//! script language over a native object graph.
//!
//! Native code holds [`Ref`] (never-null, strong) and [`SoftRef`]
//! (possibly-invalid, strong or weak) references; script code holds plain
//! integer [`ObjId`]s and resolves them through an [`ObjDb`] registry.
//! Managed types embed a [`Meta`] block and implement [`Object`]; the
//! shared count block behind each object outlives it, so weak holders can
//! always ask whether their target is still there instead of dangling.
//!
//! Objects whose lifetime belongs to someone else entirely (a host toolkit
//! that destroys its own widgets, say) can be marked unshareable and then
//! only watched weakly, via [`SoftRef::watching`] or
//! [`ObjDb::insert_weak`].
//!
//! Everything here assumes one logical thread of control; none of the
//! types are `Send` or `Sync`.

pub(crate) mod counts;
pub(crate) mod handle;

pub mod error;
pub mod objdb;
pub mod object;
pub mod pointers;
pub mod slotlist;

pub use error::RefError;
pub use objdb::ObjDb;
pub use object::{Meta, ObjId, Object};
pub use pointers::{
    dyn_cast, dyn_cast_soft, FloatingRef, Guard, Ref, RefType, RefVis, SoftRef,
};
pub use slotlist::SlotList;

#[cfg(test)]
mod tests;
