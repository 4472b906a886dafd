use thiserror::Error;

use crate::object::ObjId;

/// Everything that can go wrong when resolving or constructing a reference.
///
/// The core never catches its own errors; every variant is meant to be
/// translated into a script-visible message at the command-dispatch boundary
/// of whatever host embeds this crate. A failed lookup has no side effects,
/// so the registry is always left consistent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefError
{
    /// The id was never issued, or its object has since been destroyed.
    #[error("attempted to access invalid object '{0}'")]
    InvalidId(ObjId),

    /// Tried to build a strong reference out of an empty soft reference.
    #[error("attempted to construct a ref<{0}> from an empty handle")]
    NullRef(&'static str),

    /// The target has declared itself unshareable; only weak access is legal.
    #[error("attempted to construct a ref<{0}> to an unshareable object")]
    Unshareable(&'static str),

    /// Checked access through a soft reference whose target is gone.
    #[error("attempted to access invalid object in soft_ref<{0}>")]
    InvalidSoftRef(&'static str),

    /// The id resolved, but the object's dynamic type was something else.
    #[error("dynamic cast from '{from}' to '{to}' failed")]
    BadCast
    {
        from: &'static str,
        to: &'static str,
    },

    /// `remove` was asked to drop an object that others still share.
    #[error("attempted to remove a shared object '{0}'")]
    SharedObject(ObjId),
}
