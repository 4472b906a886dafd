use std::any::Any;
use std::cell::Cell;

use crate::error::RefError;
use crate::object::{Meta, ObjId, Object};
use crate::objdb::ObjDb;
use crate::pointers::{dyn_cast, dyn_cast_soft, FloatingRef, Ref, RefType, RefVis, SoftRef};
use crate::slotlist::SlotList;

fn init_logging()
{
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Managed test object that bumps a leaked counter cell when destroyed.
struct Tracked
{
    meta: Meta,
    drops: &'static Cell<i32>,
    value: i32,
}

impl Tracked
{
    fn new(value: i32) -> (Box<Tracked>, &'static Cell<i32>)
    {
        let drops: &'static Cell<i32> = Box::leak(Box::new(Cell::new(0)));
        let obj = Box::new(Tracked {
            meta: Meta::new(),
            drops,
            value,
        });
        (obj, drops)
    }

    fn volatile(value: i32) -> (Box<Tracked>, &'static Cell<i32>)
    {
        let (obj, drops) = Tracked::new(value);
        obj.meta.mark_unshareable();
        (obj, drops)
    }
}

impl Object for Tracked
{
    fn meta(&self) -> &Meta { &self.meta }

    fn as_any(&self) -> &dyn Any { self }
}

impl Drop for Tracked
{
    fn drop(&mut self) { self.drops.set(self.drops.get() + 1); }
}

#[derive(Default)]
struct Other
{
    meta: Meta,
}

impl Object for Other
{
    fn meta(&self) -> &Meta { &self.meta }

    fn as_any(&self) -> &dyn Any { self }
}

#[test]
fn strong_refs_keep_the_object_alive()
{
    init_logging();
    let db = ObjDb::new();
    let (obj, drops) = Tracked::new(7);
    {
        let r = Ref::new(&db, obj, RefVis::Private).unwrap();
        let r2 = r.clone();
        assert!(r.ptr_eq(&r2));
        assert_eq!(r2.value, 7);
        assert_eq!(r.meta().dbg_strong_count(), 2);
        drop(r2);
        assert_eq!(r.meta().dbg_strong_count(), 1);
        assert_eq!(drops.get(), 0);
    }
    assert_eq!(drops.get(), 1);
}

#[test]
fn ids_round_trip_through_the_registry()
{
    init_logging();
    let db = ObjDb::new();
    let (obj, _) = Tracked::new(1);
    let r = Ref::new(&db, obj, RefVis::Public).unwrap();
    let id = r.id();
    assert!(!id.is_null());
    assert!(db.is_valid_id(id));

    let again = Ref::<Tracked>::from_id(&db, id).unwrap();
    assert!(r.ptr_eq(&again));

    assert!(matches!(
        Ref::<Other>::from_id(&db, id),
        Err(RefError::BadCast { .. })
    ));
    assert!(matches!(
        Ref::<Tracked>::from_id(&db, ObjId::from(9999)),
        Err(RefError::InvalidId(_))
    ));
}

#[test]
fn private_objects_get_ids_but_no_entry()
{
    init_logging();
    let db = ObjDb::new();
    let (obj, _) = Tracked::new(2);
    let r = Ref::new(&db, obj, RefVis::Private).unwrap();
    assert!(!r.id().is_null());
    assert!(!db.is_valid_id(r.id()));
    assert!(matches!(
        Ref::<Tracked>::from_id(&db, r.id()),
        Err(RefError::InvalidId(_))
    ));
}

#[test]
fn dead_ids_are_never_reissued()
{
    init_logging();
    let db = ObjDb::new();
    let (a, _) = Tracked::new(1);
    let ida = db.insert(a).unwrap();
    db.remove(ida).unwrap();

    let (b, _) = Tracked::new(2);
    let idb = db.insert(b).unwrap();
    assert_ne!(ida, idb);
    assert!(!db.is_valid_id(ida));
    assert!(db.is_valid_id(idb));
}

#[test]
fn protected_entries_go_stale_with_their_object()
{
    init_logging();
    let db = ObjDb::new();
    let (obj, drops) = Tracked::new(3);
    let id;
    {
        let r = Ref::new(&db, obj, RefVis::Protected).unwrap();
        id = r.id();
        assert!(db.is_valid_id(id));
        assert_eq!(drops.get(), 0);
    }
    assert_eq!(drops.get(), 1);
    assert!(!db.is_valid_id(id));
    assert!(matches!(
        Ref::<Tracked>::from_id(&db, id),
        Err(RefError::InvalidId(_))
    ));
}

#[test]
fn public_entries_outlive_their_creator()
{
    init_logging();
    let db = ObjDb::new();
    let (obj, drops) = Tracked::new(4);
    let id;
    {
        let r = Ref::new(&db, obj, RefVis::Public).unwrap();
        id = r.id();
    }
    assert_eq!(drops.get(), 0);
    assert!(db.is_valid_id(id));

    db.remove(id).unwrap();
    assert_eq!(drops.get(), 1);
    assert!(!db.is_valid_id(id));
}

#[test]
fn release_keeps_externally_held_objects()
{
    init_logging();
    let db = ObjDb::new();
    let (obj, drops) = Tracked::new(5);
    let r = Ref::new(&db, obj, RefVis::Public).unwrap();
    db.release(r.id());
    assert!(!db.is_valid_id(r.id()));
    assert_eq!(drops.get(), 0);
    drop(r);
    assert_eq!(drops.get(), 1);
}

#[test]
fn weak_soft_refs_notice_death()
{
    init_logging();
    let db = ObjDb::new();
    let (obj, drops) = Tracked::new(6);
    let r = Ref::new(&db, obj, RefVis::Protected).unwrap();
    let soft = SoftRef::<Tracked>::from_id(&db, r.id(), RefType::Weak).unwrap();
    assert!(soft.is_valid());
    assert_eq!(soft.get().unwrap().value, 6);
    assert_eq!(soft.id(), r.id());

    drop(r);
    assert_eq!(drops.get(), 1);
    assert!(soft.is_invalid());
    assert!(matches!(soft.get(), Err(RefError::InvalidSoftRef(_))));
    assert!(soft.get_weak().is_none());
    assert_eq!(soft.id(), ObjId::NULL);
    assert!(Ref::try_from(&soft).is_err());
}

#[test]
fn strong_soft_refs_pin_their_target()
{
    init_logging();
    let db = ObjDb::new();
    let (obj, drops) = Tracked::new(7);
    let r = Ref::new(&db, obj, RefVis::Private).unwrap();
    let soft = SoftRef::from(&r);
    assert_eq!(soft.ref_type(), RefType::Strong);

    drop(r);
    assert_eq!(drops.get(), 0);
    assert!(soft.is_valid());
    assert_eq!(soft.get().unwrap().value, 7);

    drop(soft);
    assert_eq!(drops.get(), 1);
}

#[test]
fn unowned_soft_refs_are_born_invalid()
{
    init_logging();
    let db = ObjDb::new();
    let (obj, drops) = Tracked::new(8);
    let soft = SoftRef::new(&db, obj, RefType::Weak, RefVis::Private);
    assert_eq!(drops.get(), 1);
    assert!(soft.is_invalid());

    // With a strong registry entry the same construction stays alive.
    let (obj, drops) = Tracked::new(9);
    let soft = SoftRef::new(&db, obj, RefType::Weak, RefVis::Public);
    assert_eq!(drops.get(), 0);
    assert!(soft.is_valid());
    db.remove(soft.id()).unwrap();
    assert_eq!(drops.get(), 1);
    assert!(soft.is_invalid());
}

#[test]
fn empty_soft_refs_answer_without_an_object()
{
    init_logging();
    let db = ObjDb::new();
    let soft = SoftRef::<Tracked>::default();
    assert!(soft.is_invalid());
    assert_eq!(soft.id(), ObjId::NULL);
    assert!(matches!(soft.get(), Err(RefError::NullRef(_))));
    assert!(matches!(
        Ref::try_from(&soft),
        Err(RefError::NullRef(_))
    ));

    // A stale id yields an empty soft ref, not an error.
    let soft = SoftRef::<Tracked>::from_id(&db, ObjId::from(1234), RefType::Weak).unwrap();
    assert!(soft.is_invalid());
}

#[test]
fn guards_delay_reclamation_past_logical_death()
{
    init_logging();
    let db = ObjDb::new();
    let (obj, drops) = Tracked::new(10);
    let r = Ref::new(&db, obj, RefVis::Protected).unwrap();
    let id = r.id();
    let soft = SoftRef::<Tracked>::from_id(&db, id, RefType::Weak).unwrap();
    let guard = soft.get().unwrap();
    let guard2 = guard.clone();

    drop(r);
    // Death is visible at once; the storage waits for the guards.
    assert!(soft.is_invalid());
    assert!(!db.is_valid_id(id));
    assert_eq!(drops.get(), 0);
    assert_eq!(guard.value, 10);

    drop(guard);
    assert_eq!(drops.get(), 0);
    assert_eq!(guard2.value, 10);

    drop(guard2);
    assert_eq!(drops.get(), 1);
}

#[test]
fn unshareable_objects_refuse_strong_refs()
{
    init_logging();
    let db = ObjDb::new();
    let (obj, drops) = Tracked::volatile(11);
    assert!(matches!(
        Ref::new(&db, obj, RefVis::Private),
        Err(RefError::Unshareable(_))
    ));
    assert_eq!(drops.get(), 1);

    let (obj, _) = Tracked::volatile(12);
    assert!(matches!(db.insert(obj), Err(RefError::Unshareable(_))));
}

#[test]
fn watching_an_externally_owned_object()
{
    init_logging();
    let db = ObjDb::new();
    let (owner, drops) = Tracked::volatile(13);
    let soft = unsafe { SoftRef::watching(&*owner) };
    assert!(soft.is_valid());
    assert_eq!(soft.get().unwrap().value, 13);

    let id = unsafe { db.insert_weak(&*owner) };
    assert!(db.is_valid_id(id));
    // Strong-tagged access to an unshareable target degrades to weak.
    let soft2 = SoftRef::<Tracked>::from_id(&db, id, RefType::Strong).unwrap();
    assert_eq!(soft2.ref_type(), RefType::Weak);

    drop(owner);
    assert_eq!(drops.get(), 1);
    assert!(soft.is_invalid());
    assert!(soft2.is_invalid());
    assert!(!db.is_valid_id(id));
}

#[test]
#[should_panic(expected = "access guards are outstanding")]
fn dropping_a_watched_owner_under_a_guard_panics()
{
    let (owner, _) = Tracked::volatile(14);
    let soft = unsafe { SoftRef::watching(&*owner) };
    let _guard = soft.get().unwrap();
    drop(owner);
}

#[test]
fn watching_survives_moves_of_the_owning_box()
{
    init_logging();
    let (owner, drops) = Tracked::volatile(20);
    let watched_addr = &*owner as *const Tracked;
    let soft = unsafe { SoftRef::watching(&*owner) };

    // Moving the box moves only the pointer; the object stays put, which
    // is exactly the address stability `watching` requires.
    let moved = owner;
    assert_eq!(&*moved as *const Tracked, watched_addr);
    assert!(soft.is_valid());
    assert_eq!(soft.get().unwrap().value, 20);

    drop(moved);
    assert_eq!(drops.get(), 1);
    assert!(soft.is_invalid());
}

#[test]
fn floating_refs_pin_without_owning()
{
    init_logging();
    let (obj, drops) = Tracked::new(15);
    {
        let pin = FloatingRef::new(&*obj).unwrap();
        assert_eq!(pin.value, 15);
        assert_eq!(obj.meta().dbg_strong_count(), 1);
    }
    assert_eq!(obj.meta().dbg_strong_count(), 0);
    assert_eq!(drops.get(), 0);
    drop(obj);
    assert_eq!(drops.get(), 1);
}

#[test]
fn purge_spares_shared_objects()
{
    init_logging();
    let db = ObjDb::new();
    let (a, drops_a) = Tracked::new(1);
    let (b, drops_b) = Tracked::new(2);
    let ida = db.insert(a).unwrap();
    let idb = db.insert(b).unwrap();
    assert_eq!(db.count(), 2);

    let keep = Ref::<Tracked>::from_id(&db, ida).unwrap();
    assert_eq!(db.purge(), 1);
    assert_eq!(drops_a.get(), 0);
    assert_eq!(drops_b.get(), 1);
    assert!(db.is_valid_id(ida));
    assert!(!db.is_valid_id(idb));

    assert!(matches!(db.remove(ida), Err(RefError::SharedObject(_))));

    drop(keep);
    db.clear();
    assert_eq!(drops_a.get(), 1);
    assert_eq!(db.count(), 0);
}

#[test]
fn clear_on_exit_spares_external_holders()
{
    init_logging();
    let db = ObjDb::new();
    let (a, drops_a) = Tracked::new(1);
    let (b, drops_b) = Tracked::new(2);
    let ida = db.insert(a).unwrap();
    db.insert(b).unwrap();

    let keep = Ref::<Tracked>::from_id(&db, ida).unwrap();
    db.clear_on_exit();
    assert_eq!(db.count(), 0);
    assert_eq!(drops_a.get(), 0);
    assert_eq!(drops_b.get(), 1);
    assert_eq!(keep.value, 1);
    drop(keep);
    assert_eq!(drops_a.get(), 1);
}

#[test]
fn casts_between_concrete_and_erased()
{
    init_logging();
    let db = ObjDb::new();
    let (obj, _) = Tracked::new(16);
    let r = Ref::new(&db, obj, RefVis::Private).unwrap();

    let erased = r.as_obj();
    assert_eq!(erased.id(), r.id());
    let back = dyn_cast::<Tracked>(&erased).unwrap();
    assert!(back.ptr_eq(&r));
    assert!(matches!(
        dyn_cast::<Other>(&erased),
        Err(RefError::BadCast { .. })
    ));

    // The soft flavor turns a mismatch into emptiness instead.
    let soft = SoftRef::from(&r).as_obj();
    assert!(dyn_cast_soft::<Other>(&soft).is_invalid());
    let hit = dyn_cast_soft::<Tracked>(&soft);
    assert!(hit.is_valid());
    assert_eq!(hit.get().unwrap().value, 16);
}

#[test]
fn default_visibility_is_per_registry()
{
    init_logging();
    let db = ObjDb::new();
    assert_eq!(db.default_vis(), RefVis::Private);

    let (a, _) = Tracked::new(0);
    let r = Ref::new(&db, a, RefVis::Default).unwrap();
    assert!(!db.is_valid_id(r.id()));

    db.set_default_vis(RefVis::Protected);
    let (b, _) = Tracked::new(0);
    let r2 = Ref::new(&db, b, RefVis::Default).unwrap();
    assert!(db.is_valid_id(r2.id()));
}

#[test]
fn enumeration_by_id_and_type()
{
    init_logging();
    let db = ObjDb::new();
    let (a, _) = Tracked::new(1);
    db.insert(a).unwrap();
    db.insert(Box::new(Other::default())).unwrap();

    assert_eq!(db.ids().len(), 2);
    assert_eq!(db.objects().len(), 2);
    assert_eq!(db.objects_of_type::<Tracked>().len(), 1);
    assert_eq!(db.objects_of_type::<Other>().len(), 1);

    let tracked = db.objects_of_type::<Tracked>();
    assert_eq!(tracked[0].get().unwrap().value, 1);
}

#[test]
fn slots_fill_lowest_vacant_first()
{
    let mut list = SlotList::new();
    let a = list.insert("a");
    let b = list.insert("b");
    let c = list.insert("c");
    assert_eq!((a, b, c), (0, 1, 2));
    assert_eq!(list.count(), 3);

    assert_eq!(list.remove(b), Some("b"));
    assert!(!list.is_valid_id(b));
    assert_eq!(list.insert("d"), b);
    assert_eq!(list.get(b), Some(&"d"));
    assert_eq!(list.valid_ids().collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[test]
fn slots_grow_in_chunks()
{
    let mut list = SlotList::new();
    list.insert_at(25, 99);
    assert_eq!(list.capacity(), 40);
    assert_eq!(list.count(), 1);
    assert_eq!(list.get(25), Some(&99));
    assert!(matches!(list.get_checked(24), Err(RefError::InvalidId(_))));

    // Re-inserting at an occupied slot evicts the occupant.
    list.insert_at(25, 100);
    assert_eq!(list.get(25), Some(&100));
    assert_eq!(list.count(), 1);

    list.clear();
    assert_eq!(list.count(), 0);
    assert_eq!(list.insert(1), 0);
}

struct Counted(&'static Cell<i32>);

impl Drop for Counted
{
    fn drop(&mut self) { self.0.set(self.0.get() + 1); }
}

#[test]
fn slots_drop_occupants_exactly_once()
{
    let drops: &'static Cell<i32> = Box::leak(Box::new(Cell::new(0)));
    let mut list = SlotList::new();

    let id = list.insert(Counted(drops));
    list.insert_at(id, Counted(drops));
    assert_eq!(drops.get(), 1);
    assert_eq!(list.count(), 1);

    drop(list.remove(id));
    assert_eq!(drops.get(), 2);
    assert_eq!(list.remove(id).map(|_| ()), None);
    assert_eq!(drops.get(), 2);

    list.insert(Counted(drops));
    list.insert(Counted(drops));
    list.clear();
    assert_eq!(drops.get(), 4);
}
