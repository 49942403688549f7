mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{fresh, TEST};
use norkv::{
    collector_cleanup, collector_discard_oldest, collector_relocate, BlockState, Granularity,
};

#[test]
fn discard_oldest_frees_pages_under_pressure() {
    let mut store = fresh(4, Granularity::Word);
    store.register_collector(TEST, 1, collector_discard_oldest);

    while store.new_page(TEST, 0).is_some() {}
    assert!(store.new_page(TEST, 0).is_none());
    assert_eq!(store.pages_available(), 0);

    let collected = store.maintenance();
    assert!(collected >= 4);
    assert!(store.pages_available() >= store.config().pages_kept_free);

    // the reclaimed block went through a full erase cycle
    assert!(store
        .blocks()
        .any(|b| store.block_state(b) == BlockState::Valid && store.block_generation(b) == 2));

    let p = store.new_page(TEST, 0).unwrap();
    assert_eq!(store.page_sequence(p), 17);
}

#[test]
fn destructive_collectors_stay_idle_above_low_water() {
    let mut store = fresh(4, Granularity::Word);
    store.register_collector(TEST, 1, collector_discard_oldest);

    store.add_var_keyed(TEST, 1, &[1, 2, 3]).unwrap();
    store.maintenance();

    // plenty of pages free, nothing may be discarded
    assert!(store.find_unordered_first(TEST, 1).is_some());
}

#[test]
fn cleanup_collects_emptied_pages() {
    let mut store = fresh(4, Granularity::Word);
    store.register_collector(TEST, 0, collector_cleanup);

    store.add_var_keyed(TEST, 1, &[0x11; 400]).unwrap();
    store.add_var_keyed(TEST, 2, &[0x22; 400]).unwrap();
    // spills to a second page
    store.add_var_keyed(TEST, 3, &[0x33; 400]).unwrap();

    let first = store.page_oldest_first(TEST).unwrap();
    assert_ne!(Some(first), store.page_newest_first(TEST));

    store.delete(TEST, 1);
    store.delete(TEST, 2);

    store.maintenance();

    // the emptied page is gone, the newest survives
    let mut pages = 0;
    let mut p = store.page_first(TEST);
    while let Some(page) = p {
        pages += 1;
        p = store.page_next(page);
    }
    assert_eq!(pages, 1);

    let rec = store.find_unordered_first(TEST, 3).unwrap();
    assert_eq!(store.payload(rec), &[0x33; 400]);
}

#[test]
fn relocate_moves_small_tails_forward() {
    let mut store = fresh(4, Granularity::Word);
    store.register_collector(TEST, 0, collector_relocate);

    let moves = Rc::new(RefCell::new(0));
    let observed = Rc::clone(&moves);
    store.register_notifier(TEST, move |_| *observed.borrow_mut() += 1);

    // a big record pads the first page, three small ones ride along
    store.add_var_keyed(TEST, 8, &[0x88; 850]).unwrap();
    for key in [1_u32, 2, 3] {
        store.add_var_keyed(TEST, key, &[key as u8; 16]).unwrap();
    }
    // the next big record opens a second page
    store.add_var_keyed(TEST, 9, &[0x99; 896]).unwrap();
    store.delete(TEST, 8);

    let notifications_before = *moves.borrow();
    assert_eq!(
        store
            .page_next(store.page_first(TEST).unwrap())
            .into_iter()
            .count(),
        1,
        "two pages before relocation"
    );

    store.maintenance();

    // all records still resolve, on a single remaining page
    for key in [1_u32, 2, 3] {
        let rec = store.find_unordered_first(TEST, key).unwrap();
        assert_eq!(store.payload(rec), &[key as u8; 16]);
    }
    let rec = store.find_unordered_first(TEST, 9).unwrap();
    assert_eq!(store.payload(rec), &[0x99; 896]);

    let only = store.page_first(TEST).unwrap();
    assert!(store.page_next(only).is_none());

    // the moved records are now newer than the big one they rode behind
    let oldest = store.find_oldest_first(TEST, 0).unwrap();
    assert_eq!(store.key(oldest), 9);

    assert!(*moves.borrow() > notifications_before, "the move notified");
}

#[test]
fn collector_registration_replaces_same_key_and_level() {
    let mut store = fresh(4, Granularity::Word);

    let order = Rc::new(RefCell::new(Vec::new()));

    let seen = Rc::clone(&order);
    store.register_collector(TEST, 1, move |_store, _id| {
        seen.borrow_mut().push("stale");
        None
    });
    let seen = Rc::clone(&order);
    store.register_collector(TEST, 0, move |_store, _id| {
        seen.borrow_mut().push("level0");
        None
    });
    let seen = Rc::clone(&order);
    store.register_collector(TEST, 1, move |_store, _id| {
        seen.borrow_mut().push("level1");
        None
    });

    // force a destructive pass by exhausting the free pages
    while store.new_page(TEST, 0).is_some() {}
    store.maintenance();

    let order = order.borrow();
    assert!(order.contains(&"level0"));
    assert!(order.contains(&"level1"));
    assert!(!order.contains(&"stale"), "replaced registration never runs");
    assert_eq!(order[0], "level0", "levels run in ascending order");
}

#[test]
fn erase_page_promotes_fully_shredded_blocks() {
    let mut store = fresh(4, Granularity::Double);

    while store.new_page(TEST, 0).is_some() {}
    let before: Vec<_> = store.blocks().map(|b| store.block_state(b)).collect();
    assert!(before.iter().all(|s| *s == BlockState::Valid));

    store.erase_all(TEST);

    assert!(store
        .blocks()
        .all(|b| store.block_state(b) == BlockState::Erasable));

    store.maintenance();
    assert_eq!(store.pages_available(), 16);
}
