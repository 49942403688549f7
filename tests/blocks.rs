mod common;

use common::{fresh, remount, remount_with, BLOCK, TEST};
use norkv::{BlockState, Flash, Granularity, InitFlags};

#[test]
fn init_clean() {
    let store = fresh(8, Granularity::Word);

    assert_eq!(store.used_blocks().count(), 0);
    assert_eq!(store.blocks().count(), 8);
    assert_eq!(store.pages_available(), 8 * 4);
    assert!(store.healthy());
    assert!(store
        .blocks()
        .all(|b| store.block_state(b) == BlockState::Empty));
}

#[test]
fn block_alloc() {
    let mut store = fresh(8, Granularity::Word);

    let b = store.new_block().unwrap();
    assert_eq!(store.used_blocks().count(), 1);
    assert_eq!(store.used_blocks().next(), Some(b));
    assert_eq!(store.block_state(b), BlockState::Valid);
    assert_eq!(store.block_generation(b), 1);
}

#[test]
fn block_alloc_exhaustion() {
    let mut store = fresh(8, Granularity::Word);

    for _ in 0..8 {
        assert!(store.new_block().is_some());
    }

    assert!(store.new_block().is_none());
    assert_eq!(store.used_blocks().count(), 8);
}

#[test]
fn init_erases_foreign_data() {
    let store = fresh(4, Granularity::Word);

    // scribble over every block header
    let mut flash = store.into_inner();
    for i in 0..4 {
        assert!(flash.write(i * BLOCK, &42_u32.to_le_bytes()));
    }

    let mut store = norkv::Store::mount(flash, Default::default(), InitFlags::default()).unwrap();
    assert!(store.healthy());

    store.maintenance();

    assert!(store
        .blocks()
        .all(|b| store.block_state(b) == BlockState::Empty));
    assert_eq!(store.pages_available(), 4 * 4);
}

#[test]
fn init_ignore_corrupted_reports_unhealthy() {
    let store = fresh(4, Granularity::Word);

    let mut flash = store.into_inner();
    assert!(flash.write(2 * BLOCK, b"junk"));

    let store = norkv::Store::mount(
        flash,
        Default::default(),
        InitFlags {
            ignore_corrupted: true,
            ..InitFlags::default()
        },
    )
    .unwrap();

    assert!(!store.healthy());
    // the block was left exactly as found
    let bad = store.blocks().nth(2).unwrap();
    assert_eq!(store.block_state(bad), BlockState::Corrupted);
}

#[test]
fn init_heals_half_initialized_block() {
    let store = fresh(2, Granularity::Word);

    // magic landed, the generation write never did
    let mut flash = store.into_inner();
    assert!(flash.write(0, b"NVRM"));

    let store = norkv::Store::mount(flash, Default::default(), InitFlags::default()).unwrap();

    let b = store.blocks().next().unwrap();
    assert_eq!(store.block_state(b), BlockState::Valid);
    assert_eq!(store.block_generation(b), 1);
    assert!(store.healthy());
}

#[test]
fn init_schedules_dirty_half_initialized_block() {
    let store = fresh(2, Granularity::Word);

    let mut flash = store.into_inner();
    assert!(flash.write(0, b"NVRM"));
    // debris in the page area means the block cannot be healed
    assert!(flash.write(256, &[0x55]));

    let mut store = norkv::Store::mount(flash, Default::default(), InitFlags::default()).unwrap();
    store.maintenance();

    let b = store.blocks().next().unwrap();
    assert_eq!(store.block_state(b), BlockState::Empty);
    assert_eq!(store.pages_available(), 2 * 4);
}

#[test]
fn reclaimed_blocks_count_their_generation() {
    for granularity in [Granularity::Word, Granularity::Double] {
        let mut store = fresh(4, granularity);

        while store.new_page(TEST, 0).is_some() {}
        assert_eq!(store.pages_available(), 0);

        store.erase_all(TEST);
        store.maintenance();

        for b in store.blocks() {
            assert_eq!(store.block_state(b), BlockState::Valid);
            assert_eq!(store.block_generation(b), 2, "{:?}", granularity);
        }
        assert_eq!(store.pages_available(), 4 * 4);

        // wear the same area once more
        while store.new_page(TEST, 0).is_some() {}
        store.erase_all(TEST);
        store.maintenance();

        let store = remount(store);
        for b in store.blocks() {
            assert_eq!(store.block_generation(b), 3);
        }
    }
}

#[test]
fn free_page_accounting_survives_remount() {
    let mut store = fresh(4, Granularity::Word);

    for _ in 0..3 {
        store.new_page(TEST, 0).unwrap();
    }
    assert_eq!(store.pages_available(), 16 - 3);

    let store = remount(store);
    assert_eq!(store.pages_available(), 16 - 3);
    assert_eq!(
        store
            .blocks()
            .filter(|b| store.block_state(*b) == BlockState::Valid)
            .count(),
        1
    );
}

#[test]
fn interrupted_erase_is_retried_until_done() {
    let mut store = fresh(4, Granularity::Word);

    while store.new_page(TEST, 0).is_some() {}
    store.erase_all(TEST);

    let config = store.config().clone();
    let mut flash = store.into_inner();
    flash.interrupt_next_erases(3);

    let mut store = norkv::Store::mount(flash, config, InitFlags::default()).unwrap();
    store.maintenance();

    assert_eq!(store.pages_available(), 4 * 4);
    assert!(store
        .blocks()
        .all(|b| store.block_state(b) == BlockState::Valid));
}

#[test]
fn reset_flag_wipes_everything() {
    let mut store = fresh(4, Granularity::Double);

    store.new_page(TEST, 0).unwrap();
    store.add_var(TEST, &[1, 2, 3, 4]).unwrap();

    let store = remount_with(
        store,
        InitFlags {
            reset: true,
            ..InitFlags::default()
        },
    );

    assert_eq!(store.used_blocks().count(), 0);
    assert!(store.find_unordered_first(TEST, 0).is_none());
    assert_eq!(store.pages_available(), 4 * 4);
}
