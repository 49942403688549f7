#![allow(dead_code)]

use norkv::{Config, Granularity, InitFlags, MemFlash, PageId, Store};

pub const BLOCK: usize = 4096;

pub const TEST: PageId = PageId::from_bytes(*b"TEST");
pub const FILL: PageId = PageId::from_bytes(*b"FILL");

pub fn setup_logger() {
    use std::io::Write;

    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{:05} {:10} {}",
                record.level(),
                record.module_path().unwrap_or("?").split("::").last().unwrap(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info);

    if let Ok(env) = std::env::var("RUST_LOG") {
        builder.parse_filters(&env);
    }

    let _ = builder.try_init();
}

pub fn fresh(blocks: usize, granularity: Granularity) -> Store<MemFlash> {
    fresh_with(blocks, granularity, Config::default())
}

pub fn fresh_with(blocks: usize, granularity: Granularity, config: Config) -> Store<MemFlash> {
    setup_logger();

    let flash = MemFlash::new(blocks * BLOCK, BLOCK, granularity);
    Store::mount(
        flash,
        config,
        InitFlags {
            reset: true,
            ..InitFlags::default()
        },
    )
    .unwrap()
}

/// Remounts the store over the same medium, as after a reboot. Power is
/// restored first, so a store whose simulated supply was cut recovers.
pub fn remount(store: Store<MemFlash>) -> Store<MemFlash> {
    remount_with(store, InitFlags::default())
}

pub fn remount_with(store: Store<MemFlash>, flags: InitFlags) -> Store<MemFlash> {
    let config = store.config().clone();
    let mut flash = store.into_inner();
    flash.power_restore();
    Store::mount(flash, config, flags).unwrap()
}
