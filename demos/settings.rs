//! A tiny device-settings layer over a simulated NOR part, surviving a
//! power cut mid-write.

use norkv::{
    Config, Granularity, InitFlags, MemFlash, PageId, SettingSpec, Settings, Store,
};

const NVS: PageId = PageId::from_bytes(*b"NVS1");
const BRIGHTNESS: u32 = 1;
const HOSTNAME: u32 = 2;

fn specs() -> Vec<SettingSpec> {
    vec![
        SettingSpec {
            key: BRIGHTNESS,
            name: "brightness",
            default: &[60],
        },
        SettingSpec {
            key: HOSTNAME,
            name: "hostname",
            default: b"lamp",
        },
    ]
}

fn main() {
    // a 64 KiB part with 4 KiB erase blocks
    let flash = MemFlash::new(64 * 1024, 4096, Granularity::Word);
    let mut store = Store::mount(flash, Config::default(), InitFlags::default()).unwrap();
    let mut settings = Settings::new(&mut store, NVS, specs());

    assert_eq!(settings.get(&store, HOSTNAME), b"lamp");

    settings.set(&mut store, BRIGHTNESS, &[85]).unwrap();
    settings.set(&mut store, HOSTNAME, b"porch-lamp").unwrap();

    // the supply dies somewhere inside the next write
    let config = store.config().clone();
    let mut flash = store.into_inner();
    flash.power_cut_after(7);
    let mut store = Store::mount(flash, config, InitFlags::default()).unwrap();
    let mut settings = Settings::new(&mut store, NVS, specs());
    let _ = settings.set(&mut store, HOSTNAME, b"garden-lamp");

    // reboot: whatever was acknowledged is still there, nothing is torn
    let config = store.config().clone();
    let mut flash = store.into_inner();
    flash.power_restore();
    let mut store = Store::mount(flash, config, InitFlags::default()).unwrap();
    let mut settings = Settings::new(&mut store, NVS, specs());

    let hostname = settings.get(&store, HOSTNAME).to_vec();
    assert!(hostname == b"porch-lamp" || hostname == b"garden-lamp");
    assert_eq!(settings.get(&store, BRIGHTNESS), &[85]);

    // let the collector catch up whenever the system is idle
    while store.collector_step() {}

    println!(
        "hostname {:?}, {} pages free",
        String::from_utf8_lossy(&hostname),
        store.pages_available()
    );
}
