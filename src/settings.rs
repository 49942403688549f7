use crate::storage::VariableUniqueKeyStorage;
use crate::{Error, Flash, PageId, Store, VersionTracker};

/// Static description of one named setting.
#[derive(Debug, Clone, Copy)]
pub struct SettingSpec {
    /// Record key the value is stored under.
    pub key: u32,
    /// Human-readable name, for diagnostics.
    pub name: &'static str,
    /// Value served when nothing (or something shorter) is stored.
    pub default: &'static [u8],
}

struct Slot {
    value: Vec<u8>,
    version: u32,
    notify: bool,
}

/// Named-value façade over one unique-key storage page.
///
/// Each setting keeps a cached copy of its value together with the page
/// version it was loaded at; reads are served from the cache for as long as
/// the page's version tracker has not moved, so the flash scan happens only
/// after actual mutations.
pub struct Settings {
    storage: VariableUniqueKeyStorage,
    specs: Vec<SettingSpec>,
    slots: Vec<Slot>,
    tracker: VersionTracker,
}

impl Settings {
    pub fn new<F: Flash>(store: &mut Store<F>, page: PageId, specs: Vec<SettingSpec>) -> Settings {
        let tracker = store.register_version_tracker(page);
        let slots = specs
            .iter()
            .map(|spec| Slot {
                value: spec.default.to_vec(),
                version: 0,
                notify: false,
            })
            .collect();

        Settings {
            storage: VariableUniqueKeyStorage::new(page),
            specs,
            slots,
            tracker,
        }
    }

    pub fn specs(&self) -> &[SettingSpec] {
        &self.specs
    }

    pub fn spec(&self, key: u32) -> Option<&SettingSpec> {
        self.index(key).map(|i| &self.specs[i])
    }

    fn index(&self, key: u32) -> Option<usize> {
        self.specs.iter().position(|spec| spec.key == key)
    }

    /// The current value of the setting: the cache while the page version
    /// still matches, else freshly loaded with the default as fallback for
    /// a missing or short record. Raises the setting's notify flag when the
    /// loaded value differs from the cached one.
    pub fn get<F: Flash>(&mut self, store: &Store<F>, key: u32) -> &[u8] {
        let i = self.index(key).expect("unknown setting");
        let current = self.tracker.current();

        if self.slots[i].version != current {
            let spec = self.specs[i];
            let value: &[u8] = match self.storage.get(store, key) {
                Some(stored) if stored.len() >= spec.default.len() => stored,
                _ => spec.default,
            };

            if value != self.slots[i].value {
                self.slots[i].notify = true;
                self.slots[i].value = value.to_vec();
            }
            self.slots[i].version = current;
        }

        &self.slots[i].value
    }

    /// Writes the value through to storage and refreshes the cache.
    pub fn set<F: Flash>(
        &mut self,
        store: &mut Store<F>,
        key: u32,
        value: &[u8],
    ) -> Result<(), Error> {
        let i = self.index(key).expect("unknown setting");
        self.storage.set(store, key, value)?;
        self.slots[i].value = value.to_vec();
        Ok(())
    }

    /// Removes the stored value; reads fall back to the default.
    pub fn delete<F: Flash>(&mut self, store: &mut Store<F>, key: u32) -> bool {
        self.storage.delete(store, key)
    }

    /// The first setting whose loaded value changed since it was last
    /// marked notified.
    pub fn notify_pending(&self) -> Option<u32> {
        self.specs
            .iter()
            .zip(&self.slots)
            .find(|(_, slot)| slot.notify)
            .map(|(spec, _)| spec.key)
    }

    pub fn mark_notified(&mut self, key: u32) {
        if let Some(i) = self.index(key) {
            self.slots[i].notify = false;
        }
    }

    /// Poll primitive for the runtime's version-change wait: `true` while
    /// `seen` still matches the page version, updating `seen` otherwise.
    pub fn is_current_version(&self, seen: &mut u32) -> bool {
        self.tracker.is_current_version(seen)
    }
}
