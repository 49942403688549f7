use std::cell::Cell;
use std::rc::Rc;

use crate::{Flash, PageId, Store};

pub(crate) type NotifierFn = Box<dyn FnMut(PageId)>;

/// Registered change notifiers, keyed by page id.
#[derive(Default)]
pub(crate) struct Notifiers {
    entries: Vec<(PageId, NotifierFn)>,
}

impl Notifiers {
    pub fn push(&mut self, id: PageId, notifier: NotifierFn) {
        self.entries.push((id, notifier));
    }

    pub fn notify(&mut self, id: PageId) {
        for (key, notifier) in &mut self.entries {
            if *key == id {
                notifier(id);
            }
        }
    }
}

/// Cheap "has anything changed?" tracking: a counter bumped by a notifier
/// every time the watched page id mutates. Clones share the counter, so
/// one copy can live inside a cache while another stays with its owner.
#[derive(Clone)]
pub struct VersionTracker {
    version: Rc<Cell<u32>>,
}

impl VersionTracker {
    pub fn current(&self) -> u32 {
        self.version.get()
    }

    /// Compares the caller's remembered version against the counter,
    /// updating the memory. Returns `true` when nothing has changed. The
    /// runtime's mask-wait polls this to build blocking change waits.
    pub fn is_current_version(&self, seen: &mut u32) -> bool {
        let current = self.version.get();
        if *seen == current {
            return true;
        }
        *seen = current;
        false
    }
}

impl<F: Flash> Store<F> {
    /// Registers a change notifier for the page id. Notifiers run in
    /// registration order, once per mutating operation on the id.
    pub fn register_notifier<N>(&mut self, id: PageId, notifier: N)
    where
        N: FnMut(PageId) + 'static,
    {
        self.notifiers.push(id, Box::new(notifier));
    }

    /// Calls every notifier registered for `id`.
    pub fn notify(&mut self, id: PageId) {
        self.notifiers.notify(id);
    }

    /// Registers a version tracker for the page id: a notifier that
    /// increments a shared counter on every mutation.
    pub fn register_version_tracker(&mut self, id: PageId) -> VersionTracker {
        let version = Rc::new(Cell::new(1u32));
        let inner = Rc::clone(&version);
        self.register_notifier(id, move |_| inner.set(inner.get().wrapping_add(1)));
        VersionTracker { version }
    }
}
