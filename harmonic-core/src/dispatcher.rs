//! # Event Dispatcher
//!
//! The engine accepts a single callback per event kind. [`EventDispatcher`]
//! owns that callback and fans each event out to any number of listeners:
//!
//! - Listeners are deduplicated by identity (`Rc` pointer), so registering the
//!   same listener on every render is harmless.
//! - Delivery is synchronous and in emission order.
//! - A listener that returns an error or panics is logged and skipped; the
//!   remaining listeners still receive the event.
//! - Listeners may register before any engine exists. The engine callback is
//!   installed separately, once per engine.
//!
//! Registration hands back a [`Subscription`]. Dropping it does *not* remove
//! the listener; call [`Subscription::unsubscribe`].

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use anyhow::anyhow;

/// A shared listener closure. Identity is the `Rc` allocation.
pub type Listener<E> = Rc<RefCell<dyn FnMut(&E) -> anyhow::Result<()>>>;

/// The callback handed to the engine.
pub type EngineHook<E> = Box<dyn FnMut(&E)>;

/// Wraps a closure as a [`Listener`].
pub fn listener<E, F>(f: F) -> Listener<E>
where
    F: FnMut(&E) -> anyhow::Result<()> + 'static,
{
    Rc::new(RefCell::new(f))
}

struct Registration<E> {
    id: u64,
    listener: Listener<E>,
}

struct Registry<E> {
    next_id: u64,
    entries: Vec<Registration<E>>,
}

impl<E> Registry<E> {
    fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|r| r.id == id)
    }
}

pub struct EventDispatcher<E> {
    name: &'static str,
    registry: Rc<RefCell<Registry<E>>>,
    installed_on: Option<u64>,
}

impl<E: 'static> EventDispatcher<E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            registry: Rc::new(RefCell::new(Registry {
                next_id: 1,
                entries: Vec::new(),
            })),
            installed_on: None,
        }
    }

    /// Adds `listener` unless the same `Rc` is already registered, in which
    /// case the existing subscription is returned.
    pub fn register(&self, listener: Listener<E>) -> Subscription<E> {
        let mut registry = self.registry.borrow_mut();
        let existing = registry
            .entries
            .iter()
            .find(|r| std::ptr::addr_eq(Rc::as_ptr(&r.listener), Rc::as_ptr(&listener)))
            .map(|r| r.id);

        let id = match existing {
            Some(id) => id,
            None => {
                let id = registry.next_id;
                registry.next_id += 1;
                registry.entries.push(Registration { id, listener });
                log::debug!(
                    "[DISPATCH] {}: listener {} registered ({} total)",
                    self.name,
                    id,
                    registry.entries.len()
                );
                id
            }
        };

        Subscription {
            id,
            registry: Rc::downgrade(&self.registry),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.borrow().entries.len()
    }

    pub fn is_installed(&self) -> bool {
        self.installed_on.is_some()
    }

    /// Calls `install` with the fan-out hook unless a hook was already
    /// installed on engine `generation`. Returns whether it installed.
    pub fn ensure_installed(
        &mut self,
        generation: u64,
        install: impl FnOnce(EngineHook<E>),
    ) -> bool {
        if self.installed_on == Some(generation) {
            return false;
        }
        install(self.hook());
        self.installed_on = Some(generation);
        log::debug!("[DISPATCH] {}: engine callback installed (engine #{})", self.name, generation);
        true
    }

    /// Forgets the install guard, e.g. after the engine was detached.
    pub fn uninstall(&mut self) {
        self.installed_on = None;
    }

    /// Delivers `event` to every registered listener.
    pub fn dispatch(&self, event: &E) {
        fan_out(self.name, &self.registry, event);
    }

    fn hook(&self) -> EngineHook<E> {
        let name = self.name;
        let registry = Rc::downgrade(&self.registry);
        Box::new(move |event: &E| {
            if let Some(registry) = registry.upgrade() {
                fan_out(name, &registry, event);
            }
        })
    }
}

fn fan_out<E>(name: &str, registry: &Rc<RefCell<Registry<E>>>, event: &E) {
    // Snapshot so listeners may (un)register while the event is in flight.
    let snapshot: Vec<(u64, Listener<E>)> = registry
        .borrow()
        .entries
        .iter()
        .map(|r| (r.id, Rc::clone(&r.listener)))
        .collect();

    for (id, listener) in snapshot {
        if !registry.borrow().contains(id) {
            continue;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match listener.try_borrow_mut() {
            Ok(mut callback) => (&mut *callback)(event),
            Err(_) => Err(anyhow!("listener re-entered while handling an event")),
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("[DISPATCH] {}: listener {} failed: {:#}", name, id, e),
            Err(_) => log::warn!("[DISPATCH] {}: listener {} panicked", name, id),
        }
    }
}

/// Handle for one registration.
pub struct Subscription<E> {
    id: u64,
    registry: Weak<RefCell<Registry<E>>>,
}

impl<E> Subscription<E> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.borrow().contains(self.id))
    }

    /// Removes the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.borrow_mut();
        let before = registry.entries.len();
        registry.entries.retain(|r| r.id != self.id);
        before != registry.entries.len()
    }
}
