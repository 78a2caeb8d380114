//! Change notifications towards the presentation layer
//!
//! Lock holders only mark bits dirty. The bits are published once the
//! instance lock is released, and a waiting consumer collects and clears
//! the whole set at once.

use core::cell::Cell;

use bitflags::bitflags;

use embassy_sync::{
    blocking_mutex::{raw::RawMutex, Mutex},
    signal::Signal,
};

bitflags! {
    /// Set of pending change notifications.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Notifications: u8 {
        /// Charger plugged in or removed
        const CHARGER_PRESENT = 1 << 0;
        /// Charging started or stopped
        const CHARGER_STATE = 1 << 1;
        /// PWM duty cycle changed
        const CHARGER_PWM = 1 << 2;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Notifications {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Notifications({=u8:#x})", self.bits())
    }
}

/// Dirty set plus a wake-up for one consumer.
pub struct Notifier<M: RawMutex> {
    dirty: Mutex<M, Cell<Notifications>>,
    wake: Signal<M, ()>,
}

impl<M: RawMutex> Default for Notifier<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> Notifier<M> {
    pub const fn new() -> Self {
        Self {
            dirty: Mutex::new(Cell::new(Notifications::empty())),
            wake: Signal::new(),
        }
    }

    /// Mark `events` dirty and wake the consumer.
    pub fn raise(&self, events: Notifications) {
        if events.is_empty() {
            return;
        }
        self.dirty.lock(|dirty| {
            let mut pending = dirty.get();
            pending.insert(events);
            dirty.set(pending);
        });
        self.wake.signal(());
    }

    /// Take the dirty set without waiting.
    pub fn take(&self) -> Notifications {
        self.dirty.lock(|dirty| dirty.replace(Notifications::empty()))
    }

    /// Wait until at least one notification is pending and take them all.
    pub async fn wait(&self) -> Notifications {
        loop {
            let pending = self.take();
            if !pending.is_empty() {
                self.wake.reset();
                return pending;
            }
            self.wake.wait().await;
        }
    }
}
