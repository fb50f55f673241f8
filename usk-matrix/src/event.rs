//! Key events and where they go.

use heapless::Vec;

/// A debounced press or release in merged logical coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub row: u8,
    pub col: u8,
    pub pressed: bool,
    /// Microseconds, shared by every event of one poll cycle.
    pub time: u32,
}

/// Downstream consumer of key events, fed one at a time in emission order.
pub trait EventSink {
    fn accept(&mut self, event: KeyEvent);
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn accept(&mut self, event: KeyEvent) {
        (**self).accept(event)
    }
}

/// Collects events; anything past capacity is dropped with a warning.
impl<const N: usize> EventSink for Vec<KeyEvent, N> {
    fn accept(&mut self, event: KeyEvent) {
        if self.push(event).is_err() {
            log::warn!("event sink full, dropped {:?}", event);
        }
    }
}

/// Adapts a closure into an [`EventSink`].
pub struct FnSink<F>(pub F);

impl<F: FnMut(KeyEvent)> EventSink for FnSink<F> {
    fn accept(&mut self, event: KeyEvent) {
        (self.0)(event)
    }
}
