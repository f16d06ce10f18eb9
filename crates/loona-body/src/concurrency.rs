use std::{cell::Cell, fmt, rc::Rc};

use tracing::trace;

/// Engine-side control over a per-request timeout. This crate never
/// calls these itself: the handle is only passed through to handlers.
pub trait TimeoutControl {
    /// Pushes the deadline back
    fn tickle(&self);

    /// Stops the timer, e.g. while waiting on something slow on purpose
    fn pause(&self);

    /// Restarts a paused timer
    fn resume(&self);
}

/// A per-request timeout handle, owned by the engine
#[derive(Clone)]
pub struct TimeoutHandle(Rc<dyn TimeoutControl>);

impl TimeoutHandle {
    pub fn new(control: impl TimeoutControl + 'static) -> Self {
        Self(Rc::new(control))
    }

    /// A handle for engines that don't time requests out
    pub fn disabled() -> Self {
        Self::new(NoTimeout)
    }

    pub fn tickle(&self) {
        self.0.tickle()
    }

    pub fn pause(&self) {
        self.0.pause()
    }

    pub fn resume(&self) {
        self.0.resume()
    }
}

impl fmt::Debug for TimeoutHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TimeoutHandle")
    }
}

struct NoTimeout;

impl TimeoutControl for NoTimeout {
    fn tickle(&self) {}
    fn pause(&self) {}
    fn resume(&self) {}
}

/// Server-side side channel passed to handlers along with the request
#[derive(Debug, Clone)]
pub struct Aux {
    timeout: TimeoutHandle,
}

impl Aux {
    pub fn new(timeout: TimeoutHandle) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> &TimeoutHandle {
        &self.timeout
    }
}

/// Stream counters of a client connection. The engine updates them as
/// streams open and close and as SETTINGS arrive; [ClientAux] reads them.
///
/// `None` means "no limit", which is not the same as a limit of zero.
#[derive(Debug, Default)]
pub struct StreamCounters {
    open: Cell<u32>,
    peer_max_concurrent_streams: Cell<Option<u32>>,
}

impl StreamCounters {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// SETTINGS_MAX_CONCURRENT_STREAMS as advertised by the peer (the
    /// setting being absent means unlimited)
    pub fn set_peer_max_concurrent_streams(&self, max: Option<u32>) {
        trace!(?max, "peer max concurrent streams");
        self.peer_max_concurrent_streams.set(max);
    }

    pub fn stream_opened(&self) {
        self.open.set(self.open.get().saturating_add(1));
    }

    pub fn stream_closed(&self) {
        self.open.set(self.open.get().saturating_sub(1));
    }

    pub fn open_streams(&self) -> u32 {
        self.open.get()
    }
}

/// Client-side side channel: concurrency hints for admission control.
/// Values are read from the engine's counters on every call.
#[derive(Debug, Clone)]
pub struct ClientAux {
    counters: Rc<StreamCounters>,
}

impl ClientAux {
    pub fn new(counters: Rc<StreamCounters>) -> Self {
        Self { counters }
    }

    /// How many more streams can be opened right now without waiting,
    /// `None` if unbounded
    pub fn available_streams(&self) -> Option<u32> {
        self.counters
            .peer_max_concurrent_streams
            .get()
            .map(|max| max.saturating_sub(self.counters.open.get()))
    }

    /// The concurrent stream limit the peer advertised, `None` if unbounded
    pub fn peer_max_concurrent_streams(&self) -> Option<u32> {
        self.counters.peer_max_concurrent_streams.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unbounded_is_not_zero() {
        let counters = StreamCounters::new();
        let aux = ClientAux::new(counters.clone());
        assert_eq!(aux.available_streams(), None);
        assert_eq!(aux.peer_max_concurrent_streams(), None);

        counters.set_peer_max_concurrent_streams(Some(0));
        assert_eq!(aux.available_streams(), Some(0));
        assert_eq!(aux.peer_max_concurrent_streams(), Some(0));
    }

    #[test]
    fn reads_are_never_stale() {
        let counters = StreamCounters::new();
        let aux = ClientAux::new(counters.clone());
        counters.set_peer_max_concurrent_streams(Some(2));
        assert_eq!(aux.available_streams(), Some(2));

        counters.stream_opened();
        counters.stream_opened();
        assert_eq!(aux.available_streams(), Some(0));

        counters.stream_opened();
        assert_eq!(aux.available_streams(), Some(0));

        counters.stream_closed();
        counters.stream_closed();
        counters.set_peer_max_concurrent_streams(Some(100));
        assert_eq!(aux.available_streams(), Some(99));

        counters.set_peer_max_concurrent_streams(None);
        assert_eq!(aux.available_streams(), None);
    }

    #[test]
    fn timeout_handle_delegates() {
        #[derive(Default)]
        struct Recorder(std::cell::RefCell<Vec<&'static str>>);
        impl TimeoutControl for Rc<Recorder> {
            fn tickle(&self) {
                self.0.borrow_mut().push("tickle");
            }
            fn pause(&self) {
                self.0.borrow_mut().push("pause");
            }
            fn resume(&self) {
                self.0.borrow_mut().push("resume");
            }
        }

        let recorder = Rc::new(Recorder::default());
        let aux = Aux::new(TimeoutHandle::new(recorder.clone()));
        aux.timeout().pause();
        aux.timeout().resume();
        aux.timeout().tickle();
        assert_eq!(*recorder.0.borrow(), vec!["pause", "resume", "tickle"]);

        TimeoutHandle::disabled().tickle();
    }
}
