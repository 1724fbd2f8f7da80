//! Worker loops
//!
//! Three long-lived loops, one OS thread each:
//!
//! - [`MouseWorker`] reads the physical mouse, runs the remapper and routes
//!   each event to the keyboard queue, the virtual pointer, or both.
//! - [`KeyboardInputWorker`] reads the physical keyboard and enqueues every
//!   event.
//! - [`KeyboardOutputWorker`] drains the queue into the virtual keyboard.
//!
//! The two input workers share the same recovery shape: a read fault moves
//! them from Running into Recovering, where they reopen their session; a
//! failed reopen backs off and retries forever. They never exit on their
//! own — a USB unplug/replug must end with events flowing again, without a
//! daemon restart.
//!
//! Each worker's loop body is a separate method so the state machine can be
//! driven one iteration at a time by tests, with fake sources and sinks
//! injecting faults.

use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use evdev::InputEvent;

use crate::injector::EventSink;
use crate::queue::EventQueue;
use crate::remapper::{Remapper, Route};
use crate::session::EventSource;

/// Log an escalated overflow and terminate. Only reached under the `abort`
/// overflow policy; `drop` is absorbed inside the queue.
fn abort_on_overflow(overflow: crate::queue::QueueOverflow) -> ! {
    tracing::error!("{}; aborting to surface the sizing bug", overflow);
    process::exit(1);
}

fn log_write_failure(stream: &str, event: &InputEvent, err: &std::io::Error) {
    tracing::warn!(
        "failed to write {} event (type={:?}, code={}, value={}): {}",
        stream,
        event.event_type(),
        event.code(),
        event.value(),
        err
    );
}

pub struct MouseWorker<S, P> {
    session: S,
    pointer: P,
    queue: Arc<EventQueue>,
    remapper: Remapper,
    backoff: Duration,
    consecutive_failures: u32,
}

impl<S: EventSource, P: EventSink> MouseWorker<S, P> {
    pub fn new(
        session: S,
        pointer: P,
        queue: Arc<EventQueue>,
        remapper: Remapper,
        backoff: Duration,
    ) -> Self {
        Self {
            session,
            pointer,
            queue,
            remapper,
            backoff,
            consecutive_failures: 0,
        }
    }

    pub fn run(mut self) {
        loop {
            self.step();
        }
    }

    fn step(&mut self) {
        match self.session.read_event() {
            Ok(event) => {
                self.consecutive_failures = 0;
                self.dispatch(event);
            }
            Err(err) => {
                tracing::warn!(
                    "{} (consecutive_failures={})",
                    err,
                    self.consecutive_failures
                );
                self.recover();
            }
        }
    }

    fn dispatch(&mut self, event: InputEvent) {
        match self.remapper.translate(event) {
            Route::Keyboard(event) => self.enqueue(event),
            Route::Pointer(event) => self.write_pointer(event),
            Route::Both(event) => {
                self.enqueue(event);
                self.write_pointer(event);
            }
        }
    }

    fn enqueue(&mut self, event: InputEvent) {
        if let Err(overflow) = self.queue.enqueue(event) {
            abort_on_overflow(overflow);
        }
    }

    fn write_pointer(&mut self, event: InputEvent) {
        if let Err(err) = self.pointer.write_event(event) {
            log_write_failure("pointer", &event, &err);
        }
    }

    fn recover(&mut self) {
        match self.session.reopen() {
            Ok(()) => {
                self.consecutive_failures = 0;
                // Residual motion from before the disconnect must not leak
                // into post-reconnect motion.
                self.remapper.reset();
                tracing::info!("mouse device reconnected");
            }
            Err(err) => {
                self.consecutive_failures += 1;
                tracing::warn!("failed to reopen mouse device, will retry: {}", err);
                thread::sleep(self.backoff);
            }
        }
    }
}

pub struct KeyboardInputWorker<S> {
    session: S,
    queue: Arc<EventQueue>,
    backoff: Duration,
    consecutive_failures: u32,
}

impl<S: EventSource> KeyboardInputWorker<S> {
    pub fn new(session: S, queue: Arc<EventQueue>, backoff: Duration) -> Self {
        Self {
            session,
            queue,
            backoff,
            consecutive_failures: 0,
        }
    }

    pub fn run(mut self) {
        loop {
            self.step();
        }
    }

    fn step(&mut self) {
        match self.session.read_event() {
            Ok(event) => {
                self.consecutive_failures = 0;
                if let Err(overflow) = self.queue.enqueue(event) {
                    abort_on_overflow(overflow);
                }
            }
            Err(err) => {
                tracing::warn!(
                    "{} (consecutive_failures={})",
                    err,
                    self.consecutive_failures
                );
                // Clear buffered events before reopening so the output
                // worker never replays a stale pre-disconnect stream.
                self.queue.drain();
                self.recover();
            }
        }
    }

    fn recover(&mut self) {
        match self.session.reopen() {
            Ok(()) => {
                self.consecutive_failures = 0;
                tracing::info!("keyboard device reconnected");
            }
            Err(err) => {
                self.consecutive_failures += 1;
                tracing::warn!("failed to reopen keyboard device, will retry: {}", err);
                thread::sleep(self.backoff);
            }
        }
    }
}

pub struct KeyboardOutputWorker<O> {
    queue: Arc<EventQueue>,
    output: O,
}

impl<O: EventSink> KeyboardOutputWorker<O> {
    pub fn new(queue: Arc<EventQueue>, output: O) -> Self {
        Self { queue, output }
    }

    pub fn run(mut self) {
        loop {
            self.forward_one();
        }
    }

    /// Block for the next queued event and write it out. A failed write is
    /// logged and skipped; transient EAGAIN-class conditions on the
    /// non-blocking virtual device recover on the next event.
    fn forward_one(&mut self) {
        let event = self.queue.dequeue();
        if let Err(err) = self.output.write_event(event) {
            log_write_failure("keyboard", &event, &err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;

    use evdev::{EventType, Key, MiscType, RelativeAxisType};
    use sidekey_config::OverflowPolicy;

    use crate::remapper::{SCAN_BTN_SIDE, SCAN_KEY_SHIFT};
    use crate::session::SessionError;

    fn read_fault() -> SessionError {
        SessionError::ReadFault {
            name: "test",
            source: io::Error::new(io::ErrorKind::Other, "device gone"),
        }
    }

    fn unavailable() -> SessionError {
        SessionError::DeviceUnavailable {
            name: "test",
            reason: "still unplugged".into(),
        }
    }

    fn key(code: Key, value: i32) -> InputEvent {
        InputEvent::new(EventType::KEY, code.code(), value)
    }

    fn rel_x(value: i32) -> InputEvent {
        InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_X.0, value)
    }

    /// Scripted event source: plays back reads and reopen outcomes.
    struct FakeSource {
        reads: VecDeque<Result<InputEvent, SessionError>>,
        reopens: VecDeque<Result<(), SessionError>>,
        reopen_calls: usize,
    }

    impl FakeSource {
        fn new(
            reads: Vec<Result<InputEvent, SessionError>>,
            reopens: Vec<Result<(), SessionError>>,
        ) -> Self {
            Self {
                reads: reads.into(),
                reopens: reopens.into(),
                reopen_calls: 0,
            }
        }
    }

    impl EventSource for FakeSource {
        fn read_event(&mut self) -> Result<InputEvent, SessionError> {
            self.reads.pop_front().unwrap_or_else(|| Err(read_fault()))
        }

        fn reopen(&mut self) -> Result<(), SessionError> {
            self.reopen_calls += 1;
            self.reopens.pop_front().unwrap_or(Ok(()))
        }
    }

    /// Sink that records writes into a shared buffer and optionally fails
    /// the first N writes.
    struct FakeSink {
        written: Arc<Mutex<Vec<InputEvent>>>,
        failures_remaining: u32,
    }

    impl FakeSink {
        fn new() -> (Self, Arc<Mutex<Vec<InputEvent>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    written: Arc::clone(&written),
                    failures_remaining: 0,
                },
                written,
            )
        }

        fn failing_first(n: u32) -> (Self, Arc<Mutex<Vec<InputEvent>>>) {
            let (mut sink, written) = Self::new();
            sink.failures_remaining = n;
            (sink, written)
        }
    }

    impl EventSink for FakeSink {
        fn write_event(&mut self, event: InputEvent) -> std::io::Result<()> {
            if self.failures_remaining > 0 {
                self.failures_remaining -= 1;
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "EAGAIN"));
            }
            self.written.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn test_queue() -> Arc<EventQueue> {
        Arc::new(EventQueue::new(64, OverflowPolicy::Drop))
    }

    #[test]
    fn side_button_press_release_lands_in_keyboard_queue() {
        let queue = test_queue();
        let source = FakeSource::new(
            vec![Ok(key(Key::BTN_SIDE, 1)), Ok(key(Key::BTN_SIDE, 0))],
            vec![],
        );
        let (sink, written) = FakeSink::new();
        let mut worker = MouseWorker::new(
            source,
            sink,
            Arc::clone(&queue),
            Remapper::new(0.5),
            Duration::ZERO,
        );

        worker.step();
        worker.step();

        let press = queue.dequeue();
        let release = queue.dequeue();
        assert_eq!(press.code(), Key::KEY_LEFTSHIFT.code());
        assert_eq!(press.value(), 1);
        assert_eq!(release.code(), Key::KEY_LEFTSHIFT.code());
        assert_eq!(release.value(), 0);
        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn scaled_motion_reaches_pointer_only() {
        let queue = test_queue();
        let source = FakeSource::new((0..4).map(|_| Ok(rel_x(1))).collect(), vec![]);
        let (sink, written) = FakeSink::new();
        let mut worker = MouseWorker::new(
            source,
            sink,
            Arc::clone(&queue),
            Remapper::new(0.5),
            Duration::ZERO,
        );

        for _ in 0..4 {
            worker.step();
        }

        let deltas: Vec<i32> = written.lock().unwrap().iter().map(|e| e.value()).collect();
        assert_eq!(deltas, vec![1, 0, 1, 0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn synchronization_reaches_both_streams() {
        let queue = test_queue();
        let syn = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        let source = FakeSource::new(vec![Ok(syn)], vec![]);
        let (sink, written) = FakeSink::new();
        let mut worker = MouseWorker::new(
            source,
            sink,
            Arc::clone(&queue),
            Remapper::new(0.5),
            Duration::ZERO,
        );

        worker.step();

        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.dequeue().event_type(),
            EventType::SYNCHRONIZATION
        );
        assert_eq!(written.lock().unwrap().len(), 1);
    }

    #[test]
    fn scan_code_rewrite_flows_through_worker() {
        let queue = test_queue();
        let scan = InputEvent::new(EventType::MISC, MiscType::MSC_SCAN.0, SCAN_BTN_SIDE);
        let source = FakeSource::new(vec![Ok(scan)], vec![]);
        let (sink, _written) = FakeSink::new();
        let mut worker = MouseWorker::new(
            source,
            sink,
            Arc::clone(&queue),
            Remapper::new(0.5),
            Duration::ZERO,
        );

        worker.step();

        assert_eq!(queue.dequeue().value(), SCAN_KEY_SHIFT);
    }

    #[test]
    fn mouse_reconnect_resets_accumulators_without_replay() {
        let queue = test_queue();
        // One unit of motion leaves a -0.5 residual; after the fault and
        // reopen the residual must be gone, so the next unit emits 1 again.
        let source = FakeSource::new(
            vec![Ok(rel_x(1)), Err(read_fault()), Ok(rel_x(1))],
            vec![Ok(())],
        );
        let (sink, written) = FakeSink::new();
        let mut worker = MouseWorker::new(
            source,
            sink,
            Arc::clone(&queue),
            Remapper::new(0.5),
            Duration::ZERO,
        );

        worker.step();
        worker.step();
        worker.step();

        let deltas: Vec<i32> = written.lock().unwrap().iter().map(|e| e.value()).collect();
        assert_eq!(deltas, vec![1, 1]);
        assert_eq!(worker.session.reopen_calls, 1);
        assert_eq!(worker.consecutive_failures, 0);
    }

    #[test]
    fn mouse_worker_retries_reopen_until_it_succeeds() {
        let queue = test_queue();
        let source = FakeSource::new(
            vec![
                Err(read_fault()),
                Err(read_fault()),
                Err(read_fault()),
                Ok(key(Key::BTN_LEFT, 1)),
            ],
            vec![Err(unavailable()), Err(unavailable()), Ok(())],
        );
        let (sink, written) = FakeSink::new();
        let mut worker = MouseWorker::new(
            source,
            sink,
            Arc::clone(&queue),
            Remapper::new(0.5),
            Duration::ZERO,
        );

        for _ in 0..4 {
            worker.step();
        }

        assert_eq!(worker.session.reopen_calls, 3);
        assert_eq!(worker.consecutive_failures, 0);
        assert_eq!(written.lock().unwrap().len(), 1);
    }

    #[test]
    fn keyboard_worker_enqueues_everything() {
        let queue = test_queue();
        let source = FakeSource::new(
            vec![
                Ok(key(Key::KEY_A, 1)),
                Ok(InputEvent::new(EventType::SYNCHRONIZATION, 0, 0)),
                Ok(key(Key::KEY_A, 0)),
            ],
            vec![],
        );
        let mut worker = KeyboardInputWorker::new(source, Arc::clone(&queue), Duration::ZERO);

        for _ in 0..3 {
            worker.step();
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue().code(), Key::KEY_A.code());
    }

    #[test]
    fn keyboard_fault_drains_stale_events_before_reopen() {
        let queue = test_queue();
        for value in 0..3 {
            queue.enqueue(key(Key::KEY_A, value)).unwrap();
        }
        let source = FakeSource::new(vec![Err(read_fault())], vec![Ok(())]);
        let mut worker = KeyboardInputWorker::new(source, Arc::clone(&queue), Duration::ZERO);

        worker.step();

        assert!(queue.is_empty());
        assert_eq!(worker.session.reopen_calls, 1);
    }

    #[test]
    fn output_worker_forwards_queued_events() {
        let queue = test_queue();
        queue.enqueue(key(Key::KEY_LEFTSHIFT, 1)).unwrap();
        let (sink, written) = FakeSink::new();
        let mut worker = KeyboardOutputWorker::new(Arc::clone(&queue), sink);

        worker.forward_one();

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].code(), Key::KEY_LEFTSHIFT.code());
    }

    #[test]
    fn output_worker_survives_a_failed_write() {
        let queue = test_queue();
        queue.enqueue(key(Key::KEY_A, 1)).unwrap();
        queue.enqueue(key(Key::KEY_A, 0)).unwrap();
        let (sink, written) = FakeSink::failing_first(1);
        let mut worker = KeyboardOutputWorker::new(Arc::clone(&queue), sink);

        // First write fails and is skipped; the loop keeps consuming.
        worker.forward_one();
        worker.forward_one();

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].value(), 0);
    }
}
