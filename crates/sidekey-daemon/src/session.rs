//! Device session lifecycle
//!
//! A [`DeviceSession`] owns one exclusively-grabbed input device. It is
//! created by the supervisor, handed to exactly one worker thread, and never
//! shared; every read and grab ioctl on a session's handle comes from that
//! one thread, including across `reopen()`.
//!
//! The [`EventSource`] trait is the seam that keeps the workers' recovery
//! logic platform-agnostic: tests exercise disconnect/reconnect handling
//! with a fake source that injects faults on demand.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use evdev::{Device, InputEvent};
use thiserror::Error;

use sidekey_config::DeviceMatch;

use crate::device;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The device could not be located, opened, or grabbed. Fatal at initial
    /// startup; retried forever during steady-state reopen.
    #[error("{name} device unavailable: {reason}")]
    DeviceUnavailable { name: &'static str, reason: String },

    /// A short read or I/O error on an open device. Triggers the worker's
    /// recovery path, never fatal.
    #[error("{name} read fault: {source}")]
    ReadFault {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

/// A blocking source of input events with reconnect support.
pub trait EventSource {
    /// Block until exactly one event is available.
    fn read_event(&mut self) -> Result<InputEvent, SessionError>;

    /// Close the device, wait for the settle delay, then re-locate, reopen
    /// and re-grab it. Used uniformly whether the device vanished, the
    /// kernel invalidated the descriptor, or any transient I/O error
    /// occurred.
    fn reopen(&mut self) -> Result<(), SessionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
    Grabbed,
    Faulted,
}

pub struct DeviceSession {
    /// Diagnostic label ("mouse" / "keyboard").
    name: &'static str,
    target: DeviceMatch,
    settle: Duration,
    path: Option<PathBuf>,
    device: Option<Device>,
    state: SessionState,
    /// Events fetched from the kernel but not yet handed to the worker.
    /// Cleared on close so pre-disconnect events are never replayed.
    pending: VecDeque<InputEvent>,
}

impl DeviceSession {
    pub fn new(name: &'static str, target: DeviceMatch, settle: Duration) -> Self {
        Self {
            name,
            target,
            settle,
            path: None,
            device: None,
            state: SessionState::Closed,
            pending: VecDeque::new(),
        }
    }

    /// Locate the backing device node, open it and request exclusive capture.
    pub fn open(&mut self) -> Result<(), SessionError> {
        let path = device::find_device(self.target).ok_or_else(|| {
            SessionError::DeviceUnavailable {
                name: self.name,
                reason: format!("no input device matching {}", self.target),
            }
        })?;

        let mut dev =
            Device::open(&path).map_err(|e| SessionError::DeviceUnavailable {
                name: self.name,
                reason: format!("failed to open {}: {}", path.display(), e),
            })?;
        self.state = SessionState::Open;

        if let Err(e) = dev.grab() {
            self.state = SessionState::Closed;
            return Err(SessionError::DeviceUnavailable {
                name: self.name,
                reason: format!("failed to grab {}: {}", path.display(), e),
            });
        }

        tracing::info!("{} device grabbed: {}", self.name, path.display());
        self.path = Some(path);
        self.device = Some(dev);
        self.state = SessionState::Grabbed;
        Ok(())
    }

    /// Release the grab and close the handle. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut dev) = self.device.take() {
            if let Err(e) = dev.ungrab() {
                // Expected when the device is already gone.
                tracing::debug!("{} ungrab failed: {}", self.name, e);
            }
            tracing::info!("released and closed {} device", self.name);
        }
        self.path = None;
        self.pending.clear();
        self.state = SessionState::Closed;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

impl EventSource for DeviceSession {
    fn read_event(&mut self) -> Result<InputEvent, SessionError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }

            let dev = self.device.as_mut().ok_or_else(|| SessionError::ReadFault {
                name: self.name,
                source: io::Error::new(io::ErrorKind::NotConnected, "device not open"),
            })?;

            match dev.fetch_events() {
                Ok(events) => self.pending.extend(events),
                Err(e) => {
                    self.state = SessionState::Faulted;
                    return Err(SessionError::ReadFault {
                        name: self.name,
                        source: e,
                    });
                }
            }
        }
    }

    fn reopen(&mut self) -> Result<(), SessionError> {
        self.close();
        thread::sleep(self.settle);
        self.open()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn absent_device() -> DeviceSession {
        // A vendor/product pair that no real hardware uses.
        DeviceSession::new("test", DeviceMatch::new(0xffff, 0xfffe), Duration::ZERO)
    }

    #[test]
    fn open_missing_device_reports_unavailable() {
        let mut session = absent_device();
        let err = session.open().unwrap_err();
        assert!(matches!(err, SessionError::DeviceUnavailable { .. }));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn close_is_idempotent() {
        let mut session = absent_device();
        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn read_on_closed_session_is_a_read_fault() {
        let mut session = absent_device();
        let err = session.read_event().unwrap_err();
        assert!(matches!(err, SessionError::ReadFault { .. }));
    }
}
