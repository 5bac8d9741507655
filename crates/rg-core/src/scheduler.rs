//! Cooperative execution scheduler
//!
//! Two execution contexts exist: the host context (the caller's own stack)
//! and a single guest context that runs the emulated CPU loop. Control moves
//! between them only through [`Scheduler::switch_to_guest`] and
//! [`GuestYield::switch_to_host`]; whichever side did not switch last is
//! blocked, so exactly one of them executes at any instant.
//!
//! The guest context is backed by a dedicated thread with a fixed stack
//! budget. Its execution is gated by two single-slot channels that carry a
//! bare control token and nothing else.

use crate::error::{EngineError, FatalError, Result, SchedulerError};
use crossbeam::channel::{bounded, select, Receiver, Sender};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Execution context identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextId {
    /// The frontend's call stack
    Host,
    /// The emulated CPU loop
    Guest,
}

impl ContextId {
    fn name(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Guest => "guest",
        }
    }
}

/// Lifecycle state of an execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContextState {
    /// No context exists
    Uncreated = 0,
    /// Context exists and waits to be switched into
    Suspended = 1,
    /// Context currently owns control
    Running = 2,
}

impl ContextState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Suspended,
            2 => Self::Running,
            _ => Self::Uncreated,
        }
    }
}

/// Switch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Number of completed host → guest switches
    pub activations: u64,
    /// Number of guest → host yields
    pub yields: u64,
}

/// State shared between the two sides of a context pair
#[derive(Debug)]
struct ContextStates {
    host: AtomicU8,
    guest: AtomicU8,
    activations: AtomicU64,
    yields: AtomicU64,
}

impl ContextStates {
    fn new() -> Self {
        Self {
            host: AtomicU8::new(ContextState::Running as u8),
            guest: AtomicU8::new(ContextState::Uncreated as u8),
            activations: AtomicU64::new(0),
            yields: AtomicU64::new(0),
        }
    }

    fn get(&self, id: ContextId) -> ContextState {
        let raw = match id {
            ContextId::Host => self.host.load(Ordering::SeqCst),
            ContextId::Guest => self.guest.load(Ordering::SeqCst),
        };
        ContextState::from_raw(raw)
    }

    fn set(&self, id: ContextId, state: ContextState) {
        match id {
            ContextId::Host => self.host.store(state as u8, Ordering::SeqCst),
            ContextId::Guest => self.guest.store(state as u8, Ordering::SeqCst),
        }
    }

    /// Hand control from `from` to `to`
    fn transfer(&self, from: ContextId, to: ContextId) {
        self.set(from, ContextState::Suspended);
        self.set(to, ContextState::Running);
        tracing::trace!("Context switch {} -> {}", from.name(), to.name());
    }

    /// Fail unless `target` is waiting to be switched into
    fn check_target(&self, target: ContextId) -> std::result::Result<(), SchedulerError> {
        let state = self.get(target);
        if state != ContextState::Suspended {
            tracing::error!(
                "Rejected switch into {} context in state {:?}",
                target.name(),
                state
            );
            return Err(SchedulerError::InvalidTransition {
                target: target.name(),
                state,
            });
        }
        Ok(())
    }
}

/// Guest-side handle used to give control back to the host.
///
/// Handed to the guest entry procedure on first activation.
pub struct GuestYield {
    resume_rx: Receiver<()>,
    yield_tx: Sender<()>,
    states: Arc<ContextStates>,
}

impl GuestYield {
    /// Suspend the guest and resume the host at its pending `switch_to_guest`.
    ///
    /// Returns once the host switches back. `Err(ContextDestroyed)` means the
    /// context is being torn down; the entry procedure must return.
    pub fn switch_to_host(&self) -> std::result::Result<(), SchedulerError> {
        self.states.check_target(ContextId::Host)?;

        self.states.transfer(ContextId::Guest, ContextId::Host);
        self.states.yields.fetch_add(1, Ordering::SeqCst);

        if self.yield_tx.send(()).is_err() {
            return Err(SchedulerError::ContextDestroyed);
        }
        self.resume_rx
            .recv()
            .map_err(|_| SchedulerError::ContextDestroyed)
    }

    /// Sample a context state from the guest side
    pub fn state(&self, id: ContextId) -> ContextState {
        self.states.get(id)
    }

    fn wait_for_activation(&self) -> bool {
        self.resume_rx.recv().is_ok()
    }
}

/// Host-side half of the guest context
struct GuestContext {
    resume_tx: Sender<()>,
    yield_rx: Receiver<()>,
    /// Disconnects when the guest thread finishes
    exit_rx: Receiver<()>,
    handle: JoinHandle<()>,
    exited: bool,
}

/// Scheduler for the host/guest context pair
pub struct Scheduler {
    guest: Option<GuestContext>,
    states: Arc<ContextStates>,
    stack_size: usize,
}

impl Scheduler {
    /// Create a scheduler whose guest contexts get `stack_size` bytes of stack
    pub fn new(stack_size: usize) -> Self {
        Self {
            guest: None,
            states: Arc::new(ContextStates::new()),
            stack_size,
        }
    }

    /// Allocate the guest context.
    ///
    /// `entry` runs on the first `switch_to_guest`, not before. It is expected
    /// to loop forever, calling [`GuestYield::switch_to_host`] at every frame
    /// boundary, and to return once that call reports an error.
    pub fn create<F>(&mut self, entry: F) -> Result<()>
    where
        F: FnOnce(GuestYield) + Send + 'static,
    {
        if self.guest.is_some() {
            return Err(SchedulerError::AlreadyCreated.into());
        }

        let (resume_tx, resume_rx) = bounded(1);
        let (yield_tx, yield_rx) = bounded(1);
        let (exit_tx, exit_rx) = bounded::<()>(0);
        let yielder = GuestYield {
            resume_rx,
            yield_tx,
            states: Arc::clone(&self.states),
        };

        let handle = std::thread::Builder::new()
            .name("guest-context".to_string())
            .stack_size(self.stack_size)
            .spawn(move || {
                let _exit = exit_tx;
                if yielder.wait_for_activation() {
                    entry(yielder);
                }
            })
            .map_err(|source| {
                EngineError::Fatal(FatalError::ContextAllocation {
                    stack_size: self.stack_size,
                    source,
                })
            })?;

        self.guest = Some(GuestContext {
            resume_tx,
            yield_rx,
            exit_rx,
            handle,
            exited: false,
        });
        self.states.set(ContextId::Guest, ContextState::Suspended);

        tracing::debug!("Created guest context with {:#x}-byte stack", self.stack_size);
        Ok(())
    }

    /// Release the guest context. A no-op when none exists.
    pub fn destroy(&mut self) {
        let Some(guest) = self.guest.take() else {
            return;
        };

        let GuestContext {
            resume_tx,
            yield_rx,
            handle,
            ..
        } = guest;

        // Closing both channels wakes the guest out of its pending yield.
        drop(resume_tx);
        drop(yield_rx);

        if handle.join().is_err() {
            tracing::warn!("Guest context panicked during teardown");
        }

        self.states.set(ContextId::Guest, ContextState::Uncreated);
        tracing::debug!("Destroyed guest context");
    }

    /// Suspend the host and run the guest until its next yield
    pub fn switch_to_guest(&mut self) -> std::result::Result<(), SchedulerError> {
        self.states.check_target(ContextId::Guest)?;

        let guest = match self.guest.as_mut() {
            Some(guest) if !guest.exited => guest,
            _ => return Err(SchedulerError::GuestExited),
        };

        self.states.transfer(ContextId::Host, ContextId::Guest);
        self.states.activations.fetch_add(1, Ordering::SeqCst);

        // A yielder that outlives the entry keeps `yield_rx` open, so the
        // thread exit is watched separately.
        let outcome = match guest.resume_tx.send(()) {
            Ok(()) => select! {
                recv(guest.yield_rx) -> token => token.is_ok(),
                recv(guest.exit_rx) -> _ => false,
            },
            Err(_) => false,
        };

        if !outcome {
            guest.exited = true;
            self.states.transfer(ContextId::Guest, ContextId::Host);
            tracing::error!("Guest context exited without yielding");
            return Err(SchedulerError::GuestExited);
        }

        Ok(())
    }

    /// State of the given context
    pub fn state(&self, id: ContextId) -> ContextState {
        self.states.get(id)
    }

    /// Whether a guest context currently exists
    pub fn has_guest(&self) -> bool {
        self.guest.is_some()
    }

    /// Switch counters since the scheduler was created
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            activations: self.states.activations.load(Ordering::SeqCst),
            yields: self.states.yields.load(Ordering::SeqCst),
        }
    }

    /// Guest stack budget in bytes
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_GUEST_STACK_SIZE;
    use std::sync::atomic::AtomicU32;

    fn counting_entry(counter: Arc<AtomicU32>) -> impl FnOnce(GuestYield) + Send + 'static {
        move |yielder| loop {
            counter.fetch_add(1, Ordering::SeqCst);
            if yielder.switch_to_host().is_err() {
                break;
            }
        }
    }

    #[test]
    fn test_scheduler_creation() {
        let scheduler = Scheduler::new(DEFAULT_GUEST_STACK_SIZE);
        assert_eq!(scheduler.state(ContextId::Host), ContextState::Running);
        assert_eq!(scheduler.state(ContextId::Guest), ContextState::Uncreated);
        assert!(!scheduler.has_guest());
        assert_eq!(scheduler.stats(), SchedulerStats::default());
    }

    #[test]
    fn test_entry_deferred_until_first_switch() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new(DEFAULT_GUEST_STACK_SIZE);

        scheduler.create(counting_entry(counter.clone())).unwrap();
        assert_eq!(scheduler.state(ContextId::Guest), ContextState::Suspended);
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        scheduler.switch_to_guest().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guest_resumes_after_yield() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new(DEFAULT_GUEST_STACK_SIZE);
        scheduler.create(counting_entry(counter.clone())).unwrap();

        for expected in 1..=5 {
            scheduler.switch_to_guest().unwrap();
            assert_eq!(counter.load(Ordering::SeqCst), expected);
            assert_eq!(scheduler.state(ContextId::Host), ContextState::Running);
            assert_eq!(scheduler.state(ContextId::Guest), ContextState::Suspended);
        }

        let stats = scheduler.stats();
        assert_eq!(stats.activations, 5);
        assert_eq!(stats.yields, 5);
    }

    #[test]
    fn test_switch_into_uncreated_guest() {
        let mut scheduler = Scheduler::new(DEFAULT_GUEST_STACK_SIZE);
        let err = scheduler.switch_to_guest().unwrap_err();
        assert_eq!(
            err,
            SchedulerError::InvalidTransition {
                target: "guest",
                state: ContextState::Uncreated,
            }
        );
    }

    #[test]
    fn test_create_twice_rejected() {
        let mut scheduler = Scheduler::new(DEFAULT_GUEST_STACK_SIZE);
        scheduler.create(|_| {}).unwrap();
        let err = scheduler.create(|_| {}).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Scheduler(SchedulerError::AlreadyCreated)
        ));
    }

    #[test]
    fn test_destroy_then_recreate() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new(DEFAULT_GUEST_STACK_SIZE);

        scheduler.create(counting_entry(counter.clone())).unwrap();
        scheduler.switch_to_guest().unwrap();
        scheduler.destroy();
        assert_eq!(scheduler.state(ContextId::Guest), ContextState::Uncreated);

        scheduler.create(counting_entry(counter.clone())).unwrap();
        scheduler.switch_to_guest().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_destroy_never_activated() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new(DEFAULT_GUEST_STACK_SIZE);

        scheduler.create(counting_entry(counter.clone())).unwrap();
        scheduler.destroy();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_guest_exit_reported() {
        let mut scheduler = Scheduler::new(DEFAULT_GUEST_STACK_SIZE);
        scheduler.create(|_| {}).unwrap();

        assert_eq!(scheduler.switch_to_guest(), Err(SchedulerError::GuestExited));
        assert_eq!(scheduler.state(ContextId::Host), ContextState::Running);
        assert_eq!(scheduler.switch_to_guest(), Err(SchedulerError::GuestExited));
    }

    #[test]
    fn test_exclusive_while_guest_runs() {
        let samples = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(DEFAULT_GUEST_STACK_SIZE);

        let recorded = samples.clone();
        scheduler
            .create(move |yielder| loop {
                recorded.lock().push((
                    yielder.state(ContextId::Host),
                    yielder.state(ContextId::Guest),
                ));
                if yielder.switch_to_host().is_err() {
                    break;
                }
            })
            .unwrap();

        for _ in 0..3 {
            scheduler.switch_to_guest().unwrap();
        }

        let samples = samples.lock();
        assert_eq!(samples.len(), 3);
        for &(host, guest) in samples.iter() {
            assert_eq!(host, ContextState::Suspended);
            assert_eq!(guest, ContextState::Running);
        }
    }

    #[test]
    fn test_yield_from_host_rejected() {
        let (leak_tx, leak_rx) = bounded(1);
        let mut scheduler = Scheduler::new(DEFAULT_GUEST_STACK_SIZE);

        scheduler
            .create(move |yielder: GuestYield| {
                leak_tx.send(yielder).unwrap();
            })
            .unwrap();

        // The entry returned while its yielder lives on the host side
        assert_eq!(
            scheduler.switch_to_guest(),
            Err(SchedulerError::GuestExited)
        );

        let leaked = leak_rx.recv().unwrap();
        let err = leaked.switch_to_host().unwrap_err();
        assert_eq!(
            err,
            SchedulerError::InvalidTransition {
                target: "host",
                state: ContextState::Running,
            }
        );
        assert_eq!(scheduler.stats().yields, 0);

        drop(leaked);
        scheduler.destroy();
        assert_eq!(scheduler.state(ContextId::Guest), ContextState::Uncreated);
    }
}
