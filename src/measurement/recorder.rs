//! Per-location recording state and its checkout by the executing thread.
//!
//! What enter, exit and triggers mutate for a location, its task stack and
//! its event buffer, lives in a [`Recorder`]. The thread executing the
//! location holds the recorder in a thread-local list and reaches it
//! without taking a lock. At thread events the recorder moves between the
//! location and the thread:
//!
//! ```text
//!              attach (begin, join)
//!   Location ───────────────────────▶ thread-local list ──▶ hot path
//!   (parked) ◀─────────────────────── (held)
//!              detach (end, team end, thread exit)
//! ```
//!
//! A parked recorder is reached through the location's mutex, which is how
//! finalization and explicit `_on` calls from other threads see it.

use std::cell::RefCell;
use std::ptr;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{Error, ErrorKind, Result};
use crate::location::Location;
use crate::task::TaskStack;
use crate::trace::{Attribute, ChunkedBuffer};

/// Event buffer of one location and the attributes queued for its next
/// event.
#[derive(Debug)]
pub(crate) struct LocationTrace {
    pub(crate) buffer: ChunkedBuffer,
    pub(crate) pending: Vec<Attribute>,
}

/// Everything the hot path of one location mutates.
#[derive(Debug)]
pub(crate) struct Recorder {
    pub(crate) stack: TaskStack,
    /// `None` when tracing is disabled.
    pub(crate) trace: Option<LocationTrace>,
}

impl Recorder {
    pub(crate) fn new(trace: Option<LocationTrace>) -> Self {
        Self {
            stack: TaskStack::new(),
            trace,
        }
    }
}

struct Held {
    instance: u64,
    location: Arc<Location>,
    recorder: Option<Box<Recorder>>,
}

impl Drop for Held {
    fn drop(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            self.location.park(recorder);
        }
    }
}

thread_local! {
    // Keyed by measurement instance; a thread rarely takes part in more
    // than one measurement.
    static HELD: RefCell<SmallVec<[Held; 2]>> = RefCell::new(SmallVec::new());
}

fn not_current() -> Error {
    Error::new(ErrorKind::ThreadState)
        .with_message("calling thread is not known to the measurement")
}

pub(crate) fn checked_out(location: &Location) -> Error {
    Error::new(ErrorKind::ThreadState)
        .with_message(format!(
            "location \"{}\" is recording on another thread",
            location.name()
        ))
        .with_context(location.error_context())
}

fn unpark(location: &Location) -> Result<Box<Recorder>> {
    location
        .unpark()
        .and_then(|state| state.downcast::<Recorder>().ok())
        .ok_or_else(|| checked_out(location))
}

/// Stores a new location's recorder in the location.
pub(crate) fn park_new(location: &Location, recorder: Recorder) {
    location.park(Box::new(recorder));
}

/// Makes the calling thread the holder of `location`'s recorder for the
/// measurement `instance`. A recorder held before for `instance` is parked
/// first.
pub(crate) fn attach(instance: u64, location: &Arc<Location>) -> Result<()> {
    HELD.with(|held| {
        let mut held = held.borrow_mut();
        if let Some(pos) = held.iter().position(|entry| entry.instance == instance) {
            if Arc::ptr_eq(&held[pos].location, location) {
                return Ok(());
            }
            held.swap_remove(pos);
        }
        let recorder = unpark(location)?;
        held.push(Held {
            instance,
            location: Arc::clone(location),
            recorder: Some(recorder),
        });
        Ok(())
    })
}

/// Parks the recorder the calling thread holds for `instance`, if any.
pub(crate) fn detach(instance: u64) {
    // During thread teardown the list may already be gone; its entries
    // parked themselves when it was dropped.
    let _ = HELD.try_with(|held| {
        if let Ok(mut held) = held.try_borrow_mut() {
            held.retain(|entry| entry.instance != instance);
        }
    });
}

/// Runs `f` on a recorder: the one of `location`, or the one the calling
/// thread holds when `location` is `None`.
///
/// A recorder held by the calling thread is used without locking. Any other
/// is taken out of its location for the duration of `f`; if another thread
/// holds it, [`ErrorKind::ThreadState`] is returned.
pub(crate) fn with_recorder<R>(
    instance: u64,
    location: Option<&Location>,
    f: impl FnOnce(&Location, &mut Recorder) -> Result<R>,
) -> Result<R> {
    let mut f = Some(f);
    let local = HELD
        .try_with(|held| {
            let mut held = held.try_borrow_mut().ok()?;
            let entry = held.iter_mut().find(|entry| {
                entry.instance == instance
                    && location.map_or(true, |location| ptr::eq(&*entry.location, location))
            })?;
            let recorder = entry.recorder.as_deref_mut()?;
            let f = f.take()?;
            Some(f(&entry.location, recorder))
        })
        .ok()
        .flatten();
    if let Some(result) = local {
        return result;
    }
    let (Some(f), Some(location)) = (f, location) else {
        return Err(not_current());
    };
    let mut recorder = unpark(location)?;
    let result = f(location, &mut recorder);
    location.park(recorder);
    result
}

/// Takes the recorder out of `location` for good.
pub(crate) fn take(location: &Location) -> Result<Recorder> {
    unpark(location).map(|recorder| *recorder)
}
