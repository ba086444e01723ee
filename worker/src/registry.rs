//! Per-thread slot holding the worker that runs on the current thread.
//!
//! A thread starts with an empty slot. The hosting code installs the worker once,
//! right after construction and before entering the main loop. The slot empties
//! itself when the guard returned by `install` is dropped, so it only ever holds a
//! live worker.

use std::{
    cell::RefCell,
    error::Error,
    fmt,
    marker::PhantomData,
    sync::Arc,
    thread::{self, ThreadId},
};

use crate::identity::WorkerInfo;

thread_local! {
    static CURRENT: RefCell<Option<Arc<WorkerInfo>>> = const { RefCell::new(None) };
}

/// Thread-local registry misuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryErr {
    /// The slot handle was used from a thread that doesn't own it.
    WrongThread { owner: ThreadId, caller: ThreadId },
    /// A worker is already installed on this thread.
    Occupied { worker_id: usize },
}

impl fmt::Display for RegistryErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryErr::WrongThread { owner, caller } => {
                write!(f, "worker slot of thread {owner:?} accessed from thread {caller:?}")
            }
            RegistryErr::Occupied { worker_id } => {
                write!(f, "worker {worker_id} is already installed on this thread")
            }
        }
    }
}

impl Error for RegistryErr {}

/// Handle to one thread's worker slot.
///
/// Obtained through `WorkerSlot::get`, it stays bound to the thread that created it.
/// Using it anywhere else fails with `WrongThread` instead of exposing another
/// thread's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSlot {
    owner: ThreadId,
}

impl WorkerSlot {
    /// Returns the slot of the current thread.
    pub fn get() -> Self {
        Self {
            owner: thread::current().id(),
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Installs `worker` into the slot.
    ///
    /// # Returns
    /// A guard that keeps the worker installed until it is dropped.
    ///
    /// # Errors
    /// `WrongThread` if called outside the owning thread, `Occupied` if a worker
    /// was already installed.
    pub fn install(&self, worker: Arc<WorkerInfo>) -> Result<SlotGuard, RegistryErr> {
        self.check_thread()?;

        CURRENT.with_borrow_mut(|slot| match slot {
            Some(current) => Err(RegistryErr::Occupied {
                worker_id: current.worker_id(),
            }),
            None => {
                *slot = Some(worker);
                Ok(SlotGuard {
                    _not_send: PhantomData,
                })
            }
        })
    }

    /// Returns the installed worker, `None` if the slot is still empty.
    ///
    /// # Errors
    /// `WrongThread` if called outside the owning thread.
    pub fn worker(&self) -> Result<Option<Arc<WorkerInfo>>, RegistryErr> {
        self.check_thread()?;
        Ok(CURRENT.with_borrow(Clone::clone))
    }

    pub fn is_empty(&self) -> Result<bool, RegistryErr> {
        self.worker().map(|worker| worker.is_none())
    }

    fn check_thread(&self) -> Result<(), RegistryErr> {
        let caller = thread::current().id();
        if caller != self.owner {
            return Err(RegistryErr::WrongThread {
                owner: self.owner,
                caller,
            });
        }

        Ok(())
    }
}

/// Empties the slot of the thread that installed a worker when dropped.
#[must_use = "the worker is uninstalled as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SlotGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        // The slot may already be gone if the guard outlives it at thread exit.
        let _ = CURRENT.try_with(|slot| slot.borrow_mut().take());
    }
}

/// Returns the worker installed on the current thread, if any.
pub fn current_worker() -> Option<Arc<WorkerInfo>> {
    CURRENT.with_borrow(Clone::clone)
}
