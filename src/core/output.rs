//! Deferred output values.
//!
//! An `Output<T>` settles exactly once, to either a value with metadata or
//! a shared failure. "Unknown" (a value the engine has not determined yet,
//! e.g. during a preview) and "secret" travel with the value through every
//! derivation, as does the set of resources the value causally depends on.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;

use crate::core::error::{Failure, RuntimeError};
use crate::resources::ResourceIdentity;

/// Resources a value causally depends on, ordered by allocation sequence so
/// iteration is deterministic.
pub type DependencySet = BTreeSet<Arc<ResourceIdentity>>;

/// The settled state of an output: the value (absent when unknown) plus its
/// propagated metadata.
#[derive(Debug, Clone)]
pub struct OutputData<T> {
    /// `None` renders "unknown" — there is nothing to inspect.
    pub value: Option<T>,
    /// True if any contributing value was marked sensitive. Never cleared.
    pub secret: bool,
    /// Every resource whose creation or update this value depends on.
    pub depends_on: DependencySet,
}

impl<T> OutputData<T> {
    /// A known, non-secret value with no dependencies.
    pub fn known(value: T) -> Self {
        Self {
            value: Some(value),
            secret: false,
            depends_on: DependencySet::new(),
        }
    }

    /// An unknown value with no dependencies.
    pub fn unknown() -> Self {
        Self {
            value: None,
            secret: false,
            depends_on: DependencySet::new(),
        }
    }

    /// Mark the value sensitive.
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Attach a dependency set.
    pub fn with_dependencies(mut self, depends_on: DependencySet) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn is_known(&self) -> bool {
        self.value.is_some()
    }
}

/// Terminal state of the cell.
pub(crate) enum Settled<T> {
    Data(OutputData<T>),
    Failed(Failure),
}

struct Cell<T> {
    settled: OnceLock<Settled<T>>,
    ready: Notify,
}

/// An asynchronous value with known/secret/dependency metadata.
///
/// Cloning is cheap and shares the settled state. There is no blocking
/// read: consumption happens through the async [`Output::settle`] or the
/// combinators in [`crate::core::combine`].
pub struct Output<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.settled.get() {
            None => write!(f, "Output(pending)"),
            Some(Settled::Failed(failure)) => write!(f, "Output(failed: {failure})"),
            Some(Settled::Data(data)) => write!(
                f,
                "Output(known={}, secret={}, deps={})",
                data.is_known(),
                data.secret,
                data.depends_on.len()
            ),
        }
    }
}

impl<T> Output<T> {
    fn settled_now(state: Settled<T>) -> Self {
        let cell = Cell {
            settled: OnceLock::new(),
            ready: Notify::new(),
        };
        let _ = cell.settled.set(state);
        Self { cell: Arc::new(cell) }
    }

    /// An unresolved output plus the single handle that can settle it.
    pub(crate) fn pending() -> (Self, OutputResolver<T>) {
        let output = Self {
            cell: Arc::new(Cell {
                settled: OnceLock::new(),
                ready: Notify::new(),
            }),
        };
        let resolver = OutputResolver {
            cell: Arc::clone(&output.cell),
        };
        (output, resolver)
    }

    /// Lift a plain value: known, not secret, no dependencies.
    pub fn literal(value: T) -> Self {
        Self::settled_now(Settled::Data(OutputData::known(value)))
    }

    /// Lift a sensitive value: known, secret, no dependencies.
    pub fn secret_literal(value: T) -> Self {
        Self::settled_now(Settled::Data(OutputData::known(value).secret()))
    }

    /// An output that is already settled as unknown.
    pub fn unknown() -> Self {
        Self::settled_now(Settled::Data(OutputData::unknown()))
    }

    /// An output that is already settled as failed.
    pub fn failed(failure: Failure) -> Self {
        Self::settled_now(Settled::Failed(failure))
    }

    /// Drive an output from an async producer. `Ok(Some(v))` settles known,
    /// `Ok(None)` settles unknown, `Err` fails the output.
    pub fn from_pending<F>(future: F, depends_on: DependencySet, secret: bool) -> Self
    where
        T: Send + Sync + 'static,
        F: Future<Output = Result<Option<T>, RuntimeError>> + Send + 'static,
    {
        let (output, resolver) = Self::pending();
        tokio::spawn(async move {
            match future.await {
                Ok(value) => resolver.fulfill(OutputData {
                    value,
                    secret,
                    depends_on,
                }),
                Err(err) => resolver.fail(err.shared()),
            }
        });
        output
    }

    /// Non-blocking inspection of the settled state, for diagnostics.
    pub fn peek(&self) -> Option<Result<&OutputData<T>, &Failure>> {
        self.cell.settled.get().map(|settled| match settled {
            Settled::Data(data) => Ok(data),
            Settled::Failed(failure) => Err(failure),
        })
    }

    /// Suspend until the output settles. Repeated calls observe the same
    /// settled state.
    pub async fn settle(&self) -> Result<OutputData<T>, Failure>
    where
        T: Clone,
    {
        loop {
            let ready = self.cell.ready.notified();
            if let Some(settled) = self.cell.settled.get() {
                return match settled {
                    Settled::Data(data) => Ok(data.clone()),
                    Settled::Failed(failure) => Err(Arc::clone(failure)),
                };
            }
            ready.await;
        }
    }
}

/// Write side of a pending output. Consumed on use, so an output can only
/// ever be settled once.
pub(crate) struct OutputResolver<T> {
    cell: Arc<Cell<T>>,
}

impl<T> OutputResolver<T> {
    pub fn fulfill(self, data: OutputData<T>) {
        self.set(Settled::Data(data));
    }

    pub fn fail(self, failure: Failure) {
        self.set(Settled::Failed(failure));
    }

    fn set(self, state: Settled<T>) {
        if self.cell.settled.set(state).is_err() {
            tracing::warn!("output settled twice; keeping the first state");
        }
        self.cell.ready.notify_waiters();
    }
}
