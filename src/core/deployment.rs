//! Deployment context — one evaluation of a program against one engine.
//!
//! Tracks every spawned registration task, aggregates terminal failures,
//! and carries the cancellation token the gateway observes at suspension
//! points. One resource's failure never aborts siblings already in
//! flight; `settle` reports everything once the dust settles.

use std::future::Future;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::core::error::Failure;
use crate::transport::EngineTransport;

pub struct Deployment {
    transport: Arc<dyn EngineTransport>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    failures: Mutex<Vec<Failure>>,
}

impl Deployment {
    pub fn new(transport: Arc<dyn EngineTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn transport(&self) -> Arc<dyn EngineTransport> {
        Arc::clone(&self.transport)
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort the evaluation. Cooperative: in-flight work observes this at
    /// its next suspension point and fails its outputs.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    pub(crate) fn record_failure(&self, failure: &Failure) {
        error!(%failure, "deployment failure");
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(failure));
    }

    pub fn failure_count(&self) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drain every outstanding task — including tasks spawned while
    /// draining — then report the aggregated terminal failures. Failures
    /// are taken: a second call settles whatever started since.
    pub async fn settle(&self) -> Result<(), Vec<Failure>> {
        loop {
            let drained =
                mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
            if drained.is_empty() {
                break;
            }
            for handle in drained {
                let _ = handle.await;
            }
        }
        let failures =
            mem::take(&mut *self.failures.lock().unwrap_or_else(PoisonError::into_inner));
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::RuntimeError;
    use crate::transport::local::LocalEngine;

    fn deployment() -> Arc<Deployment> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        Deployment::new(Arc::new(LocalEngine::new("dev", "app")))
    }

    #[tokio::test]
    async fn test_deployment_settle_empty_is_ok() {
        let ctx = deployment();
        assert!(ctx.settle().await.is_ok());
    }

    #[tokio::test]
    async fn test_deployment_settle_waits_for_tasks() {
        let ctx = deployment();
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let task_flag = Arc::clone(&flag);
        ctx.spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            task_flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        ctx.settle().await.unwrap();
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deployment_settle_drains_nested_spawns() {
        let ctx = deployment();
        let inner_ctx = Arc::clone(&ctx);
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let inner_flag = Arc::clone(&flag);
        ctx.spawn(async move {
            inner_ctx.spawn(async move {
                inner_flag.store(true, std::sync::atomic::Ordering::SeqCst);
            });
        });
        ctx.settle().await.unwrap();
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deployment_settle_aggregates_failures() {
        let ctx = deployment();
        let first = RuntimeError::Cancelled.shared();
        let second = RuntimeError::UnknownTypeToken {
            token: "pkg::Ghost".to_string(),
        }
        .shared();
        ctx.record_failure(&first);
        ctx.record_failure(&second);
        let failures = ctx.settle().await.unwrap_err();
        assert_eq!(failures.len(), 2);
        assert!(Arc::ptr_eq(&failures[0], &first));
    }

    #[tokio::test]
    async fn test_deployment_cancel_is_observable() {
        let ctx = deployment();
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
        ctx.cancellation().cancelled().await;
    }
}
