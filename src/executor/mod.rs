//! Priority task executor.
//!
//! A fixed pool of workers draining three queues: UI, last-effort and
//! background, in that order of urgency. UI workers never touch the
//! background queue, so interactive work cannot starve behind batch work;
//! background workers service everything, highest priority first.
//!
//! Cancellation is cooperative. Every running task gets an
//! [`InterruptContext`] and is expected to poll it at safe checkpoints:
//! before starting expensive work and after finishing it but before
//! committing side effects. There is no preemption.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::ExecutorError;

/// Task urgency, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Interactive work the user is waiting on.
    Ui,
    /// Work that should run soon but after anything interactive.
    LastEffort,
    /// Batch work with no latency expectations.
    Background,
}

/// Cooperative interrupt signal handed to each running task.
///
/// An interrupt is a coarser signal than context cancellation: it means
/// "abandon this task" even while the surrounding request is still valid,
/// e.g. when a higher-priority request bumps out a background one.
#[derive(Debug, Clone)]
pub struct InterruptContext {
    interrupted: Arc<AtomicBool>,
}

impl InterruptContext {
    pub fn new() -> Self {
        Self {
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Raise the interrupt signal.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Returns true at most once per raised signal. Consuming semantics
    /// prevent one interrupt from being handled twice.
    pub fn check_and_consume_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }
}

impl Default for InterruptContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A queued unit of work, already bound to its completion channel.
struct QueuedTask {
    run: Box<dyn FnOnce(InterruptContext) -> BoxFuture<'static, ()> + Send>,
}

struct Inner {
    ui_tx: mpsc::UnboundedSender<QueuedTask>,
    last_tx: mpsc::UnboundedSender<QueuedTask>,
    bg_tx: mpsc::UnboundedSender<QueuedTask>,
    ui_rx: Mutex<mpsc::UnboundedReceiver<QueuedTask>>,
    last_rx: Mutex<mpsc::UnboundedReceiver<QueuedTask>>,
    bg_rx: Mutex<mpsc::UnboundedReceiver<QueuedTask>>,
    notify: Notify,
    running: AtomicBool,
    shutdown: CancellationToken,
    active: std::sync::Mutex<HashMap<u64, InterruptContext>>,
    next_task_id: AtomicU64,
}

/// Bounded worker pool running cancelable, priority-ordered tasks.
pub struct TaskExecutor {
    inner: Arc<Inner>,
    workers: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl TaskExecutor {
    /// Spawn a pool with `ui_workers` dedicated interactive workers (they
    /// also drain the last-effort queue when idle) and `background_workers`
    /// that service all three queues. At least one background worker is
    /// always spawned so every queue has a consumer.
    pub fn new(ui_workers: usize, background_workers: usize) -> Self {
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (last_tx, last_rx) = mpsc::unbounded_channel();
        let (bg_tx, bg_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            ui_tx,
            last_tx,
            bg_tx,
            ui_rx: Mutex::new(ui_rx),
            last_rx: Mutex::new(last_rx),
            bg_rx: Mutex::new(bg_rx),
            notify: Notify::new(),
            running: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            active: std::sync::Mutex::new(HashMap::new()),
            next_task_id: AtomicU64::new(0),
        });

        let mut workers = Vec::new();
        for _ in 0..ui_workers {
            let inner = inner.clone();
            workers.push(tokio::spawn(Self::worker_loop(inner, false)));
        }
        for _ in 0..background_workers.max(1) {
            let inner = inner.clone();
            workers.push(tokio::spawn(Self::worker_loop(inner, true)));
        }

        Self {
            inner,
            workers: std::sync::Mutex::new(workers),
        }
    }

    /// Submit a task and block the calling flow until it completes, fails,
    /// or is canceled.
    ///
    /// A canceled `cancel` token unblocks the caller immediately; the task
    /// itself keeps its queue slot and is expected to notice the interrupt
    /// or its own cancellation checks and bail out cheaply.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        priority: Priority,
        task: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce(InterruptContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(ExecutorError::ShuttingDown.into());
        }

        let (done_tx, done_rx) = oneshot::channel::<anyhow::Result<T>>();
        let queued = QueuedTask {
            run: Box::new(move |ictx| {
                Box::pin(async move {
                    let result = task(ictx).await;
                    let _ = done_tx.send(result);
                })
            }),
        };

        let tx = match priority {
            Priority::Ui => &self.inner.ui_tx,
            Priority::LastEffort => &self.inner.last_tx,
            Priority::Background => &self.inner.bg_tx,
        };
        tx.send(queued)
            .map_err(|_| ExecutorError::ShuttingDown)?;
        self.inner.notify.notify_one();

        tokio::select! {
            _ = cancel.cancelled() => Err(ExecutorError::Cancelled.into()),
            r = done_rx => match r {
                Ok(result) => result,
                Err(_) => Err(ExecutorError::ShuttingDown.into()),
            },
        }
    }

    /// Raise the interrupt signal on every currently running task.
    pub fn interrupt_all(&self) {
        let active = self.inner.active.lock().unwrap();
        debug!("Interrupting {} running tasks", active.len());
        for ictx in active.values() {
            ictx.interrupt();
        }
    }

    /// Stop admission and drain: every already-submitted task still runs to
    /// completion before the workers exit.
    pub async fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.shutdown.cancel();
        let workers: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
    }

    async fn worker_loop(inner: Arc<Inner>, serve_background: bool) {
        loop {
            let task = match Self::next_task(&inner, serve_background).await {
                Some(task) => task,
                None => return,
            };

            let ictx = InterruptContext::new();
            let id = inner.next_task_id.fetch_add(1, Ordering::SeqCst);
            inner.active.lock().unwrap().insert(id, ictx.clone());
            (task.run)(ictx).await;
            inner.active.lock().unwrap().remove(&id);
        }
    }

    /// Pull the next task, highest priority queue first. Returns `None` only
    /// after shutdown once the worker's queues are drained.
    async fn next_task(inner: &Inner, serve_background: bool) -> Option<QueuedTask> {
        loop {
            if let Ok(task) = inner.ui_rx.lock().await.try_recv() {
                return Some(task);
            }
            if let Ok(task) = inner.last_rx.lock().await.try_recv() {
                return Some(task);
            }
            if serve_background {
                if let Ok(task) = inner.bg_rx.lock().await.try_recv() {
                    return Some(task);
                }
            }

            if inner.shutdown.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = inner.notify.notified() => {}
                _ = inner.shutdown.cancelled() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_execute_returns_result() {
        let executor = TaskExecutor::new(1, 1);
        let cancel = CancellationToken::new();
        let result: i32 = executor
            .execute(&cancel, Priority::Ui, |_ictx| async { Ok(41 + 1) })
            .await
            .unwrap();
        assert_eq!(result, 42);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_propagates_task_error() {
        let executor = TaskExecutor::new(1, 1);
        let cancel = CancellationToken::new();
        let result: anyhow::Result<()> = executor
            .execute(&cancel, Priority::Background, |_ictx| async {
                anyhow::bail!("boom")
            })
            .await;
        assert!(result.unwrap_err().to_string().contains("boom"));
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_ui_runs_before_background() {
        // Single worker: block it, queue background then UI, then release.
        let executor = Arc::new(TaskExecutor::new(0, 1));
        let cancel = CancellationToken::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::<&str>::new()));
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let blocker = {
            let executor = executor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                executor
                    .execute(&cancel, Priority::Background, move |_ictx| async move {
                        let _ = gate_rx.await;
                        Ok(())
                    })
                    .await
            })
        };
        // Let the blocker occupy the worker.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let bg = {
            let (executor, cancel, order) = (executor.clone(), cancel.clone(), order.clone());
            tokio::spawn(async move {
                executor
                    .execute(&cancel, Priority::Background, move |_ictx| async move {
                        order.lock().unwrap().push("background");
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let ui = {
            let (executor, cancel, order) = (executor.clone(), cancel.clone(), order.clone());
            tokio::spawn(async move {
                executor
                    .execute(&cancel, Priority::Ui, move |_ictx| async move {
                        order.lock().unwrap().push("ui");
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        gate_tx.send(()).unwrap();
        blocker.await.unwrap().unwrap();
        ui.await.unwrap().unwrap();
        bg.await.unwrap().unwrap();

        // UI was queued after background but ran first.
        assert_eq!(*order.lock().unwrap(), vec!["ui", "background"]);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancelled_caller_unblocks() {
        let executor = TaskExecutor::new(1, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: anyhow::Result<()> = executor
            .execute(&cancel, Priority::Ui, |_ictx| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExecutorError>(),
            Some(ExecutorError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_execute_after_shutdown_is_rejected() {
        let executor = TaskExecutor::new(1, 1);
        executor.shutdown().await;
        let cancel = CancellationToken::new();
        let result: anyhow::Result<()> = executor
            .execute(&cancel, Priority::Ui, |_ictx| async { Ok(()) })
            .await;
        assert!(matches!(
            result.unwrap_err().downcast_ref::<ExecutorError>(),
            Some(ExecutorError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_interrupt_consumed_once() {
        let ictx = InterruptContext::new();
        assert!(!ictx.check_and_consume_interrupt());
        ictx.interrupt();
        assert!(ictx.check_and_consume_interrupt());
        // Consumed: a second check without a new signal is false.
        assert!(!ictx.check_and_consume_interrupt());
    }

    #[tokio::test]
    async fn test_interrupt_all_reaches_running_task() {
        let executor = Arc::new(TaskExecutor::new(1, 1));
        let cancel = CancellationToken::new();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let handle = {
            let executor = executor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                executor
                    .execute(&cancel, Priority::Background, move |ictx| async move {
                        let _ = started_tx.send(());
                        loop {
                            if ictx.check_and_consume_interrupt() {
                                return Ok("interrupted");
                            }
                            tokio::time::sleep(Duration::from_millis(5)).await;
                        }
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        executor.interrupt_all();
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, "interrupted");
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_tasks() {
        let executor = Arc::new(TaskExecutor::new(0, 1));
        let cancel = CancellationToken::new();
        let counter = Arc::new(std::sync::Mutex::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let (executor, cancel, counter) =
                (executor.clone(), cancel.clone(), counter.clone());
            handles.push(tokio::spawn(async move {
                executor
                    .execute(&cancel, Priority::Background, move |_ictx| async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        *counter.lock().unwrap() += 1;
                        Ok(())
                    })
                    .await
            }));
        }
        // Give the submissions a moment to land, then shut down.
        tokio::time::sleep(Duration::from_millis(5)).await;
        executor.shutdown().await;

        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(*counter.lock().unwrap(), 5);
    }
}
