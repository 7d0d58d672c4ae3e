use std::cell::Cell;
use std::future::Future;
use std::marker::PhantomData;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{AppError, AppResult};

thread_local! {
    static FOREGROUND: Cell<bool> = const { Cell::new(false) };
}

/// Marks the calling thread as the interactive context until the guard is
/// dropped. Store mutations refuse to run on it.
#[must_use = "the thread leaves the foreground when the guard is dropped"]
pub fn enter_foreground() -> ForegroundGuard {
    FOREGROUND.with(|flag| flag.set(true));
    ForegroundGuard { _not_send: PhantomData }
}

pub struct ForegroundGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        FOREGROUND.with(|flag| flag.set(false));
    }
}

pub fn on_foreground() -> bool {
    FOREGROUND.with(Cell::get)
}

/// The bounded background pool every store mutation and subscription runs on.
pub struct AppExecutors {
    runtime: Runtime,
}

impl AppExecutors {
    pub fn new(worker_threads: usize) -> AppResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("alist-background")
            .enable_all()
            .build()
            .map_err(|err| AppError::from(err).with_context("operation", "build_runtime"))?;
        debug!(target: "alist", event = "executors_started", worker_threads);
        Ok(Self { runtime })
    }

    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    pub fn spawn_background<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(fut)
    }

    /// Runs `fut` on the background pool and waits for it from the caller's
    /// thread. The future itself never executes on the calling thread.
    pub fn run_blocking<F, T>(&self, fut: F) -> AppResult<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let task = self.runtime.spawn(fut);
        self.runtime.block_on(task).map_err(|err| {
            AppError::new("RUNTIME/JOIN", err.to_string())
                .with_context("cancelled", err.is_cancelled().to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreground_marker_is_per_thread() {
        let _foreground = enter_foreground();
        assert!(on_foreground());
        let other = std::thread::spawn(on_foreground).join().unwrap();
        assert!(!other);
    }

    #[test]
    fn background_work_runs_off_the_foreground() {
        let _foreground = enter_foreground();
        let executors = AppExecutors::new(1).unwrap();
        let seen_foreground = executors.run_blocking(async { on_foreground() }).unwrap();
        assert!(!seen_foreground);
    }

    #[test]
    fn panicking_background_work_surfaces_as_join_error() {
        let executors = AppExecutors::new(1).unwrap();
        let err = executors
            .run_blocking(async { panic!("boom") })
            .expect_err("panic should surface");
        assert_eq!(err.code(), "RUNTIME/JOIN");
    }

    #[test]
    fn spawned_tasks_share_the_pool() {
        let executors = AppExecutors::new(2).unwrap();
        let handle = executors.handle();
        let task = executors.spawn_background(async move {
            handle.spawn(async { 21 * 2 }).await.unwrap()
        });
        assert_eq!(executors.run_blocking(task).unwrap().unwrap(), 42);
    }
}
