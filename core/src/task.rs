use crate::errors::VigilError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// A unit of cooperative work driven by an explicit tick source.
///
/// `run_once` is the single-tick entry point test harnesses call
/// directly; the combinators below compose it into a cancelable polling
/// daemon. No state is left half-mutated across a tick boundary, so a
/// loop can be stopped between any two ticks.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    /// Run the task once. For pollable tasks the output converts into a
    /// bool saying whether any work was found this tick.
    async fn run_once(&mut self) -> Result<Self::Output, VigilError>;
}

/// Polls the inner task, sleeping between ticks that found no work.
#[derive(Debug)]
pub struct WithDelay<T: Task>
where
    T::Output: Into<bool>,
{
    inner: T,
    poll_delay: Duration,
}

impl<T: Task> WithDelay<T>
where
    T::Output: Into<bool>,
{
    pub fn new(inner: T, poll_delay: Duration) -> Self {
        Self { inner, poll_delay }
    }
}

#[async_trait]
impl<T: Task> Task for WithDelay<T>
where
    T::Output: Into<bool>,
{
    type Output = bool;

    async fn run_once(&mut self) -> Result<bool, VigilError> {
        let did_work = self.inner.run_once().await?.into();
        if !did_work {
            sleep(self.poll_delay).await;
        }

        Ok(did_work)
    }
}

/// Drives the inner task until an error occurs or the paired cancel
/// handle fires. Cancellation is only observed between ticks.
#[derive(Debug)]
pub struct CancelableLoop<T: Task> {
    inner: T,
    cancel_rx: oneshot::Receiver<()>,
}

#[async_trait]
impl<T: Task> Task for CancelableLoop<T> {
    type Output = ();

    async fn run_once(&mut self) -> Result<(), VigilError> {
        loop {
            match self.cancel_rx.try_recv() {
                Err(TryRecvError::Empty) => {
                    self.inner.run_once().await?;
                }
                _ => return Ok(()),
            }
        }
    }
}

pub trait TaskExt: Task + Sized {
    /// Wrap into a polling task with the given delay between idle ticks.
    fn into_polling(self, poll_delay: Duration) -> WithDelay<Self>
    where
        Self::Output: Into<bool>;

    /// Wrap into a cancelable infinite loop. Dropping or firing the
    /// returned sender stops the loop at the next tick boundary.
    fn into_loop(self) -> (CancelableLoop<Self>, oneshot::Sender<()>);

    /// Spawn onto the runtime as a background task.
    fn into_bg(self) -> JoinHandle<Result<Self::Output, VigilError>>;
}

impl<T: Task + Sized> TaskExt for T {
    fn into_polling(self, poll_delay: Duration) -> WithDelay<Self>
    where
        Self::Output: Into<bool>,
    {
        WithDelay::new(self, poll_delay)
    }

    fn into_loop(self) -> (CancelableLoop<Self>, oneshot::Sender<()>) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        (
            CancelableLoop {
                inner: self,
                cancel_rx,
            },
            cancel_tx,
        )
    }

    fn into_bg(mut self) -> JoinHandle<Result<Self::Output, VigilError>> {
        tokio::spawn(async move { self.run_once().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingTask {
        ticks: Arc<AtomicUsize>,
        work_for: usize,
    }

    #[async_trait]
    impl Task for CountingTask {
        type Output = bool;

        async fn run_once(&mut self) -> Result<bool, VigilError> {
            let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(tick < self.work_for)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polling_sleeps_only_when_idle() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut task = CountingTask {
            ticks: ticks.clone(),
            work_for: 2,
        }
        .into_polling(Duration::from_secs(5));

        assert!(task.run_once().await.expect("tick runs"));
        assert!(task.run_once().await.expect("tick runs"));
        // Third tick finds no work and sleeps; paused time makes the
        // sleep immediate.
        assert!(!task.run_once().await.expect("tick runs"));
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_at_tick_boundary_when_canceled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let task = CountingTask {
            ticks: ticks.clone(),
            work_for: usize::MAX,
        };
        let (mut looped, cancel_tx) = task.into_loop();

        cancel_tx.send(()).expect("loop is alive");
        looped.run_once().await.expect("loop exits cleanly");
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
