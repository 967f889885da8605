//! The single consumer of the plot queue and the directory watcher.

use super::{Inner, PlotterRequest};
use crate::plot::PlotOutcome;
use crate::queue::QueuedWorkSpace;
use crate::workspace::WorkSpaceState;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Long-running loop draining the handoff channel into the priority queue and
/// executing plot jobs strictly one at a time.
///
/// Runs on a blocking task; exits once the quit flag is set or every sender
/// is gone, preserving jobs that never ran for the next start.
pub(super) fn plotter_loop(inner: Arc<Inner>, requests: Receiver<PlotterRequest>) {
    info!("space plotter started");

    loop {
        // drain pending handoffs without blocking
        loop {
            match requests.try_recv() {
                Ok(PlotterRequest::Plot(qws)) => inner.shared.write().queue.push(qws),
                Ok(PlotterRequest::Exit) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if inner.quit.load(Ordering::SeqCst) {
            break;
        }

        match inner.next_plot_job() {
            Some(qws) => inner.run_plot_job(qws),
            // idle; block until a request or shutdown wakes the loop
            None => match requests.recv() {
                Ok(PlotterRequest::Plot(qws)) => inner.shared.write().queue.push(qws),
                Ok(PlotterRequest::Exit) => {}
                Err(_) => break,
            },
        }
    }

    // keep never-run jobs scheduled across a restart
    let mut shared = inner.shared.write();
    while let Ok(request) = requests.try_recv() {
        if let PlotterRequest::Plot(qws) = request {
            shared.queue.push(qws);
        }
    }
    drop(shared);

    info!("space plotter stopped");
}

impl Inner {
    /// Pops the next runnable job, discarding stale entries whose work space
    /// left the fleet or the `registered` state while queued. The returned
    /// work space is already transitioned to `plotting`.
    fn next_plot_job(&self) -> Option<QueuedWorkSpace> {
        let mut shared = self.shared.write();
        loop {
            let qws = shared.queue.pop()?;
            let ws = qws.work_space();
            if !ws.is_using() || ws.state() != WorkSpaceState::Registered {
                debug!(sid = %ws.sid(), state = %ws.state(), "discarding stale plot job");
                shared.queue.finish_popped();
                continue;
            }

            let ws = Arc::clone(ws);
            shared.index.transition(&ws, WorkSpaceState::Plotting);
            return Some(qws);
        }
    }

    /// Executes one plot job and lands the work space in its next state.
    fn run_plot_job(&self, qws: QueuedWorkSpace) {
        let ws = Arc::clone(qws.work_space());
        let sid = ws.sid();
        info!(
            %sid,
            bit_length = %ws.id().bit_length(),
            would_mine = qws.would_mine(),
            "plotting work space"
        );

        let outcome = ws.backend().plot();

        let mut shared = self.shared.write();
        shared.queue.finish_popped();
        // would_mine is re-read here, verbs may have flipped it mid-plot
        let next_state = match outcome {
            Ok(PlotOutcome::Plotted) => {
                if qws.would_mine() {
                    WorkSpaceState::Mining
                } else {
                    WorkSpaceState::Ready
                }
            }
            Ok(PlotOutcome::Interrupted) => {
                info!(%sid, progress = ws.backend().progress(), "plotting interrupted");
                WorkSpaceState::Registered
            }
            Err(error) => {
                error!(%sid, %error, "plotting failed");
                WorkSpaceState::Registered
            }
        };
        shared.index.transition(&ws, next_state);
        drop(shared);

        if next_state != WorkSpaceState::Registered {
            info!(%sid, state = %next_state, "work space plotted");
        }
    }
}

/// Periodically re-scans the data directories, registering plots that
/// appeared on disk since the index was seeded.
pub(super) async fn file_watcher(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.watch_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let db_dirs = inner.shared.read().db_dirs.clone();
        if db_dirs.is_empty() {
            continue;
        }

        let backends = Arc::clone(&inner.backends);
        let scanned =
            tokio::task::spawn_blocking(move || backends.scan(&db_dirs)).await;
        match scanned {
            Ok(Ok(plots)) => inner.register_scanned(plots),
            Ok(Err(error)) => warn!(%error, "failed to scan plot directories"),
            Err(error) => {
                error!(%error, "plot directory scan task failed");
                break;
            }
        }
    }
}
