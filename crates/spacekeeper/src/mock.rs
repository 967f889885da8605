//! Deterministic in-memory plot backend for tests and benches.

use crate::plot::{PlotBackend, PlotBackendFactory, PlotError, PlotOutcome, ScannedPlot};
use crate::space_id::SpaceId;
use parking_lot::Mutex;
use poc_primitives::{Challenge, Proof};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PLOT_STEPS: u32 = 20;
const PROGRESS_SCALE: u32 = 1000;

/// In-memory stand-in for one on-disk plot.
///
/// Plotting sleeps in small cancellable steps; proofs are derived
/// deterministically from the plot's public key and the challenge, so
/// repeated lookups are comparable across runs.
#[derive(Debug)]
pub struct MockPlot {
    id: SpaceId,
    step: Duration,
    plotted: AtomicBool,
    cancelled: AtomicBool,
    deleted: AtomicBool,
    fail_next_plot: AtomicBool,
    progress: AtomicU32,
    proof_lookups: AtomicUsize,
}

impl MockPlot {
    /// Creates an unplotted mock whose full plotting run takes `plot_duration`.
    pub fn new(id: SpaceId, plot_duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            id,
            step: plot_duration / PLOT_STEPS,
            plotted: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
            fail_next_plot: AtomicBool::new(false),
            progress: AtomicU32::new(0),
            proof_lookups: AtomicUsize::new(0),
        })
    }

    /// Marks the plot as already computed, as if found complete on disk.
    pub fn set_plotted(&self) {
        self.plotted.store(true, Ordering::SeqCst);
        self.progress.store(PROGRESS_SCALE, Ordering::SeqCst);
    }

    /// Makes the next [`PlotBackend::plot`] call fail.
    pub fn fail_next_plot(&self) {
        self.fail_next_plot.store(true, Ordering::SeqCst);
    }

    /// Whether [`PlotBackend::delete`] was called.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    /// Number of [`PlotBackend::get_proof`] invocations so far.
    pub fn proof_lookups(&self) -> usize {
        self.proof_lookups.load(Ordering::SeqCst)
    }
}

impl PlotBackend for MockPlot {
    fn plot(&self) -> Result<PlotOutcome, PlotError> {
        if self.deleted.load(Ordering::SeqCst) {
            return Err(PlotError::Io("plot data was deleted".to_string()));
        }
        if self.plotted.load(Ordering::SeqCst) {
            return Ok(PlotOutcome::Plotted);
        }
        if self.fail_next_plot.swap(false, Ordering::SeqCst) {
            return Err(PlotError::Corrupted("injected plotting failure".to_string()));
        }

        while self.progress.load(Ordering::SeqCst) < PROGRESS_SCALE {
            // a cancel raised just before the run starts still interrupts it
            if self.cancelled.swap(false, Ordering::SeqCst) {
                return Ok(PlotOutcome::Interrupted);
            }
            std::thread::sleep(self.step);
            self.progress
                .fetch_add(PROGRESS_SCALE / PLOT_STEPS, Ordering::SeqCst);
        }

        self.plotted.store(true, Ordering::SeqCst);
        Ok(PlotOutcome::Plotted)
    }

    fn stop_plot(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn get_proof(&self, challenge: &Challenge) -> Result<Proof, PlotError> {
        self.proof_lookups.fetch_add(1, Ordering::SeqCst);
        if self.deleted.load(Ordering::SeqCst) {
            return Err(PlotError::Io("plot data was deleted".to_string()));
        }
        if !self.plotted.load(Ordering::SeqCst) {
            return Err(PlotError::NotReady);
        }

        let mut hasher = blake3::Hasher::new();
        hasher.update(self.id.public_key().as_ref());
        hasher.update(challenge.as_ref());
        let digest = hasher.finalize();
        let bytes = digest.as_bytes();
        Ok(Proof {
            x: u64::from_le_bytes(bytes[..8].try_into().expect("8 bytes; qed")),
            x_prime: u64::from_le_bytes(bytes[8..16].try_into().expect("8 bytes; qed")),
            bit_length: self.id.bit_length(),
        })
    }

    fn progress(&self) -> f64 {
        f64::from(self.progress.load(Ordering::SeqCst)) / f64::from(PROGRESS_SCALE)
    }

    fn delete(&self) -> Result<(), PlotError> {
        self.deleted.store(true, Ordering::SeqCst);
        self.plotted.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out [`MockPlot`] backends and remembering every one of
/// them for later inspection by tests.
#[derive(Debug)]
pub struct MockPlotFactory {
    plot_duration: Duration,
    plots: Mutex<HashMap<String, Arc<MockPlot>>>,
    scannable: Mutex<Vec<SpaceId>>,
    opened: AtomicUsize,
}

impl MockPlotFactory {
    /// Creates a factory whose plots take `plot_duration` to compute.
    pub fn new(plot_duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            plot_duration,
            plots: Mutex::new(HashMap::new()),
            scannable: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(0),
        })
    }

    /// Registers a plot that subsequent scans will report as found on disk.
    pub fn seed(&self, id: SpaceId) -> Arc<MockPlot> {
        let plot = self.get_or_create(id);
        self.scannable.lock().push(id);
        plot
    }

    /// The mock behind `sid`, if it was ever opened or seeded.
    pub fn plot(&self, sid: &str) -> Option<Arc<MockPlot>> {
        self.plots.lock().get(sid).cloned()
    }

    /// Number of [`PlotBackendFactory::open`] calls, i.e. generations.
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Proof lookups across every plot this factory handed out.
    pub fn total_proof_lookups(&self) -> usize {
        self.plots
            .lock()
            .values()
            .map(|plot| plot.proof_lookups())
            .sum()
    }

    fn get_or_create(&self, id: SpaceId) -> Arc<MockPlot> {
        self.plots
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| MockPlot::new(id, self.plot_duration))
            .clone()
    }
}

impl PlotBackendFactory for MockPlotFactory {
    fn open(&self, _directory: &Path, id: SpaceId) -> Result<Arc<dyn PlotBackend>, PlotError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.get_or_create(id))
    }

    fn scan(&self, _directories: &[PathBuf]) -> Result<Vec<ScannedPlot>, PlotError> {
        let ids = self.scannable.lock().clone();
        Ok(ids
            .into_iter()
            .map(|id| ScannedPlot {
                id,
                backend: self.get_or_create(id) as Arc<dyn PlotBackend>,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poc_primitives::{BitLength, PublicKey};

    fn id(ordinal: u32) -> SpaceId {
        SpaceId::new(
            ordinal,
            PublicKey::from([ordinal as u8; 32]),
            BitLength::new(24).unwrap(),
        )
    }

    #[test]
    fn plotting_is_cancellable_and_resumable() {
        let plot = MockPlot::new(id(0), Duration::from_millis(200));
        // a cancel raised before the run interrupts it immediately and is
        // consumed, it does not poison later runs
        plot.stop_plot();
        assert_eq!(plot.plot().unwrap(), PlotOutcome::Interrupted);
        assert_eq!(plot.progress(), 0.0);

        let runner = {
            let plot = Arc::clone(&plot);
            std::thread::spawn(move || plot.plot())
        };
        std::thread::sleep(Duration::from_millis(30));
        plot.stop_plot();
        assert_eq!(runner.join().unwrap().unwrap(), PlotOutcome::Interrupted);
        let progress = plot.progress();
        assert!(progress > 0.0 && progress < 1.0);

        assert_eq!(plot.plot().unwrap(), PlotOutcome::Plotted);
        assert_eq!(plot.progress(), 1.0);
    }

    #[test]
    fn proofs_are_deterministic_and_gated_on_plotting() {
        let plot = MockPlot::new(id(1), Duration::from_millis(1));
        let challenge = Challenge::from([9u8; 32]);
        assert_eq!(plot.get_proof(&challenge), Err(PlotError::NotReady));

        plot.set_plotted();
        let first = plot.get_proof(&challenge).unwrap();
        let second = plot.get_proof(&challenge).unwrap();
        assert_eq!(first, second);
        assert_eq!(plot.proof_lookups(), 3);
    }

    #[test]
    fn scan_reports_only_seeded_plots() {
        let factory = MockPlotFactory::new(Duration::from_millis(1));
        factory.seed(id(0));
        factory
            .open(Path::new("/tmp"), id(1))
            .expect("mock open never fails");

        let scanned = factory.scan(&[]).unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].id, id(0));
    }
}
