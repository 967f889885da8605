//! The configuration strategies that materialize target fleets.
//!
//! Every strategy runs only while the keeper is stopped, holds the single
//! configuring slot for its whole duration and commits the selected fleet the
//! same way: previous fleet dismissed, queue rebuilt in priority order.

use super::{Shared, SpaceKeeper, SpaceKeeperError};
use crate::queue::{PlotterQueue, QueuedWorkSpace};
use crate::space_id::SpaceId;
use crate::workspace::{StateFlags, WorkSpace, WorkSpaceInfo};
use poc_primitives::{BitLength, PublicKey, MIN_DISK_SIZE, USABLE_BIT_LENGTHS};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::error;

/// Exclusive hold on the configuring slot, released on drop.
struct ConfiguringSlot<'a>(&'a AtomicBool);

impl Drop for ConfiguringSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SpaceKeeper {
    /// Claims the configuring slot and clears `configured` until the strategy
    /// concludes successfully.
    fn begin_configuring(&self) -> Result<ConfiguringSlot<'_>, SpaceKeeperError> {
        if self.inner.started() {
            return Err(SpaceKeeperError::IsRunning);
        }
        if self
            .inner
            .configuring
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SpaceKeeperError::IsConfiguring);
        }
        self.inner.configured.store(false, Ordering::SeqCst);
        Ok(ConfiguringSlot(&self.inner.configuring))
    }

    /// Replaces the configured fleet with `result`: the previous fleet is
    /// dismissed, the queue rebuilt in priority order with `would_mine` jobs,
    /// and reset again unless execution was requested.
    fn commit_fleet(
        &self,
        shared: &mut Shared,
        result: Vec<Arc<WorkSpace>>,
        exec_plot: bool,
        exec_mine: bool,
        always_reset: bool,
    ) -> Result<Vec<WorkSpaceInfo>, SpaceKeeperError> {
        if result.is_empty() {
            error!("configuration selected no work spaces");
            return Err(SpaceKeeperError::ConfiguredNothing);
        }

        for ws in std::mem::take(&mut shared.list) {
            ws.set_using(false);
        }
        shared.queue.reset();

        let mut ordered = PlotterQueue::new();
        for ws in &result {
            ordered.push(QueuedWorkSpace::new(Arc::clone(ws), exec_mine));
        }
        while let Some(qws) = ordered.pop() {
            shared.use_work_space(qws.work_space());
            shared.queue.push(qws);
        }

        if always_reset || !(exec_mine || exec_plot) {
            shared.queue.reset();
        }

        let infos = result.iter().map(|ws| ws.info()).collect();
        self.inner.configured.store(true, Ordering::SeqCst);
        Ok(infos)
    }

    /// Materializes a fleet holding `targets[bit_length]` work spaces per bit
    /// length, reusing indexed plots first and generating the shortfall.
    pub fn configure_by_bit_length(
        &self,
        targets: BTreeMap<BitLength, usize>,
        exec_plot: bool,
        exec_mine: bool,
    ) -> Result<Vec<WorkSpaceInfo>, SpaceKeeperError> {
        let _slot = self.begin_configuring()?;
        let mut shared = self.inner.shared.write();

        let mut result = Vec::new();
        let mut current = BTreeMap::new();
        let indexed = self.inner.indexed_by_bit_length(&shared);
        let finished = fill_space_list_by_bit_length(&mut result, &indexed, &mut current, &targets);
        if !finished {
            self.generate_fill_by_bit_length(&mut shared, &mut result, &mut current, &targets)?;
        }

        self.commit_fleet(&mut shared, result, exec_plot, exec_mine, false)
    }

    fn generate_fill_by_bit_length(
        &self,
        shared: &mut Shared,
        result: &mut Vec<Arc<WorkSpace>>,
        current: &mut BTreeMap<BitLength, usize>,
        targets: &BTreeMap<BitLength, usize>,
    ) -> Result<(), SpaceKeeperError> {
        if !self.inner.allow_generate_new_space {
            return Err(SpaceKeeperError::WorkSpaceCannotGenerate);
        }

        let required_bytes = targets
            .iter()
            .map(|(bit_length, &target)| {
                let missing = target.saturating_sub(current.get(bit_length).copied().unwrap_or(0));
                missing as i64 * bit_length.disk_size() as i64
            })
            .sum();
        self.inner.check_os_disk_size(&shared.db_dirs, required_bytes)?;

        for (&bit_length, &target) in targets {
            while current.get(&bit_length).copied().unwrap_or(0) < target {
                let ws = self
                    .inner
                    .generate_new_work_space(&shared.db_dirs, bit_length)?;
                shared.index.insert(Arc::clone(&ws));
                result.push(ws);
                *current.entry(bit_length).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    /// Materializes a fleet filling `target_size` bytes, drawing the largest
    /// bit lengths first and generating until the remainder is below the
    /// smallest usable plot. Provisions only, never schedules execution.
    pub fn configure_by_size(
        &self,
        target_size: u64,
        password: &[u8],
    ) -> Result<Vec<WorkSpaceInfo>, SpaceKeeperError> {
        let _slot = self.begin_configuring()?;

        if target_size < MIN_DISK_SIZE {
            return Err(SpaceKeeperError::ConfigUnderSizeTarget);
        }
        self.inner.wallet.unlock(password)?;

        let mut shared = self.inner.shared.write();
        let mut result = Vec::new();
        let indexed = self.inner.indexed_by_bit_length(&shared);
        let (mut current_size, finished) =
            fill_space_list_by_size(&mut result, &indexed, target_size);
        if !finished {
            if !self.inner.allow_generate_new_space {
                return Err(SpaceKeeperError::WorkSpaceCannotGenerate);
            }
            self.inner.check_os_disk_size(
                &shared.db_dirs,
                target_size as i64 - current_size as i64,
            )?;

            // largest bit lengths first, skipping sizes that no longer fit
            for bit_length in USABLE_BIT_LENGTHS.into_iter().rev() {
                while target_size - current_size >= bit_length.disk_size() {
                    let ws = self
                        .inner
                        .generate_new_work_space(&shared.db_dirs, bit_length)?;
                    shared.index.insert(Arc::clone(&ws));
                    result.push(ws);
                    current_size += bit_length.disk_size();
                }
            }
        }

        self.commit_fleet(&mut shared, result, false, false, true)
    }

    /// Materializes a fleet for exactly the given `(public_key, bit_length)`
    /// pairs, reusing matching indexed plots and generating the rest with the
    /// supplied ordinals.
    pub fn configure_by_pub_key(
        &self,
        targets: BTreeMap<PublicKey, BitLength>,
        ordinals: BTreeMap<PublicKey, u32>,
        exec_plot: bool,
        exec_mine: bool,
    ) -> Result<Vec<WorkSpaceInfo>, SpaceKeeperError> {
        let _slot = self.begin_configuring()?;
        let mut shared = self.inner.shared.write();

        // disk requirement covers only the plots that do not exist yet
        let mut required_bytes = 0i64;
        for (public_key, bit_length) in &targets {
            let ordinal = ordinals.get(public_key).copied().unwrap_or(0);
            let sid = SpaceId::new(ordinal, *public_key, *bit_length).to_string();
            if shared.index.get_all(&sid).is_none() {
                required_bytes += bit_length.disk_size() as i64;
            }
        }
        self.inner.check_os_disk_size(&shared.db_dirs, required_bytes)?;

        let mut result = Vec::new();
        for (&public_key, &bit_length) in &targets {
            let ordinal = ordinals.get(&public_key).copied().unwrap_or(0);
            let id = SpaceId::new(ordinal, public_key, bit_length);
            if let Some(ws) = shared.index.get_all(&id.to_string()) {
                result.push(ws);
                continue;
            }

            let primary = shared
                .db_dirs
                .first()
                .cloned()
                .ok_or(SpaceKeeperError::NoPlotDirs)?;
            let backend = self.inner.backends.open(&primary, id)?;
            let ws = Arc::new(WorkSpace::new(id, backend));
            shared.index.insert(Arc::clone(&ws));
            result.push(ws);
        }

        if result.len() != targets.len() {
            error!(
                target = targets.len(),
                got = result.len(),
                "configured not enough work spaces by public key"
            );
            return Err(SpaceKeeperError::ConfiguredNothing);
        }

        self.commit_fleet(&mut shared, result, exec_plot, exec_mine, false)
    }

    /// Takes exactly the currently indexed work spaces in the states selected
    /// by `flags` as the new fleet.
    ///
    /// Note the long-standing quirk: `configured` flips to `true` only when
    /// the selection is empty, non-empty selections leave it `false`.
    pub fn configure_by_flags(
        &self,
        flags: StateFlags,
        exec_plot: bool,
        exec_mine: bool,
    ) -> Result<Vec<WorkSpaceInfo>, SpaceKeeperError> {
        let _slot = self.begin_configuring()?;
        let mut shared = self.inner.shared.write();

        let mut selected = Vec::new();
        for state in flags.states() {
            selected.extend(shared.index.state_work_spaces(state).cloned());
        }

        for ws in std::mem::take(&mut shared.list) {
            ws.set_using(false);
        }
        shared.queue.reset();

        let mut ordered = PlotterQueue::new();
        for ws in &selected {
            ordered.push(QueuedWorkSpace::new(Arc::clone(ws), true));
        }
        while let Some(qws) = ordered.pop() {
            shared.use_work_space(qws.work_space());
            shared.queue.push(qws);
        }
        if !(exec_mine || exec_plot) {
            shared.queue.reset();
        }

        let infos: Vec<WorkSpaceInfo> = shared.list.iter().map(|ws| ws.info()).collect();
        if infos.is_empty() {
            self.inner.configured.store(true, Ordering::SeqCst);
        }
        Ok(infos)
    }
}

/// Fills `dst` from the per-bit-length buckets until `targets` is satisfied.
/// Returns whether every target count was met.
fn fill_space_list_by_bit_length(
    dst: &mut Vec<Arc<WorkSpace>>,
    src: &BTreeMap<BitLength, Vec<Arc<WorkSpace>>>,
    current: &mut BTreeMap<BitLength, usize>,
    targets: &BTreeMap<BitLength, usize>,
) -> bool {
    let mut finished = true;
    for (bit_length, &target) in targets {
        let Some(bucket) = src.get(bit_length) else {
            finished = false;
            continue;
        };

        for ws in bucket {
            if current.get(bit_length).copied().unwrap_or(0) == target {
                break;
            }
            dst.push(Arc::clone(ws));
            *current.entry(*bit_length).or_insert(0) += 1;
        }
        finished = finished && current.get(bit_length).copied().unwrap_or(0) == target;
    }
    finished
}

/// Greedily fills `dst` from the largest bit lengths down; a candidate that
/// would overshoot `target_size` is skipped rather than partially added.
/// Returns the filled size and whether the remainder is too small to matter.
fn fill_space_list_by_size(
    dst: &mut Vec<Arc<WorkSpace>>,
    src: &BTreeMap<BitLength, Vec<Arc<WorkSpace>>>,
    target_size: u64,
) -> (u64, bool) {
    let mut current_size = 0u64;
    for bit_length in USABLE_BIT_LENGTHS.into_iter().rev() {
        let Some(bucket) = src.get(&bit_length) else {
            continue;
        };
        for ws in bucket {
            if current_size + bit_length.disk_size() > target_size {
                continue;
            }
            current_size += bit_length.disk_size();
            dst.push(Arc::clone(ws));
        }
    }

    let finished = current_size == target_size || target_size - current_size < MIN_DISK_SIZE;
    (current_size, finished)
}
