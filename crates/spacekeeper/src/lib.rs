//! # `spacekeeper` library implementation overview
//!
//! This library manages a fleet of on-disk proof-of-capacity plots, called
//! *work spaces*. Each work space is a large precomputed lookup structure
//! bound to a public key and a bit length, able to answer challenge lookups
//! with proofs of the committed disk space.
//!
//! The keeper does four things:
//! * catalogs plots found in the configured data directories and keeps a
//!   per-state index over them (`registered`, `plotting`, `ready`, `mining`);
//! * provisions new plots by drawing fresh public keys from a wallet and
//!   reserving disk space for them;
//! * schedules the CPU/IO-heavy plotting work strictly serially through a
//!   deterministic priority queue consumed by a single background plotter;
//! * answers challenge lookups, fanning batched lookups across a fixed worker
//!   pool and memoizing results (including failures) in a bounded LRU cache.
//!
//! Plotting of a single work space is cancellable at any point and a
//! cancelled work space returns to the `registered` state with its progress
//! preserved, ready to be scheduled again.

#![warn(rust_2018_idioms, missing_debug_implementations)]

pub mod keeper;
pub mod keystore;
pub mod mock;
pub mod plot;
pub mod proof;
pub mod proof_cache;
pub mod queue;
pub mod space_id;
pub(crate) mod utils;
pub mod wallet;
pub mod worker_pool;
pub mod workspace;

pub use keeper::{SpaceKeeper, SpaceKeeperError, SpaceKeeperOptions};
pub use space_id::SpaceId;
pub use workspace::{Action, StateFlags, WorkSpaceInfo, WorkSpaceState};

/// Capacity of the handoff channel between action verbs and the plotter loop.
pub const PLOTTER_MAX_CHAN_SIZE: usize = 1024;

/// Upper bound on memoized proof lookups.
pub const PROOF_CACHE_SIZE: usize = 3000;

/// Number of threads answering batched proof lookups.
pub const MAX_POOL_WORKERS: usize = 32;
