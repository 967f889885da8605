use crate::plot::PlotBackend;
use crate::space_id::SpaceId;
use parking_lot::Mutex;
use poc_primitives::{BitLength, PublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Lifecycle state of one work space.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkSpaceState {
    /// Indexed, not plotted yet (or plotting was interrupted)
    Registered,
    /// Plot is being computed right now
    Plotting,
    /// Plot is complete and can answer lookups
    Ready,
    /// Plot is complete and enrolled in mining
    Mining,
}

impl WorkSpaceState {
    /// Number of real states.
    pub const COUNT: usize = 4;

    /// Every real state, in scheduling order.
    pub const ALL: [WorkSpaceState; Self::COUNT] = [
        WorkSpaceState::Registered,
        WorkSpaceState::Plotting,
        WorkSpaceState::Ready,
        WorkSpaceState::Mining,
    ];

    /// Scheduling rank, lower ranks plot first.
    pub(crate) fn rank(self) -> u8 {
        match self {
            Self::Registered => 0,
            Self::Plotting => 1,
            Self::Ready => 2,
            Self::Mining => 3,
        }
    }

    /// The flag bit selecting exactly this state.
    pub fn flag(self) -> StateFlags {
        StateFlags(1 << self.rank())
    }
}

impl fmt::Display for WorkSpaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Registered => "registered",
            Self::Plotting => "plotting",
            Self::Ready => "ready",
            Self::Mining => "mining",
        };
        f.write_str(name)
    }
}

/// Bit-set over work space states used to filter queries and batch actions.
///
/// [`StateFlags::ALL`] is a shortcut selecting every live work space
/// regardless of state; it is not a state of its own.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateFlags(u8);

impl StateFlags {
    /// Selects `registered` work spaces.
    pub const REGISTERED: Self = Self(1);
    /// Selects `plotting` work spaces.
    pub const PLOTTING: Self = Self(1 << 1);
    /// Selects `ready` work spaces.
    pub const READY: Self = Self(1 << 2);
    /// Selects `mining` work spaces.
    pub const MINING: Self = Self(1 << 3);
    /// Selects every live work space.
    pub const ALL: Self = Self(1 << 4);

    /// Whether all bits of `other` are set in `self`.
    pub fn contains(self, other: StateFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether this filter short-circuits to the full live list.
    pub fn is_all(self) -> bool {
        self.contains(Self::ALL)
    }

    /// Whether a work space in `state` passes this filter.
    pub fn matches(self, state: WorkSpaceState) -> bool {
        self.is_all() || self.contains(state.flag())
    }

    /// Real states selected by this filter.
    pub fn states(self) -> impl Iterator<Item = WorkSpaceState> {
        WorkSpaceState::ALL
            .into_iter()
            .filter(move |state| self.matches(*state))
    }
}

impl BitOr for StateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Requested action name is not a known verb.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("invalid action {0:?}")]
pub struct InvalidAction(pub String);

/// Verbs that can be applied to a work space.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// Schedule plotting, land in `ready`
    Plot,
    /// Schedule plotting if needed, land in `mining`
    Mine,
    /// Unschedule, interrupt plotting, or demote `mining` to `ready`
    Stop,
    /// Drop the work space from the live list, keeping it indexed
    Remove,
    /// Drop the work space entirely and erase its plot data
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Plot => "plot",
            Self::Mine => "mine",
            Self::Stop => "stop",
            Self::Remove => "remove",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

impl FromStr for Action {
    type Err = InvalidAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plot" => Ok(Self::Plot),
            "mine" => Ok(Self::Mine),
            "stop" => Ok(Self::Stop),
            "remove" => Ok(Self::Remove),
            "delete" => Ok(Self::Delete),
            other => Err(InvalidAction(other.to_string())),
        }
    }
}

/// One plot under management: identity, lifecycle state, live (`using`) flag
/// and the handle to the on-disk plot backend.
pub struct WorkSpace {
    id: SpaceId,
    state: Mutex<WorkSpaceState>,
    using: AtomicBool,
    backend: Arc<dyn PlotBackend>,
}

impl fmt::Debug for WorkSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkSpace")
            .field("id", &self.id.to_string())
            .field("state", &self.state())
            .field("using", &self.is_using())
            .finish_non_exhaustive()
    }
}

impl WorkSpace {
    /// Creates a freshly indexed work space in the `registered` state, not in
    /// use until a configuration selects it.
    pub fn new(id: SpaceId, backend: Arc<dyn PlotBackend>) -> Self {
        Self {
            id,
            state: Mutex::new(WorkSpaceState::Registered),
            using: AtomicBool::new(false),
            backend,
        }
    }

    /// Work space identity.
    pub fn id(&self) -> &SpaceId {
        &self.id
    }

    /// String form of the identity, the primary key in every index.
    pub fn sid(&self) -> String {
        self.id.to_string()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkSpaceState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: WorkSpaceState) {
        *self.state.lock() = state;
    }

    /// Whether the work space belongs to the currently configured fleet.
    pub fn is_using(&self) -> bool {
        self.using.load(Ordering::Acquire)
    }

    pub(crate) fn set_using(&self, using: bool) {
        self.using.store(using, Ordering::Release);
    }

    /// Handle to the on-disk plot.
    pub fn backend(&self) -> &Arc<dyn PlotBackend> {
        &self.backend
    }

    /// Presentational snapshot of the work space.
    pub fn info(&self) -> WorkSpaceInfo {
        WorkSpaceInfo {
            space_id: self.sid(),
            public_key: self.id.public_key(),
            ordinal: self.id.ordinal(),
            bit_length: self.id.bit_length(),
            state: self.state(),
            progress: self.backend.progress(),
            using: self.is_using(),
        }
    }
}

/// Snapshot of one work space for presentational purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkSpaceInfo {
    /// String form of the work space identity
    pub space_id: String,
    /// Public key the plot is bound to
    pub public_key: PublicKey,
    /// Ordinal the wallet assigned to the public key
    pub ordinal: u32,
    /// Bit length of the plot
    pub bit_length: BitLength,
    /// Lifecycle state at snapshot time
    pub state: WorkSpaceState,
    /// Plotting progress in `[0, 1]`
    pub progress: f64,
    /// Whether the work space belongs to the configured fleet
    pub using: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_select_states() {
        let flags = StateFlags::REGISTERED | StateFlags::MINING;
        assert!(flags.matches(WorkSpaceState::Registered));
        assert!(flags.matches(WorkSpaceState::Mining));
        assert!(!flags.matches(WorkSpaceState::Ready));
        assert_eq!(
            flags.states().collect::<Vec<_>>(),
            vec![WorkSpaceState::Registered, WorkSpaceState::Mining]
        );
    }

    #[test]
    fn all_flag_short_circuits() {
        assert!(StateFlags::ALL.matches(WorkSpaceState::Plotting));
        assert_eq!(StateFlags::ALL.states().count(), WorkSpaceState::COUNT);
        assert!(!StateFlags::ALL.contains(StateFlags::READY));
    }

    #[test]
    fn action_names_round_trip() {
        for action in [
            Action::Plot,
            Action::Mine,
            Action::Stop,
            Action::Remove,
            Action::Delete,
        ] {
            assert_eq!(action.to_string().parse::<Action>().unwrap(), action);
        }
        assert_eq!(
            "destroy".parse::<Action>(),
            Err(InvalidAction("destroy".to_string()))
        );
    }
}
