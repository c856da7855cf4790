//! Conversion rule tables.
//!
//! A [`RuleTable`] declares, as data, what happens to a document when it
//! crosses one edge of the version ladder: which values get clamped,
//! truncated, dropped or defaulted. The pipeline walks the ladder one
//! edge at a time and applies the matching step's actions in table order,
//! so a conversion run is reproducible from the table alone.
//!
//! Tables are validated when built: every ladder edge needs a rule for
//! the any-board key, keys must be adjacent ladder pairs, and duplicates
//! are rejected. A table that passes validation cannot leave the pipeline
//! without an applicable step at run time.

use crate::boards::{BoardId, SettingsVersion};
use crate::error::{Error, Result};

/// Capability profile of one settings version. Structural limits that do
/// not depend on the board come from here; board limits come from the
/// catalog, and the effective limit is always the tighter of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionTraits {
    pub version: SettingsVersion,
    /// Timers per model.
    pub timer_count: usize,
    /// Version-imposed name length cap, `None` when only the board caps.
    pub name_cap: Option<usize>,
    /// Points per curve.
    pub curve_points_max: usize,
    /// Timer start value ceiling in seconds.
    pub timer_seconds_max: u32,
    /// Owner callsign and registration id exist.
    pub has_owner: bool,
    /// Model labels exist.
    pub has_labels: bool,
    /// Extended limit and trim flags exist.
    pub has_extended_flags: bool,
}

static TRAITS: [VersionTraits; 5] = [
    VersionTraits {
        version: SettingsVersion::V216,
        timer_count: 1,
        name_cap: Some(8),
        curve_points_max: 9,
        timer_seconds_max: 0xFFFF,
        has_owner: false,
        has_labels: false,
        has_extended_flags: false,
    },
    VersionTraits {
        version: SettingsVersion::V218,
        timer_count: 2,
        name_cap: None,
        curve_points_max: 17,
        timer_seconds_max: 0xFFFF,
        has_owner: false,
        has_labels: false,
        has_extended_flags: true,
    },
    VersionTraits {
        version: SettingsVersion::V219,
        timer_count: 3,
        name_cap: None,
        curve_points_max: 17,
        timer_seconds_max: 0xFFFF,
        has_owner: true,
        has_labels: false,
        has_extended_flags: true,
    },
    VersionTraits {
        version: SettingsVersion::V220,
        timer_count: 3,
        name_cap: None,
        curve_points_max: 21,
        timer_seconds_max: 0x00FF_FFFF,
        has_owner: true,
        has_labels: false,
        has_extended_flags: true,
    },
    VersionTraits {
        version: SettingsVersion::V221,
        timer_count: 3,
        name_cap: None,
        curve_points_max: 21,
        timer_seconds_max: 0x00FF_FFFF,
        has_owner: true,
        has_labels: true,
        has_extended_flags: true,
    },
];

/// Capability profile for `version`.
pub fn version_traits(version: SettingsVersion) -> &'static VersionTraits {
    &TRAITS[version.ladder_index()]
}

/// Which documents a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleKey {
    /// `None` matches every board; a board-specific key beats it.
    pub board: Option<BoardId>,
    pub from: SettingsVersion,
    pub to: SettingsVersion,
}

impl core::fmt::Display for RuleKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.board {
            Some(board) => write!(f, "{board} {} -> {}", self.from, self.to),
            None => write!(f, "any board {} -> {}", self.from, self.to),
        }
    }
}

/// One value-level action within a version step. Applied in declaration
/// order; every application that changes data is logged by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Clamp timer start values to `max` seconds.
    ClampTimerSeconds { max: u32 },
    /// Truncate radio and model names to `max` characters.
    TruncateNames { max: usize },
    /// Drop timers beyond the first `keep`.
    LimitTimers { keep: usize },
    /// Reduce curves to at most `max` points, dropping interior points
    /// and keeping the endpoints.
    LimitCurvePoints { max: usize },
    /// Remove owner callsign and registration id.
    DropOwnerFields,
    /// Clear extended limit and trim flags.
    DropExtendedFlags,
    /// Keep only the first label per model; the survivor becomes the
    /// legacy category.
    CollapseLabels,
}

/// All actions for one ladder edge under one key.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionStep {
    pub key: RuleKey,
    pub actions: Vec<StepAction>,
}

/// A validated, ordered set of version steps.
#[derive(Debug, Clone)]
pub struct RuleTable {
    steps: Vec<VersionStep>,
}

impl RuleTable {
    /// The built-in table covering every supported version edge.
    pub fn standard() -> RuleTable {
        // kept in sync with `from_steps` by the validation test below
        RuleTable { steps: standard_steps() }
    }

    /// Build a table from explicit steps, validating it:
    /// keys must span exactly one ladder edge, appear at most once, and
    /// every edge (both directions) must have an any-board step.
    pub fn from_steps(steps: Vec<VersionStep>) -> Result<RuleTable> {
        for step in &steps {
            let from = step.key.from.ladder_index() as isize;
            let to = step.key.to.ladder_index() as isize;
            if (from - to).abs() != 1 {
                return Err(Error::InvalidRuleTable {
                    detail: format!("step {} does not span one ladder edge", step.key),
                });
            }
        }

        for (i, step) in steps.iter().enumerate() {
            if steps[..i].iter().any(|s| s.key == step.key) {
                return Err(Error::InvalidRuleTable {
                    detail: format!("duplicate step {}", step.key),
                });
            }
        }

        for window in SettingsVersion::LADDER.windows(2) {
            for (from, to) in [(window[0], window[1]), (window[1], window[0])] {
                let covered = steps
                    .iter()
                    .any(|s| s.key.board.is_none() && s.key.from == from && s.key.to == to);
                if !covered {
                    return Err(Error::InvalidRuleTable {
                        detail: format!("no any-board step for {from} -> {to}"),
                    });
                }
            }
        }

        Ok(RuleTable { steps })
    }

    /// Step to apply for one ladder edge. A board-specific step wins over
    /// the any-board step.
    pub fn step_for(
        &self,
        board: BoardId,
        from: SettingsVersion,
        to: SettingsVersion,
    ) -> Option<&VersionStep> {
        self.steps
            .iter()
            .find(|s| s.key.board == Some(board) && s.key.from == from && s.key.to == to)
            .or_else(|| {
                self.steps
                    .iter()
                    .find(|s| s.key.board.is_none() && s.key.from == from && s.key.to == to)
            })
    }

    pub fn steps(&self) -> &[VersionStep] {
        &self.steps
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        RuleTable::standard()
    }
}

/// Ladder edges from `from` to `to`, in application order. Empty when the
/// versions are equal.
pub(crate) fn ladder_path(
    from: SettingsVersion,
    to: SettingsVersion,
) -> Vec<(SettingsVersion, SettingsVersion)> {
    let ladder = SettingsVersion::LADDER;
    let a = from.ladder_index();
    let b = to.ladder_index();
    let mut edges = Vec::new();
    if a < b {
        for i in a..b {
            edges.push((ladder[i], ladder[i + 1]));
        }
    } else {
        for i in (b..a).rev() {
            edges.push((ladder[i + 1], ladder[i]));
        }
    }
    edges
}

fn any(from: SettingsVersion, to: SettingsVersion, actions: Vec<StepAction>) -> VersionStep {
    VersionStep { key: RuleKey { board: None, from, to }, actions }
}

fn standard_steps() -> Vec<VersionStep> {
    use SettingsVersion::*;
    use StepAction::*;

    vec![
        // upgrades: new capabilities start at their defaults
        any(V216, V218, vec![]),
        any(V218, V219, vec![]),
        any(V219, V220, vec![]),
        any(V220, V221, vec![]),
        // downgrades: shed what the older layout cannot hold
        any(V218, V216, vec![
            TruncateNames { max: 8 },
            LimitTimers { keep: 1 },
            LimitCurvePoints { max: 9 },
            DropExtendedFlags,
        ]),
        any(V219, V218, vec![LimitTimers { keep: 2 }, DropOwnerFields]),
        any(V220, V219, vec![
            ClampTimerSeconds { max: 0xFFFF },
            LimitCurvePoints { max: 17 },
        ]),
        any(V221, V220, vec![CollapseLabels]),
    ]
}
