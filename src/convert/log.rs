//! Conversion audit log.
//!
//! Every mutation the pipeline makes while normalizing, converting or
//! denormalizing a document is appended here as one entry: what was
//! touched, the value before, the action taken and the value after.
//! Callers surface the log to users; nothing in this crate ever changes
//! a field silently.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::boards::{BoardId, SettingsVersion};
use crate::error::Result;

/// How consequential a logged event is. Ordered, so [`ConversionLog::worst`]
/// can summarize a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Internal trace detail.
    Debug,
    /// Neutral information, nothing changed.
    Info,
    /// A value was rewritten into an equivalent form for the target.
    Convert,
    /// A value was clamped, substituted or dropped; data changed.
    Warning,
    /// A record could not be carried over.
    Error,
    /// The source data itself was invalid.
    Invalid,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Convert => "convert",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Invalid => "invalid",
        }
    }
}

impl core::fmt::Display for Severity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log, 0-based. Entries are strictly ordered.
    pub seq: u32,
    pub severity: Severity,
    /// Where the data came from, e.g. `Taranis X9D v218`.
    pub origin: String,
    /// Top-level component, e.g. `Radio` or `Model 03 (Cub)`.
    pub component: String,
    /// Inner component, e.g. `Timer 2`. Empty at radio scope.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub_component: String,
    /// Field name within the component.
    pub field: String,
    /// Unit or kind of the value, e.g. `seconds`, `points`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value_kind: String,
    /// Value before the action, display form.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub old_value: String,
    /// What was done: `clamped`, `dropped`, `defaulted`, ...
    pub action: String,
    /// Value after the action, display form.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub new_value: String,
}

impl core::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{}] {}", self.severity, self.component)?;
        if !self.sub_component.is_empty() {
            write!(f, " / {}", self.sub_component)?;
        }
        write!(f, ": {}", self.field)?;
        if !self.old_value.is_empty() {
            write!(f, " {}", self.old_value)?;
        }
        write!(f, " {}", self.action)?;
        if !self.new_value.is_empty() {
            write!(f, " -> {}", self.new_value)?;
        }
        if !self.value_kind.is_empty() {
            write!(f, " ({})", self.value_kind)?;
        }
        Ok(())
    }
}

/// Ordered list of conversion events plus the current logging scope.
///
/// The pipeline points the scope at whatever it is working on
/// ([`set_component`](Self::set_component) and friends) and then records
/// events against that scope; entries capture the scope at push time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionLog {
    entries: Vec<LogEntry>,
    #[serde(skip)]
    origin: String,
    #[serde(skip)]
    component: String,
    #[serde(skip)]
    sub_component: String,
}

impl ConversionLog {
    pub fn new() -> Self {
        ConversionLog::default()
    }

    /// Tag subsequent entries with the data source they describe.
    pub fn set_origin(&mut self, board: BoardId, version: SettingsVersion) {
        self.origin = format!("{board} {version}");
    }

    /// Point the scope at a top-level component. Clears the sub-component.
    pub fn set_component(&mut self, component: impl Into<String>) {
        self.component = component.into();
        self.sub_component.clear();
    }

    /// Point the scope at an inner component.
    pub fn set_sub_component(&mut self, sub: impl Into<String>) {
        self.sub_component = sub.into();
    }

    /// Append an event against the current scope.
    pub fn push(
        &mut self,
        severity: Severity,
        field: impl Into<String>,
        value_kind: impl Into<String>,
        old_value: impl Into<String>,
        action: impl Into<String>,
        new_value: impl Into<String>,
    ) {
        let entry = LogEntry {
            seq: self.entries.len() as u32,
            severity,
            origin: self.origin.clone(),
            component: self.component.clone(),
            sub_component: self.sub_component.clone(),
            field: field.into(),
            value_kind: value_kind.into(),
            old_value: old_value.into(),
            action: action.into(),
            new_value: new_value.into(),
        };
        if severity >= Severity::Warning {
            warn!(target: "etx_rs::convert", "{entry}");
        } else {
            debug!(target: "etx_rs::convert", "{entry}");
        }
        self.entries.push(entry);
    }

    /// Record a lossless rewrite.
    pub fn converted(
        &mut self,
        field: impl Into<String>,
        kind: impl Into<String>,
        old: impl Into<String>,
        action: impl Into<String>,
        new: impl Into<String>,
    ) {
        self.push(Severity::Convert, field, kind, old, action, new);
    }

    /// Record a lossy change.
    pub fn warning(
        &mut self,
        field: impl Into<String>,
        kind: impl Into<String>,
        old: impl Into<String>,
        action: impl Into<String>,
        new: impl Into<String>,
    ) {
        self.push(Severity::Warning, field, kind, old, action, new);
    }

    /// Record invalid source data that had to be repaired.
    pub fn invalid(
        &mut self,
        field: impl Into<String>,
        kind: impl Into<String>,
        old: impl Into<String>,
        action: impl Into<String>,
        new: impl Into<String>,
    ) {
        self.push(Severity::Invalid, field, kind, old, action, new);
    }

    /// Record a neutral note.
    pub fn info(&mut self, field: impl Into<String>, action: impl Into<String>) {
        self.push(Severity::Info, field, "", "", action, "");
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest severity seen, or `None` on an empty log.
    pub fn worst(&self) -> Option<Severity> {
        self.entries.iter().map(|e| e.severity).max()
    }

    /// Whether any entry changed or rejected data.
    pub fn has_changes(&self) -> bool {
        self.worst().is_some_and(|s| s >= Severity::Convert)
    }

    /// Append another log's entries, renumbering them after ours.
    pub fn merge(&mut self, other: ConversionLog) {
        for mut entry in other.entries {
            entry.seq = self.entries.len() as u32;
            self.entries.push(entry);
        }
    }

    /// Render the log as display lines, one per entry.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format!("{:4}  {entry}\n", entry.seq));
        }
        out
    }

    /// Serialize the entries to pretty JSON for audit reports.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.entries).map_err(|e| {
            crate::error::Error::CorruptFilesystem { detail: format!("log serialization: {e}") }
        })
    }
}
