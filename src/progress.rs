//! Progress reporting for long running storage operations.
//!
//! Readers and writers that touch many files accept an optional callback.
//! Returning `false` from the callback cancels the operation; the caller
//! gets [`Error::Cancelled`](crate::Error::Cancelled) and any partially
//! written output is cleaned up.

/// What `done` and `total` count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUnit {
    Entries,
    Bytes,
}

/// A progress snapshot, emitted once per unit of work.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent<'a> {
    pub unit: ProgressUnit,
    pub done: u64,
    pub total: u64,
    /// Name of the entry being processed, when there is one.
    pub current: Option<&'a str>,
}

/// Callback signature. Return `false` to cancel.
pub type ProgressFn<'a> = dyn FnMut(&ProgressEvent<'_>) -> bool + 'a;

/// Deliver an event if a callback is installed, turning a `false` return
/// into [`Error::Cancelled`](crate::Error::Cancelled).
pub(crate) fn notify(
    progress: &mut Option<&mut ProgressFn<'_>>,
    event: ProgressEvent<'_>,
) -> crate::Result<()> {
    if let Some(callback) = progress {
        if !callback(&event) {
            return Err(crate::Error::Cancelled);
        }
    }
    Ok(())
}
