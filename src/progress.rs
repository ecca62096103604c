//! Cooperative progress reporting for document loads and stores.

/// Receives coarse progress notifications while a document is read or
/// written.
///
/// Both callbacks have empty default bodies, so implementors only override
/// what they display. There is no cancellation channel: aborting a load or
/// store means letting an I/O failure propagate, or discarding the partial
/// document.
pub trait Progress {
    /// A new named phase (section) has started.
    fn phase(&mut self, name: &str) {
        let _ = name;
    }

    /// Overall completion, 0 to 100.
    fn percent(&mut self, value: u8) {
        let _ = value;
    }
}

/// A no-op progress sink.
///
/// Use this when progress display is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl Progress for NullProgress {}
