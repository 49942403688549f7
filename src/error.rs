use thiserror::Error;

/// Unified error type for store operations.
///
/// The medium is untrusted, so most faults are tolerated in place (a failed
/// program is shredded and retried on the next slot) and never surface here.
/// What remains is running out of erased pages and impossible configurations.
#[derive(Debug, Error)]
pub enum Error {
    /// No free page could be allocated, even after scheduling the collector.
    /// The next attempt may succeed once the collector has run.
    #[error("flash exhausted: no free page for a {0} byte record")]
    OutOfSpace(usize),

    /// The record can never fit a page of the current geometry.
    #[error("record of {len} bytes cannot fit a page payload of {payload} bytes")]
    RecordTooLarge { len: usize, payload: usize },

    /// The configuration or flash geometry does not describe a usable area.
    #[error("unsupported configuration: {0}")]
    Config(&'static str),
}
