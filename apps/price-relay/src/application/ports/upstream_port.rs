//! Upstream Port (Driven Port)
//!
//! Interface for issuing subscription commands to the market-data feed.

use crate::domain::streaming::Symbol;

/// Port for subscription commands sent to the upstream feed.
///
/// Commands are fire-and-forget: implementations queue them without
/// blocking and never report acknowledgement. Calls made from inside a
/// registry critical section must not block.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamPort: Send + Sync {
    /// Start receiving trades for `symbol`.
    fn subscribe(&self, symbol: &Symbol);

    /// Stop receiving trades for `symbol`.
    fn unsubscribe(&self, symbol: &Symbol);
}
