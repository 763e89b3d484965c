//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `WatchService`: applies client watches and forwards upstream obligations
//! - `RelayService`: fans ticks out to the connections watching their symbol

mod relay;
mod watch;

pub use relay::RelayService;
pub use watch::WatchService;
