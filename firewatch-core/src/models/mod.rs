pub mod detection;
pub mod log;
pub mod session;
pub mod snapshot;
pub mod statistics;

pub use detection::DetectionRecord;
pub use log::DetectionLog;
pub use session::{DetectionSession, SessionStatus};
pub use snapshot::DetectionSnapshot;
pub use statistics::Statistics;
