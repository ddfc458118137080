mod handler;
pub mod observer;
pub mod policy;
pub mod protocol;
mod scheduler;

pub use handler::HandlerState;
pub use observer::{KernelStats, NoopObserver, SessionEnd, SessionInfo, SessionObserver, SessionSummary};
pub use policy::{AllowAll, Decision, DecisionPolicy};
pub use protocol::{Request, Response};
pub use scheduler::{Scheduler, SchedulerBuilder};
