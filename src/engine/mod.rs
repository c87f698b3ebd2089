//! Core engine: the agent context, the submission executor and the
//! heartbeat that drives scan → estimate → decide → submit.

pub mod context;
pub mod executor;
pub mod heartbeat;

pub use context::{AgentContext, RetryPolicy};
pub use executor::{DailyStats, Executor, OrderRecord, OrderStatus, SubmissionReceipt};
pub use heartbeat::{Heartbeat, HeartbeatConfig, Opportunity, TickReport};
