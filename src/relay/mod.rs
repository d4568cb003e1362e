pub mod auth_check;
pub mod deployments;
pub mod dispatch;
pub mod labels;
pub mod send;

pub use auth_check::{AuthCheck, CheckAction, CheckOutcome};
pub use dispatch::{pretty_sorted, DispatchOutcome, WorkflowDispatcher};
pub use send::{PrSender, SendRequest, SendResult};
