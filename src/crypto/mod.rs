pub mod state_token;

pub use state_token::{StateTokenError, StateTokenManager};
