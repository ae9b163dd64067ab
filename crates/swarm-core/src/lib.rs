pub mod constants;
pub mod error;
pub mod time;
pub mod types;
pub mod verbs;

pub use constants::*;
pub use error::SwarmError;
pub use time::now_ns;
pub use types::*;
pub use verbs::Verb;
