pub mod circuit;
pub mod dlq;
pub mod failure;
pub mod ids;
pub mod listing;
pub mod log;
pub mod rate_limit;
pub mod rule;
pub mod schedule;
pub mod sync;
pub mod user;
pub mod webhook;

pub use circuit::*;
pub use dlq::*;
pub use failure::*;
pub use ids::*;
pub use listing::*;
pub use log::*;
pub use rate_limit::*;
pub use rule::*;
pub use schedule::*;
pub use sync::*;
pub use user::*;
pub use webhook::*;
