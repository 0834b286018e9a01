//! Awaitable helpers: the suspension points a routine can reach besides
//! awaiting an I/O [`Task`](crate::Task).

mod expire;
mod sleep;
mod switch;
mod yield_now;

pub use expire::Expire;
pub use sleep::Sleep;
pub use switch::{RunOn, SwitchTo};
pub use yield_now::YieldNow;
