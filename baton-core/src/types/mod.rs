mod event;
mod ticket;

pub use event::*;
pub use ticket::*;
