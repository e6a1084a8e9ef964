mod checkpoint;
mod config;
mod context;
mod cost;
mod event_bus;
mod event_log;
mod handoff;
mod index;
mod logging;
mod paths;
mod scratchpad;
mod trace;

pub use checkpoint::*;
pub use config::*;
pub use context::*;
pub use cost::*;
pub use event_bus::*;
pub use event_log::*;
pub use handoff::*;
pub use index::*;
pub use logging::*;
pub use paths::*;
pub use scratchpad::*;
pub use trace::*;
