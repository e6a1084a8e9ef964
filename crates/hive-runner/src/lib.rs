mod curate;
mod invoker;
mod parallel;
mod prompts;
mod runner;
mod tracker;
mod validate;

pub use curate::*;
pub use invoker::*;
pub use parallel::*;
pub use prompts::*;
pub use runner::*;
pub use tracker::*;
pub use validate::*;
