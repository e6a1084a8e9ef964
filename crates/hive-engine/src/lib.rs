mod adapt;
mod challenge;
mod interpreter;
mod select;
mod workflows;

pub use adapt::*;
pub use challenge::*;
pub use interpreter::*;
pub use select::*;
pub use workflows::*;
