mod layout;
mod parse;
mod tree;
mod types;

pub use layout::*;
pub use parse::*;
pub use tree::*;
pub use types::*;
