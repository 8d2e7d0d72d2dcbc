//! Adquery types

mod entry;
mod range;
mod request;

pub use entry::*;
pub use range::*;
pub use request::*;
