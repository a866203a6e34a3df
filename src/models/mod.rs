pub mod case;
pub mod enums;
pub mod report;

pub use case::*;
pub use enums::*;
pub use report::*;

#[cfg(test)]
pub(crate) use case::fixtures;
