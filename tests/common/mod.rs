pub mod harness;
pub mod scripted_fossology;
pub mod strategies;

pub use harness::*;
pub use scripted_fossology::*;
