//! Ready-made chain participants.

mod logger;

pub use logger::Logger;
