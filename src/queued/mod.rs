//! Backend-proposed polls and their validation against the game

mod model;
mod pipeline;
mod validation;

pub use model::{RawQueuedOption, RawQueuedPoll, ValidationReport};
pub use pipeline::{Admission, PipelineDeps, QueuedPollPipeline};
pub use validation::validate;
