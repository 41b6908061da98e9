pub mod mutation;
pub mod progress;

pub use mutation::{DeadLetter, Mutation, MutationKind, QueuedMutation};
pub use progress::{
  Confirmation, LearningState, ProgressRecord, Quality, RatingEvent, DEFAULT_EASE_FACTOR,
  MIN_EASE_FACTOR,
};
