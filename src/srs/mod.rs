pub mod classifier;
pub mod sm2;

pub use classifier::{classify, due_count, next_review_time, StateCounts};
pub use sm2::{compute_next_review, compute_next_review_at, format_interval};
