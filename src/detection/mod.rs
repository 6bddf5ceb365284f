pub mod engine;
pub mod identity;
pub mod rules;

pub use engine::{Detected, DetectionEngine, DetectionStats};
pub use identity::{resolve, Confidence, IdSource, ResolvedId};
pub use rules::{classify, is_candidate, Classification, Signal};
