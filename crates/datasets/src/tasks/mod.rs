//! Concrete per-task dataset strategies.

pub mod hate_speech;
pub mod mt;
pub mod nli;
pub mod qa;
pub mod sentiment;

pub use hate_speech::HateSpeechDataset;
pub use mt::MtDataset;
pub use nli::NliDataset;
pub use qa::QaDataset;
pub use sentiment::SentimentDataset;
