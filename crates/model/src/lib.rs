pub mod features;
pub mod fusion;
pub mod scorer;
pub mod semantic;
pub mod store;
pub mod structural;

pub use scorer::DualChannelScorer;
pub use store::CalibratedStore;
