pub mod ewma;
pub mod forest;
pub mod holtwinters;
pub mod stats;

// Re-exports for convenience
pub use ewma::{Ewma, decay_weight, smoothing_factor};
pub use forest::{ForestParams, RegressionForest};
pub use holtwinters::HoltWinters;
