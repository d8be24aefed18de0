//! Fusion stage: a linear blend of numeric price predictions and daily sentiment

pub mod model;
pub mod training_data;

pub use model::FusionModel;
pub use training_data::{
    build_fusion_training_data, collect_sentiment_series, CsvSentimentSource, FusionTrainingData,
    NewsSentimentSource,
};
