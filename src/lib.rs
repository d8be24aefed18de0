pub mod constants;
pub mod direction;
pub mod error;
pub mod fusion;
pub mod numeric;
pub mod pipeline;
pub mod report;
#[cfg(test)]
pub mod test;
pub mod types;
pub mod util {
    pub mod feature_engineering;
    pub mod file_utils;
    pub mod metrics;
    pub mod model_logger;
    pub mod pre_processor;
    pub mod scaler;
    #[cfg(test)]
    pub mod test_utils;
}

/// Package and compiler versions recorded into persisted artifacts
pub mod build_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
