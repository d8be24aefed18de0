/// Cross-module test suites
///
/// * `scenario_tests` - feature engineering through calibration on synthetic series
/// * `file_utils_tests` - CSV readers and writers for price and sentiment files
/// * `pipeline_tests` - configuration, retrying fetches and a full pipeline run
pub mod file_utils_tests;
