pub mod step_1_tensor_preparation;
pub mod step_2_lstm_cell;
pub mod step_3_lstm_model_arch;
pub mod step_4_train_model;
pub mod step_5_prediction;
pub mod step_6_model_serialization;

pub use step_4_train_model::{TrainedClassifier, TrainingConfig};
pub use step_5_prediction::{predict_direction, DatedPrediction, HorizonModel};
