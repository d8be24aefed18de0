// External imports
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::{activation, backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

// Internal imports
use super::step_2_lstm_cell::SequenceLSTM;

/// Direction classifier: a bidirectional LSTM feeding a second LSTM whose
/// last hidden state passes through two dense layers to a single logit
#[derive(Module, Debug)]
pub struct DirectionLstm<B: Backend> {
    // Model hyperparameters
    input_size: usize,
    hidden_size: usize,
    second_hidden_size: usize,

    // Recurrent layers
    forward_lstm: SequenceLSTM<B>,
    backward_lstm: SequenceLSTM<B>,
    second_lstm: SequenceLSTM<B>,
    recurrent_dropout: Dropout,

    // Dense head
    dense_1: Linear<B>,
    dense_2: Linear<B>,
    dense_dropout: Dropout,
    output_layer: Linear<B>,
}

impl<B: Backend> DirectionLstm<B> {
    /// Forward pass through the model
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape [batch_size, backcandles, input_size]
    /// * `is_training` - Whether the model is in training mode (affects dropout)
    ///
    /// # Returns
    ///
    /// Returns raw logits of shape [batch_size, 1]
    pub fn forward(&self, x: Tensor<B, 3>, is_training: bool) -> Tensor<B, 2> {
        let [batch_size, sequence_length, _] = x.dims();

        // Both directions see the full window, outputs stacked on the feature axis
        let forward_out = self.forward_lstm.forward(x.clone());
        let backward_out = self.backward_lstm.forward(x);
        let mut sequence = Tensor::cat(vec![forward_out, backward_out], 2);
        if is_training {
            sequence = self.recurrent_dropout.forward(sequence);
        }

        let second_out = self.second_lstm.forward(sequence);
        let mut last_output = second_out
            .narrow(1, sequence_length - 1, 1)
            .reshape([batch_size, self.second_hidden_size]);
        if is_training {
            last_output = self.recurrent_dropout.forward(last_output);
        }

        let mut hidden = activation::relu(self.dense_1.forward(last_output));
        if is_training {
            hidden = self.dense_dropout.forward(hidden);
        }
        let hidden = activation::relu(self.dense_2.forward(hidden));

        self.output_layer.forward(hidden)
    }

    /// Probability of an upward move for each window, shape [batch_size, 1]
    pub fn predict_proba(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        activation::sigmoid(self.forward(x, false))
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}

/// Configuration for the DirectionLstm, persisted next to the weights so the
/// network can be rebuilt before loading a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionLstmConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub second_hidden_size: usize,
    pub dense_sizes: [usize; 2],
    pub dropout_rate: f64,
    pub dense_dropout_rate: f64,
}

impl DirectionLstmConfig {
    pub fn new(input_size: usize) -> Self {
        Self {
            input_size,
            hidden_size: 100,
            second_hidden_size: 50,
            dense_sizes: [64, 32],
            dropout_rate: 0.3,
            dense_dropout_rate: 0.2,
        }
    }

    /// Initialize a model from this configuration
    pub fn init<B: Backend>(&self, device: &B::Device) -> DirectionLstm<B> {
        let [dense_1_size, dense_2_size] = self.dense_sizes;

        DirectionLstm {
            input_size: self.input_size,
            hidden_size: self.hidden_size,
            second_hidden_size: self.second_hidden_size,
            forward_lstm: SequenceLSTM::new(self.input_size, self.hidden_size, false, device),
            backward_lstm: SequenceLSTM::new(self.input_size, self.hidden_size, true, device),
            second_lstm: SequenceLSTM::new(
                2 * self.hidden_size,
                self.second_hidden_size,
                false,
                device,
            ),
            recurrent_dropout: DropoutConfig::new(self.dropout_rate).init(),
            dense_1: LinearConfig::new(self.second_hidden_size, dense_1_size).init(device),
            dense_2: LinearConfig::new(dense_1_size, dense_2_size).init(device),
            dense_dropout: DropoutConfig::new(self.dense_dropout_rate).init(),
            output_layer: LinearConfig::new(dense_2_size, 1).init(device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    fn small_config() -> DirectionLstmConfig {
        DirectionLstmConfig {
            input_size: 9,
            hidden_size: 6,
            second_hidden_size: 4,
            dense_sizes: [8, 4],
            dropout_rate: 0.3,
            dense_dropout_rate: 0.2,
        }
    }

    #[test]
    fn test_forward_produces_one_logit_per_window() {
        let device = NdArrayDevice::Cpu;
        let model = small_config().init::<NdArray>(&device);
        let x = Tensor::<NdArray, 3>::ones([5, 15, 9], &device);

        assert_eq!(model.forward(x.clone(), true).dims(), [5, 1]);
        assert_eq!(model.forward(x, false).dims(), [5, 1]);
    }

    #[test]
    fn test_probabilities_are_bounded() {
        let device = NdArrayDevice::Cpu;
        let model = small_config().init::<NdArray>(&device);
        let x = Tensor::<NdArray, 3>::random(
            [3, 10, 9],
            burn::tensor::Distribution::Normal(0.0, 3.0),
            &device,
        );

        let probs = model
            .predict_proba(x)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(probs.len(), 3);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_default_config_layer_sizes() {
        let config = DirectionLstmConfig::new(9);
        assert_eq!(config.hidden_size, 100);
        assert_eq!(config.second_hidden_size, 50);
        assert_eq!(config.dense_sizes, [64, 32]);
    }
}
