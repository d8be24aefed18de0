// External imports
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{activation, backend::Backend, Tensor};

/// LSTM layer that walks the backcandles axis one step at a time
#[derive(Module, Debug)]
pub struct SequenceLSTM<B: Backend> {
    input_size: usize,
    hidden_size: usize,
    /// Walk the sequence from the last step to the first
    reverse: bool,

    // Input projections per gate
    input_gate: Linear<B>,
    forget_gate: Linear<B>,
    cell_gate: Linear<B>,
    output_gate: Linear<B>,

    // Recurrent connections
    input_recurrent: Linear<B>,
    forget_recurrent: Linear<B>,
    cell_recurrent: Linear<B>,
    output_recurrent: Linear<B>,
}

impl<B: Backend> SequenceLSTM<B> {
    /// Create a new LSTM layer
    ///
    /// # Arguments
    ///
    /// * `input_size` - Number of input features per time step
    /// * `hidden_size` - Size of hidden state
    /// * `reverse` - Process the sequence back to front
    /// * `device` - Device to place tensors on
    pub fn new(input_size: usize, hidden_size: usize, reverse: bool, device: &B::Device) -> Self {
        let gate = |d_in: usize| LinearConfig::new(d_in, hidden_size).init(device);

        Self {
            input_size,
            hidden_size,
            reverse,
            input_gate: gate(input_size),
            forget_gate: gate(input_size),
            cell_gate: gate(input_size),
            output_gate: gate(input_size),
            input_recurrent: gate(hidden_size),
            forget_recurrent: gate(hidden_size),
            cell_recurrent: gate(hidden_size),
            output_recurrent: gate(hidden_size),
        }
    }

    /// Forward pass through the LSTM layer
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape [batch_size, sequence_length, input_size]
    ///
    /// # Returns
    ///
    /// Hidden states of shape [batch_size, sequence_length, hidden_size],
    /// aligned with the input time steps whichever direction was walked
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let device = x.device();
        let [batch_size, sequence_length, _] = x.dims();

        let mut h = Tensor::zeros([batch_size, self.hidden_size], &device);
        let mut c = Tensor::zeros([batch_size, self.hidden_size], &device);
        let mut outputs: Vec<Tensor<B, 3>> = Vec::with_capacity(sequence_length);

        let steps: Vec<usize> = if self.reverse {
            (0..sequence_length).rev().collect()
        } else {
            (0..sequence_length).collect()
        };

        for t in steps {
            // Input at the current time step [batch_size, input_size]
            let x_t = x
                .clone()
                .narrow(1, t, 1)
                .reshape([batch_size, self.input_size]);

            let i_t = activation::sigmoid(
                self.input_gate.forward(x_t.clone()) + self.input_recurrent.forward(h.clone()),
            );
            let f_t = activation::sigmoid(
                self.forget_gate.forward(x_t.clone()) + self.forget_recurrent.forward(h.clone()),
            );
            let g_t = activation::tanh(
                self.cell_gate.forward(x_t.clone()) + self.cell_recurrent.forward(h.clone()),
            );
            let o_t = activation::sigmoid(
                self.output_gate.forward(x_t) + self.output_recurrent.forward(h.clone()),
            );

            c = f_t * c + i_t * g_t;
            h = o_t * activation::tanh(c.clone());

            outputs.push(h.clone().reshape([batch_size, 1, self.hidden_size]));
        }

        if self.reverse {
            outputs.reverse();
        }
        Tensor::cat(outputs, 1)
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    #[test]
    fn test_output_shape_both_directions() {
        let device = NdArrayDevice::Cpu;
        let x = Tensor::<NdArray, 3>::ones([4, 7, 3], &device);

        let forward = SequenceLSTM::<NdArray>::new(3, 5, false, &device);
        let backward = SequenceLSTM::<NdArray>::new(3, 5, true, &device);

        assert_eq!(forward.forward(x.clone()).dims(), [4, 7, 5]);
        assert_eq!(backward.forward(x).dims(), [4, 7, 5]);
    }

    #[test]
    fn test_forward_direction_is_causal() {
        let device = NdArrayDevice::Cpu;
        let lstm = SequenceLSTM::<NdArray>::new(2, 4, false, &device);

        let base = Tensor::<NdArray, 3>::zeros([1, 6, 2], &device);
        let bumped = base.clone().slice_assign(
            [0..1, 5..6, 0..2],
            Tensor::<NdArray, 3>::ones([1, 1, 2], &device),
        );

        // Changing the last step cannot alter earlier hidden states
        let a = lstm.forward(base).narrow(1, 0, 5).into_data();
        let b = lstm.forward(bumped).narrow(1, 0, 5).into_data();
        a.assert_approx_eq::<f32>(&b, burn::tensor::Tolerance::default());
    }
}
