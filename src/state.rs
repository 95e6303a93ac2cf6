//! Mutable calibration state
//!
//! Ranges, positions and thresholds live outside the kernels so the mode
//! controller can update them batch by batch. The trait hides where the
//! values are held; the in-memory implementation backs unit tests and
//! standalone calibration loops.

use ndarray::Array1;

/// A persisted vector of quantization parameters.
///
/// Writes return the value the state holds afterwards, so callers can feed
/// the updated parameters straight into a kernel.
pub trait MutableState {
    /// Current value.
    fn read(&self) -> Array1<f32>;

    /// Overwrite with `value`.
    fn write_direct(&mut self, value: &Array1<f32>) -> Array1<f32>;

    /// Fold `value` into an exponential moving average.
    ///
    /// With `zero_debias` the accumulator is corrected for its zero
    /// initialization: the first write returns the value itself and later
    /// writes divide out the remaining startup bias.
    fn write_ema(&mut self, value: &Array1<f32>, decay: f32, zero_debias: bool) -> Array1<f32>;
}

/// Heap-backed state for calibration outside any training framework.
#[derive(Debug, Clone)]
pub struct InMemoryState {
    value: Array1<f32>,
    biased: Array1<f32>,
    local_step: u32,
}

impl InMemoryState {
    pub fn zeros(len: usize) -> Self {
        Self {
            value: Array1::zeros(len),
            biased: Array1::zeros(len),
            local_step: 0,
        }
    }

    pub fn from_value(value: Array1<f32>) -> Self {
        let biased = Array1::zeros(value.len());
        Self {
            value,
            biased,
            local_step: 0,
        }
    }

    fn check_len(&self, value: &Array1<f32>) {
        assert_eq!(
            value.len(),
            self.value.len(),
            "state write has {} entries but the state holds {}",
            value.len(),
            self.value.len()
        );
    }
}

impl MutableState for InMemoryState {
    fn read(&self) -> Array1<f32> {
        self.value.clone()
    }

    fn write_direct(&mut self, value: &Array1<f32>) -> Array1<f32> {
        self.check_len(value);
        self.value.assign(value);
        self.value.clone()
    }

    fn write_ema(&mut self, value: &Array1<f32>, decay: f32, zero_debias: bool) -> Array1<f32> {
        self.check_len(value);
        if zero_debias {
            self.biased
                .zip_mut_with(value, |b, &x| *b -= (1.0 - decay) * (*b - x));
            self.local_step += 1;
            let debias = 1.0 - decay.powi(self.local_step as i32);
            self.value = self.biased.mapv(|b| b / debias);
        } else {
            self.value
                .zip_mut_with(value, |v, &x| *v -= (1.0 - decay) * (*v - x));
        }
        self.value.clone()
    }
}

/// Paired min and max state for one quantized tensor.
#[derive(Debug, Clone)]
pub struct RangeState<S: MutableState> {
    pub min: S,
    pub max: S,
}

impl<S: MutableState> RangeState<S> {
    pub fn new(min: S, max: S) -> Self {
        Self { min, max }
    }

    pub fn read(&self) -> (Array1<f32>, Array1<f32>) {
        (self.min.read(), self.max.read())
    }
}

impl RangeState<InMemoryState> {
    pub fn zeros(len: usize) -> Self {
        Self::new(InMemoryState::zeros(len), InMemoryState::zeros(len))
    }
}
