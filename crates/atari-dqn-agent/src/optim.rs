//! Optimizers for the estimation network

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use serde::{Deserialize, Serialize};

/// RMSprop hyper-parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamsRmsProp {
    /// Learning rate
    pub lr: f64,
    /// Smoothing constant of the squared-gradient average
    pub alpha: f64,
    /// Term added to the denominator
    pub eps: f64,
}

impl Default for ParamsRmsProp {
    fn default() -> Self {
        Self {
            lr: 1e-4,
            alpha: 0.99,
            eps: 1e-8,
        }
    }
}

#[derive(Debug)]
struct VarRmsProp {
    var: Var,
    square_avg: Var,
}

/// RMSprop without momentum or centering
#[derive(Debug)]
pub struct RmsProp {
    vars: Vec<VarRmsProp>,
    params: ParamsRmsProp,
}

impl Optimizer for RmsProp {
    type Config = ParamsRmsProp;

    fn new(vars: Vec<Var>, params: ParamsRmsProp) -> candle_core::Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let square_avg = Var::zeros(var.shape(), var.dtype(), var.device())?;
                Ok(VarRmsProp { var, square_avg })
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { vars, params })
    }

    fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        let ParamsRmsProp { lr, alpha, eps } = self.params;
        for VarRmsProp { var, square_avg } in &self.vars {
            if let Some(g) = grads.get(var) {
                let next_avg = ((square_avg.as_tensor() * alpha)? + (g.sqr()? * (1.0 - alpha))?)?;
                let update = (g / (next_avg.sqrt()? + eps)?)?;
                let next_theta = (var.as_tensor() - (update * lr)?)?;
                square_avg.set(&next_avg)?;
                var.set(&next_theta)?;
            }
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr;
    }
}

/// Optimizer selection, tagged by `kind` in JSON
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OptimizerConfig {
    /// RMSprop
    RmsProp(ParamsRmsProp),
    /// AdamW
    AdamW {
        /// Learning rate
        lr: f64,
        /// Decoupled weight decay
        weight_decay: f64,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::RmsProp(ParamsRmsProp::default())
    }
}

/// The optimizer driving the estimation network
#[derive(Debug)]
pub enum DqnOptimizer {
    /// RMSprop
    RmsProp(RmsProp),
    /// AdamW
    AdamW(AdamW),
}

impl DqnOptimizer {
    /// Build the configured optimizer over `vars`
    pub fn new(config: &OptimizerConfig, vars: Vec<Var>) -> candle_core::Result<Self> {
        Ok(match *config {
            OptimizerConfig::RmsProp(params) => Self::RmsProp(RmsProp::new(vars, params)?),
            OptimizerConfig::AdamW { lr, weight_decay } => Self::AdamW(AdamW::new(
                vars,
                ParamsAdamW {
                    lr,
                    weight_decay,
                    ..ParamsAdamW::default()
                },
            )?),
        })
    }

    /// Backpropagate `loss` and apply one update
    pub fn backward_step(&mut self, loss: &Tensor) -> candle_core::Result<()> {
        match self {
            Self::RmsProp(opt) => opt.backward_step(loss),
            Self::AdamW(opt) => opt.backward_step(loss),
        }
    }

    /// Current learning rate
    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::RmsProp(opt) => opt.learning_rate(),
            Self::AdamW(opt) => opt.learning_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::Device;

    #[test]
    fn test_rmsprop_first_step() {
        let x = Var::new(&[1.0f32, -2.0], &Device::Cpu).unwrap();
        let mut opt = RmsProp::new(vec![x.clone()], ParamsRmsProp::default()).unwrap();
        // d/dx of sum(x^2) is 2x
        let loss = x.as_tensor().sqr().unwrap().sum_all().unwrap();
        opt.backward_step(&loss).unwrap();

        // avg = 0.01 g^2, so the first step moves each weight by lr / sqrt(0.01)
        let values = x.as_tensor().to_vec1::<f32>().unwrap();
        assert_relative_eq!(values[0], 1.0 - 1e-3, epsilon = 1e-6);
        assert_relative_eq!(values[1], -2.0 + 1e-3, epsilon = 1e-6);
    }

    #[test]
    fn test_config_serde_tag() {
        let json = serde_json::to_value(OptimizerConfig::default()).unwrap();
        assert_eq!(json["kind"], "rmsprop");
        let adam: OptimizerConfig =
            serde_json::from_str(r#"{"kind":"adamw","lr":0.001,"weight_decay":0.0}"#).unwrap();
        assert!(matches!(adam, OptimizerConfig::AdamW { .. }));
    }

    #[test]
    fn test_learning_rate() {
        let x = Var::new(&[0.0f32], &Device::Cpu).unwrap();
        let opt = DqnOptimizer::new(&OptimizerConfig::default(), vec![x]).unwrap();
        assert_relative_eq!(opt.learning_rate(), 1e-4);
    }
}
