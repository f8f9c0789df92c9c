//! The segmentation model adaptor.

use crate::common::*;
use tch::{CModule, IValue, TchError};

/// The inference behavior of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferenceMode {
    /// Deterministic inference without stochastic regularization.
    Eval,
    /// Dropout stays active so that repeated passes sample the predictive distribution.
    McDropout,
}

/// A model that produces per-pixel class logits.
pub trait SegmentationModel {
    /// Runs a forward pass on a `[batch, channels, height, width]` input and returns
    /// `[batch, n_classes, height, width]` logits.
    fn predict(&mut self, input: &Tensor) -> Result<Tensor>;

    fn set_mode(&mut self, mode: InferenceMode) -> Result<()>;
}

impl<M> SegmentationModel for &mut M
where
    M: SegmentationModel + ?Sized,
{
    fn predict(&mut self, input: &Tensor) -> Result<Tensor> {
        (**self).predict(input)
    }

    fn set_mode(&mut self, mode: InferenceMode) -> Result<()> {
        (**self).set_mode(mode)
    }
}

/// A TorchScript segmentation model.
///
/// The scripted module may return the logits directly, a tuple whose first
/// element is the logits, or a dictionary with the logits under the `"pred"` key.
pub struct TorchScriptModel {
    module: CModule,
    device: Device,
}

impl TorchScriptModel {
    const DROPOUT_METHOD: &'static str = "turn_on_dropout";

    pub fn load(path: impl AsRef<Path>, device: Device) -> Result<Self> {
        let path = path.as_ref();
        let module = CModule::load_on_device(path, device).with_context(|| {
            format!("failed to load TorchScript module '{}'", path.display())
        })?;
        Ok(Self { module, device })
    }
}

impl SegmentationModel for TorchScriptModel {
    fn predict(&mut self, input: &Tensor) -> Result<Tensor> {
        let input = IValue::Tensor(input.f_to_device(self.device)?);
        let output = self.module.forward_is(&[input])?;
        logits_from_ivalue(output)
    }

    fn set_mode(&mut self, mode: InferenceMode) -> Result<()> {
        self.module.set_eval();

        if mode == InferenceMode::McDropout {
            // prefer a scripted hook that only switches dropout layers
            let no_args: &[IValue] = &[];
            match self.module.method_is(Self::DROPOUT_METHOD, no_args) {
                Ok(_) => {}
                Err(err) if is_missing_method(&err, Self::DROPOUT_METHOD) => {
                    warn!(
                        "the module has no '{}' method, fall back to training mode",
                        Self::DROPOUT_METHOD
                    );
                    self.module.set_train();
                }
                Err(err) => {
                    return Err(anyhow::Error::new(err)
                        .context(format!("failed to call '{}'", Self::DROPOUT_METHOD)));
                }
            }
        }

        Ok(())
    }
}

/// Whether the error reports that the scripted module does not define the method.
fn is_missing_method(err: &TchError, name: &str) -> bool {
    match err {
        TchError::Torch(message) => message.contains(&format!("Method '{}' is not defined", name)),
        _ => false,
    }
}

fn logits_from_ivalue(output: IValue) -> Result<Tensor> {
    match output {
        IValue::Tensor(logits) => Ok(logits),
        IValue::Tuple(values) | IValue::GenericList(values) => {
            let first = values
                .into_iter()
                .next()
                .ok_or_else(|| format_err!("the module returns an empty sequence"))?;
            logits_from_ivalue(first)
        }
        IValue::GenericDict(entries) => {
            let pred = entries
                .into_iter()
                .find_map(|(key, value)| match key {
                    IValue::String(key) if key == "pred" => Some(value),
                    _ => None,
                })
                .ok_or_else(|| format_err!("the module output has no 'pred' entry"))?;
            logits_from_ivalue(pred)
        }
        other => bail!("unsupported module output {:?}", other),
    }
}
