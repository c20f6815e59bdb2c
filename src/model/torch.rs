//! TorchScript artifacts, loaded through libtorch.
//!
//! The module's `forward` must return class indices `[B]` or class scores
//! `[B, C]`. A `predict_proba` method returning `[B, C]` makes the module
//! probabilistic; its absence is detected by probing at load time.

use super::{check_width, Classifier, LabelModel, ModelError, ProbabilityModel};
use crate::reconcile::FeatureMatrix;
use std::path::Path;
use tch::{kind::Kind, CModule, Device, Tensor};

pub struct TorchModel {
    module: CModule,
    device: Device,
    in_dim: usize,
}

pub fn load(path: &Path, in_dim: usize) -> Result<Classifier, ModelError> {
    let device = Device::Cpu;
    let module = CModule::load_on_device(path, device)?;
    let model = TorchModel { module, device, in_dim };

    // Try a dummy row: does `predict_proba` exist and return [1, C]?
    let dummy = FeatureMatrix::zeros(1, in_dim);
    match model.predict_proba(&dummy) {
        Ok(p) if p.len() == 1 && !p[0].is_empty() => {
            tracing::info!(n_classes = p[0].len(), "torchscript module exposes predict_proba");
            Ok(Classifier::Probabilistic(Box::new(model)))
        }
        other => {
            if let Err(e) = other {
                tracing::info!(
                    error = %e,
                    "torchscript module has no usable predict_proba; labels only"
                );
            }
            model.predict_labels(&dummy)?;
            Ok(Classifier::LabelOnly(Box::new(model)))
        }
    }
}

impl TorchModel {
    fn input(&self, x: &FeatureMatrix) -> Result<Tensor, ModelError> {
        check_width(x, self.in_dim)?;
        let flat: Vec<f32> = x.as_slice().iter().map(|v| *v as f32).collect();
        Ok(Tensor::from_slice(&flat)
            .reshape([x.n_rows() as i64, self.in_dim as i64])
            .to_device(self.device))
    }
}

fn to_rows(t: &Tensor) -> Result<Vec<Vec<f64>>, ModelError> {
    let sz = t.size();
    if sz.len() != 2 {
        return Err(ModelError::Output(format!("expected [B, C] output, got {sz:?}")));
    }
    let width = sz[1] as usize;
    let flat = t.to_kind(Kind::Double).contiguous().flatten(0, -1);
    let values = Vec::<f64>::try_from(&flat)?;
    if width == 0 {
        return Ok(vec![Vec::new(); sz[0] as usize]);
    }
    Ok(values.chunks(width).map(<[f64]>::to_vec).collect())
}

impl LabelModel for TorchModel {
    fn predict_labels(&self, x: &FeatureMatrix) -> Result<Vec<usize>, ModelError> {
        let input = self.input(x)?;
        let out = tch::no_grad(|| self.module.forward_ts(&[input]))?;
        let idx = match out.size().len() {
            1 => out.to_kind(Kind::Int64),
            2 => out.argmax(1, false),
            _ => {
                let msg = format!("unexpected forward output size: {:?}", out.size());
                return Err(ModelError::Output(msg));
            }
        };
        let idx = Vec::<i64>::try_from(&idx.contiguous())?;
        idx.into_iter()
            .map(|i| {
                usize::try_from(i)
                    .map_err(|_| ModelError::Output(format!("negative class index {i}")))
            })
            .collect()
    }
}

impl ProbabilityModel for TorchModel {
    fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ModelError> {
        let input = self.input(x)?;
        let out = tch::no_grad(|| self.module.method_ts("predict_proba", &[input]))?;
        to_rows(&out)
    }
}
