use crate::config::InputLayout;
use crate::model::{Classifier, InferenceError, SharedClassifier};
use crate::preprocess::{INPUT_CHANNELS, INPUT_HEIGHT, INPUT_WIDTH, PreprocessedTensor};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tch::{CModule, Device, Kind, Tensor};

/// A TorchScript export of the classifier, run through libtorch.
pub struct TorchClassifier {
    model: Mutex<CModule>,
    device: Device,
    layout: InputLayout,
}

impl TorchClassifier {
    pub fn load(path: &Path, layout: InputLayout) -> Result<Self, InferenceError> {
        let device = Device::cuda_if_available();
        let model = CModule::load_on_device(path, device).map_err(|e| InferenceError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        log::info!("TorchScript model on {:?}, input layout {:?}", device, layout);
        Ok(Self {
            model: Mutex::new(model),
            device,
            layout,
        })
    }

    fn input(&self, tensor: &PreprocessedTensor) -> Tensor {
        let (h, w, c) = (INPUT_HEIGHT as i64, INPUT_WIDTH as i64, INPUT_CHANNELS as i64);
        let input = match self.layout {
            InputLayout::Nhwc => Tensor::from_slice(&tensor.to_nhwc_vec()).view([1, h, w, c]),
            InputLayout::Nchw => Tensor::from_slice(&tensor.to_nchw_vec()).view([1, c, h, w]),
        };
        input.to_device(self.device)
    }
}

impl Classifier for TorchClassifier {
    fn classify(&self, tensor: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError> {
        let input = self.input(tensor);
        let model = self
            .model
            .lock()
            .map_err(|_| InferenceError::Model("model lock poisoned".into()))?;
        let output = tch::no_grad(|| model.forward_ts(&[input]))?;
        // First (only) row of the batch.
        let scores = output.get(0).to_kind(Kind::Float).view([-1]);
        Ok(Vec::<f32>::try_from(&scores)?)
    }
}

pub fn loader(layout: InputLayout) -> impl Fn(&Path) -> Result<SharedClassifier, InferenceError> {
    move |path: &Path| {
        let model = TorchClassifier::load(path, layout)?;
        Ok(Arc::new(model) as SharedClassifier)
    }
}
