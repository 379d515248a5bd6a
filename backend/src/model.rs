use crate::preprocess::PreprocessedTensor;
use actix_web::web;
use shared::AnimalClass;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model file not found at {}", .0.display())]
    ModelMissing(PathBuf),
    #[error("Failed to load model from {}: {reason}", .path.display())]
    Load { path: PathBuf, reason: String },
    #[error("Model error: {0}")]
    Model(String),
    #[error("Model returned an empty output")]
    EmptyOutput,
    #[error("Model output index {index} has no label ({labels} labels known)")]
    UnknownClass { index: usize, labels: usize },
    #[error("Inference task failed: {0}")]
    Blocking(String),
}

#[cfg(feature = "torch")]
impl From<tch::TchError> for InferenceError {
    fn from(err: tch::TchError) -> Self {
        InferenceError::Model(err.to_string())
    }
}

/// A loaded classification model: one normalized image batch in, one score per
/// class out.
pub trait Classifier: Send + Sync {
    fn classify(&self, input: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError>;
}

pub type SharedClassifier = Arc<dyn Classifier>;

type Loader = dyn Fn(&Path) -> Result<SharedClassifier, InferenceError> + Send + Sync;

/// Process-wide holder for the model. The artifact is loaded at most once,
/// on the first call to [`ModelStore::get`], and shared read-only afterwards.
/// A failed load leaves the store empty so a later call can try again.
pub struct ModelStore {
    path: PathBuf,
    loader: Arc<Loader>,
    model: OnceCell<SharedClassifier>,
}

impl ModelStore {
    pub fn new<F>(path: impl Into<PathBuf>, loader: F) -> Self
    where
        F: Fn(&Path) -> Result<SharedClassifier, InferenceError> + Send + Sync + 'static,
    {
        Self {
            path: path.into(),
            loader: Arc::new(loader),
            model: OnceCell::new(),
        }
    }

    /// A store that is already initialized with `model`.
    #[cfg(test)]
    pub fn preloaded(model: SharedClassifier) -> Self {
        Self {
            path: PathBuf::new(),
            loader: Arc::new(|path: &Path| -> Result<SharedClassifier, InferenceError> {
                Err(InferenceError::ModelMissing(path.to_path_buf()))
            }),
            model: OnceCell::new_with(Some(model)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    pub async fn get(&self) -> Result<SharedClassifier, InferenceError> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let path = self.path.clone();
                let loader = Arc::clone(&self.loader);
                log::info!("Loading model from {}", path.display());
                let model = web::block(move || {
                    if !path.is_file() {
                        return Err(InferenceError::ModelMissing(path));
                    }
                    loader(&path)
                })
                .await
                .map_err(|e| InferenceError::Blocking(e.to_string()))??;
                log::info!("Model loaded from {}", self.path.display());
                Ok::<_, InferenceError>(model)
            })
            .await?;
        Ok(Arc::clone(model))
    }
}

/// Index of the largest score. Ties resolve to the lowest index.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((index, score)),
        }
    }
    best.map(|(index, _)| index)
}

pub fn label_for(scores: &[f32]) -> Result<AnimalClass, InferenceError> {
    let index = argmax(scores).ok_or(InferenceError::EmptyOutput)?;
    AnimalClass::from_index(index).ok_or(InferenceError::UnknownClass {
        index,
        labels: AnimalClass::LEN,
    })
}

/// Runs the model on the blocking pool and maps its output to a label.
pub async fn predict(
    model: SharedClassifier,
    input: PreprocessedTensor,
) -> Result<AnimalClass, InferenceError> {
    let scores = web::block(move || model.classify(&input))
        .await
        .map_err(|e| InferenceError::Blocking(e.to_string()))??;
    log::debug!("Model scores: {:?}", scores);
    label_for(&scores)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Returns the same scores for every input.
    pub(crate) struct FixedScores(pub Vec<f32>);

    impl Classifier for FixedScores {
        fn classify(&self, _input: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    pub(crate) struct Failing;

    impl Classifier for Failing {
        fn classify(&self, _input: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError> {
            Err(InferenceError::Model("graph execution failed".into()))
        }
    }

    pub(crate) fn one_hot(class: AnimalClass) -> Vec<f32> {
        let mut scores = vec![0.01; AnimalClass::LEN];
        scores[class as usize] = 0.96;
        scores
    }

    fn existing_file() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml")
    }

    #[test]
    fn argmax_picks_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[0.5, 0.5, 0.1]), Some(0));
        assert_eq!(argmax(&[-3.0, -1.0, -2.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn scores_map_to_labels_in_order() {
        assert_eq!(label_for(&one_hot(AnimalClass::Cat)).unwrap(), AnimalClass::Cat);
        assert_eq!(label_for(&one_hot(AnimalClass::Cow)).unwrap(), AnimalClass::Cow);
        assert_eq!(label_for(&one_hot(AnimalClass::Horse)).unwrap(), AnimalClass::Horse);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let scores = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        assert!(matches!(
            label_for(&scores),
            Err(InferenceError::UnknownClass { index: 6, labels: 5 })
        ));
        assert!(matches!(label_for(&[]), Err(InferenceError::EmptyOutput)));
    }

    #[actix_web::test]
    async fn missing_artifact_is_reported() {
        let store = ModelStore::new("/nonexistent/model.keras", |_: &Path| {
            Ok(Arc::new(FixedScores(one_hot(AnimalClass::Cat))) as SharedClassifier)
        });

        let err = store.get().await.err().unwrap();
        assert!(matches!(err, InferenceError::ModelMissing(_)));
        assert!(err.to_string().contains("/nonexistent/model.keras"));
        assert!(!store.is_loaded());
    }

    #[actix_web::test]
    async fn loader_errors_propagate() {
        let store = ModelStore::new(existing_file(), |path: &Path| {
            Err(InferenceError::Load {
                path: path.to_path_buf(),
                reason: "not a TorchScript archive".into(),
            })
        });

        let err = store.get().await.err().unwrap();
        assert!(err.to_string().contains("not a TorchScript archive"));
        assert!(!store.is_loaded());
    }

    #[actix_web::test]
    async fn concurrent_first_calls_load_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let store = Arc::new(ModelStore::new(existing_file(), move |_: &Path| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Ok(Arc::new(FixedScores(one_hot(AnimalClass::Dog))) as SharedClassifier)
        }));

        let calls: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                actix_web::rt::spawn(async move { store.get().await.map(|_| ()) })
            })
            .collect();
        for call in futures::future::join_all(calls).await {
            call.unwrap().unwrap();
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(store.is_loaded());
        store.get().await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn predict_returns_label() {
        let image = crate::preprocess::tests::solid_png(8, 8, [0, 0, 0]);
        let input = crate::preprocess::preprocess(&image).unwrap();

        let model: SharedClassifier = Arc::new(FixedScores(one_hot(AnimalClass::Elephant)));
        assert_eq!(predict(model, input.clone()).await.unwrap(), AnimalClass::Elephant);

        let model: SharedClassifier = Arc::new(Failing);
        let err = predict(model, input).await.err().unwrap();
        assert_eq!(err.to_string(), "Model error: graph execution failed");
    }
}
