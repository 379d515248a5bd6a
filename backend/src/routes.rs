use crate::model::{self, InferenceError, ModelStore};
use crate::preprocess::{self, PreprocessError, PreprocessedTensor};
use actix_cors::Cors;
use actix_multipart::Multipart;
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use futures::TryStreamExt;
use log::{error, info, warn};
use shared::{ErrorResponse, PredictionResponse};

pub const HEALTH_MESSAGE: &str = "Animal Image Classifier API Running";

/// Multipart field that carries the uploaded image.
const FILE_FIELD: &str = "file";

/// Largest upload read into memory. Anything bigger is refused as an invalid image.
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("No file uploaded")]
    NoFile,
    #[error("Empty filename")]
    EmptyFilename,
    #[error("Invalid image file")]
    InvalidImage,
    #[error("Prediction failed: {0}")]
    Failed(String),
}

impl ResponseError for PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::NoFile | PredictError::EmptyFilename | PredictError::InvalidImage => {
                StatusCode::BAD_REQUEST
            }
            PredictError::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse::new(self.to_string()))
    }
}

impl From<InferenceError> for PredictError {
    fn from(err: InferenceError) -> Self {
        PredictError::Failed(err.to_string())
    }
}

impl From<PreprocessError> for PredictError {
    fn from(err: PreprocessError) -> Self {
        match err {
            PreprocessError::Decode(_) => PredictError::InvalidImage,
            other => PredictError::Failed(other.to_string()),
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(health)))
        .service(web::resource("/predict").route(web::post().to(handle_predict)));
}

/// CORS policy admitting a single browser origin on every path.
pub fn cors(allowed_origin: &str) -> Cors {
    Cors::default()
        .allowed_origin(allowed_origin)
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_any_header()
        .max_age(3600)
}

async fn health() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body(HEALTH_MESSAGE)
}

async fn handle_predict(
    store: web::Data<ModelStore>,
    req: HttpRequest,
    payload: web::Payload,
) -> Result<HttpResponse, PredictError> {
    let result = predict(&store, Multipart::new(req.headers(), payload)).await;

    match &result {
        Ok(response) => info!("Predicted {}", response.prediction),
        Err(e @ PredictError::Failed(_)) => error!("{}", e),
        Err(e) => warn!("Rejected upload: {}", e),
    }

    result.map(|response| HttpResponse::Ok().json(response))
}

async fn predict(store: &ModelStore, payload: Multipart) -> Result<PredictionResponse, PredictError> {
    let upload = read_upload(payload, MAX_UPLOAD_BYTES).await?;
    if upload.filename.is_empty() {
        return Err(PredictError::EmptyFilename);
    }

    let tensor = web::block(move || preprocess_upload(upload))
        .await
        .map_err(|e| PredictError::Failed(e.to_string()))??;

    let model = store.get().await?;
    let prediction = model::predict(model, tensor).await?;

    Ok(PredictionResponse { prediction })
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

/// Finds the first `file` part that was sent as a file upload and reads it.
/// Parts without a `filename` parameter are ordinary form fields and skipped.
async fn read_upload(mut payload: Multipart, limit: usize) -> Result<Upload, PredictError> {
    loop {
        let mut field = match payload.try_next().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(PredictError::NoFile),
            Err(e) => {
                warn!("Unreadable multipart payload: {}", e);
                return Err(PredictError::NoFile);
            }
        };

        let filename = field.content_disposition().and_then(|cd| {
            match (cd.get_name(), cd.get_filename()) {
                (Some(FILE_FIELD), Some(filename)) => Some(filename.to_owned()),
                _ => None,
            }
        });

        let Some(filename) = filename else {
            while let Ok(Some(_)) = field.try_next().await {}
            continue;
        };

        if filename.is_empty() {
            return Ok(Upload {
                filename,
                bytes: Vec::new(),
            });
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            warn!("Upload {:?} interrupted: {}", filename, e);
            PredictError::InvalidImage
        })? {
            if bytes.len() + chunk.len() > limit {
                warn!("Upload {:?} exceeds {} bytes", filename, limit);
                return Err(PredictError::InvalidImage);
            }
            bytes.extend_from_slice(&chunk);
        }

        return Ok(Upload { filename, bytes });
    }
}

fn preprocess_upload(upload: Upload) -> Result<PreprocessedTensor, PredictError> {
    preprocess::preprocess(&upload.bytes).map_err(|e| {
        warn!(
            "Could not preprocess {:?} ({} bytes): {}",
            upload.filename,
            upload.bytes.len(),
            e
        );
        PredictError::from(e)
    })
}
