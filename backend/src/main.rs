mod config;
mod model;
mod preprocess;
mod routes;
#[cfg(feature = "torch")]
mod torch;

use actix_web::{middleware, web, App, HttpServer};
use config::AppConfig;
use model::ModelStore;
use routes::configure_routes;

#[cfg(feature = "torch")]
fn model_store(cfg: &AppConfig) -> ModelStore {
    ModelStore::new(cfg.model_path.clone(), torch::loader(cfg.input_layout))
}

#[cfg(not(feature = "torch"))]
fn model_store(cfg: &AppConfig) -> ModelStore {
    use model::{InferenceError, SharedClassifier};
    use std::path::Path;

    ModelStore::new(
        cfg.model_path.clone(),
        |path: &Path| -> Result<SharedClassifier, InferenceError> {
            Err(InferenceError::Load {
                path: path.to_path_buf(),
                reason: "built without the `torch` feature, no model runtime available".into(),
            })
        },
    )
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cfg = AppConfig::from_env().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let store = model_store(&cfg);
    if let Err(e) = store.get().await {
        log::error!("Failed to load model at startup: {}", e);
        return Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Model loading failed: {}", e),
        ));
    }
    log::info!("Model ready from {}", store.path().display());
    let store = web::Data::new(store);

    let bind_address = cfg.bind_address();
    log::info!(
        "Starting server on {} (allowed origin {})",
        bind_address,
        cfg.frontend_origin
    );

    let origin = cfg.frontend_origin.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(routes::cors(&origin))
            .wrap(middleware::Logger::default())
            .app_data(store.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
