use crate::{
    bundle::{BundleLoader, LoaderSettings},
    config::Config,
    fetcher::HttpImageFetcher,
    ort_model::OrtBackend,
    pipeline::ClassifierPipeline,
    preprocess::Preprocessor,
    server::HttpServer,
    store,
    telemetry::Metrics,
};
use std::{error::Error, sync::Arc, time::Instant};

pub fn build_pipeline(config: &Config) -> Result<ClassifierPipeline, Box<dyn Error>> {
    let loader = BundleLoader::new(
        store::from_config(&config.model.store),
        Box::new(OrtBackend),
        LoaderSettings::from(&config.model),
    );
    let preprocessor = Preprocessor::from_config(&config.preprocessing)?;
    let fetcher = HttpImageFetcher::new(&config.fetcher);

    Ok(ClassifierPipeline::new(
        loader,
        config.model.get_location(),
        Box::new(fetcher),
        preprocessor,
    ))
}

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let pipeline = Arc::new(build_pipeline(&config)?);
    let metrics = Arc::new(Metrics::new()?);

    let warm_up = {
        let pipeline = pipeline.clone();
        tokio::task::spawn_blocking(move || {
            let start_time = Instant::now();
            pipeline.warm_up().map(|_| start_time.elapsed())
        })
        .await?
    };

    match warm_up {
        Ok(elapsed) => metrics.record_model_load(elapsed),
        Err(e) => {
            tracing::error!("Failed to load model bundle: {}", e);
            return Err(Box::new(e));
        }
    }

    let server = HttpServer::new(pipeline, metrics, &config.server).await?;
    server.run().await?;

    Ok(())
}
