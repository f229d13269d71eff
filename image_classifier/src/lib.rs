mod routes;
mod server;

pub mod app;
pub mod bundle;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod handler;
pub mod model;
pub mod ort_model;
pub mod pipeline;
pub mod predictor;
pub mod preprocess;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use app::start_app;
pub use error::{ClassifierError, ClassifierResult};
pub use predictor::{predict, Prediction};
pub use preprocess::{preprocess, ImageTensor};
