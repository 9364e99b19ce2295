//! Cart reconciliation: models, stores, and the reconciler.

pub mod errors;
pub mod local;
pub mod models;
pub mod reconciler;
pub mod remote;

pub use errors::CartError;
pub use local::LocalCartStore;
pub use reconciler::CartReconciler;
pub use remote::{CartApiConfig, HttpCartClient, RemoteCart};
