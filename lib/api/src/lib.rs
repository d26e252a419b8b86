pub mod rest;
pub mod upstream;

pub use rest::{AppState, RestApi};
pub use upstream::{UpstreamClient, UpstreamConfig};
