//! Langbase Pipes client, the production [`ModelInvoker`](crate::invoker::ModelInvoker).

mod client;
mod types;


pub use client::LangbaseClient;
pub use types::{
    CreatePipeRequest, CreatePipeResponse, PipeRequest, PipeResponse, PipeStatus, RawResponse,
    Usage,
};
