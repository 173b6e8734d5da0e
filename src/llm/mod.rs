//! Reasoning-service interface
//!
//! Every call names a strict JSON schema; the reply is deserialized into the
//! matching typed struct and anything missing or extra is a hard failure.

pub mod client;
pub mod parse;
pub mod prompts;
pub mod schema;

use crate::error::ServiceError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use client::OpenAiClient;

/// One structured request: prompt pair plus the response schema
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// Schema name, echoed in errors
    pub name: &'static str,
    pub schema: Value,
    pub system: String,
    pub user: String,
}

/// A text-generation backend that answers with schema-conforming JSON
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Send the request and return the raw JSON text of the reply
    async fn complete(&self, request: &StructuredRequest) -> Result<String, ServiceError>;
}

/// Response types that know their own schema
pub trait Structured: DeserializeOwned {
    const NAME: &'static str;
    fn schema() -> Value;
}

/// Ask `service` for a `T`, validating the reply against `T`'s shape
pub async fn request<T: Structured>(
    service: &dyn ReasoningService,
    system: &str,
    user: String,
) -> Result<T, ServiceError> {
    let request = StructuredRequest {
        name: T::NAME,
        schema: T::schema(),
        system: system.to_string(),
        user,
    };
    let raw = service.complete(&request).await?;
    parse::parse_structured(T::NAME, &raw)
}
