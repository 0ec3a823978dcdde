//! Request layer
//!
//! - [`Route`] / [`dispatch`] - typed route table over the engine
//! - [`ApiResponse`] - the `{success, message, error_kind, data}` envelope
//! - [`Server`] - newline-delimited JSON over TCP

mod routes;
mod server;

pub use routes::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Response envelope returned for every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiResponse {
    pub fn success(message: Option<String>, data: Option<Value>) -> Self {
        Self {
            success: true,
            message,
            error_kind: None,
            data,
        }
    }

    pub fn failure(message: impl Into<String>, kind: &str) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            error_kind: Some(kind.to_string()),
            data: None,
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Self::failure(err.to_string(), err.kind())
    }
}
