//! Byte form of a [`Context`] for crossing the pool boundary.
//!
//! The encoding is JSON with bodies carried as base64 text. Handlers, the chain
//! cursor and the abort flag do not travel; the receiving side rebuilds them
//! from the route table.

use crate::context::Context;
use crate::error::ServerResult;
use crate::handler::Chain;
use crate::http::{Body, Method, Request, Response, Version};
use crate::router::ExecutionMode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize)]
pub struct Exchange {
    pub route_id: usize,
    pub request: ExchangeRequest,
    pub params: HashMap<String, String>,
    pub store: HashMap<String, Value>,
    pub response: ExchangeResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExchangeRequest {
    pub method: Method,
    pub path: String,
    pub version: Version,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExchangeResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

impl Exchange {
    pub fn capture(ctx: &Context, route_id: usize) -> Self {
        let request = &ctx.request;
        Self {
            route_id,
            request: ExchangeRequest {
                method: request.method,
                path: request.path.clone(),
                version: request.version,
                query: request.query.clone(),
                headers: request.headers.clone(),
                content_type: request.body.content_type().to_string(),
                body: request.body.as_bytes().to_vec(),
            },
            params: ctx.params.clone(),
            store: ctx.store.clone(),
            response: ExchangeResponse {
                status: ctx.response.status,
                headers: ctx.response.headers.clone(),
                body: ctx.response.body.clone(),
            },
        }
    }

    /// Rebuilds a context on the receiving side with the route's chain.
    pub fn into_context(self, chain: Chain, mode: ExecutionMode) -> Context {
        let request = Request {
            method: self.request.method,
            path: self.request.path,
            version: self.request.version,
            query: self.request.query,
            headers: self.request.headers,
            body: Body::with_content_type(&self.request.content_type, self.request.body),
        };
        let mut ctx = Context::new(request, self.params, chain, mode);
        ctx.store = self.store;
        ctx.response = Response {
            status: self.response.status,
            headers: self.response.headers,
            body: self.response.body,
        };
        ctx
    }

    /// Copies the pooled side's results (response and store) back into `ctx`.
    pub fn apply_to(self, ctx: &mut Context) {
        ctx.store = self.store;
        ctx.response = Response {
            status: self.response.status,
            headers: self.response.headers,
            body: self.response.body,
        };
    }
}

pub fn encode(exchange: &Exchange) -> ServerResult<Vec<u8>> {
    Ok(serde_json::to_vec(exchange)?)
}

pub fn decode(bytes: &[u8]) -> ServerResult<Exchange> {
    Ok(serde_json::from_slice(bytes)?)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, T: AsRef<[u8]>>(bytes: T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use crate::handler::BoxedHandler;

    #[test]
    fn carries_request_params_store_and_response() {
        let mut request = Request::new(Method::POST, "/users/42");
        request.query.insert("x".into(), "1".into());
        request.headers.insert("content-type".into(), "application/octet-stream".into());
        request.body = Body::from_bytes(vec![0, 159, 146, 150]);
        let params = HashMap::from([("id".to_string(), "42".to_string())]);
        let mut ctx = Context::new(request, params, Vec::<BoxedHandler>::new().into(), ExecutionMode::Inline);
        ctx.set("user", "alice");
        ctx.response.status(201).body("partial");

        let bytes = encode(&Exchange::capture(&ctx, 3)).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.route_id, 3);

        let rebuilt = decoded.into_context(Vec::<BoxedHandler>::new().into(), ExecutionMode::Pooled);
        assert_eq!(rebuilt.mode(), ExecutionMode::Pooled);
        assert_eq!(rebuilt.param("id"), Some("42"));
        assert_eq!(rebuilt.query("x"), Some("1"));
        assert_eq!(rebuilt.body().as_bytes(), &[0, 159, 146, 150]);
        assert_eq!(rebuilt.get::<String>("user").as_deref(), Some("alice"));
        assert_eq!(rebuilt.response.status, 201);
        assert_eq!(rebuilt.response.body, b"partial");
    }

    #[test]
    fn body_is_base64_text() {
        let ctx = Context::new(
            Request::new(Method::GET, "/"),
            HashMap::new(),
            Vec::<BoxedHandler>::new().into(),
            ExecutionMode::Inline,
        );
        let text = String::from_utf8(encode(&Exchange::capture(&ctx, 0)).unwrap()).unwrap();
        assert!(text.contains("\"body\":\"\""));
    }

    #[test]
    fn garbage_is_an_exchange_error() {
        assert!(matches!(decode(b"not json"), Err(ServerError::Exchange(_))));
    }
}
