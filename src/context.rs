//! Per-request state and the handler-chain cursor.

use crate::error::ServerResult;
use crate::handler::Chain;
use crate::http::{Body, Method, Request, Response};
use crate::router::ExecutionMode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Mutable state for one request, owned by the task that serves it.
pub struct Context {
    pub request: Request,
    pub response: Response,
    pub(crate) params: HashMap<String, String>,
    pub(crate) store: HashMap<String, Value>,
    chain: Chain,
    cursor: usize,
    aborted: bool,
    mode: ExecutionMode,
}

impl Context {
    pub fn new(request: Request, params: HashMap<String, String>, chain: Chain, mode: ExecutionMode) -> Self {
        Self {
            request,
            response: Response::default(),
            params,
            store: HashMap::new(),
            chain,
            cursor: 0,
            aborted: false,
            mode,
        }
    }

    /// Runs the remaining handlers in order.
    ///
    /// Handlers that return without calling `next` do not stop the chain; the
    /// loop here moves on to the following handler. Once [`abort`](Self::abort)
    /// is called, or a handler returns an error, nothing further is entered.
    /// Frames already entered still resume after their own `next().await`.
    pub async fn next(&mut self) -> ServerResult<()> {
        while !self.aborted && self.cursor < self.chain.len() {
            let handler = Arc::clone(&self.chain[self.cursor]);
            self.cursor += 1;
            if let Err(err) = handler.call(self).await {
                self.aborted = true;
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// Writes a response and stops the chain.
    pub fn abort_with<T: Into<Vec<u8>>>(&mut self, status: u16, body: T) {
        self.response.status(status).body(body);
        self.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn method(&self) -> Method {
        self.request.method
    }

    pub fn path(&self) -> &str {
        &self.request.path
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.request.query.get(name).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.get_header(name)
    }

    pub fn body(&self) -> &Body {
        &self.request.body
    }

    /// Whether this context runs on the cooperative scheduler or a pool worker.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Stores a value for later handlers. Overwrites any earlier value under `key`.
    ///
    /// The store holds JSON values. A value that does not serialize is logged
    /// and leaves `key` unset.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.store.insert(key.to_string(), value);
            }
            Err(err) => {
                warn!(key, error = %err, "Context value is not serializable; not stored");
                self.store.remove(key);
            }
        }
    }

    /// Typed read from the store; `None` when missing or of another type.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.store
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.store.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.store.remove(key)
    }

    pub fn into_response(self) -> Response {
        self.response
    }
}
