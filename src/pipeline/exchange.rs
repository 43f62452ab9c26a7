//! The two phases the pipeline runs over

use crate::error::ModuleResult;
use crate::module::{
    ConditionSubject, Module, ProcessRequestContext, ProcessResponseContext, ProcessResult,
};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;

/// A context the pipeline can thread through modules
pub(crate) trait Exchange: ConditionSubject + Send + Sync {
    /// Metric and log label
    const PHASE: &'static str;

    fn invoke<'a>(
        module: &'a dyn Module,
        ctx: &'a Self,
    ) -> BoxFuture<'a, ModuleResult<ProcessResult>>;

    fn annotations_mut(&mut self) -> &mut HashMap<String, Value>;

    fn replace_body(&mut self, body: String);

    fn headers_mut(&mut self) -> &mut HashMap<String, String>;
}

impl Exchange for ProcessRequestContext {
    const PHASE: &'static str = "request";

    fn invoke<'a>(
        module: &'a dyn Module,
        ctx: &'a Self,
    ) -> BoxFuture<'a, ModuleResult<ProcessResult>> {
        module.process_request(ctx)
    }

    fn annotations_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.annotations
    }

    fn replace_body(&mut self, body: String) {
        self.body = body;
    }

    fn headers_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.headers
    }
}

impl Exchange for ProcessResponseContext {
    const PHASE: &'static str = "response";

    fn invoke<'a>(
        module: &'a dyn Module,
        ctx: &'a Self,
    ) -> BoxFuture<'a, ModuleResult<ProcessResult>> {
        module.process_response(ctx)
    }

    fn annotations_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.request.annotations
    }

    fn replace_body(&mut self, body: String) {
        self.response_body = body;
    }

    fn headers_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.response_headers
    }
}
