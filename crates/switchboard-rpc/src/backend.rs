//! Backends: the unit of routing. One backend instance owns every verb of
//! one domain.
//!
//! Application code implements [`Backend`] on a plain struct and declares
//! its verbs. The server only sees the type-erased [`DomainHandler`], which
//! [`BackendHandler`] implements on top of a backend and its shared verb
//! table.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::ServerContext;
use crate::errors::{DispatchError, RegistryError, RpcError, VerbError};
use crate::events::ServerEvent;
use crate::registry::{VerbSet, VerbTable, verbs_of};
use crate::types::{Request, Response};

/// What a verb returns.
pub type VerbResult = Result<Value, VerbError>;

/// Implemented by application backends.
#[async_trait]
pub trait Backend: Send + Sync + Sized + 'static {
    /// Declare this type's verbs. Runs once per type.
    fn declare(verbs: &mut VerbSet<Self>) -> Result<(), RegistryError>;

    /// Initialization hook, run once when the owning server starts.
    async fn initialize(&self, _ctx: &ServerContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Expose a named property to cooperating backends.
    fn property_value(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Type-erased backend as seen by the dispatcher.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    /// Wire the handler to its server. Called exactly once, before any request.
    async fn setup(&self, ctx: ServerContext) -> anyhow::Result<()>;

    /// Run one request.
    ///
    /// Verb errors and unknown verbs become error responses. Only a raised
    /// failure with exception conversion turned off escapes as `Err`.
    async fn handle(&self, request: &Request) -> Result<Response, DispatchError>;

    /// Introspection escape hatch for cooperating handlers.
    fn property_value(&self, name: &str) -> Option<Value>;

    /// Names of all verbs this handler answers (sorted).
    fn verbs(&self) -> Vec<String>;
}

/// Per-backend options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendOptions {
    /// Turn raised verb failures into `InternalError` responses instead of
    /// propagating them to the transport.
    #[serde(default)]
    pub convert_exceptions_to_errors: bool,
}

/// A [`Backend`] bound to its verb table.
pub struct BackendHandler<H: Backend> {
    backend: H,
    verbs: Arc<VerbTable<H>>,
    options: BackendOptions,
    server: OnceLock<ServerContext>,
}

impl<H: Backend> BackendHandler<H> {
    /// Wrap a backend with default options.
    ///
    /// Declares the backend type's verbs if this is the first instance, so
    /// declaration errors surface here rather than at request time.
    pub fn new(backend: H) -> Result<Self, RegistryError> {
        Self::with_options(backend, BackendOptions::default())
    }

    /// Wrap a backend with explicit options.
    pub fn with_options(backend: H, options: BackendOptions) -> Result<Self, RegistryError> {
        Ok(Self {
            backend,
            verbs: verbs_of::<H>()?,
            options,
            server: OnceLock::new(),
        })
    }

    /// Toggle exception conversion.
    #[must_use]
    pub fn convert_exceptions_to_errors(mut self, on: bool) -> Self {
        self.options.convert_exceptions_to_errors = on;
        self
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &H {
        &self.backend
    }

    /// Current options.
    pub fn options(&self) -> BackendOptions {
        self.options
    }

    /// Server context, once set up.
    pub fn server(&self) -> Option<&ServerContext> {
        self.server.get()
    }

    fn emit(&self, event: ServerEvent) {
        match self.server.get() {
            Some(ctx) => ctx.emit(event),
            None => warn!(event = event.name(), "event emitted before setup"),
        }
    }

    fn unknown_verb(&self, request: &Request) -> Response {
        let message = if self.verbs.is_empty() {
            format!("Domain '{}' doesn't contain verbs", request.domain)
        } else {
            format!(
                "Unknown verb '{}' in domain '{}'",
                request.verb, request.domain
            )
        };
        self.emit(ServerEvent::error(message.clone()).with_request(request.clone()));
        Response::failure(request.id.clone(), &RpcError::method_not_found(message))
    }
}

#[async_trait]
impl<H: Backend> DomainHandler for BackendHandler<H> {
    async fn setup(&self, ctx: ServerContext) -> anyhow::Result<()> {
        let ctx = self.server.get_or_init(|| ctx);
        self.backend.initialize(ctx).await
    }

    async fn handle(&self, request: &Request) -> Result<Response, DispatchError> {
        let Some(verb) = self.verbs.get(&request.verb) else {
            return Ok(self.unknown_verb(request));
        };

        debug!(domain = request.domain, verb = request.verb, "invoking verb");
        let call = AssertUnwindSafe(verb(&self.backend, request.params.clone()))
            .catch_unwind()
            .await;
        let outcome = call.unwrap_or_else(|panic| Err(VerbError::Panicked(panic_message(&*panic))));

        let id = request.id.clone();
        match outcome {
            Ok(result) => Ok(Response::success(id, result)),
            Err(VerbError::Rpc(err)) => Ok(Response::failure(id, &err)),
            Err(raised) if self.options.convert_exceptions_to_errors => {
                Ok(Response::failure(id, &RpcError::internal(raised.to_string())))
            }
            Err(raised) => Err(DispatchError::HandlerFailed {
                domain: request.domain.clone(),
                verb: request.verb.clone(),
                source: raised.into_anyhow(),
            }),
        }
    }

    fn property_value(&self, name: &str) -> Option<Value> {
        self.backend.property_value(name)
    }

    fn verbs(&self) -> Vec<String> {
        self.verbs.names()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::events::EventBus;
    use crate::params::parse_params;
    use crate::types::RequestId;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Deserialize)]
    struct SumParams {
        a: i64,
        b: i64,
    }

    #[derive(Default)]
    struct Math {
        initialized: AtomicUsize,
    }

    impl Math {
        async fn calc_sum(&self, params: Value) -> VerbResult {
            let p: SumParams = parse_params(params)?;
            Ok(json!(p.a + p.b))
        }

        async fn error_result(&self, _params: Value) -> VerbResult {
            Err(RpcError::internal("Internal error in the test backend occured").into())
        }

        async fn boom(&self, _params: Value) -> VerbResult {
            Err(anyhow::anyhow!("boom").into())
        }

        async fn panics(&self, _params: Value) -> VerbResult {
            panic!("kaboom")
        }

        async fn nothing(&self, _params: Value) -> VerbResult {
            Ok(Value::Null)
        }
    }

    #[async_trait]
    impl Backend for Math {
        fn declare(verbs: &mut VerbSet<Self>) -> Result<(), RegistryError> {
            verbs.verb("calcSum", |m, p| m.calc_sum(p).boxed())?;
            verbs.verb("getErrorResult", |m, p| m.error_result(p).boxed())?;
            verbs.verb("boom", |m, p| m.boom(p).boxed())?;
            verbs.verb("panics", |m, p| m.panics(p).boxed())?;
            verbs.verb("nothing", |m, p| m.nothing(p).boxed())?;
            Ok(())
        }

        async fn initialize(&self, _ctx: &ServerContext) -> anyhow::Result<()> {
            let _ = self.initialized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn property_value(&self, name: &str) -> Option<Value> {
            (name == "initialized").then(|| json!(self.initialized.load(Ordering::SeqCst)))
        }
    }

    struct Hollow;

    impl Backend for Hollow {
        fn declare(_verbs: &mut VerbSet<Self>) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    async fn math(convert: bool) -> (BackendHandler<Math>, EventBus) {
        let handler = BackendHandler::new(Math::default())
            .unwrap()
            .convert_exceptions_to_errors(convert);
        let bus = EventBus::default();
        let ctx = ServerContext::detached().with_events(Arc::new(bus.clone()));
        handler.setup(ctx).await.unwrap();
        (handler, bus)
    }

    fn request(id: i64, verb: &str, params: Value) -> Request {
        Request::new("Math", verb).with_id(id).with_params(params)
    }

    #[tokio::test]
    async fn calc_sum_returns_result() {
        let (handler, _bus) = math(false).await;
        let resp = handler
            .handle(&request(1, "calcSum", json!({"a": 2, "b": 3})))
            .await
            .unwrap();
        assert_eq!(resp.id, Some(RequestId::from(1)));
        assert_eq!(resp.result(), Some(&json!(5)));
    }

    #[tokio::test]
    async fn error_value_becomes_error_response() {
        let (handler, _bus) = math(false).await;
        let resp = handler
            .handle(&request(2, "getErrorResult", Value::Null))
            .await
            .unwrap();
        let err = resp.error().unwrap();
        assert_eq!(err.code, ErrorCode::InternalError);
        assert_eq!(err.message, "Internal error in the test backend occured");
    }

    #[tokio::test]
    async fn null_result_is_still_a_result() {
        let (handler, _bus) = math(false).await;
        let resp = handler.handle(&request(3, "nothing", Value::Null)).await.unwrap();
        assert_eq!(resp.result(), Some(&Value::Null));
    }

    #[tokio::test]
    async fn bad_params_are_invalid_request() {
        let (handler, _bus) = math(false).await;
        let resp = handler
            .handle(&request(4, "calcSum", json!({"a": "two"})))
            .await
            .unwrap();
        assert_eq!(resp.error().unwrap().code, ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn raised_failure_converted_when_enabled() {
        let (handler, _bus) = math(true).await;
        let resp = handler.handle(&request(4, "boom", Value::Null)).await.unwrap();
        let err = resp.error().unwrap();
        assert_eq!(err.code, ErrorCode::InternalError);
        assert_eq!(err.message, "boom");
    }

    #[tokio::test]
    async fn raised_failure_propagates_when_disabled() {
        let (handler, _bus) = math(false).await;
        let err = handler
            .handle(&request(4, "boom", Value::Null))
            .await
            .unwrap_err();
        assert_matches!(
            err,
            DispatchError::HandlerFailed { ref domain, ref verb, .. } if domain == "Math" && verb == "boom"
        );
    }

    #[tokio::test]
    async fn panic_converted_when_enabled() {
        let (handler, _bus) = math(true).await;
        let resp = handler.handle(&request(5, "panics", Value::Null)).await.unwrap();
        assert_eq!(resp.error().unwrap().message, "kaboom");
    }

    #[tokio::test]
    async fn panic_propagates_when_disabled() {
        let (handler, _bus) = math(false).await;
        let result = handler.handle(&request(5, "panics", Value::Null)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_verb_is_method_not_found_and_emits_error() {
        let (handler, bus) = math(false).await;
        let mut rx = bus.subscribe();
        let resp = handler
            .handle(&request(2, "unknownVerb", Value::Null))
            .await
            .unwrap();
        let err = resp.error().unwrap();
        assert_eq!(err.code, ErrorCode::MethodNotFound);
        assert_eq!(err.message, "Unknown verb 'unknownVerb' in domain 'Math'");
        assert_eq!(resp.id, Some(RequestId::from(2)));

        let ServerEvent::Error { description, request, .. } = rx.recv().await.unwrap() else {
            panic!("expected error event");
        };
        assert_eq!(description, "Unknown verb 'unknownVerb' in domain 'Math'");
        assert_eq!(request.unwrap().verb, "unknownVerb");
    }

    #[tokio::test]
    async fn backend_without_verbs_says_so() {
        let handler = BackendHandler::new(Hollow).unwrap();
        handler.setup(ServerContext::detached()).await.unwrap();
        let resp = handler
            .handle(&Request::new("Ghostly", "anything").with_id(7))
            .await
            .unwrap();
        let err = resp.error().unwrap();
        assert_eq!(err.code, ErrorCode::MethodNotFound);
        assert_eq!(err.message, "Domain 'Ghostly' doesn't contain verbs");
    }

    #[tokio::test]
    async fn setup_runs_initialize() {
        let (handler, _bus) = math(false).await;
        assert_eq!(handler.property_value("initialized"), Some(json!(1)));
        assert!(handler.server().is_some());
        assert!(handler.property_value("other").is_none());
    }

    #[tokio::test]
    async fn two_instances_share_one_table() {
        let a = BackendHandler::new(Math::default()).unwrap();
        let b = BackendHandler::new(Math::default()).unwrap();
        assert!(Arc::ptr_eq(&a.verbs, &b.verbs));
        assert_eq!(a.verbs(), b.verbs());
    }

    #[test]
    fn options_default_to_propagation() {
        let handler = BackendHandler::new(Math::default()).unwrap();
        assert!(!handler.options().convert_exceptions_to_errors);
        let handler = handler.convert_exceptions_to_errors(true);
        assert!(handler.options().convert_exceptions_to_errors);
    }

    #[test]
    fn options_deserialize_camel_case() {
        let opts: BackendOptions =
            serde_json::from_str(r#"{"convertExceptionsToErrors":true}"#).unwrap();
        assert!(opts.convert_exceptions_to_errors);
    }
}
