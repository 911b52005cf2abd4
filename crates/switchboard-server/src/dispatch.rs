//! Transport-independent dispatch.
//!
//! [`Dispatcher`] turns one payload into one [`Response`]: decode, answer
//! `ping`, apply the API key gate, route by domain and hand the request to
//! the domain's handler. Transports only move bytes in and out.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde_json::json;
use switchboard_rpc::types::recover_id;
use switchboard_rpc::{
    DispatchError, DomainTable, EventSink, Request, Response, RpcError, ServerEvent,
    TransportContext, TransportKind,
};
use tracing::{debug, instrument, warn};

use crate::auth::Authenticator;
use crate::metrics::{
    RPC_ERRORS_TOTAL, RPC_MALFORMED_TOTAL, RPC_REQUEST_DURATION_SECONDS, RPC_REQUESTS_TOTAL,
};

/// Message returned when a raised failure reaches a transport.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Message returned when the API key gate rejects a request.
pub const API_KEY_REJECTED_MESSAGE: &str = "Invalid or missing API key";

fn transport_label(kind: TransportKind) -> &'static str {
    match kind {
        TransportKind::Http => "http",
        TransportKind::WebSocket => "websocket",
    }
}

/// Routes requests to mounted domains. Shared by every transport.
pub struct Dispatcher {
    domains: Arc<DomainTable>,
    auth: Arc<dyn Authenticator>,
    events: Arc<dyn EventSink>,
}

impl Dispatcher {
    /// Create a dispatcher over a frozen domain table.
    pub fn new(
        domains: Arc<DomainTable>,
        auth: Arc<dyn Authenticator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            domains,
            auth,
            events,
        }
    }

    /// The event sink.
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// The authentication hook.
    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.auth
    }

    /// Mounted domain names (sorted).
    pub fn domain_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.domains.keys().cloned().collect();
        names.sort();
        names
    }

    /// Decode a raw payload.
    ///
    /// On failure an `error` event carrying the payload is emitted and the
    /// `Err` holds the `InvalidRequest` response to send back, keyed by
    /// whatever id could be salvaged.
    pub fn decode(&self, raw: &[u8], transport: &TransportContext) -> Result<Request, Response> {
        Request::from_slice(raw).map_err(|e| {
            counter!(RPC_MALFORMED_TOTAL, "transport" => transport_label(transport.kind))
                .increment(1);
            let description = format!("Malformed request: {e}");
            self.events.emit(
                ServerEvent::error(description.clone())
                    .with_raw(String::from_utf8_lossy(raw))
                    .with_transport(transport.clone()),
            );
            Response::failure(recover_id(raw), &RpcError::invalid_request(description))
        })
    }

    /// Emit the `request` event for a request about to be handled.
    pub fn observe(&self, request: &Request, transport: &TransportContext) {
        counter!(
            RPC_REQUESTS_TOTAL,
            "transport" => transport_label(transport.kind),
            "domain" => request.domain.clone()
        )
        .increment(1);
        self.events.emit(ServerEvent::Request {
            request: request.clone(),
            transport: transport.clone(),
        });
    }

    /// Dispatch one decoded request.
    ///
    /// Every outcome a caller should see is an `Ok` response. `Err` means a
    /// backend raised with conversion disabled; transports pass it to
    /// [`contain`](Self::contain).
    #[instrument(skip_all, fields(domain = %request.domain, verb = %request.verb))]
    pub async fn dispatch(
        &self,
        request: &Request,
        transport: &TransportContext,
    ) -> Result<Response, DispatchError> {
        self.observe(request, transport);
        let started = Instant::now();
        let outcome = self.route(request, transport).await;
        histogram!(
            RPC_REQUEST_DURATION_SECONDS,
            "transport" => transport_label(transport.kind)
        )
        .record(started.elapsed().as_secs_f64());
        outcome
    }

    async fn route(
        &self,
        request: &Request,
        transport: &TransportContext,
    ) -> Result<Response, DispatchError> {
        if request.is_ping() {
            return Ok(Response::success(request.id.clone(), json!("pong")));
        }

        if !transport.authenticated && !self.auth.authenticate_request(request) {
            debug!("api key rejected");
            return Ok(Response::failure(
                request.id.clone(),
                &RpcError::authentication_required(API_KEY_REJECTED_MESSAGE),
            ));
        }

        let Some(handler) = self.domains.get(&request.domain) else {
            return Ok(Response::failure(
                request.id.clone(),
                &RpcError::invalid_request(format!(
                    "Unknown RPC message domain: '{}'",
                    request.domain
                )),
            ));
        };

        handler.handle(request).await
    }

    /// Turn a failure that escaped a backend into a generic response.
    ///
    /// The failure goes to the `error` event; the caller only learns that
    /// something went wrong.
    pub fn contain(
        &self,
        err: &DispatchError,
        request: &Request,
        transport: &TransportContext,
    ) -> Response {
        warn!(error = %err, "request failed");
        self.events.emit(
            ServerEvent::error(err.to_string())
                .with_request(request.clone())
                .with_transport(transport.clone()),
        );
        Response::failure(
            request.id.clone(),
            &RpcError::internal(INTERNAL_ERROR_MESSAGE),
        )
    }

    /// Dispatch and contain in one step.
    pub async fn respond(&self, request: &Request, transport: &TransportContext) -> Response {
        match self.dispatch(request, transport).await {
            Ok(response) => response,
            Err(err) => self.contain(&err, request, transport),
        }
    }

    /// Emit the `response` event once a response has been handed to the
    /// transport.
    pub fn delivered(&self, response: Response, transport: &TransportContext) {
        if let Some(error) = response.error() {
            counter!(
                RPC_ERRORS_TOTAL,
                "transport" => transport_label(transport.kind),
                "code" => error.code.as_str()
            )
            .increment(1);
        }
        self.events.emit(ServerEvent::Response {
            response,
            transport: transport.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ApiKeyAuthenticator;
    use assert_matches::assert_matches;
    use futures::FutureExt;
    use serde::Deserialize;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use switchboard_rpc::{
        Backend, BackendHandler, DomainHandler, ErrorCode, EventBus, RegistryError, RequestId,
        VerbResult, VerbSet, params::parse_params,
    };
    use tokio::sync::broadcast::Receiver;

    #[derive(Default)]
    struct Math {
        calls: AtomicUsize,
    }

    #[derive(Deserialize)]
    struct Pair {
        a: i64,
        b: i64,
    }

    impl Math {
        async fn calc_sum(&self, params: Value) -> VerbResult {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            let Pair { a, b } = parse_params(params)?;
            Ok(json!(a + b))
        }

        async fn boom(&self, _params: Value) -> VerbResult {
            Err(anyhow::anyhow!("boom").into())
        }
    }

    impl Backend for Math {
        fn declare(verbs: &mut VerbSet<Self>) -> Result<(), RegistryError> {
            verbs.verb("calcSum", |m, p| m.calc_sum(p).boxed())?;
            verbs.verb("boom", |m, p| m.boom(p).boxed())?;
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        math: Arc<BackendHandler<Math>>,
        events: Receiver<ServerEvent>,
    }

    async fn fixture(keys: &[&str], convert: bool) -> Fixture {
        let bus = Arc::new(EventBus::default());
        let events = bus.subscribe();
        let math = Arc::new(
            BackendHandler::new(Math::default())
                .unwrap()
                .convert_exceptions_to_errors(convert),
        );
        let mut table: DomainTable = HashMap::new();
        let _ = table.insert("Math".into(), Arc::clone(&math) as Arc<dyn DomainHandler>);
        let domains = Arc::new(table);
        let ctx = switchboard_rpc::ServerContext::new(
            "localhost",
            0,
            Arc::default(),
            Arc::clone(&bus) as Arc<dyn EventSink>,
            &domains,
        );
        math.setup(ctx).await.unwrap();
        Fixture {
            dispatcher: Dispatcher::new(
                domains,
                Arc::new(ApiKeyAuthenticator::new(keys.iter().copied())),
                bus,
            ),
            math,
            events,
        }
    }

    fn http() -> TransportContext {
        TransportContext::http(None)
    }

    fn drain(rx: &mut Receiver<ServerEvent>) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        names
    }

    #[tokio::test]
    async fn routes_to_domain() {
        let mut f = fixture(&[], false).await;
        let req = Request::new("Math", "calcSum")
            .with_id(1)
            .with_params(json!({"a": 2, "b": 3}));
        let resp = f.dispatcher.dispatch(&req, &http()).await.unwrap();
        assert_eq!(resp.to_json(), r#"{"id":1,"result":5}"#);
        assert_eq!(drain(&mut f.events), vec!["request"]);
    }

    #[tokio::test]
    async fn unknown_verb_is_method_not_found() {
        let f = fixture(&[], false).await;
        let req = Request::new("Math", "unknownVerb").with_id(2);
        let resp = f.dispatcher.dispatch(&req, &http()).await.unwrap();
        assert_eq!(
            resp.to_json(),
            r#"{"id":2,"error":{"code":"MethodNotFound","message":"Unknown verb 'unknownVerb' in domain 'Math'"}}"#
        );
    }

    #[tokio::test]
    async fn unknown_domain_is_invalid_request() {
        let f = fixture(&[], false).await;
        let req = Request::new("Ghost", "anything").with_id(3);
        let resp = f.dispatcher.dispatch(&req, &http()).await.unwrap();
        let err = resp.error().unwrap();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
        assert_eq!(err.message, "Unknown RPC message domain: 'Ghost'");
        assert_eq!(resp.id, Some(RequestId::from(3)));
    }

    #[tokio::test]
    async fn ping_bypasses_auth_and_routing() {
        let f = fixture(&["k1"], false).await;
        let req = Request::new("Nowhere", "ping").with_id("p");
        let resp = f.dispatcher.dispatch(&req, &http()).await.unwrap();
        assert_eq!(resp.result(), Some(&json!("pong")));
    }

    #[tokio::test]
    async fn decoded_ping_without_domain_answers_pong() {
        let f = fixture(&["k1"], false).await;
        for raw in [
            r#"{"id":1,"verb":"ping"}"#,
            r#"{"id":1,"domain":"","verb":"ping"}"#,
        ] {
            let req = f.dispatcher.decode(raw.as_bytes(), &http()).unwrap();
            let resp = f.dispatcher.respond(&req, &http()).await;
            assert_eq!(resp.to_json(), r#"{"id":1,"result":"pong"}"#);
        }
    }

    #[tokio::test]
    async fn api_key_gate_blocks_before_handler() {
        let f = fixture(&["k1"], false).await;
        let params = json!({"a": 1, "b": 1});

        let missing = Request::new("Math", "calcSum").with_id(1).with_params(params.clone());
        let resp = f.dispatcher.dispatch(&missing, &http()).await.unwrap();
        assert_eq!(resp.error().unwrap().code, ErrorCode::AuthenticationRequired);

        let wrong = missing.clone().with_api_key("k2");
        let resp = f.dispatcher.dispatch(&wrong, &http()).await.unwrap();
        assert_eq!(resp.error().unwrap().code, ErrorCode::AuthenticationRequired);

        assert_eq!(f.math.backend().calls.load(Ordering::SeqCst), 0);

        let good = missing.with_api_key("k1");
        let resp = f.dispatcher.dispatch(&good, &http()).await.unwrap();
        assert_eq!(resp.result(), Some(&json!(2)));
        assert_eq!(f.math.backend().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn authentic_session_skips_key_check() {
        let f = fixture(&["k1"], false).await;
        let req = Request::new("Math", "calcSum")
            .with_id(1)
            .with_params(json!({"a": 1, "b": 2}));
        let transport = TransportContext::websocket("c1", None, true);
        let resp = f.dispatcher.dispatch(&req, &transport).await.unwrap();
        assert_eq!(resp.result(), Some(&json!(3)));
    }

    #[tokio::test]
    async fn raised_failure_propagates_then_is_contained() {
        let mut f = fixture(&[], false).await;
        let req = Request::new("Math", "boom").with_id(4);
        let err = f.dispatcher.dispatch(&req, &http()).await.unwrap_err();
        assert_matches!(err, DispatchError::HandlerFailed { .. });

        let _ = drain(&mut f.events);
        let resp = f.dispatcher.contain(&err, &req, &http());
        let body = resp.error().unwrap();
        assert_eq!(body.code, ErrorCode::InternalError);
        assert_eq!(body.message, INTERNAL_ERROR_MESSAGE);
        assert!(!body.message.contains("boom"));
        assert_eq!(drain(&mut f.events), vec!["error"]);
    }

    #[tokio::test]
    async fn raised_failure_converted_when_enabled() {
        let f = fixture(&[], true).await;
        let req = Request::new("Math", "boom").with_id(4);
        let resp = f.dispatcher.respond(&req, &http()).await;
        assert_eq!(
            resp.to_json(),
            r#"{"id":4,"error":{"code":"InternalError","message":"boom"}}"#
        );
    }

    #[tokio::test]
    async fn malformed_payload_answers_with_recovered_id() {
        let mut f = fixture(&[], false).await;
        let resp = f
            .dispatcher
            .decode(br#"{"id":9,"domain":"Math"}"#, &http())
            .unwrap_err();
        assert_eq!(resp.id, Some(RequestId::from(9)));
        assert_eq!(resp.error().unwrap().code, ErrorCode::InvalidRequest);

        let event = f.events.try_recv().unwrap();
        assert_matches!(event, ServerEvent::Error { raw: Some(ref raw), .. } if raw.contains("Math"));
    }

    #[tokio::test]
    async fn garbage_payload_answers_with_null_id() {
        let f = fixture(&[], false).await;
        let resp = f.dispatcher.decode(b"not json", &http()).unwrap_err();
        assert_eq!(resp.id, None);
        assert!(resp.to_json().starts_with(r#"{"id":null,"error":"#));
    }

    #[tokio::test]
    async fn delivered_emits_response_event() {
        let mut f = fixture(&[], false).await;
        f.dispatcher
            .delivered(Response::success(None, Value::Null), &http());
        assert_eq!(drain(&mut f.events), vec!["response"]);
    }

    #[tokio::test]
    async fn domain_names_sorted() {
        let f = fixture(&[], false).await;
        assert_eq!(f.dispatcher.domain_names(), vec!["Math"]);
    }
}
