//! Backends hosted by the demo server under `TestDomain`.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use switchboard_rpc::params::parse_params;
use switchboard_rpc::{Backend, RegistryError, RpcError, ServerContext, VerbResult, VerbSet, verb};
use tracing::info;

/// Domain name both demo servers mount [`TestBackend`] under.
pub const TEST_DOMAIN: &str = "TestDomain";

#[derive(Debug, Default, Deserialize)]
struct Greeting {
    hello: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Operands {
    a: i64,
    b: i64,
}

/// Base backend with a single `testMethod` verb.
#[derive(Debug, Default)]
pub struct BaseBackend {
    calls: AtomicU64,
}

impl BaseBackend {
    async fn test_method(&self, params: Value) -> VerbResult {
        let greeting: Greeting = if params.is_null() {
            Greeting::default()
        } else {
            parse_params(params)?
        };
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let hello = greeting.hello.unwrap_or_default();
        Ok(json!(format!("This is a test string: {hello}:{call}")))
    }
}

impl Backend for BaseBackend {
    fn declare(verbs: &mut VerbSet<Self>) -> Result<(), RegistryError> {
        verb!(verbs, test_method as "testMethod")
    }

    fn property_value(&self, name: &str) -> Option<Value> {
        (name == "calls").then(|| json!(self.calls.load(Ordering::Relaxed)))
    }
}

/// Backend extending [`BaseBackend`] with arithmetic and failure verbs.
#[derive(Debug, Default)]
pub struct TestBackend {
    base: BaseBackend,
}

impl TestBackend {
    async fn calc_sum(&self, params: Value) -> VerbResult {
        let Operands { a, b } = parse_params(params)?;
        Ok(json!(a + b))
    }

    async fn get_error_result(&self, _params: Value) -> VerbResult {
        Err(RpcError::internal("Internal error in the test backend occured").into())
    }

    async fn method_with_exception(&self, _params: Value) -> VerbResult {
        Err(anyhow::anyhow!("Exception thrown in test backend").into())
    }
}

#[async_trait]
impl Backend for TestBackend {
    fn declare(verbs: &mut VerbSet<Self>) -> Result<(), RegistryError> {
        verbs.inherit::<BaseBackend>(|t| &t.base)?;
        verb!(verbs, calc_sum as "calcSum")?;
        verb!(verbs, get_error_result as "getErrorResult")?;
        verb!(verbs, method_with_exception as "methodWithException")?;
        Ok(())
    }

    async fn initialize(&self, ctx: &ServerContext) -> anyhow::Result<()> {
        info!(host = ctx.host(), port = ctx.port(), "{TEST_DOMAIN} ready");
        Ok(())
    }

    fn property_value(&self, name: &str) -> Option<Value> {
        self.base.property_value(name)
    }
}
