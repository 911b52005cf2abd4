//! # switchboard-rpc
//!
//! Protocol and backend layer of the switchboard RPC core.
//!
//! - Wire types: [`Request`], [`Response`], [`ErrorBody`]
//! - Error taxonomy: [`ErrorCode`], [`RpcError`], and per-layer failures
//! - Verb registry: per-type verb tables with additive inheritance
//! - Backends: the [`Backend`] trait and its type-erased [`DomainHandler`]
//! - Events: [`ServerEvent`] and the [`EventSink`] capability

#![deny(unsafe_code)]

pub mod backend;
pub mod context;
pub mod errors;
pub mod events;
pub mod params;
pub mod registry;
pub mod types;

pub use backend::{Backend, BackendHandler, BackendOptions, DomainHandler, VerbResult};
pub use context::{DomainTable, ServerContext};
pub use errors::{DispatchError, ErrorCode, ProtocolError, RegistryError, RpcError, VerbError};
pub use events::{EventBus, EventSink, Fanout, ServerEvent, TracingSink, TransportContext, TransportKind};
pub use registry::{Verb, VerbSet, VerbTable, verbs_of};
pub use types::{ErrorBody, Outcome, Request, RequestId, Response};

#[doc(hidden)]
pub mod __private {
    pub use futures::FutureExt;
}

/// Declare a backend method as a verb.
///
/// `verb!(verbs, calc_sum)` registers `calc_sum` under its own name;
/// `verb!(verbs, calc_sum as "calcSum")` under an explicit one. The method
/// must have the shape `async fn(&self, Value) -> VerbResult`. Evaluates to
/// `Result<(), RegistryError>`.
#[macro_export]
macro_rules! verb {
    ($verbs:expr, $method:ident as $name:expr) => {
        $verbs.verb($name, |backend, params| {
            $crate::__private::FutureExt::boxed(backend.$method(params))
        })
    };
    ($verbs:expr, $method:ident) => {
        $crate::verb!($verbs, $method as stringify!($method))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    struct Greeter;

    impl Greeter {
        async fn greet(&self, params: Value) -> VerbResult {
            let name = crate::params::require_str(&params, "name")?;
            Ok(json!(format!("hello {name}")))
        }

        async fn shout(&self, _params: Value) -> VerbResult {
            Ok(json!("HEY"))
        }
    }

    impl Backend for Greeter {
        fn declare(verbs: &mut VerbSet<Self>) -> Result<(), RegistryError> {
            verb!(verbs, greet)?;
            verb!(verbs, shout as "loudGreeting")?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn macro_registers_default_and_explicit_names() {
        let table = verbs_of::<Greeter>().unwrap();
        assert_eq!(table.names(), vec!["greet", "loudGreeting"]);

        let greet = table.get("greet").unwrap();
        assert_eq!(
            greet(&Greeter, json!({"name": "ada"})).await.unwrap(),
            json!("hello ada")
        );
    }
}
