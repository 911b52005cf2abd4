//! Per-backend-type verb registry.
//!
//! Each [`Backend`] type declares its verbs once, in [`Backend::declare`].
//! The resulting [`VerbTable`] is cached process-wide by `TypeId`, so every
//! instance of a backend type shares one table and lookups need no
//! per-instance state.
//!
//! A backend can inherit another backend's verbs through
//! [`VerbSet::inherit`], given a projection to the embedded base. Inherited
//! verbs sit underneath the type's own verbs: the same name declared by a
//! base and a derived type does not conflict, and the derived one wins.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, LazyLock};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::backend::{Backend, VerbResult};
use crate::errors::RegistryError;

/// A verb bound to backend type `H`.
pub type Verb<H> = Arc<dyn for<'a> Fn(&'a H, Value) -> BoxFuture<'a, VerbResult> + Send + Sync>;

type CachedTable = Box<dyn Any + Send + Sync>;

/// Built tables keyed by backend type. Written during setup only.
static TABLES: LazyLock<RwLock<HashMap<TypeId, CachedTable>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

fn erase<H, F>(f: F) -> Verb<H>
where
    F: for<'a> Fn(&'a H, Value) -> BoxFuture<'a, VerbResult> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Verbs being declared for backend type `H`.
pub struct VerbSet<H> {
    backend: &'static str,
    own: HashMap<String, Verb<H>>,
    inherited: HashMap<String, Verb<H>>,
    ancestors: Vec<&'static str>,
}

impl<H: Backend> VerbSet<H> {
    fn new() -> Self {
        Self {
            backend: std::any::type_name::<H>(),
            own: HashMap::new(),
            inherited: HashMap::new(),
            ancestors: Vec::new(),
        }
    }

    /// Declare a verb.
    ///
    /// Fails if `name` is empty or already declared on this type.
    pub fn verb<F>(&mut self, name: &str, f: F) -> Result<(), RegistryError>
    where
        F: for<'a> Fn(&'a H, Value) -> BoxFuture<'a, VerbResult> + Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(RegistryError::EmptyVerbName {
                backend: self.backend,
            });
        }
        match self.own.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateVerb {
                backend: self.backend,
                verb: name.to_owned(),
            }),
            Entry::Vacant(slot) => {
                let _ = slot.insert(erase(f));
                Ok(())
            }
        }
    }

    /// Inherit every verb of base type `B`, reached through `project`.
    ///
    /// The base's table (including its own ancestors) is built first if it
    /// has not been yet. When several bases declare the same verb, the
    /// first one inherited wins.
    pub fn inherit<B: Backend>(&mut self, project: fn(&H) -> &B) -> Result<(), RegistryError> {
        let base = verbs_of::<B>()?;
        for (name, verb) in &base.verbs {
            let verb = Arc::clone(verb);
            let _ = self
                .inherited
                .entry(name.clone())
                .or_insert_with(|| erase(move |h, params| verb(project(h), params)));
        }
        self.ancestors.push(base.backend);
        self.ancestors.extend(base.ancestors.iter().copied());
        Ok(())
    }

    fn freeze(self) -> VerbTable<H> {
        let mut verbs = self.inherited;
        verbs.extend(self.own);
        VerbTable {
            backend: self.backend,
            verbs,
            ancestors: self.ancestors,
        }
    }
}

/// Frozen verb table for backend type `H`.
pub struct VerbTable<H> {
    backend: &'static str,
    verbs: HashMap<String, Verb<H>>,
    ancestors: Vec<&'static str>,
}

impl<H> VerbTable<H> {
    /// Look up a verb, own or inherited. Absence is a normal outcome.
    pub fn get(&self, name: &str) -> Option<&Verb<H>> {
        self.verbs.get(name)
    }

    /// Whether the verb exists.
    pub fn contains(&self, name: &str) -> bool {
        self.verbs.contains_key(name)
    }

    /// Whether the backend has no verbs at all.
    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }

    /// Number of verbs, own and inherited.
    pub fn len(&self) -> usize {
        self.verbs.len()
    }

    /// All verb names (sorted).
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.verbs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Type name of the backend this table belongs to.
    pub fn backend_name(&self) -> &'static str {
        self.backend
    }

    /// Type names of inherited backends, nearest first.
    pub fn ancestors(&self) -> &[&'static str] {
        &self.ancestors
    }
}

/// The shared verb table for backend type `H`, declaring it on first use.
///
/// Declaration errors are returned every time until the type is fixed; a
/// failed declaration is never cached.
pub fn verbs_of<H: Backend>() -> Result<Arc<VerbTable<H>>, RegistryError> {
    let key = TypeId::of::<H>();
    if let Some(table) = cached::<H>(&TABLES.read(), key) {
        return Ok(table);
    }

    // Declared outside the lock: `inherit` re-enters for base types.
    let mut set = VerbSet::<H>::new();
    H::declare(&mut set)?;
    let table = Arc::new(set.freeze());

    let mut tables = TABLES.write();
    if let Some(existing) = cached::<H>(&tables, key) {
        return Ok(existing);
    }
    debug!(backend = table.backend, verbs = table.len(), "verb table declared");
    let _ = tables.insert(key, Box::new(Arc::clone(&table)));
    Ok(table)
}

fn cached<H: Backend>(
    tables: &HashMap<TypeId, CachedTable>,
    key: TypeId,
) -> Option<Arc<VerbTable<H>>> {
    tables
        .get(&key)?
        .downcast_ref::<Arc<VerbTable<H>>>()
        .map(Arc::clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{RpcError, VerbError};
    use assert_matches::assert_matches;
    use futures::FutureExt;
    use serde_json::json;

    struct Base {
        greeting: &'static str,
    }

    impl Base {
        async fn hello(&self, _params: Value) -> VerbResult {
            Ok(json!(self.greeting))
        }

        async fn shared(&self, _params: Value) -> VerbResult {
            Ok(json!("base"))
        }
    }

    impl Backend for Base {
        fn declare(verbs: &mut VerbSet<Self>) -> Result<(), RegistryError> {
            verbs.verb("hello", |b, p| b.hello(p).boxed())?;
            verbs.verb("shared", |b, p| b.shared(p).boxed())?;
            Ok(())
        }
    }

    struct Derived {
        base: Base,
    }

    impl Derived {
        async fn add(&self, params: Value) -> VerbResult {
            let a = params["a"].as_i64().unwrap_or(0);
            let b = params["b"].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        }

        async fn shared(&self, _params: Value) -> VerbResult {
            Ok(json!("derived"))
        }
    }

    impl Backend for Derived {
        fn declare(verbs: &mut VerbSet<Self>) -> Result<(), RegistryError> {
            verbs.inherit::<Base>(|d| &d.base)?;
            verbs.verb("add", |d, p| d.add(p).boxed())?;
            verbs.verb("shared", |d, p| d.shared(p).boxed())?;
            Ok(())
        }
    }

    struct Duplicated;

    impl Backend for Duplicated {
        fn declare(verbs: &mut VerbSet<Self>) -> Result<(), RegistryError> {
            verbs.verb("twice", |_, _| async { Ok(Value::Null) }.boxed())?;
            verbs.verb("twice", |_, _| async { Ok(Value::Null) }.boxed())?;
            Ok(())
        }
    }

    struct Unnamed;

    impl Backend for Unnamed {
        fn declare(verbs: &mut VerbSet<Self>) -> Result<(), RegistryError> {
            verbs.verb("", |_, _| async { Ok(Value::Null) }.boxed())
        }
    }

    struct Empty;

    impl Backend for Empty {
        fn declare(_verbs: &mut VerbSet<Self>) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    struct Failing;

    impl Backend for Failing {
        fn declare(verbs: &mut VerbSet<Self>) -> Result<(), RegistryError> {
            verbs.verb("nope", |_, _| {
                async { Err(VerbError::Rpc(RpcError::internal("nope"))) }.boxed()
            })
        }
    }

    #[tokio::test]
    async fn own_verbs_resolve() {
        let table = verbs_of::<Base>().unwrap();
        let base = Base { greeting: "hi" };
        let verb = table.get("hello").unwrap();
        assert_eq!(verb(&base, Value::Null).await.unwrap(), json!("hi"));
    }

    #[tokio::test]
    async fn derived_sees_own_and_inherited_verbs() {
        let table = verbs_of::<Derived>().unwrap();
        let derived = Derived {
            base: Base { greeting: "hey" },
        };

        let add = table.get("add").unwrap();
        assert_eq!(add(&derived, json!({"a": 2, "b": 3})).await.unwrap(), json!(5));

        let hello = table.get("hello").unwrap();
        assert_eq!(hello(&derived, Value::Null).await.unwrap(), json!("hey"));
    }

    #[tokio::test]
    async fn derived_verb_layers_over_inherited_one() {
        let table = verbs_of::<Derived>().unwrap();
        let derived = Derived {
            base: Base { greeting: "" },
        };
        let shared = table.get("shared").unwrap();
        assert_eq!(shared(&derived, Value::Null).await.unwrap(), json!("derived"));

        // The base table itself is untouched.
        let base_table = verbs_of::<Base>().unwrap();
        let base_shared = base_table.get("shared").unwrap();
        assert_eq!(
            base_shared(&derived.base, Value::Null).await.unwrap(),
            json!("base")
        );
    }

    #[test]
    fn duplicate_verb_fails_at_declaration() {
        let err = verbs_of::<Duplicated>().err().unwrap();
        assert_matches!(err, RegistryError::DuplicateVerb { ref verb, .. } if verb == "twice");
        // Never cached: the second attempt fails the same way.
        assert!(verbs_of::<Duplicated>().is_err());
    }

    #[test]
    fn empty_verb_name_rejected() {
        assert_matches!(
            verbs_of::<Unnamed>().err(),
            Some(RegistryError::EmptyVerbName { .. })
        );
    }

    #[test]
    fn unknown_verb_is_absent_not_error() {
        let table = verbs_of::<Base>().unwrap();
        assert!(table.get("missing").is_none());
        assert!(!table.contains("missing"));
    }

    #[test]
    fn tables_are_shared_per_type() {
        let a = verbs_of::<Derived>().unwrap();
        let b = verbs_of::<Derived>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn names_and_ancestors() {
        let table = verbs_of::<Derived>().unwrap();
        assert_eq!(table.names(), vec!["add", "hello", "shared"]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.ancestors().len(), 1);
        assert!(table.ancestors()[0].ends_with("Base"));
        assert!(table.backend_name().ends_with("Derived"));
    }

    #[test]
    fn empty_backend_has_empty_table() {
        let table = verbs_of::<Empty>().unwrap();
        assert!(table.is_empty());
        assert!(table.names().is_empty());
    }

    #[tokio::test]
    async fn verbs_can_return_error_values() {
        let table = verbs_of::<Failing>().unwrap();
        let verb = table.get("nope").unwrap();
        assert_matches!(verb(&Failing, Value::Null).await, Err(VerbError::Rpc(_)));
    }
}
