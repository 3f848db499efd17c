//! Invocation registry: maps a durable method key back to a callable.
//!
//! The registry is populated at startup. Each service instance is registered
//! under the name producers use as `target_type`, and each of its methods is
//! registered with a typed parameter tuple. Lookup is a plain table, so a
//! record written by an older deployment whose method no longer exists fails
//! with [`Error::TargetNotFound`] instead of being retried.

use crate::codec::Params;
use crate::error::{Error, Result};
use crate::model::{MethodKey, TypeResolver};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

/// Boxed future returned by a registered handler.
pub type InvokeFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Type-erased handler for one registered method.
trait Invoke: Send + Sync {
    fn invoke(&self, args: Vec<Value>) -> InvokeFuture;
}

struct TypedMethod<S, P, F> {
    service: Arc<S>,
    handler: F,
    _params: PhantomData<fn() -> P>,
}

impl<S, P, F, Fut, E> Invoke for TypedMethod<S, P, F>
where
    S: Send + Sync + 'static,
    P: Params,
    F: Fn(Arc<S>, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    E: Display + 'static,
{
    fn invoke(&self, args: Vec<Value>) -> InvokeFuture {
        let args = match P::from_values(args) {
            Ok(args) => args,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let call = (self.handler)(Arc::clone(&self.service), args);
        Box::pin(async move { call.await.map_err(|e| Error::Invocation(e.to_string())) })
    }
}

/// A resolved callable plus the signature it was resolved with.
#[derive(Clone)]
pub struct ResolvedMethod {
    key: MethodKey,
    handler: Arc<dyn Invoke>,
}

impl ResolvedMethod {
    pub fn key(&self) -> &MethodKey {
        &self.key
    }

    /// Parameter types the stored arguments are decoded against.
    pub fn param_types(&self) -> &[String] {
        &self.key.param_types
    }

    /// Call the method with decoded arguments.
    pub fn invoke(&self, args: Vec<Value>) -> InvokeFuture {
        self.handler.invoke(args)
    }
}

impl std::fmt::Debug for ResolvedMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedMethod")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Registry of invokable methods, indexed by method key.
#[derive(Default)]
pub struct InvocationRegistry {
    methods: HashMap<MethodKey, Arc<dyn Invoke>>,
    known_types: HashSet<String>,
}

impl InvocationRegistry {
    /// Create an empty registry with no services.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register a service instance under `name` and start adding methods.
    pub fn service<S>(&mut self, name: &str, service: Arc<S>) -> ServiceRegistration<'_, S>
    where
        S: Send + Sync + 'static,
    {
        ServiceRegistration {
            registry: self,
            name: name.to_string(),
            service,
        }
    }

    /// Look up the callable for a method key.
    pub fn resolve(&self, key: &MethodKey) -> Result<ResolvedMethod> {
        self.methods
            .get(key)
            .map(|handler| ResolvedMethod {
                key: key.clone(),
                handler: Arc::clone(handler),
            })
            .ok_or_else(|| Error::TargetNotFound(key.to_string()))
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    fn insert(&mut self, key: MethodKey, handler: Arc<dyn Invoke>) {
        self.known_types.extend(key.param_types.iter().cloned());
        if self.methods.insert(key.clone(), handler).is_some() {
            warn!(method = %key, "replacing previously registered method");
        }
    }
}

impl TypeResolver for InvocationRegistry {
    fn resolves_type(&self, type_name: &str) -> bool {
        self.known_types.contains(type_name)
    }
}

/// Builder returned by [`InvocationRegistry::service`].
pub struct ServiceRegistration<'a, S> {
    registry: &'a mut InvocationRegistry,
    name: String,
    service: Arc<S>,
}

impl<S> ServiceRegistration<'_, S>
where
    S: Send + Sync + 'static,
{
    /// Register `method` with parameter tuple `P`.
    ///
    /// ```ignore
    /// registry
    ///     .service("NotificationService", Arc::new(notifier))
    ///     .method("send", |svc, (text,): (String,)| async move { svc.send(&text).await });
    /// ```
    pub fn method<P, F, Fut, E>(self, method: &str, handler: F) -> Self
    where
        P: Params,
        F: Fn(Arc<S>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Display + 'static,
    {
        let key = MethodKey::new(&self.name, method, P::type_names());
        let handler = TypedMethod {
            service: Arc::clone(&self.service),
            handler,
            _params: PhantomData,
        };
        self.registry.insert(key, Arc::new(handler));
        self
    }
}
