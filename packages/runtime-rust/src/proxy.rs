//! Typed client proxies.
//!
//! [`service_client!`](crate::service_client) generates a struct with one
//! async method per route; each method encodes its arguments and forwards to
//! a [`ServiceProxy`], which runs the full client chain.
//!
//! ```ignore
//! courier_runtime::service_client! {
//!     pub struct CalcClient = "Calc" {
//!         fn add(a: i64, b: i64) -> i64 = "Add";
//!     }
//! }
//!
//! let calc = CalcClient::new(node.invoker());
//! assert_eq!(calc.add(2, 3).await?, 5);
//! ```

use std::sync::Arc;

use courier_core::codec::to_value;
use courier_core::{join_route, Metadata, RpcError, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::invoker::ClientInvoker;

/// Untyped forwarding half of a generated client.
#[derive(Clone)]
pub struct ServiceProxy {
    invoker: Arc<ClientInvoker>,
    prefix: String,
    meta: Metadata,
}

impl ServiceProxy {
    #[must_use]
    pub fn new(invoker: Arc<ClientInvoker>, prefix: impl Into<String>) -> Self {
        Self {
            invoker,
            prefix: prefix.into(),
            meta: Metadata::new(),
        }
    }

    /// Metadata attached to every call made through this proxy.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn route(&self, method: &str) -> String {
        join_route(&self.prefix, method)
    }

    /// Encodes one argument for the wire.
    ///
    /// # Errors
    ///
    /// [`RpcError::Codec`] if the argument cannot be represented.
    pub fn encode<A: Serialize + ?Sized>(arg: &A) -> Result<Value, RpcError> {
        Ok(to_value(arg)?)
    }

    /// Invokes `{prefix}/{method}` and decodes the result.
    ///
    /// # Errors
    ///
    /// The [`RpcError`] matching the call's failure status, or a codec error
    /// if the value is not a `T`.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T, RpcError> {
        let route = self.route(method);
        self.invoker.invoke_as(&route, args, self.meta.clone()).await
    }
}

/// Declares a typed client for one service.
///
/// Every listed method becomes `async fn name(&self, args…) ->
/// Result<Ret, RpcError>` calling the route `{prefix}/{route}`.
#[macro_export]
macro_rules! service_client {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident = $prefix:literal {
            $(
                $(#[$fattr:meta])*
                fn $method:ident ( $($arg:ident : $ty:ty),* $(,)? ) -> $ret:ty = $route:literal;
            )*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone)]
        $vis struct $name {
            proxy: $crate::proxy::ServiceProxy,
        }

        impl $name {
            #[must_use]
            pub fn new(invoker: ::std::sync::Arc<$crate::invoker::ClientInvoker>) -> Self {
                Self {
                    proxy: $crate::proxy::ServiceProxy::new(invoker, $prefix),
                }
            }

            #[must_use]
            pub fn from_proxy(proxy: $crate::proxy::ServiceProxy) -> Self {
                Self { proxy }
            }

            #[must_use]
            pub fn proxy(&self) -> &$crate::proxy::ServiceProxy {
                &self.proxy
            }

            $(
                $(#[$fattr])*
                pub async fn $method(
                    &self,
                    $($arg: $ty),*
                ) -> ::std::result::Result<$ret, $crate::courier_core::RpcError> {
                    let args = ::std::vec![$($crate::proxy::ServiceProxy::encode(&$arg)?),*];
                    self.proxy.call($route, args).await
                }
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ClientSettings;
    use crate::discovery::{MemoryDiscovery, ServiceDiscovery};
    use crate::interceptor::InterceptorSettings;
    use crate::registry::{handler_fn, InvokeArgs, MethodDefinition, RouteRegistryBuilder, ServiceDefinition};
    use crate::remoting::{ClientOptions, Dispatcher, RemotingClientFactory};

    crate::service_client! {
        /// Client for the test calculator.
        struct CalcClient = "Calc" {
            fn add(a: i64, b: i64) -> i64 = "Add";
            fn whoami() -> String = "WhoAmI";
            fn reset() -> () = "Reset";
        }
    }

    fn invoker() -> Arc<ClientInvoker> {
        let calc = ServiceDefinition::new("Calc")
            .method(
                MethodDefinition::new("Add")
                    .param("a", "i64")
                    .param("b", "i64")
                    .handler(handler_fn(|args: InvokeArgs, _meta| async move {
                        Ok::<_, anyhow::Error>(args.get::<i64>(0)? + args.get::<i64>(1)?)
                    })),
            )
            .method(MethodDefinition::new("WhoAmI").handler(handler_fn(
                |_args, meta: Metadata| async move {
                    Ok::<_, anyhow::Error>(meta.get("user").cloned().unwrap_or_default())
                },
            )))
            .method(
                MethodDefinition::new("Reset")
                    .returns_unit()
                    .handler(handler_fn(|_args, _meta| async move { Ok::<_, anyhow::Error>(()) })),
            );
        let mut builder = RouteRegistryBuilder::new();
        builder.add_service(&calc).unwrap();
        let registry = Arc::new(builder.build());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            InterceptorSettings::new(),
        ));
        Arc::new(ClientInvoker::new(
            registry,
            ClientSettings::default(),
            dispatcher,
            Arc::new(MemoryDiscovery::new()) as Arc<dyn ServiceDiscovery>,
            Arc::new(RemotingClientFactory::new(
                ClientOptions::default(),
                Duration::from_secs(1),
            )),
        ))
    }

    #[tokio::test]
    async fn generated_methods_forward_to_routes() {
        let calc = CalcClient::new(invoker());
        assert_eq!(calc.add(2, 3).await.unwrap(), 5);
        calc.reset().await.unwrap();
        assert_eq!(calc.proxy().route("Add"), "Calc/Add");
    }

    #[tokio::test]
    async fn proxy_metadata_travels_with_every_call() {
        let proxy = ServiceProxy::new(invoker(), "Calc").with_meta("user", "ada");
        let calc = CalcClient::from_proxy(proxy);
        assert_eq!(calc.whoami().await.unwrap(), "ada");
    }

    #[tokio::test]
    async fn undeclared_route_surfaces_as_error() {
        let proxy = ServiceProxy::new(invoker(), "Calc");
        let err = proxy.call::<i64>("Mul", Vec::new()).await.unwrap_err();
        assert!(matches!(err, RpcError::NotFoundRoute { .. }));
    }
}
