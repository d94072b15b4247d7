//! # Interface Proxies
//!
//! `remote_interface!` declares an async trait together with a client type
//! implementing it, where every method forwards to a `Dispatcher`:
//!
//! ```ignore
//! farcall::remote_interface! {
//!     pub trait Greeter => GreeterClient {
//!         fn say_hello(&self, name: String) -> String;
//!     }
//! }
//!
//! let greeter: GreeterClient = client.proxy();
//! let reply = greeter.say_hello("world".into()).await?;
//! ```
//!
//! The trait name is the service name resolved through discovery. Parameter
//! type descriptors are the declared Rust types, as written.

use serde::Serialize;
use serde_json::Value;

use crate::dispatcher::Dispatcher;
use crate::error::CallError;

/// A generated client for one remote interface.
pub trait RemoteProxy: Sized {
    /// Logical service name of the interface.
    const SERVICE: &'static str;

    fn from_dispatcher(dispatcher: Dispatcher) -> Self;
}

/// Encodes one argument, naming it in the error if that fails.
pub fn to_arg<T: Serialize + ?Sized>(name: &str, value: &T) -> Result<Value, CallError> {
    serde_json::to_value(value)
        .map_err(|e| CallError::Codec(format!("argument '{}' cannot be encoded: {}", name, e)))
}

#[macro_export]
macro_rules! remote_interface {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident => $client:ident {
            $(
                $(#[$method_meta:meta])*
                fn $method:ident(&self $(, $arg:ident : $ty:ty)*) -> $ret:ty;
            )*
        }
    ) => {
        $(#[$meta])*
        #[$crate::__private::async_trait]
        $vis trait $name: Send + Sync {
            $(
                $(#[$method_meta])*
                async fn $method(&self $(, $arg: $ty)*) -> $crate::Result<$ret>;
            )*
        }

        #[derive(Clone)]
        $vis struct $client {
            dispatcher: $crate::Dispatcher,
        }

        impl $crate::RemoteProxy for $client {
            const SERVICE: &'static str = stringify!($name);

            fn from_dispatcher(dispatcher: $crate::Dispatcher) -> Self {
                Self { dispatcher }
            }
        }

        #[$crate::__private::async_trait]
        impl $name for $client {
            $(
                async fn $method(&self $(, $arg: $ty)*) -> $crate::Result<$ret> {
                    let args = vec![$($crate::__private::to_arg(stringify!($arg), &$arg)?),*];
                    let param_types = vec![$(stringify!($ty).to_string()),*];
                    self.dispatcher
                        .call::<$ret>(stringify!($name), stringify!($method), args, param_types)
                        .await
                }
            )*
        }
    };
}
