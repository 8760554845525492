//! Built-in message handlers.

pub mod broker_error;
pub mod connection_override;
pub mod invocation;
pub mod ping;

use std::sync::Arc;

use crate::dispatch::Dispatcher;
use crate::runtime::InvocationRouter;

pub use broker_error::BrokerErrorHandler;
pub use connection_override::ConnectionOverrideHandler;
pub use invocation::InvocationHandler;
pub use ping::PingHandler;

/// Register every built-in handler.
pub fn register_defaults(dispatcher: &Dispatcher, router: Arc<InvocationRouter>) {
    dispatcher.register(Arc::new(PingHandler));
    dispatcher.register(Arc::new(InvocationHandler::new(router)));
    dispatcher.register(Arc::new(ConnectionOverrideHandler));
    dispatcher.register(Arc::new(BrokerErrorHandler));
}
