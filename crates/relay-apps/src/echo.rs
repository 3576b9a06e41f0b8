//! Echo service: typed bindings for `examples.Echo`.

use crate::{decode_reply, to_params, to_reply, Reply};
use async_trait::async_trait;
use relay_types::{ApplicationError, MethodDescriptor, RelayResult, ServiceDescriptor};
use relay_wire::{CallArgs, CallOutcome, ServiceHandler, ServiceProxy};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub static ECHO: ServiceDescriptor = ServiceDescriptor {
    name: "examples.Echo",
    methods: &[
        MethodDescriptor::call("echoString"),
        MethodDescriptor::notify("quit"),
    ],
    client: None,
};

/// Parameters and result of `echoString`. A missing value echoes as null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoString {
    #[serde(default)]
    pub value: Option<String>,
}

/// Server side of `examples.Echo`.
#[async_trait]
pub trait Echo: Send + Sync {
    async fn echo_string(&self, value: Option<String>) -> Reply<Option<String>>;

    fn quit(&self) {}
}

/// Adapts an [`Echo`] implementation to a [`ServiceHandler`].
pub struct EchoStub<T> {
    inner: T,
}

impl<T: Echo> EchoStub<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: Echo> ServiceHandler for EchoStub<T> {
    fn descriptor(&self) -> &'static ServiceDescriptor {
        &ECHO
    }

    async fn handle(&self, method: &str, args: CallArgs) -> CallOutcome {
        match method {
            "echoString" => {
                let request: EchoString = args.parse()?;
                let value = self.inner.echo_string(request.value).await?;
                to_reply(&EchoString { value })
            }
            "quit" => {
                self.inner.quit();
                Ok(Value::Null)
            }
            other => Err(ApplicationError::unknown_method(ECHO.name, other)),
        }
    }
}

/// Calling side of `examples.Echo`.
#[derive(Debug, Clone)]
pub struct EchoProxy {
    proxy: ServiceProxy,
}

impl EchoProxy {
    pub fn new(proxy: ServiceProxy) -> Self {
        Self { proxy }
    }

    pub async fn echo_string(
        &self,
        value: impl Into<Option<String>>,
    ) -> RelayResult<Reply<Option<String>>> {
        let params = to_params(&EchoString {
            value: value.into(),
        })?;
        let outcome = self.proxy.call("echoString", params).await?;
        Ok(decode_reply::<EchoString>(outcome).map(|reply| reply.value))
    }

    pub fn quit(&self) -> RelayResult<()> {
        self.proxy.notify("quit", Value::Null)
    }

    pub fn close(&self) {
        self.proxy.close();
    }

    pub fn inner(&self) -> &ServiceProxy {
        &self.proxy
    }
}
