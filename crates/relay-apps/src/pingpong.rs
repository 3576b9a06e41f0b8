//! Ping-pong service: typed bindings for `examples.PingPongService` and its
//! client interface.
//!
//! `ping` is answered asynchronously through the client's `pong`, so a
//! caller must attach a [`PingPongClient`] to its proxy with
//! [`PingPongServiceProxy::set_client`] before pinging.

use crate::{decode_reply, to_params, to_reply, Reply};
use async_trait::async_trait;
use relay_types::{ApplicationError, MethodDescriptor, RelayResult, ServiceDescriptor};
use relay_wire::{CallArgs, CallOutcome, Endpoint, ServiceHandler, ServiceProxy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub static PINGPONG: ServiceDescriptor = ServiceDescriptor {
    name: "examples.PingPongService",
    methods: &[
        MethodDescriptor::notify("ping"),
        MethodDescriptor::notify("quit"),
        MethodDescriptor::call("pingTargetUrl"),
        MethodDescriptor::call("pingTargetService"),
        MethodDescriptor::notify("getPingPongService"),
    ],
    client: Some(&PINGPONG_CLIENT),
};

pub static PINGPONG_CLIENT: ServiceDescriptor = ServiceDescriptor {
    name: "examples.PingPongClient",
    methods: &[MethodDescriptor::notify("pong")],
    client: None,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingValue {
    pub value: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingTargetUrl {
    pub url: String,
    pub count: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingTargetService {
    pub count: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingTargetReply {
    pub ok: bool,
}

/// Server side of `examples.PingPongService`.
#[async_trait]
pub trait PingPongService: Send + Sync {
    fn ping(&self, value: u16);

    fn quit(&self);

    /// Connect to `url`, ping its service `0..=count` and wait for the
    /// final pong.
    async fn ping_target_url(&self, url: String, count: u16) -> Reply<bool>;

    /// Like `ping_target_url`, against a service already bound to `target`.
    async fn ping_target_service(&self, target: Endpoint, count: u16) -> Reply<bool>;

    /// Serve this service on `endpoint`.
    fn get_ping_pong_service(&self, endpoint: Endpoint);
}

/// Adapts a [`PingPongService`] implementation to a [`ServiceHandler`].
pub struct PingPongServiceStub<T> {
    inner: T,
}

impl<T: PingPongService> PingPongServiceStub<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: PingPongService> ServiceHandler for PingPongServiceStub<T> {
    fn descriptor(&self) -> &'static ServiceDescriptor {
        &PINGPONG
    }

    async fn handle(&self, method: &str, mut args: CallArgs) -> CallOutcome {
        match method {
            "ping" => {
                let PingValue { value } = args.parse()?;
                self.inner.ping(value);
                Ok(Value::Null)
            }
            "quit" => {
                self.inner.quit();
                Ok(Value::Null)
            }
            "pingTargetUrl" => {
                let PingTargetUrl { url, count } = args.parse()?;
                let ok = self.inner.ping_target_url(url, count).await?;
                to_reply(&PingTargetReply { ok })
            }
            "pingTargetService" => {
                let PingTargetService { count } = args.parse()?;
                let target = args.take_endpoint()?;
                let ok = self.inner.ping_target_service(target, count).await?;
                to_reply(&PingTargetReply { ok })
            }
            "getPingPongService" => {
                let endpoint = args.take_endpoint()?;
                self.inner.get_ping_pong_service(endpoint);
                Ok(Value::Null)
            }
            other => Err(ApplicationError::unknown_method(PINGPONG.name, other)),
        }
    }
}

/// Calling side of `examples.PingPongService`.
#[derive(Debug, Clone)]
pub struct PingPongServiceProxy {
    proxy: ServiceProxy,
}

impl PingPongServiceProxy {
    pub fn new(proxy: ServiceProxy) -> Self {
        Self { proxy }
    }

    /// Route the service's `pong` callbacks to `client`. The proxy holds
    /// the client weakly.
    pub fn set_client<C: PingPongClient + 'static>(&self, client: &Arc<PingPongClientStub<C>>) {
        self.proxy.set_local_handler(client);
    }

    pub fn ping(&self, value: u16) -> RelayResult<()> {
        self.proxy.notify("ping", to_params(&PingValue { value })?)
    }

    pub fn quit(&self) -> RelayResult<()> {
        self.proxy.notify("quit", Value::Null)
    }

    pub async fn ping_target_url(&self, url: impl Into<String>, count: u16) -> RelayResult<Reply<bool>> {
        let params = to_params(&PingTargetUrl {
            url: url.into(),
            count,
        })?;
        let outcome = self.proxy.call("pingTargetUrl", params).await?;
        Ok(decode_reply::<PingTargetReply>(outcome).map(|r| r.ok))
    }

    pub async fn ping_target_service(&self, target: Endpoint, count: u16) -> RelayResult<Reply<bool>> {
        let params = to_params(&PingTargetService { count })?;
        let outcome = self
            .proxy
            .call_with_endpoints("pingTargetService", params, vec![target])
            .await?;
        Ok(decode_reply::<PingTargetReply>(outcome).map(|r| r.ok))
    }

    pub fn get_ping_pong_service(&self, endpoint: Endpoint) -> RelayResult<()> {
        self.proxy
            .notify_with_endpoints("getPingPongService", Value::Null, vec![endpoint])
    }

    pub fn close(&self) {
        self.proxy.close();
    }

    pub fn inner(&self) -> &ServiceProxy {
        &self.proxy
    }
}

/// Client side of the ping-pong exchange: receives pongs.
pub trait PingPongClient: Send + Sync {
    fn pong(&self, value: u16);
}

/// Adapts a [`PingPongClient`] to a [`ServiceHandler`].
pub struct PingPongClientStub<T> {
    inner: T,
}

impl<T: PingPongClient> PingPongClientStub<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: PingPongClient> ServiceHandler for PingPongClientStub<T> {
    fn descriptor(&self) -> &'static ServiceDescriptor {
        &PINGPONG_CLIENT
    }

    async fn handle(&self, method: &str, args: CallArgs) -> CallOutcome {
        match method {
            "pong" => {
                let PingValue { value } = args.parse()?;
                self.inner.pong(value);
                Ok(Value::Null)
            }
            other => Err(ApplicationError::unknown_method(PINGPONG_CLIENT.name, other)),
        }
    }
}

/// Calling side of the client interface, as seen by a service.
#[derive(Debug, Clone)]
pub struct PingPongClientProxy {
    proxy: ServiceProxy,
}

impl PingPongClientProxy {
    pub fn new(proxy: ServiceProxy) -> Self {
        Self { proxy }
    }

    pub fn pong(&self, value: u16) -> RelayResult<()> {
        self.proxy.notify("pong", to_params(&PingValue { value })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_wire::{bind_proxy, bind_stub_with, pipe, BindOptions};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Answers every ping with `value + 1` and records quits.
    struct Bouncer {
        client: PingPongClientProxy,
        quits: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl PingPongService for Bouncer {
        fn ping(&self, value: u16) {
            let _ = self.client.pong(value.wrapping_add(1));
        }

        fn quit(&self) {
            *self.quits.lock().unwrap() += 1;
        }

        async fn ping_target_url(&self, _url: String, _count: u16) -> Reply<bool> {
            Err(ApplicationError::new(501, "not supported"))
        }

        async fn ping_target_service(&self, _target: Endpoint, count: u16) -> Reply<bool> {
            Ok(count > 0)
        }

        fn get_ping_pong_service(&self, endpoint: Endpoint) {
            endpoint.close();
        }
    }

    struct Collector(mpsc::UnboundedSender<u16>);

    impl PingPongClient for Collector {
        fn pong(&self, value: u16) {
            let _ = self.0.send(value);
        }
    }

    fn serve(quits: &Arc<Mutex<usize>>) -> (PingPongServiceProxy, ServiceProxy, Arc<dyn ServiceHandler>) {
        let (a, b) = pipe();
        let quits = Arc::clone(quits);
        let (client, handler) = bind_stub_with(b, &PINGPONG, BindOptions::default(), move |client| {
            Arc::new(PingPongServiceStub::new(Bouncer {
                client: PingPongClientProxy::new(client),
                quits,
            })) as Arc<dyn ServiceHandler>
        });
        (PingPongServiceProxy::new(bind_proxy(a, &PINGPONG)), client, handler)
    }

    #[tokio::test]
    async fn test_ping_delivers_pong_to_client() {
        let quits = Arc::new(Mutex::new(0));
        let (service, _binding, _handler) = serve(&quits);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = Arc::new(PingPongClientStub::new(Collector(tx)));
        service.set_client(&client);

        for value in [0, 1, 100] {
            service.ping(value).unwrap();
        }
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(101));

        service.quit().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(*quits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_calls_carry_replies_and_errors() {
        let quits = Arc::new(Mutex::new(0));
        let (service, _binding, _handler) = serve(&quits);

        let (target, _other) = pipe();
        assert_eq!(service.ping_target_service(target, 3).await.unwrap(), Ok(true));
        let err = service.ping_target_url("mojo:nowhere", 3).await.unwrap().unwrap_err();
        assert_eq!(err.code, 501);
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_bad_params() {
        let quits = Arc::new(Mutex::new(0));
        let (service, _binding, _handler) = serve(&quits);
        let outcome = service
            .inner()
            .call("pingTargetService", serde_json::json!({"count": 1}))
            .await
            .unwrap();
        assert_eq!(outcome.unwrap_err().code, 400);
    }
}
