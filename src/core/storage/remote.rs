//! Storage delegated over a message bus
//!
//! [`RemoteStorage`] holds no data. Each call becomes a [`RemoteRequest`]
//! published to `{service}.{route}`, where the route comes from a per-operation
//! [`RoutingTable`]. On the owning side a [`StorageResponder`] executes the
//! request against a real [`Storage`] and replies with a [`RemoteResponse`].

use super::{ListFilter, Page, Storage};
use crate::error::{RbacError, Result, WireError};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Default upper bound on a single bus round-trip
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Storage operations that can be routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Exists,
    Read,
    Create,
    Update,
    Patch,
    Remove,
    List,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Exists,
        Operation::Read,
        Operation::Create,
        Operation::Update,
        Operation::Patch,
        Operation::Remove,
        Operation::List,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Exists => "exists",
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Patch => "patch",
            Operation::Remove => "remove",
            Operation::List => "list",
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = RbacError;

    fn from_str(value: &str) -> Result<Self> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == value)
            .ok_or_else(|| RbacError::InvalidFormat(format!("unknown operation '{}'", value)))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation name -> route suffix
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable(HashMap<Operation, String>);

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, operation: Operation, suffix: impl Into<String>) -> Self {
        self.0.insert(operation, suffix.into());
        self
    }

    /// Routes served by a policy service for roles
    pub fn roles() -> Self {
        RoutingTable::new()
            .route(Operation::Exists, "exists")
            .route(Operation::Read, "read")
            .route(Operation::Create, "create")
            .route(Operation::Update, "update")
            .route(Operation::Remove, "remove")
            .route(Operation::List, "list")
    }

    /// Routes served by a policy service for permissions. `patch` is registration.
    pub fn permissions() -> Self {
        RoutingTable::new()
            .route(Operation::Exists, "exists")
            .route(Operation::Read, "read")
            .route(Operation::List, "list")
            .route(Operation::Patch, "register")
    }

    pub fn get(&self, operation: Operation) -> Option<&str> {
        self.0.get(&operation).map(String::as_str)
    }

    pub fn operations(&self) -> impl Iterator<Item = Operation> + '_ {
        self.0.keys().copied()
    }

    /// Full destination for `operation` on `service`
    pub fn destination(&self, service: &str, operation: Operation) -> Result<String> {
        let suffix = self.get(operation).ok_or_else(|| {
            RbacError::Misconfiguration(format!("{} routing not available", operation))
        })?;
        Ok(format!("{}.{}", service, suffix))
    }
}

/// Request envelope published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datum: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<ListFilter>,
}

impl RemoteRequest {
    fn new(operation: Operation) -> Self {
        RemoteRequest {
            operation,
            id: None,
            datum: None,
            filter: None,
        }
    }

    fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    fn datum(mut self, datum: Value) -> Self {
        self.datum = Some(datum);
        self
    }

    fn required_id(&self) -> Result<&str> {
        self.id
            .as_deref()
            .ok_or_else(|| RbacError::InvalidFormat(format!("{} requires an id", self.operation)))
    }

    fn required_datum(&mut self) -> Result<Value> {
        self.datum
            .take()
            .ok_or_else(|| RbacError::InvalidFormat(format!("{} requires a datum", self.operation)))
    }
}

/// Reply envelope: the value the local backend would return, or a serialized error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteResponse {
    Ok(Value),
    Error(WireError),
}

impl RemoteResponse {
    pub fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(value) => RemoteResponse::Ok(value),
            Err(err) => RemoteResponse::Error(WireError::from(&err)),
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match self {
            RemoteResponse::Ok(value) => Ok(value),
            RemoteResponse::Error(wire) => Err(wire.into()),
        }
    }
}

/// Request/reply transport
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish_and_wait(&self, route: &str, request: RemoteRequest) -> Result<RemoteResponse>;
}

#[async_trait]
impl<B: MessageBus + ?Sized> MessageBus for Arc<B> {
    async fn publish_and_wait(&self, route: &str, request: RemoteRequest) -> Result<RemoteResponse> {
        (**self).publish_and_wait(route, request).await
    }
}

/// [`Storage`] that forwards every call over a [`MessageBus`]
pub struct RemoteStorage<T, B> {
    bus: B,
    service: String,
    routing: RoutingTable,
    timeout: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T, B> RemoteStorage<T, B>
where
    T: DeserializeOwned,
    B: MessageBus,
{
    pub fn new(bus: B, service: impl Into<String>, routing: RoutingTable) -> Self {
        RemoteStorage {
            bus,
            service: service.into(),
            routing,
            timeout: DEFAULT_TIMEOUT,
            _marker: PhantomData,
        }
    }

    /// Bound every round-trip. Expiry surfaces as `Unavailable`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call(&self, request: RemoteRequest) -> Result<Value> {
        let operation = request.operation;
        let route = self.routing.destination(&self.service, operation)?;
        debug!("Publishing {} to {}", operation, route);

        let response = tokio::time::timeout(self.timeout, self.bus.publish_and_wait(&route, request))
            .await
            .map_err(|_| {
                warn!("{} on {} timed out after {:?}", operation, route, self.timeout);
                RbacError::Unavailable(format!("{} timed out", route))
            })??;

        response.into_result()
    }

    async fn call_decode<R: DeserializeOwned>(&self, request: RemoteRequest) -> Result<R> {
        Ok(serde_json::from_value(self.call(request).await?)?)
    }
}

#[async_trait]
impl<T, B> Storage<T> for RemoteStorage<T, B>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    B: MessageBus,
{
    async fn exists(&self, id: &str) -> Result<bool> {
        self.call_decode(RemoteRequest::new(Operation::Exists).id(id))
            .await
    }

    async fn read(&self, id: &str) -> Result<T> {
        self.call_decode(RemoteRequest::new(Operation::Read).id(id))
            .await
    }

    async fn create(&self, id: &str, datum: T) -> Result<T> {
        let datum = serde_json::to_value(&datum)?;
        self.call_decode(RemoteRequest::new(Operation::Create).id(id).datum(datum))
            .await
    }

    async fn update(&self, id: &str, partial: Value) -> Result<T> {
        self.call_decode(RemoteRequest::new(Operation::Update).id(id).datum(partial))
            .await
    }

    async fn patch(&self, id: &str, datum: Value) -> Result<T> {
        self.call_decode(RemoteRequest::new(Operation::Patch).id(id).datum(datum))
            .await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.call(RemoteRequest::new(Operation::Remove).id(id))
            .await
            .map(|_| ())
    }

    async fn list(&self, filter: &ListFilter) -> Result<Page<T>> {
        let mut request = RemoteRequest::new(Operation::List);
        request.filter = Some(filter.clone());
        self.call_decode(request).await
    }
}

/// Consumer side of a bound route
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: RemoteRequest) -> RemoteResponse;
}

/// Serves [`RemoteRequest`]s against a local [`Storage`]
pub struct StorageResponder<T> {
    storage: Arc<dyn Storage<T>>,
}

impl<T> StorageResponder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(storage: Arc<dyn Storage<T>>) -> Self {
        StorageResponder { storage }
    }

    async fn execute(&self, mut request: RemoteRequest) -> Result<Value> {
        let storage = &self.storage;
        match request.operation {
            Operation::Exists => Ok(Value::Bool(storage.exists(request.required_id()?).await?)),
            Operation::Read => to_value(storage.read(request.required_id()?).await?),
            Operation::Create => {
                let datum: T = serde_json::from_value(request.required_datum()?)?;
                to_value(storage.create(request.required_id()?, datum).await?)
            }
            Operation::Update => {
                let datum = request.required_datum()?;
                to_value(storage.update(request.required_id()?, datum).await?)
            }
            Operation::Patch => {
                let datum = request.required_datum()?;
                to_value(storage.patch(request.required_id()?, datum).await?)
            }
            Operation::Remove => {
                storage.remove(request.required_id()?).await?;
                Ok(Value::Null)
            }
            Operation::List => {
                let filter = request.filter.take().unwrap_or_default();
                to_value(storage.list(&filter).await?)
            }
        }
    }
}

fn to_value<S: Serialize>(value: S) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

#[async_trait]
impl<T> RequestHandler for StorageResponder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn handle(&self, request: RemoteRequest) -> RemoteResponse {
        let operation = request.operation;
        let result = self.execute(request).await;
        if let Err(err) = &result {
            if !err.is_soft() {
                debug!("Remote {} failed: {}", operation, err);
            }
        }
        RemoteResponse::from_result(result)
    }
}

type Envelope = (RemoteRequest, oneshot::Sender<RemoteResponse>);

/// In-process bus with one consumer task per bound route
#[derive(Clone, Default)]
pub struct LocalBus {
    routes: Arc<RwLock<HashMap<String, mpsc::Sender<Envelope>>>>,
}

impl LocalBus {
    /// Queue depth of each route
    const CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `handler` as the consumer of `route`, replacing any previous one.
    /// Must be called inside a tokio runtime.
    pub fn bind(&self, route: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        let route = route.into();
        let (tx, mut rx) = mpsc::channel::<Envelope>(Self::CAPACITY);

        tokio::spawn(async move {
            while let Some((request, reply)) = rx.recv().await {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let response = handler.handle(request).await;
                    let _ = reply.send(response);
                });
            }
        });

        debug!("Bound route {}", route);
        self.routes.write().insert(route, tx);
    }

    pub fn unbind(&self, route: &str) {
        self.routes.write().remove(route);
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish_and_wait(&self, route: &str, request: RemoteRequest) -> Result<RemoteResponse> {
        let sender = self
            .routes
            .read()
            .get(route)
            .cloned()
            .ok_or_else(|| RbacError::Unavailable(format!("no consumer for {}", route)))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send((request, reply_tx))
            .await
            .map_err(|_| RbacError::Unavailable(format!("consumer for {} is gone", route)))?;

        reply_rx
            .await
            .map_err(|_| RbacError::Unavailable(format!("no reply on {}", route)))
    }
}

/// Bind every operation in `routing` for `service` to `storage`
pub fn serve_storage<T>(
    bus: &LocalBus,
    service: &str,
    routing: &RoutingTable,
    storage: Arc<dyn Storage<T>>,
) -> Result<()>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let responder: Arc<dyn RequestHandler> = Arc::new(StorageResponder::new(storage));
    for operation in routing.operations() {
        bus.bind(routing.destination(service, operation)?, responder.clone());
    }
    Ok(())
}
