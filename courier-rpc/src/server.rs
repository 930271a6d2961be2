//! RPC server implementation

use crate::codec::{Frame, FrameCodec};
use crate::protocol::RpcMessage;
use crate::serializer::SerializerKind;
use crate::stub::DecodeArgs;
use bytes::BytesMut;
use courier_config::{CourierConfig, ServerConfig};
use courier_core::{CallRequest, CallResponse, Endpoint, Error, ResponseCode, Result};
use courier_registry::{registry_from_config, InMemoryRegistry, ServiceRegistry};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

/// RPC method handler trait
pub trait MethodHandler: Send + Sync {
    /// Handle one call. `args` holds each argument encoded with `serializer`;
    /// the return value must be encoded with the same serializer.
    fn handle(&self, args: &[Vec<u8>], serializer: SerializerKind) -> Result<Vec<u8>>;
}

/// Handler working on raw argument encodings
pub struct ClosureHandler<F>
where
    F: Fn(&[Vec<u8>], SerializerKind) -> Result<Vec<u8>> + Send + Sync,
{
    handler: F,
}

impl<F> ClosureHandler<F>
where
    F: Fn(&[Vec<u8>], SerializerKind) -> Result<Vec<u8>> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> MethodHandler for ClosureHandler<F>
where
    F: Fn(&[Vec<u8>], SerializerKind) -> Result<Vec<u8>> + Send + Sync,
{
    fn handle(&self, args: &[Vec<u8>], serializer: SerializerKind) -> Result<Vec<u8>> {
        (self.handler)(args, serializer)
    }
}

/// Handler that decodes a typed argument tuple and encodes a typed result
pub struct TypedHandler<A, R, F>
where
    A: DecodeArgs + 'static,
    R: Serialize + 'static,
    F: Fn(A) -> Result<R> + Send + Sync,
{
    handler: F,
    _phantom: PhantomData<fn(A) -> R>,
}

impl<A, R, F> TypedHandler<A, R, F>
where
    A: DecodeArgs + 'static,
    R: Serialize + 'static,
    F: Fn(A) -> Result<R> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<A, R, F> MethodHandler for TypedHandler<A, R, F>
where
    A: DecodeArgs + 'static,
    R: Serialize + 'static,
    F: Fn(A) -> Result<R> + Send + Sync,
{
    fn handle(&self, args: &[Vec<u8>], serializer: SerializerKind) -> Result<Vec<u8>> {
        let args = A::decode_args(args, serializer)?;
        let result = (self.handler)(args)?;
        serializer.serialize(&result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MethodKey {
    name: String,
    param_types: Vec<String>,
}

impl MethodKey {
    fn new(name: &str, param_types: &[String]) -> Self {
        Self {
            name: name.to_string(),
            param_types: param_types.to_vec(),
        }
    }
}

/// Methods of one published interface, keyed by name and parameter types
pub struct RpcService {
    name: String,
    methods: HashMap<MethodKey, Arc<dyn MethodHandler>>,
}

impl RpcService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Add a method handler for the given signature
    pub fn add_method<H: MethodHandler + 'static>(
        &mut self,
        name: &str,
        param_types: &[&str],
        handler: H,
    ) {
        let param_types: Vec<String> = param_types.iter().map(|t| t.to_string()).collect();
        self.methods
            .insert(MethodKey::new(name, &param_types), Arc::new(handler));
    }

    /// Add a typed method handler
    pub fn add_typed_method<A, R, F>(&mut self, name: &str, param_types: &[&str], handler: F)
    where
        A: DecodeArgs + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> Result<R> + Send + Sync + 'static,
    {
        self.add_method(name, param_types, TypedHandler::new(handler));
    }

    /// Add a closure method handler
    pub fn add_closure_method<F>(&mut self, name: &str, param_types: &[&str], handler: F)
    where
        F: Fn(&[Vec<u8>], SerializerKind) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.add_method(name, param_types, ClosureHandler::new(handler));
    }

    /// Builder form of [`RpcService::add_typed_method`]
    pub fn with_typed_method<A, R, F>(mut self, name: &str, param_types: &[&str], handler: F) -> Self
    where
        A: DecodeArgs + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> Result<R> + Send + Sync + 'static,
    {
        self.add_typed_method(name, param_types, handler);
        self
    }

    /// Look up the handler for an exact name and signature
    pub fn find_method(&self, name: &str, param_types: &[String]) -> Option<&Arc<dyn MethodHandler>> {
        self.methods.get(&MethodKey::new(name, param_types))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Routes requests to published services
#[derive(Clone, Default)]
pub struct Dispatcher {
    services: Arc<DashMap<String, Arc<RpcService>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `service` under `name`; returns false if the name is taken
    pub fn add_service(&self, name: &str, service: Arc<RpcService>) -> bool {
        match self.services.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(service);
                true
            }
        }
    }

    /// Run `request` against the matching method.
    ///
    /// Heartbeats produce no response. Every other request produces exactly
    /// one response, including when the handler fails or panics.
    pub fn dispatch(&self, request: &CallRequest, serializer: SerializerKind) -> Option<CallResponse> {
        if request.heartbeat {
            trace!("Heartbeat {} acknowledged", request.request_id);
            return None;
        }

        let service = match self.services.get(&request.interface_name) {
            Some(service) => Arc::clone(service.value()),
            None => {
                warn!("Service not found: {}", request.interface_name);
                return Some(CallResponse::fail(
                    &request.request_id,
                    ResponseCode::ServiceNotFound,
                ));
            }
        };

        let handler = match service.find_method(&request.method_name, &request.param_types) {
            Some(handler) => Arc::clone(handler),
            None => {
                warn!(
                    "Method not found: {}.{}({})",
                    request.interface_name,
                    request.method_name,
                    request.param_types.join(", ")
                );
                return Some(CallResponse::fail(
                    &request.request_id,
                    ResponseCode::MethodNotFound,
                ));
            }
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            handler.handle(&request.parameters, serializer)
        }));

        let response = match outcome {
            Ok(Ok(data)) => {
                debug!(
                    "Invoked {}.{} for request {}",
                    request.interface_name, request.method_name, request.request_id
                );
                CallResponse::success(&request.request_id, data)
            }
            Ok(Err(e)) => {
                warn!(
                    "{}.{} failed: {}",
                    request.interface_name, request.method_name, e
                );
                CallResponse::fail_with_message(&request.request_id, ResponseCode::Failure, e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    "{}.{} panicked: {}",
                    request.interface_name, request.method_name, message
                );
                CallResponse::fail_with_message(&request.request_id, ResponseCode::Failure, message)
            }
        };
        Some(response)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("Handler panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("Handler panicked: {}", message)
    } else {
        "Handler panicked".to_string()
    }
}

/// State shared by every connection task of one server
struct ConnectionContext {
    codec: FrameCodec,
    serializer: SerializerKind,
    dispatcher: Dispatcher,
    permits: Arc<Semaphore>,
    reader_idle: Duration,
}

/// RPC server
pub struct RpcServer {
    endpoint: Endpoint,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    registry: Arc<dyn ServiceRegistry>,
    published: Mutex<Vec<String>>,
    context: Arc<ConnectionContext>,
    shutdown_tx: watch::Sender<bool>,
}

impl RpcServer {
    /// Publish `service` under its own name
    pub async fn publish_service(&self, service: RpcService) -> Result<()> {
        let name = service.name().to_string();
        self.publish_service_as(&name, service).await
    }

    /// Publish `service` under `name`, locally and in the registry
    pub async fn publish_service_as(&self, name: &str, service: RpcService) -> Result<()> {
        if !self.context.dispatcher.add_service(name, Arc::new(service)) {
            info!("Service {} already published, ignoring", name);
            return Ok(());
        }

        self.registry.register_instance(name, &self.endpoint).await?;
        self.published.lock().push(name.to_string());
        info!("Published service {} at {}", name, self.endpoint);
        Ok(())
    }

    /// Accept connections until [`RpcServer::shutdown`] is called
    pub async fn start(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| Error::IllegalState("Server already started".to_string()))?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let stopped = *shutdown_rx.borrow();
        if stopped {
            info!("RPC server on {} was shut down before it started", self.local_addr);
            return Ok(());
        }

        info!("RPC server listening on {}", self.local_addr);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let context = Arc::clone(&self.context);
                        let closing = self.shutdown_tx.subscribe();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, context, closing).await {
                                warn!("Connection from {} closed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept RPC connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                _ = shutdown_rx.changed() => break,
            }
        }

        info!("RPC server on {} stopped", self.local_addr);
        Ok(())
    }

    /// Deregister every published name and stop all connection tasks
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.published.lock().drain(..).collect();
        for name in &names {
            if let Err(e) = self.registry.deregister_instance(name, &self.endpoint).await {
                error!("Failed to deregister service {}: {}", name, e);
            }
        }
        info!("Deregistered {} services, shutting down", names.len());
        let _ = self.shutdown_tx.send(true);
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint published in the registry
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn published_services(&self) -> Vec<String> {
        self.published.lock().clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.context.dispatcher
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<ConnectionContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    debug!("New RPC connection from {}", peer);
    stream.set_nodelay(true)?;

    let stopped = *shutdown_rx.borrow();
    if stopped {
        return Ok(());
    }

    let (mut reader, writer) = stream.into_split();
    let writer = Arc::new(tokio::sync::Mutex::new(writer));
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        while let Some(frame) = context.codec.decode(&mut buf)? {
            handle_frame(frame, &context, &writer).await?;
        }

        let read = tokio::select! {
            read = timeout(context.reader_idle, reader.read_buf(&mut buf)) => read,
            _ = shutdown_rx.changed() => {
                debug!("Closing connection from {} on shutdown", peer);
                break;
            }
        };

        match read {
            Err(_) => {
                info!("No frame from {} for {:?}, closing", peer, context.reader_idle);
                break;
            }
            Ok(Ok(0)) => {
                debug!("RPC connection closed by {}", peer);
                break;
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    Ok(())
}

async fn handle_frame(
    frame: Frame,
    context: &Arc<ConnectionContext>,
    writer: &Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
) -> Result<()> {
    let arg_serializer = frame.serializer;
    let request = match frame.into_message()? {
        RpcMessage::Request(request) => request,
        RpcMessage::Response(response) => {
            warn!("Ignoring response frame {} sent to server", response.request_id);
            return Ok(());
        }
    };

    if request.heartbeat {
        trace!("Heartbeat {} received", request.request_id);
        return Ok(());
    }

    let permit = Arc::clone(&context.permits)
        .acquire_owned()
        .await
        .map_err(|_| Error::IllegalState("Dispatch semaphore closed".to_string()))?;
    let context = Arc::clone(context);
    let writer = Arc::clone(writer);

    tokio::spawn(async move {
        let request_id = request.request_id.clone();
        let dispatcher = context.dispatcher.clone();
        let outcome =
            tokio::task::spawn_blocking(move || dispatcher.dispatch(&request, arg_serializer)).await;
        drop(permit);

        let response = match outcome {
            Ok(Some(response)) => response,
            Ok(None) => return,
            Err(e) => {
                error!("Dispatch task for {} failed: {}", request_id, e);
                CallResponse::fail_with_message(&request_id, ResponseCode::Failure, e.to_string())
            }
        };

        let frame = match context
            .codec
            .encode_message(&RpcMessage::Response(response), context.serializer)
        {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode response {}: {}", request_id, e);
                return;
            }
        };

        let mut writer = writer.lock().await;
        if let Err(e) = writer.write_all(&frame).await {
            warn!("Failed to send response {}: {}", request_id, e);
        }
    });

    Ok(())
}

/// RPC server builder
pub struct RpcServerBuilder {
    config: ServerConfig,
    reader_idle: Option<Duration>,
    registry: Option<Arc<dyn ServiceRegistry>>,
}

impl RpcServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            reader_idle: None,
            registry: None,
        }
    }

    /// Take server settings and the registry backend from `config`
    pub fn from_config(config: &CourierConfig) -> Result<Self> {
        Ok(Self {
            config: config.server.clone(),
            reader_idle: None,
            registry: Some(registry_from_config(&config.registry)?),
        })
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.host = host.into();
        self.config.port = port;
        self
    }

    pub fn registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn serializer(mut self, serializer: SerializerKind) -> Self {
        self.config.serializer = serializer.code() as u8;
        self
    }

    pub fn max_concurrent_calls(mut self, max: usize) -> Self {
        self.config.max_concurrent_calls = max;
        self
    }

    /// Close connections that send nothing for `idle`. Takes precedence over
    /// `reader_idle_secs` and keeps sub-second precision.
    pub fn reader_idle(mut self, idle: Duration) -> Self {
        self.reader_idle = Some(idle);
        self
    }

    /// Bind the listener. The returned server publishes its bound port.
    pub async fn build(self) -> Result<Arc<RpcServer>> {
        let serializer = SerializerKind::from_code(self.config.serializer as u32)
            .map_err(|e| Error::Config(e.to_string()))?;
        if self.config.max_concurrent_calls == 0 {
            return Err(Error::Config("max_concurrent_calls must be greater than 0".to_string()));
        }
        let reader_idle = self
            .reader_idle
            .unwrap_or_else(|| Duration::from_secs(self.config.reader_idle_secs));
        if reader_idle.is_zero() {
            return Err(Error::Config("reader idle timeout must be greater than 0".to_string()));
        }

        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let local_addr = listener.local_addr()?;
        let endpoint = Endpoint::new(self.config.host.clone(), local_addr.port());
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(InMemoryRegistry::new()) as Arc<dyn ServiceRegistry>);

        let context = Arc::new(ConnectionContext {
            codec: FrameCodec::new().with_max_frame_size(self.config.max_frame_size),
            serializer,
            dispatcher: Dispatcher::new(),
            permits: Arc::new(Semaphore::new(self.config.max_concurrent_calls)),
            reader_idle,
        });
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Arc::new(RpcServer {
            endpoint,
            local_addr,
            listener: Mutex::new(Some(listener)),
            registry,
            published: Mutex::new(Vec::new()),
            context,
            shutdown_tx,
        }))
    }
}

impl Default for RpcServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
