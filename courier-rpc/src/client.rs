//! RPC client implementation

use crate::codec::FrameCodec;
use crate::correlation::PendingCalls;
use crate::protocol::{PayloadKind, RpcMessage, DEFAULT_MAX_FRAME_SIZE};
use crate::serializer::SerializerKind;
use crate::stub::{ClientStub, EncodeArgs, ServiceProxy};
use bytes::{Bytes, BytesMut};
use courier_config::CourierConfig;
use courier_core::{CallRequest, CallResponse, Endpoint, Error, Result};
use courier_net::{ActiveConnection, ConnectionCache, LoadBalanceStrategy, LoadBalancer};
use courier_registry::{registry_from_config, ServiceDiscovery, ServiceRegistry};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Connection and call settings shared by every connection of a client
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub serializer: SerializerKind,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub writer_idle: Duration,
    pub max_frame_size: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            serializer: SerializerKind::default(),
            connect_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(30),
            writer_idle: Duration::from_secs(15),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// One multiplexed connection to a provider.
///
/// Any number of calls may be in flight at once; responses are matched back
/// to callers by request id, in whatever order the provider sends them.
pub struct ClientConnection {
    endpoint: Endpoint,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Arc<PendingCalls>,
    active: Arc<AtomicBool>,
    last_write: Mutex<Instant>,
    codec: FrameCodec,
    serializer: SerializerKind,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClientConnection {
    /// Open a connection and start its reader and heartbeat tasks
    pub async fn connect(endpoint: Endpoint, settings: &ClientSettings) -> Result<Arc<Self>> {
        let stream = timeout(settings.connect_timeout, TcpStream::connect(endpoint.address()))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "Connecting to {} took longer than {:?}",
                    endpoint, settings.connect_timeout
                ))
            })?
            .map_err(|e| Error::Connection(format!("Failed to connect to {}: {}", endpoint, e)))?;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        let codec = FrameCodec::new().with_max_frame_size(settings.max_frame_size);
        let pending = Arc::new(PendingCalls::new());
        let active = Arc::new(AtomicBool::new(true));

        let connection = Arc::new(Self {
            endpoint: endpoint.clone(),
            writer: tokio::sync::Mutex::new(writer),
            pending: Arc::clone(&pending),
            active: Arc::clone(&active),
            last_write: Mutex::new(Instant::now()),
            codec: codec.clone(),
            serializer: settings.serializer,
            tasks: Mutex::new(Vec::with_capacity(2)),
        });

        let reader_task = tokio::spawn(read_responses(reader, codec, pending, active, endpoint.clone()));
        let heartbeat_task =
            tokio::spawn(send_heartbeats(Arc::downgrade(&connection), settings.writer_idle));
        connection.tasks.lock().extend([reader_task, heartbeat_task]);

        info!("Connected to provider {}", endpoint);
        Ok(connection)
    }

    /// Send `request` and wait up to `wait` for its response
    pub async fn send(&self, request: &CallRequest, wait: Duration) -> Result<CallResponse> {
        self.ensure_active()?;

        let body = self.serializer.serialize(request)?;
        let frame = self.codec.encode(PayloadKind::Request, &body, self.serializer)?;

        let receiver = self.pending.register(&request.request_id)?;
        // The reader may have failed everything between the check and the insert
        if let Err(e) = self.ensure_active() {
            self.pending.remove(&request.request_id);
            return Err(e);
        }

        if let Err(e) = self.write_frame(&frame).await {
            self.pending.remove(&request.request_id);
            return Err(e);
        }
        trace!("Sent request {} to {}", request.request_id, self.endpoint);

        match timeout(wait, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Transport(format!(
                "Connection to {} dropped request {}",
                self.endpoint, request.request_id
            ))),
            Err(_) => {
                self.pending.remove(&request.request_id);
                Err(Error::Timeout(format!(
                    "No response to {} from {} within {:?}",
                    request.request_id, self.endpoint, wait
                )))
            }
        }
    }

    /// Send a keep-alive frame. Heartbeats are never answered.
    pub async fn send_heartbeat(&self) -> Result<()> {
        let body = self.serializer.serialize(&CallRequest::heartbeat())?;
        let frame = self.codec.encode(PayloadKind::Request, &body, self.serializer)?;
        self.write_frame(&frame).await
    }

    async fn write_frame(&self, frame: &Bytes) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(frame).await {
            self.active.store(false, Ordering::Release);
            return Err(Error::Transport(format!(
                "Failed to write to {}: {}",
                self.endpoint, e
            )));
        }
        *self.last_write.lock() = Instant::now();
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::Transport(format!("Connection to {} is closed", self.endpoint)))
        }
    }

    /// Close the connection and fail every call still waiting on it
    pub async fn close(&self) {
        self.active.store(false, Ordering::Release);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!("Shutdown of connection to {} failed: {}", self.endpoint, e);
        }
        self.pending
            .fail_all(&format!("Connection to {} closed", self.endpoint));
        debug!("Closed connection to {}", self.endpoint);
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }
}

impl ActiveConnection for ClientConnection {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

async fn read_responses(
    mut reader: OwnedReadHalf,
    codec: FrameCodec,
    pending: Arc<PendingCalls>,
    active: Arc<AtomicBool>,
    endpoint: Endpoint,
) {
    let mut buf = BytesMut::with_capacity(8 * 1024);

    let reason = loop {
        if let Err(e) = complete_buffered(&codec, &mut buf, &pending) {
            break e.to_string();
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) => break "closed by provider".to_string(),
            Ok(_) => {}
            Err(e) => break e.to_string(),
        }
    };

    active.store(false, Ordering::Release);
    warn!("Connection to {} lost: {}", endpoint, reason);
    pending.fail_all(&format!("Connection to {} lost: {}", endpoint, reason));
}

fn complete_buffered(codec: &FrameCodec, buf: &mut BytesMut, pending: &PendingCalls) -> Result<()> {
    while let Some(frame) = codec.decode(buf)? {
        match frame.into_message()? {
            RpcMessage::Response(response) => {
                let request_id = response.request_id.clone();
                if let Err(e) = pending.complete(response) {
                    warn!("Discarding response {}: {}", request_id, e);
                }
            }
            RpcMessage::Request(request) => {
                debug!("Ignoring request frame {} sent to client", request.request_id);
            }
        }
    }
    Ok(())
}

async fn send_heartbeats(connection: Weak<ClientConnection>, idle: Duration) {
    let period = (idle / 2).max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(connection) = connection.upgrade() else {
            break;
        };
        if !connection.is_active() {
            break;
        }
        if connection.last_write.lock().elapsed() < idle {
            continue;
        }

        trace!("Writer idle on {}, sending heartbeat", connection.endpoint);
        if let Err(e) = connection.send_heartbeat().await {
            debug!("Heartbeat to {} failed: {}", connection.endpoint, e);
            break;
        }
    }
}

/// Reject a response that does not answer `request` or reports a failure
pub fn check_response(request: &CallRequest, response: &CallResponse) -> Result<()> {
    if request.request_id != response.request_id {
        return Err(Error::IllegalState(format!(
            "Response {} does not match request {}",
            response.request_id, request.request_id
        )));
    }

    if !response.status.is_success() {
        return Err(Error::Invocation {
            code: response.status,
            message: response
                .message
                .clone()
                .unwrap_or_else(|| response.status.message().to_string()),
        });
    }

    Ok(())
}

/// RPC client
pub struct RpcClient {
    discovery: ServiceDiscovery,
    connections: ConnectionCache<ClientConnection>,
    settings: ClientSettings,
    connect_locks: DashMap<Endpoint, Arc<tokio::sync::Mutex<()>>>,
}

impl RpcClient {
    /// Call `interface.method` with typed arguments and decode the result
    pub async fn invoke<A, R>(
        &self,
        interface: &str,
        method: &str,
        param_types: &[&str],
        args: A,
    ) -> Result<R>
    where
        A: EncodeArgs,
        R: DeserializeOwned,
    {
        let serializer = self.settings.serializer;
        let request = CallRequest::new(
            interface,
            method,
            args.encode_args(serializer)?,
            param_types.iter().map(|t| t.to_string()).collect(),
        );

        let response = self.send_request(&request).await?;
        check_response(&request, &response)?;

        let data = response.data.ok_or_else(|| {
            Error::Serialization(format!("Response {} carries no result", response.request_id))
        })?;
        serializer.deserialize(&data)
    }

    /// Route `request` to a provider and wait for the raw response
    pub async fn send_request(&self, request: &CallRequest) -> Result<CallResponse> {
        let endpoint = self.discovery.resolve(request).await?;
        let connection = self.connection(&endpoint).await?;

        let result = connection.send(request, self.settings.request_timeout).await;
        if let Err(e) = &result {
            if e.is_fatal_to_connection() {
                self.connections.remove(&endpoint);
            }
        }
        result
    }

    async fn connection(&self, endpoint: &Endpoint) -> Result<Arc<ClientConnection>> {
        if let Some(connection) = self.connections.get(endpoint) {
            return Ok(connection);
        }

        // One dial per endpoint at a time; other endpoints are not held up
        let lock = Arc::clone(self.connect_locks.entry(endpoint.clone()).or_default().value());
        let _guard = lock.lock().await;
        if let Some(connection) = self.connections.get(endpoint) {
            return Ok(connection);
        }

        let connection = ClientConnection::connect(endpoint.clone(), &self.settings).await?;
        self.connections.set(endpoint.clone(), Arc::clone(&connection));
        Ok(connection)
    }

    /// Typed stub for a remote interface
    pub fn proxy<S: ClientStub>(self: &Arc<Self>) -> S {
        S::from_proxy(ServiceProxy::new(Arc::clone(self), S::INTERFACE))
    }

    /// Untyped proxy for `interface`
    pub fn service(self: &Arc<Self>, interface: &str) -> ServiceProxy {
        ServiceProxy::new(Arc::clone(self), interface)
    }

    pub fn discovery(&self) -> &ServiceDiscovery {
        &self.discovery
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.connections
            .connections()
            .iter()
            .filter(|connection| connection.is_active())
            .count()
    }

    /// Calls waiting for a response across all connections
    pub fn pending_count(&self) -> usize {
        self.connections
            .connections()
            .iter()
            .map(|connection| connection.pending_calls())
            .sum()
    }

    /// Close every connection
    pub async fn close(&self) {
        for connection in self.connections.drain() {
            connection.close().await;
        }
        info!("RPC client closed");
    }
}

/// RPC client builder
pub struct RpcClientBuilder {
    registry: Option<Arc<dyn ServiceRegistry>>,
    load_balancer: Option<Arc<dyn LoadBalancer>>,
    strategy: LoadBalanceStrategy,
    settings: ClientSettings,
}

impl RpcClientBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            load_balancer: None,
            strategy: LoadBalanceStrategy::default(),
            settings: ClientSettings::default(),
        }
    }

    /// Take client settings and the registry backend from `config`
    pub fn from_config(config: &CourierConfig) -> Result<Self> {
        let client = &config.client;
        let serializer = SerializerKind::from_code(client.serializer as u32)
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            registry: Some(registry_from_config(&config.registry)?),
            load_balancer: None,
            strategy: client.load_balancer.parse()?,
            settings: ClientSettings {
                serializer,
                connect_timeout: config.connect_timeout(),
                request_timeout: config.request_timeout(),
                writer_idle: config.writer_idle(),
                max_frame_size: client.max_frame_size,
            },
        })
    }

    pub fn registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn load_balancer_strategy(mut self, strategy: LoadBalanceStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Use a custom balancer instead of a built-in strategy
    pub fn load_balancer(mut self, load_balancer: Arc<dyn LoadBalancer>) -> Self {
        self.load_balancer = Some(load_balancer);
        self
    }

    pub fn serializer(mut self, serializer: SerializerKind) -> Self {
        self.settings.serializer = serializer;
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.settings.connect_timeout = connect_timeout;
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.settings.request_timeout = request_timeout;
        self
    }

    pub fn writer_idle(mut self, writer_idle: Duration) -> Self {
        self.settings.writer_idle = writer_idle;
        self
    }

    pub fn max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.settings.max_frame_size = max_frame_size;
        self
    }

    pub fn build(self) -> Result<Arc<RpcClient>> {
        let registry = self
            .registry
            .ok_or_else(|| Error::Config("RPC client needs a service registry".to_string()))?;
        let load_balancer = self
            .load_balancer
            .unwrap_or_else(|| self.strategy.build());
        debug!("Building RPC client with {} load balancing", load_balancer.name());

        Ok(Arc::new(RpcClient {
            discovery: ServiceDiscovery::new(registry, load_balancer),
            connections: ConnectionCache::new(),
            settings: self.settings,
            connect_locks: DashMap::new(),
        }))
    }
}

impl Default for RpcClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{RpcServer, RpcServerBuilder, RpcService};
    use courier_core::ResponseCode;
    use courier_registry::InMemoryRegistry;
    use tokio::net::TcpListener;

    async fn serve_hello(registry: Arc<InMemoryRegistry>) -> Arc<RpcServer> {
        let server = RpcServerBuilder::new()
            .address("127.0.0.1", 0)
            .registry(registry)
            .build()
            .await
            .unwrap();
        let service = RpcService::new("HelloService")
            .with_typed_method("hello", &["String"], |(message,): (String,)| {
                Ok(format!("8686 hello {}", message))
            });
        server.publish_service(service).await.unwrap();

        let running = Arc::clone(&server);
        tokio::spawn(async move { running.start().await });
        server
    }

    #[test]
    fn test_check_response() {
        let request = CallRequest::new("HelloService", "hello", vec![], vec![]);

        let ok = CallResponse::success(request.request_id.clone(), vec![]);
        assert!(check_response(&request, &ok).is_ok());

        let other = CallResponse::success("someone-else", vec![]);
        assert!(matches!(check_response(&request, &other), Err(Error::IllegalState(_))));

        let missing = CallResponse::fail(request.request_id.clone(), ResponseCode::MethodNotFound);
        match check_response(&request, &missing) {
            Err(Error::Invocation { code, .. }) => assert_eq!(code, ResponseCode::MethodNotFound),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_builder_requires_registry() {
        assert!(matches!(RpcClientBuilder::new().build(), Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_from_config() {
        let mut config = CourierConfig::default();
        config.client.load_balancer = "consistent_hash".to_string();
        config.client.serializer = 1;

        let client = RpcClientBuilder::from_config(&config).unwrap().build().unwrap();
        assert_eq!(client.settings().serializer, SerializerKind::Json);
        assert_eq!(client.discovery().load_balancer().name(), "consistent_hash");

        config.client.serializer = 4;
        assert!(matches!(RpcClientBuilder::from_config(&config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_invoke_reuses_connection() {
        let registry = Arc::new(InMemoryRegistry::new());
        let server = serve_hello(registry.clone()).await;
        let client = RpcClientBuilder::new().registry(registry).build().unwrap();

        for name in ["X", "Y"] {
            let reply: String = client
                .invoke("HelloService", "hello", &["String"], (name.to_string(),))
                .await
                .unwrap();
            assert_eq!(reply, format!("8686 hello {}", name));
        }
        assert_eq!(client.connection_count(), 1);
        assert_eq!(client.pending_count(), 0);

        client.close().await;
        assert_eq!(client.connection_count(), 0);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_timeout_clears_pending() {
        // Accepts connections but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let registry = Arc::new(InMemoryRegistry::new());
        registry
            .register_instance("SilentService", &Endpoint::new("127.0.0.1", port))
            .await
            .unwrap();
        let client = RpcClientBuilder::new()
            .registry(registry)
            .request_timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        let result: Result<String> = client.invoke("SilentService", "ping", &[], ()).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_loss_fails_pending_calls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 64];
                let _ = stream.read(&mut buf).await;
                // dropping the stream resets the connection
            }
        });

        let settings = ClientSettings::default();
        let connection = ClientConnection::connect(Endpoint::new("127.0.0.1", port), &settings)
            .await
            .unwrap();
        let request = CallRequest::new("DyingService", "ping", vec![], vec![]);

        let result = connection.send(&request, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(connection.pending_calls(), 0);
        assert!(!connection.is_active());
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_idle_connection() {
        let registry = Arc::new(InMemoryRegistry::new());
        let server = RpcServerBuilder::new()
            .address("127.0.0.1", 0)
            .registry(registry.clone())
            .reader_idle(Duration::from_secs(1))
            .build()
            .await
            .unwrap();
        server
            .publish_service(RpcService::new("HelloService").with_typed_method(
                "hello",
                &["String"],
                |(message,): (String,)| Ok(format!("8686 hello {}", message)),
            ))
            .await
            .unwrap();
        let running = Arc::clone(&server);
        tokio::spawn(async move { running.start().await });

        let client = RpcClientBuilder::new()
            .registry(registry)
            .writer_idle(Duration::from_millis(200))
            .build()
            .unwrap();

        let _: String = client
            .invoke("HelloService", "hello", &["String"], ("X".to_string(),))
            .await
            .unwrap();
        // Well past the server's reader idle limit
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(client.connection_count(), 1);

        let reply: String = client
            .invoke("HelloService", "hello", &["String"], ("Y".to_string(),))
            .await
            .unwrap();
        assert_eq!(reply, "8686 hello Y");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_connection_dropped_without_heartbeat() {
        let registry = Arc::new(InMemoryRegistry::new());
        let server = RpcServerBuilder::new()
            .address("127.0.0.1", 0)
            .registry(registry.clone())
            .reader_idle(Duration::from_secs(1))
            .build()
            .await
            .unwrap();
        server
            .publish_service(RpcService::new("HelloService").with_typed_method(
                "hello",
                &["String"],
                |(message,): (String,)| Ok(format!("8686 hello {}", message)),
            ))
            .await
            .unwrap();
        let running = Arc::clone(&server);
        tokio::spawn(async move { running.start().await });

        let client = RpcClientBuilder::new()
            .registry(registry)
            .writer_idle(Duration::from_secs(60))
            .build()
            .unwrap();

        let _: String = client
            .invoke("HelloService", "hello", &["String"], ("X".to_string(),))
            .await
            .unwrap();
        assert_eq!(client.connection_count(), 1);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(client.connection_count(), 0);

        // The next call dials a fresh connection
        let reply: String = client
            .invoke("HelloService", "hello", &["String"], ("Z".to_string(),))
            .await
            .unwrap();
        assert_eq!(reply, "8686 hello Z");
        assert_eq!(client.connection_count(), 1);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_slow_endpoint_does_not_block_others() {
        // A listener that never accepts, with its backlog filled, stalls new dials
        let socket = tokio::net::TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let stalled = socket.listen(0).unwrap();
        let stalled_port = stalled.local_addr().unwrap().port();
        let mut fillers = Vec::new();
        for _ in 0..8 {
            if let Ok(Ok(stream)) = timeout(
                Duration::from_millis(100),
                TcpStream::connect(("127.0.0.1", stalled_port)),
            )
            .await
            {
                fillers.push(stream);
            }
        }

        let registry = Arc::new(InMemoryRegistry::new());
        let server = serve_hello(registry.clone()).await;
        registry
            .register_instance("SlowService", &Endpoint::new("127.0.0.1", stalled_port))
            .await
            .unwrap();

        let client = RpcClientBuilder::new()
            .registry(registry)
            .connect_timeout(Duration::from_secs(3))
            .build()
            .unwrap();

        let slow_client = Arc::clone(&client);
        let slow_call = tokio::spawn(async move {
            slow_client
                .invoke::<_, String>("SlowService", "ping", &[], ())
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let reply: String = client
            .invoke("HelloService", "hello", &["String"], ("X".to_string(),))
            .await
            .unwrap();
        assert_eq!(reply, "8686 hello X");
        assert!(started.elapsed() < Duration::from_secs(1));

        slow_call.abort();
        drop(fillers);
        drop(stalled);
        server.shutdown().await;
    }
}
