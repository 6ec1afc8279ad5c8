//! RPC Server
//!
//! Accepts connections and serves the action protocol over each one. A
//! connection owns a handler with its own table of live objects: the
//! environments opened through it and every proxy handed out by lookups,
//! conversions and calls. Entries live until the client releases them or
//! the connection ends, at which point the whole table drops.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use object::{decode_kwargs, encode_kwargs, Kwargs, Object, TypeRegistry};
use proxy::{process_identity, Environment, EnvironmentArgs, EnvironmentFactory, Proxy, ProxyError};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::frame::{read_frame, write_frame};
use crate::proto::{field_obj, field_str, field_u64};

enum ServerObject {
    Environment(Arc<dyn Environment>),
    Proxy(Proxy),
}

/// Per-connection protocol state: the live-object table and the shared
/// factory and registry used to open environments and decode values.
struct RemoteHandler {
    factory: Arc<EnvironmentFactory>,
    registry: Arc<TypeRegistry>,
    objects: Mutex<HashMap<u64, ServerObject>>,
    next_id: AtomicU64,
    peer_addr: String,
}

impl RemoteHandler {
    fn new(
        factory: Arc<EnvironmentFactory>,
        registry: Arc<TypeRegistry>,
        peer_addr: String,
    ) -> Self {
        Self {
            factory,
            registry,
            objects: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            peer_addr,
        }
    }

    fn store(&self, obj: ServerObject) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(id, obj);
        id
    }

    fn env_at(&self, id: u64) -> proxy::Result<Arc<dyn Environment>> {
        match self.objects.lock().unwrap().get(&id) {
            Some(ServerObject::Environment(env)) => Ok(Arc::clone(env)),
            _ => Err(ProxyError::environment(
                "remote",
                format!("no environment with id {}", id),
            )),
        }
    }

    fn proxy_at(&self, id: u64) -> proxy::Result<Proxy> {
        match self.objects.lock().unwrap().get(&id) {
            Some(ServerObject::Proxy(proxy)) => Ok(proxy.clone()),
            _ => Err(ProxyError::environment(
                "remote",
                format!("no handle with id {}", id),
            )),
        }
    }

    /// Dispatch one request. Returns the reply fields and whether the
    /// connection should close after replying.
    async fn dispatch(&self, action: &str, request: &Kwargs) -> proxy::Result<(Kwargs, bool)> {
        let mut reply = Kwargs::new();
        let mut done = false;
        match action {
            "env_open" => {
                let variant = field_str(request, "variant")?;
                let mut args = EnvironmentArgs::new();
                for (key, value) in request {
                    if matches!(key.as_str(), "action" | "request_id" | "variant") {
                        continue;
                    }
                    if let Ok(value) = value.extract::<String>() {
                        args.insert(key.clone(), value.clone());
                    }
                }
                let env = self.factory.make(&variant, &args)?;
                let env_id = self.store(ServerObject::Environment(env));
                let identity = process_identity();
                reply.insert("env_id".into(), Object::wrap(env_id));
                reply.insert("upid".into(), Object::wrap(identity.unique_pid.clone()));
                reply.insert("node_id".into(), Object::wrap(identity.node_id.clone()));
                reply.insert("peer_addr".into(), Object::wrap(self.peer_addr.clone()));
                debug!(variant = %variant, env_id, "opened environment");
            }
            "env_close" => {
                self.objects.lock().unwrap().clear();
                done = true;
            }
            "find_proxy" => {
                let env = self.env_at(field_u64(request, "env_id")?)?;
                let name = field_str(request, "name")?;
                let proxy = env.find_proxy(&name).await?;
                let handle_id = self.store(ServerObject::Proxy(proxy));
                reply.insert("handle_id".into(), Object::wrap(handle_id));
            }
            "obj_to_proxy" => {
                let env = self.env_at(field_u64(request, "env_id")?)?;
                let local = field_obj(request, "local")?;
                let proxy = env.convert_object_to_proxy(local).await?;
                let handle_id = self.store(ServerObject::Proxy(proxy));
                reply.insert("handle_id".into(), Object::wrap(handle_id));
            }
            "proxy_to_obj" => {
                let proxy = self.proxy_at(field_u64(request, "handle_id")?)?;
                let local = proxy.environment().convert_proxy_to_object(&proxy).await?;
                reply.insert("local".into(), local);
            }
            "drop_handle" => {
                let handle_id = field_u64(request, "handle_id")?;
                self.objects.lock().unwrap().remove(&handle_id);
            }
            "call" => {
                let proxy = self.proxy_at(field_u64(request, "handle_id")?)?;
                let name = field_str(request, "name")?;
                let mut args = Vec::new();
                while let Some(obj) = request.get(&args.len().to_string()) {
                    let arg_id = obj
                        .extract::<u64>()
                        .copied()
                        .map_err(|e| ProxyError::call(&name, e.to_string()))?;
                    args.push(self.proxy_at(arg_id)?);
                }
                let result = proxy.call(&name, &args).await?;
                let handle_id = self.store(ServerObject::Proxy(result));
                reply.insert("handle_id".into(), Object::wrap(handle_id));
            }
            "compare" => {
                let proxy = self.proxy_at(field_u64(request, "handle_id")?)?;
                let other = self.proxy_at(field_u64(request, "other_id")?)?;
                let ordering = proxy.compare_to(&other).await?;
                reply.insert("result".into(), Object::wrap(ordering as i64));
            }
            "hash" => {
                let proxy = self.proxy_at(field_u64(request, "handle_id")?)?;
                reply.insert("result".into(), Object::wrap(proxy.hash_code().await?));
            }
            "to_string" => {
                let proxy = self.proxy_at(field_u64(request, "handle_id")?)?;
                reply.insert("result".into(), Object::wrap(proxy.display().await?));
            }
            "class_name" => {
                let proxy = self.proxy_at(field_u64(request, "handle_id")?)?;
                reply.insert("result".into(), Object::wrap(proxy.class_name().await?));
            }
            other => {
                return Err(ProxyError::environment(
                    "remote",
                    format!("unknown action: {}", other),
                ));
            }
        }
        Ok((reply, done))
    }
}

/// Serve the action protocol over one byte stream until the client closes
/// the environment or disconnects.
pub async fn serve_connection<R, W>(
    mut reader: R,
    mut writer: W,
    peer_addr: String,
    factory: Arc<EnvironmentFactory>,
    registry: Arc<TypeRegistry>,
    max_frame_size: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let handler = RemoteHandler::new(factory, registry, peer_addr);
    loop {
        let wire = match read_frame(&mut reader, max_frame_size).await {
            Ok(wire) => wire,
            Err(e) if e.is_clean_close() => return Ok(()),
            Err(e) => return Err(e),
        };
        let request = decode_kwargs(&wire, &handler.registry)?;
        let request_id = field_u64(&request, "request_id")?;
        let action = field_str(&request, "action")?;

        let (mut reply, done) = match handler.dispatch(&action, &request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let mut reply = Kwargs::new();
                // A fault is the called method failing; everything else is
                // the transport or dispatch failing.
                match e {
                    ProxyError::Fault { fault, .. } => {
                        reply.insert("fault".into(), Object::wrap(fault.message));
                    }
                    other => {
                        reply.insert("error_msg".into(), Object::wrap(other.to_string()));
                    }
                }
                (reply, false)
            }
        };
        reply.insert("request_id".into(), Object::wrap(request_id));

        let wire = match encode_kwargs(&reply, &handler.registry) {
            Ok(wire) => wire,
            Err(e) => {
                // The result value has no codec; report that in-band rather
                // than killing the connection.
                let mut fallback = Kwargs::new();
                fallback.insert("request_id".into(), Object::wrap(request_id));
                fallback.insert("error_msg".into(), Object::wrap(e.to_string()));
                encode_kwargs(&fallback, &handler.registry)?
            }
        };
        write_frame(&mut writer, &wire, max_frame_size).await?;

        if done {
            debug!("environment closed, ending connection");
            return Ok(());
        }
    }
}

/// TCP listener serving the action protocol to any number of clients.
pub struct RemoteServer {
    listener: TcpListener,
    factory: Arc<EnvironmentFactory>,
    registry: Arc<TypeRegistry>,
    max_frame_size: usize,
}

impl RemoteServer {
    /// Bind the configured address. Use port 0 to let the OS pick one,
    /// then read it back with [`local_addr`](Self::local_addr).
    pub async fn bind(
        factory: Arc<EnvironmentFactory>,
        registry: Arc<TypeRegistry>,
        config: ServerConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_address).await?;
        info!(addr = %listener.local_addr()?, "listening");
        Ok(Self {
            listener,
            factory,
            registry,
            max_frame_size: config.max_frame_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop: one task per connection, each with its own handler.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            stream.set_nodelay(true)?;
            debug!(%peer, "accepted connection");
            let factory = Arc::clone(&self.factory);
            let registry = Arc::clone(&self.registry);
            let max_frame_size = self.max_frame_size;
            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                let outcome = serve_connection(
                    reader,
                    writer,
                    peer.to_string(),
                    factory,
                    registry,
                    max_frame_size,
                )
                .await;
                if let Err(e) = outcome {
                    warn!(%peer, error = %e, "connection ended with error");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RemoteEnvironment;
    use crate::config::ClientConfig;
    use async_trait::async_trait;
    use proxy::{CallFault, CallTarget, LocalEnvironment};
    use tokio::io::duplex;

    struct Accumulator;

    #[async_trait]
    impl CallTarget for Accumulator {
        async fn call(
            &self,
            name: &str,
            args: &[Object],
        ) -> std::result::Result<Object, CallFault> {
            match name {
                "add" => {
                    let a = *args[0].extract::<i64>().map_err(|e| CallFault::new(e.to_string()))?;
                    let b = *args[1].extract::<i64>().map_err(|e| CallFault::new(e.to_string()))?;
                    Ok(Object::wrap(a + b))
                }
                "boom" => Err(CallFault::new("deliberate failure")),
                other => Err(CallFault::new(format!("no method: {}", other))),
            }
        }

        fn class_name(&self) -> &str {
            "Accumulator"
        }
    }

    fn test_setup() -> (Arc<EnvironmentFactory>, Arc<TypeRegistry>) {
        let registry = Arc::new(TypeRegistry::with_builtins());
        let factory = Arc::new(EnvironmentFactory::new());
        let reg = Arc::clone(&registry);
        factory.register("local", move |_args| {
            let env = LocalEnvironment::new(Arc::clone(&reg));
            env.register("accumulator", Arc::new(Accumulator));
            Ok(env as Arc<dyn Environment>)
        });
        (factory, registry)
    }

    async fn connect_pair() -> Arc<RemoteEnvironment> {
        let (factory, registry) = test_setup();
        let (client_io, server_io) = duplex(1 << 16);
        let (server_reader, server_writer) = tokio::io::split(server_io);
        let server_registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let _ = serve_connection(
                server_reader,
                server_writer,
                "test-peer".into(),
                factory,
                server_registry,
                crate::frame::DEFAULT_MAX_FRAME_SIZE,
            )
            .await;
        });
        let (client_reader, client_writer) = tokio::io::split(client_io);
        RemoteEnvironment::over(
            client_reader,
            client_writer,
            "local",
            &EnvironmentArgs::new(),
            registry,
            ClientConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn find_and_call_through_connection() {
        let env = connect_pair().await;
        let acc = env.find_proxy("accumulator").await.unwrap();
        assert_eq!(acc.class_name().await.unwrap(), "Accumulator");

        let sum: i64 = acc
            .call_as("add", &[Object::wrap(3i64), Object::wrap(4i64)])
            .await
            .unwrap();
        assert_eq!(sum, 7);
    }

    #[tokio::test]
    async fn lookup_failure_reports_name() {
        let env = connect_pair().await;
        let err = env.find_proxy("missing").await.unwrap_err();
        assert!(matches!(err, ProxyError::Lookup { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn call_fault_crosses_the_wire() {
        let env = connect_pair().await;
        let acc = env.find_proxy("accumulator").await.unwrap();
        let err = acc.call("boom", &[]).await.unwrap_err();
        assert!(err.is_fault());
        assert!(err.to_string().contains("deliberate failure"));
    }

    #[tokio::test]
    async fn values_round_trip_through_conversion() {
        let env = connect_pair().await;
        let proxy = env
            .convert_object_to_proxy(Object::wrap(99i64))
            .await
            .unwrap();
        let back = env.convert_proxy_to_object(&proxy).await.unwrap();
        assert_eq!(*back.extract::<i64>().unwrap(), 99);
    }

    #[tokio::test]
    async fn comparisons_use_peer_ordering() {
        let env = connect_pair().await;
        let small = env.convert_object_to_proxy(Object::wrap(1i64)).await.unwrap();
        let large = env.convert_object_to_proxy(Object::wrap(2i64)).await.unwrap();
        assert_eq!(
            small.compare_to(&large).await.unwrap(),
            std::cmp::Ordering::Less
        );
        assert_eq!(
            small.compare_to(&small.clone()).await.unwrap(),
            std::cmp::Ordering::Equal
        );
    }

    #[tokio::test]
    async fn close_ends_the_connection() {
        let env = connect_pair().await;
        env.close().await.unwrap();
        while env.is_active() {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        let err = env.find_proxy("accumulator").await.unwrap_err();
        assert!(matches!(err, ProxyError::ConnectionInactive));
    }
}
