//! RPC Client
//!
//! A network-backed [`Environment`]: every capability call becomes a framed
//! request over a single connection shared by any number of concurrent
//! callers. A dedicated reader task owns the receive half and routes each
//! reply to the caller that issued the matching request id, so slow calls
//! never block fast ones and replies may arrive in any order.
//!
//! When the connection dies the multiplexer latches inactive, every pending
//! caller is woken with an error, and all later calls fail immediately
//! without touching the socket.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use object::{decode_kwargs, encode_kwargs, Kwargs, Object, TypeRegistry};
use proxy::{CallFault, Environment, EnvironmentArgs, Handle, Proxy, ProxyError};

use crate::config::ClientConfig;
use crate::error::{RemoteError, Result};
use crate::frame::{read_frame, write_frame};
use crate::proto::{field_str, field_u64, reply_error, reply_fault};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Routes replies from the reader task to waiting callers.
struct Multiplexer {
    pending: Mutex<HashMap<u64, oneshot::Sender<Kwargs>>>,
    active: AtomicBool,
    next_request_id: AtomicU64,
}

impl Multiplexer {
    fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            active: AtomicBool::new(true),
            next_request_id: AtomicU64::new(0),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(AtomicOrdering::Acquire)
    }

    /// Latch the connection inactive and wake every pending caller with an
    /// error by dropping their reply senders. The latch flips while the
    /// pending map is locked, so no caller can slip a new slot in between
    /// the flip and the drain.
    fn deactivate(&self) {
        let mut pending = self.pending.lock().unwrap();
        self.active.store(false, AtomicOrdering::Release);
        pending.clear();
    }

    /// Register a waiter for `request_id`. Returns `None` once the latch
    /// has dropped: after [`deactivate`](Self::deactivate) nobody will ever
    /// complete the slot, so the caller must fail instead of parking.
    fn register(&self, request_id: u64) -> Option<oneshot::Receiver<Kwargs>> {
        let mut pending = self.pending.lock().unwrap();
        if !self.active.load(AtomicOrdering::Acquire) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(request_id, tx);
        Some(rx)
    }

    fn remove(&self, request_id: u64) {
        self.pending.lock().unwrap().remove(&request_id);
    }

    /// Deliver a reply to its caller. Returns false when nobody is waiting,
    /// which happens when the caller's future was dropped mid-flight.
    fn complete(&self, request_id: u64, reply: Kwargs) -> bool {
        let sender = self.pending.lock().unwrap().remove(&request_id);
        match sender {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }
}

/// Removes the pending slot if the caller's future is dropped before the
/// reply arrives, so abandoned requests do not accumulate.
struct PendingGuard<'a> {
    mux: &'a Multiplexer,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.mux.remove(self.request_id);
    }
}

/// Shared send side of a connection: the multiplexer, the serialized write
/// half, and the registry used to encode and decode argument maps.
#[derive(Clone)]
struct Channel {
    mux: Arc<Multiplexer>,
    writer: Arc<tokio::sync::Mutex<BoxedWriter>>,
    registry: Arc<TypeRegistry>,
    max_frame_size: usize,
}

impl Channel {
    /// Send one request and wait for its reply.
    async fn transact(&self, action: &str, mut request: Kwargs) -> Result<Kwargs> {
        if !self.mux.is_active() {
            return Err(RemoteError::ConnectionInactive);
        }
        let request_id = self.mux.next_request_id.fetch_add(1, AtomicOrdering::SeqCst);
        request.insert("action".into(), Object::wrap(action.to_string()));
        request.insert("request_id".into(), Object::wrap(request_id));
        let wire = encode_kwargs(&request, &self.registry)?;

        let rx = match self.mux.register(request_id) {
            Some(rx) => rx,
            None => return Err(RemoteError::ConnectionInactive),
        };
        let _guard = PendingGuard {
            mux: &self.mux,
            request_id,
        };
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_frame(&mut *writer, &wire, self.max_frame_size).await {
                self.mux.deactivate();
                return Err(e);
            }
        }
        match rx.await {
            Ok(reply) => Ok(reply),
            Err(_) => Err(RemoteError::ConnectionInactive),
        }
    }
}

/// Reader task: owns the receive half, routes replies by request id, and
/// deactivates the multiplexer when the connection ends.
async fn run_reader<R>(
    mut reader: R,
    mux: Arc<Multiplexer>,
    registry: Arc<TypeRegistry>,
    max_frame_size: usize,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let wire = match read_frame(&mut reader, max_frame_size).await {
            Ok(wire) => wire,
            Err(e) => {
                if e.is_clean_close() {
                    debug!("connection closed by peer");
                } else {
                    warn!(error = %e, "reader failed");
                }
                break;
            }
        };
        let reply = match decode_kwargs(&wire, &registry) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "undecodable reply");
                break;
            }
        };
        let request_id = match reply
            .get("request_id")
            .and_then(|obj| obj.extract::<u64>().ok())
            .copied()
        {
            Some(id) => id,
            None => {
                warn!("reply without a request id");
                continue;
            }
        };
        if !mux.complete(request_id, reply) {
            debug!(request_id, "no caller waiting for reply");
        }
    }
    mux.deactivate();
}

/// Client side of a connection to a remote peer, exposing the peer's
/// capabilities through the [`Environment`] trait.
pub struct RemoteEnvironment {
    channel: Channel,
    peer_variant: String,
    env_id: u64,
    unique_pid: String,
    node_id: String,
    peer_addr: String,
    reader: JoinHandle<()>,
    me: Weak<RemoteEnvironment>,
}

impl RemoteEnvironment {
    /// Connect over TCP and open an environment of the given variant on the
    /// peer.
    pub async fn connect<A>(
        addr: A,
        variant: &str,
        args: &EnvironmentArgs,
        registry: Arc<TypeRegistry>,
        config: ClientConfig,
    ) -> Result<Arc<Self>>
    where
        A: ToSocketAddrs,
    {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RemoteError::handshake("connect timed out"))??;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Self::over(reader, writer, variant, args, registry, config).await
    }

    /// Open an environment over an already-established byte stream. Used by
    /// [`connect`](Self::connect) and by in-process tests.
    pub async fn over<R, W>(
        reader: R,
        writer: W,
        variant: &str,
        args: &EnvironmentArgs,
        registry: Arc<TypeRegistry>,
        config: ClientConfig,
    ) -> Result<Arc<Self>>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mux = Arc::new(Multiplexer::new());
        let writer: Arc<tokio::sync::Mutex<BoxedWriter>> =
            Arc::new(tokio::sync::Mutex::new(Box::new(writer)));
        let reader_task = tokio::spawn(run_reader(
            reader,
            Arc::clone(&mux),
            Arc::clone(&registry),
            config.max_frame_size,
        ));
        let channel = Channel {
            mux,
            writer,
            registry,
            max_frame_size: config.max_frame_size,
        };

        let mut request = Kwargs::new();
        for (key, value) in args {
            request.insert(key.clone(), Object::wrap(value.clone()));
        }
        request.insert("variant".into(), Object::wrap(variant.to_string()));
        let reply = channel.transact("env_open", request).await?;
        if let Some(msg) = reply_error(&reply) {
            return Err(RemoteError::handshake(msg));
        }
        let env_id = field_u64(&reply, "env_id")?;
        let unique_pid = field_str(&reply, "upid")?;
        let node_id = field_str(&reply, "node_id")?;
        let peer_addr = field_str(&reply, "peer_addr")?;
        debug!(variant, env_id, %unique_pid, "opened remote environment");

        Ok(Arc::new_cyclic(|me| Self {
            channel,
            peer_variant: variant.to_string(),
            env_id,
            unique_pid,
            node_id,
            peer_addr,
            reader: reader_task,
            me: me.clone(),
        }))
    }

    /// The variant of the environment running on the peer.
    pub fn peer_variant(&self) -> &str {
        &self.peer_variant
    }

    /// The address the peer sees this client as, useful for calling back.
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Whether the underlying connection is still usable.
    pub fn is_active(&self) -> bool {
        self.channel.mux.is_active()
    }

    /// Tell the peer to tear down the environment and its live objects.
    /// An already-dead connection counts as closed.
    pub async fn close(&self) -> Result<()> {
        let mut request = Kwargs::new();
        request.insert("env_id".into(), Object::wrap(self.env_id));
        match self.channel.transact("env_close", request).await {
            Ok(_) | Err(RemoteError::ConnectionInactive) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn proxy_for(&self, remote_id: u64) -> Proxy {
        let env = self.me.upgrade().expect("environment alive during call");
        let handle = RemoteHandle {
            channel: self.channel.clone(),
            env: self.me.clone(),
            remote_id,
        };
        Proxy::new(env as Arc<dyn Environment>, Arc::new(handle))
    }

    /// The peer-side id for a proxy's handle. A proxy from another
    /// environment is pulled out of its own environment as a value and
    /// pushed into this one first.
    async fn resolve_handle(&self, proxy: &Proxy) -> proxy::Result<u64> {
        if proxy.environment().unique_pid() == self.unique_pid {
            if let Some(handle) = proxy.handle().as_any().downcast_ref::<RemoteHandle>() {
                return Ok(handle.remote_id);
            }
        }
        let local = proxy.environment().convert_proxy_to_object(proxy).await?;
        let mine = self.convert_object_to_proxy(local).await?;
        match mine.handle().as_any().downcast_ref::<RemoteHandle>() {
            Some(handle) => Ok(handle.remote_id),
            None => Err(ProxyError::conversion(
                "foreign proxy did not resolve to a remote handle",
            )),
        }
    }
}

#[async_trait]
impl Environment for RemoteEnvironment {
    fn variant(&self) -> &str {
        "remote"
    }

    fn unique_pid(&self) -> &str {
        &self.unique_pid
    }

    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn registry(&self) -> &Arc<TypeRegistry> {
        &self.channel.registry
    }

    async fn find_proxy(&self, name: &str) -> proxy::Result<Proxy> {
        let mut request = Kwargs::new();
        request.insert("env_id".into(), Object::wrap(self.env_id));
        request.insert("name".into(), Object::wrap(name.to_string()));
        let reply = self
            .channel
            .transact("find_proxy", request)
            .await
            .map_err(ProxyError::from)?;
        if let Some(msg) = reply_error(&reply) {
            return Err(ProxyError::lookup(self.variant(), name, msg));
        }
        let remote_id = field_u64(&reply, "handle_id").map_err(ProxyError::from)?;
        Ok(self.proxy_for(remote_id))
    }

    async fn convert_object_to_proxy(&self, obj: Object) -> proxy::Result<Proxy> {
        let mut request = Kwargs::new();
        request.insert("env_id".into(), Object::wrap(self.env_id));
        request.insert("local".into(), obj);
        let reply = self
            .channel
            .transact("obj_to_proxy", request)
            .await
            .map_err(ProxyError::from)?;
        if let Some(msg) = reply_error(&reply) {
            return Err(ProxyError::conversion(msg));
        }
        let remote_id = field_u64(&reply, "handle_id").map_err(ProxyError::from)?;
        Ok(self.proxy_for(remote_id))
    }

    async fn convert_proxy_to_object(&self, proxy: &Proxy) -> proxy::Result<Object> {
        let remote_id = self.resolve_handle(proxy).await?;
        let mut request = Kwargs::new();
        request.insert("env_id".into(), Object::wrap(self.env_id));
        request.insert("handle_id".into(), Object::wrap(remote_id));
        let reply = self
            .channel
            .transact("proxy_to_obj", request)
            .await
            .map_err(ProxyError::from)?;
        if let Some(msg) = reply_error(&reply) {
            return Err(ProxyError::conversion(msg));
        }
        crate::proto::field_obj(&reply, "local").map_err(ProxyError::from)
    }
}

impl Drop for RemoteEnvironment {
    fn drop(&mut self) {
        if self.channel.mux.is_active() {
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                let channel = self.channel.clone();
                let env_id = self.env_id;
                rt.spawn(async move {
                    let mut request = Kwargs::new();
                    request.insert("env_id".into(), Object::wrap(env_id));
                    match channel.transact("env_close", request).await {
                        Ok(_) | Err(RemoteError::ConnectionInactive) => {}
                        Err(e) => warn!(error = %e, "environment teardown failed"),
                    }
                });
                // The reader exits on its own when the peer closes the
                // connection after env_close.
                return;
            }
        }
        self.reader.abort();
    }
}

impl std::fmt::Debug for RemoteEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEnvironment")
            .field("peer_variant", &self.peer_variant)
            .field("env_id", &self.env_id)
            .field("unique_pid", &self.unique_pid)
            .finish()
    }
}

/// Handle to an object living on the peer, identified by its peer-side id.
pub struct RemoteHandle {
    channel: Channel,
    env: Weak<RemoteEnvironment>,
    remote_id: u64,
}

impl RemoteHandle {
    fn env(&self) -> proxy::Result<Arc<RemoteEnvironment>> {
        self.env
            .upgrade()
            .ok_or_else(|| ProxyError::environment("remote", "environment dropped"))
    }

    async fn simple(&self, action: &str) -> proxy::Result<Kwargs> {
        let mut request = Kwargs::new();
        request.insert("handle_id".into(), Object::wrap(self.remote_id));
        let reply = self
            .channel
            .transact(action, request)
            .await
            .map_err(ProxyError::from)?;
        if let Some(msg) = reply_error(&reply) {
            return Err(ProxyError::call(action, msg));
        }
        Ok(reply)
    }
}

#[async_trait]
impl Handle for RemoteHandle {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn call(&self, name: &str, args: &[Proxy]) -> proxy::Result<Proxy> {
        let env = self.env()?;
        let mut request = Kwargs::new();
        request.insert("handle_id".into(), Object::wrap(self.remote_id));
        request.insert("name".into(), Object::wrap(name.to_string()));
        for (i, arg) in args.iter().enumerate() {
            let arg_id = env.resolve_handle(arg).await?;
            request.insert(i.to_string(), Object::wrap(arg_id));
        }
        let reply = self
            .channel
            .transact("call", request)
            .await
            .map_err(ProxyError::from)?;
        if let Some(message) = reply_fault(&reply) {
            return Err(ProxyError::fault(name, CallFault::new(message)));
        }
        if let Some(msg) = reply_error(&reply) {
            return Err(ProxyError::call(name, msg));
        }
        let remote_id = field_u64(&reply, "handle_id").map_err(ProxyError::from)?;
        Ok(env.proxy_for(remote_id))
    }

    async fn compare_to(&self, other: &Proxy) -> proxy::Result<Ordering> {
        let env = self.env()?;
        let other_id = env.resolve_handle(other).await?;
        let mut request = Kwargs::new();
        request.insert("handle_id".into(), Object::wrap(self.remote_id));
        request.insert("other_id".into(), Object::wrap(other_id));
        let reply = self
            .channel
            .transact("compare", request)
            .await
            .map_err(ProxyError::from)?;
        if let Some(msg) = reply_error(&reply) {
            return Err(ProxyError::call("compare", msg));
        }
        let result = crate::proto::field_i64(&reply, "result").map_err(ProxyError::from)?;
        Ok(result.cmp(&0))
    }

    async fn hash_code(&self) -> proxy::Result<u64> {
        let reply = self.simple("hash").await?;
        field_u64(&reply, "result").map_err(ProxyError::from)
    }

    async fn display(&self) -> proxy::Result<String> {
        let reply = self.simple("to_string").await?;
        field_str(&reply, "result").map_err(ProxyError::from)
    }

    async fn class_name(&self) -> proxy::Result<String> {
        let reply = self.simple("class_name").await?;
        field_str(&reply, "result").map_err(ProxyError::from)
    }
}

impl Drop for RemoteHandle {
    fn drop(&mut self) {
        if !self.channel.mux.is_active() {
            return;
        }
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let channel = self.channel.clone();
            let remote_id = self.remote_id;
            rt.spawn(async move {
                let mut request = Kwargs::new();
                request.insert("handle_id".into(), Object::wrap(remote_id));
                if let Err(e) = channel.transact("drop_handle", request).await {
                    debug!(error = %e, remote_id, "handle release not delivered");
                }
            });
        }
    }
}
