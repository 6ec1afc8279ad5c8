//! Network Bridge Blocks
//!
//! The automatically inserted pair that carries a flow across a process
//! boundary. The sink half binds a TCP port in the source's environment and
//! publishes a `tcp://host:port` rendezvous address; the source half
//! connects to it from the destination's environment. Values travel as
//! tagged codec frames with the workspace framing, so anything the type
//! registry can encode crosses the bridge.
//!
//! Both halves embed a [`Block`] and answer the standard call protocol;
//! the engine treats them like any other leaf block. Data methods on top:
//! `rendezvous_address` and `send` on the sink, `recv` on the source.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use object::{Object, TypeRegistry, WireKwargs};
use proxy::{CallFault, CallTarget};
use remote::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};

use crate::block::Block;

fn parse_rendezvous(address: &str) -> std::result::Result<String, CallFault> {
    address
        .strip_prefix("tcp://")
        .map(str::to_string)
        .ok_or_else(|| CallFault::new(format!("bad rendezvous address: {}", address)))
}

/// Outbound half: queued values are framed and written to the one peer that
/// dials the rendezvous address.
pub struct BridgeSink {
    base: Block,
    address: String,
    listener: Mutex<Option<std::net::TcpListener>>,
    tx: mpsc::UnboundedSender<Object>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Object>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    registry: Arc<TypeRegistry>,
}

impl BridgeSink {
    /// Bind an ephemeral local port; the address is available immediately,
    /// before activation.
    pub fn new(registry: Arc<TypeRegistry>) -> std::io::Result<Self> {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
        listener.set_nonblocking(true)?;
        let address = format!("tcp://{}", listener.local_addr()?);
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            base: Block::new("BridgeSink", &["0"], &[]),
            address,
            listener: Mutex::new(Some(listener)),
            tx,
            rx: Mutex::new(Some(rx)),
            task: Mutex::new(None),
            registry,
        })
    }

    pub fn rendezvous_address(&self) -> &str {
        &self.address
    }

    fn activate(&self) {
        let listener = self.listener.lock().unwrap().take();
        let rx = self.rx.lock().unwrap().take();
        let (Some(listener), Some(rx)) = (listener, rx) else {
            // already activated once; the forward task is still running
            return;
        };
        let registry = Arc::clone(&self.registry);
        *self.task.lock().unwrap() = Some(tokio::spawn(run_sink(listener, rx, registry)));
    }

    fn deactivate(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

async fn run_sink(
    listener: std::net::TcpListener,
    mut rx: mpsc::UnboundedReceiver<Object>,
    registry: Arc<TypeRegistry>,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            warn!(error = %e, "bridge sink listener unusable");
            return;
        }
    };
    let (stream, peer) = match listener.accept().await {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!(error = %e, "bridge sink accept failed");
            return;
        }
    };
    debug!(%peer, "bridge peer connected");
    let (_, mut writer) = stream.into_split();
    while let Some(obj) = rx.recv().await {
        let wire = match registry.encode(&obj) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(error = %e, "value cannot cross the bridge");
                continue;
            }
        };
        let mut frame = WireKwargs::new();
        frame.insert("value".into(), wire);
        if let Err(e) = write_frame(&mut writer, &frame, DEFAULT_MAX_FRAME_SIZE).await {
            warn!(error = %e, "bridge write failed");
            return;
        }
    }
}

#[async_trait]
impl CallTarget for BridgeSink {
    async fn call(&self, name: &str, args: &[Object]) -> std::result::Result<Object, CallFault> {
        match name {
            "rendezvous_address" => Ok(Object::wrap(self.address.clone())),
            "send" => {
                let obj = args
                    .first()
                    .cloned()
                    .ok_or_else(|| CallFault::new("missing value argument"))?;
                self.base.tick();
                self.tx
                    .send(obj)
                    .map_err(|_| CallFault::new("bridge sink is shut down"))?;
                Ok(Object::null())
            }
            "activate" => {
                let reply = self.base.dispatch(name, args)?;
                self.activate();
                Ok(reply)
            }
            "deactivate" => {
                self.deactivate();
                self.base.dispatch(name, args)
            }
            other => self.base.dispatch(other, args),
        }
    }

    fn class_name(&self) -> &str {
        "BridgeSink"
    }
}

impl Drop for BridgeSink {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// Inbound half: dials the sink's rendezvous address on activation and
/// queues every decoded value for `recv`.
pub struct BridgeSource {
    base: Block,
    address: String,
    tx: mpsc::UnboundedSender<Object>,
    rx: Mutex<mpsc::UnboundedReceiver<Object>>,
    task: Mutex<Option<JoinHandle<()>>>,
    registry: Arc<TypeRegistry>,
}

impl BridgeSource {
    pub fn new(address: String, registry: Arc<TypeRegistry>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            base: Block::new("BridgeSource", &[], &["0"]),
            address,
            tx,
            rx: Mutex::new(rx),
            task: Mutex::new(None),
            registry,
        }
    }

    fn activate(&self) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        *task = Some(tokio::spawn(run_source(
            self.address.clone(),
            self.tx.clone(),
            Arc::clone(&self.registry),
        )));
    }

    fn deactivate(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }

    /// Next received value, or null when none is queued yet.
    fn recv(&self) -> Object {
        match self.rx.lock().unwrap().try_recv() {
            Ok(obj) => {
                self.base.tick();
                obj
            }
            Err(_) => Object::null(),
        }
    }
}

async fn run_source(
    address: String,
    tx: mpsc::UnboundedSender<Object>,
    registry: Arc<TypeRegistry>,
) {
    let target = match parse_rendezvous(&address) {
        Ok(target) => target,
        Err(e) => {
            warn!(error = %e, "bad rendezvous address");
            return;
        }
    };
    let stream = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%target, error = %e, "bridge connect failed");
            return;
        }
    };
    let (mut reader, _writer) = stream.into_split();
    loop {
        let mut frame = match read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await {
            Ok(frame) => frame,
            Err(e) => {
                if !e.is_clean_close() {
                    warn!(error = %e, "bridge read failed");
                }
                return;
            }
        };
        let Some(wire) = frame.remove("value") else {
            warn!("bridge frame without a value");
            continue;
        };
        match registry.decode(&wire) {
            Ok(obj) => {
                if tx.send(obj).is_err() {
                    return;
                }
            }
            Err(e) => warn!(error = %e, "undecodable bridge value"),
        }
    }
}

#[async_trait]
impl CallTarget for BridgeSource {
    async fn call(&self, name: &str, args: &[Object]) -> std::result::Result<Object, CallFault> {
        match name {
            "recv" => Ok(self.recv()),
            "activate" => {
                let reply = self.base.dispatch(name, args)?;
                self.activate();
                Ok(reply)
            }
            "deactivate" => {
                self.deactivate();
                self.base.dispatch(name, args)
            }
            other => self.base.dispatch(other, args),
        }
    }

    fn class_name(&self) -> &str {
        "BridgeSource"
    }
}

impl Drop for BridgeSource {
    fn drop(&mut self) {
        self.deactivate();
    }
}
