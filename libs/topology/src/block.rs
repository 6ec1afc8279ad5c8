//! In-Process Block Runtime
//!
//! The minimal worker a topology drives: named ports, subscription
//! bookkeeping, an activation flag, and an activity clock for idle
//! detection. Blocks answer the engine's call protocol through
//! [`CallTarget`], so the same messaging path works whether the block is
//! in-process or behind an RPC connection.
//!
//! Protocol methods: `uid`, `get_name`, `set_name`, `input_port_names`,
//! `output_port_names`, `subscribe_input` (an acceptor subscribes to one of
//! our output ports), `subscribe_output` (a provider subscribes to one of
//! our input ports), their unsubscribe duals, `activate`, `deactivate`, and
//! `activity_indicator` (milliseconds since the last produce/consume tick).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use uuid::Uuid;

use object::Object;
use proxy::{CallFault, CallTarget};

/// Lifecycle and subscription messages a block has received, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockEvent {
    SubscribeInput {
        port: String,
        peer_uid: String,
        peer_port: String,
    },
    SubscribeOutput {
        port: String,
        peer_uid: String,
        peer_port: String,
    },
    UnsubscribeInput {
        port: String,
        peer_uid: String,
        peer_port: String,
    },
    UnsubscribeOutput {
        port: String,
        peer_uid: String,
        peer_port: String,
    },
    Activate,
    Deactivate,
}

/// (local port, peer uid, peer port)
type Subscription = (String, String, String);

pub struct Block {
    uid: String,
    name: Mutex<String>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    active: AtomicBool,
    last_activity: Mutex<Instant>,
    // subscribers on our outputs / providers on our inputs
    acceptors: Mutex<Vec<Subscription>>,
    providers: Mutex<Vec<Subscription>>,
    events: Mutex<Vec<BlockEvent>>,
}

impl Block {
    pub fn new(name: impl Into<String>, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            uid: Uuid::new_v4().simple().to_string(),
            name: Mutex::new(name.into()),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            active: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            acceptors: Mutex::new(Vec::new()),
            providers: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Record a produce or consume tick, resetting the idle clock.
    pub fn tick(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// Milliseconds since the last tick. Blocks start idle at creation.
    pub fn idle_millis(&self) -> u64 {
        self.last_activity.lock().unwrap().elapsed().as_millis() as u64
    }

    pub fn events(&self) -> Vec<BlockEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: BlockEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn subscribe(
        &self,
        acceptor_side: bool,
        sub: Subscription,
    ) -> std::result::Result<(), CallFault> {
        let (valid_ports, table) = if acceptor_side {
            (&self.outputs, &self.acceptors)
        } else {
            (&self.inputs, &self.providers)
        };
        if !valid_ports.contains(&sub.0) {
            return Err(CallFault::new(format!("no such port: {}", sub.0)));
        }
        let mut table = table.lock().unwrap();
        if table.contains(&sub) {
            return Err(CallFault::new(format!(
                "{}[{}] already subscribed",
                sub.1, sub.2
            )));
        }
        table.push(sub);
        Ok(())
    }

    fn unsubscribe(
        &self,
        acceptor_side: bool,
        sub: &Subscription,
    ) -> std::result::Result<(), CallFault> {
        let table = if acceptor_side {
            &self.acceptors
        } else {
            &self.providers
        };
        let mut table = table.lock().unwrap();
        match table.iter().position(|s| s == sub) {
            Some(i) => {
                table.remove(i);
                Ok(())
            }
            None => Err(CallFault::new(format!(
                "{}[{}] is not subscribed",
                sub.1, sub.2
            ))),
        }
    }

    /// Protocol dispatch, shared with blocks that embed a `Block` and layer
    /// their own methods on top.
    pub(crate) fn dispatch(
        &self,
        name: &str,
        args: &[Object],
    ) -> std::result::Result<Object, CallFault> {
        match name {
            "uid" => Ok(Object::wrap(self.uid.clone())),
            "get_name" => Ok(Object::wrap(self.name())),
            "set_name" => {
                *self.name.lock().unwrap() = arg_str(args, 0)?;
                Ok(Object::null())
            }
            "input_port_names" => Ok(Object::wrap(self.inputs.clone())),
            "output_port_names" => Ok(Object::wrap(self.outputs.clone())),
            "subscribe_input" | "subscribe_output" | "unsubscribe_input"
            | "unsubscribe_output" => {
                let sub = (arg_str(args, 0)?, arg_str(args, 1)?, arg_str(args, 2)?);
                let acceptor_side = name.ends_with("_input");
                let event = match name {
                    "subscribe_input" => {
                        self.subscribe(acceptor_side, sub.clone())?;
                        BlockEvent::SubscribeInput {
                            port: sub.0,
                            peer_uid: sub.1,
                            peer_port: sub.2,
                        }
                    }
                    "subscribe_output" => {
                        self.subscribe(acceptor_side, sub.clone())?;
                        BlockEvent::SubscribeOutput {
                            port: sub.0,
                            peer_uid: sub.1,
                            peer_port: sub.2,
                        }
                    }
                    "unsubscribe_input" => {
                        self.unsubscribe(acceptor_side, &sub)?;
                        BlockEvent::UnsubscribeInput {
                            port: sub.0,
                            peer_uid: sub.1,
                            peer_port: sub.2,
                        }
                    }
                    _ => {
                        self.unsubscribe(acceptor_side, &sub)?;
                        BlockEvent::UnsubscribeOutput {
                            port: sub.0,
                            peer_uid: sub.1,
                            peer_port: sub.2,
                        }
                    }
                };
                self.record(event);
                Ok(Object::null())
            }
            "activate" => {
                self.active.store(true, Ordering::Release);
                self.record(BlockEvent::Activate);
                Ok(Object::null())
            }
            "deactivate" => {
                self.active.store(false, Ordering::Release);
                self.record(BlockEvent::Deactivate);
                Ok(Object::null())
            }
            "activity_indicator" => Ok(Object::wrap(self.idle_millis())),
            other => Err(CallFault::new(format!("no method: {}", other))),
        }
    }
}

pub(crate) fn arg_str(args: &[Object], index: usize) -> std::result::Result<String, CallFault> {
    let obj = args
        .get(index)
        .ok_or_else(|| CallFault::new(format!("missing argument {}", index)))?;
    Ok(obj
        .extract::<String>()
        .map_err(|e| CallFault::new(format!("argument {}: {}", index, e)))?
        .clone())
}

#[async_trait]
impl CallTarget for Block {
    async fn call(&self, name: &str, args: &[Object]) -> std::result::Result<Object, CallFault> {
        self.dispatch(name, args)
    }

    fn class_name(&self) -> &str {
        "Block"
    }

    fn display(&self) -> String {
        format!("<Block {}>", self.name())
    }
}
