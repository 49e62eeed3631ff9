//! Scripted collaborators for unit tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::Value;
use stored_bundle_core::{
    Channel, ChannelError, Channels, CommandRequest, CommandResponse, OnPublish,
    PersistentMessage, Persistence, RpcClient, TransportError,
};

/// What a [`ScriptedRpc`] does with a request.
pub enum Reply {
    Respond(Value),
    Fail,
    Hang,
}

type Handler = Box<dyn Fn(&CommandRequest) -> Reply + Send + Sync>;

/// Transport answering through a closure and recording every request.
pub struct ScriptedRpc {
    handler: Handler,
    requests: Mutex<Vec<CommandRequest>>,
}

impl ScriptedRpc {
    pub fn new(handler: impl Fn(&CommandRequest) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CommandRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RpcClient for ScriptedRpc {
    async fn call(&self, request: CommandRequest) -> Result<CommandResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        match (self.handler)(&request) {
            Reply::Respond(out) => Ok(CommandResponse::new(out)),
            Reply::Fail => Err(TransportError::Failed("scripted failure".to_string())),
            Reply::Hang => std::future::pending().await,
        }
    }
}

#[derive(Default)]
struct ChannelState {
    handlers: Mutex<Vec<Arc<dyn OnPublish<PersistentMessage>>>>,
    closed: AtomicBool,
}

/// Channel factory tracking how many channels are open.
#[derive(Default)]
pub struct FakeChannels {
    channels: Mutex<HashMap<String, Arc<ChannelState>>>,
    opened: AtomicUsize,
}

impl FakeChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels opened and not yet closed.
    pub fn open_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap()
            .values()
            .filter(|c| !c.closed.load(Ordering::SeqCst))
            .count()
    }

    pub fn opened_total(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.channels.lock().unwrap().keys().cloned().collect()
    }

    /// Publish to every handler subscribed at `address`.
    pub fn publish(&self, address: &str, record: PersistentMessage) {
        let state = self.channels.lock().unwrap().get(address).cloned();
        if let Some(state) = state {
            for handler in state.handlers.lock().unwrap().iter() {
                handler.on_publish(record.clone());
            }
        }
    }
}

struct FakeChannel {
    address: String,
    state: Arc<ChannelState>,
}

#[async_trait]
impl Channel<PersistentMessage> for FakeChannel {
    fn address(&self) -> &str {
        &self.address
    }

    async fn subscribe(
        &self,
        handler: Arc<dyn OnPublish<PersistentMessage>>,
    ) -> Result<(), ChannelError> {
        self.state.handlers.lock().unwrap().push(handler);
        Ok(())
    }

    fn publish(&self, record: PersistentMessage) -> Result<(), ChannelError> {
        for handler in self.state.handlers.lock().unwrap().iter() {
            handler.on_publish(record.clone());
        }
        Ok(())
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.handlers.lock().unwrap().clear();
    }
}

#[async_trait]
impl Channels for FakeChannels {
    async fn open_channel(
        &self,
        address: &str,
        _persistence: Persistence,
    ) -> Result<Box<dyn Channel<PersistentMessage>>, ChannelError> {
        let state = Arc::new(ChannelState::default());
        self.channels
            .lock()
            .unwrap()
            .insert(address.to_string(), Arc::clone(&state));
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeChannel {
            address: address.to_string(),
            state,
        }))
    }
}
