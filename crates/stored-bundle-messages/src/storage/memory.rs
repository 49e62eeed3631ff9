//! In-memory storage service.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use stored_bundle_client::{Command, CommandMap, command::keys};
use stored_bundle_core::{
    Channel, ChannelError, Channels, CommandRequest, CommandResponse, OnPublish,
    PersistentMessage, Persistence, RpcClient, SessionId, TransportError,
};

/// In-memory stand-in for the storage service.
///
/// Answers the storage command set and hosts replay channels, so a
/// [`StorageClient`](stored_bundle_client::StorageClient) can be pointed at
/// it for both of its collaborators. Renaming a session opens a successor
/// in the same lineage; `queryBySessionId` reports the whole lineage.
///
/// Useful for development and tests. Data is lost on drop.
pub struct MemoryStorage {
    sessions: RwLock<HashMap<SessionId, StoredSession>>,
    channels: ChannelRegistry,
    log: RwLock<Vec<CommandRequest>>,
    next_session: AtomicI64,
    next_message: AtomicI64,
    offline: AtomicBool,
}

struct StoredSession {
    listen_channel: String,
    lineage: SessionId,
    messages: Vec<StoredMessage>,
}

struct StoredMessage {
    message: PersistentMessage,
    tags: HashSet<String>,
}

impl StoredMessage {
    fn is_active(&self) -> bool {
        !self.tags.contains("inactive")
    }
}

impl MemoryStorage {
    /// Create an empty storage service.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            channels: Arc::new(RwLock::new(HashMap::new())),
            log: RwLock::new(Vec::new()),
            next_session: AtomicI64::new(1),
            next_message: AtomicI64::new(1),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every command fail with [`TransportError::Closed`] until reset.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Create a session directly, as if started for `listen_channel`.
    pub fn create_session(&self, session_id: SessionId, listen_channel: &str, lineage: SessionId) {
        self.next_session.fetch_max(session_id + 1, Ordering::SeqCst);
        self.write_sessions().insert(
            session_id,
            StoredSession {
                listen_channel: listen_channel.to_string(),
                lineage,
                messages: Vec::new(),
            },
        );
    }

    /// Record a message into a session. Returns the message id.
    pub fn append(&self, session_id: SessionId, content: impl Into<Bytes>) -> Option<i64> {
        let mut sessions = self.write_sessions();
        let session = sessions.get_mut(&session_id)?;
        let id = self.next_message.fetch_add(1, Ordering::SeqCst);
        session.messages.push(StoredMessage {
            message: PersistentMessage::new(id, now_ms(), content),
            tags: HashSet::new(),
        });
        Some(id)
    }

    /// Whether message `id` carries `tag`.
    #[must_use]
    pub fn has_tag(&self, id: i64, tag: &str) -> bool {
        self.read_sessions()
            .values()
            .flat_map(|s| &s.messages)
            .any(|m| m.message.id == id && m.tags.contains(tag))
    }

    /// Every request received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<CommandRequest> {
        self.log.read().map(|l| l.clone()).unwrap_or_default()
    }

    /// How many requests named `command` were received.
    #[must_use]
    pub fn count(&self, command: Command) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.command == command.as_str())
            .count()
    }

    /// Replay channels currently open.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.channels.read().map(|c| c.len()).unwrap_or_default()
    }

    fn read_sessions(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, StoredSession>> {
        self.sessions.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_sessions(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, StoredSession>> {
        self.sessions.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn dispatch(&self, command: Command, inputs: &CommandMap) -> Result<Value, TransportError> {
        match command {
            Command::Start => {
                let listen_channel = input_str(inputs, keys::LISTEN_CHANNEL)?;
                let id = self.next_session.fetch_add(1, Ordering::SeqCst);
                self.create_session(id, listen_channel, id);
                Ok(json!(id))
            }
            Command::Rename => {
                let session_id = input_i64(inputs, keys::SESSION_ID)?;
                let (listen_channel, lineage) = {
                    let sessions = self.read_sessions();
                    let session = sessions.get(&session_id).ok_or_else(|| not_found(session_id))?;
                    (session.listen_channel.clone(), session.lineage)
                };
                let id = self.next_session.fetch_add(1, Ordering::SeqCst);
                self.create_session(id, &listen_channel, lineage);
                Ok(json!(id))
            }
            Command::QueryByChannelName => {
                let channel = input_str(inputs, keys::QUERY_CHANNEL)?;
                let mut ids: Vec<SessionId> = self
                    .read_sessions()
                    .iter()
                    .filter(|(_, s)| s.listen_channel == channel)
                    .map(|(id, _)| *id)
                    .collect();
                ids.sort_unstable();
                Ok(json!(ids))
            }
            Command::QueryBySessionId => {
                let session_id = input_i64(inputs, keys::SESSION_ID)?;
                let only_active = inputs
                    .get(keys::ONLY_WITH_ACTIVE_MESSAGES)
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let sessions = self.read_sessions();
                let lineage = sessions.get(&session_id).ok_or_else(|| not_found(session_id))?.lineage;
                let mut ids: Vec<SessionId> = sessions
                    .iter()
                    .filter(|(_, s)| s.lineage == lineage)
                    .filter(|(_, s)| !only_active || s.messages.iter().any(StoredMessage::is_active))
                    .map(|(id, _)| *id)
                    .collect();
                ids.sort_unstable();
                Ok(json!([ids]))
            }
            Command::Tag => {
                let ids: HashSet<i64> = input_list(inputs, keys::IDS)?
                    .iter()
                    .filter_map(Value::as_i64)
                    .collect();
                let tags: Vec<String> = input_list(inputs, keys::TAGS)?
                    .iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect();
                let mut tagged = 0_u64;
                for message in self.write_sessions().values_mut().flat_map(|s| &mut s.messages) {
                    if ids.contains(&message.message.id) {
                        message.tags.extend(tags.iter().cloned());
                        tagged += 1;
                    }
                }
                Ok(json!(tagged))
            }
            Command::Size => {
                let session_id = input_i64(inputs, keys::SESSION_ID)?;
                let sessions = self.read_sessions();
                let session = sessions.get(&session_id).ok_or_else(|| not_found(session_id))?;
                Ok(json!(session.messages.len()))
            }
            Command::Get => {
                let session_id = input_i64(inputs, keys::SESSION_ID)?;
                let limit = usize::try_from(input_i64(inputs, keys::LIMIT)?).unwrap_or_default();
                let skip = usize::try_from(input_i64(inputs, keys::SKIP)?).unwrap_or_default();
                let address = input_str(inputs, keys::REPLAY_CHANNEL)?;

                let replay: Vec<PersistentMessage> = {
                    let sessions = self.read_sessions();
                    let session = sessions.get(&session_id).ok_or_else(|| not_found(session_id))?;
                    session
                        .messages
                        .iter()
                        .skip(skip)
                        .take(limit)
                        .map(|m| m.message.clone())
                        .collect()
                };

                let channel = self
                    .channels
                    .read()
                    .map_err(|e| TransportError::Failed(e.to_string()))?
                    .get(address)
                    .cloned()
                    .ok_or_else(|| TransportError::Failed(format!("No replay channel at {address}")))?;

                // Newest first, so consumers cannot rely on arrival order.
                for message in replay.into_iter().rev() {
                    channel.deliver(&message);
                }
                Ok(Value::Null)
            }
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn not_found(session_id: SessionId) -> TransportError {
    TransportError::Failed(format!("Session not found: {session_id}"))
}

fn input<'a>(inputs: &'a CommandMap, key: &str) -> Result<&'a Value, TransportError> {
    inputs
        .get(key)
        .ok_or_else(|| TransportError::Failed(format!("Missing input: {key}")))
}

fn input_i64(inputs: &CommandMap, key: &str) -> Result<i64, TransportError> {
    input(inputs, key)?
        .as_i64()
        .ok_or_else(|| TransportError::Failed(format!("Input {key} is not an integer")))
}

fn input_str<'a>(inputs: &'a CommandMap, key: &str) -> Result<&'a str, TransportError> {
    input(inputs, key)?
        .as_str()
        .ok_or_else(|| TransportError::Failed(format!("Input {key} is not a string")))
}

fn input_list<'a>(inputs: &'a CommandMap, key: &str) -> Result<&'a Vec<Value>, TransportError> {
    input(inputs, key)?
        .as_array()
        .ok_or_else(|| TransportError::Failed(format!("Input {key} is not a list")))
}

#[async_trait]
impl RpcClient for MemoryStorage {
    async fn call(&self, request: CommandRequest) -> Result<CommandResponse, TransportError> {
        self.log
            .write()
            .map_err(|e| TransportError::Failed(e.to_string()))?
            .push(request.clone());

        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let command = request
            .command
            .parse::<Command>()
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        let inputs = CommandMap::from_request(&request)
            .ok_or_else(|| TransportError::Failed("Expected a command map input".to_string()))?;

        tracing::debug!(%command, "Memory storage handling command");
        self.dispatch(command, &inputs).map(CommandResponse::new)
    }
}

#[derive(Default)]
struct ChannelState {
    handlers: RwLock<Vec<Arc<dyn OnPublish<PersistentMessage>>>>,
}

impl ChannelState {
    fn deliver(&self, record: &PersistentMessage) {
        let handlers = self
            .handlers
            .read()
            .map(|h| h.clone())
            .unwrap_or_default();
        for handler in handlers {
            handler.on_publish(record.clone());
        }
    }
}

type ChannelRegistry = Arc<RwLock<HashMap<String, Arc<ChannelState>>>>;

struct MemoryChannel {
    address: String,
    state: Arc<ChannelState>,
    registry: ChannelRegistry,
}

#[async_trait]
impl Channel<PersistentMessage> for MemoryChannel {
    fn address(&self) -> &str {
        &self.address
    }

    async fn subscribe(
        &self,
        handler: Arc<dyn OnPublish<PersistentMessage>>,
    ) -> Result<(), ChannelError> {
        self.state
            .handlers
            .write()
            .map_err(|e| ChannelError::Io(e.to_string()))?
            .push(handler);
        Ok(())
    }

    fn publish(&self, record: PersistentMessage) -> Result<(), ChannelError> {
        let open = self
            .registry
            .read()
            .is_ok_and(|c| c.contains_key(&self.address));
        if !open {
            return Err(ChannelError::Closed(self.address.clone()));
        }
        self.state.deliver(&record);
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut channels) = self.registry.write() {
            channels.remove(&self.address);
        }
        if let Ok(mut handlers) = self.state.handlers.write() {
            handlers.clear();
        }
    }
}

#[async_trait]
impl Channels for MemoryStorage {
    async fn open_channel(
        &self,
        address: &str,
        _persistence: Persistence,
    ) -> Result<Box<dyn Channel<PersistentMessage>>, ChannelError> {
        let state = Arc::new(ChannelState::default());
        let mut channels = self.channels.write().map_err(|e| ChannelError::Lifetime {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        if channels.contains_key(address) {
            return Err(ChannelError::Lifetime {
                address: address.to_string(),
                reason: "address already in use".to_string(),
            });
        }
        channels.insert(address.to_string(), Arc::clone(&state));

        Ok(Box::new(MemoryChannel {
            address: address.to_string(),
            state,
            registry: Arc::clone(&self.channels),
        }))
    }
}
