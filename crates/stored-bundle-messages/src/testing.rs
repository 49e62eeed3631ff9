//! Fault injection over the in-memory storage service.

use std::sync::Arc;

use async_trait::async_trait;
use stored_bundle_client::{Command, CommandMap, StorageClient, command::keys};
use stored_bundle_core::{
    Channels, CommandRequest, CommandResponse, RpcClient, SessionId, StorageConfig, TransportError,
};

use crate::MemoryStorage;

/// How a matched command misbehaves.
pub enum Fault {
    Fail,
    Hang,
}

type Rule = Box<dyn Fn(Command, Option<SessionId>) -> Option<Fault> + Send + Sync>;

/// Forwards to a [`MemoryStorage`] unless the rule picks a fault.
pub struct FaultyRpc {
    inner: Arc<MemoryStorage>,
    rule: Rule,
}

#[async_trait]
impl RpcClient for FaultyRpc {
    async fn call(&self, request: CommandRequest) -> Result<CommandResponse, TransportError> {
        let session_id = CommandMap::from_request(&request)
            .and_then(|m| m.get(keys::SESSION_ID).and_then(serde_json::Value::as_i64));
        let fault = request
            .command
            .parse::<Command>()
            .ok()
            .and_then(|command| (self.rule)(command, session_id));

        match fault {
            None => self.inner.call(request).await,
            Some(Fault::Fail) => Err(TransportError::Failed("injected failure".to_string())),
            Some(Fault::Hang) => std::future::pending().await,
        }
    }
}

/// A client over `storage` whose commands pass through `rule` first.
pub fn faulty_client(
    storage: &Arc<MemoryStorage>,
    rule: impl Fn(Command, Option<SessionId>) -> Option<Fault> + Send + Sync + 'static,
) -> StorageClient {
    let rpc = FaultyRpc {
        inner: Arc::clone(storage),
        rule: Box::new(rule),
    };
    StorageClient::new(
        Arc::new(rpc),
        Arc::clone(storage) as Arc<dyn Channels>,
        StorageConfig::default(),
    )
}
