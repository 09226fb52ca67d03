//! Dispatch of calls the region issues against the rack.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use rackrpc_common::auth::respond_to_challenge;
use rackrpc_common::protocol::methods::UNHANDLED_COMMAND;
use rackrpc_common::transport::RequestHandler;
use rackrpc_common::{ClusterCall, Request, Response, RpcArgs, RpcError, RpcResult};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::identity::{IdentityStore, SecretStore};

type CallFuture = BoxFuture<'static, rackrpc_common::Result<RpcResult>>;
type CallHandler = Arc<dyn Fn(RpcArgs) -> CallFuture + Send + Sync>;

/// Handlers for [`ClusterCall`]s, looked up by method name.
///
/// Calls without a handler, and methods that are not cluster calls at all,
/// are answered with an `UnhandledCommand` error.
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<ClusterCall, CallHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` for `call`, replacing any previous one.
    pub fn register<F, Fut>(&self, call: ClusterCall, handler: F)
    where
        F: Fn(RpcArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = rackrpc_common::Result<RpcResult>> + Send + 'static,
    {
        let handler: CallHandler = Arc::new(move |args| handler(args).boxed());
        self.handlers.write().insert(call, handler);
    }

    pub fn is_registered(&self, call: ClusterCall) -> bool {
        self.handlers.read().contains_key(&call)
    }

    pub async fn dispatch(&self, method: &str, args: RpcArgs) -> rackrpc_common::Result<RpcResult> {
        let handler = ClusterCall::from_method(method)
            .and_then(|call| self.handlers.read().get(&call).cloned());
        match handler {
            Some(handler) => handler(args).await,
            None => {
                debug!("No handler for {}", method);
                Err(RpcError::Remote {
                    kind: Some(UNHANDLED_COMMAND.to_string()),
                    message: format!("Unhandled command: {}", method),
                })
            }
        }
    }
}

#[async_trait]
impl RequestHandler for HandlerTable {
    async fn handle(&self, request: Request) -> Response {
        let outcome = self.dispatch(&request.method, request.args).await;
        Response::from_result(request.id, outcome)
    }
}

#[derive(Debug, Deserialize)]
struct AuthenticateArgs {
    message: String,
}

fn local_failure(err: impl std::fmt::Display) -> RpcError {
    RpcError::Remote {
        kind: None,
        message: err.to_string(),
    }
}

/// Installs the Identify and Authenticate handlers, which let the region
/// check this rack the way the rack checks the region.
pub fn install_builtin(
    table: &HandlerTable,
    identity: Arc<dyn IdentityStore>,
    secrets: Arc<dyn SecretStore>,
) {
    table.register(ClusterCall::Identify, move |_args| {
        let identity = identity.clone();
        async move {
            let ident = identity.load().await.map_err(local_failure)?;
            Ok::<_, RpcError>(json!({ "ident": ident.unwrap_or_default() }))
        }
    });

    table.register(ClusterCall::Authenticate, move |args| {
        let secrets = secrets.clone();
        async move {
            let args: AuthenticateArgs = serde_json::from_value(args)
                .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
            let message = hex::decode(&args.message)
                .map_err(|e| RpcError::InvalidRequest(format!("bad message: {}", e)))?;
            let secret = secrets.shared_secret().await.map_err(local_failure)?;
            let (digest, salt) = respond_to_challenge(&secret, &message);
            Ok::<_, RpcError>(json!({
                "digest": hex::encode(digest),
                "salt": hex::encode(salt),
            }))
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{MemoryIdentityStore, StaticSecretStore};
    use rackrpc_common::auth::Challenge;

    fn table() -> HandlerTable {
        let table = HandlerTable::new();
        install_builtin(
            &table,
            Arc::new(MemoryIdentityStore::new(Some("4y3h7n".into()))),
            Arc::new(StaticSecretStore::new(b"secret".to_vec())),
        );
        table
    }

    #[tokio::test]
    async fn test_identify_reports_local_identity() {
        let result = table().dispatch("Identify", json!({})).await.unwrap();
        assert_eq!(result, json!({"ident": "4y3h7n"}));
    }

    #[tokio::test]
    async fn test_authenticate_answers_challenge() {
        let challenge = Challenge::generate();
        let result = table()
            .dispatch(
                "Authenticate",
                json!({"message": hex::encode(challenge.message())}),
            )
            .await
            .unwrap();

        let digest = hex::decode(result["digest"].as_str().unwrap()).unwrap();
        let salt = hex::decode(result["salt"].as_str().unwrap()).unwrap();
        assert!(challenge.verify(b"secret", &digest, &salt));
        assert!(!challenge.verify(b"other", &digest, &salt));
    }

    #[tokio::test]
    async fn test_authenticate_rejects_bad_args() {
        let err = table()
            .dispatch("Authenticate", json!({"message": "zz"}))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_unregistered_and_unknown_calls() {
        let table = table();
        let err = table.dispatch("PowerOn", json!({})).await.unwrap_err();
        assert!(err.is_remote_kind(UNHANDLED_COMMAND));
        let err = table.dispatch("NoSuchThing", json!({})).await.unwrap_err();
        assert!(err.is_remote_kind(UNHANDLED_COMMAND));
    }

    #[tokio::test]
    async fn test_registered_handler_is_used() {
        let table = table();
        table.register(ClusterCall::PowerQuery, |args| async move {
            Ok::<_, RpcError>(json!({"state": "on", "system_id": args["system_id"]}))
        });
        assert!(table.is_registered(ClusterCall::PowerQuery));

        let response = table
            .handle(Request::new("PowerQuery", json!({"system_id": "abc"})))
            .await;
        assert!(response.success);
        assert_eq!(response.result.unwrap()["state"], "on");
    }
}
