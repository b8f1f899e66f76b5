//! REST CRUD client.
//!
//! Every call is one independent HTTP exchange. There is no retry; a timeout
//! applies only when the configuration sets one.

use crate::config::ClientConfig;
use crate::error::ClientError;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tega_protocol::{ArgsKwargs, PathCodec, QueryParams, RpcResult, VersionCursor};

/// Read-only management endpoints (`GET /_{name}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Management {
    /// Current root nodes.
    Roots,
    /// Old (versioned) roots.
    Old,
    /// Pub/sub channels and their subscribers.
    Channels,
    /// Subscribers and their channels.
    Subscribers,
    /// Known tega IDs.
    Ids,
    /// Channels with global scope.
    Global,
    /// Subscribe forwarders.
    Forwarders,
    /// Attached server plugins and their scopes.
    Plugins,
    /// Reloads the server log.
    Reload,
}

impl Management {
    pub fn as_str(&self) -> &'static str {
        match self {
            Management::Roots => "roots",
            Management::Old => "old",
            Management::Channels => "channels",
            Management::Subscribers => "subscribers",
            Management::Ids => "ids",
            Management::Global => "global",
            Management::Forwarders => "forwarders",
            Management::Plugins => "plugins",
            Management::Reload => "reload",
        }
    }
}

#[derive(Debug, Deserialize)]
struct BeginResult {
    txid: String,
}

/// Client-side transaction slot.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TxState {
    Idle,
    /// A `begin` request is in flight.
    Pending,
    Open(String),
}

/// Releases a `Pending` slot if `begin` fails or is dropped mid-request.
struct PendingBegin<'a> {
    state: &'a Mutex<TxState>,
    armed: bool,
}

impl PendingBegin<'_> {
    fn open(mut self, txid: String) {
        *self.state.lock() = TxState::Open(txid);
        self.armed = false;
    }
}

impl Drop for PendingBegin<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            if *state == TxState::Pending {
                *state = TxState::Idle;
            }
        }
    }
}

/// Options of a CRUD read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub version: VersionCursor,
    /// Include internal attributes in the returned tree.
    pub internal: bool,
    /// Treat the path as a regular expression; the server returns a list.
    pub regex: bool,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: impl Into<VersionCursor>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    pub fn with_regex(mut self, regex: bool) -> Self {
        self.regex = regex;
        self
    }
}

/// HTTP client for the tega REST API.
pub struct CrudClient {
    http: reqwest::Client,
    codec: PathCodec,
    tega_id: String,
    tx: Mutex<TxState>,
}

impl CrudClient {
    /// Creates a client for the server and identity in `config`.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            codec: PathCodec::new(&config.host, config.port)?,
            tega_id: config.tega_id.clone(),
            tx: Mutex::new(TxState::Idle),
        })
    }

    pub fn tega_id(&self) -> &str {
        &self.tega_id
    }

    /// Returns the id of the open transaction, if any.
    pub fn txid(&self) -> Option<String> {
        match &*self.tx.lock() {
            TxState::Open(txid) => Some(txid.clone()),
            _ => None,
        }
    }

    fn crud_url(&self, path: &str, version: VersionCursor, ephemeral: bool) -> Url {
        self.crud_url_with(path, &GetOptions::new().with_version(version), ephemeral)
    }

    fn crud_url_with(&self, path: &str, options: &GetOptions, ephemeral: bool) -> Url {
        let txid = self.txid();
        let params = QueryParams::new(&self.tega_id)
            .with_version(options.version)
            .with_ephemeral(ephemeral)
            .with_internal(options.internal)
            .with_regex(options.regex)
            .with_txid(txid.as_deref());
        self.codec.encode(path, &params)
    }

    fn command_url(&self, name: &str, txid: Option<&str>, extra: &[(&str, &str)]) -> Url {
        let params = QueryParams::new(&self.tega_id).with_txid(txid);
        self.codec.command(name, &params, extra)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        path: &str,
    ) -> Result<Response, ClientError> {
        tracing::debug!("{} {}", method, url);
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }
        let response = request.send().await?;
        check_status(response, path)
    }

    // =========================================================================
    // CRUD operations
    // =========================================================================

    /// Reads the node at `path` and decodes it into `T`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        version: impl Into<VersionCursor>,
    ) -> Result<T, ClientError> {
        self.get_with(path, &GetOptions::new().with_version(version))
            .await
    }

    /// Reads `path` with explicit read options. With `regex` set the server
    /// answers with a list of matching nodes.
    pub async fn get_with<T: DeserializeOwned>(
        &self,
        path: &str,
        options: &GetOptions,
    ) -> Result<T, ClientError> {
        let url = self.crud_url_with(path, options, false);
        let response = self.send(Method::GET, url, None, path).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(ClientError::Decode)
    }

    /// Reads the latest value at `path` as untyped JSON.
    pub async fn get_value(&self, path: &str) -> Result<Value, ClientError> {
        self.get(path, VersionCursor::LATEST).await
    }

    /// Creates or updates the node at `path`.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
        ephemeral: bool,
    ) -> Result<(), ClientError> {
        self.put_versioned(path, value, VersionCursor::LATEST, ephemeral)
            .await
    }

    /// Creates or updates the node at `path` under an explicit version constraint.
    pub async fn put_versioned<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
        version: impl Into<VersionCursor>,
        ephemeral: bool,
    ) -> Result<(), ClientError> {
        let body = serde_json::to_vec(value).map_err(ClientError::Encode)?;
        let url = self.crud_url(path, version.into(), ephemeral);
        self.send(Method::PUT, url, Some(body), path).await?;
        Ok(())
    }

    /// Flags an existing node as ephemeral.
    pub async fn set_ephemeral(&self, path: &str) -> Result<(), ClientError> {
        let url = self.crud_url(path, VersionCursor::LATEST, false);
        self.send(Method::PATCH, url, None, path).await?;
        Ok(())
    }

    /// Removes the node at `path` and its descendants.
    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.delete_versioned(path, VersionCursor::LATEST).await
    }

    /// Removes the node at `path` under an explicit version constraint.
    pub async fn delete_versioned(
        &self,
        path: &str,
        version: impl Into<VersionCursor>,
    ) -> Result<(), ClientError> {
        let url = self.crud_url(path, version.into(), false);
        self.send(Method::DELETE, url, None, path).await?;
        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Opens a transaction; subsequent CRUD calls carry its id.
    pub async fn begin(&self) -> Result<String, ClientError> {
        let pending = {
            let mut state = self.tx.lock();
            match &*state {
                TxState::Idle => *state = TxState::Pending,
                TxState::Pending => {
                    return Err(ClientError::Transaction(
                        "another transaction is being started".to_string(),
                    ))
                }
                TxState::Open(txid) => {
                    return Err(ClientError::Transaction(format!(
                        "id: {} not committed yet",
                        txid
                    )))
                }
            }
            PendingBegin {
                state: &self.tx,
                armed: true,
            }
        };

        let url = self.command_url("begin", None, &[]);
        let response = self.send(Method::POST, url, None, "_begin").await?;
        let bytes = response.bytes().await?;
        let result: BeginResult = serde_json::from_slice(&bytes).map_err(ClientError::Decode)?;

        pending.open(result.txid.clone());
        tracing::debug!("transaction {} started", result.txid);
        Ok(result.txid)
    }

    /// Returns the candidate tree of the open transaction.
    pub async fn cand(&self, internal: bool) -> Result<Value, ClientError> {
        let txid = self
            .txid()
            .ok_or_else(|| ClientError::Transaction("no ongoing transaction".to_string()))?;
        let extra: &[(&str, &str)] = if internal { &[("internal", "true")] } else { &[] };
        let url = self.command_url("cand", Some(&txid), extra);
        let response = self.send(Method::POST, url, None, &txid).await?;
        decode_optional(response).await
    }

    /// Commits the open transaction and returns its id.
    pub async fn commit(&self) -> Result<String, ClientError> {
        self.finish_transaction("commit").await
    }

    /// Cancels the open transaction and returns its id.
    pub async fn cancel(&self) -> Result<String, ClientError> {
        self.finish_transaction("cancel").await
    }

    async fn finish_transaction(&self, command: &str) -> Result<String, ClientError> {
        // The transaction is over on the client side whatever the server says.
        let txid = {
            let mut state = self.tx.lock();
            match std::mem::replace(&mut *state, TxState::Idle) {
                TxState::Open(txid) => txid,
                other => {
                    *state = other;
                    return Err(ClientError::Transaction(
                        "no ongoing transaction".to_string(),
                    ));
                }
            }
        };

        let url = self.command_url(command, Some(&txid), &[]);
        match self.send(Method::POST, url, None, &txid).await {
            Ok(_) => {
                tracing::debug!("transaction {} {}", txid, command);
                Ok(txid)
            }
            Err(ClientError::NotFound { .. }) => Err(ClientError::Transaction(format!(
                "id: {} expired",
                txid
            ))),
            Err(ClientError::Status { status: 406, .. }) => Err(ClientError::Transaction(
                format!("id: {} rejected", txid),
            )),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // RPC and management
    // =========================================================================

    /// Calls a function registered at `path` by some session, via the server.
    pub async fn rpc(&self, path: &str, args: &ArgsKwargs) -> Result<Value, ClientError> {
        let body = serde_json::to_vec(args).map_err(ClientError::Encode)?;
        let url = self.command_url("rpc", None, &[("path", path)]);
        let response = self.send(Method::POST, url, Some(body), path).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        let result: RpcResult = serde_json::from_slice(&bytes).map_err(ClientError::Decode)?;
        result.into_result().map_err(ClientError::Rpc)
    }

    /// Runs a read-only management query.
    pub async fn management(&self, query: Management) -> Result<Value, ClientError> {
        let url = self.command_url(query.as_str(), None, &[]);
        let response = self.send(Method::GET, url, None, query.as_str()).await?;
        decode_optional(response).await
    }

    pub async fn roots(&self) -> Result<Value, ClientError> {
        self.management(Management::Roots).await
    }

    pub async fn old(&self) -> Result<Value, ClientError> {
        self.management(Management::Old).await
    }

    pub async fn channels(&self) -> Result<Value, ClientError> {
        self.management(Management::Channels).await
    }

    pub async fn subscribers(&self) -> Result<Value, ClientError> {
        self.management(Management::Subscribers).await
    }

    pub async fn ids(&self) -> Result<Value, ClientError> {
        self.management(Management::Ids).await
    }

    pub async fn global(&self) -> Result<Value, ClientError> {
        self.management(Management::Global).await
    }

    pub async fn forwarders(&self) -> Result<Value, ClientError> {
        self.management(Management::Forwarders).await
    }

    pub async fn plugins(&self) -> Result<Value, ClientError> {
        self.management(Management::Plugins).await
    }

    /// Asks the server to reload its log.
    pub async fn reload(&self) -> Result<Value, ClientError> {
        self.management(Management::Reload).await
    }

    /// Returns the edges of the stored graph, optionally for one root and
    /// including old roots.
    pub async fn edges(&self, root_oid: Option<&str>, old_roots: bool) -> Result<Value, ClientError> {
        let mut extra = Vec::new();
        if let Some(root_oid) = root_oid {
            extra.push(("root_oid", root_oid));
        }
        if old_roots {
            extra.push(("old_roots", "true"));
        }
        let url = self.command_url("edges", None, &extra);
        let response = self.send(Method::GET, url, None, "_edges").await?;
        decode_optional(response).await
    }

    /// Rolls the tree under `root_oid` back by `backto` versions.
    pub async fn rollback(&self, root_oid: &str, backto: i64) -> Result<(), ClientError> {
        let backto = backto.to_string();
        let url = self.command_url("rollback", None, &[("root_oid", root_oid), ("backto", &backto)]);
        self.send(Method::POST, url, None, root_oid).await?;
        Ok(())
    }

    /// Clears the whole database.
    pub async fn clear(&self) -> Result<(), ClientError> {
        let url = self.command_url("clear", None, &[]);
        self.send(Method::POST, url, None, "_clear").await?;
        Ok(())
    }

    /// Asks the server to re-synchronize with its global database.
    pub async fn sync(&self) -> Result<Value, ClientError> {
        let url = self.command_url("sync", None, &[]);
        let response = self.send(Method::POST, url, None, "_sync").await?;
        decode_optional(response).await
    }

    /// Asks the server to save a snapshot.
    pub async fn snapshot(&self) -> Result<(), ClientError> {
        let url = self.command_url("ss", None, &[]);
        self.send(Method::POST, url, None, "_ss").await?;
        Ok(())
    }
}

fn check_status(response: Response, path: &str) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound {
            path: path.to_string(),
        });
    }
    Err(ClientError::Status {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
    })
}

async fn decode_optional(response: Response) -> Result<Value, ClientError> {
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(ClientError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_management_names() {
        assert_eq!(Management::Roots.as_str(), "roots");
        assert_eq!(Management::Forwarders.as_str(), "forwarders");
        assert_eq!(Management::Plugins.as_str(), "plugins");
    }

    #[test]
    fn test_crud_url_carries_identity() {
        let client = CrudClient::new(&ClientConfig::new("alice")).unwrap();
        let url = client.crud_url("a.b", VersionCursor::new(2), true);
        assert_eq!(
            url.as_str(),
            "http://localhost:8888/a/b/?tega_id=alice&version=2&ephemeral=true"
        );
    }

    #[test]
    fn test_command_url() {
        let client = CrudClient::new(&ClientConfig::new("alice")).unwrap();
        let url = client.command_url("commit", Some("tx-1"), &[]);
        assert_eq!(
            url.as_str(),
            "http://localhost:8888/_commit?tega_id=alice&txid=tx-1"
        );
    }

    async fn mock_client(server: &MockServer) -> CrudClient {
        let config = ClientConfig::new("alice")
            .with_host("127.0.0.1")
            .with_port(server.address().port());
        CrudClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/a/b/"))
            .and(query_param("tega_id", "alice"))
            .and(query_param_is_missing("version"))
            .and(query_param_is_missing("ephemeral"))
            .and(body_json(json!({"k": "v"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a/b/"))
            .and(query_param("tega_id", "alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"k": "v"})))
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        client.put("a.b", &json!({"k": "v"}), false).await.unwrap();
        let value: Value = client.get("a.b", VersionCursor::LATEST).await.unwrap();
        assert_eq!(value, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn test_get_typed_with_version() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Port {
            speed: u32,
        }

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r1/ports/p1/"))
            .and(query_param("version", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"speed": 100})))
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        let port: Port = client.get("r1.ports.p1", 3i64).await.unwrap();
        assert_eq!(port, Port { speed: 100 });
    }

    #[tokio::test]
    async fn test_ephemeral_put() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/a/"))
            .and(query_param("ephemeral", "true"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        client.put("a", "x", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_then_get_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/a/b/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a/b/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        client.delete("a.b").await.unwrap();
        let err = client.get_value("a.b").await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound { ref path } if path == "a.b"));
    }

    #[tokio::test]
    async fn test_set_ephemeral_uses_patch() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/a/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        client.set_ephemeral("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        let err = client.get_value("a").await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 500, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        let err = client.get_value("a").await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[tokio::test]
    async fn test_transaction_lifecycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_begin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"txid": "tx-1"})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/a/"))
            .and(query_param("txid", "tx-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_commit"))
            .and(query_param("txid", "tx-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        assert_eq!(client.begin().await.unwrap(), "tx-1");
        assert!(matches!(
            client.begin().await,
            Err(ClientError::Transaction(_))
        ));

        client.put("a", &1, false).await.unwrap();
        assert_eq!(client.commit().await.unwrap(), "tx-1");
        assert!(client.txid().is_none());
        assert!(matches!(
            client.commit().await,
            Err(ClientError::Transaction(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_transaction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_begin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"txid": "tx-9"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_cancel"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        client.begin().await.unwrap();
        let err = client.cancel().await.unwrap_err();
        assert!(matches!(err, ClientError::Transaction(ref m) if m.contains("expired")));
        assert!(client.txid().is_none());
    }

    #[tokio::test]
    async fn test_http_rpc() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_rpc"))
            .and(query_param("path", "test.func.max"))
            .and(body_json(json!({"args": [3, 7], "kwargs": {}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": 7})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_rpc"))
            .and(query_param("path", "test.func.fail"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"result": null, "error": "bad args"})),
            )
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        let args = ArgsKwargs::new().with_arg(3).with_arg(7);
        assert_eq!(client.rpc("test.func.max", &args).await.unwrap(), json!(7));

        let err = client.rpc("test.func.fail", &args).await.unwrap_err();
        assert!(matches!(err, ClientError::Rpc(ref m) if m == "bad args"));
    }

    #[tokio::test]
    async fn test_management_queries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_roots"))
            .and(query_param("tega_id", "alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"r1": "alice"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_ss"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_sync"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        assert_eq!(client.roots().await.unwrap(), json!({"r1": "alice"}));
        client.snapshot().await.unwrap();
        assert_eq!(client.sync().await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_concurrent_begin_rejects_second() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_begin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"txid": "tx-1"}))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        let (first, second) = tokio::join!(client.begin(), client.begin());
        let opened: Vec<_> = [&first, &second].into_iter().filter(|r| r.is_ok()).collect();
        assert_eq!(opened.len(), 1, "{first:?} / {second:?}");
        assert!(
            matches!(first, Err(ClientError::Transaction(_)))
                || matches!(second, Err(ClientError::Transaction(_)))
        );
        assert_eq!(client.txid().as_deref(), Some("tx-1"));
    }

    #[tokio::test]
    async fn test_failed_begin_frees_slot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_begin"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_begin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"txid": "tx-2"})))
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        assert!(matches!(
            client.begin().await,
            Err(ClientError::Status { status: 500, .. })
        ));
        assert!(client.txid().is_none());
        assert_eq!(client.begin().await.unwrap(), "tx-2");
    }

    #[tokio::test]
    async fn test_cancelled_begin_frees_slot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_begin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"txid": "tx-3"}))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        let dropped = tokio::time::timeout(Duration::from_millis(20), client.begin()).await;
        assert!(dropped.is_err());
        assert_eq!(client.begin().await.unwrap(), "tx-3");
    }

    #[tokio::test]
    async fn test_sub_second_timeout_applies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fast/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(1)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!(2))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let config = ClientConfig::new("alice")
            .with_host("127.0.0.1")
            .with_port(server.address().port())
            .with_request_timeout(Duration::from_millis(500));
        let client = CrudClient::new(&config).unwrap();

        assert_eq!(client.get_value("fast").await.unwrap(), json!(1));
        let err = client.get_value("slow").await.unwrap_err();
        assert!(err.is_transport(), "{err:?}");
    }

    #[tokio::test]
    async fn test_get_with_internal_and_regex() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a/b/"))
            .and(query_param("internal", "true"))
            .and(query_param("regex_flag", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"x": 1}, {"x": 2}])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a/c/"))
            .and(query_param_is_missing("internal"))
            .and(query_param_is_missing("regex_flag"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"x": 3})))
            .expect(1)
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        let options = GetOptions::new().with_internal(true).with_regex(true);
        let matches: Vec<Value> = client.get_with("a.b", &options).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(client.get_value("a.c").await.unwrap(), json!({"x": 3}));
    }

    #[tokio::test]
    async fn test_delete_versioned() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/a/b/"))
            .and(query_param("version", "4"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        client.delete_versioned("a.b", 4i64).await.unwrap();
    }

    #[tokio::test]
    async fn test_cand_requires_transaction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_begin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"txid": "tx-1"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_cand"))
            .and(query_param("txid", "tx-1"))
            .and(query_param("internal", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"a": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        assert!(matches!(
            client.cand(false).await,
            Err(ClientError::Transaction(_))
        ));
        client.begin().await.unwrap();
        assert_eq!(client.cand(true).await.unwrap(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_edges_rollback_reload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_edges"))
            .and(query_param("root_oid", "r1"))
            .and(query_param("old_roots", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([["r1", "n1"]])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_edges"))
            .and(query_param_is_missing("root_oid"))
            .and(query_param_is_missing("old_roots"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_rollback"))
            .and(query_param("tega_id", "alice"))
            .and(query_param("root_oid", "r1"))
            .and(query_param("backto", "-2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_reload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        assert_eq!(
            client.edges(Some("r1"), true).await.unwrap(),
            json!([["r1", "n1"]])
        );
        assert_eq!(client.edges(None, false).await.unwrap(), json!([]));
        client.rollback("r1", -2).await.unwrap();
        assert_eq!(client.reload().await.unwrap(), Value::Null);
    }
}
