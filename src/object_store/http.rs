//! `HttpObjectStore`: a concrete [`super::ObjectStore`] backed by a
//! reqwest client, authenticating and addressing objects the way
//! OpenStack Swift does (`auth_url`/`tenant_id`/`region_name` in
//! `Config`, `x-object-meta-fs-*` headers per object) — grounded on
//! `swift_source.py`'s pyrax-backed `SwiftSource` and the teacher's
//! `api_client.rs` reqwest usage.
//!
//! Every trait method is synchronous: a private `tokio::runtime::Runtime`
//! drives the async `reqwest` calls via `block_on`, the same pattern the
//! teacher's client uses to call `api_client` functions from inside
//! `fuser::Filesystem` callbacks, which are themselves synchronous.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;

use crate::error::{EngineError, EngineResult};
use crate::object_store::{Headers, ObjectStore, RemoteObject};

const META_PREFIX: &str = "x-object-meta-";

pub struct HttpObjectStore {
    client: Client,
    runtime: Runtime,
    base_url: String,
    bucket: String,
    auth_token: String,
}

impl HttpObjectStore {
    /// `base_url` is the storage endpoint returned by the auth step (here,
    /// taken directly from config rather than performing a real Keystone
    /// auth handshake, since the auth backend itself is out of scope per
    /// spec §1's "object-store client library... is out of scope").
    pub fn new(base_url: String, bucket: String, auth_token: String) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::RemoteTransient(e.to_string()))?;
        let runtime = Runtime::new().map_err(EngineError::LocalIo)?;
        Ok(HttpObjectStore {
            client,
            runtime,
            base_url,
            bucket,
            auth_token,
        })
    }

    /// Performs a Keystone-v2-style auth handshake against `auth_url`
    /// with `tenant_id`/`username`/`password`, and picks the object-store
    /// endpoint matching `region_name` out of the returned service
    /// catalog — the same fields `config.rs` documents as coming from
    /// the original's `mount.cfg` `[swift]` section. The auth protocol
    /// itself belongs to the backend SDK and is out of scope (spec §1);
    /// this is the minimum needed to obtain a bearer token and endpoint.
    pub fn authenticate(config: &crate::config::Config) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::RemoteTransient(e.to_string()))?;
        let runtime = Runtime::new().map_err(EngineError::LocalIo)?;

        let (base_url, token) = runtime.block_on(async {
            #[derive(serde::Serialize)]
            struct PasswordCredentials<'a> {
                username: &'a str,
                password: &'a str,
            }
            #[derive(serde::Serialize)]
            struct AuthBody<'a> {
                tenant_id: &'a str,
                #[serde(rename = "passwordCredentials")]
                password_credentials: PasswordCredentials<'a>,
            }
            #[derive(serde::Serialize)]
            struct AuthRequest<'a> {
                auth: AuthBody<'a>,
            }

            let resp = client
                .post(format!("{}/tokens", config.auth_url.trim_end_matches('/')))
                .json(&AuthRequest {
                    auth: AuthBody {
                        tenant_id: &config.tenant_id,
                        password_credentials: PasswordCredentials {
                            username: &config.username,
                            password: &config.password,
                        },
                    },
                })
                .send()
                .await
                .map_err(|e| EngineError::RemoteTransient(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(EngineError::RemotePersistent(format!(
                    "auth failed: {}",
                    resp.status()
                )));
            }

            #[derive(serde::Deserialize)]
            struct Endpoint {
                region: String,
                #[serde(rename = "publicURL")]
                public_url: String,
            }
            #[derive(serde::Deserialize)]
            struct Catalog {
                #[serde(rename = "type")]
                kind: String,
                endpoints: Vec<Endpoint>,
            }
            #[derive(serde::Deserialize)]
            struct Token {
                id: String,
            }
            #[derive(serde::Deserialize)]
            struct Access {
                token: Token,
                #[serde(rename = "serviceCatalog")]
                service_catalog: Vec<Catalog>,
            }
            #[derive(serde::Deserialize)]
            struct AuthResponse {
                access: Access,
            }

            let parsed: AuthResponse = resp
                .json()
                .await
                .map_err(|e| EngineError::RemotePersistent(e.to_string()))?;

            let endpoint = parsed
                .access
                .service_catalog
                .iter()
                .find(|c| c.kind == "object-store")
                .and_then(|c| {
                    c.endpoints
                        .iter()
                        .find(|e| e.region == config.region_name)
                        .or_else(|| c.endpoints.first())
                })
                .map(|e| e.public_url.clone())
                .ok_or_else(|| EngineError::RemotePersistent("no object-store endpoint in catalog".to_string()))?;

            Ok((endpoint, parsed.access.token.id))
        })?;

        Ok(HttpObjectStore {
            client,
            runtime,
            base_url,
            bucket: config.source_bucket.clone(),
            auth_token: token,
        })
    }

    fn object_url(&self, name: &str) -> String {
        format!("{}/{}/{}", self.base_url.trim_end_matches('/'), self.bucket, name)
    }

    fn container_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.bucket)
    }

    fn headers_from_response(resp: &reqwest::Response) -> Headers {
        let mut headers = HashMap::new();
        for (key, value) in resp.headers() {
            let key = key.as_str().to_ascii_lowercase();
            if let Some(stripped) = key.strip_prefix(META_PREFIX) {
                if let Ok(value) = value.to_str() {
                    headers.insert(stripped.to_string(), value.to_string());
                }
            }
        }
        headers
    }
}

impl ObjectStore for HttpObjectStore {
    fn list(&self) -> EngineResult<Vec<RemoteObject>> {
        self.runtime.block_on(async {
            let resp = self
                .client
                .get(self.container_url())
                .header("x-auth-token", &self.auth_token)
                .query(&[("format", "json")])
                .send()
                .await
                .map_err(|e| EngineError::RemoteTransient(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(EngineError::RemotePersistent(format!(
                    "list failed: {}",
                    resp.status()
                )));
            }

            #[derive(serde::Deserialize)]
            struct Entry {
                name: String,
            }
            let entries: Vec<Entry> = resp
                .json()
                .await
                .map_err(|e| EngineError::RemotePersistent(e.to_string()))?;

            let mut out = Vec::with_capacity(entries.len());
            for entry in entries {
                if let Some(headers) = self.head_async(&entry.name).await? {
                    out.push(RemoteObject {
                        name: entry.name,
                        headers,
                    });
                }
            }
            Ok(out)
        })
    }

    fn head(&self, name: &str) -> EngineResult<Option<Headers>> {
        self.runtime.block_on(self.head_async(name))
    }

    fn download(&self, name: &str) -> EngineResult<Vec<u8>> {
        self.runtime.block_on(async {
            let resp = self
                .client
                .get(self.object_url(name))
                .header("x-auth-token", &self.auth_token)
                .send()
                .await
                .map_err(|e| EngineError::RemoteTransient(e.to_string()))?;

            if resp.status() == StatusCode::NOT_FOUND {
                return Err(EngineError::NotFound(name.to_string()));
            }
            if !resp.status().is_success() {
                return Err(EngineError::RemoteTransient(format!(
                    "download failed: {}",
                    resp.status()
                )));
            }

            let bytes = resp
                .bytes()
                .await
                .map_err(|e| EngineError::RemoteTransient(e.to_string()))?;
            Ok(bytes.to_vec())
        })
    }

    /// Streams the response body to `dest_path` in `chunk_size` pieces
    /// instead of buffering it all into memory first, so a reader racing
    /// the download sees the destination file grow incrementally.
    fn download_to(&self, name: &str, dest_path: &Path, chunk_size: usize) -> EngineResult<()> {
        self.runtime.block_on(async {
            let resp = self
                .client
                .get(self.object_url(name))
                .header("x-auth-token", &self.auth_token)
                .send()
                .await
                .map_err(|e| EngineError::RemoteTransient(e.to_string()))?;

            if resp.status() == StatusCode::NOT_FOUND {
                return Err(EngineError::NotFound(name.to_string()));
            }
            if !resp.status().is_success() {
                return Err(EngineError::RemoteTransient(format!(
                    "download failed: {}",
                    resp.status()
                )));
            }

            let mut file = tokio::fs::File::create(dest_path).await.map_err(EngineError::LocalIo)?;
            let mut pending = Vec::with_capacity(chunk_size);
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| EngineError::RemoteTransient(e.to_string()))?;
                pending.extend_from_slice(&chunk);
                while pending.len() >= chunk_size {
                    let rest = pending.split_off(chunk_size);
                    file.write_all(&pending).await.map_err(EngineError::LocalIo)?;
                    pending = rest;
                }
            }
            if !pending.is_empty() {
                file.write_all(&pending).await.map_err(EngineError::LocalIo)?;
            }
            file.flush().await.map_err(EngineError::LocalIo)?;
            Ok(())
        })
    }

    fn upload(&self, name: &str, body: &[u8], headers: &Headers) -> EngineResult<()> {
        self.runtime.block_on(async {
            // Content-hash upload-skip optimization (spec §4.1): if the
            // remote object already has the same body hash, only the
            // metadata needs updating.
            let local_hash = hex_sha256(body);
            if let Some(existing) = self.head_async(name).await? {
                if existing.get("fs-content-sha256") == Some(&local_hash) {
                    let mut headers = headers.clone();
                    headers.insert("fs-content-sha256".to_string(), local_hash);
                    return self.set_metadata_async(name, &headers).await;
                }
            }

            let mut req = self
                .client
                .put(self.object_url(name))
                .header("x-auth-token", &self.auth_token)
                .body(body.to_vec());
            for (k, v) in headers {
                req = req.header(format!("{META_PREFIX}{k}"), v);
            }
            req = req.header(format!("{META_PREFIX}content-sha256"), local_hash);

            let resp = req
                .send()
                .await
                .map_err(|e| EngineError::RemoteTransient(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(EngineError::RemoteTransient(format!(
                    "upload failed: {}",
                    resp.status()
                )));
            }
            Ok(())
        })
    }

    fn set_metadata(&self, name: &str, headers: &Headers) -> EngineResult<()> {
        self.runtime.block_on(self.set_metadata_async(name, headers))
    }

    fn move_object(&self, from: &str, to: &str) -> EngineResult<()> {
        self.runtime.block_on(async {
            let resp = self
                .client
                .post(self.object_url(from))
                .header("x-auth-token", &self.auth_token)
                .header("destination", format!("{}/{}", self.bucket, to))
                .send()
                .await
                .map_err(|e| EngineError::RemoteTransient(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(EngineError::RemoteTransient(format!(
                    "move failed: {}",
                    resp.status()
                )));
            }
            Ok(())
        })
    }

    fn delete(&self, name: &str) -> EngineResult<()> {
        self.runtime.block_on(async {
            let resp = self
                .client
                .delete(self.object_url(name))
                .header("x-auth-token", &self.auth_token)
                .send()
                .await
                .map_err(|e| EngineError::RemoteTransient(e.to_string()))?;
            if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
                return Err(EngineError::RemoteTransient(format!(
                    "delete failed: {}",
                    resp.status()
                )));
            }
            Ok(())
        })
    }
}

impl HttpObjectStore {
    async fn head_async(&self, name: &str) -> EngineResult<Option<Headers>> {
        let resp = self
            .client
            .head(self.object_url(name))
            .header("x-auth-token", &self.auth_token)
            .send()
            .await
            .map_err(|e| EngineError::RemoteTransient(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(EngineError::RemoteTransient(format!(
                "head failed: {}",
                resp.status()
            )));
        }
        Ok(Some(Self::headers_from_response(&resp)))
    }

    async fn set_metadata_async(&self, name: &str, headers: &Headers) -> EngineResult<()> {
        let mut req = self
            .client
            .post(self.object_url(name))
            .header("x-auth-token", &self.auth_token);
        for (k, v) in headers {
            req = req.header(format!("{META_PREFIX}{k}"), v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| EngineError::RemoteTransient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(EngineError::RemoteTransient(format!(
                "set_metadata failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path as AxPath;
    use axum::http::{HeaderMap, HeaderValue, StatusCode as AxStatus};
    use axum::response::IntoResponse;
    use axum::routing::{get, put};
    use axum::Router;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct StoreState {
        objects: Mutex<HashMap<String, (Vec<u8>, HashMap<String, String>)>>,
    }

    async fn get_object(
        AxPath(name): AxPath<String>,
        axum::extract::State(state): axum::extract::State<Arc<StoreState>>,
    ) -> impl IntoResponse {
        let objects = state.objects.lock().unwrap();
        match objects.get(&name) {
            Some((body, headers)) => {
                let mut hm = HeaderMap::new();
                for (k, v) in headers {
                    hm.insert(
                        axum::http::HeaderName::from_bytes(format!("x-object-meta-{k}").as_bytes()).unwrap(),
                        HeaderValue::from_str(v).unwrap(),
                    );
                }
                (AxStatus::OK, hm, body.clone()).into_response()
            }
            None => AxStatus::NOT_FOUND.into_response(),
        }
    }

    async fn put_object(
        AxPath(name): AxPath<String>,
        axum::extract::State(state): axum::extract::State<Arc<StoreState>>,
        headers: HeaderMap,
        body: axum::body::Bytes,
    ) -> impl IntoResponse {
        let mut meta = HashMap::new();
        for (k, v) in headers.iter() {
            if let Some(stripped) = k.as_str().strip_prefix("x-object-meta-") {
                meta.insert(stripped.to_string(), v.to_str().unwrap().to_string());
            }
        }
        state
            .objects
            .lock()
            .unwrap()
            .insert(name, (body.to_vec(), meta));
        AxStatus::CREATED
    }

    /// Spawns the stub server on its own background thread with its own
    /// runtime, so the test itself stays a plain sync `#[test]` — the
    /// `HttpObjectStore` under test owns its own runtime for `block_on`,
    /// and nesting one tokio runtime's `block_on` inside another on the
    /// same thread panics.
    fn spawn_server() -> String {
        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let rt = Runtime::new().unwrap();
            rt.block_on(async move {
                let state = Arc::new(StoreState::default());
                let app = Router::new()
                    .route("/bucket/*name", get(get_object).put(put_object).head(get_object))
                    .with_state(state);
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();
                addr_tx.send(addr).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });
        let addr = addr_rx.recv().unwrap();
        format!("http://{addr}")
    }

    #[test]
    fn upload_then_download_round_trips_body_and_metadata() {
        let base_url = spawn_server();
        let store = HttpObjectStore::new(base_url, "bucket".to_string(), "token".to_string()).unwrap();

        let mut headers = HashMap::new();
        headers.insert("mode".to_string(), "33188".to_string());
        store.upload("a/b.txt", b"hello world", &headers).unwrap();

        let downloaded = store.download("a/b.txt").unwrap();
        assert_eq!(downloaded, b"hello world");

        let head = store.head("a/b.txt").unwrap().unwrap();
        assert_eq!(head.get("mode"), Some(&"33188".to_string()));
    }

    #[test]
    fn missing_object_reports_not_found() {
        let base_url = spawn_server();
        let store = HttpObjectStore::new(base_url, "bucket".to_string(), "token".to_string()).unwrap();
        let err = store.download("nope").unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn download_to_streams_body_into_destination_file() {
        let base_url = spawn_server();
        let store = HttpObjectStore::new(base_url, "bucket".to_string(), "token".to_string()).unwrap();
        store.upload("big.bin", &[7u8; 5000], &HashMap::new()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("big.bin");
        store.download_to("big.bin", &dest, 256).unwrap();

        let written = std::fs::read(&dest).unwrap();
        assert_eq!(written.len(), 5000);
        assert!(written.iter().all(|&b| b == 7));
    }

    #[test]
    fn download_to_missing_object_reports_not_found() {
        let base_url = spawn_server();
        let store = HttpObjectStore::new(base_url, "bucket".to_string(), "token".to_string()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nope.bin");
        let err = store.download_to("nope", &dest, 256).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
