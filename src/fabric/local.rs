//! Local fabric
//!
//! Talks to the host's container runtime over its Unix socket with a
//! newline-delimited JSON request/response protocol. One request per
//! connection, mirroring the runtime daemon's accept loop.

use super::Fabric;
use crate::entity::{Container, ContainerSpec, ImageDescriptor};
use crate::error::{ForgeError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

/// Default socket path of the container runtime
pub const DEFAULT_RUNTIME_SOCKET: &str = "/var/run/forge-runtime.sock";

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum RuntimeRequest<'a> {
    Alloc { specs: &'a [ContainerSpec], login_user: &'a str },
    Restart { container: &'a Container },
    Halt { handles: Vec<&'a str> },
    Remove { handles: Vec<&'a str>, volumes: bool },
    Commit { handles: Vec<&'a str>, tag_prefix: String },
    Exec { handles: Vec<&'a str>, command: &'a str },
    Copy { handles: Vec<&'a str>, src: &'a str, dst: &'a str },
    ImageExists { image: &'a str },
}

#[derive(Debug, Deserialize)]
struct RuntimeResponse {
    ok: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Fabric backed by the local container runtime.
pub struct LocalFabric {
    socket_path: PathBuf,
    login_user: String,
}

impl LocalFabric {
    pub fn new(socket_path: impl Into<PathBuf>, login_user: &str) -> Self {
        Self { socket_path: socket_path.into(), login_user: login_user.to_string() }
    }

    async fn request(&self, req: RuntimeRequest<'_>) -> Result<Value> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_string(&req)?;
        line.push('\n');
        write_half.write_all(line.as_bytes()).await?;
        write_half.shutdown().await?;

        let mut reader = BufReader::new(read_half);
        let mut response = String::new();
        reader.read_line(&mut response).await?;
        debug!("runtime response: {}", response.trim());

        let response: RuntimeResponse = serde_json::from_str(response.trim())?;
        if response.ok {
            Ok(response.data)
        } else {
            let message = response.error.unwrap_or_else(|| "runtime error".to_string());
            Err(ForgeError::SubstrateRejected(message))
        }
    }

    fn handles<'a>(containers: &'a [Container]) -> Vec<&'a str> {
        containers.iter().map(|c| c.handle.as_str()).collect()
    }
}

#[async_trait]
impl Fabric for LocalFabric {
    async fn alloc(&self, specs: Vec<ContainerSpec>) -> Result<Vec<Container>> {
        let data = self
            .request(RuntimeRequest::Alloc { specs: &specs, login_user: &self.login_user })
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn restart(&self, container: &Container) -> Result<Container> {
        let data = self.request(RuntimeRequest::Restart { container }).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn halt(&self, containers: &[Container]) -> Result<()> {
        self.request(RuntimeRequest::Halt { handles: Self::handles(containers) }).await?;
        Ok(())
    }

    async fn remove(&self, containers: &[Container]) -> Result<()> {
        self.request(RuntimeRequest::Remove { handles: Self::handles(containers), volumes: true })
            .await?;
        Ok(())
    }

    async fn snapshot(
        &self,
        containers: &[Container],
        stack_id: &str,
        generation: u64,
    ) -> Result<Vec<ImageDescriptor>> {
        let data = self
            .request(RuntimeRequest::Commit {
                handles: Self::handles(containers),
                tag_prefix: format!("{}-gen{}", stack_id, generation),
            })
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn cmd(&self, containers: &[Container], command: &str) -> Result<HashMap<String, String>> {
        let data = self
            .request(RuntimeRequest::Exec { handles: Self::handles(containers), command })
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn copy(&self, containers: &[Container], src: &str, dst: &str) -> Result<()> {
        self.request(RuntimeRequest::Copy { handles: Self::handles(containers), src, dst })
            .await?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let data = self.request(RuntimeRequest::ImageExists { image }).await?;
        Ok(data.as_bool().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let spec = ContainerSpec::new("mongodb", "mongodb-0", "stackforge/mongodb");
        let specs = vec![spec];
        let req = RuntimeRequest::Alloc { specs: &specs, login_user: "root" };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["op"], "alloc");
        assert_eq!(json["specs"][0]["hostname"], "mongodb-0");
    }

    #[test]
    fn test_error_response_is_rejection() {
        let raw = r#"{"ok": false, "error": "no capacity"}"#;
        let resp: RuntimeResponse = serde_json::from_str(raw).unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.error.as_deref(), Some("no capacity"));
    }
}
