//! MongoDB client connector personality

use super::{upstream_entry_point, Personality, PersonalityConfig, Transfer};
use crate::entity::{Container, EntryPoint, PortRange, ServiceClass};
use crate::error::{ForgeError, Result};
use crate::fabric::Fabric;
use async_trait::async_trait;
use std::fs;

/// Client connector bound against a MongoDB storage layer. Each connector
/// service runs a single container pointed at the storage seed address.
pub struct MongoClient;

#[async_trait]
impl Personality for MongoClient {
    fn name(&self) -> &'static str {
        "mongo-client"
    }

    fn class(&self) -> ServiceClass {
        ServiceClass::Connector
    }

    fn image(&self) -> &'static str {
        "stackforge/mongo-client"
    }

    fn exposed_ports(&self, _count: u32) -> Vec<PortRange> {
        vec![PortRange::single(8080)]
    }

    fn necessary_ports(&self, _count: u32) -> Vec<PortRange> {
        Vec::new()
    }

    fn generate(&self, count: u32) -> PersonalityConfig {
        PersonalityConfig::new(self.name(), count).setting("config_path", "/etc/mongo-client.env")
    }

    fn apply(
        &self,
        config: &PersonalityConfig,
        containers: &[Container],
    ) -> Result<Option<(Vec<Transfer>, EntryPoint)>> {
        let container = containers.first().ok_or_else(|| {
            ForgeError::Service("mongo-client: no containers allocated".to_string())
        })?;

        // the merged backend entry-point set must carry a mongodb address
        let upstream = match upstream_entry_point(container) {
            Some(ep) => ep,
            None => return Ok(None),
        };
        let storage_ip = match find_mongodb_ip(&upstream) {
            Some(ip) => ip,
            None => return Ok(None),
        };

        fs::create_dir_all(&config.staging_dir)?;
        let env_path = config.staging_dir.join("mongo-client.env");
        fs::write(&env_path, format!("MONGO_HOST={}\nMONGO_PORT=27017\n", storage_ip))?;

        let transfers = containers
            .iter()
            .map(|c| Transfer {
                handle: c.handle.clone(),
                source: env_path.clone(),
                dest: config.get_str("config_path").unwrap_or("/etc/mongo-client.env").to_string(),
            })
            .collect();

        let mut entry_point = EntryPoint::new(self.name());
        entry_point.set("ip", storage_ip.as_str());

        Ok(Some((transfers, entry_point)))
    }

    async fn start_service(
        &self,
        containers: &[Container],
        _entry_point: &EntryPoint,
        fabric: &dyn Fabric,
    ) -> Result<()> {
        fabric.cmd(containers, "mongo-client --env /etc/mongo-client.env").await?;
        Ok(())
    }

    async fn stop_service(&self, containers: &[Container], fabric: &dyn Fabric) -> Result<()> {
        fabric.cmd(containers, "pkill mongo-client").await?;
        Ok(())
    }
}

/// Locate a mongodb address in a merged entry-point set: either the map
/// itself is the mongodb entry point, or one is embedded under a nested
/// key by a dependent layer.
fn find_mongodb_ip(merged: &EntryPoint) -> Option<String> {
    if merged.personality_type() == Some("mongodb") {
        return merged.get_str("ip").map(str::to_string);
    }
    for (_, value) in merged.iter() {
        if let Some(obj) = value.as_object() {
            if obj.get("type").and_then(|v| v.as_str()) == Some("mongodb") {
                return obj.get("ip").and_then(|v| v.as_str()).map(str::to_string);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ContainerSpec;
    use crate::fabric::MemoryFabric;
    use crate::personality::UPSTREAM_ARG;

    async fn allocate_with(upstream: &EntryPoint) -> Vec<Container> {
        let fabric = MemoryFabric::new();
        let mut spec =
            ContainerSpec::new("mongo-client", &MongoClient.new_host_name(0), MongoClient.image());
        spec.args
            .insert(UPSTREAM_ARG.to_string(), serde_json::to_value(upstream).unwrap());
        fabric.alloc(vec![spec]).await.unwrap()
    }

    #[tokio::test]
    async fn test_apply_binds_storage_ip() {
        let mut upstream = EntryPoint::new("mongodb");
        upstream.set("ip", "10.0.0.7");
        let containers = allocate_with(&upstream).await;

        let staging = tempfile::tempdir().unwrap();
        let mut config = MongoClient.generate(1);
        config.staging_dir = staging.path().to_path_buf();

        let (transfers, entry_point) = MongoClient.apply(&config, &containers).unwrap().unwrap();
        assert_eq!(entry_point.personality_type(), Some("mongo-client"));
        assert_eq!(entry_point.get_str("ip"), Some("10.0.0.7"));
        assert_eq!(transfers.len(), 1);

        let rendered = std::fs::read_to_string(&transfers[0].source).unwrap();
        assert!(rendered.contains("MONGO_HOST=10.0.0.7"));
    }

    #[tokio::test]
    async fn test_apply_finds_embedded_mongodb() {
        let mut db = EntryPoint::new("mongodb");
        db.set("ip", "10.0.0.3");
        let mut merged = EntryPoint::new("hadoop");
        merged.embed("db", &db);
        let containers = allocate_with(&merged).await;

        let staging = tempfile::tempdir().unwrap();
        let mut config = MongoClient.generate(1);
        config.staging_dir = staging.path().to_path_buf();

        let (_, entry_point) = MongoClient.apply(&config, &containers).unwrap().unwrap();
        assert_eq!(entry_point.get_str("ip"), Some("10.0.0.3"));
    }

    #[tokio::test]
    async fn test_apply_without_mongodb_is_incompatible() {
        let mut upstream = EntryPoint::new("gluster");
        upstream.set("volume", "gv0");
        let containers = allocate_with(&upstream).await;

        let staging = tempfile::tempdir().unwrap();
        let mut config = MongoClient.generate(1);
        config.staging_dir = staging.path().to_path_buf();

        assert!(MongoClient.apply(&config, &containers).unwrap().is_none());
    }
}
