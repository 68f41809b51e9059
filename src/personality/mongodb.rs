//! MongoDB storage personality

use super::{Personality, PersonalityConfig, Transfer};
use crate::entity::{Container, EntryPoint, PortRange, ServiceClass};
use crate::error::{ForgeError, Result};
use crate::fabric::Fabric;
use async_trait::async_trait;
use std::fs;

pub const MONGO_PORT: u16 = 27017;

/// MongoDB storage engine. The first container is the replica-set seed
/// and the address dependent layers connect to.
pub struct MongoDb;

#[async_trait]
impl Personality for MongoDb {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    fn class(&self) -> ServiceClass {
        ServiceClass::Storage
    }

    fn image(&self) -> &'static str {
        "stackforge/mongodb"
    }

    fn exposed_ports(&self, _count: u32) -> Vec<PortRange> {
        vec![PortRange::single(MONGO_PORT)]
    }

    fn necessary_ports(&self, _count: u32) -> Vec<PortRange> {
        // replication traffic between members
        vec![PortRange::span(MONGO_PORT, MONGO_PORT + 2)]
    }

    fn generate(&self, count: u32) -> PersonalityConfig {
        PersonalityConfig::new(self.name(), count)
            .setting("port", MONGO_PORT as u64)
            .setting("db_dir", "/data/db")
            .setting("replica_set", "forge0")
    }

    fn apply(
        &self,
        config: &PersonalityConfig,
        containers: &[Container],
    ) -> Result<Option<(Vec<Transfer>, EntryPoint)>> {
        let seed = containers
            .first()
            .ok_or_else(|| ForgeError::Service("mongodb: no containers allocated".to_string()))?;

        fs::create_dir_all(&config.staging_dir)?;
        let conf_path = config.staging_dir.join("mongod.conf");
        let conf = format!(
            "storage:\n  dbPath: {}\nnet:\n  port: {}\n  bindIp: 0.0.0.0\nreplication:\n  replSetName: {}\n",
            config.get_str("db_dir").unwrap_or("/data/db"),
            config.get_u64("port").unwrap_or(MONGO_PORT as u64),
            config.get_str("replica_set").unwrap_or("forge0"),
        );
        fs::write(&conf_path, conf)?;

        let transfers = containers
            .iter()
            .map(|c| Transfer {
                handle: c.handle.clone(),
                source: conf_path.clone(),
                dest: "/etc/mongod.conf".to_string(),
            })
            .collect();

        let mut entry_point = EntryPoint::new(self.name());
        entry_point.set("ip", seed.internal_ip.as_str());
        entry_point.set("port", MONGO_PORT as u64);
        entry_point.set("replica_set", config.get_str("replica_set").unwrap_or("forge0"));

        Ok(Some((transfers, entry_point)))
    }

    async fn start_service(
        &self,
        containers: &[Container],
        entry_point: &EntryPoint,
        fabric: &dyn Fabric,
    ) -> Result<()> {
        fabric
            .cmd(containers, "mongod --config /etc/mongod.conf --fork --logpath /var/log/mongod.log")
            .await?;
        // seed initiates the replica set once every member is up
        if let Some(seed) = containers.first() {
            let init = format!(
                "mongo --eval 'rs.initiate()' --host {}:{}",
                seed.internal_ip,
                entry_point.get("port").and_then(|v| v.as_u64()).unwrap_or(MONGO_PORT as u64)
            );
            fabric.cmd(std::slice::from_ref(seed), &init).await?;
        }
        Ok(())
    }

    async fn stop_service(&self, containers: &[Container], fabric: &dyn Fabric) -> Result<()> {
        fabric.cmd(containers, "mongod --shutdown").await?;
        Ok(())
    }
}
