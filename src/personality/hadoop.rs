//! Hadoop compute personality
//!
//! Runs MapReduce over a Gluster-backed filesystem, so allocation requires
//! a gluster entry point upstream. A request for N instances reserves two
//! extra master roles (namenode and resource manager) on top of the N
//! workers, plus one role per declared auxiliary layer (`hive`).

use super::{upstream_entry_point, Personality, PersonalityConfig, Transfer};
use crate::entity::{Container, EntryPoint, PortRange, ServiceClass};
use crate::error::{ForgeError, Result};
use crate::fabric::Fabric;
use async_trait::async_trait;
use std::fs;
use tracing::warn;

const NAMENODE_PORT: u16 = 9000;
const RESOURCE_MANAGER_PORT: u16 = 8032;
const HIVE_PORT: u16 = 10000;

/// Auxiliary layers this personality knows how to attach.
const SUPPORTED_LAYERS: &[&str] = &["hive"];

/// Hadoop compute engine with optional Hive layer.
pub struct Hadoop;

impl Hadoop {
    /// Number of fixed master roles reserved on every allocation.
    pub const MASTER_ROLES: u32 = 2;
}

#[async_trait]
impl Personality for Hadoop {
    fn name(&self) -> &'static str {
        "hadoop"
    }

    fn class(&self) -> ServiceClass {
        ServiceClass::Compute
    }

    fn image(&self) -> &'static str {
        "stackforge/hadoop"
    }

    fn total_instances(&self, requested: u32, layers: &[String]) -> Vec<String> {
        let mut roles =
            vec![self.name().to_string(); (requested + Self::MASTER_ROLES) as usize];
        for layer in layers {
            if SUPPORTED_LAYERS.contains(&layer.as_str()) {
                roles.push(layer.clone());
            } else {
                warn!("hadoop: ignoring unsupported layer '{}'", layer);
            }
        }
        roles
    }

    fn exposed_ports(&self, _count: u32) -> Vec<PortRange> {
        vec![PortRange::single(RESOURCE_MANAGER_PORT), PortRange::single(HIVE_PORT)]
    }

    fn necessary_ports(&self, _count: u32) -> Vec<PortRange> {
        vec![PortRange::single(NAMENODE_PORT), PortRange::span(50010, 50075)]
    }

    fn generate(&self, count: u32) -> PersonalityConfig {
        PersonalityConfig::new(self.name(), count)
            .setting("namenode_port", NAMENODE_PORT as u64)
            .setting("rm_port", RESOURCE_MANAGER_PORT as u64)
            .setting("data_dir", "/hadoop/data")
    }

    fn apply(
        &self,
        config: &PersonalityConfig,
        containers: &[Container],
    ) -> Result<Option<(Vec<Transfer>, EntryPoint)>> {
        let namenode = containers.first().ok_or_else(|| {
            ForgeError::Service("hadoop: no containers allocated".to_string())
        })?;

        // storage binding: the upstream entry point must be gluster
        let upstream = match upstream_entry_point(namenode) {
            Some(ep) if ep.personality_type() == Some("gluster") => ep,
            _ => return Ok(None),
        };
        let gluster_url = match upstream.get_str("gluster_url") {
            Some(url) => url.to_string(),
            None => return Ok(None),
        };

        fs::create_dir_all(&config.staging_dir)?;
        let core_site = config.staging_dir.join("core-site.xml");
        fs::write(
            &core_site,
            format!(
                "<configuration>\n  <property>\n    <name>fs.defaultFS</name>\n    <value>glusterfs://{}</value>\n  </property>\n  <property>\n    <name>fs.namenode.address</name>\n    <value>{}:{}</value>\n  </property>\n</configuration>\n",
                gluster_url,
                namenode.internal_ip,
                config.get_u64("namenode_port").unwrap_or(NAMENODE_PORT as u64),
            ),
        )?;

        let transfers: Vec<Transfer> = containers
            .iter()
            .map(|c| Transfer {
                handle: c.handle.clone(),
                source: core_site.clone(),
                dest: "/etc/hadoop/core-site.xml".to_string(),
            })
            .collect();

        let mut entry_point = EntryPoint::new(self.name());
        entry_point.set("master", namenode.hostname.as_str());
        entry_point.set("master_ip", namenode.internal_ip.as_str());
        entry_point.set("gluster_url", gluster_url.as_str());
        entry_point.embed("gluster", &upstream);
        if let Some(hive) = containers.iter().find(|c| c.service_type == "hive") {
            entry_point
                .set("hive", format!("{}:{}", hive.internal_ip, HIVE_PORT));
        }

        Ok(Some((transfers, entry_point)))
    }

    async fn start_service(
        &self,
        containers: &[Container],
        entry_point: &EntryPoint,
        fabric: &dyn Fabric,
    ) -> Result<()> {
        // workers first so the masters do not form a premature quorum
        let (masters, workers): (Vec<(usize, &Container)>, Vec<(usize, &Container)>) = containers
            .iter()
            .filter(|c| c.service_type == "hadoop")
            .enumerate()
            .partition(|(i, _)| *i < Self::MASTER_ROLES as usize);
        let workers: Vec<Container> = workers.into_iter().map(|(_, c)| c.clone()).collect();
        let masters: Vec<Container> = masters.into_iter().map(|(_, c)| c.clone()).collect();

        if !workers.is_empty() {
            fabric.cmd(&workers, "hadoop-daemon.sh start datanode").await?;
        }
        if !masters.is_empty() {
            fabric.cmd(&masters, "hadoop-daemon.sh start namenode").await?;
            fabric.cmd(&masters, "yarn-daemon.sh start resourcemanager").await?;
        }
        if entry_point.get("hive").is_some() {
            let hive: Vec<Container> = containers
                .iter()
                .filter(|c| c.service_type == "hive")
                .cloned()
                .collect();
            if !hive.is_empty() {
                fabric.cmd(&hive, "hive --service hiveserver2 &").await?;
            }
        }
        Ok(())
    }

    async fn stop_service(&self, containers: &[Container], fabric: &dyn Fabric) -> Result<()> {
        fabric
            .cmd(containers, "hadoop-daemon.sh stop datanode; hadoop-daemon.sh stop namenode")
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ContainerSpec;
    use crate::fabric::MemoryFabric;
    use crate::personality::UPSTREAM_ARG;

    fn gluster_entry() -> EntryPoint {
        let mut ep = EntryPoint::new("gluster");
        ep.set("volume", "gv0");
        ep.set("gluster_url", "10.0.0.1:/gv0");
        ep
    }

    async fn allocate(roles: &[String], upstream: Option<&EntryPoint>) -> Vec<Container> {
        let fabric = MemoryFabric::new();
        let specs = roles
            .iter()
            .enumerate()
            .map(|(i, role)| {
                let mut spec = ContainerSpec::new(role, &Hadoop.new_host_name(i), Hadoop.image());
                if let Some(ep) = upstream {
                    spec.args
                        .insert(UPSTREAM_ARG.to_string(), serde_json::to_value(ep).unwrap());
                }
                spec
            })
            .collect();
        fabric.alloc(specs).await.unwrap()
    }

    #[test]
    fn test_role_expansion_with_hive() {
        let roles = Hadoop.total_instances(3, &["hive".to_string()]);
        let hadoop_roles = roles.iter().filter(|r| *r == "hadoop").count();
        let hive_roles = roles.iter().filter(|r| *r == "hive").count();
        // 3 requested + 2 fixed master roles, plus the hive layer
        assert_eq!(hadoop_roles, 5);
        assert_eq!(hive_roles, 1);
        assert_eq!(roles.len(), 6);
    }

    #[test]
    fn test_role_expansion_without_layers() {
        let roles = Hadoop.total_instances(4, &[]);
        assert_eq!(roles.len(), 6);
        assert!(roles.iter().all(|r| r == "hadoop"));
    }

    #[test]
    fn test_unsupported_layer_ignored() {
        let roles = Hadoop.total_instances(1, &["pig".to_string()]);
        assert_eq!(roles.len(), 3);
    }

    #[tokio::test]
    async fn test_apply_requires_gluster() {
        let roles = Hadoop.total_instances(1, &[]);
        // bound against mongodb instead of gluster
        let mut wrong = EntryPoint::new("mongodb");
        wrong.set("ip", "10.0.0.1");
        let containers = allocate(&roles, Some(&wrong)).await;

        let staging = tempfile::tempdir().unwrap();
        let mut config = Hadoop.generate(1);
        config.staging_dir = staging.path().to_path_buf();

        assert!(Hadoop.apply(&config, &containers).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_embeds_upstream() {
        let roles = Hadoop.total_instances(2, &["hive".to_string()]);
        let upstream = gluster_entry();
        let containers = allocate(&roles, Some(&upstream)).await;

        let staging = tempfile::tempdir().unwrap();
        let mut config = Hadoop.generate(2);
        config.staging_dir = staging.path().to_path_buf();

        let (transfers, entry_point) = Hadoop.apply(&config, &containers).unwrap().unwrap();
        assert_eq!(transfers.len(), containers.len());
        assert_eq!(entry_point.get_str("gluster_url"), Some("10.0.0.1:/gv0"));
        assert_eq!(entry_point.get("gluster").unwrap()["volume"], "gv0");
        assert!(entry_point.get("hive").is_some());
        assert_eq!(entry_point.get_str("master"), Some(containers[0].hostname.as_str()));
    }

    #[tokio::test]
    async fn test_workers_start_before_masters() {
        let roles = Hadoop.total_instances(2, &[]);
        let upstream = gluster_entry();
        let fabric = MemoryFabric::new();
        let specs = roles
            .iter()
            .enumerate()
            .map(|(i, role)| {
                let mut spec = ContainerSpec::new(role, &Hadoop.new_host_name(i), Hadoop.image());
                spec.args
                    .insert(UPSTREAM_ARG.to_string(), serde_json::to_value(&upstream).unwrap());
                spec
            })
            .collect();
        let containers = fabric.alloc(specs).await.unwrap();

        let staging = tempfile::tempdir().unwrap();
        let mut config = Hadoop.generate(2);
        config.staging_dir = staging.path().to_path_buf();
        let (_, entry_point) = Hadoop.apply(&config, &containers).unwrap().unwrap();

        Hadoop.start_service(&containers, &entry_point, &fabric).await.unwrap();

        let log = fabric.command_log();
        let first_datanode = log.iter().position(|(_, c)| c.contains("start datanode")).unwrap();
        let first_namenode = log.iter().position(|(_, c)| c.contains("start namenode")).unwrap();
        assert!(first_datanode < first_namenode);
    }
}
