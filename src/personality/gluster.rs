//! GlusterFS storage personality

use super::{Personality, PersonalityConfig, Transfer};
use crate::entity::{Container, EntryPoint, PortRange, ServiceClass};
use crate::error::{ForgeError, Result};
use crate::fabric::Fabric;
use async_trait::async_trait;
use std::fs;

const GLUSTERD_PORT: u16 = 24007;
const BRICK_PORT_BASE: u16 = 49152;

/// GlusterFS storage engine. The first container runs peer probing and
/// volume creation; every container contributes one brick.
pub struct Gluster;

#[async_trait]
impl Personality for Gluster {
    fn name(&self) -> &'static str {
        "gluster"
    }

    fn class(&self) -> ServiceClass {
        ServiceClass::Storage
    }

    fn image(&self) -> &'static str {
        "stackforge/gluster"
    }

    fn exposed_ports(&self, _count: u32) -> Vec<PortRange> {
        Vec::new()
    }

    fn necessary_ports(&self, count: u32) -> Vec<PortRange> {
        vec![
            PortRange::span(GLUSTERD_PORT, GLUSTERD_PORT + 1),
            // one brick port per instance
            PortRange::span(BRICK_PORT_BASE, BRICK_PORT_BASE + count.max(1) as u16 - 1),
        ]
    }

    fn generate(&self, count: u32) -> PersonalityConfig {
        PersonalityConfig::new(self.name(), count)
            .setting("volume", "gv0")
            .setting("brick_dir", "/export/brick")
    }

    fn apply(
        &self,
        config: &PersonalityConfig,
        containers: &[Container],
    ) -> Result<Option<(Vec<Transfer>, EntryPoint)>> {
        let lead = containers
            .first()
            .ok_or_else(|| ForgeError::Service("gluster: no containers allocated".to_string()))?;
        let volume = config.get_str("volume").unwrap_or("gv0").to_string();
        let brick_dir = config.get_str("brick_dir").unwrap_or("/export/brick");

        fs::create_dir_all(&config.staging_dir)?;
        let script_path = config.staging_dir.join("gluster-setup.sh");
        let mut script = String::from("#!/bin/sh\nset -e\n");
        for peer in containers.iter().skip(1) {
            script.push_str(&format!("gluster peer probe {}\n", peer.internal_ip));
        }
        let bricks: Vec<String> = containers
            .iter()
            .map(|c| format!("{}:{}", c.internal_ip, brick_dir))
            .collect();
        script.push_str(&format!(
            "gluster volume create {} {} force\ngluster volume start {}\n",
            volume,
            bricks.join(" "),
            volume
        ));
        fs::write(&script_path, script)?;

        // setup script only runs on the lead node
        let transfers = vec![Transfer {
            handle: lead.handle.clone(),
            source: script_path,
            dest: "/usr/local/bin/gluster-setup.sh".to_string(),
        }];

        let mut entry_point = EntryPoint::new(self.name());
        entry_point.set("volume", volume.as_str());
        entry_point.set("gluster_url", format!("{}:/{}", lead.internal_ip, volume));
        entry_point.set(
            "peers",
            serde_json::Value::Array(
                containers
                    .iter()
                    .map(|c| serde_json::Value::String(c.internal_ip.clone()))
                    .collect(),
            ),
        );

        Ok(Some((transfers, entry_point)))
    }

    async fn start_service(
        &self,
        containers: &[Container],
        _entry_point: &EntryPoint,
        fabric: &dyn Fabric,
    ) -> Result<()> {
        // every daemon must be up before the lead probes peers
        fabric.cmd(containers, "glusterd").await?;
        if let Some(lead) = containers.first() {
            fabric
                .cmd(std::slice::from_ref(lead), "sh /usr/local/bin/gluster-setup.sh")
                .await?;
        }
        Ok(())
    }

    async fn stop_service(&self, containers: &[Container], fabric: &dyn Fabric) -> Result<()> {
        fabric.cmd(containers, "pkill glusterd").await?;
        Ok(())
    }
}
