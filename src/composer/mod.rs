//! Configuration composer
//!
//! Drives a personality through `generate` and `apply` once its containers
//! exist, pushes the rendered payloads through the fabric and issues the
//! service-level start. The composer owns the step ordering; personalities
//! stay free of remote execution.

use crate::entity::{Container, ContainerSpec, EntryPoint};
use crate::error::{ForgeError, Result};
use crate::fabric::Fabric;
use crate::personality::{Personality, Transfer, UPSTREAM_ARG};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of composing one service.
pub enum Composition {
    /// Containers allocated, configured and started.
    Ready { containers: Vec<Container>, entry_point: EntryPoint },
    /// Containers were allocated but no compatible upstream entry point
    /// exists; the caller must roll them back.
    Incompatible { containers: Vec<Container> },
}

/// Composes services out of personalities and a fabric.
pub struct ConfigComposer;

impl ConfigComposer {
    /// Build container specs for an ordered role list, attaching the
    /// upstream entry point each container carries into `apply`. An
    /// `image` override replaces the personality's default image, used
    /// when restoring from a snapshot's committed images.
    pub fn container_specs(
        personality: &Arc<dyn Personality>,
        roles: &[String],
        upstream: Option<&EntryPoint>,
        image: Option<&str>,
    ) -> Result<Vec<ContainerSpec>> {
        let count = roles.len() as u32;
        let mut specs = Vec::with_capacity(roles.len());
        for (index, role) in roles.iter().enumerate() {
            let mut spec = ContainerSpec::new(
                role,
                &personality.new_host_name(index),
                image.unwrap_or_else(|| personality.image()),
            );
            spec.exposed_ports = personality.exposed_ports(count);
            spec.necessary_ports = personality.necessary_ports(count);
            if let Some(upstream) = upstream {
                spec.args
                    .insert(UPSTREAM_ARG.to_string(), serde_json::to_value(upstream)?);
            }
            specs.push(spec);
        }
        Ok(specs)
    }

    /// Allocate containers for the role list, render and push their
    /// configuration and start the service.
    pub async fn allocate(
        personality: &Arc<dyn Personality>,
        roles: &[String],
        requested: u32,
        upstream: Option<&EntryPoint>,
        image: Option<&str>,
        staging_dir: Option<&Path>,
        fabric: &dyn Fabric,
    ) -> Result<Composition> {
        let specs = Self::container_specs(personality, roles, upstream, image)?;
        let containers = fabric.alloc(specs).await?;
        info!(
            "allocated {} containers for personality {}",
            containers.len(),
            personality.name()
        );

        let config = Self::generate(personality, requested, staging_dir);
        let (transfers, entry_point) = match personality.apply(&config, &containers)? {
            Some(result) => result,
            None => {
                debug!("{}: no compatible upstream entry point", personality.name());
                return Ok(Composition::Incompatible { containers });
            }
        };

        Self::push_transfers(&transfers, &containers, fabric).await?;
        personality.start_service(&containers, &entry_point, fabric).await?;
        Ok(Composition::Ready { containers, entry_point })
    }

    /// Restart an existing service: restart its containers (addresses may
    /// change), re-render configuration against the refreshed descriptors
    /// and re-bind the preserved entry point.
    pub async fn restart(
        personality: &Arc<dyn Personality>,
        containers: &[Container],
        requested: u32,
        entry_point: &EntryPoint,
        staging_dir: Option<&Path>,
        fabric: &dyn Fabric,
    ) -> Result<Vec<Container>> {
        let mut refreshed = Vec::with_capacity(containers.len());
        for container in containers {
            let restarted = fabric.restart(container).await?;
            let mut updated = container.clone();
            updated.refresh_addresses(&restarted);
            refreshed.push(updated);
        }

        let config = Self::generate(personality, requested, staging_dir);
        match personality.apply(&config, &refreshed)? {
            Some((transfers, _)) => {
                Self::push_transfers(&transfers, &refreshed, fabric).await?;
            }
            None => {
                return Err(ForgeError::Incompatible(format!(
                    "{}: upstream entry point lost across restart",
                    personality.name()
                )))
            }
        }
        personality.restart_service(&refreshed, entry_point, fabric).await?;
        Ok(refreshed)
    }

    /// Stop a service's processes, then halt its containers.
    pub async fn stop(
        personality: &Arc<dyn Personality>,
        containers: &[Container],
        fabric: &dyn Fabric,
    ) -> Result<()> {
        personality.stop_service(containers, fabric).await?;
        fabric.halt(containers).await
    }

    /// Render the personality config, relocating its staging directory
    /// under the engine-configured one when set.
    fn generate(
        personality: &Arc<dyn Personality>,
        requested: u32,
        staging_dir: Option<&Path>,
    ) -> crate::personality::PersonalityConfig {
        let mut config = personality.generate(requested);
        if let Some(dir) = staging_dir {
            config.staging_dir = dir.join(personality.name());
        }
        config
    }

    async fn push_transfers(
        transfers: &[Transfer],
        containers: &[Container],
        fabric: &dyn Fabric,
    ) -> Result<()> {
        for transfer in transfers {
            let target = containers
                .iter()
                .find(|c| c.handle == transfer.handle)
                .ok_or_else(|| {
                    ForgeError::Internal(format!(
                        "transfer references unknown container {}",
                        transfer.handle
                    ))
                })?;
            fabric
                .copy(
                    std::slice::from_ref(target),
                    &transfer.source.display().to_string(),
                    &transfer.dest,
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::MemoryFabric;
    use crate::personality::PersonalityRegistry;

    #[tokio::test]
    async fn test_allocate_storage_ready() {
        let registry = PersonalityRegistry::with_builtins();
        let personality = registry.storage("mongodb").unwrap();
        let fabric = MemoryFabric::new();

        let roles = personality.total_instances(1, &[]);
        let composition =
            ConfigComposer::allocate(&personality, &roles, 1, None, None, None, &fabric)
                .await
                .unwrap();

        match composition {
            Composition::Ready { containers, entry_point } => {
                assert_eq!(containers.len(), 1);
                assert_eq!(entry_point.personality_type(), Some("mongodb"));
                assert_eq!(
                    entry_point.get_str("ip"),
                    Some(containers[0].internal_ip.as_str())
                );
            }
            Composition::Incompatible { .. } => panic!("expected ready composition"),
        }
        // config pushed and service started
        assert!(!fabric.copy_log().is_empty());
        assert!(fabric.command_log().iter().any(|(_, c)| c.contains("mongod")));
    }

    #[tokio::test]
    async fn test_allocate_incompatible_returns_containers() {
        let registry = PersonalityRegistry::with_builtins();
        let personality = registry.compute("hadoop").unwrap();
        let fabric = MemoryFabric::new();

        // hadoop bound against a mongodb entry point is incompatible
        let mut upstream = EntryPoint::new("mongodb");
        upstream.set("ip", "10.0.0.1");

        let roles = personality.total_instances(1, &[]);
        let composition = ConfigComposer::allocate(
            &personality,
            &roles,
            1,
            Some(&upstream),
            None,
            None,
            &fabric,
        )
        .await
        .unwrap();

        match composition {
            Composition::Incompatible { containers } => {
                assert_eq!(containers.len(), 3);
            }
            Composition::Ready { .. } => panic!("expected incompatible composition"),
        }
        // nothing was configured or started
        assert!(fabric.copy_log().is_empty());
    }

    #[tokio::test]
    async fn test_restart_preserves_entry_point_binding() {
        let registry = PersonalityRegistry::with_builtins();
        let personality = registry.storage("mongodb").unwrap();
        let fabric = MemoryFabric::new();

        let roles = personality.total_instances(2, &[]);
        let composition =
            ConfigComposer::allocate(&personality, &roles, 2, None, None, None, &fabric)
                .await
                .unwrap();
        let (containers, entry_point) = match composition {
            Composition::Ready { containers, entry_point } => (containers, entry_point),
            _ => panic!("expected ready"),
        };

        fabric.halt(&containers).await.unwrap();
        let refreshed =
            ConfigComposer::restart(&personality, &containers, 2, &entry_point, None, &fabric)
                .await
                .unwrap();
        assert_eq!(refreshed.len(), 2);
        assert_eq!(fabric.running_handles().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_halts_containers() {
        let registry = PersonalityRegistry::with_builtins();
        let personality = registry.storage("mongodb").unwrap();
        let fabric = MemoryFabric::new();

        let roles = personality.total_instances(1, &[]);
        let composition =
            ConfigComposer::allocate(&personality, &roles, 1, None, None, None, &fabric)
                .await
                .unwrap();
        let containers = match composition {
            Composition::Ready { containers, .. } => containers,
            _ => panic!("expected ready"),
        };

        ConfigComposer::stop(&personality, &containers, &fabric).await.unwrap();
        assert!(fabric.running_handles().is_empty());
        assert_eq!(fabric.halted_handles().len(), 1);
    }

    #[test]
    fn test_container_specs_attach_upstream() {
        let registry = PersonalityRegistry::with_builtins();
        let personality = registry.connector("mongo-client").unwrap();
        let mut upstream = EntryPoint::new("mongodb");
        upstream.set("ip", "10.0.0.9");

        let roles = vec!["mongo-client".to_string()];
        let specs =
            ConfigComposer::container_specs(&personality, &roles, Some(&upstream), None)
                .unwrap();
        assert_eq!(specs.len(), 1);
        assert!(specs[0].args.contains_key(UPSTREAM_ARG));
        assert_eq!(specs[0].hostname, "mongo-client-0");
    }

    #[test]
    fn test_container_specs_image_override() {
        let registry = PersonalityRegistry::with_builtins();
        let personality = registry.connector("mongo-client").unwrap();

        let roles = vec!["mongo-client".to_string()];
        let specs =
            ConfigComposer::container_specs(&personality, &roles, None, Some("st-1-gen2-c0"))
                .unwrap();
        assert_eq!(specs[0].image, "st-1-gen2-c0");
    }

    #[tokio::test]
    async fn test_allocate_renders_into_staging_dir() {
        let registry = PersonalityRegistry::with_builtins();
        let personality = registry.storage("mongodb").unwrap();
        let fabric = MemoryFabric::new();
        let staging = tempfile::tempdir().unwrap();

        let roles = personality.total_instances(1, &[]);
        ConfigComposer::allocate(
            &personality,
            &roles,
            1,
            None,
            None,
            Some(staging.path()),
            &fabric,
        )
        .await
        .unwrap();

        let rendered = staging.path().join("mongodb");
        assert!(rendered.is_dir());
        assert!(std::fs::read_dir(&rendered).unwrap().next().is_some());
    }
}
