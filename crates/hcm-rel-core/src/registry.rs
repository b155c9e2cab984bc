//! ---
//! hcm_section: "02-monitoring-engine"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Health probing, monitoring and reliability reporting."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use hcm_rel_common::config::{AppConfig, ServiceConfig, ServiceKind};
use indexmap::IndexMap;
use thiserror::Error;
use url::Url;

/// Application services reached over HTTP, with their dedicated ports.
/// The gateway is addressed through the configured gateway base instead.
const HCM_APPLICATION_PORTS: [(&str, u16); 4] = [
    ("hcm-hr-resource", 3002),
    ("hcm-matching-engine", 3003),
    ("hcm-verification", 3004),
    ("hcm-edge-agent", 3005),
];

/// Infrastructure stores without an HTTP surface.
const HCM_INFRASTRUCTURE: [&str; 3] = ["hcm-redis", "neo4j", "hcm-postgres"];

const HCM_GATEWAY: &str = "hcm-api-gateway";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("service '{0}' is registered more than once")]
    Duplicate(String),
    #[error("service '{0}' is http-checked but has no endpoint")]
    MissingEndpoint(String),
    #[error("invalid health endpoint for service '{service}': {source}")]
    InvalidEndpoint {
        service: String,
        #[source]
        source: url::ParseError,
    },
}

/// How the health of a service is observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthSurface {
    /// `GET` against the endpoint; 200 means healthy.
    HttpChecked(Url),
    /// Container runtime state of the named container.
    ContainerChecked(String),
}

/// A service under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: String,
    pub surface: HealthSurface,
    /// Container backing the service, used for resource inspection and fault injection.
    pub container: Option<String>,
}

impl ServiceDefinition {
    /// HTTP-checked service whose container shares its name.
    pub fn http(name: impl Into<String>, endpoint: Url) -> Self {
        let name = name.into();
        Self {
            container: Some(name.clone()),
            name,
            surface: HealthSurface::HttpChecked(endpoint),
        }
    }

    /// Container-checked service.
    pub fn container(name: impl Into<String>, container: impl Into<String>) -> Self {
        let container = container.into();
        Self {
            name: name.into(),
            surface: HealthSurface::ContainerChecked(container.clone()),
            container: Some(container),
        }
    }

    pub fn with_container(mut self, container: Option<String>) -> Self {
        self.container = container;
        self
    }

    pub fn container_name(&self) -> Option<&str> {
        self.container.as_deref()
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self.surface, HealthSurface::ContainerChecked(_))
    }
}

/// Ordered set of services probed on every tick.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: IndexMap<String, ServiceDefinition>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: ServiceDefinition) -> Result<(), RegistryError> {
        if self.services.contains_key(&service.name) {
            return Err(RegistryError::Duplicate(service.name));
        }
        self.services.insert(service.name.clone(), service);
        Ok(())
    }

    /// The HCM deployment: gateway and four application services over HTTP,
    /// three infrastructure stores through the container runtime.
    pub fn hcm_default(gateway_base: &Url) -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        let gateway = health_url(
            HCM_GATEWAY,
            gateway_base.as_str().trim_end_matches('/'),
        )?;
        registry.register(ServiceDefinition::http(HCM_GATEWAY, gateway))?;

        let host = gateway_base.host_str().unwrap_or("localhost");
        for (name, port) in HCM_APPLICATION_PORTS {
            let endpoint = health_url(name, &format!("http://{}:{}", host, port))?;
            registry.register(ServiceDefinition::http(name, endpoint))?;
        }
        for name in HCM_INFRASTRUCTURE {
            registry.register(ServiceDefinition::container(name, name))?;
        }
        Ok(registry)
    }

    pub fn from_config(services: &[ServiceConfig]) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for service in services {
            let definition = match service.kind {
                ServiceKind::Http => {
                    let endpoint = service
                        .endpoint
                        .clone()
                        .ok_or_else(|| RegistryError::MissingEndpoint(service.name.clone()))?;
                    ServiceDefinition::http(&service.name, endpoint)
                        .with_container(Some(service.container_name().to_owned()))
                }
                ServiceKind::Container => {
                    ServiceDefinition::container(&service.name, service.container_name())
                }
            };
            registry.register(definition)?;
        }
        Ok(registry)
    }

    /// Configured services, or the built-in HCM table when none are declared.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, RegistryError> {
        if config.services.is_empty() {
            Self::hcm_default(&config.monitor.gateway_base)
        } else {
            Self::from_config(&config.services)
        }
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Container to act on for `service`; unknown services map to a container of the same name.
    pub fn container_for(&self, service: &str) -> String {
        self.services
            .get(service)
            .and_then(|definition| definition.container.clone())
            .unwrap_or_else(|| service.to_owned())
    }
}

fn health_url(service: &str, base: &str) -> Result<Url, RegistryError> {
    Url::parse(&format!("{}/health", base)).map_err(|source| RegistryError::InvalidEndpoint {
        service: service.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_deployment() {
        let base = Url::parse("http://localhost:3001").unwrap();
        let registry = ServiceRegistry::hcm_default(&base).unwrap();
        assert_eq!(registry.len(), 8);

        let gateway = registry.get("hcm-api-gateway").unwrap();
        assert_eq!(
            gateway.surface,
            HealthSurface::HttpChecked(Url::parse("http://localhost:3001/health").unwrap())
        );
        let matching = registry.get("hcm-matching-engine").unwrap();
        assert_eq!(
            matching.surface,
            HealthSurface::HttpChecked(Url::parse("http://localhost:3003/health").unwrap())
        );
        for infra in ["hcm-redis", "neo4j", "hcm-postgres"] {
            let definition = registry.get(infra).unwrap();
            assert!(definition.is_infrastructure());
            assert_eq!(definition.container_name(), Some(infra));
        }
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names.first(), Some(&"hcm-api-gateway"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ServiceRegistry::new();
        registry
            .register(ServiceDefinition::container("cache", "hcm-redis"))
            .unwrap();
        let err = registry
            .register(ServiceDefinition::container("cache", "other"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "cache"));
    }

    #[test]
    fn builds_from_config_entries() {
        let services = vec![
            ServiceConfig {
                name: "gateway".into(),
                kind: ServiceKind::Http,
                endpoint: Some(Url::parse("http://10.0.0.5:8080/health").unwrap()),
                container: Some("gw-container".into()),
            },
            ServiceConfig {
                name: "hcm-redis".into(),
                kind: ServiceKind::Container,
                endpoint: None,
                container: None,
            },
        ];
        let registry = ServiceRegistry::from_config(&services).unwrap();
        assert_eq!(registry.container_for("gateway"), "gw-container");
        assert_eq!(registry.container_for("hcm-redis"), "hcm-redis");
        assert_eq!(registry.container_for("unknown"), "unknown");
    }

    #[test]
    fn empty_config_uses_builtin_table() {
        let registry = ServiceRegistry::from_app_config(&AppConfig::default()).unwrap();
        assert!(registry.get("hcm-edge-agent").is_some());
    }
}
