//! Additive and subtractive edits on managed objects
//!
//! Every edit touches exactly one facet and reports whether it changed
//! anything, so patches built from them are idempotent and never replace
//! parts of an object the operator does not own.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, SecretVolumeSource, Service, ServicePort, Volume,
    VolumeMount,
};
use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

const TCP: &str = "TCP";

fn is_tcp(protocol: Option<&str>) -> bool {
    protocol.is_none_or(|p| p.eq_ignore_ascii_case(TCP))
}

fn is_port(value: Option<&IntOrString>, port: i32) -> bool {
    match value {
        Some(IntOrString::Int(n)) => *n == port,
        Some(IntOrString::String(s)) => s.parse::<i32>().is_ok_and(|n| n == port),
        None => false,
    }
}

// =============================================================================
// Pod template
// =============================================================================

/// Pod spec of a Deployment, if it has one
pub fn pod_spec(deployment: &Deployment) -> Option<&PodSpec> {
    deployment.spec.as_ref()?.template.spec.as_ref()
}

/// Pod spec of a Deployment, created empty when missing
pub fn pod_spec_mut(deployment: &mut Deployment) -> &mut PodSpec {
    deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default)
}

/// The container named after the instance, falling back to the first one
pub fn app_container<'a>(pod: &'a PodSpec, app_name: &str) -> Option<&'a Container> {
    pod.containers
        .iter()
        .find(|c| c.name == app_name)
        .or_else(|| pod.containers.first())
}

/// Mutable variant of [`app_container`]
pub fn app_container_mut<'a>(pod: &'a mut PodSpec, app_name: &str) -> Option<&'a mut Container> {
    let index = pod
        .containers
        .iter()
        .position(|c| c.name == app_name)
        .unwrap_or(0);
    pod.containers.get_mut(index)
}

// =============================================================================
// Volumes and mounts
// =============================================================================

/// Whether the pod declares a volume with this name
pub fn has_volume(pod: &PodSpec, name: &str) -> bool {
    pod.volumes
        .as_ref()
        .is_some_and(|volumes| volumes.iter().any(|v| v.name == name))
}

/// Add a volume backed by the named Secret
pub fn add_secret_volume(pod: &mut PodSpec, secret_name: &str) -> bool {
    if has_volume(pod, secret_name) {
        return false;
    }
    pod.volumes.get_or_insert_with(Vec::new).push(Volume {
        name: secret_name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    });
    true
}

/// Remove a volume by name
pub fn remove_volume(pod: &mut PodSpec, name: &str) -> bool {
    let Some(volumes) = pod.volumes.as_mut() else {
        return false;
    };
    let before = volumes.len();
    volumes.retain(|v| v.name != name);
    volumes.len() != before
}

/// Whether the container mounts the named volume
pub fn has_volume_mount(container: &Container, name: &str) -> bool {
    container
        .volume_mounts
        .as_ref()
        .is_some_and(|mounts| mounts.iter().any(|m| m.name == name))
}

/// Mount the named volume read-only at `mount_path`
pub fn add_volume_mount(container: &mut Container, name: &str, mount_path: &str) -> bool {
    if has_volume_mount(container, name) {
        return false;
    }
    container
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    true
}

/// Unmount the named volume
pub fn remove_volume_mount(container: &mut Container, name: &str) -> bool {
    let Some(mounts) = container.volume_mounts.as_mut() else {
        return false;
    };
    let before = mounts.len();
    mounts.retain(|m| m.name != name);
    mounts.len() != before
}

/// Names of the volumes the container mounts at `mount_path`
pub fn mounts_at(container: &Container, mount_path: &str) -> Vec<String> {
    container
        .volume_mounts
        .iter()
        .flatten()
        .filter(|m| m.mount_path == mount_path)
        .map(|m| m.name.clone())
        .collect()
}

// =============================================================================
// Container ports
// =============================================================================

/// Whether the container exposes this TCP port
pub fn has_container_port(container: &Container, port: i32) -> bool {
    container.ports.as_ref().is_some_and(|ports| {
        ports
            .iter()
            .any(|p| p.container_port == port && is_tcp(p.protocol.as_deref()))
    })
}

/// Expose a named TCP port on the container
pub fn add_container_port(container: &mut Container, name: &str, port: i32) -> bool {
    if has_container_port(container, port) {
        return false;
    }
    container.ports.get_or_insert_with(Vec::new).push(ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some(TCP.to_string()),
        ..Default::default()
    });
    true
}

/// Stop exposing a TCP port on the container
pub fn remove_container_port(container: &mut Container, port: i32) -> bool {
    let Some(ports) = container.ports.as_mut() else {
        return false;
    };
    let before = ports.len();
    ports.retain(|p| !(p.container_port == port && is_tcp(p.protocol.as_deref())));
    ports.len() != before
}

// =============================================================================
// Service ports
// =============================================================================

/// Whether the Service declares this TCP port
pub fn has_service_port(service: &Service, port: i32) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .is_some_and(|ports| {
            ports
                .iter()
                .any(|p| p.port == port && is_tcp(p.protocol.as_deref()))
        })
}

/// Declare a named TCP port whose target is the same port
pub fn add_service_port(service: &mut Service, name: &str, port: i32) -> bool {
    if has_service_port(service, port) {
        return false;
    }
    service
        .spec
        .get_or_insert_with(Default::default)
        .ports
        .get_or_insert_with(Vec::new)
        .push(ServicePort {
            name: Some(name.to_string()),
            port,
            protocol: Some(TCP.to_string()),
            target_port: Some(IntOrString::Int(port)),
            ..Default::default()
        });
    true
}

/// Remove a TCP port from the Service
pub fn remove_service_port(service: &mut Service, port: i32) -> bool {
    let Some(ports) = service.spec.as_mut().and_then(|spec| spec.ports.as_mut()) else {
        return false;
    };
    let before = ports.len();
    ports.retain(|p| !(p.port == port && is_tcp(p.protocol.as_deref())));
    ports.len() != before
}

// =============================================================================
// Network policy
// =============================================================================

fn policy_port_matches(p: &NetworkPolicyPort, port: i32) -> bool {
    is_port(p.port.as_ref(), port) && is_tcp(p.protocol.as_deref())
}

/// Whether any ingress rule allows this TCP port
pub fn has_policy_port(policy: &NetworkPolicy, port: i32) -> bool {
    policy
        .spec
        .as_ref()
        .and_then(|spec| spec.ingress.as_ref())
        .is_some_and(|rules| {
            rules.iter().any(|rule| {
                rule.ports
                    .as_ref()
                    .is_some_and(|ports| ports.iter().any(|p| policy_port_matches(p, port)))
            })
        })
}

/// Append an ingress rule allowing this TCP port
pub fn add_policy_port(policy: &mut NetworkPolicy, port: i32) -> bool {
    if has_policy_port(policy, port) {
        return false;
    }
    policy
        .spec
        .get_or_insert_with(Default::default)
        .ingress
        .get_or_insert_with(Vec::new)
        .push(NetworkPolicyIngressRule {
            ports: Some(vec![NetworkPolicyPort {
                port: Some(IntOrString::Int(port)),
                protocol: Some(TCP.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        });
    true
}

/// Remove this TCP port from every ingress rule
///
/// A rule whose port list ends up empty is dropped, since an empty port list
/// would allow every port.
pub fn remove_policy_port(policy: &mut NetworkPolicy, port: i32) -> bool {
    let Some(rules) = policy.spec.as_mut().and_then(|spec| spec.ingress.as_mut()) else {
        return false;
    };
    let mut changed = false;
    rules.retain_mut(|rule| {
        let Some(ports) = rule.ports.as_mut() else {
            return true;
        };
        let before = ports.len();
        ports.retain(|p| !policy_port_matches(p, port));
        if ports.len() == before {
            return true;
        }
        changed = true;
        !ports.is_empty()
    });
    changed
}

// =============================================================================
// Labels
// =============================================================================

/// Whether every target label is present with the same value
pub fn labels_contain(actual: Option<&BTreeMap<String, String>>, target: &BTreeMap<String, String>) -> bool {
    target
        .iter()
        .all(|(key, value)| actual.and_then(|labels| labels.get(key)) == Some(value))
}

/// Upsert the target labels, leaving every other key untouched
pub fn upsert_labels(
    labels: &mut Option<BTreeMap<String, String>>,
    target: &BTreeMap<String, String>,
) -> bool {
    let labels = labels.get_or_insert_with(BTreeMap::new);
    let mut changed = false;
    for (key, value) in target {
        if labels.get(key) != Some(value) {
            labels.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}
