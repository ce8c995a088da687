//! HTTPS convergence
//!
//! Keeps one HTTPS on/off decision consistent across every facet that carries
//! it: the certificate volume and its mount, the 8443 container, Service and
//! NetworkPolicy ports, and the two launch options pointing at the mounted
//! certificate. The plain HTTP port follows its own toggle, but stays open
//! whenever HTTPS is off.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{EnvVar, Secret, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use tracing::{debug, info, warn};

use registry_common::crd::HTTPS_SECRET_NAME_FIELD;

use crate::client::SecretClient;
use crate::context::LoopContext;
use crate::control::ControlFunction;
use crate::edit;
use crate::launch_options::{self, LaunchOptions};
use crate::status::LoopStatus;

/// Port serving HTTPS
pub const HTTPS_PORT: i32 = 8443;
/// Port serving plain HTTP
pub const HTTP_PORT: i32 = 8080;
/// Where the certificate Secret is mounted
pub const CERT_MOUNT_PATH: &str = "/certs";
/// Secret key holding the certificate chain
pub const TLS_CERT_KEY: &str = "tls.crt";
/// Secret key holding the private key
pub const TLS_KEY_KEY: &str = "tls.key";

const HTTPS_PORT_NAME: &str = "https";
const HTTP_PORT_NAME: &str = "http";
const CERT_FILE_OPTION: &str = "-Dquarkus.http.ssl.certificate.file";
const KEY_FILE_OPTION: &str = "-Dquarkus.http.ssl.certificate.key-file";
const INVALID_SECRET_REQUEUE_SECS: u64 = 10;

/// Launch options that point the server at the mounted certificate
pub fn https_launch_options() -> LaunchOptions {
    LaunchOptions::from([
        (
            CERT_FILE_OPTION.to_string(),
            format!("{CERT_MOUNT_PATH}/{TLS_CERT_KEY}"),
        ),
        (
            KEY_FILE_OPTION.to_string(),
            format!("{CERT_MOUNT_PATH}/{TLS_KEY_KEY}"),
        ),
    ])
}

// =============================================================================
// Observed state
// =============================================================================

/// Facets of one tick; `None` means the carrying object is not cached yet
#[derive(Clone, Debug, Default, PartialEq)]
struct Observed {
    secret_name: String,
    secret_exists: bool,
    http_requested: bool,
    service: Option<PortFacets>,
    deployment: Option<DeploymentFacets>,
    policy: Option<PortFacets>,
    launch_options: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct PortFacets {
    https: bool,
    http: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct DeploymentFacets {
    volume: bool,
    mount: bool,
    /// Other volumes mounted at the certificate path, left by an earlier secret
    stale: Vec<String>,
    ports: PortFacets,
}

impl Observed {
    fn https_enabled(&self) -> bool {
        !self.secret_name.is_empty() && self.secret_exists
    }

    fn http_enabled(&self) -> bool {
        !self.https_enabled() || self.http_requested
    }

    fn diverges(&self) -> bool {
        let https = self.https_enabled();
        let http = self.http_enabled();
        let ports_diverge = |ports: &PortFacets| ports.https != https || ports.http != http;

        self.launch_options != https
            || self.service.as_ref().is_some_and(ports_diverge)
            || self.policy.as_ref().is_some_and(ports_diverge)
            || self.deployment.as_ref().is_some_and(|d| {
                d.volume != https
                    || d.mount != https
                    || !d.stale.is_empty()
                    || ports_diverge(&d.ports)
            })
    }
}

// =============================================================================
// Control function
// =============================================================================

/// Converges the HTTPS and HTTP facets of the registry workload
pub struct HttpsCf {
    secrets: Arc<dyn SecretClient>,
    spec_known: bool,
    observed: Observed,
    previous_secret_name: String,
}

impl HttpsCf {
    /// Create the function with the Secret reader it validates certificates through
    pub fn new(secrets: Arc<dyn SecretClient>) -> Self {
        Self {
            secrets,
            spec_known: false,
            observed: Observed::default(),
            previous_secret_name: String::new(),
        }
    }

    async fn secret_is_valid(&self, namespace: &str, name: &str, status: &mut LoopStatus) -> bool {
        let secret = match self.secrets.get_secret(namespace, name).await {
            Ok(secret) => secret,
            Err(e) => {
                warn!(cf = "HttpsCF", secret = name, error = %e, "failed to read HTTPS secret, falling back to HTTP");
                report_invalid_secret(name, status);
                return false;
            }
        };

        match [TLS_CERT_KEY, TLS_KEY_KEY]
            .into_iter()
            .find(|key| !secret_has_key(&secret, key))
        {
            None => true,
            Some(key) => {
                warn!(cf = "HttpsCF", secret = name, missing = key, "HTTPS secret is incomplete, falling back to HTTP");
                report_invalid_secret(name, status);
                false
            }
        }
    }
}

fn report_invalid_secret(name: &str, status: &mut LoopStatus) {
    let conditions = status.conditions_mut();
    conditions.transition_invalid(name, HTTPS_SECRET_NAME_FIELD);
    conditions.transition_error();
    status.set_requeue_delay_sec(INVALID_SECRET_REQUEUE_SECS);
}

fn secret_has_key(secret: &Secret, key: &str) -> bool {
    secret.data.as_ref().is_some_and(|data| data.contains_key(key))
        || secret
            .string_data
            .as_ref()
            .is_some_and(|data| data.contains_key(key))
}

fn live_env<'a>(ctx: &'a LoopContext) -> Option<&'a [EnvVar]> {
    let deployment = ctx.resources.get::<Deployment>()?;
    let pod = edit::pod_spec(deployment.value())?;
    edit::app_container(pod, ctx.app_name())?.env.as_deref()
}

#[async_trait]
impl ControlFunction for HttpsCf {
    fn describe(&self) -> &'static str {
        "HttpsCF"
    }

    async fn sense(&mut self, ctx: &LoopContext, status: &mut LoopStatus) {
        let Some(spec) = ctx.spec() else {
            self.spec_known = false;
            return;
        };
        self.spec_known = true;

        let secret_name = spec.https_secret_name().to_string();
        let secret_exists = !secret_name.is_empty()
            && self
                .secret_is_valid(ctx.app_namespace(), &secret_name, status)
                .await;

        let service = ctx.resources.get::<Service>().map(|entry| PortFacets {
            https: edit::has_service_port(entry.value(), HTTPS_PORT),
            http: edit::has_service_port(entry.value(), HTTP_PORT),
        });

        let deployment = ctx.resources.get::<Deployment>().map(|entry| {
            let pod = edit::pod_spec(entry.value());
            let container = pod.and_then(|pod| pod.containers.first());
            DeploymentFacets {
                volume: pod.is_some_and(|pod| edit::has_volume(pod, &secret_name)),
                mount: container.is_some_and(|c| edit::has_volume_mount(c, &secret_name)),
                stale: container
                    .map(|c| edit::mounts_at(c, CERT_MOUNT_PATH))
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|name| *name != secret_name)
                    .collect(),
                ports: PortFacets {
                    https: container.is_some_and(|c| edit::has_container_port(c, HTTPS_PORT)),
                    http: container.is_some_and(|c| edit::has_container_port(c, HTTP_PORT)),
                },
            }
        });

        let policy = ctx.resources.get::<NetworkPolicy>().map(|entry| PortFacets {
            https: edit::has_policy_port(entry.value(), HTTPS_PORT),
            http: edit::has_policy_port(entry.value(), HTTP_PORT),
        });

        let options = launch_options::load(&ctx.env, live_env(ctx));

        self.observed = Observed {
            secret_name,
            secret_exists,
            http_requested: spec.http_enabled(),
            service,
            deployment,
            policy,
            launch_options: launch_options::contains_all(&options, &https_launch_options()),
        };
        debug!(cf = "HttpsCF", observed = ?self.observed, "sensed");
    }

    fn compare(&self) -> bool {
        self.spec_known
            && (self.observed.secret_name != self.previous_secret_name || self.observed.diverges())
    }

    fn respond(&mut self, ctx: &mut LoopContext, _status: &mut LoopStatus) {
        let https = self.observed.https_enabled();
        let http = self.observed.http_enabled();
        let secret_name = self.observed.secret_name.clone();
        let stale = self
            .observed
            .deployment
            .as_ref()
            .map(|d| d.stale.clone())
            .unwrap_or_default();

        info!(cf = "HttpsCF", https, http, secret = %secret_name, "converging transport settings");

        ctx.resources.apply_patch::<Deployment>(move |deployment| {
            if edit::pod_spec(deployment).is_none() {
                return deployment.clone();
            }
            let mut next = deployment.clone();
            let pod = edit::pod_spec_mut(&mut next);
            for name in &stale {
                edit::remove_volume(pod, name);
            }
            if https {
                edit::add_secret_volume(pod, &secret_name);
            } else {
                edit::remove_volume(pod, &secret_name);
            }
            if let Some(container) = pod.containers.first_mut() {
                for name in &stale {
                    edit::remove_volume_mount(container, name);
                }
                if https {
                    edit::add_volume_mount(container, &secret_name, CERT_MOUNT_PATH);
                    edit::add_container_port(container, HTTPS_PORT_NAME, HTTPS_PORT);
                } else {
                    edit::remove_volume_mount(container, &secret_name);
                    edit::remove_container_port(container, HTTPS_PORT);
                }
                if http {
                    edit::add_container_port(container, HTTP_PORT_NAME, HTTP_PORT);
                } else {
                    edit::remove_container_port(container, HTTP_PORT);
                }
            }
            next
        });

        ctx.resources.apply_patch::<Service>(move |service| {
            let mut next = service.clone();
            if https {
                edit::add_service_port(&mut next, HTTPS_PORT_NAME, HTTPS_PORT);
            } else {
                edit::remove_service_port(&mut next, HTTPS_PORT);
            }
            if http {
                edit::add_service_port(&mut next, HTTP_PORT_NAME, HTTP_PORT);
            } else {
                edit::remove_service_port(&mut next, HTTP_PORT);
            }
            next
        });

        ctx.resources.apply_patch::<NetworkPolicy>(move |policy| {
            let mut next = policy.clone();
            if https {
                edit::add_policy_port(&mut next, HTTPS_PORT);
            } else {
                edit::remove_policy_port(&mut next, HTTPS_PORT);
            }
            if http {
                edit::add_policy_port(&mut next, HTTP_PORT);
            } else {
                edit::remove_policy_port(&mut next, HTTP_PORT);
            }
            next
        });

        let current = launch_options::load(&ctx.env, live_env(ctx));
        let mut options = current.clone();
        for (key, value) in https_launch_options() {
            if https {
                options.insert(key, value);
            } else {
                options.shift_remove(&key);
            }
        }
        if options != current {
            launch_options::save(&mut ctx.env, &options);
        }

        self.previous_secret_name = self.observed.secret_name.clone();
    }
}
