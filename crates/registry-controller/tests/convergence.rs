//! Full-tick convergence tests against an in-memory cluster

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec, Secret, Service, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy, NetworkPolicySpec};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;

use registry_common::crd::{ConditionStatus, Registry, RegistrySpec};
use registry_common::Error;
use registry_controller::cf::{https_launch_options, HTTPS_PORT, HTTP_PORT};
use registry_controller::edit;
use registry_controller::launch_options::{self, JAVA_OPTIONS};
use registry_controller::status::{CONFIGURATION_ERROR, READY};
use registry_controller::{
    build_loop, flush, ControlLoop, LabelsCf, LegacyPodDisruptionBudget, LoopContext,
    ResourceWriter, SecretClient,
};

const APP: &str = "registry";
const NAMESPACE: &str = "apps";

// =============================================================================
// In-memory cluster
// =============================================================================

#[derive(Default)]
struct Secrets {
    valid: Mutex<BTreeSet<String>>,
}

impl Secrets {
    fn with(names: &[&str]) -> Arc<Self> {
        let secrets = Self::default();
        secrets
            .valid
            .lock()
            .unwrap()
            .extend(names.iter().map(|n| n.to_string()));
        Arc::new(secrets)
    }
}

#[async_trait]
impl SecretClient for Secrets {
    async fn get_secret(&self, _namespace: &str, name: &str) -> Result<Secret, Error> {
        if !self.valid.lock().unwrap().contains(name) {
            return Err(Error::internal(format!("secret {name} not found")));
        }
        Ok(Secret {
            data: Some(BTreeMap::from([
                ("tls.crt".to_string(), ByteString(b"cert".to_vec())),
                ("tls.key".to_string(), ByteString(b"key".to_vec())),
            ])),
            ..Default::default()
        })
    }
}

/// Accepts every well-formed write as-is and counts the accepted ones
#[derive(Default)]
struct Cluster {
    writes: Mutex<Vec<String>>,
    outage: Mutex<bool>,
}

impl Cluster {
    fn record(&self, kind: &str, name: &str) {
        self.writes.lock().unwrap().push(format!("{kind}/{name}"));
    }

    fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    /// Fail the next write, as a dropped connection would
    fn drop_next_write(&self) {
        *self.outage.lock().unwrap() = true;
    }

    fn check_reachable(&self) -> Result<(), Error> {
        if std::mem::take(&mut *self.outage.lock().unwrap()) {
            return Err(Error::internal("connection reset"));
        }
        Ok(())
    }
}

/// Rejects pod templates the API server would refuse
fn validate_pod_template(name: &str, d: &Deployment) -> Result<(), Error> {
    let Some(pod) = edit::pod_spec(d) else {
        return Ok(());
    };
    let mut volumes = BTreeSet::new();
    for volume in pod.volumes.iter().flatten() {
        if !volumes.insert(volume.name.as_str()) {
            return Err(Error::internal(format!(
                "Deployment {name}: duplicate volume {}",
                volume.name
            )));
        }
    }
    for container in &pod.containers {
        let mut paths = BTreeSet::new();
        for mount in container.volume_mounts.iter().flatten() {
            if !volumes.contains(mount.name.as_str()) {
                return Err(Error::internal(format!(
                    "Deployment {name}: mount of undeclared volume {}",
                    mount.name
                )));
            }
            if !paths.insert(mount.mount_path.as_str()) {
                return Err(Error::internal(format!(
                    "Deployment {name}: duplicate mountPath {}",
                    mount.mount_path
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ResourceWriter for Cluster {
    async fn write_deployment(&self, _: &str, name: &str, d: &Deployment) -> Result<Deployment, Error> {
        self.check_reachable()?;
        validate_pod_template(name, d)?;
        self.record("Deployment", name);
        Ok(d.clone())
    }

    async fn write_service(&self, _: &str, name: &str, s: &Service) -> Result<Service, Error> {
        self.check_reachable()?;
        self.record("Service", name);
        Ok(s.clone())
    }

    async fn write_network_policy(
        &self,
        _: &str,
        name: &str,
        p: &NetworkPolicy,
    ) -> Result<NetworkPolicy, Error> {
        self.check_reachable()?;
        self.record("NetworkPolicy", name);
        Ok(p.clone())
    }

    async fn write_ingress(&self, _: &str, name: &str, i: &Ingress) -> Result<Ingress, Error> {
        self.check_reachable()?;
        self.record("Ingress", name);
        Ok(i.clone())
    }

    async fn write_pdb(
        &self,
        _: &str,
        name: &str,
        p: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget, Error> {
        self.check_reachable()?;
        self.record("PodDisruptionBudget", name);
        Ok(p.clone())
    }

    async fn write_legacy_pdb(
        &self,
        _: &str,
        name: &str,
        p: &LegacyPodDisruptionBudget,
    ) -> Result<LegacyPodDisruptionBudget, Error> {
        self.check_reachable()?;
        self.record("PodDisruptionBudget/v1beta1", name);
        Ok(p.clone())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn named(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        ..Default::default()
    }
}

fn spec(secret: Option<&str>) -> RegistrySpec {
    let mut spec = RegistrySpec::default();
    spec.configuration.security.https.secret_name = secret.map(str::to_string);
    spec
}

/// Objects as the factory creates them: HTTP only, no labels
fn http_only_objects(ctx: &mut LoopContext, env: Vec<EnvVar>) {
    let mut container = Container {
        name: APP.to_string(),
        env: Some(env),
        ..Default::default()
    };
    edit::add_container_port(&mut container, "http", HTTP_PORT);
    ctx.resources.set(
        APP,
        Deployment {
            metadata: named(APP),
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![container],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        },
    );

    let mut service = Service {
        metadata: named(APP),
        spec: Some(ServiceSpec::default()),
        ..Default::default()
    };
    edit::add_service_port(&mut service, "http", HTTP_PORT);
    ctx.resources.set(APP, service);

    let mut policy = NetworkPolicy {
        metadata: named(APP),
        spec: Some(NetworkPolicySpec::default()),
        ..Default::default()
    };
    edit::add_policy_port(&mut policy, HTTP_PORT);
    ctx.resources.set(APP, policy);
}

fn instance(spec: RegistrySpec, secrets: Arc<Secrets>, env: Vec<EnvVar>) -> ControlLoop {
    let mut control = build_loop(APP, NAMESPACE, secrets);
    let ctx = control.context_mut();
    ctx.resources.set(APP, Registry::new(APP, spec));
    http_only_objects(ctx, env);
    control
}

fn declare(control: &mut ControlLoop, spec: RegistrySpec) {
    control
        .context_mut()
        .resources
        .set(APP, Registry::new(APP, spec));
}

/// Tick and flush until a tick finds nothing to do; returns the tick count
async fn converge(control: &mut ControlLoop, cluster: &Cluster) -> usize {
    for tick in 1..=5 {
        let outcome = control.tick().await;
        if outcome.is_converged() {
            return tick;
        }
        flush(&mut control.context_mut().resources, NAMESPACE, cluster)
            .await
            .unwrap();
    }
    panic!("instance did not converge within 5 ticks");
}

fn deployment(control: &ControlLoop) -> &Deployment {
    control
        .context()
        .resources
        .get::<Deployment>()
        .unwrap()
        .value()
}

fn service(control: &ControlLoop) -> &Service {
    control.context().resources.get::<Service>().unwrap().value()
}

fn policy(control: &ControlLoop) -> &NetworkPolicy {
    control
        .context()
        .resources
        .get::<NetworkPolicy>()
        .unwrap()
        .value()
}

fn container(control: &ControlLoop) -> &Container {
    &edit::pod_spec(deployment(control)).unwrap().containers[0]
}

fn live_java_options(control: &ControlLoop) -> launch_options::LaunchOptions {
    let value = container(control)
        .env
        .as_ref()
        .and_then(|env| env.iter().find(|v| v.name == JAVA_OPTIONS))
        .and_then(|v| v.value.clone())
        .unwrap_or_default();
    launch_options::parse(&value)
}

fn assert_https_facets(control: &ControlLoop, secret: &str, enabled: bool) {
    let pod = edit::pod_spec(deployment(control)).unwrap();
    assert_eq!(edit::has_volume(pod, secret), enabled, "volume");
    assert_eq!(edit::has_volume_mount(container(control), secret), enabled, "mount");
    assert_eq!(edit::has_container_port(container(control), HTTPS_PORT), enabled, "container port");
    assert_eq!(edit::has_service_port(service(control), HTTPS_PORT), enabled, "service port");
    assert_eq!(edit::has_policy_port(policy(control), HTTPS_PORT), enabled, "policy port");
    assert_eq!(
        launch_options::contains_all(&live_java_options(control), &https_launch_options()),
        enabled,
        "launch options"
    );
}

fn assert_http_open(control: &ControlLoop, open: bool) {
    assert_eq!(edit::has_container_port(container(control), HTTP_PORT), open);
    assert_eq!(edit::has_service_port(service(control), HTTP_PORT), open);
    assert_eq!(edit::has_policy_port(policy(control), HTTP_PORT), open);
}

// =============================================================================
// Stories
// =============================================================================

/// Story: a fresh HTTP-only instance gets labels and a default profile, then settles
#[tokio::test]
async fn story_fresh_instance_converges_and_stays_quiet() {
    let cluster = Cluster::default();
    let mut control = instance(spec(None), Secrets::with(&[]), vec![var("A", "1")]);

    let ticks = converge(&mut control, &cluster).await;
    assert_eq!(ticks, 2);

    let env: Vec<_> = container(&control)
        .env
        .as_ref()
        .unwrap()
        .iter()
        .map(|v| v.name.clone())
        .collect();
    assert_eq!(env, vec!["A", "QUARKUS_PROFILE"]);
    assert_https_facets(&control, "", false);
    assert_http_open(&control, true);

    let labels = service(&control).metadata.labels.clone().unwrap();
    assert_eq!(labels["app"], APP);
    assert_eq!(labels["app.kubernetes.io/managed-by"], "registry-operator");

    // Converged instances cost no writes
    let writes = cluster.writes().len();
    assert!(control.tick().await.is_converged());
    flush(&mut control.context_mut().resources, NAMESPACE, &cluster)
        .await
        .unwrap();
    assert_eq!(cluster.writes().len(), writes);
}

/// Story: a declared but absent secret strips HTTPS and reports the misconfiguration
#[tokio::test]
async fn story_missing_secret_falls_back_to_http() {
    let cluster = Cluster::default();
    let mut control = instance(spec(Some("tls-secret")), Secrets::with(&["tls-secret"]), vec![]);
    converge(&mut control, &cluster).await;
    assert_https_facets(&control, "tls-secret", true);

    // The secret disappears
    let secrets = Secrets::with(&[]);
    let mut degraded = build_loop(APP, NAMESPACE, secrets);
    let ctx = degraded.context_mut();
    ctx.resources.set(APP, Registry::new(APP, spec(Some("tls-secret"))));
    ctx.resources.set(APP, deployment(&control).clone());
    ctx.resources.set(APP, service(&control).clone());
    ctx.resources.set(APP, policy(&control).clone());

    let outcome = degraded.tick().await;
    assert!(outcome.responded.contains(&"HttpsCF"));
    assert_eq!(outcome.requeue_delay, Some(Duration::from_secs(10)));

    let conditions = degraded.status().conditions();
    assert!(conditions.has_configuration_error());
    assert_eq!(conditions.get(READY).unwrap().status, ConditionStatus::False);
    let rendered = conditions.render(&[]);
    let config = rendered.iter().find(|c| c.type_ == CONFIGURATION_ERROR).unwrap();
    assert!(config.message.contains("tls-secret"));

    flush(&mut degraded.context_mut().resources, NAMESPACE, &cluster)
        .await
        .unwrap();
    assert_https_facets(&degraded, "tls-secret", false);
    assert_http_open(&degraded, true);

    // Still misconfigured, but nothing left to change
    let outcome = degraded.tick().await;
    assert!(outcome.is_converged());
    assert_eq!(outcome.requeue_delay, Some(Duration::from_secs(10)));
}

/// Story: adding a valid secret to an HTTP-only instance turns HTTPS on everywhere
#[tokio::test]
async fn story_valid_secret_enables_https_and_keeps_http() {
    let cluster = Cluster::default();
    let mut control = instance(spec(None), Secrets::with(&["tls-secret"]), vec![var("JAVA_OPTIONS", "-Xmx512m")]);
    converge(&mut control, &cluster).await;
    assert_https_facets(&control, "tls-secret", false);

    declare(&mut control, spec(Some("tls-secret")));
    converge(&mut control, &cluster).await;

    assert_https_facets(&control, "tls-secret", true);
    assert_http_open(&control, true);
    let options = live_java_options(&control);
    assert_eq!(options.get_index(0).map(|(k, _)| k.as_str()), Some("-Xmx512m"));

    let mount = &container(&control).volume_mounts.as_ref().unwrap()[0];
    assert_eq!(mount.mount_path, "/certs");
    assert_eq!(mount.read_only, Some(true));
}

/// Story: with HTTPS on, HTTP can be switched off and back on
#[tokio::test]
async fn story_http_can_be_disabled_only_behind_https() {
    let cluster = Cluster::default();
    let mut declared = spec(Some("tls-secret"));
    declared.configuration.security.https.disable_http = true;
    let mut control = instance(declared.clone(), Secrets::with(&["tls-secret"]), vec![]);

    converge(&mut control, &cluster).await;
    assert_https_facets(&control, "tls-secret", true);
    assert_http_open(&control, false);
    assert!(policy(&control).spec.as_ref().unwrap().ingress.as_ref().unwrap().len() == 1);

    declared.configuration.security.https.secret_name = None;
    declare(&mut control, declared);
    converge(&mut control, &cluster).await;
    assert_https_facets(&control, "tls-secret", false);
    assert_http_open(&control, true);
}

/// Story: renaming the secret swaps the certificate volume in one tick
#[tokio::test]
async fn story_secret_rename_swaps_volume_and_mount() {
    let cluster = Cluster::default();
    let mut control = instance(spec(Some("old")), Secrets::with(&["old", "new"]), vec![]);
    converge(&mut control, &cluster).await;
    assert_https_facets(&control, "old", true);

    declare(&mut control, spec(Some("new")));
    let outcome = control.tick().await;
    assert_eq!(outcome.responded, vec!["HttpsCF"]);
    flush(&mut control.context_mut().resources, NAMESPACE, &cluster)
        .await
        .unwrap();

    assert_https_facets(&control, "new", true);
    let pod = edit::pod_spec(deployment(&control)).unwrap();
    assert!(!edit::has_volume(pod, "old"));
    assert!(!edit::has_volume_mount(container(&control), "old"));
    assert_eq!(pod.volumes.as_ref().unwrap().len(), 1);

    assert!(control.tick().await.is_converged());
}

/// Story: a rename whose first write is lost still ends with only the new volume
#[tokio::test]
async fn story_secret_rename_survives_a_failed_flush() {
    let cluster = Cluster::default();
    let mut control = instance(spec(Some("old")), Secrets::with(&["old", "new"]), vec![]);
    converge(&mut control, &cluster).await;

    declare(&mut control, spec(Some("new")));
    control.tick().await;
    cluster.drop_next_write();
    let lost = flush(&mut control.context_mut().resources, NAMESPACE, &cluster).await;
    assert!(lost.is_err());
    assert_https_facets(&control, "old", true);

    converge(&mut control, &cluster).await;
    assert_https_facets(&control, "new", true);
    let pod = edit::pod_spec(deployment(&control)).unwrap();
    assert!(!edit::has_volume(pod, "old"));
    assert_eq!(edit::mounts_at(container(&control), "/certs"), vec!["new"]);
}

/// Story: an operator restarted mid-rename cleans up the volume it mounted before
#[tokio::test]
async fn story_secret_rename_across_restart_removes_the_old_volume() {
    let cluster = Cluster::default();
    let secrets = Secrets::with(&["old", "new"]);
    let mut before = instance(spec(Some("old")), secrets.clone(), vec![]);
    converge(&mut before, &cluster).await;
    let live = deployment(&before).clone();

    let mut after = instance(spec(Some("new")), secrets, vec![]);
    after.context_mut().resources.set(APP, live);
    converge(&mut after, &cluster).await;

    assert_https_facets(&after, "new", true);
    let pod = edit::pod_spec(deployment(&after)).unwrap();
    let volumes: Vec<_> = pod.volumes.iter().flatten().map(|v| v.name.as_str()).collect();
    assert_eq!(volumes, vec!["new"]);
    assert_eq!(edit::mounts_at(container(&after), "/certs"), vec!["new"]);
}

/// Story: canonical labels are merged into a Service that carries a team label
#[tokio::test]
async fn story_labels_merge_into_existing_service_labels() {
    fn canonical(_: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app".to_string(), "registry".to_string()),
            ("managed-by".to_string(), "operator".to_string()),
        ])
    }

    let cluster = Cluster::default();
    let mut ctx = LoopContext::new(APP, NAMESPACE);
    ctx.resources.set(APP, Registry::new(APP, spec(None)));
    let mut svc = Service {
        metadata: named(APP),
        ..Default::default()
    };
    svc.metadata.labels = Some(BTreeMap::from([
        ("app".to_string(), "registry".to_string()),
        ("team".to_string(), "x".to_string()),
    ]));
    ctx.resources.set(APP, svc);

    let mut control = ControlLoop::new(ctx);
    control.register(LabelsCf::with_label_source(canonical));
    converge(&mut control, &cluster).await;

    assert_eq!(
        service(&control).metadata.labels.clone().unwrap(),
        BTreeMap::from([
            ("app".to_string(), "registry".to_string()),
            ("managed-by".to_string(), "operator".to_string()),
            ("team".to_string(), "x".to_string()),
        ])
    );
    assert_eq!(cluster.writes(), vec!["Service/registry"]);
}

/// Story: a declared log level lands in the environment next to the profile
#[tokio::test]
async fn story_log_level_is_written_with_the_profile() {
    let cluster = Cluster::default();
    let mut declared = spec(None);
    declared.configuration.log_level = Some("DEBUG".to_string());
    let mut control = instance(declared, Secrets::with(&[]), vec![var("LOG_LEVEL", "WARN")]);

    converge(&mut control, &cluster).await;
    let env = container(&control).env.clone().unwrap();
    assert_eq!(env, vec![var("LOG_LEVEL", "DEBUG"), var("QUARKUS_PROFILE", "prod")]);
}

/// Story: repeated ticks without a flush keep asking for the same changes
#[tokio::test]
async fn story_unflushed_ticks_are_idempotent() {
    let mut control = instance(spec(Some("tls-secret")), Secrets::with(&["tls-secret"]), vec![]);

    let first = control.tick().await;
    let pending = control.context().resources.pending();
    let second = control.tick().await;

    assert!(first.responded.contains(&"HttpsCF"));
    assert!(second.responded.contains(&"HttpsCF"));
    assert!(second.responded.contains(&"LabelsCF"));
    assert_eq!(control.context().resources.pending().keys().collect::<Vec<_>>(), pending.keys().collect::<Vec<_>>());
}

/// Story: finalizing drops queued patches and stops further ticks
#[tokio::test]
async fn story_finalized_instance_writes_nothing() {
    let cluster = Cluster::default();
    let mut control = instance(spec(None), Secrets::with(&[]), vec![]);
    control.tick().await;
    assert!(!control.context().resources.pending().is_empty());

    assert!(control.finalize());
    assert!(control.context().resources.pending().is_empty());
    assert!(control.tick().await.is_converged());
    let written = flush(&mut control.context_mut().resources, NAMESPACE, &cluster)
        .await
        .unwrap();
    assert_eq!(written, 0);
}
