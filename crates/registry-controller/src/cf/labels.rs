//! Label synchronization
//!
//! Makes the canonical label set a subset of the labels of every managed
//! object. Keys the operator doesn't own are never touched.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info};

use registry_common::labels::canonical_labels;

use crate::context::LoopContext;
use crate::control::ControlFunction;
use crate::edit::{labels_contain, upsert_labels};
use crate::resources::{Cached, LegacyPodDisruptionBudget, ResourceCache};
use crate::status::LoopStatus;

type Labels = BTreeMap<String, String>;

/// Source of the canonical labels for an instance
pub type LabelSource = fn(&str) -> Labels;

/// Whether each labelled facet holds its target; `None` when not cached
#[derive(Clone, Debug, Default, PartialEq)]
struct Observed {
    deployment: Option<bool>,
    pod_template: Option<bool>,
    service: Option<bool>,
    ingress: Option<bool>,
    pdb_v1: Option<bool>,
    pdb_v1beta1: Option<bool>,
}

impl Observed {
    fn facets(&self) -> [Option<bool>; 6] {
        [
            self.deployment,
            self.pod_template,
            self.service,
            self.ingress,
            self.pdb_v1,
            self.pdb_v1beta1,
        ]
    }
}

/// Keeps the canonical labels on every managed object
pub struct LabelsCf {
    label_source: LabelSource,
    canonical: Labels,
    pod_target: Labels,
    observed: Observed,
}

impl Default for LabelsCf {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelsCf {
    /// Create the function using the operator's canonical labels
    pub fn new() -> Self {
        Self::with_label_source(canonical_labels)
    }

    /// Create the function with a custom label source
    pub fn with_label_source(label_source: LabelSource) -> Self {
        Self {
            label_source,
            canonical: Labels::new(),
            pod_target: Labels::new(),
            observed: Observed::default(),
        }
    }
}

fn pod_template_labels(deployment: &Deployment) -> Option<&Labels> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .labels
        .as_ref()
}

fn metadata_converged<T: Cached>(
    cache: &ResourceCache,
    meta: impl Fn(&T) -> &ObjectMeta,
    target: &Labels,
) -> Option<bool> {
    cache
        .get::<T>()
        .map(|entry| labels_contain(meta(entry.value()).labels.as_ref(), target))
}

fn queue_metadata_patch<T: Cached>(
    cache: &mut ResourceCache,
    meta: fn(&mut T) -> &mut ObjectMeta,
    target: &Labels,
) {
    let target = target.clone();
    cache.apply_patch::<T>(move |value| {
        let mut next = value.clone();
        upsert_labels(&mut meta(&mut next).labels, &target);
        next
    });
}

#[async_trait]
impl ControlFunction for LabelsCf {
    fn describe(&self) -> &'static str {
        "LabelsCF"
    }

    async fn sense(&mut self, ctx: &LoopContext, _status: &mut LoopStatus) {
        self.canonical = (self.label_source)(ctx.app_name());
        self.pod_target = self.canonical.clone();
        if let Some(spec) = ctx.spec() {
            self.pod_target.extend(spec.extra_pod_labels().clone());
        }

        let cache = &ctx.resources;
        let target = &self.canonical;
        self.observed = Observed {
            deployment: metadata_converged::<Deployment>(cache, |d| &d.metadata, target),
            pod_template: cache
                .get::<Deployment>()
                .map(|entry| labels_contain(pod_template_labels(entry.value()), &self.pod_target)),
            service: metadata_converged::<Service>(cache, |s| &s.metadata, target),
            ingress: metadata_converged::<Ingress>(cache, |i| &i.metadata, target),
            pdb_v1: metadata_converged::<PodDisruptionBudget>(cache, |p| &p.metadata, target),
            pdb_v1beta1: metadata_converged::<LegacyPodDisruptionBudget>(
                cache,
                |p| &p.metadata,
                target,
            ),
        };
        debug!(cf = "LabelsCF", observed = ?self.observed, "sensed");
    }

    fn compare(&self) -> bool {
        self.observed.facets().contains(&Some(false))
    }

    fn respond(&mut self, ctx: &mut LoopContext, _status: &mut LoopStatus) {
        info!(cf = "LabelsCF", observed = ?self.observed, "updating labels");
        let cache = &mut ctx.resources;
        let target = &self.canonical;

        if self.observed.deployment == Some(false) {
            queue_metadata_patch::<Deployment>(cache, |d| &mut d.metadata, target);
        }
        if self.observed.pod_template == Some(false) {
            let pod_target = self.pod_target.clone();
            cache.apply_patch::<Deployment>(move |deployment| {
                let mut next = deployment.clone();
                let template = &mut next.spec.get_or_insert_with(Default::default).template;
                let metadata = template.metadata.get_or_insert_with(Default::default);
                upsert_labels(&mut metadata.labels, &pod_target);
                next
            });
        }
        if self.observed.service == Some(false) {
            queue_metadata_patch::<Service>(cache, |s| &mut s.metadata, target);
        }
        if self.observed.ingress == Some(false) {
            queue_metadata_patch::<Ingress>(cache, |i| &mut i.metadata, target);
        }
        if self.observed.pdb_v1 == Some(false) {
            queue_metadata_patch::<PodDisruptionBudget>(cache, |p| &mut p.metadata, target);
        }
        if self.observed.pdb_v1beta1 == Some(false) {
            queue_metadata_patch::<LegacyPodDisruptionBudget>(cache, |p| &mut p.metadata, target);
        }
    }
}
