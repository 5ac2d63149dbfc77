//! Point-in-time readiness predicates for workload resources.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

const ON_DELETE: &str = "OnDelete";

/// A Deployment is ready when it is not paused and the newest ReplicaSet it owns has a
/// ready replica.
pub fn deployment_ready(deployment: &Deployment, replica_sets: &[ReplicaSet]) -> bool {
    let paused = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.paused)
        .unwrap_or(false);
    if paused {
        return false;
    }

    newest_owned_replica_set(deployment, replica_sets)
        .and_then(|rs| rs.status.as_ref())
        .and_then(|status| status.ready_replicas)
        .is_some_and(|ready| ready >= 1)
}

fn newest_owned_replica_set<'a>(
    deployment: &Deployment,
    replica_sets: &'a [ReplicaSet],
) -> Option<&'a ReplicaSet> {
    let uid = deployment.metadata.uid.as_deref()?;

    replica_sets
        .iter()
        .filter(|rs| {
            rs.metadata.owner_references.as_ref().is_some_and(|owners| {
                owners
                    .iter()
                    .any(|owner| owner.uid == uid && owner.controller == Some(true))
            })
        })
        .max_by(|a, b| {
            let created_a = a.metadata.creation_timestamp.as_ref().map(|t| t.0);
            let created_b = b.metadata.creation_timestamp.as_ref().map(|t| t.0);
            created_a
                .cmp(&created_b)
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        })
}

/// Partitioned rolling updates only replace the replicas at or above the partition.
pub fn statefulset_ready(sts: &StatefulSet) -> bool {
    let Some(spec) = sts.spec.as_ref() else {
        return false;
    };

    let strategy = spec.update_strategy.as_ref();
    if strategy
        .and_then(|s| s.type_.as_deref())
        .is_some_and(|t| t == ON_DELETE)
    {
        return true;
    }

    let replicas = spec.replicas.unwrap_or(1);
    let partition = strategy
        .and_then(|s| s.rolling_update.as_ref())
        .and_then(|ru| ru.partition)
        .unwrap_or(0);

    let Some(status) = sts.status.as_ref() else {
        return false;
    };
    let updated = status.updated_replicas.unwrap_or(0);
    let ready = status.ready_replicas.unwrap_or(0);

    updated == replicas - partition && ready == replicas
}

pub fn daemonset_ready(ds: &DaemonSet) -> bool {
    let strategy = ds.spec.as_ref().and_then(|spec| spec.update_strategy.as_ref());
    if strategy
        .and_then(|s| s.type_.as_deref())
        .is_some_and(|t| t == ON_DELETE)
    {
        return true;
    }

    let Some(status) = ds.status.as_ref() else {
        return false;
    };
    let desired = status.desired_number_scheduled;
    if status.updated_number_scheduled.unwrap_or(0) != desired {
        return false;
    }

    let max_unavailable = strategy
        .and_then(|s| s.rolling_update.as_ref())
        .and_then(|ru| ru.max_unavailable.as_ref())
        .map_or(1, |value| scaled_value(value, desired));

    status.number_ready >= desired - max_unavailable
}

/// Resolve an int-or-percent against `total`, rounding percentages up.
fn scaled_value(value: &IntOrString, total: i32) -> i32 {
    match value {
        IntOrString::Int(v) => *v,
        IntOrString::String(s) => s
            .trim_end_matches('%')
            .parse::<i64>()
            .map(|percent| {
                let scaled = (percent * i64::from(total) + 99) / 100;
                i32::try_from(scaled).unwrap_or(i32::MAX)
            })
            .unwrap_or(1),
    }
}

pub fn pod_ready(pod: &Pod) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .conditions
        .as_ref()
        .is_none_or(|conditions| conditions.iter().all(|c| c.status == "True"))
}

pub fn job_ready(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_none_or(|conditions| conditions.iter().all(|c| c.status == "True"))
}
