use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Pod, PodSpec, Secret, SecretVolumeSource, Service, ServiceSpec, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kubedump_core::Resource;
use kubedump_store::{CorrelationStore, Matcher};

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn meta(ns: &str, name: &str, n: u8, l: &[(&str, &str)]) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(ns.to_string()),
        uid: Some(format!("00000000-0000-0000-0000-{:012}", n)),
        labels: if l.is_empty() { None } else { Some(labels(l)) },
        ..Default::default()
    }
}

fn pod(ns: &str, name: &str, n: u8, l: &[(&str, &str)]) -> Resource {
    Resource::from_payload(Pod { metadata: meta(ns, name, n, l), ..Default::default() }).unwrap()
}

fn job(ns: &str, name: &str, n: u8, sel: &[(&str, &str)]) -> Resource {
    Resource::from_payload(Job {
        metadata: meta(ns, name, n, &[]),
        spec: Some(JobSpec {
            selector: Some(LabelSelector { match_labels: Some(labels(sel)), ..Default::default() }),
            ..Default::default()
        }),
        ..Default::default()
    })
    .unwrap()
}

fn with_matcher(store: &CorrelationStore, r: &Resource) {
    store.add_resource(r.clone(), Matcher::for_resource(r));
}

#[test]
fn owners_are_found_by_label_selector() {
    let store = CorrelationStore::new();
    let j = job("default", "etl", 1, &[("job-name", "etl")]);
    with_matcher(&store, &j);

    let owners = store.get_resources(&pod("default", "etl-abcde", 2, &[("job-name", "etl"), ("x", "y")]));
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].name, "etl");

    assert!(store.get_resources(&pod("default", "other", 3, &[("job-name", "nope")])).is_empty());
}

#[test]
fn never_returns_self_or_other_namespaces() {
    let store = CorrelationStore::new();
    let j = job("default", "etl", 1, &[("job-name", "etl")]);
    with_matcher(&store, &j);
    with_matcher(&store, &job("other", "etl", 4, &[("job-name", "etl")]));

    let p = pod("default", "etl-1", 2, &[("job-name", "etl")]);
    let owners = store.get_resources(&p);
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].namespace, "default");

    // A pod whose labels would satisfy its own (empty-selector) entry still never sees itself.
    with_matcher(&store, &p);
    assert!(store.get_resources(&p).iter().all(|r| r.uid != p.uid));
    assert!(store.get_resources(&j).is_empty());
}

#[test]
fn label_matchers_only_select_pods() {
    let store = CorrelationStore::new();
    let svc = Resource::from_payload(Service {
        metadata: meta("default", "web", 1, &[]),
        spec: Some(ServiceSpec { selector: Some(labels(&[("app", "web")])), ..Default::default() }),
        ..Default::default()
    })
    .unwrap();
    with_matcher(&store, &svc);
    let deploy = Resource::from_payload(Deployment {
        metadata: meta("default", "web", 2, &[("app", "web")]),
        spec: Some(DeploymentSpec {
            selector: LabelSelector { match_labels: Some(labels(&[("app", "web")])), ..Default::default() },
            ..Default::default()
        }),
        ..Default::default()
    })
    .unwrap();
    assert!(store.get_resources(&deploy).is_empty());
    assert_eq!(store.get_resources(&pod("default", "web-1", 3, &[("app", "web")])).len(), 1);
}

#[test]
fn empty_service_selector_owns_nothing() {
    let svc = Resource::from_payload(Service {
        metadata: meta("default", "headless", 1, &[]),
        spec: Some(ServiceSpec { selector: Some(BTreeMap::new()), ..Default::default() }),
        ..Default::default()
    })
    .unwrap();
    assert!(Matcher::for_resource(&svc).is_none());
}

#[test]
fn pods_own_mounted_config_maps_and_secrets() {
    let store = CorrelationStore::new();
    let p = Resource::from_payload(Pod {
        metadata: meta("default", "app", 1, &[]),
        spec: Some(PodSpec {
            volumes: Some(vec![
                Volume {
                    name: "cfg".into(),
                    config_map: Some(ConfigMapVolumeSource { name: "app-config".into(), ..Default::default() }),
                    ..Default::default()
                },
                Volume {
                    name: "tls".into(),
                    secret: Some(SecretVolumeSource { secret_name: Some("app-tls".into()), ..Default::default() }),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    })
    .unwrap();
    with_matcher(&store, &p);

    let cm = Resource::from_payload(ConfigMap { metadata: meta("default", "app-config", 2, &[]), ..Default::default() }).unwrap();
    let secret = Resource::from_payload(Secret { metadata: meta("default", "app-tls", 3, &[]), ..Default::default() }).unwrap();
    let stray = Resource::from_payload(Secret { metadata: meta("default", "app-config", 4, &[]), ..Default::default() }).unwrap();
    assert_eq!(store.get_resources(&cm).len(), 1);
    assert_eq!(store.get_resources(&secret).len(), 1);
    assert!(store.get_resources(&stray).is_empty(), "a Secret named like a mounted ConfigMap is unrelated");
}

#[test]
fn last_write_wins_and_remove_reports_missing() {
    let store = CorrelationStore::new();
    let j = job("default", "etl", 1, &[("job-name", "etl")]);
    with_matcher(&store, &j);
    with_matcher(&store, &job("default", "etl", 1, &[("job-name", "renamed")]));
    assert_eq!(store.len(), 1);
    assert!(store.get_resources(&pod("default", "p", 2, &[("job-name", "etl")])).is_empty());
    assert_eq!(store.get_resources(&pod("default", "p", 2, &[("job-name", "renamed")])).len(), 1);

    store.remove_resource(&j).unwrap();
    assert!(store.is_empty());
    assert!(store.remove_resource(&j).is_err());
}

#[test]
fn matched_by_finds_known_dependents() {
    let store = CorrelationStore::new();
    let p = pod("default", "etl-1", 2, &[("job-name", "etl")]);
    store.add_resource(p.clone(), None);
    let j = job("default", "etl", 1, &[("job-name", "etl")]);
    let m = Matcher::for_resource(&j).unwrap();
    let deps = store.matched_by(&j, &m);
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].uid, p.uid);
}

#[test]
fn edges_are_tracked_and_dropped_with_their_resources() {
    let store = CorrelationStore::new();
    let j = job("default", "etl", 1, &[("job-name", "etl")]);
    let p = pod("default", "etl-1", 2, &[("job-name", "etl")]);
    with_matcher(&store, &j);
    with_matcher(&store, &p);

    assert!(store.add_edge(&j.uid, &p.uid));
    assert!(!store.add_edge(&j.uid, &p.uid), "second insert is not new");
    assert!(!store.add_edge(&j.uid, &j.uid));
    assert!(store.has_edge(&j.uid, &p.uid));
    assert_eq!(store.dependents(&j.uid), vec![p.uid]);
    assert_eq!(store.owners(&p.uid), vec![j.uid]);

    store.remove_resource(&p).unwrap();
    assert!(store.dependents(&j.uid).is_empty());
    assert!(!store.has_edge(&j.uid, &p.uid));
}

#[test]
fn clear_forgets_entries_and_edges() {
    let store = CorrelationStore::new();
    let j = job("default", "etl", 1, &[("job-name", "etl")]);
    let p = pod("default", "etl-1", 2, &[("job-name", "etl")]);
    with_matcher(&store, &j);
    with_matcher(&store, &p);
    store.add_edge(&j.uid, &p.uid);

    store.clear();
    assert!(store.is_empty());
    assert!(!store.contains(&p.uid));
    assert!(store.get_resources(&p).is_empty());
    assert!(store.add_edge(&j.uid, &p.uid), "edge is new again after a clear");
}
