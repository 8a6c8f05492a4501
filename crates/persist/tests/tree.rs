use std::fs;

use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kubedump_core::{Resource, ResourceKind};
use kubedump_filter::parse;
use kubedump_persist::{create_link, filter_tree, for_each_resource, write_description, ResourcePath, PROCESS_LOG};

fn meta(ns: &str, name: &str, n: u8) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(ns.to_string()),
        uid: Some(format!("00000000-0000-0000-0000-{:012}", n)),
        ..Default::default()
    }
}

fn seed(base: &std::path::Path) {
    let pods = [("default", "web", 1), ("default", "api", 2), ("kube-system", "dns", 3)];
    for (ns, name, n) in pods {
        let r = Resource::from_payload(Pod { metadata: meta(ns, name, n), ..Default::default() }).unwrap();
        write_description(base, &r).unwrap();
    }
    let cm = Resource::from_payload(ConfigMap { metadata: meta("default", "cfg", 4), ..Default::default() }).unwrap();
    write_description(base, &cm).unwrap();
    create_link(
        &ResourcePath::new(base, "default", ResourceKind::Pod, "web"),
        &ResourcePath::new(base, "default", ResourceKind::ConfigMap, "cfg"),
    )
    .unwrap();
    fs::write(base.join(PROCESS_LOG), "log\n").unwrap();
}

#[test]
fn traversal_visits_every_resource_once() {
    let tmp = tempfile::tempdir().unwrap();
    seed(tmp.path());

    let mut seen = Vec::new();
    for_each_resource(tmp.path(), |e| {
        seen.push(format!("{}/{}/{}", e.path.namespace(), e.path.kind(), e.path.name()));
        Ok(())
    })
    .unwrap();
    seen.sort();
    assert_eq!(seen, vec!["default/ConfigMap/cfg", "default/Pod/api", "default/Pod/web", "kube-system/Pod/dns"]);
}

#[test]
fn loaded_descriptions_round_trip_identity() {
    let tmp = tempfile::tempdir().unwrap();
    seed(tmp.path());
    for_each_resource(tmp.path(), |e| {
        let r = e.load()?;
        assert_eq!(r.name, e.path.name());
        assert_eq!(r.kind, e.path.kind());
        Ok(())
    })
    .unwrap();
}

#[cfg(unix)]
#[test]
fn filter_copies_matching_subtrees_with_links() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    seed(src.path());

    let n = filter_tree(src.path(), dst.path(), &parse("namespace default").unwrap()).unwrap();
    assert_eq!(n, 3);
    assert!(dst.path().join("default/Pod/web/web.yaml").exists());
    assert!(!dst.path().join("kube-system").exists());

    let link = dst.path().join("default/Pod/web/ConfigMap/cfg");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert!(link.join("cfg.yaml").exists());
}

#[test]
fn filter_with_no_match_copies_nothing() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    seed(src.path());
    assert_eq!(filter_tree(src.path(), dst.path(), &parse("false").unwrap()).unwrap(), 0);
}
