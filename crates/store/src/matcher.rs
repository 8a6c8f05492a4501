use std::collections::BTreeMap;

use kubedump_core::{Resource, ResourceKind};
use smallvec::SmallVec;

/// True iff a Pod's labels are a superset of a fixed key/value set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelMatcher {
    labels: BTreeMap<String, String>,
}

impl LabelMatcher {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }

    /// An empty set matches everything.
    pub fn matches_labels(&self, labels: &BTreeMap<String, String>) -> bool {
        self.labels.iter().all(|(k, v)| labels.get(k) == Some(v))
    }

    pub fn matches(&self, candidate: &Resource) -> bool {
        candidate.kind == ResourceKind::Pod && self.matches_labels(&candidate.labels)
    }
}

/// True iff a ConfigMap/Secret is mounted by name in one of a Pod's volumes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VolumeMatcher {
    config_maps: SmallVec<[String; 4]>,
    secrets: SmallVec<[String; 4]>,
}

impl VolumeMatcher {
    pub fn new(config_maps: impl IntoIterator<Item = String>, secrets: impl IntoIterator<Item = String>) -> Self {
        Self { config_maps: config_maps.into_iter().collect(), secrets: secrets.into_iter().collect() }
    }

    pub fn matches(&self, candidate: &Resource) -> bool {
        let names = match candidate.kind {
            ResourceKind::ConfigMap => &self.config_maps,
            ResourceKind::Secret => &self.secrets,
            _ => return false,
        };
        names.iter().any(|n| *n == candidate.name)
    }
}

/// Relatedness test held by a stored resource on behalf of its dependents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    Labels(LabelMatcher),
    Volumes(VolumeMatcher),
}

impl Matcher {
    /// Build the matcher a resource owns, if any.
    ///
    /// Services, Jobs, ReplicaSets and Deployments select Pods by label; an empty selector
    /// selects nothing. Pods own the ConfigMaps and Secrets they mount.
    pub fn for_resource(r: &Resource) -> Option<Matcher> {
        match r.kind {
            ResourceKind::Service | ResourceKind::Job | ResourceKind::ReplicaSet | ResourceKind::Deployment => {
                let sel = r.selector().filter(|s| !s.is_empty())?;
                Some(Matcher::Labels(LabelMatcher::new(sel)))
            }
            ResourceKind::Pod => {
                let refs = r.volume_refs();
                if refs.is_empty() {
                    return None;
                }
                Some(Matcher::Volumes(VolumeMatcher::new(refs.config_maps, refs.secrets)))
            }
            _ => None,
        }
    }

    pub fn matches(&self, candidate: &Resource) -> bool {
        match self {
            Matcher::Labels(m) => m.matches(candidate),
            Matcher::Volumes(m) => m.matches(candidate),
        }
    }

    /// Kinds this matcher can ever accept.
    pub fn target_kinds(&self) -> &'static [ResourceKind] {
        match self {
            Matcher::Labels(_) => &[ResourceKind::Pod],
            Matcher::Volumes(_) => &[ResourceKind::ConfigMap, ResourceKind::Secret],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn label_superset_semantics() {
        let m = LabelMatcher::new(labels(&[("app", "web"), ("tier", "front")]));
        assert!(m.matches_labels(&labels(&[("app", "web"), ("tier", "front"), ("extra", "x")])));
        assert!(!m.matches_labels(&labels(&[("app", "web")])), "absent key");
        assert!(!m.matches_labels(&labels(&[("app", "web"), ("tier", "back")])), "mismatched value");
    }

    #[test]
    fn empty_label_set_matches_everything() {
        let m = LabelMatcher::default();
        assert!(m.matches_labels(&BTreeMap::new()));
        assert!(m.matches_labels(&labels(&[("a", "b")])));
    }
}
