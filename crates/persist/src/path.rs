use std::path::{Component, Path, PathBuf};

use kubedump_core::{Resource, ResourceKind};

/// Location of one resource in the output tree: `<base>/<namespace>/<Kind>/<name>`.
///
/// An empty namespace places the resource directly under the base (root-scoped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    base: PathBuf,
    namespace: String,
    kind: ResourceKind,
    name: String,
}

impl ResourcePath {
    pub fn new(base: impl Into<PathBuf>, namespace: impl Into<String>, kind: ResourceKind, name: impl Into<String>) -> Self {
        Self { base: base.into(), namespace: namespace.into(), kind, name: name.into() }
    }

    pub fn of(base: &Path, r: &Resource) -> Self {
        Self::new(base, r.namespace.clone(), r.kind, r.name.clone())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> PathBuf {
        let mut p = self.base.clone();
        if !self.namespace.is_empty() {
            p.push(&self.namespace);
        }
        p.push(self.kind.as_str());
        p.push(&self.name);
        p
    }

    pub fn description(&self) -> PathBuf {
        self.dir().join(format!("{}.yaml", self.name))
    }

    pub fn events(&self) -> PathBuf {
        self.dir().join(format!("{}.events", self.name))
    }

    pub fn log(&self, container: &str) -> PathBuf {
        self.dir().join("logs").join(format!("{}.log", container))
    }

    /// Where a link to `self` lives inside `parent`'s directory: `<parent>/<Kind>/<name>`.
    pub fn link_in(&self, parent: &ResourcePath) -> PathBuf {
        parent.dir().join(self.kind.as_str()).join(&self.name)
    }

    /// Relative target for the link at [`link_in`](Self::link_in), so the tree stays relocatable.
    pub fn link_target_from(&self, parent: &ResourcePath) -> PathBuf {
        let link = self.link_in(parent);
        let from = link.parent().unwrap_or(&link);
        relative(from, &self.dir())
    }
}

/// Path from directory `from` to `to`. Both are expected to share a root.
fn relative(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component<'_>> = from.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();
    let common = from.iter().zip(to.iter()).take_while(|(a, b)| a == b).count();
    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for c in &to[common..] {
        out.push(c.as_os_str());
    }
    out
}
