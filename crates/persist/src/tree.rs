use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kubedump_core::{Payload, Resource, ResourceKind};
use kubedump_filter::Expression;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::ResourcePath;

/// One resource directory found by [`for_each_resource`].
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub path: ResourcePath,
    pub dir: PathBuf,
}

impl TreeEntry {
    /// Parse `<name>.yaml` back into a resource.
    pub fn load(&self) -> Result<Resource> {
        let file = self.path.description();
        let text = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
        let payload = Payload::from_yaml(&text).with_context(|| format!("parsing {}", file.display()))?;
        Ok(Resource::from_payload(payload)?)
    }
}

/// Walk `base` as namespace → kind → resource and call `f` for every real resource directory.
///
/// Symlinks (correlation links) and plain files such as `kubedump.log` are skipped. A
/// top-level directory named exactly like a kind holds root-scoped resources.
pub fn for_each_resource(base: &Path, mut f: impl FnMut(&TreeEntry) -> Result<()>) -> Result<()> {
    for top in real_dirs(base)? {
        let top_name = file_name(&top);
        match kind_dir(&top_name) {
            Some(kind) => visit_kind(base, "", kind, &top, &mut f)?,
            None => {
                for kind_path in real_dirs(&top)? {
                    let Some(kind) = kind_dir(&file_name(&kind_path)) else {
                        debug!(dir = %kind_path.display(), "skipping unknown kind directory");
                        continue;
                    };
                    visit_kind(base, &top_name, kind, &kind_path, &mut f)?;
                }
            }
        }
    }
    Ok(())
}

fn visit_kind(
    base: &Path,
    namespace: &str,
    kind: ResourceKind,
    dir: &Path,
    f: &mut impl FnMut(&TreeEntry) -> Result<()>,
) -> Result<()> {
    for res in real_dirs(dir)? {
        let path = ResourcePath::new(base, namespace, kind, file_name(&res));
        f(&TreeEntry { path, dir: res })?;
    }
    Ok(())
}

fn kind_dir(name: &str) -> Option<ResourceKind> {
    ResourceKind::ALL.into_iter().find(|k| k.as_str() == name)
}

fn file_name(p: &Path) -> String {
    p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn real_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

/// Copy every resource subtree under `src` whose description matches `expr` into `dst`,
/// keeping the same layout. Returns the number of resources copied.
pub fn filter_tree(src: &Path, dst: &Path, expr: &Expression) -> Result<usize> {
    let mut copied = 0usize;
    for_each_resource(src, |entry| {
        let resource = match entry.load() {
            Ok(r) => r,
            Err(e) => {
                warn!(dir = %entry.dir.display(), error = %e, "unreadable description, skipping");
                return Ok(());
            }
        };
        if !expr.matches(&resource) {
            return Ok(());
        }
        let rel = entry.dir.strip_prefix(src).with_context(|| format!("{} outside {}", entry.dir.display(), src.display()))?;
        copy_subtree(&entry.dir, &dst.join(rel))?;
        copied += 1;
        Ok(())
    })?;
    info!(src = %src.display(), dst = %dst.display(), copied, "tree filtered");
    Ok(copied)
}

/// Files are copied, symlinks recreated with their original (relative) target.
fn copy_subtree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(from)?;
        let out = to.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            fs::create_dir_all(&out).with_context(|| format!("creating {}", out.display()))?;
        } else if ft.is_symlink() {
            let target = fs::read_link(entry.path())?;
            if fs::symlink_metadata(&out).is_err() {
                crate::write::symlink(&target, &out).with_context(|| format!("linking {}", out.display()))?;
            }
        } else {
            fs::copy(entry.path(), &out).with_context(|| format!("copying {}", entry.path().display()))?;
        }
    }
    Ok(())
}
