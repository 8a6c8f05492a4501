use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use kubedump_core::Resource;
use metrics::counter;
use tracing::debug;

use crate::ResourcePath;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Rewrite the resource's `<name>.yaml` in full. Written to a temp file and renamed, so
/// concurrent writers race to a whole file, never a mix.
pub fn write_description(base: &Path, r: &Resource) -> Result<()> {
    let path = ResourcePath::of(base, r);
    let yaml = r.payload.to_yaml().with_context(|| format!("serializing {}", r.key()))?;
    let dir = path.dir();
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let file = path.description();
    let tmp = dir.join(format!(".{}.yaml.{}.{}", r.name, std::process::id(), TMP_SEQ.fetch_add(1, Ordering::Relaxed)));
    fs::write(&tmp, yaml).with_context(|| format!("writing {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, &file) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("replacing {}", file.display()));
    }
    counter!("descriptions_written_total", 1u64, "kind" => r.kind.as_str());
    Ok(())
}

/// `[<time>] <type> <reason> <controller> <note>` for an Event resource.
pub fn event_line(event: &Resource, fallback: DateTime<Utc>) -> Option<String> {
    let ev = event.as_event()?;
    let time = event.event_time().unwrap_or(fallback);
    Some(format!(
        "[{}] {} {} {} {}\n",
        time.to_rfc3339_opts(SecondsFormat::Secs, true),
        ev.type_.as_deref().unwrap_or_default(),
        ev.reason.as_deref().unwrap_or_default(),
        ev.reporting_controller.as_deref().unwrap_or_default(),
        ev.note.as_deref().unwrap_or_default().trim_end(),
    ))
}

/// Append one line to `target`'s event log, creating the directory and file on first use.
pub fn append_event(target: &ResourcePath, line: &str) -> Result<()> {
    let dir = target.dir();
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let file = target.events();
    let mut f = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&file)
        .with_context(|| format!("opening {}", file.display()))?;
    f.write_all(line.as_bytes()).with_context(|| format!("appending to {}", file.display()))?;
    Ok(())
}

/// Materialize `owner -> dependent` as `<owner>/<DepKind>/<dep>` pointing at the dependent's
/// directory. Returns false when the link already existed.
pub fn create_link(owner: &ResourcePath, dependent: &ResourcePath) -> Result<bool> {
    let link = dependent.link_in(owner);
    if fs::symlink_metadata(&link).is_ok() {
        return Ok(false);
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let target = dependent.link_target_from(owner);
    match symlink(&target, &link) {
        Ok(()) => {
            debug!(link = %link.display(), target = %target.display(), "linked");
            counter!("links_created_total", 1u64);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e).with_context(|| format!("linking {} -> {}", link.display(), target.display())),
    }
}

#[cfg(unix)]
pub(crate) fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
pub(crate) fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}
