//! Longest-prefix resolution of filesystem paths to mount points.
//!
//! Mount points are matched per path component, so `/opt/app` is a prefix
//! of `/opt/app/spack` but not of `/opt/apps`.

use std::path::Path;

use crate::types::MountPoint;

/// Mount points sorted from most to least specific.
#[derive(Debug, Clone)]
pub struct MountTable<'a> {
    mounts: Vec<&'a MountPoint>,
}

impl<'a> MountTable<'a> {
    /// Build a table; input order does not affect resolution.
    pub fn new(mounts: impl IntoIterator<Item = &'a MountPoint>) -> Self {
        let mut mounts: Vec<&'a MountPoint> = mounts.into_iter().collect();
        mounts.sort_by(|a, b| {
            depth(&b.mount_path)
                .cmp(&depth(&a.mount_path))
                .then_with(|| a.mount_order.cmp(&b.mount_order))
                .then_with(|| a.mount_path.cmp(&b.mount_path))
        });
        Self { mounts }
    }

    /// The mount point whose path is the longest prefix of `path`.
    pub fn resolve(&self, path: &str) -> Option<&'a MountPoint> {
        let target = Path::new(path);
        self.mounts
            .iter()
            .find(|mp| target.starts_with(Path::new(&mp.mount_path)))
            .copied()
    }
}

/// Resolve `path` against `mounts` (see [`MountTable::resolve`]).
pub fn resolve_mount<'a>(path: &str, mounts: &'a [MountPoint]) -> Option<&'a MountPoint> {
    MountTable::new(mounts).resolve(path)
}

/// `path` relative to the mount point it resolved to, without a leading separator.
pub fn relative_to_mount(path: &str, mount: &MountPoint) -> Option<String> {
    Path::new(path)
        .strip_prefix(Path::new(&mount.mount_path))
        .ok()
        .map(|rel| rel.to_string_lossy().into_owned())
}

fn depth(path: &str) -> usize {
    Path::new(path).components().count()
}
