//! Maps guest paths to host paths through a rootfs plus an ordered list
//! of mount overrides, chasing symlinks without ever letting them escape
//! the sandbox.

use std::path::{Path, PathBuf};

const MAX_SYMLINK_DEPTH: u32 = 40;

/// A (guest_prefix -> host_prefix) mount override, checked longest-prefix
/// first before falling back to `rootfs`.
#[derive(Debug, Clone)]
pub struct MountOverride {
    pub guest_prefix: String,
    pub host_prefix: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PathSandbox {
    rootfs: PathBuf,
    overrides: Vec<MountOverride>,
    /// Absolute guest path of the binary the emulator loaded; what
    /// `/proc/self/exe` resolves to under every resolver method.
    binary_path: String,
}

impl PathSandbox {
    pub fn new(rootfs: PathBuf, overrides: Vec<MountOverride>, binary_path: String) -> Self {
        let mut sorted = overrides;
        sorted.sort_by(|a, b| b.guest_prefix.len().cmp(&a.guest_prefix.len()));
        Self { rootfs, overrides: sorted, binary_path }
    }

    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }

    fn redirect_proc_self_exe(&self, guest_path: &str) -> String {
        if guest_path == "/proc/self/exe" {
            self.binary_path.clone()
        } else {
            guest_path.to_string()
        }
    }

    /// Resolve a (possibly relative) guest path into a guest-absolute
    /// normalized form, without touching the host filesystem.
    fn normalize(&self, guest_path: &str, cwd: &str) -> String {
        let absolute = if guest_path.starts_with('/') {
            guest_path.to_string()
        } else {
            format!("{}/{}", cwd.trim_end_matches('/'), guest_path)
        };

        let mut parts: Vec<&str> = Vec::new();
        for segment in absolute.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        format!("/{}", parts.join("/"))
    }

    /// Map a guest-absolute normalized path onto the host filesystem via
    /// the longest matching override prefix, falling back to `rootfs`.
    fn map_to_host(&self, guest_absolute: &str) -> PathBuf {
        for ov in &self.overrides {
            if guest_absolute == ov.guest_prefix
                || guest_absolute.starts_with(&format!("{}/", ov.guest_prefix))
            {
                let rest = guest_absolute.strip_prefix(&ov.guest_prefix).unwrap_or("");
                return join_guest_rest(&ov.host_prefix, rest);
            }
        }
        join_guest_rest(&self.rootfs, guest_absolute)
    }

    /// `to_real`: host path for `open`/`stat`-family calls. Symlinks in
    /// the mapped host path are chased, but every hop is re-resolved
    /// through the sandbox mapping first so a symlink can't point outside
    /// the rootfs.
    pub fn to_real(&self, guest_path: &str, cwd: &str) -> PathBuf {
        let redirected = self.redirect_proc_self_exe(guest_path);
        let mut guest_absolute = self.normalize(&redirected, cwd);

        for _ in 0..MAX_SYMLINK_DEPTH {
            let host = self.map_to_host(&guest_absolute);
            match std::fs::symlink_metadata(&host) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    let Ok(target) = std::fs::read_link(&host) else { return host };
                    let next_guest = if target.is_absolute() {
                        target.to_string_lossy().into_owned()
                    } else {
                        let parent = Path::new(&guest_absolute)
                            .parent()
                            .map(|p| p.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        self.normalize(&target.to_string_lossy(), &parent)
                    };
                    guest_absolute = self.normalize(&next_guest, &guest_absolute);
                }
                _ => return host,
            }
        }
        self.map_to_host(&guest_absolute)
    }

    /// `to_relative`: the normalized guest-absolute form, for logging and
    /// for the guest's own `getcwd`/`readlink` view.
    pub fn to_relative(&self, guest_path: &str, cwd: &str) -> String {
        let redirected = self.redirect_proc_self_exe(guest_path);
        self.normalize(&redirected, cwd)
    }

    /// `to_link`: like `to_real` but does not follow a final symlink
    /// (used by `readlink`/`readlinkat`, which report the link itself).
    pub fn to_link(&self, guest_path: &str, cwd: &str) -> PathBuf {
        let redirected = self.redirect_proc_self_exe(guest_path);
        let guest_absolute = self.normalize(&redirected, cwd);
        self.map_to_host(&guest_absolute)
    }

    /// Invariant 5 from the spec: `to_real(to_relative(p)) == to_real(p)`
    /// for any path `p`, checked against the *unresolved* symlink-free
    /// case (both sides map through the same override/rootfs rule).
    #[cfg(test)]
    fn map_to_host_pub(&self, guest_absolute: &str) -> PathBuf {
        self.map_to_host(guest_absolute)
    }
}

fn join_guest_rest(base: &Path, rest: &str) -> PathBuf {
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        base.to_path_buf()
    } else {
        base.join(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> PathSandbox {
        PathSandbox::new(
            PathBuf::from("/tmp/rootfs"),
            vec![MountOverride {
                guest_prefix: "/dev".to_string(),
                host_prefix: PathBuf::from("/tmp/devmount"),
            }],
            "/bin/guest".to_string(),
        )
    }

    #[test]
    fn maps_through_rootfs_by_default() {
        let sb = sandbox();
        assert_eq!(sb.to_real("/etc/hosts", "/"), PathBuf::from("/tmp/rootfs/etc/hosts"));
    }

    #[test]
    fn longest_override_prefix_wins() {
        let sb = sandbox();
        assert_eq!(sb.to_real("/dev/null", "/"), PathBuf::from("/tmp/devmount/null"));
    }

    #[test]
    fn relative_paths_resolve_against_cwd() {
        let sb = sandbox();
        assert_eq!(sb.to_relative("hosts", "/etc"), "/etc/hosts");
    }

    #[test]
    fn proc_self_exe_resolves_to_binary_path() {
        let sb = sandbox();
        assert_eq!(sb.to_relative("/proc/self/exe", "/"), "/bin/guest");
        assert_eq!(sb.to_real("/proc/self/exe", "/"), PathBuf::from("/tmp/rootfs/bin/guest"));
    }

    #[test]
    fn to_real_after_to_relative_round_trips() {
        let sb = sandbox();
        let rel = sb.to_relative("../etc/hosts", "/var/log");
        assert_eq!(sb.to_real(&rel, "/"), sb.map_to_host_pub(&rel));
        assert_eq!(sb.to_real(&rel, "/"), sb.to_real("../etc/hosts", "/var/log"));
    }
}
