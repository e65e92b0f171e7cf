//! Default runtime config synthesized from image metadata
//!
//! Mount and path lists follow the runc example spec; the result is the
//! config.json a freshly pulled bundle starts with.

use crate::CONTAINER_HOSTNAME;
use crate::bundle::{
    Capabilities, ContainerSpec, Linux, LinuxNamespace, Mount, NamespaceKind, Process, Rlimit,
};

use super::ImageConfig;

const OCI_VERSION: &str = "1.1.0";

const DEFAULT_CAPABILITIES: [&str; 3] = ["CAP_AUDIT_WRITE", "CAP_KILL", "CAP_NET_BIND_SERVICE"];

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn mount(destination: &str, fstype: &str, source: &str, options: &[&str]) -> Mount {
    Mount {
        destination: destination.into(),
        fstype: fstype.into(),
        source: source.into(),
        options: strings(options),
    }
}

/// Build the default container spec for an image.
///
/// The process argv is entrypoint followed by cmd, both taken from the
/// image config; an image that declares neither produces a bundle that
/// fails validation at run time.
pub fn default_spec(image: &ImageConfig) -> ContainerSpec {
    let mut args = image.entrypoint.clone();
    args.extend(image.cmd.iter().cloned());

    ContainerSpec {
        oci_version: OCI_VERSION.into(),
        process: Process {
            terminal: true,
            args,
            env: image.env.clone(),
            cwd: image.working_dir.clone(),
            no_new_privileges: true,
            capabilities: Some(Capabilities {
                bounding: strings(&DEFAULT_CAPABILITIES),
                effective: strings(&DEFAULT_CAPABILITIES),
                permitted: strings(&DEFAULT_CAPABILITIES),
            }),
            rlimits: vec![Rlimit {
                kind: "RLIMIT_NOFILE".into(),
                hard: 1024,
                soft: 1024,
            }],
            ..Process::default()
        },
        hostname: CONTAINER_HOSTNAME.into(),
        mounts: vec![
            mount("/proc", "proc", "proc", &[]),
            mount(
                "/dev",
                "tmpfs",
                "tmpfs",
                &["nosuid", "strictatime", "mode=755", "size=65536k"],
            ),
            mount(
                "/dev/pts",
                "devpts",
                "devpts",
                &[
                    "nosuid",
                    "noexec",
                    "newinstance",
                    "ptmxmode=0666",
                    "mode=0620",
                    "gid=5",
                ],
            ),
            mount(
                "/dev/shm",
                "tmpfs",
                "shm",
                &["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"],
            ),
            mount("/dev/mqueue", "mqueue", "mqueue", &["nosuid", "noexec", "nodev"]),
            mount("/sys", "sysfs", "sysfs", &["nosuid", "noexec", "nodev", "ro"]),
            mount(
                "/sys/fs/cgroup",
                "cgroup",
                "cgroup",
                &["nosuid", "noexec", "nodev", "relatime", "ro"],
            ),
        ],
        linux: Linux {
            namespaces: [
                NamespaceKind::Mount,
                NamespaceKind::Pid,
                NamespaceKind::Network,
                NamespaceKind::Ipc,
                NamespaceKind::Uts,
                NamespaceKind::User,
            ]
            .into_iter()
            .map(|kind| LinuxNamespace { kind })
            .collect(),
            masked_paths: strings(&[
                "/proc/acpi",
                "/proc/asound",
                "/proc/kcore",
                "/proc/keys",
                "/proc/latency_stats",
                "/proc/timer_list",
                "/proc/timer_stats",
                "/proc/sched_debug",
                "/sys/firmware",
                "/proc/scsi",
            ]),
            readonly_paths: strings(&[
                "/proc/bus",
                "/proc/fs",
                "/proc/irq",
                "/proc/sys",
                "/proc/sysrq-trigger",
            ]),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_is_entrypoint_then_cmd() {
        let image = ImageConfig {
            entrypoint: vec!["/entry".into()],
            cmd: vec!["serve".into(), "--port=80".into()],
            ..ImageConfig::default()
        };
        let spec = default_spec(&image);
        assert_eq!(spec.process.args, ["/entry", "serve", "--port=80"]);
        spec.validate().unwrap();
    }

    #[test]
    fn dev_pts_comes_after_dev() {
        let spec = default_spec(&ImageConfig::default());
        let dev = spec
            .mounts
            .iter()
            .position(|m| m.destination == "/dev")
            .unwrap();
        let pts = spec
            .mounts
            .iter()
            .position(|m| m.destination == "/dev/pts")
            .unwrap();
        assert!(dev < pts);
    }

    #[test]
    fn all_six_namespace_kinds_are_declared() {
        let spec = default_spec(&ImageConfig::default());
        let kinds: Vec<NamespaceKind> = spec.linux.namespaces.iter().map(|n| n.kind).collect();
        for kind in [
            NamespaceKind::Mount,
            NamespaceKind::Pid,
            NamespaceKind::Network,
            NamespaceKind::Ipc,
            NamespaceKind::Uts,
            NamespaceKind::User,
        ] {
            assert!(kinds.contains(&kind));
        }
    }

    #[test]
    fn image_env_and_cwd_are_carried_over() {
        let image = ImageConfig {
            cmd: vec!["/bin/sh".into()],
            env: vec!["PATH=/usr/bin:/bin".into()],
            working_dir: "/srv".into(),
            ..ImageConfig::default()
        };
        let spec = default_spec(&image);
        assert_eq!(spec.process.env, ["PATH=/usr/bin:/bin"]);
        assert_eq!(spec.process.cwd, "/srv");
        assert_eq!(spec.hostname, CONTAINER_HOSTNAME);
    }
}
