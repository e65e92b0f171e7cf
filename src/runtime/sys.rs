//! Syscall seam for the container setup pipeline
//!
//! Every OS mutation the child performs (mounts, pivot, exec) goes through
//! the [`Sys`] trait so the ordering-critical sequence can be exercised
//! against a recording fake without touching the host.

use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags};
use std::ffi::CString;
use std::path::Path;

pub trait Sys {
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), Errno>;

    fn umount_detach(&self, target: &Path) -> Result<(), Errno>;

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<(), Errno>;

    fn chdir(&self, path: &Path) -> Result<(), Errno>;

    fn sethostname(&self, name: &str) -> Result<(), Errno>;

    fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Replace the process image. Only ever returns on failure.
    fn execve(&self, program: &CString, args: &[CString], env: &[CString]) -> Result<(), Errno>;
}

/// The real kernel-backed implementation
pub struct RealSys;

impl Sys for RealSys {
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<(), Errno> {
        nix::mount::mount(source, target, fstype, flags, data)
    }

    fn umount_detach(&self, target: &Path) -> Result<(), Errno> {
        nix::mount::umount2(target, MntFlags::MNT_DETACH)
    }

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<(), Errno> {
        nix::unistd::pivot_root(new_root, put_old)
    }

    fn chdir(&self, path: &Path) -> Result<(), Errno> {
        nix::unistd::chdir(path)
    }

    fn sethostname(&self, name: &str) -> Result<(), Errno> {
        nix::unistd::sethostname(name)
    }

    fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn execve(&self, program: &CString, args: &[CString], env: &[CString]) -> Result<(), Errno> {
        nix::unistd::execve(program, args, env).map(|_| ())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;

    /// One recorded OS mutation
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Mount {
            source: Option<String>,
            target: String,
            fstype: Option<String>,
            flags: MsFlags,
            data: Option<String>,
        },
        UmountDetach {
            target: String,
        },
        PivotRoot {
            new_root: String,
            put_old: String,
        },
        Chdir {
            path: String,
        },
        Sethostname {
            name: String,
        },
        CreateDirAll {
            path: String,
        },
        Exec {
            program: String,
            args: Vec<String>,
            env: Vec<String>,
        },
    }

    /// Records every call in order; optionally fails the call at a given
    /// index so tests can verify that nothing past a fault is attempted.
    pub struct RecordingSys {
        calls: RefCell<Vec<Call>>,
        fail_at: Option<usize>,
    }

    impl RecordingSys {
        pub fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                fail_at: None,
            }
        }

        pub fn failing_at(index: usize) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                fail_at: Some(index),
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }

        fn record(&self, call: Call) -> Result<(), Errno> {
            let mut calls = self.calls.borrow_mut();
            calls.push(call);
            if self.fail_at == Some(calls.len() - 1) {
                return Err(Errno::EPERM);
            }
            Ok(())
        }
    }

    fn path_str(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    impl Sys for RecordingSys {
        fn mount(
            &self,
            source: Option<&Path>,
            target: &Path,
            fstype: Option<&str>,
            flags: MsFlags,
            data: Option<&str>,
        ) -> Result<(), Errno> {
            self.record(Call::Mount {
                source: source.map(path_str),
                target: path_str(target),
                fstype: fstype.map(str::to_owned),
                flags,
                data: data.map(str::to_owned),
            })
        }

        fn umount_detach(&self, target: &Path) -> Result<(), Errno> {
            self.record(Call::UmountDetach {
                target: path_str(target),
            })
        }

        fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<(), Errno> {
            self.record(Call::PivotRoot {
                new_root: path_str(new_root),
                put_old: path_str(put_old),
            })
        }

        fn chdir(&self, path: &Path) -> Result<(), Errno> {
            self.record(Call::Chdir {
                path: path_str(path),
            })
        }

        fn sethostname(&self, name: &str) -> Result<(), Errno> {
            self.record(Call::Sethostname {
                name: name.to_owned(),
            })
        }

        fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
            self.record(Call::CreateDirAll {
                path: path_str(path),
            })
            .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
        }

        fn execve(
            &self,
            program: &CString,
            args: &[CString],
            env: &[CString],
        ) -> Result<(), Errno> {
            let to_str = |c: &CString| c.to_string_lossy().into_owned();
            self.record(Call::Exec {
                program: to_str(program),
                args: args.iter().map(to_str).collect(),
                env: env.iter().map(to_str).collect(),
            })
        }
    }
}
