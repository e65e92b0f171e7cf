//! Container process execution
//!
//! The final stage of the child: once the root switch is done, the child
//! replaces its own process image with the container's program. No new
//! process is created; supervision happens at the launcher.

use std::ffi::CString;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use super::sys::Sys;
use crate::bundle::Process;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("no process provided by runtime config")]
    NoProcess,

    #[error("process string contains a NUL byte: {0}")]
    BadString(#[from] std::ffi::NulError),

    #[error("failed to enter working directory {cwd}: {errno}")]
    ChdirFailed {
        cwd: String,
        errno: nix::errno::Errno,
    },

    #[error("failed to execute container process {program}: {errno}")]
    ExecFailed {
        program: String,
        errno: nix::errno::Errno,
    },
}

/// Replace the current process with the container's program.
///
/// `args[0]` is the program path; there is no PATH search inside the
/// container. Returns only on failure when running against the real
/// syscall layer.
pub fn exec_process(sys: &dyn Sys, process: &Process) -> Result<(), ExecError> {
    if process.args.is_empty() {
        return Err(ExecError::NoProcess);
    }

    // TODO: reduce capabilities to the declared bounding/permitted/effective
    // sets and apply no_new_privileges before exec.

    if !process.cwd.is_empty() {
        sys.chdir(Path::new(&process.cwd))
            .map_err(|errno| ExecError::ChdirFailed {
                cwd: process.cwd.clone(),
                errno,
            })?;
    }

    let argv = process
        .args
        .iter()
        .map(|a| CString::new(a.as_str()))
        .collect::<Result<Vec<_>, _>>()?;
    let envp = process
        .env
        .iter()
        .map(|e| CString::new(e.as_str()))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(program = %process.args[0], "executing container process");
    sys.execve(&argv[0], &argv, &envp)
        .map_err(|errno| ExecError::ExecFailed {
            program: process.args[0].clone(),
            errno,
        })?;

    Ok(())
}
