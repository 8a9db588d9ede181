use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::process;

#[derive(Debug)]
pub enum DaemonError {
    Fork { source: io::Error },
    NewSession { source: io::Error },
    ChangeDir { source: io::Error },
    RedirectStdio { source: io::Error },
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fork { source } => write!(f, "fork failed: {source}"),
            Self::NewSession { source } => write!(f, "setsid failed: {source}"),
            Self::ChangeDir { source } => write!(f, "chdir to / failed: {source}"),
            Self::RedirectStdio { source } => {
                write!(f, "failed to redirect stdio to /dev/null: {source}")
            }
        }
    }
}

impl std::error::Error for DaemonError {}

/// Detaches the process into the background: fork (parent exits), new
/// session, chdir to `/`, stdio onto `/dev/null`. Applied once after the
/// listening socket is bound, so the caller keeps the bound port either way.
/// Must run before any worker thread is spawned; fork only carries the
/// calling thread into the child.
pub fn daemonize() -> Result<(), DaemonError> {
    // SAFETY: fork() is a standard POSIX call; the process is still
    // single-threaded at this point in startup.
    let pid = unsafe { libc::fork() };
    match pid {
        -1 => {
            return Err(DaemonError::Fork {
                source: io::Error::last_os_error(),
            });
        }
        0 => {}
        _ => process::exit(0),
    }

    // SAFETY: setsid() is a standard POSIX call.
    if unsafe { libc::setsid() } == -1 {
        return Err(DaemonError::NewSession {
            source: io::Error::last_os_error(),
        });
    }

    std::env::set_current_dir("/").map_err(|source| DaemonError::ChangeDir { source })?;

    redirect_stdio_to_dev_null().map_err(|source| DaemonError::RedirectStdio { source })
}

fn redirect_stdio_to_dev_null() -> io::Result<()> {
    let read_null = File::open("/dev/null")?;
    let write_null = OpenOptions::new().write(true).open("/dev/null")?;

    // SAFETY: dup2 duplicates valid open descriptors over the standard
    // streams; the File handles stay alive until after the calls.
    unsafe {
        if libc::dup2(read_null.as_raw_fd(), libc::STDIN_FILENO) == -1
            || libc::dup2(write_null.as_raw_fd(), libc::STDOUT_FILENO) == -1
            || libc::dup2(write_null.as_raw_fd(), libc::STDERR_FILENO) == -1
        {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}
