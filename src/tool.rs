use std::ffi::OsString;
use std::fs::File;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ToolError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One run of an external program: arguments, optional stdin, stdout sink.
pub struct Invocation {
    pub args: Vec<OsString>,
    pub stdin: Option<File>,
    pub stdout: File,
}

/// Something that can run an [`Invocation`] to completion.
///
/// Blocking; callers put it on a blocking thread.
pub trait Tool: Send + Sync {
    fn invoke(&self, invocation: Invocation) -> Result<(), ToolError>;
}

/// Runs a real executable, optionally killing it after a timeout.
#[derive(Debug, Clone)]
pub struct SubprocessTool {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl SubprocessTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        SubprocessTool {
            program: program.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Tool for SubprocessTool {
    fn invoke(&self, invocation: Invocation) -> Result<(), ToolError> {
        let stdin = match invocation.stdin {
            Some(file) => Stdio::from(file),
            None => Stdio::null(),
        };
        debug!(program = %self.program.display(), args = ?invocation.args, "spawning");
        let mut child = Command::new(&self.program)
            .args(&invocation.args)
            .stdin(stdin)
            .stdout(Stdio::from(invocation.stdout))
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let status = match self.timeout {
            None => child.wait()?,
            Some(limit) => {
                let start = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if start.elapsed() >= limit {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ToolError::Timeout {
                            program: self.program.clone(),
                            limit,
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(ToolError::Exit {
                program: self.program.clone(),
                status: status.to_string(),
            })
        }
    }
}
