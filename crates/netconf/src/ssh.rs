//! SSH transport: `ssh -s <host> netconf` as a subprocess
//!
//! Password logins go through `sshpass -e`, which reads the password from
//! the `SSHPASS` environment variable of the child only.

use crate::error::Error;
use crate::session::NetconfSession;
use deploykit::{ConnectError, Connector, Credentials, DeviceTarget};
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_PORT: u16 = 830;

const SSHPASS: &str = "sshpass";

/// How long to wait for ssh's stderr after the process exits
const STDERR_GRACE: Duration = Duration::from_millis(250);

/// Options for the ssh subprocess
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// ssh executable
    pub program: String,
    pub port: u16,
    pub strict_host_key_checking: bool,
    /// Bounds TCP connect and the hello exchange
    pub connect_timeout: Duration,
    /// Bounds each RPC
    pub rpc_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            port: DEFAULT_PORT,
            strict_host_key_checking: false,
            connect_timeout: Duration::from_secs(30),
            rpc_timeout: Duration::from_secs(60),
        }
    }
}

/// Opens NETCONF sessions over the system ssh client
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    /// Build the subprocess command for a device
    pub fn command(&self, device: &DeviceTarget, credentials: &Credentials) -> Command {
        let opts = &self.options;
        let mut cmd = match credentials.password() {
            Some(password) => {
                let mut cmd = Command::new(SSHPASS);
                cmd.arg("-e").arg(&opts.program).env("SSHPASS", password);
                cmd
            }
            None => {
                let mut cmd = Command::new(&opts.program);
                cmd.args(["-o", "BatchMode=yes"]);
                cmd
            }
        };

        let strict = if opts.strict_host_key_checking {
            "yes"
        } else {
            "no"
        };
        cmd.args(["-p", &opts.port.to_string()])
            .args(["-o", &format!("StrictHostKeyChecking={strict}")])
            .args([
                "-o",
                &format!("ConnectTimeout={}", opts.connect_timeout.as_secs().max(1)),
            ]);
        if !opts.strict_host_key_checking {
            cmd.args(["-o", "UserKnownHostsFile=/dev/null", "-o", "LogLevel=ERROR"]);
        }
        if credentials.password().is_some() {
            cmd.args(["-o", "NumberOfPasswordPrompts=1"]);
        }
        if !credentials.username().is_empty() {
            cmd.args(["-l", credentials.username()]);
        }
        cmd.arg("-s").arg(&device.address).arg("netconf");

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group: a terminal Ctrl-C must reach netpush only, so the
        // session stays up long enough to unlock and close cleanly
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }

    /// Program that has to be installed for this login
    fn required_program<'a>(&'a self, credentials: &Credentials) -> &'a str {
        if credentials.password().is_some() {
            SSHPASS
        } else {
            &self.options.program
        }
    }
}

impl Connector for SshConnector {
    type Session = NetconfSession;

    fn open(
        &self,
        device: &DeviceTarget,
        credentials: &Credentials,
    ) -> Result<NetconfSession, ConnectError> {
        let opts = &self.options;
        log::debug!(
            "{}: connecting to {}:{} as {}",
            device.name,
            device.address,
            opts.port,
            credentials.username()
        );

        let mut child = self
            .command(device, credentials)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => ConnectError::ToolMissing {
                    program: self.required_program(credentials).to_string(),
                },
                _ => ConnectError::Io(e),
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ConnectError::Handshake {
                address: device.address.clone(),
                message: "subprocess pipes unavailable".into(),
            });
        };
        let diagnostics = StderrCollector::spawn(&device.name, stderr);

        match NetconfSession::establish(
            &device.name,
            stdout,
            stdin,
            opts.connect_timeout,
            opts.rpc_timeout,
        ) {
            Ok(mut session) => {
                session.attach_child(child);
                Ok(session)
            }
            Err(e) => {
                let _ = child.kill();
                let status = child.wait().ok();
                let stderr = diagnostics.finish();
                log::debug!("{}: ssh exited with {:?}: {}", device.name, status, stderr.trim());

                Err(classify_ssh_failure(
                    &stderr,
                    status.and_then(|s| s.code()),
                    credentials.password().is_some(),
                    &device.address,
                    credentials.username(),
                    &e,
                    opts.connect_timeout,
                ))
            }
        }
    }
}

/// Collects a subprocess's stderr on a background thread
struct StderrCollector {
    text: Arc<Mutex<String>>,
    handle: thread::JoinHandle<()>,
}

impl StderrCollector {
    fn spawn<R: Read + Send + 'static>(device: &str, stderr: R) -> Self {
        let text = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&text);
        let device = device.to_string();

        let handle = thread::spawn(move || {
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else { break };
                log::trace!("{device}: ssh: {line}");
                let mut text = sink.lock().unwrap_or_else(PoisonError::into_inner);
                text.push_str(&line);
                text.push('\n');
            }
        });

        Self { text, handle }
    }

    /// Whatever was written, waiting briefly for the stream to finish
    fn finish(self) -> String {
        let started = Instant::now();
        while !self.handle.is_finished() && started.elapsed() < STDERR_GRACE {
            thread::sleep(Duration::from_millis(10));
        }
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Turn a failed session setup into a connect error
///
/// ssh reports most failures on stderr. sshpass exits with 5 on a rejected
/// password and 6 on an unknown host key.
pub fn classify_ssh_failure(
    stderr: &str,
    exit_code: Option<i32>,
    via_sshpass: bool,
    address: &str,
    user: &str,
    setup_error: &Error,
    connect_timeout: Duration,
) -> ConnectError {
    let lower = stderr.to_lowercase();
    let address = address.to_string();

    if lower.contains("permission denied")
        || lower.contains("authentication failed")
        || lower.contains("too many authentication failures")
        || (via_sshpass && exit_code == Some(5))
    {
        return ConnectError::Auth {
            address,
            user: user.to_string(),
        };
    }

    if lower.contains("host key verification failed")
        || lower.contains("remote host identification has changed")
        || (via_sshpass && exit_code == Some(6))
    {
        return ConnectError::HostKey { address };
    }

    if lower.contains("timed out") || (setup_error.is_timeout() && stderr.trim().is_empty()) {
        return ConnectError::Timeout {
            address,
            secs: connect_timeout.as_secs(),
        };
    }

    if lower.contains("connection refused")
        || lower.contains("no route to host")
        || lower.contains("could not resolve hostname")
        || lower.contains("name or service not known")
        || lower.contains("network is unreachable")
        || lower.contains("connection reset")
        || lower.contains("connection closed by")
    {
        return ConnectError::Unreachable {
            address,
            message: last_line(stderr),
        };
    }

    let message = if stderr.trim().is_empty() {
        setup_error.to_string()
    } else {
        last_line(stderr)
    };
    ConnectError::Handshake { address, message }
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}
