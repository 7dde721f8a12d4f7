//! Child processes on a pseudo-terminal.
//!
//! The REPL only behaves interactively (prompt, line editing, colour) when
//! its standard streams are a terminal, so [`PtyProcess`] runs it as the
//! session leader of a fresh pty and talks to it through the master side.

use std::ffi::CStr;
use std::fs::File;
use std::io::{self, Read, Write};
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, FromRawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::expect::{Expect, ExpectError, Match, PatternSet, SpawnFlags};

/// Bytes read from the master per `read(2)`.
const READ_CHUNK: usize = 4096;

/// Terminal size reported to the child.  Wide, so long values are never
/// wrapped by the line editor.
const ROWS: u16 = 24;
const COLUMNS: u16 = 4096;

/// How long [`PtyProcess::close`] waits for a hung-up child before killing it.
const CLOSE_GRACE: Duration = Duration::from_secs(1);
const CLOSE_POLL: Duration = Duration::from_millis(10);

pub struct PtyProcess {
    program: String,
    child: Child,
    master: Option<File>,
    buf: Vec<u8>,
    /// Bytes at the front of `buf` already returned by a match.
    consumed: usize,
    timeout: Duration,
    eof: bool,
    reaped: bool,
}

impl PtyProcess {
    /// Start `program` on a new pty.
    pub fn spawn(
        program: &str,
        args: &[String],
        flags: SpawnFlags,
        timeout: Duration,
    ) -> Result<Self, ExpectError> {
        let spawn_err = |source: io::Error| ExpectError::Spawn {
            program: program.to_string(),
            source,
        };

        let (master, slave) = open_pty().map_err(spawn_err)?;
        configure(&slave, flags).map_err(spawn_err)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("TERM", "dumb")
            .stdin(Stdio::from(slave.try_clone().map_err(spawn_err)?))
            .stdout(Stdio::from(slave.try_clone().map_err(spawn_err)?))
            .stderr(Stdio::from(slave));
        // SAFETY: only async-signal-safe calls between fork and exec.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() < 0 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
        let child = cmd.spawn().map_err(spawn_err)?;
        // Release our copies of the slave so the master sees the hangup.
        drop(cmd);

        debug!(program, pid = child.id(), ?flags, "spawned");
        Ok(Self {
            program: program.to_string(),
            child,
            master: Some(master),
            buf: Vec::with_capacity(READ_CHUNK),
            consumed: 0,
            timeout,
            eof: false,
            reaped: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time each [`Expect::expect`] call may wait.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Wait up to `wait` for output and append one chunk of it to the buffer.
    fn fill(&mut self, wait: Duration) -> Result<(), ExpectError> {
        let master = self.master.as_mut().ok_or(ExpectError::Eof)?;
        let mut pfd = libc::pollfd {
            fd: master.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let ms = wait.as_millis().clamp(1, libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: one valid pollfd.
        let rc = unsafe { libc::poll(&mut pfd, 1, ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err.into());
        }
        if rc == 0 {
            return Ok(());
        }

        let mut chunk = [0u8; READ_CHUNK];
        match master.read(&mut chunk) {
            Ok(0) => self.eof = true,
            Ok(n) => {
                trace!(n, "read");
                self.buf.extend_from_slice(&chunk[..n]);
            }
            // Linux reports a hung-up pty as EIO.
            Err(e) if e.raw_os_error() == Some(libc::EIO) => self.eof = true,
            Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) => {}
            Err(e) => return Err(e.into()),
        }
        if self.eof {
            debug!(pid = self.child.id(), "child output closed");
        }
        Ok(())
    }
}

impl Expect for PtyProcess {
    fn send(&mut self, bytes: &[u8]) -> Result<usize, ExpectError> {
        let master = self.master.as_mut().ok_or(ExpectError::Eof)?;
        master.write_all(bytes)?;
        master.flush()?;
        trace!(n = bytes.len(), "sent");
        Ok(bytes.len())
    }

    fn expect(&mut self, patterns: &PatternSet) -> Result<Match, ExpectError> {
        self.buf.drain(..self.consumed);
        self.consumed = 0;

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(m) = patterns.find(&self.buf) {
                trace!(pattern = m.pattern, start = m.start, end = m.end, "matched");
                self.consumed = m.end;
                return Ok(m);
            }
            if self.eof {
                return Err(ExpectError::Eof);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ExpectError::Timeout(self.timeout));
            }
            self.fill(deadline - now)?;
        }
    }

    fn buffer(&self) -> &[u8] {
        &self.buf
    }

    fn close(&mut self) -> Result<Option<i32>, ExpectError> {
        if self.reaped {
            return Ok(None);
        }
        // Dropping the master hangs up the terminal.
        self.master = None;

        let deadline = Instant::now() + CLOSE_GRACE;
        let status = loop {
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                warn!(pid = self.child.id(), "child ignored hangup, killing");
                self.child.kill()?;
                break self.child.wait()?;
            }
            thread::sleep(CLOSE_POLL);
        };
        self.reaped = true;
        debug!(pid = self.child.id(), %status, "child exited");
        Ok(status.code())
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

// ── Terminal setup ────────────────────────────────────────────────────────────

/// Open a pty pair, returning `(master, slave)`.
fn open_pty() -> io::Result<(File, File)> {
    // SAFETY: each call's result is checked before the descriptor is used,
    // and each descriptor is wrapped in a `File` exactly once.
    unsafe {
        let fd = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let master = File::from_raw_fd(fd);
        if libc::grantpt(fd) != 0 || libc::unlockpt(fd) != 0 {
            return Err(io::Error::last_os_error());
        }

        let mut name = [0 as libc::c_char; 128];
        let rc = libc::ptsname_r(fd, name.as_mut_ptr(), name.len());
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        let path = CStr::from_ptr(name.as_ptr());
        let sfd = libc::open(path.as_ptr(), libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC);
        if sfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((master, File::from_raw_fd(sfd)))
    }
}

fn configure(slave: &File, flags: SpawnFlags) -> io::Result<()> {
    let fd = slave.as_raw_fd();
    let mut tio = MaybeUninit::<libc::termios>::uninit();
    // SAFETY: tcgetattr fills the struct on success.
    let mut tio = unsafe {
        if libc::tcgetattr(fd, tio.as_mut_ptr()) != 0 {
            return Err(io::Error::last_os_error());
        }
        tio.assume_init()
    };
    if !flags.echo {
        tio.c_lflag &= !(libc::ECHO | libc::ECHONL);
    }
    if !flags.signals {
        tio.c_lflag &= !libc::ISIG;
    }
    let ws = libc::winsize {
        ws_row: ROWS,
        ws_col: COLUMNS,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: valid descriptor and fully initialised arguments.
    unsafe {
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::ioctl(fd, libc::TIOCSWINSZ, &ws as *const libc::winsize) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
