//! File-descriptor sink
//!
//! Serializes a message into a thread-local scratch line and hands it to
//! the descriptor in a single write syscall (message text plus a
//! newline). A short or failed write produces one fallback line on
//! stderr; the message counts as delivered either way.

use super::Emitter;
use crate::message::Message;
use crate::site::SiteDescriptor;
use std::cell::RefCell;
use std::fmt::Write as _;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;

const SCRATCH_CAPACITY: usize = 4096;

thread_local! {
    static SCRATCH: RefCell<String> = RefCell::new(String::with_capacity(SCRATCH_CAPACITY));
}

pub struct HandleEmitter {
    fd: RawFd,
    stamped: bool,
    // Present when the emitter owns the descriptor; drop closes it.
    _owned: Option<OwnedFd>,
}

impl HandleEmitter {
    /// Borrow an externally managed descriptor.
    pub const fn from_raw(fd: RawFd) -> Self {
        Self {
            fd,
            stamped: false,
            _owned: None,
        }
    }

    /// Take ownership of a descriptor; it is closed on drop.
    pub fn from_owned(fd: OwnedFd) -> Self {
        let raw = fd.as_raw_fd();
        Self {
            fd: raw,
            stamped: false,
            _owned: Some(fd),
        }
    }

    /// Create or truncate a file and emit into it.
    pub fn for_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_owned(OwnedFd::from(file)))
    }

    /// Prefix each line with an RFC 3339 UTC timestamp.
    pub fn stamped(mut self) -> Self {
        self.stamped = true;
        self
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    fn write_line(&self, line: &str) {
        let bytes = line.as_bytes();
        let mut written = 0;
        while written < bytes.len() {
            let rest = &bytes[written..];
            let rc = unsafe { libc::write(self.fd, rest.as_ptr().cast(), rest.len()) };
            if rc <= 0 {
                eprintln!(
                    "sitelog: write to fd {} failed after {} of {} bytes",
                    self.fd,
                    written,
                    bytes.len()
                );
                return;
            }
            written += rc as usize;
        }
    }
}

impl Emitter for HandleEmitter {
    fn emit(&self, _site: &'static SiteDescriptor, message: Message) {
        SCRATCH.with(|scratch| {
            let mut line = scratch.borrow_mut();
            line.clear();
            if self.stamped {
                let _ = write!(line, "{} ", chrono::Utc::now().to_rfc3339());
            }
            let _ = write!(line, "{message}\n");
            self.write_line(&line);
        });
    }
}

static STDOUT: HandleEmitter = HandleEmitter::from_raw(1);
static STDERR: HandleEmitter = HandleEmitter::from_raw(2);

/// Emitter for the process standard output stream.
pub fn stdout() -> &'static HandleEmitter {
    &STDOUT
}

/// Emitter for the process standard error stream.
pub fn stderr() -> &'static HandleEmitter {
    &STDERR
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::SiteDescriptor;
    use std::io::Read;

    static SITE: SiteDescriptor = SiteDescriptor::new("handle:1", "tests", "untagged");

    #[test]
    fn writes_one_line_per_message() {
        let dir = std::env::temp_dir().join("sitelog-handle-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("lines-{}.log", std::process::id()));
        {
            let emitter = HandleEmitter::for_path(&path).unwrap();
            for index in 0..3 {
                let mut message = Message::new();
                message.format(("line ", index));
                emitter.emit(&SITE, message);
            }
        }
        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(contents, "line 0\nline 1\nline 2\n");
    }

    #[test]
    fn stamped_lines_carry_a_timestamp() {
        let dir = std::env::temp_dir().join("sitelog-handle-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("stamped-{}.log", std::process::id()));
        {
            let emitter = HandleEmitter::for_path(&path).unwrap().stamped();
            let mut message = Message::new();
            message.format(("stamped",));
            emitter.emit(&SITE, message);
        }
        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        std::fs::remove_file(&path).ok();
        assert!(contents.ends_with("stamped\n"));
        // RFC 3339 date prefix
        assert!(contents.starts_with("20"));
        assert!(contents.contains('T'));
    }
}
