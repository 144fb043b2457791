//! Append-only diagnostic journal.
//!
//! Survives what the process log does not: merges that rewrote history,
//! entries that keep failing, anything an operator may need to audit weeks
//! later. One line per event, fsynced before the call returns.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};

use crate::error::Result;

/// Journal line kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// General diagnostics worth keeping.
    Log,
    /// A queue entry failed and was pushed back for retry.
    Fatal,
    /// Two entities were merged.
    Link,
}

impl Kind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Fatal => "fatal",
            Self::Link => "link",
        }
    }
}

/// Handle to `journal.log` in the data root.
#[derive(Debug)]
pub struct Journal {
    file: Mutex<File>,
}

impl Journal {
    /// Open (or create) the journal in the given root directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(root.as_ref().join("journal.log"))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn log(&self, context: &str, message: &str) -> Result<()> {
        self.append(Kind::Log, context, message)
    }

    pub fn fatal(&self, context: &str, message: &str) -> Result<()> {
        self.append(Kind::Fatal, context, message)
    }

    pub fn link(&self, context: &str, message: &str) -> Result<()> {
        self.append(Kind::Link, context, message)
    }

    /// Line format: `kind+[iso-timestamp](context): message`.
    fn append(&self, kind: Kind, context: &str, message: &str) -> Result<()> {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let line = format!("{}+[{stamp}]({context}): {message}\n", kind.as_str());
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        journal.log("test", "first").unwrap();
        journal.fatal("pass.x", "entry 3 failed").unwrap();
        journal.link("merge", "tr4 <- tr9").unwrap();

        let text = std::fs::read_to_string(dir.path().join("journal.log")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("log+["));
        assert!(lines[0].ends_with("(test): first"));
        assert!(lines[1].starts_with("fatal+["));
        assert!(lines[2].starts_with("link+["));
        assert!(lines[2].contains("(merge): tr4 <- tr9"));
    }

    #[test]
    fn reopen_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        {
            let journal = Journal::open(dir.path()).unwrap();
            journal.log("a", "one").unwrap();
        }
        let journal = Journal::open(dir.path()).unwrap();
        journal.log("b", "two").unwrap();
        let text = std::fs::read_to_string(dir.path().join("journal.log")).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
