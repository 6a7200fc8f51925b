//! Connection run levels.
//!
//! Handshake → Normal (LOGIN) → RandomAccess (RANDOMACCESS) → Normal (EXIT),
//! and Disconnected from anywhere. Disconnected is terminal.

use crate::error::{Result, VfsError};
use crate::vfs::{FileAccess, RandomAccessStream};
use std::fmt;

/// Run level without its state, used by command bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunLevelKind {
    Handshake,
    Normal,
    RandomAccess,
    Disconnected,
    /// Binding wildcard, never a live state
    Any,
}

impl RunLevelKind {
    /// Whether a command bound to `self` may run while the connection is in `current`.
    pub fn admits(self, current: RunLevelKind) -> bool {
        match self {
            RunLevelKind::Any => current != RunLevelKind::Disconnected,
            bound => bound == current,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunLevelKind::Handshake => "Handshake",
            RunLevelKind::Normal => "Normal",
            RunLevelKind::RandomAccess => "RandomAccess",
            RunLevelKind::Disconnected => "Disconnected",
            RunLevelKind::Any => "Any",
        }
    }
}

impl fmt::Display for RunLevelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream opened by RANDOMACCESS, owned by the run level
pub struct RandomAccessState {
    pub stream: Box<dyn RandomAccessStream>,
    pub path: String,
    pub access: FileAccess,
}

pub enum RunLevel {
    Handshake,
    Normal,
    RandomAccess(RandomAccessState),
    Disconnected,
}

impl RunLevel {
    pub fn kind(&self) -> RunLevelKind {
        match self {
            RunLevel::Handshake => RunLevelKind::Handshake,
            RunLevel::Normal => RunLevelKind::Normal,
            RunLevel::RandomAccess(_) => RunLevelKind::RandomAccess,
            RunLevel::Disconnected => RunLevelKind::Disconnected,
        }
    }

    fn illegal(&self, to: RunLevelKind) -> VfsError {
        VfsError::CommandNotSupported(format!("cannot move from {} to {}", self.kind(), to))
    }

    pub fn login(&mut self) -> Result<()> {
        match self {
            RunLevel::Handshake => {
                *self = RunLevel::Normal;
                Ok(())
            }
            _ => Err(self.illegal(RunLevelKind::Normal)),
        }
    }

    pub fn enter_random_access(&mut self, state: RandomAccessState) -> Result<()> {
        match self {
            RunLevel::Normal => {
                *self = RunLevel::RandomAccess(state);
                Ok(())
            }
            _ => Err(self.illegal(RunLevelKind::RandomAccess)),
        }
    }

    /// Leave RandomAccess, handing the stream back for disposal.
    pub fn exit_random_access(&mut self) -> Result<RandomAccessState> {
        match std::mem::replace(self, RunLevel::Normal) {
            RunLevel::RandomAccess(state) => Ok(state),
            other => {
                *self = other;
                Err(self.illegal(RunLevelKind::Normal))
            }
        }
    }

    /// Enter the terminal state; returns an open stream, if any, for disposal.
    pub fn disconnect(&mut self) -> Option<RandomAccessState> {
        match std::mem::replace(self, RunLevel::Disconnected) {
            RunLevel::RandomAccess(state) => Some(state),
            _ => None,
        }
    }

    pub fn random_access(&mut self) -> Result<&mut RandomAccessState> {
        match self {
            RunLevel::RandomAccess(state) => Ok(state),
            other => Err(VfsError::CommandNotSupported(format!(
                "no stream open in {}",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn state() -> RandomAccessState {
        let tmp = tempfile::tempfile().unwrap();
        RandomAccessState {
            stream: Box::new(tokio::fs::File::from_std(tmp)),
            path: "/x".into(),
            access: FileAccess::ReadWrite,
        }
    }

    #[test]
    fn test_any_admits_every_live_level() {
        for level in [RunLevelKind::Handshake, RunLevelKind::Normal, RunLevelKind::RandomAccess] {
            assert!(RunLevelKind::Any.admits(level));
        }
        assert!(!RunLevelKind::Any.admits(RunLevelKind::Disconnected));
        assert!(!RunLevelKind::Normal.admits(RunLevelKind::RandomAccess));
    }

    #[tokio::test]
    async fn test_transitions() {
        let mut level = RunLevel::Handshake;
        assert!(level.enter_random_access(state().await).is_err());
        assert_eq!(level.kind(), RunLevelKind::Handshake);
        level.login().unwrap();
        assert!(level.login().is_err());
        assert_eq!(level.kind(), RunLevelKind::Normal);
        assert!(level.exit_random_access().is_err());
        assert_eq!(level.kind(), RunLevelKind::Normal);

        level.enter_random_access(state().await).unwrap();
        assert_eq!(level.random_access().unwrap().path, "/x");
        let st = level.exit_random_access().unwrap();
        assert_eq!(st.access, FileAccess::ReadWrite);
        assert_eq!(level.kind(), RunLevelKind::Normal);

        level.enter_random_access(state().await).unwrap();
        assert!(level.disconnect().is_some());
        assert_eq!(level.kind(), RunLevelKind::Disconnected);
        assert!(level.login().is_err());
    }
}
