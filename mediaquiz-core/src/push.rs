//! Push results and transfer progress.
//!
//! Push outcomes are reported as a bit set per reference. The bit values are
//! stable because they are persisted in job status records and shown to users.

use serde::{Deserialize, Serialize};

use crate::error::{MediaError, Result};

/// One outcome bit for a pushed reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum PushFlag {
    Error = 1024,
    UpToDate = 512,
    FastForward = 256,
    ForcedUpdate = 128,
    Deleted = 64,
    RemoteFailure = 32,
    RemoteRejected = 16,
    Rejected = 8,
    NoMatch = 4,
    NewHead = 2,
    NewTag = 1,
}

impl PushFlag {
    /// All flags, highest bit first.
    pub const ALL: [PushFlag; 11] = [
        PushFlag::Error,
        PushFlag::UpToDate,
        PushFlag::FastForward,
        PushFlag::ForcedUpdate,
        PushFlag::Deleted,
        PushFlag::RemoteFailure,
        PushFlag::RemoteRejected,
        PushFlag::Rejected,
        PushFlag::NoMatch,
        PushFlag::NewHead,
        PushFlag::NewTag,
    ];

    pub fn bit(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            PushFlag::Error => "ERROR",
            PushFlag::UpToDate => "UP_TO_DATE",
            PushFlag::FastForward => "FAST_FORWARD",
            PushFlag::ForcedUpdate => "FORCED_UPDATE",
            PushFlag::Deleted => "DELETED",
            PushFlag::RemoteFailure => "REMOTE_FAILURE",
            PushFlag::RemoteRejected => "REMOTE_REJECTED",
            PushFlag::Rejected => "REJECTED",
            PushFlag::NoMatch => "NO_MATCH",
            PushFlag::NewHead => "NEW_HEAD",
            PushFlag::NewTag => "NEW_TAG",
        }
    }

    /// Flags that mean the remote did not take the update.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            PushFlag::Error
                | PushFlag::RemoteFailure
                | PushFlag::RemoteRejected
                | PushFlag::Rejected
                | PushFlag::NoMatch
        )
    }
}

/// Bit set of [`PushFlag`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PushFlags(pub u16);

impl PushFlags {
    pub fn insert(&mut self, flag: PushFlag) {
        self.0 |= flag.bit();
    }

    pub fn contains(self, flag: PushFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn decode(self) -> Vec<PushFlag> {
        PushFlag::ALL
            .into_iter()
            .filter(|flag| self.contains(*flag))
            .collect()
    }

    pub fn names(self) -> Vec<String> {
        self.decode().into_iter().map(|f| f.name().to_string()).collect()
    }

    pub fn is_failure(self) -> bool {
        self.decode().into_iter().any(PushFlag::is_failure)
    }
}

impl From<PushFlag> for PushFlags {
    fn from(flag: PushFlag) -> Self {
        PushFlags(flag.bit())
    }
}

/// Remote confirmation for one pushed reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResult {
    pub reference: String,
    pub flags: PushFlags,
    /// Human readable detail, such as the remote's rejection message
    pub summary: String,
}

/// Interpret the results of one push.
///
/// An empty result list means the remote never confirmed anything and is a
/// [`MediaError::PushFailure`]. Otherwise the union of all flag names is
/// returned; failure bits are reported, not raised.
pub fn interpret_push(repo: &str, results: &[PushResult]) -> Result<Vec<String>> {
    if results.is_empty() {
        return Err(MediaError::PushFailure {
            repo: repo.to_string(),
        });
    }
    let combined = results
        .iter()
        .fold(PushFlags::default(), |acc, r| PushFlags(acc.0 | r.flags.0));
    Ok(combined.names())
}

/// Transfer phase opcodes reported while pushing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ProgressPhase {
    CheckingOut = 256,
    FindingSources = 128,
    Resolving = 64,
    Receiving = 32,
    Writing = 16,
    Compressing = 8,
    Counting = 4,
    End = 2,
    Begin = 1,
}

impl ProgressPhase {
    pub const ALL: [ProgressPhase; 9] = [
        ProgressPhase::CheckingOut,
        ProgressPhase::FindingSources,
        ProgressPhase::Resolving,
        ProgressPhase::Receiving,
        ProgressPhase::Writing,
        ProgressPhase::Compressing,
        ProgressPhase::Counting,
        ProgressPhase::End,
        ProgressPhase::Begin,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProgressPhase::CheckingOut => "CHECKING_OUT",
            ProgressPhase::FindingSources => "FINDING_SOURCES",
            ProgressPhase::Resolving => "RESOLVING",
            ProgressPhase::Receiving => "RECEIVING",
            ProgressPhase::Writing => "WRITING",
            ProgressPhase::Compressing => "COMPRESSING",
            ProgressPhase::Counting => "COUNTING",
            ProgressPhase::End => "END",
            ProgressPhase::Begin => "BEGIN",
        }
    }

    /// Decode an opcode bit set into phase names.
    pub fn names(op_code: u16) -> Vec<String> {
        Self::ALL
            .into_iter()
            .filter(|p| op_code & (*p as u16) != 0)
            .map(|p| p.name().to_string())
            .collect()
    }
}

/// One progress update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Bit set of [`ProgressPhase`] values
    pub op_code: u16,
    pub items_done: u64,
    pub items_total: u64,
    pub message: String,
}

/// Receives progress while a push runs on a blocking thread.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: Progress);
}

/// Reporter that drops every update.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _progress: Progress) {}
}
