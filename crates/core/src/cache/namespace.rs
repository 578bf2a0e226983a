//! Cache namespaces and their fixed time-to-live values.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Namespace an entry belongs to; decides TTL and persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    /// Routing decisions and pipeline results (1h)
    Routing,
    /// Instruction to handler resolutions (24h, persisted)
    SkillResolution,
    /// File metadata lookups (5min)
    FileMetadata,
    /// Static audit results (30min)
    AuditResult,
    /// External documentation lookups (6h)
    DocLookup,
    /// Patterns learned from past runs (7d, persisted)
    LearnedPattern,
}

impl CacheNamespace {
    pub const ALL: [CacheNamespace; 6] = [
        Self::Routing,
        Self::SkillResolution,
        Self::FileMetadata,
        Self::AuditResult,
        Self::DocLookup,
        Self::LearnedPattern,
    ];

    pub fn ttl(&self) -> Duration {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        match self {
            Self::Routing => Duration::from_secs(HOUR),
            Self::SkillResolution => Duration::from_secs(24 * HOUR),
            Self::FileMetadata => Duration::from_secs(5 * MINUTE),
            Self::AuditResult => Duration::from_secs(30 * MINUTE),
            Self::DocLookup => Duration::from_secs(6 * HOUR),
            Self::LearnedPattern => Duration::from_secs(7 * 24 * HOUR),
        }
    }

    /// Only long-lived namespaces survive a restart
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::SkillResolution | Self::LearnedPattern)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::SkillResolution => "skill_resolution",
            Self::FileMetadata => "file_metadata",
            Self::AuditResult => "audit_result",
            Self::DocLookup => "doc_lookup",
            Self::LearnedPattern => "learned_pattern",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ns| ns.as_str() == s)
    }
}
