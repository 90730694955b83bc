//! Declarative risk policy.
//!
//! Every cross-collection reference the engine knows about is listed once in
//! [`REFERENCE_RULES`]. Discovery classifies findings from this table and each
//! sanitizer asks it before mutating, so detection and repair cannot drift
//! apart.
//!
//! ## Tiers
//!
//! - `SAFE_AUTO_FIX`: the violation lives in a document's own reference or
//!   array; removing it costs no other entity its identity
//! - `CONDITIONAL_CLEANUP`: repair would delete or reassign primary ownership;
//!   surfaced for manual review, never auto-fixed
//! - `DO_NOT_TOUCH`: audit-trail data, surfaced only

use common::CollectionName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Risk classification of a discovered issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    SafeAutoFix,
    ConditionalCleanup,
    DoNotTouch,
}

impl RiskTier {
    pub const ALL: [RiskTier; 3] = [
        RiskTier::SafeAutoFix,
        RiskTier::ConditionalCleanup,
        RiskTier::DoNotTouch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::SafeAutoFix => "SAFE_AUTO_FIX",
            RiskTier::ConditionalCleanup => "CONDITIONAL_CLEANUP",
            RiskTier::DoNotTouch => "DO_NOT_TOUCH",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of integrity violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    OrphanedReference,
    OrphanedLink,
    StaleDocument,
    InvalidField,
    MissingRequiredField,
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueType::OrphanedReference => "orphaned_reference",
            IssueType::OrphanedLink => "orphaned_link",
            IssueType::StaleDocument => "stale_document",
            IssueType::InvalidField => "invalid_field",
            IssueType::MissingRequiredField => "missing_required_field",
        };
        f.write_str(name)
    }
}

/// Where a reference points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget {
    /// Always the same collection.
    Collection(CollectionName),
    /// Chosen per document by the value of a discriminator field.
    /// Unknown discriminator values are not checked.
    ByKind {
        discriminator: &'static str,
        kinds: &'static [(&'static str, CollectionName)],
    },
}

impl RefTarget {
    /// Every collection this target may resolve to.
    pub fn collections(&self) -> Vec<CollectionName> {
        match self {
            RefTarget::Collection(name) => vec![*name],
            RefTarget::ByKind { kinds, .. } => {
                let mut names: Vec<CollectionName> = Vec::new();
                for (_, name) in kinds.iter() {
                    if !names.contains(name) {
                        names.push(*name);
                    }
                }
                names
            }
        }
    }
}

/// One `(collection, field) -> target` reference with its risk tier.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceRule {
    pub collection: CollectionName,
    /// Field path: `a.b` descends into objects, `a[]` iterates an array.
    pub field: &'static str,
    pub target: RefTarget,
    /// Whether an absent value is itself a violation.
    pub required: bool,
    pub tier: RiskTier,
    /// Issue type reported for a dangling value.
    pub orphan_issue: IssueType,
}

impl ReferenceRule {
    /// Top-level document fields a scan must project to evaluate this rule.
    pub fn projected_fields(&self) -> Vec<&'static str> {
        let head = self.field.split('.').next().unwrap_or(self.field);
        let mut fields = vec![head.trim_end_matches("[]")];
        if let RefTarget::ByKind { discriminator, .. } = self.target {
            fields.push(discriminator);
        }
        fields
    }
}

const MODERATION_TARGETS: &[(&str, CollectionName)] = &[
    ("user", CollectionName::Users),
    ("article", CollectionName::Articles),
    ("nugget", CollectionName::Articles),
    ("collection", CollectionName::Collections),
    ("report", CollectionName::Reports),
];

/// The reference policy table, in report order.
pub const REFERENCE_RULES: &[ReferenceRule] = &[
    ReferenceRule {
        collection: CollectionName::Articles,
        field: "authorId",
        target: RefTarget::Collection(CollectionName::Users),
        required: true,
        tier: RiskTier::ConditionalCleanup,
        orphan_issue: IssueType::OrphanedReference,
    },
    ReferenceRule {
        collection: CollectionName::Collections,
        field: "creatorId",
        target: RefTarget::Collection(CollectionName::Users),
        required: true,
        tier: RiskTier::ConditionalCleanup,
        orphan_issue: IssueType::OrphanedReference,
    },
    ReferenceRule {
        collection: CollectionName::Collections,
        field: "entries[].articleId",
        target: RefTarget::Collection(CollectionName::Articles),
        required: true,
        tier: RiskTier::SafeAutoFix,
        orphan_issue: IssueType::OrphanedReference,
    },
    ReferenceRule {
        collection: CollectionName::Collections,
        field: "entries[].addedByUserId",
        target: RefTarget::Collection(CollectionName::Users),
        required: true,
        tier: RiskTier::SafeAutoFix,
        orphan_issue: IssueType::OrphanedReference,
    },
    ReferenceRule {
        collection: CollectionName::Collections,
        field: "followers[]",
        target: RefTarget::Collection(CollectionName::Users),
        required: false,
        tier: RiskTier::SafeAutoFix,
        orphan_issue: IssueType::OrphanedReference,
    },
    ReferenceRule {
        collection: CollectionName::Bookmarks,
        field: "userId",
        target: RefTarget::Collection(CollectionName::Users),
        required: true,
        tier: RiskTier::SafeAutoFix,
        orphan_issue: IssueType::OrphanedReference,
    },
    ReferenceRule {
        collection: CollectionName::Bookmarks,
        field: "nuggetId",
        target: RefTarget::Collection(CollectionName::Articles),
        required: true,
        tier: RiskTier::SafeAutoFix,
        orphan_issue: IssueType::OrphanedReference,
    },
    ReferenceRule {
        collection: CollectionName::BookmarkFolders,
        field: "userId",
        target: RefTarget::Collection(CollectionName::Users),
        required: true,
        tier: RiskTier::SafeAutoFix,
        orphan_issue: IssueType::OrphanedReference,
    },
    ReferenceRule {
        collection: CollectionName::BookmarkFolderLinks,
        field: "userId",
        target: RefTarget::Collection(CollectionName::Users),
        required: true,
        tier: RiskTier::SafeAutoFix,
        orphan_issue: IssueType::OrphanedLink,
    },
    ReferenceRule {
        collection: CollectionName::BookmarkFolderLinks,
        field: "bookmarkId",
        target: RefTarget::Collection(CollectionName::Bookmarks),
        required: true,
        tier: RiskTier::SafeAutoFix,
        orphan_issue: IssueType::OrphanedLink,
    },
    ReferenceRule {
        collection: CollectionName::BookmarkFolderLinks,
        field: "folderId",
        target: RefTarget::Collection(CollectionName::BookmarkFolders),
        required: true,
        tier: RiskTier::SafeAutoFix,
        orphan_issue: IssueType::OrphanedLink,
    },
    ReferenceRule {
        collection: CollectionName::Reports,
        field: "reporter.id",
        target: RefTarget::Collection(CollectionName::Users),
        required: true,
        tier: RiskTier::DoNotTouch,
        orphan_issue: IssueType::OrphanedReference,
    },
    ReferenceRule {
        collection: CollectionName::Reports,
        field: "respondent.id",
        target: RefTarget::Collection(CollectionName::Users),
        required: true,
        tier: RiskTier::DoNotTouch,
        orphan_issue: IssueType::OrphanedReference,
    },
    ReferenceRule {
        collection: CollectionName::ModerationAuditLogs,
        field: "actorId",
        target: RefTarget::Collection(CollectionName::Users),
        required: true,
        tier: RiskTier::DoNotTouch,
        orphan_issue: IssueType::OrphanedReference,
    },
    ReferenceRule {
        collection: CollectionName::ModerationAuditLogs,
        field: "targetId",
        target: RefTarget::ByKind {
            discriminator: "targetType",
            kinds: MODERATION_TARGETS,
        },
        required: true,
        tier: RiskTier::DoNotTouch,
        orphan_issue: IssueType::OrphanedReference,
    },
    // Anonymous feedback is allowed; attributed feedback is never rewritten
    ReferenceRule {
        collection: CollectionName::Feedbacks,
        field: "user.id",
        target: RefTarget::Collection(CollectionName::Users),
        required: false,
        tier: RiskTier::ConditionalCleanup,
        orphan_issue: IssueType::OrphanedReference,
    },
];

/// A stored count that must equal the length of an array on the same document.
#[derive(Debug, Clone, Copy)]
pub struct DerivedCounter {
    pub collection: CollectionName,
    pub field: &'static str,
    pub source_array: &'static str,
    pub tier: RiskTier,
}

/// Derived counters are rewritten only alongside their arrays, so drift on its
/// own needs review.
pub const DERIVED_COUNTERS: &[DerivedCounter] = &[
    DerivedCounter {
        collection: CollectionName::Collections,
        field: "validEntriesCount",
        source_array: "entries",
        tier: RiskTier::ConditionalCleanup,
    },
    DerivedCounter {
        collection: CollectionName::Collections,
        field: "followersCount",
        source_array: "followers",
        tier: RiskTier::ConditionalCleanup,
    },
];

/// Look up the rule for a `(collection, field)` pair.
pub fn rule(collection: CollectionName, field: &str) -> Option<&'static ReferenceRule> {
    REFERENCE_RULES
        .iter()
        .find(|rule| rule.collection == collection && rule.field == field)
}

/// Rules owned by one collection, in table order.
pub fn rules_for(collection: CollectionName) -> impl Iterator<Item = &'static ReferenceRule> {
    REFERENCE_RULES
        .iter()
        .filter(move |rule| rule.collection == collection)
}

/// Risk tier of a `(collection, field)` pair.
///
/// Audit-trail collections are `DO_NOT_TOUCH` whatever the field; pairs
/// missing from the table fall back to `CONDITIONAL_CLEANUP`.
pub fn tier_for(collection: CollectionName, field: &str) -> RiskTier {
    if collection.is_audit_trail() {
        return RiskTier::DoNotTouch;
    }

    rule(collection, field)
        .map(|rule| rule.tier)
        .or_else(|| {
            DERIVED_COUNTERS
                .iter()
                .find(|counter| counter.collection == collection && counter.field == field)
                .map(|counter| counter.tier)
        })
        .unwrap_or(RiskTier::ConditionalCleanup)
}

/// Whether a sanitizer may repair violations of this pair on its own.
pub fn is_auto_fixable(collection: CollectionName, field: &str) -> bool {
    tier_for(collection, field) == RiskTier::SafeAutoFix
}

/// Collections whose ID sets are needed to evaluate rules of `collections`.
pub fn referenced_collections(
    collections: impl IntoIterator<Item = CollectionName>,
) -> BTreeSet<CollectionName> {
    collections
        .into_iter()
        .flat_map(rules_for)
        .flat_map(|rule| rule.target.collections())
        .collect()
}

/// Top-level fields to project when scanning `collection` for its rules.
pub fn projection_for(collection: CollectionName) -> Vec<&'static str> {
    let mut fields: Vec<&'static str> = rules_for(collection)
        .flat_map(|rule| rule.projected_fields())
        .chain(
            DERIVED_COUNTERS
                .iter()
                .filter(|counter| counter.collection == collection)
                .flat_map(|counter| [counter.field, counter.source_array]),
        )
        .collect();
    fields.sort_unstable();
    fields.dedup();
    fields
}
