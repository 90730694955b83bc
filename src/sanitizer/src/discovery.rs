//! Read-only issue discovery.
//!
//! One pass loads the valid-ID set of every referenced collection, then scans
//! each managed collection once and tests every reference rule of the policy
//! table against it. Findings are grouped per `(collection, field, issue type)`.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use common::{CollectionName, Document, DocumentStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::{
    self, DERIVED_COUNTERS, DerivedCounter, IssueType, REFERENCE_RULES, ReferenceRule, RiskTier,
};
use crate::references::ReferenceIndex;

/// One grouped finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizationIssue {
    pub collection: CollectionName,
    pub field: String,
    pub issue_type: IssueType,
    pub description: String,
    /// Number of affected documents.
    pub count: usize,
    /// First few affected document IDs, for diagnostics only.
    pub sample_ids: Vec<String>,
    pub risk_tier: RiskTier,
}

#[derive(Debug, Default)]
struct Tally {
    count: usize,
    sample_ids: Vec<String>,
}

impl Tally {
    fn record(&mut self, id: &str, sample_size: usize) {
        self.count += 1;
        if self.sample_ids.len() < sample_size {
            self.sample_ids.push(id.to_string());
        }
    }
}

/// Scans the store for dangling references and drifted counters.
pub struct IssueDiscovery {
    store: Arc<dyn DocumentStore>,
    sample_size: usize,
}

impl IssueDiscovery {
    pub fn new(store: Arc<dyn DocumentStore>, sample_size: usize) -> Self {
        Self { store, sample_size }
    }

    /// Collections that own at least one reference rule, in table order.
    pub fn managed_collections() -> Vec<CollectionName> {
        let mut managed = Vec::new();
        for rule in REFERENCE_RULES {
            if !managed.contains(&rule.collection) {
                managed.push(rule.collection);
            }
        }
        managed
    }

    /// Discover every issue in the store. Never mutates.
    pub async fn discover_all_issues(&self) -> Result<Vec<SanitizationIssue>> {
        let managed = Self::managed_collections();

        tracing::info!(collections = managed.len(), "Starting issue discovery");

        let index = ReferenceIndex::load(
            self.store.as_ref(),
            policy::referenced_collections(managed.iter().copied()),
        )
        .await
        .context("Failed to load valid ID sets")?;

        let mut issues = Vec::new();
        for collection in managed {
            let found = self.discover_in(collection, &index).await?;
            issues.extend(found);
        }

        tracing::info!(
            issues = issues.len(),
            affected = issues.iter().map(|issue| issue.count).sum::<usize>(),
            "Issue discovery complete"
        );

        Ok(issues)
    }

    /// Discover the issues of a single collection.
    pub async fn discover_collection(
        &self,
        collection: CollectionName,
    ) -> Result<Vec<SanitizationIssue>> {
        let index = ReferenceIndex::load(
            self.store.as_ref(),
            policy::referenced_collections([collection]),
        )
        .await
        .context("Failed to load valid ID sets")?;

        self.discover_in(collection, &index).await
    }

    async fn discover_in(
        &self,
        collection: CollectionName,
        index: &ReferenceIndex,
    ) -> Result<Vec<SanitizationIssue>> {
        let documents = self
            .store
            .scan(collection, &policy::projection_for(collection))
            .await
            .with_context(|| format!("Failed to scan {collection}"))?;

        let mut issues = Vec::new();

        for rule in policy::rules_for(collection) {
            let mut tallies: BTreeMap<IssueType, Tally> = BTreeMap::new();
            for document in &documents {
                for issue_type in index.violations(rule, &document.body) {
                    tallies
                        .entry(issue_type)
                        .or_default()
                        .record(&document.id, self.sample_size);
                }
            }

            for (issue_type, tally) in tallies {
                issues.push(SanitizationIssue {
                    collection,
                    field: rule.field.to_string(),
                    issue_type,
                    description: describe_rule(rule, issue_type),
                    count: tally.count,
                    sample_ids: tally.sample_ids,
                    risk_tier: policy::tier_for(collection, rule.field),
                });
            }
        }

        for counter in DERIVED_COUNTERS
            .iter()
            .filter(|counter| counter.collection == collection)
        {
            let mut tally = Tally::default();
            for document in documents.iter().filter(|doc| counter_drifted(counter, doc)) {
                tally.record(&document.id, self.sample_size);
            }

            if tally.count > 0 {
                issues.push(SanitizationIssue {
                    collection,
                    field: counter.field.to_string(),
                    issue_type: IssueType::InvalidField,
                    description: format!(
                        "{} does not match the length of {}",
                        counter.field, counter.source_array
                    ),
                    count: tally.count,
                    sample_ids: tally.sample_ids,
                    risk_tier: counter.tier,
                });
            }
        }

        tracing::info!(
            collection = %collection,
            scanned = documents.len(),
            issues = issues.len(),
            "Scanned collection"
        );

        Ok(issues)
    }
}

fn describe_rule(rule: &ReferenceRule, issue_type: IssueType) -> String {
    let targets = rule
        .target
        .collections()
        .iter()
        .map(CollectionName::as_str)
        .collect::<Vec<_>>()
        .join("/");

    match issue_type {
        IssueType::OrphanedLink => format!(
            "{} link {} points at a missing {}",
            rule.collection, rule.field, targets
        ),
        IssueType::MissingRequiredField => {
            format!("{} has no {} reference", rule.collection, rule.field)
        }
        IssueType::InvalidField => {
            format!("{} {} holds a non-string reference", rule.collection, rule.field)
        }
        _ => format!(
            "{} {} references nonexistent {}",
            rule.collection, rule.field, targets
        ),
    }
}

/// A counter drifts when it is present and differs from its array's length.
fn counter_drifted(counter: &DerivedCounter, document: &Document) -> bool {
    let Some(stored) = document.body.get(counter.field) else {
        return false;
    };
    let actual = match document.body.get(counter.source_array) {
        Some(Value::Array(items)) => items.len() as u64,
        _ => 0,
    };

    match stored {
        Value::Null => false,
        Value::Number(number) => number.as_u64() != Some(actual),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::testing::FixtureBuilder;
    use serde_json::json;

    fn find<'a>(
        issues: &'a [SanitizationIssue],
        collection: CollectionName,
        field: &str,
        issue_type: IssueType,
    ) -> Option<&'a SanitizationIssue> {
        issues.iter().find(|issue| {
            issue.collection == collection && issue.field == field && issue.issue_type == issue_type
        })
    }

    #[tokio::test]
    async fn test_clean_store_has_no_issues() {
        let store = FixtureBuilder::new()
            .users(["U1"])
            .article("A1", "U1")
            .collection("C1", "U1", &[("A1", "U1")], &["U1"])
            .bookmark("B1", "U1", "A1")
            .folder("F1", "U1")
            .link("L1", "U1", "B1", "F1")
            .report("R1", "U1", "U1")
            .audit_log("M1", "U1", "article", "A1")
            .feedback("FB1", None)
            .build()
            .await;

        let issues = IssueDiscovery::new(store, 5)
            .discover_all_issues()
            .await
            .unwrap();
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
    }

    #[tokio::test]
    async fn test_orphans_are_grouped_and_tiered() {
        let store = FixtureBuilder::new()
            .users(["U1"])
            .article("A1", "U1")
            .article("A2", "U9")
            .collection("C1", "U8", &[("A1", "U1"), ("A7", "U1")], &["U1", "U5"])
            .bookmark("B1", "U2", "A1")
            .bookmark("B2", "U3", "A1")
            .report("R1", "U4", "U1")
            .build()
            .await;

        let issues = IssueDiscovery::new(store, 5)
            .discover_all_issues()
            .await
            .unwrap();

        let bookmarks = find(
            &issues,
            CollectionName::Bookmarks,
            "userId",
            IssueType::OrphanedReference,
        )
        .unwrap();
        assert_eq!(bookmarks.count, 2);
        assert_eq!(bookmarks.sample_ids, vec!["B1", "B2"]);
        assert_eq!(bookmarks.risk_tier, RiskTier::SafeAutoFix);

        let creator = find(
            &issues,
            CollectionName::Collections,
            "creatorId",
            IssueType::OrphanedReference,
        )
        .unwrap();
        assert_eq!(creator.risk_tier, RiskTier::ConditionalCleanup);

        let author = find(
            &issues,
            CollectionName::Articles,
            "authorId",
            IssueType::OrphanedReference,
        )
        .unwrap();
        assert_eq!(author.sample_ids, vec!["A2"]);

        let entries = find(
            &issues,
            CollectionName::Collections,
            "entries[].articleId",
            IssueType::OrphanedReference,
        )
        .unwrap();
        assert_eq!(entries.count, 1);

        let reports = find(
            &issues,
            CollectionName::Reports,
            "reporter.id",
            IssueType::OrphanedReference,
        )
        .unwrap();
        assert_eq!(reports.risk_tier, RiskTier::DoNotTouch);

        assert!(
            find(
                &issues,
                CollectionName::Collections,
                "followers[]",
                IssueType::OrphanedReference,
            )
            .is_some()
        );
    }

    #[tokio::test]
    async fn test_issues_follow_policy_order() {
        let store = FixtureBuilder::new()
            .article("A1", "U1")
            .bookmark("B1", "U1", "A1")
            .build()
            .await;

        let issues = IssueDiscovery::new(store, 5)
            .discover_all_issues()
            .await
            .unwrap();
        let order: Vec<_> = issues
            .iter()
            .map(|issue| (issue.collection, issue.field.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (CollectionName::Articles, "authorId"),
                (CollectionName::Bookmarks, "userId"),
            ]
        );
    }

    #[tokio::test]
    async fn test_sample_ids_are_capped() {
        let mut fixtures = FixtureBuilder::new().articles(["A1"]);
        for n in 0..8 {
            fixtures = fixtures.bookmark(&format!("B{n}"), "U9", "A1");
        }
        let store = fixtures.build().await;

        let issues = IssueDiscovery::new(store, 3)
            .discover_all_issues()
            .await
            .unwrap();
        let issue = find(
            &issues,
            CollectionName::Bookmarks,
            "userId",
            IssueType::OrphanedReference,
        )
        .unwrap();
        assert_eq!(issue.count, 8);
        assert_eq!(issue.sample_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_and_malformed_references() {
        let store = FixtureBuilder::new()
            .users(["U1"])
            .articles(["A1"])
            .raw(CollectionName::Bookmarks, "B1", json!({"nuggetId": "A1"}))
            .raw(CollectionName::Bookmarks, "B2", json!({"userId": 17, "nuggetId": "A1"}))
            .feedback("FB1", None)
            .build()
            .await;

        let issues = IssueDiscovery::new(store, 5)
            .discover_all_issues()
            .await
            .unwrap();

        let missing = find(
            &issues,
            CollectionName::Bookmarks,
            "userId",
            IssueType::MissingRequiredField,
        )
        .unwrap();
        assert_eq!(missing.sample_ids, vec!["B1"]);
        let invalid = find(
            &issues,
            CollectionName::Bookmarks,
            "userId",
            IssueType::InvalidField,
        )
        .unwrap();
        assert_eq!(invalid.sample_ids, vec!["B2"]);

        // anonymous feedback is allowed
        assert!(issues.iter().all(|issue| issue.collection != CollectionName::Feedbacks));
    }

    #[tokio::test]
    async fn test_counter_drift_needs_review() {
        let store = FixtureBuilder::new()
            .users(["U1"])
            .article("A1", "U1")
            .raw(
                CollectionName::Collections,
                "C1",
                json!({
                    "creatorId": "U1",
                    "entries": [{"articleId": "A1", "addedByUserId": "U1"}],
                    "validEntriesCount": 4,
                    "followers": ["U1"],
                    "followersCount": 1,
                }),
            )
            .build()
            .await;

        let issues = IssueDiscovery::new(store, 5)
            .discover_all_issues()
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "validEntriesCount");
        assert_eq!(issues[0].issue_type, IssueType::InvalidField);
        assert_eq!(issues[0].risk_tier, RiskTier::ConditionalCleanup);
    }

    #[tokio::test]
    async fn test_discover_single_collection() {
        let store = FixtureBuilder::new()
            .folder("F1", "U9")
            .bookmark("B1", "U9", "A9")
            .build()
            .await;

        let issues = IssueDiscovery::new(store, 5)
            .discover_collection(CollectionName::BookmarkFolders)
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].collection, CollectionName::BookmarkFolders);
    }

    #[test]
    fn test_issue_serializes_camel_case() {
        let issue = SanitizationIssue {
            collection: CollectionName::BookmarkFolderLinks,
            field: "folderId".into(),
            issue_type: IssueType::OrphanedLink,
            description: "x".into(),
            count: 1,
            sample_ids: vec!["L1".into()],
            risk_tier: RiskTier::SafeAutoFix,
        };
        let value = serde_json::to_value(&issue).unwrap();
        assert_eq!(value["collection"], json!("bookmarkfolderlinks"));
        assert_eq!(value["issueType"], json!("orphaned_link"));
        assert_eq!(value["riskTier"], json!("SAFE_AUTO_FIX"));
        assert_eq!(value["sampleIds"], json!(["L1"]));
    }
}
