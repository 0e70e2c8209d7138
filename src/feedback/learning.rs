//! Turns feedback history into confidence adjustments and preferences.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::store::FeedbackStore;
use super::{FeedbackEntry, FeedbackError, FeedbackKind};
use crate::decision::{DecisionContext, LlmDecision};

/// Approval rate used when there is no history.
const NEUTRAL_RATE: f64 = 0.5;
const LOW_APPROVAL: f64 = 0.3;
const HIGH_APPROVAL: f64 = 0.8;
/// Preferences at or above this confidence can veto a decision.
const STRONG_PREFERENCE: f64 = 0.7;
/// Evidence needed before a preference reaches full confidence.
const FULL_EVIDENCE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceKind {
    /// Rejects automation outside working hours.
    WorkingHours,
    /// Corrects generated branch names to a consistent prefix.
    BranchNaming,
    /// Approves (or rejects) automated commits consistently.
    CommitFrequency,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserPreference {
    pub kind: PreferenceKind,
    pub description: String,
    pub confidence: f64,
    pub evidence: Vec<String>,
}

/// What history says about a proposed decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalContext {
    pub similar_count: usize,
    pub approval_rate: f64,
    pub common_corrections: Vec<String>,
    /// Set when history agrees on exactly one correction for this action.
    pub adjusted_action: Option<String>,
    pub preferences: Vec<UserPreference>,
    pub should_proceed: bool,
    pub suggested_confidence: f64,
    pub reasoning: Vec<String>,
}

pub struct LearningEngine {
    min_similar: usize,
    cache: RefCell<HashMap<PathBuf, Vec<UserPreference>>>,
}

impl LearningEngine {
    pub fn new(min_similar: usize) -> Self {
        Self {
            min_similar,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn analyze(
        &self,
        store: &FeedbackStore,
        decision: &LlmDecision,
        ctx: &DecisionContext,
    ) -> HistoricalContext {
        let similar = store.similar(
            &ctx.trigger.project_path,
            &ctx.project.branch,
            ctx.trigger.event_type,
        );
        let approval_rate = approval_rate(&similar);
        let common_corrections = common_corrections(&similar, &decision.action);
        let adjusted_action = match common_corrections.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };
        let preferences = self.preferences_for(store, &ctx.trigger.project_path);

        let mut reasoning = Vec::new();
        let mut should_proceed = true;
        let mut suggested = decision.confidence;
        let enough_history = similar.len() >= self.min_similar;

        if enough_history && approval_rate < LOW_APPROVAL {
            should_proceed = false;
            suggested *= 0.5;
            reasoning.push(format!(
                "only {:.0}% of {} similar decisions were approved",
                approval_rate * 100.0,
                similar.len()
            ));
        } else if enough_history && approval_rate > HIGH_APPROVAL {
            suggested = (suggested * 1.2).min(1.0);
            reasoning.push(format!(
                "{:.0}% of {} similar decisions were approved",
                approval_rate * 100.0,
                similar.len()
            ));
        }

        match common_corrections.as_slice() {
            [] => {}
            [only] => reasoning.push(format!("'{}' was usually corrected to '{only}'", decision.action)),
            many => reasoning.push(format!(
                "'{}' was corrected to several actions ({})",
                decision.action,
                many.join(", ")
            )),
        }

        let outside_hours = ctx.time_of_day.is_some_and(|t| !t.is_working_hours);
        if outside_hours
            && preferences
                .iter()
                .any(|p| p.kind == PreferenceKind::WorkingHours && p.confidence > STRONG_PREFERENCE)
        {
            should_proceed = false;
            reasoning.push("user prefers no automation outside working hours".to_string());
        }

        HistoricalContext {
            similar_count: similar.len(),
            approval_rate,
            common_corrections,
            adjusted_action,
            preferences,
            should_proceed,
            suggested_confidence: suggested.clamp(0.0, 1.0),
            reasoning,
        }
    }

    /// Confidence after weighing history, always within 0.1..=1.0.
    pub fn adjust_confidence(
        &self,
        store: &FeedbackStore,
        decision: &LlmDecision,
        ctx: &DecisionContext,
    ) -> f64 {
        let history = self.analyze(store, decision, ctx);
        let mut confidence = decision.confidence;
        if history.similar_count >= self.min_similar {
            confidence *= 0.5 + 0.5 * history.approval_rate;
        }
        if !history.common_corrections.is_empty() {
            confidence *= 0.8;
        }
        if !history.preferences.is_empty() {
            let avg = history.preferences.iter().map(|p| p.confidence).sum::<f64>()
                / history.preferences.len() as f64;
            confidence *= 0.7 + 0.3 * avg;
        }
        if confidence.is_nan() {
            return 0.1;
        }
        confidence.clamp(0.1, 1.0)
    }

    /// Preferences derived from one project's history. Cached until feedback
    /// for that project changes.
    pub fn preferences_for(&self, store: &FeedbackStore, project: &Path) -> Vec<UserPreference> {
        if let Some(cached) = self.cache.borrow().get(project) {
            return cached.clone();
        }
        let entries = store.for_project(project);
        let prefs: Vec<UserPreference> = [
            working_hours_preference(&entries),
            branch_naming_preference(&entries),
            commit_frequency_preference(&entries),
        ]
        .into_iter()
        .flatten()
        .collect();
        self.cache.borrow_mut().insert(project.to_path_buf(), prefs.clone());
        prefs
    }

    /// Drop cached preferences for `project`.
    pub fn invalidate(&self, project: &Path) {
        self.cache.borrow_mut().remove(project);
    }

    pub fn learn_from_correction(&self, entry: &FeedbackEntry) -> Result<(), FeedbackError> {
        self.invalidate(&entry.project_path);
        let corrected = entry
            .feedback
            .corrected_action
            .as_deref()
            .ok_or_else(|| FeedbackError::MissingCorrection(entry.id.clone()))?;
        tracing::info!(
            project = %entry.project_path.display(),
            from = %entry.decision.action,
            to = corrected,
            "learned correction"
        );
        Ok(())
    }
}

fn approval_rate(entries: &[&FeedbackEntry]) -> f64 {
    let approved = entries.iter().filter(|e| e.feedback.kind.is_approval()).count();
    let judged = entries.len();
    if judged == 0 {
        NEUTRAL_RATE
    } else {
        approved as f64 / judged as f64
    }
}

/// Distinct corrections of `action`, most frequent first.
fn common_corrections(entries: &[&FeedbackEntry], action: &str) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for entry in entries {
        if entry.feedback.kind == FeedbackKind::Correction
            && entry.decision.action == action
            && let Some(ref corrected) = entry.feedback.corrected_action
        {
            *counts.entry(corrected.clone()).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.into_iter().map(|(action, _)| action).collect()
}

fn evidence_weight(n: usize) -> f64 {
    (n as f64 / FULL_EVIDENCE as f64).min(1.0)
}

fn working_hours_preference(entries: &[&FeedbackEntry]) -> Option<UserPreference> {
    let outside: Vec<&&FeedbackEntry> = entries
        .iter()
        .filter(|e| e.context.time_of_day.is_some_and(|t| !t.is_working_hours))
        .collect();
    if outside.len() < 2 {
        return None;
    }
    let rejected = outside
        .iter()
        .filter(|e| e.feedback.kind == FeedbackKind::Rejection)
        .count();
    let rejection_rate = rejected as f64 / outside.len() as f64;
    if rejection_rate < 0.5 {
        return None;
    }
    Some(UserPreference {
        kind: PreferenceKind::WorkingHours,
        description: "Avoid automation outside working hours".to_string(),
        confidence: rejection_rate * evidence_weight(outside.len()),
        evidence: vec![format!(
            "{rejected} of {} decisions outside working hours were rejected",
            outside.len()
        )],
    })
}

fn branch_naming_preference(entries: &[&FeedbackEntry]) -> Option<UserPreference> {
    let names: Vec<&str> = entries
        .iter()
        .filter(|e| e.decision.action == "branch" && e.feedback.kind == FeedbackKind::Correction)
        .filter_map(|e| e.feedback.user_action.as_deref())
        .collect();
    if names.len() < 2 {
        return None;
    }
    let mut prefixes: BTreeMap<&str, usize> = BTreeMap::new();
    for name in &names {
        if let Some((prefix, _)) = name.split_once('/') {
            *prefixes.entry(prefix).or_insert(0) += 1;
        }
    }
    let (prefix, count) = prefixes.into_iter().max_by_key(|(_, c)| *c)?;
    if count < 2 {
        return None;
    }
    Some(UserPreference {
        kind: PreferenceKind::BranchNaming,
        description: format!("Names branches '{prefix}/...'"),
        confidence: (count as f64 / names.len() as f64) * evidence_weight(names.len()),
        evidence: names.iter().map(|n| format!("renamed branch to {n}")).collect(),
    })
}

fn commit_frequency_preference(entries: &[&FeedbackEntry]) -> Option<UserPreference> {
    let commits: Vec<&&FeedbackEntry> = entries
        .iter()
        .filter(|e| matches!(e.decision.action.as_str(), "commit" | "checkpoint"))
        .collect();
    if commits.len() < 3 {
        return None;
    }
    let approved = commits.iter().filter(|e| e.feedback.kind.is_approval()).count();
    let rate = approved as f64 / commits.len() as f64;
    let (description, strength) = if rate >= 0.7 {
        ("Welcomes frequent automated commits", rate)
    } else if rate <= LOW_APPROVAL {
        ("Prefers fewer automated commits", 1.0 - rate)
    } else {
        return None;
    };
    Some(UserPreference {
        kind: PreferenceKind::CommitFrequency,
        description: description.to_string(),
        confidence: strength * evidence_weight(commits.len()),
        evidence: vec![format!("{approved} of {} commit decisions approved", commits.len())],
    })
}
