use crate::profiles::AgentProfile;
use crate::types::OrchestrationRequest;
use std::collections::HashMap;
use tracing::debug;

/// Maps a user request to the agents worth consulting.
///
/// Must be a pure function of the request: scores are in `[0, 1]` and agents
/// absent from the map are treated as irrelevant.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, request: &OrchestrationRequest) -> HashMap<String, f32>;
}

/// Keyword matcher built from agent profiles.
///
/// Each distinct keyword found in the request halves the remaining distance
/// to 1.0, so one hit scores 0.5, two 0.75, three 0.875.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier {
    entries: Vec<(String, Vec<String>)>,
}

impl KeywordClassifier {
    /// Keywords of any length are kept; matching is whole-word, so "hr" never
    /// fires inside "three". Keywords without letters or digits are dropped.
    pub fn from_profiles(profiles: &[AgentProfile]) -> Self {
        let entries = profiles
            .iter()
            .filter(|p| !p.keywords.is_empty())
            .map(|p| {
                let mut keywords = Vec::with_capacity(p.keywords.len());
                for keyword in &p.keywords {
                    let normalized = normalize(keyword);
                    if normalized.trim().is_empty() {
                        debug!(
                            agent = %p.agent_id,
                            keyword = %keyword,
                            "Ignoring keyword with no word characters"
                        );
                    } else {
                        keywords.push(normalized);
                    }
                }
                keywords.sort();
                keywords.dedup();
                (p.agent_id.clone(), keywords)
            })
            .collect();
        Self { entries }
    }

    /// Score free text directly.
    pub fn score_text(&self, text: &str) -> HashMap<String, f32> {
        let haystack = normalize(text);
        self.entries
            .iter()
            .filter_map(|(agent_id, keywords)| {
                let hits = keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
                (hits > 0).then(|| (agent_id.clone(), score_for(hits)))
            })
            .collect()
    }
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, request: &OrchestrationRequest) -> HashMap<String, f32> {
        self.score_text(&request.text)
    }
}

fn score_for(hits: usize) -> f32 {
    let hits = i32::try_from(hits).unwrap_or(i32::MAX);
    1.0 - 0.5f32.powi(hits)
}

/// Lowercase, punctuation to spaces, padded so `contains(" word ")` matches
/// whole words and phrases only.
fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    format!(" {} ", words.join(" "))
}

/// Classifier with fixed scores, independent of the request.
#[derive(Debug, Clone, Default)]
pub struct StaticClassifier {
    scores: HashMap<String, f32>,
}

impl StaticClassifier {
    pub fn new<I, S>(scores: I) -> Self
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        Self {
            scores: scores
                .into_iter()
                .map(|(id, s)| (id.into(), s.clamp(0.0, 1.0)))
                .collect(),
        }
    }
}

impl IntentClassifier for StaticClassifier {
    fn classify(&self, _request: &OrchestrationRequest) -> HashMap<String, f32> {
        self.scores.clone()
    }
}
