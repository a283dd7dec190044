//! Keyword detector seam
//!
//! Wake and stop words are recognized by an external model. The pipeline
//! only needs a detector it can feed frames to and reconfigure live.

use std::collections::HashSet;

/// A wake or stop word the provider can recognize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeWordInfo {
    pub id: String,
    pub phrase: String,
    pub trained_languages: Vec<String>,
}

impl WakeWordInfo {
    /// Info whose phrase is derived from the id (`okay_nabu` -> `Okay Nabu`)
    #[must_use]
    pub fn from_id(id: &str) -> Self {
        let phrase = id
            .split(['_', '-'])
            .filter(|w| !w.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_uppercase().chain(chars).collect()
                })
            })
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            id: id.to_string(),
            phrase,
            trained_languages: vec!["en".to_string()],
        }
    }
}

/// A keyword recognized in a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub id: String,
    pub phrase: String,
}

/// Stateful detector fed with consecutive frames
pub trait KeywordDetector: Send {
    /// Replace the set of ids the detector reacts to
    fn set_active(&mut self, ids: &[String]);

    /// Feed one frame; returns every keyword that fired on it
    fn detect(&mut self, frame: &[i16]) -> Vec<Detection>;
}

/// Source of keyword models
pub trait DetectorProvider: Send + Sync {
    /// Every keyword this provider can detect
    fn available(&self) -> Vec<WakeWordInfo>;

    /// New detector with no active keywords
    fn create(&self) -> Box<dyn KeywordDetector>;
}

/// Provider that advertises keywords but never detects them
///
/// Used when no model is installed; wakes then come only from the
/// start-conversation button or the hub.
#[derive(Debug, Clone, Default)]
pub struct PassiveDetectorProvider {
    words: Vec<WakeWordInfo>,
}

impl PassiveDetectorProvider {
    #[must_use]
    pub fn new(ids: &[String]) -> Self {
        Self {
            words: ids.iter().map(|id| WakeWordInfo::from_id(id)).collect(),
        }
    }
}

impl DetectorProvider for PassiveDetectorProvider {
    fn available(&self) -> Vec<WakeWordInfo> {
        self.words.clone()
    }

    fn create(&self) -> Box<dyn KeywordDetector> {
        Box::new(PassiveDetector::default())
    }
}

#[derive(Debug, Default)]
struct PassiveDetector {
    active: HashSet<String>,
}

impl KeywordDetector for PassiveDetector {
    fn set_active(&mut self, ids: &[String]) {
        self.active = ids.iter().cloned().collect();
        tracing::debug!(active = ?self.active, "keyword set updated");
    }

    fn detect(&mut self, _frame: &[i16]) -> Vec<Detection> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrase_from_id() {
        assert_eq!(WakeWordInfo::from_id("okay_nabu").phrase, "Okay Nabu");
        assert_eq!(WakeWordInfo::from_id("hey-jarvis").phrase, "Hey Jarvis");
        assert_eq!(WakeWordInfo::from_id("stop").phrase, "Stop");
    }

    #[test]
    fn test_passive_provider_never_detects() {
        let provider = PassiveDetectorProvider::new(&["okay_nabu".to_string()]);
        assert_eq!(provider.available().len(), 1);

        let mut detector = provider.create();
        detector.set_active(&["okay_nabu".to_string()]);
        assert!(detector.detect(&[i16::MAX; 512]).is_empty());
    }
}
