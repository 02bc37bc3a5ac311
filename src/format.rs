use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const FALLBACK_FORMAT: &str = "bestvideo+bestaudio/best";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    P144,
    P360,
    P480,
    P720,
    P1080,
    K4,
    AudioM4a,
    AudioWebm,
    /// A label outside the known set. Accepted, and resolved to the fallback.
    Unrecognized(String),
}

impl QualityTier {
    pub const ALL: [QualityTier; 8] = [
        QualityTier::P144,
        QualityTier::P360,
        QualityTier::P480,
        QualityTier::P720,
        QualityTier::P1080,
        QualityTier::K4,
        QualityTier::AudioM4a,
        QualityTier::AudioWebm,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            QualityTier::P144 => "144p",
            QualityTier::P360 => "360p",
            QualityTier::P480 => "480p",
            QualityTier::P720 => "720p",
            QualityTier::P1080 => "1080p",
            QualityTier::K4 => "4K",
            QualityTier::AudioM4a => "audio-only-m4a",
            QualityTier::AudioWebm => "audio-only-webm",
            QualityTier::Unrecognized(label) => label.as_str(),
        }
    }

    pub fn parse(label: &str) -> Self {
        let trimmed = label.trim();
        let key: String = trimmed
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match key.as_str() {
            "144p" | "144" => QualityTier::P144,
            "360p" | "360" => QualityTier::P360,
            "480p" | "480" => QualityTier::P480,
            "720p" | "720" => QualityTier::P720,
            "1080p" | "1080" => QualityTier::P1080,
            "4k" | "2160p" | "2160" => QualityTier::K4,
            "audioonlym4a" | "audiom4a" | "m4a" | "voiceonlym4a" => QualityTier::AudioM4a,
            "audioonlywebm" | "audiowebm" | "webm" | "voiceonlywebm" => QualityTier::AudioWebm,
            _ => QualityTier::Unrecognized(trimmed.to_string()),
        }
    }

    pub fn is_audio_only(&self) -> bool {
        matches!(self, QualityTier::AudioM4a | QualityTier::AudioWebm)
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn resolve(tier: &QualityTier) -> &'static str {
    match tier {
        QualityTier::P144 => "160+140/best",
        QualityTier::P360 => "18/best",
        QualityTier::P480 => "135+140/best",
        QualityTier::P720 => "22/best",
        QualityTier::P1080 => "137+140/best",
        QualityTier::K4 => "313+251/best",
        QualityTier::AudioM4a => "140",
        QualityTier::AudioWebm => "251",
        QualityTier::Unrecognized(_) => FALLBACK_FORMAT,
    }
}

#[derive(Debug, Clone, Default)]
pub struct FormatPolicy {
    overrides: BTreeMap<String, String>,
}

impl FormatPolicy {
    pub fn new(overrides: BTreeMap<String, String>) -> Self {
        let overrides = overrides
            .into_iter()
            .filter_map(|(label, expr)| {
                let expr = expr.trim().to_string();
                if expr.is_empty() {
                    return None;
                }
                Some((QualityTier::parse(&label).as_str().to_string(), expr))
            })
            .collect();
        Self { overrides }
    }

    pub fn resolve(&self, tier: &QualityTier) -> String {
        self.overrides
            .get(tier.as_str())
            .cloned()
            .unwrap_or_else(|| resolve(tier).to_string())
    }

    pub fn table(&self) -> Vec<(QualityTier, String)> {
        QualityTier::ALL
            .iter()
            .map(|tier| (tier.clone(), self.resolve(tier)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_tier_has_a_stable_non_empty_expression() {
        for tier in QualityTier::ALL.iter() {
            let first = resolve(tier);
            assert!(!first.is_empty(), "{tier} resolved to an empty expression");
            assert_eq!(first, resolve(tier));
            assert_ne!(first, FALLBACK_FORMAT, "{tier} should not use the fallback");
        }
        assert_eq!(resolve(&QualityTier::P720), "22/best");
        assert_eq!(resolve(&QualityTier::AudioWebm), "251");
    }

    #[test]
    fn unknown_labels_resolve_to_fallback() {
        for label in ["8K", "", "best please", "صوت فقط"] {
            let tier = QualityTier::parse(label);
            assert!(matches!(tier, QualityTier::Unrecognized(_)), "{label}");
            assert_eq!(resolve(&tier), FALLBACK_FORMAT);
        }
    }

    #[test]
    fn parse_accepts_common_spellings() {
        assert_eq!(QualityTier::parse("720p"), QualityTier::P720);
        assert_eq!(QualityTier::parse(" 4k "), QualityTier::K4);
        assert_eq!(QualityTier::parse("2160p"), QualityTier::K4);
        assert_eq!(QualityTier::parse("Voice Only (m4a)"), QualityTier::AudioM4a);
        assert_eq!(QualityTier::parse("audio-only-webm"), QualityTier::AudioWebm);
        for tier in QualityTier::ALL.iter() {
            assert_eq!(&QualityTier::parse(tier.as_str()), tier);
        }
    }

    #[test]
    fn overrides_win_over_table_and_ignore_blank_values() {
        let mut overrides = BTreeMap::new();
        overrides.insert("720P".to_string(), "136+140/22".to_string());
        overrides.insert("1080p".to_string(), "   ".to_string());
        let policy = FormatPolicy::new(overrides);

        assert_eq!(policy.resolve(&QualityTier::P720), "136+140/22");
        assert_eq!(policy.resolve(&QualityTier::P1080), "137+140/best");
        assert_eq!(
            policy.resolve(&QualityTier::Unrecognized("x".to_string())),
            FALLBACK_FORMAT
        );
    }
}
