use serde::{Deserialize, Serialize};

/// Closed catalog of distribution channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelId {
    Linkedin,
    X,
    Facebook,
    Instagram,
    Tiktok,
    GoogleJobs,
    Indeed,
}

impl ChannelId {
    pub const ALL: [ChannelId; 7] = [
        ChannelId::Linkedin,
        ChannelId::X,
        ChannelId::Facebook,
        ChannelId::Instagram,
        ChannelId::Tiktok,
        ChannelId::GoogleJobs,
        ChannelId::Indeed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelId::Linkedin => "LINKEDIN",
            ChannelId::X => "X",
            ChannelId::Facebook => "FACEBOOK",
            ChannelId::Instagram => "INSTAGRAM",
            ChannelId::Tiktok => "TIKTOK",
            ChannelId::GoogleJobs => "GOOGLE_JOBS",
            ChannelId::Indeed => "INDEED",
        }
    }

    /// Map a free-form provider-emitted identifier onto the catalog.
    /// Unmapped tokens return `None` and are dropped by callers.
    pub fn from_token(input: &str) -> Option<ChannelId> {
        match normalize_channel_token(input).as_str() {
            "linkedin" | "linked_in" => Some(ChannelId::Linkedin),
            "x" | "twitter" | "x_twitter" => Some(ChannelId::X),
            "facebook" | "meta" => Some(ChannelId::Facebook),
            "instagram" | "ig" => Some(ChannelId::Instagram),
            "tiktok" | "tik_tok" => Some(ChannelId::Tiktok),
            "google_jobs" | "google" => Some(ChannelId::GoogleJobs),
            "indeed" => Some(ChannelId::Indeed),
            _ => None,
        }
    }
}

/// Lowercase and collapse runs of non-alphanumerics to a single `_`.
pub fn normalize_channel_token(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_sep = false;
    for ch in input.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecommendation {
    pub channel: ChannelId,
    pub reason: String,
    #[serde(rename = "expectedCPA", skip_serializing_if = "Option::is_none")]
    pub expected_cpa: Option<f64>,
}

/// Keep first occurrence per channel, preserving order.
pub fn dedupe_recommendations(recs: Vec<ChannelRecommendation>) -> Vec<ChannelRecommendation> {
    let mut seen = std::collections::HashSet::new();
    recs.into_iter()
        .filter(|rec| seen.insert(rec.channel))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_separator_runs() {
        assert_eq!(normalize_channel_token("LinkedIn  Jobs!"), "linkedin_jobs");
        assert_eq!(normalize_channel_token("--TikTok--"), "tiktok");
        assert_eq!(normalize_channel_token("google.jobs"), "google_jobs");
    }

    #[test]
    fn from_token_maps_aliases_and_drops_unknowns() {
        assert_eq!(ChannelId::from_token("Linked-In"), Some(ChannelId::Linkedin));
        assert_eq!(ChannelId::from_token("twitter"), Some(ChannelId::X));
        assert_eq!(ChannelId::from_token("myspace"), None);
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let recs = vec![
            ChannelRecommendation {
                channel: ChannelId::Linkedin,
                reason: "tech reach".to_string(),
                expected_cpa: Some(42.0),
            },
            ChannelRecommendation {
                channel: ChannelId::Linkedin,
                reason: "dup".to_string(),
                expected_cpa: None,
            },
            ChannelRecommendation {
                channel: ChannelId::X,
                reason: "fast".to_string(),
                expected_cpa: None,
            },
        ];
        let deduped = dedupe_recommendations(recs);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].reason, "tech reach");
        assert_eq!(deduped[1].channel, ChannelId::X);
    }

    #[test]
    fn channel_serializes_screaming_snake() {
        let serialized = serde_json::to_string(&ChannelId::GoogleJobs).expect("serialize");
        assert_eq!(serialized, "\"GOOGLE_JOBS\"");
    }
}
