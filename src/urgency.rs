use crate::types::Urgency;

pub const EMERGENCY_KEYWORDS: &[&str] = &[
    "flooding",
    "flood",
    "fire",
    "sewage",
    "burst pipe",
    "water everywhere",
    "smoke",
    "urgent",
    "right now",
    "immediately",
];

/// An explicit urgency value wins outright; without one we fall back to scanning the transcript.
pub fn classify_urgency(explicit: Option<&str>, transcript: &str) -> Urgency {
    if let Some(value) = explicit.map(str::trim).filter(|v| !v.is_empty()) {
        return if value.eq_ignore_ascii_case("emergency") {
            Urgency::Emergency
        } else {
            Urgency::Standard
        };
    }

    let haystack = transcript.to_lowercase();
    if EMERGENCY_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
        Urgency::Emergency
    } else {
        Urgency::Standard
    }
}
