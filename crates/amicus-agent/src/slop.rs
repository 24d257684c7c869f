//! AI-slop detector (§4.E) — a pure, deterministic scorer that flags the
//! stock tells of machine-generated chat text (hedging intros, rule-of-three
//! lists, em-dash overuse, forced enthusiasm) before a draft ever reaches a
//! human.

use once_cell::sync::Lazy;
use regex::Regex;

/// Weighted regex category. First match in a category scores `weight`;
/// every subsequent match in the same category scores `weight / 2` (§4.E).
struct SlopCategory {
    name: &'static str,
    weight: f64,
    patterns: Vec<Regex>,
}

static CATEGORIES: Lazy<Vec<SlopCategory>> = Lazy::new(|| {
    vec![
        SlopCategory {
            name: "vacuous_excitement",
            weight: 1.5,
            patterns: compile(&[
                r"(?i)\bi'd be (happy|delighted|thrilled) to\b",
                r"(?i)\bgreat question\b",
                r"(?i)\babsolutely[!.]",
                r"(?i)\bwhat an? (great|excellent|fantastic) (idea|question|point)\b",
            ]),
        },
        SlopCategory {
            name: "restate_intro",
            weight: 1.0,
            patterns: compile(&[
                r"(?i)^so,? you('re| are) (asking|wondering|saying)\b",
                r"(?i)^(to answer your question|in response to what you said)\b",
                r"(?i)^it sounds like you('re| are)\b",
            ]),
        },
        SlopCategory {
            name: "sycophantic",
            weight: 1.5,
            patterns: compile(&[
                r"(?i)\byou('re| are) (absolutely|so) right\b",
                r"(?i)\bwhat a (great|wonderful|fantastic) (observation|point|question)\b",
                r"(?i)\bi (love|really like) (that|this) (idea|question)\b",
            ]),
        },
        SlopCategory {
            name: "assistant_energy",
            weight: 1.5,
            patterns: compile(&[
                r"(?i)\bas an ai\b",
                r"(?i)\bi('m| am) (just|only) an? (ai|language model|assistant)\b",
                r"(?i)\bi don't have (personal )?(feelings|opinions|experiences)\b",
                r"(?i)\blet me know if (there's|there is) anything else\b",
                r"(?i)\bfeel free to (ask|reach out)\b",
            ]),
        },
        SlopCategory {
            name: "rule_of_three",
            weight: 1.0,
            patterns: compile(&[
                r"(?i)\b\w+, \w+, and \w+\b.{0,20}(respectively|each|all)\b",
            ]),
        },
        SlopCategory {
            name: "structural_tell",
            weight: 1.5,
            patterns: compile(&[
                r"(?m)^\s*[-*]\s+\*\*[^*]+\*\*:",
                r"(?m)^#{1,3}\s",
                r"(?i)\bin (summary|conclusion)\b",
                r"(?i)\bfirst(ly)?,.*second(ly)?,.*(third(ly)?|finally)\b",
            ]),
        },
        SlopCategory {
            name: "meta_commentary",
            weight: 1.5,
            patterns: compile(&[
                r"(?i)\bas (an ai |a language model )?i (cannot|can't|don't) (have|form|hold) (personal )?(opinions|beliefs)\b",
                r"(?i)\bi want to (be|make sure i('m| am)) (clear|transparent)\b",
                r"(?i)\bto be (clear|transparent|fully transparent)\b",
            ]),
        },
        SlopCategory {
            name: "forced_enthusiasm",
            weight: 1.0,
            patterns: compile(&[r"(?i)\b(yay|woohoo|amazing news|exciting news)\b"]),
        },
    ]
});

static EMOJI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{1F300}-\u{1FAFF}\u{2600}-\u{27BF}]").expect("valid regex"));

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("valid slop regex"))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlopReport {
    pub score: f64,
    pub violations: Vec<String>,
    pub is_slop: bool,
}

const SLOP_THRESHOLD: f64 = 4.0;
const EMOJI_PENALTY: f64 = 1.0;
const EM_DASH_PENALTY: f64 = 1.5;
const EM_DASH_THRESHOLD: usize = 3;
const ANTI_PATTERN_PENALTY: f64 = 3.0;

/// Score `text` for AI-slop tells (§4.E). `identity_anti_patterns` are
/// operator-configured phrases this persona specifically must never say —
/// any case-insensitive substring match is a strong penalty regardless of
/// the built-in categories.
pub fn check_slop(text: &str, identity_anti_patterns: &[String]) -> SlopReport {
    let mut score = 0.0;
    let mut violations = Vec::new();

    for category in CATEGORIES.iter() {
        let mut hits = 0u32;
        for pattern in &category.patterns {
            hits += pattern.find_iter(text).count() as u32;
        }
        if hits == 0 {
            continue;
        }
        score += category.weight + (hits.saturating_sub(1) as f64) * (category.weight / 2.0);
        violations.push(category.name.to_string());
    }

    let em_dash_count = text.matches('—').count() + text.matches("--").count();
    if em_dash_count >= EM_DASH_THRESHOLD {
        score += EM_DASH_PENALTY;
        violations.push("em_dash_overuse".to_string());
    }

    if EMOJI.is_match(text) {
        score += EMOJI_PENALTY;
        violations.push("emoji_in_text".to_string());
    }

    let lower = text.to_lowercase();
    for pattern in identity_anti_patterns {
        if !pattern.is_empty() && lower.contains(&pattern.to_lowercase()) {
            score += ANTI_PATTERN_PENALTY;
            violations.push(format!("identity_anti_pattern:{pattern}"));
        }
    }

    SlopReport {
        score,
        violations,
        is_slop: score >= SLOP_THRESHOLD,
    }
}

/// Clip `text` to `max_chars`, preferring a word boundary in the last 40% of
/// the window, falling back to a hard mid-token cut; always trims trailing
/// whitespace (§4.E).
pub fn enforce_max_length(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.trim_end().to_string();
    }

    let chars: Vec<char> = text.chars().collect();
    let window_start = (max_chars as f64 * 0.6).floor() as usize;
    let window = &chars[window_start.min(max_chars)..max_chars];

    let cut = window
        .iter()
        .rposition(|c| c.is_whitespace())
        .map(|idx| window_start + idx);

    let clipped: String = match cut {
        Some(idx) => chars[..idx].iter().collect(),
        None => chars[..max_chars].iter().collect(),
    };

    clipped.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_scores_zero() {
        let report = check_slop("The bus leaves at 6, grab your coat.", &[]);
        assert_eq!(report.score, 0.0);
        assert!(!report.is_slop);
    }

    #[test]
    fn assistant_energy_phrase_flags_slop() {
        let report = check_slop(
            "As an AI, I don't have personal feelings, but let me know if there's anything else!",
            &[],
        );
        assert!(report.score > 0.0);
        assert!(report.violations.contains(&"assistant_energy".to_string()));
    }

    #[test]
    fn repeated_category_hits_score_half_after_first() {
        let report = check_slop("Great question! What a great question indeed.", &[]);
        // two hits in vacuous_excitement: 1.5 + 0.75 = 2.25
        assert!((report.score - 2.25).abs() < 1e-9);
    }

    #[test]
    fn em_dash_overuse_penalized() {
        let report = check_slop("one — two — three — four", &[]);
        assert!(report.violations.contains(&"em_dash_overuse".to_string()));
    }

    #[test]
    fn emoji_in_body_penalized() {
        let report = check_slop("Sounds good 🎉 let's do it", &[]);
        assert!(report.violations.contains(&"emoji_in_text".to_string()));
    }

    #[test]
    fn identity_anti_pattern_substring_match() {
        let report = check_slop(
            "I'm here to assist you with whatever you need.",
            &["here to assist".to_string()],
        );
        assert!(report
            .violations
            .iter()
            .any(|v| v.starts_with("identity_anti_pattern")));
        assert!(report.score >= ANTI_PATTERN_PENALTY);
    }

    #[test]
    fn combined_violations_cross_threshold() {
        let report = check_slop(
            "Absolutely! As an AI, I don't have personal feelings. Let me know if there's anything else!",
            &[],
        );
        assert!(report.is_slop);
    }

    #[test]
    fn enforce_max_length_noop_under_limit() {
        assert_eq!(enforce_max_length("short text", 100), "short text");
    }

    #[test]
    fn enforce_max_length_clips_at_word_boundary() {
        let text = "a".repeat(50) + " " + &"b".repeat(50);
        let clipped = enforce_max_length(&text, 60);
        assert!(!clipped.ends_with('b'));
        assert!(clipped.len() <= 60);
    }

    #[test]
    fn enforce_max_length_hard_cuts_when_no_whitespace() {
        let text = "a".repeat(100);
        let clipped = enforce_max_length(&text, 40);
        assert_eq!(clipped.chars().count(), 40);
    }

    #[test]
    fn enforce_max_length_trims_trailing_whitespace() {
        let text = format!("{}   {}", "x".repeat(30), "y".repeat(30));
        let clipped = enforce_max_length(&text, 33);
        assert!(!clipped.ends_with(' '));
    }
}
