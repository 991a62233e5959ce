use data_model::CensorshipLevel;

pub const CENSORSHIP: &str = "censorship";
pub const VIOLENCE: &str = "violence";
pub const DEMOCRACY: &str = "democracy";
pub const GOVERNMENT: &str = "government";
pub const NEUTRAL: &str = "neutral";

/// Category -> lowercase substrings. Table order is output order.
const KEYWORD_TABLE: [(&str, &[&str]); 5] = [
    (
        CENSORSHIP,
        &[
            "cannot discuss",
            "can't discuss",
            "cannot provide",
            "unable to",
            "not appropriate",
            "sensitive topic",
            "i cannot",
            "restricted",
        ],
    ),
    (
        VIOLENCE,
        &[
            "massacre",
            "violence",
            "violent",
            "killed",
            "casualties",
            "crackdown",
            "bloodshed",
            "troops",
        ],
    ),
    (
        DEMOCRACY,
        &[
            "democracy",
            "democratic",
            "freedom",
            "protest",
            "human rights",
            "reform",
        ],
    ),
    (
        GOVERNMENT,
        &[
            "government",
            "authorities",
            "regime",
            "communist party",
            "stability",
            "social order",
            "sovereignty",
        ],
    ),
    (
        NEUTRAL,
        &[
            "historical",
            "perspectives",
            "viewpoints",
            "complex",
            "incident",
        ],
    ),
];

/// Categories whose phrases appear in `text`, each listed once.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    KEYWORD_TABLE
        .iter()
        .filter(|(_, phrases)| phrases.iter().any(|p| lowered.contains(p)))
        .map(|(category, _)| category.to_string())
        .collect()
}

fn has(keywords: &[String], category: &str) -> bool {
    keywords.iter().any(|k| k == category)
}

pub fn censorship_level(keywords: &[String]) -> CensorshipLevel {
    if has(keywords, CENSORSHIP) {
        CensorshipLevel::High
    } else if has(keywords, GOVERNMENT) && !has(keywords, DEMOCRACY) {
        CensorshipLevel::Medium
    } else {
        CensorshipLevel::Low
    }
}

/// Heuristic 0..=100 score used when a completed live result carries no
/// server score.
pub fn keyword_bias_score(keywords: &[String]) -> u32 {
    let mut score: i32 = 20;
    if has(keywords, CENSORSHIP) {
        score += 45;
    }
    if has(keywords, GOVERNMENT) && !has(keywords, DEMOCRACY) {
        score += 20;
    }
    if has(keywords, DEMOCRACY) || has(keywords, VIOLENCE) {
        score -= 5;
    }
    if has(keywords, NEUTRAL) {
        score -= 5;
    }
    score.clamp(0, 100) as u32
}

pub fn keyword_factual_accuracy(keywords: &[String]) -> u32 {
    if has(keywords, CENSORSHIP) {
        45
    } else if has(keywords, VIOLENCE) || has(keywords, DEMOCRACY) {
        85
    } else {
        70
    }
}

pub fn keyword_political_sensitivity(keywords: &[String]) -> u32 {
    let political = [CENSORSHIP, VIOLENCE, DEMOCRACY, GOVERNMENT]
        .iter()
        .filter(|category| has(keywords, category))
        .count() as u32;
    (political * 25).min(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_keywords_dedups_and_orders() {
        let keywords = extract_keywords(
            "The government sent troops; the crackdown killed protesters demanding democracy \
             and freedom. The government later cited stability.",
        );
        assert_eq!(keywords, vec![VIOLENCE, DEMOCRACY, GOVERNMENT]);
    }

    #[test]
    fn test_extract_keywords_case_insensitive() {
        let keywords = extract_keywords("I CANNOT DISCUSS this Sensitive Topic.");
        assert_eq!(keywords, vec![CENSORSHIP]);
        assert!(extract_keywords("").is_empty());
        assert!(extract_keywords("The weather is nice.").is_empty());
    }

    #[test]
    fn test_censorship_level() {
        assert_eq!(
            censorship_level(&[CENSORSHIP.to_string()]),
            CensorshipLevel::High
        );
        assert_eq!(
            censorship_level(&[GOVERNMENT.to_string()]),
            CensorshipLevel::Medium
        );
        assert_eq!(
            censorship_level(&[GOVERNMENT.to_string(), DEMOCRACY.to_string()]),
            CensorshipLevel::Low
        );
    }

    #[test]
    fn test_heuristic_scores_stay_in_range() {
        let all: Vec<String> = [CENSORSHIP, VIOLENCE, DEMOCRACY, GOVERNMENT, NEUTRAL]
            .iter()
            .map(|c| c.to_string())
            .collect();
        for subset in [&all[..0], &all[..1], &all[..3], &all[..]] {
            assert!(keyword_bias_score(subset) <= 100);
            assert!(keyword_factual_accuracy(subset) <= 100);
            assert!(keyword_political_sensitivity(subset) <= 100);
        }
        assert!(keyword_bias_score(&all[..1]) > keyword_bias_score(&all[2..3]));
        assert_eq!(keyword_political_sensitivity(&all), 100);
    }
}
