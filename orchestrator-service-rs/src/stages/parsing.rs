// orchestrator-service-rs/src/stages/parsing.rs
// Extraction of "Field: value" blocks from model output.

use once_cell::sync::Lazy;
use regex::Regex;
use shared_types::Severity;

/// A line that opens a new field, e.g. "Category: billing" or
/// "- **Recommended Stage**: solution_expert"
static FIELD_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[-*•]\s+)?\**\s*([A-Za-z][A-Za-z /\-]{0,40}?)\s*\**\s*:\s*(.*)$").expect("static pattern")
});

static NUMBERED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+[.)]\s+(.+)$").expect("static pattern"));

static BULLET_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[-*•]\s+(.+)$").expect("static pattern"));

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("static pattern"));

/// Value of `name`, including continuation lines up to the next field.
/// Field names match case-insensitively; markdown emphasis is ignored.
pub fn extract_field(text: &str, name: &str) -> Option<String> {
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        let Some(caps) = FIELD_LINE.captures(line) else {
            continue;
        };
        if !caps[1].trim().eq_ignore_ascii_case(name) {
            continue;
        }

        let mut value = vec![caps[2].trim().trim_matches('*').trim().to_string()];
        for next in lines.by_ref() {
            if is_field_line(next) {
                break;
            }
            value.push(next.trim_end().to_string());
        }
        let value = value.join("\n").trim().to_string();
        return (!value.is_empty()).then_some(value);
    }
    None
}

/// Numbered lines always continue the field above them. A bulleted line
/// only opens a field when it looks like "- Name: value" with a short,
/// capitalised name.
fn is_field_line(line: &str) -> bool {
    if NUMBERED_LINE.is_match(line) {
        return false;
    }
    let Some(caps) = FIELD_LINE.captures(line) else {
        return false;
    };
    if !BULLET_LINE.is_match(line) {
        return true;
    }
    let name = caps[1].trim();
    name.starts_with(|c: char| c.is_ascii_uppercase()) && name.split_whitespace().count() <= 3
}

pub fn field_or(text: &str, name: &str, default: &str) -> String {
    extract_field(text, name).unwrap_or_else(|| default.to_string())
}

/// "[a, b, c]", "a, b, c" or one bullet per line
pub fn extract_list(text: &str, name: &str) -> Vec<String> {
    let Some(value) = extract_field(text, name) else {
        return Vec::new();
    };
    value
        .split(|c| c == ',' || c == '\n')
        .map(|item| {
            let item = BULLET_LINE.captures(item).map_or(item.to_string(), |c| c[1].to_string());
            item.trim().trim_matches(|c| c == '[' || c == ']' || c == '"').trim().to_string()
        })
        .filter(|item| !item.is_empty())
        .collect()
}

/// Numbered lines of the "Steps" block (or of the whole text when the block
/// is missing); bulleted lines when nothing is numbered.
pub fn extract_steps(text: &str) -> Vec<String> {
    let block = extract_field(text, "Steps").unwrap_or_else(|| text.to_string());
    let collect = |pattern: &Regex| -> Vec<String> {
        block
            .lines()
            .filter_map(|line| pattern.captures(line).map(|c| c[1].trim().to_string()))
            .filter(|step| !step.is_empty())
            .collect()
    };

    let numbered = collect(&NUMBERED_LINE);
    if !numbered.is_empty() {
        return numbered;
    }
    let bulleted = collect(&BULLET_LINE);
    if !bulleted.is_empty() {
        return bulleted;
    }

    // "Steps: [reset password, clear cache]"
    let inline = extract_list(text, "Steps");
    if inline.len() > 1 {
        return inline;
    }
    Vec::new()
}

/// First number in `value`, clamped to [0, 1]; `default` when absent
pub fn safe_float(value: Option<&str>, default: f64) -> f64 {
    value
        .and_then(|v| NUMBER.find(&v.replace("**", "")).map(|m| m.as_str().to_string()))
        .and_then(|n| n.parse::<f64>().ok())
        .map_or(default, |n| n.clamp(0.0, 1.0))
}

pub fn parse_severity(value: Option<&str>) -> Option<Severity> {
    let value = value?;
    let word = value
        .split(|c: char| !c.is_ascii_alphabetic())
        .find(|w| !w.is_empty())?;
    word.parse().ok()
}

pub fn yes_no(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        let v = v.trim().to_ascii_lowercase();
        v.starts_with("yes") || v.starts_with("true")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANALYSIS: &str = "Category: Billing\n\
        Severity: **High**\n\
        Keywords: [refund, charge, duplicate]\n\
        Confidence: 0.72\n\
        Summary: Customer was charged twice\n\
        and wants one charge reversed.\n\
        Recommended Stage: solution_expert";

    #[test]
    fn fields_keep_continuation_lines() {
        assert_eq!(extract_field(ANALYSIS, "category").as_deref(), Some("Billing"));
        assert_eq!(
            extract_field(ANALYSIS, "Summary").as_deref(),
            Some("Customer was charged twice\nand wants one charge reversed.")
        );
        assert_eq!(extract_field(ANALYSIS, "Recommended Stage").as_deref(), Some("solution_expert"));
        assert_eq!(extract_field(ANALYSIS, "Sentiment"), None);
    }

    #[test]
    fn lists_severity_and_numbers() {
        assert_eq!(extract_list(ANALYSIS, "Keywords"), vec!["refund", "charge", "duplicate"]);
        assert_eq!(parse_severity(extract_field(ANALYSIS, "Severity").as_deref()), Some(Severity::High));
        assert_eq!(safe_float(extract_field(ANALYSIS, "Confidence").as_deref(), 0.8), 0.72);
        assert_eq!(safe_float(Some("unknown"), 0.8), 0.8);
        assert_eq!(safe_float(None, 0.5), 0.5);
        assert_eq!(safe_float(Some("85"), 0.8), 1.0);
    }

    #[test]
    fn steps_prefer_numbered_lines() {
        let text = "Solution Type: Password reset\n\
            Steps:\n\
            1. Open the sign-in page\n\
            2) Choose \"Forgot password\"\n\
            3. Follow the emailed link\n\
            Confidence: 0.92";
        assert_eq!(
            extract_steps(text),
            vec!["Open the sign-in page", "Choose \"Forgot password\"", "Follow the emailed link"]
        );

        let bullets = "Steps:\n- Clear the cache\n- Retry the login\nConfidence: 0.9";
        assert_eq!(extract_steps(bullets), vec!["Clear the cache", "Retry the login"]);

        assert_eq!(extract_steps("Steps: [Restart, Retry]"), vec!["Restart", "Retry"]);
        assert!(extract_steps("No structure at all").is_empty());
    }

    #[test]
    fn bulleted_fields_are_separate() {
        let text = "- **Category**: technical\n- **Severity**: low\n- note: call back tomorrow";
        assert_eq!(extract_field(text, "Category").as_deref(), Some("technical"));
        assert_eq!(extract_field(text, "Severity").as_deref(), Some("low\n- note: call back tomorrow"));
    }

    #[test]
    fn yes_no_answers() {
        assert!(yes_no(Some("Yes, within 48 hours")));
        assert!(!yes_no(Some("no")));
        assert!(!yes_no(None));
    }
}
