use regex::Regex;
use std::sync::OnceLock;

fn decimal_token() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\d+(?:[.,]\d+)*").expect("decimal pattern is valid"))
}

fn count_token() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new("\\d{1,3}(?:[.,'\u{a0}\u{202f} ]\\d{3})+|\\d+").expect("count pattern is valid"))
}

/// Rating out of an "N of 5" phrase, whichever side the scale is written on.
///
/// `"4,3 su 5 stelle"` and `"5つ星のうち4.3"` both give 4.3. When the text
/// holds more than one number, the first bare `5` is the scale and is skipped.
pub fn parse_rating_phrase(text: &str) -> Option<f64> {
    let mut tokens: Vec<&str> = decimal_token().find_iter(text)
        .map(|token| token.as_str())
        .collect();

    if tokens.len() > 1 {
        if let Some(scale) = tokens.iter().position(|token| *token == "5") {
            tokens.remove(scale);
        }
    }

    tokens.first().and_then(|token| decimal_value(token))
}

fn decimal_value(token: &str) -> Option<f64> {
    let last_mark = token.rfind(|c: char| c == '.' || c == ',');
    let normalized = match last_mark {
        None => token.to_string(),
        Some(pos) => {
            let marks = token.matches(|c: char| c == '.' || c == ',').count();
            let mixed = token.contains('.') && token.contains(',');
            let fraction = &token[pos + 1..];

            if mixed || (marks == 1 && fraction.len() != 3) {
                let whole: String = token[..pos].chars().filter(char::is_ascii_digit).collect();
                format!("{}.{}", whole, fraction)
            } else {
                token.chars().filter(char::is_ascii_digit).collect()
            }
        }
    };

    normalized.parse().ok()
}

/// First whole number in `text`, tolerating `.`, `,`, `'` and space-like
/// thousands separators.
pub fn parse_count(text: &str) -> Option<u64> {
    let token = count_token().find(text)?.as_str();
    let digits: String = token.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}
