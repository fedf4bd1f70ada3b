//! Case conversion and string formatting helpers.
//!
//! Shared by the metadata extractor (action/file naming) and the
//! template engine's helper library. All pure.

/// Split an identifier into lowercase words on case boundaries,
/// underscores, hyphens, and spaces.
fn split_words(s: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in s.chars() {
        if c == '_' || c == '-' || c == ' ' || c == '.' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// `booking_draft` / `BookingDraft` / `booking draft` → `bookingDraft`.
pub fn to_camel(s: &str) -> String {
    let words = split_words(s);
    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        if i == 0 {
            out.push_str(word);
        } else {
            out.push_str(&capitalize(word));
        }
    }
    out
}

/// `booking_draft` → `BookingDraft`.
pub fn to_pascal(s: &str) -> String {
    split_words(s).iter().map(|w| capitalize(w)).collect()
}

/// `BookingDraft` → `booking_draft`.
pub fn to_snake(s: &str) -> String {
    split_words(s).join("_")
}

/// Escape a string for inclusion in a single-quoted JS literal.
pub fn escape_js(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_camel() {
        assert_eq!(to_camel("booking_draft"), "bookingDraft");
        assert_eq!(to_camel("BookingDraft"), "bookingDraft");
        assert_eq!(to_camel("ACCEPT"), "accept");
        assert_eq!(to_camel("accepted-via-pending"), "acceptedViaPending");
    }

    #[test]
    fn test_to_pascal() {
        assert_eq!(to_pascal("draft"), "Draft");
        assert_eq!(to_pascal("booking_draft"), "BookingDraft");
        assert_eq!(to_pascal("ACCEPT"), "Accept");
        assert_eq!(to_pascal("acceptedViaPending"), "AcceptedViaPending");
    }

    #[test]
    fn test_to_snake() {
        assert_eq!(to_snake("BookingDraft"), "booking_draft");
        assert_eq!(to_snake("bookingDraft"), "booking_draft");
        assert_eq!(to_snake("booking draft"), "booking_draft");
    }

    #[test]
    fn test_escape_js() {
        assert_eq!(escape_js("it's"), "it\\'s");
        assert_eq!(escape_js("a\nb"), "a\\nb");
    }
}
