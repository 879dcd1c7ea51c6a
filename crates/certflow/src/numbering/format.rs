use crate::error::ClassifiedError;

/// Template used when neither the request nor the configuration names one.
pub const DEFAULT_TEMPLATE: &str = "{YEAR}-{SEQUENTIAL_NUMBER}";

pub const YEAR_TOKEN: &str = "{YEAR}";
pub const SEQUENCE_TOKEN: &str = "{SEQUENTIAL_NUMBER}";
pub const PREFIX_TOKEN: &str = "{PREFIX}";
pub const SUFFIX_TOKEN: &str = "{SUFFIX}";

/// Minimum width of the rendered sequence. Longer sequences are not cut.
pub const SEQUENCE_WIDTH: usize = 4;

const SEPARATORS: &[char] = &['-', '_', '/', '.', ' '];

/// Checks that a template can produce a well-formed number.
///
/// # Errors
///
/// Returns a validation error if the template lacks the year or sequence
/// token.
pub fn validate_template(template: &str) -> Result<(), ClassifiedError> {
    if !template.contains(YEAR_TOKEN) {
        return Err(
            ClassifiedError::validation(format!("Number format must contain {YEAR_TOKEN}"))
                .with_field("format", template),
        );
    }
    if !template.contains(SEQUENCE_TOKEN) {
        return Err(
            ClassifiedError::validation(format!("Number format must contain {SEQUENCE_TOKEN}"))
                .with_field("format", template),
        );
    }
    Ok(())
}

/// Renders a certificate number from `template`.
///
/// `{SEQUENTIAL_NUMBER}` is zero-padded to [`SEQUENCE_WIDTH`] digits. A prefix
/// or suffix given for a template without the matching token is joined with
/// `-`. Separators left dangling by an empty prefix or suffix are trimmed.
pub fn render_number(
    template: &str,
    year: i32,
    sequence: u64,
    prefix: Option<&str>,
    suffix: Option<&str>,
) -> String {
    let prefix = prefix.unwrap_or_default();
    let suffix = suffix.unwrap_or_default();

    let mut number = template
        .replace(YEAR_TOKEN, &format!("{year:04}"))
        .replace(
            SEQUENCE_TOKEN,
            &format!("{sequence:0width$}", width = SEQUENCE_WIDTH),
        )
        .replace(PREFIX_TOKEN, prefix)
        .replace(SUFFIX_TOKEN, suffix);

    if !prefix.is_empty() && !template.contains(PREFIX_TOKEN) {
        number = format!("{prefix}-{number}");
    }
    if !suffix.is_empty() && !template.contains(SUFFIX_TOKEN) {
        number = format!("{number}-{suffix}");
    }

    number.trim_matches(SEPARATORS).to_string()
}

/// Checks that a rendered number carries the 4-digit year and the sequence
/// as two distinct, non-overlapping tokens.
///
/// # Errors
///
/// Returns a validation error naming what is missing.
pub fn validate_number(number: &str, year: i32, sequence: u64) -> Result<(), ClassifiedError> {
    let year_token = format!("{year:04}");
    let sequence_token = format!("{sequence:0width$}", width = SEQUENCE_WIDTH);

    let invalid = |reason: &str| {
        ClassifiedError::validation(format!("Malformed certificate number {number:?}: {reason}"))
            .with_field("certificateNumber", number)
            .with_field("year", year)
            .with_field("sequence", sequence)
    };

    if year_token.len() != 4 {
        return Err(invalid("year is not four digits"));
    }

    let years = occurrences(number, &year_token);
    if years.is_empty() {
        return Err(invalid("year token missing"));
    }
    let sequences = occurrences(number, &sequence_token);
    if sequences.is_empty() {
        return Err(invalid("sequence token missing"));
    }

    let distinct = years.iter().any(|&y| {
        sequences.iter().any(|&s| {
            let year_range = y..y + year_token.len();
            let seq_range = s..s + sequence_token.len();
            year_range.end <= seq_range.start || seq_range.end <= year_range.start
        })
    });
    if !distinct {
        return Err(invalid("year and sequence tokens coincide"));
    }

    Ok(())
}

/// Checks a certificate number issued for `year` without knowing its
/// sequence: the 4-digit year must appear, and at least
/// [`SEQUENCE_WIDTH`] further digits must remain once it is removed.
///
/// # Errors
///
/// Returns a validation error naming what is missing.
pub fn validate_format(number: &str, year: i32) -> Result<(), ClassifiedError> {
    let year_token = format!("{year:04}");
    let invalid = |reason: &str| {
        ClassifiedError::validation(format!("Malformed certificate number {number:?}: {reason}"))
            .with_field("certificateNumber", number)
            .with_field("year", year)
    };

    let Some(at) = number.find(&year_token) else {
        return Err(invalid("year token missing"));
    };
    let rest = format!("{}{}", &number[..at], &number[at + year_token.len()..]);
    let longest_run = rest
        .split(|c: char| !c.is_ascii_digit())
        .map(str::len)
        .max()
        .unwrap_or_default();
    if longest_run < SEQUENCE_WIDTH {
        return Err(invalid("sequence token missing"));
    }
    Ok(())
}

/// Byte offsets of every (possibly overlapping) occurrence of `needle`.
fn occurrences(haystack: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }
    (0..=haystack.len() - needle.len())
        .filter(|&i| haystack.is_char_boundary(i) && haystack[i..].starts_with(needle))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_pads_sequence() {
        assert_eq!(render_number(DEFAULT_TEMPLATE, 2025, 7, None, None), "2025-0007");
        assert_eq!(render_number(DEFAULT_TEMPLATE, 2025, 12345, None, None), "2025-12345");
    }

    #[test]
    fn prefix_and_suffix_tokens() {
        let template = "{PREFIX}-{YEAR}-{SEQUENTIAL_NUMBER}-{SUFFIX}";
        assert_eq!(
            render_number(template, 2024, 3, Some("ACME"), Some("A")),
            "ACME-2024-0003-A"
        );
        assert_eq!(render_number(template, 2024, 3, None, None), "2024-0003");
        assert_eq!(
            render_number(DEFAULT_TEMPLATE, 2024, 3, Some("SH"), None),
            "SH-2024-0003"
        );
    }

    #[test]
    fn templates_need_both_tokens() {
        assert!(validate_template(DEFAULT_TEMPLATE).is_ok());
        assert!(validate_template("CERT-{SEQUENTIAL_NUMBER}").is_err());
        assert!(validate_template("CERT-{YEAR}").is_err());
    }

    #[test]
    fn coinciding_tokens_are_rejected() {
        assert!(validate_number("2025-2025", 2025, 2025).is_ok());
        assert!(validate_number("20250001", 2025, 1).is_ok());
        assert!(validate_number("CERT-2025", 2025, 2025).is_err());
        assert!(validate_number("CERT-0001", 2025, 1).is_err());
        assert!(validate_number("2025", 2025, 1).is_err());
    }

    #[test]
    fn format_check_without_sequence() {
        assert!(validate_format("2025-0042", 2025).is_ok());
        assert!(validate_format("ACME-2025-0042-X", 2025).is_ok());
        assert!(validate_format("2025-2025", 2025).is_ok());
        assert!(validate_format("2024-0042", 2025).is_err());
        assert!(validate_format("CERT-2025", 2025).is_err());
        assert!(validate_format("2025-042", 2025).is_err());
    }
}
