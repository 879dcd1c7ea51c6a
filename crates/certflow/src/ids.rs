use rand::{Rng, distr::Alphanumeric};

/// Length of the random suffix appended to session and correlation ids.
pub(crate) const SUFFIX_LEN: usize = 9;

/// Returns `len` random lowercase alphanumerics.
pub(crate) fn random_suffix(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Generates a correlation id used to tie log lines for one failure together.
pub(crate) fn correlation_id(now_millis: i64) -> String {
    format!("err_{now_millis}_{}", random_suffix(SUFFIX_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_has_requested_length_and_charset() {
        let s = random_suffix(SUFFIX_LEN);
        assert_eq!(s.len(), SUFFIX_LEN);
        assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn correlation_ids_do_not_repeat() {
        let a = correlation_id(1);
        let b = correlation_id(1);
        assert!(a.starts_with("err_1_"));
        assert_ne!(a, b);
    }
}
