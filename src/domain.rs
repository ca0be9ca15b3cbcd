use anyhow::{Result, anyhow};

/// Normalizes a domain name into its canonical ASCII (punycode) form.
/// This is the form used for equality, ordering, and wire requests.
pub fn normalize_domain_for_storage(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(anyhow!("domain name is required"));
    }
    let (wildcard, rest) = split_wildcard(trimmed);
    if rest.is_empty() {
        return Err(anyhow!("domain name is required"));
    }
    let ascii = idna::domain_to_ascii(rest)
        .map_err(|err| anyhow!("invalid domain name: {err}"))?;
    let ascii = ascii.to_lowercase();
    Ok(if wildcard { format!("*.{ascii}") } else { ascii })
}

pub fn normalize_domain_suffix_for_storage(raw: &str) -> Result<String> {
    let stripped = raw
        .trim()
        .trim_start_matches("*.")
        .trim_start_matches('.')
        .trim_end_matches('.');
    if stripped.is_empty() {
        return Ok(String::new());
    }
    normalize_domain_for_storage(stripped)
}

/// Normalizes a domain name for display: punycode labels decoded to Unicode.
pub fn normalize_domain_for_display(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('.');
    let (wildcard, rest) = split_wildcard(trimmed);
    let (unicode, _) = idna::domain_to_unicode(rest);
    let unicode = unicode.to_lowercase();
    if wildcard {
        format!("*.{unicode}")
    } else {
        unicode
    }
}

pub fn is_wildcard(domain: &str) -> bool {
    domain.trim().starts_with("*.")
}

fn split_wildcard(domain: &str) -> (bool, &str) {
    match domain.strip_prefix("*.") {
        Some(rest) => (true, rest),
        None => (false, domain),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_form_is_lowercase_ascii() {
        assert_eq!(
            normalize_domain_for_storage("Example.COM.").unwrap(),
            "example.com"
        );
    }

    #[test]
    fn storage_form_punycodes_unicode() {
        assert_eq!(
            normalize_domain_for_storage("testé.fr").unwrap(),
            "xn--test-epa.fr"
        );
    }

    #[test]
    fn storage_form_preserves_wildcard_label() {
        assert_eq!(
            normalize_domain_for_storage("*.Example.com").unwrap(),
            "*.example.com"
        );
    }

    #[test]
    fn storage_form_rejects_empty() {
        assert!(normalize_domain_for_storage("  ").is_err());
        assert!(normalize_domain_for_storage("*.").is_err());
    }

    #[test]
    fn display_form_decodes_punycode() {
        assert_eq!(normalize_domain_for_display("xn--test-epa.fr"), "testé.fr");
        assert_eq!(
            normalize_domain_for_display("*.xn--test-epa.fr"),
            "*.testé.fr"
        );
    }

    #[test]
    fn suffix_normalization_strips_wildcard_and_dots() {
        assert_eq!(
            normalize_domain_suffix_for_storage("*.Example.com.").unwrap(),
            "example.com"
        );
        assert_eq!(normalize_domain_suffix_for_storage("").unwrap(), "");
    }

    #[test]
    fn wildcard_detection() {
        assert!(is_wildcard("*.example.com"));
        assert!(!is_wildcard("example.com"));
        assert!(!is_wildcard("www.example.com"));
    }
}
