const COUNTRY_CODE: char = '1';

/// Canonicalize a phone number to `+1XXXXXXXXXX` when it looks North-American.  Anything else
/// comes back untouched.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        10 => format!("+{COUNTRY_CODE}{digits}"),
        11 if digits.starts_with(COUNTRY_CODE) => format!("+{digits}"),
        _ => raw.to_string(),
    }
}

/// The E.164 form of `raw`, or `None` if it cannot be dialed as given.
pub fn to_e164(raw: &str) -> Option<String> {
    let normalized = normalize_phone(raw.trim());
    let digits = normalized.strip_prefix('+')?;
    if (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(normalized)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_us_numbers_normalize_to_e164() {
        assert_eq!(normalize_phone("(702) 555-1234"), "+17025551234");
        assert_eq!(normalize_phone("702-555-1234"), "+17025551234");
        assert_eq!(normalize_phone("1 702 555 1234"), "+17025551234");
    }

    #[test]
    fn e164_input_is_left_alone() {
        assert_eq!(normalize_phone("+17025551234"), "+17025551234");
        assert_eq!(normalize_phone("+442071234567"), "+442071234567");
    }

    #[test]
    fn unrecognized_shapes_come_back_unchanged() {
        assert_eq!(normalize_phone("555-0000"), "555-0000");
        assert_eq!(normalize_phone("21234567890"), "21234567890");
        assert_eq!(normalize_phone(""), "");
    }

    #[test]
    fn e164_only_when_dialable() {
        assert_eq!(to_e164(" 7025551234 ").as_deref(), Some("+17025551234"));
        assert_eq!(to_e164("+442071234567").as_deref(), Some("+442071234567"));
        assert_eq!(to_e164("555-0000"), None);
        assert_eq!(to_e164("call me maybe"), None);
    }
}
