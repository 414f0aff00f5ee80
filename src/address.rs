use crate::types::AddressComponents;

/// Split `"street, city, REGION postal"` into parts.  Short inputs degrade: two segments give
/// street and city, one gives the street only.  `default_city` fills a missing city only when
/// the address had a city slot at all.
pub fn parse_address(raw: &str, default_city: &str) -> AddressComponents {
    let segments: Vec<&str> = raw.split(',').map(str::trim).collect();
    let mut parts = AddressComponents::default();

    match segments.as_slice() {
        [] | [""] => {}
        [street] => {
            parts.street = street.to_string();
        }
        [street, city, rest @ ..] => {
            parts.street = street.to_string();
            parts.city = if city.is_empty() {
                default_city.to_string()
            } else {
                city.to_string()
            };
            if let Some(tail) = rest.first() {
                let mut tokens = tail.split_whitespace();
                parts.region = tokens.next().unwrap_or_default().to_string();
                parts.postal_code = tokens.next().unwrap_or_default().to_string();
            }
        }
    }

    parts
}
