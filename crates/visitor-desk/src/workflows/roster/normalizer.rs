pub(crate) fn normalize_header(value: &str) -> String {
    let cleaned = value.replace(['\u{feff}', '\u{200b}'], "");
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.to_ascii_lowercase()
}

/// Trimmed cell content, `None` when blank.
pub(crate) fn clean_field(value: Option<&str>) -> Option<String> {
    value
        .map(|raw| raw.replace('\u{200b}', ""))
        .map(|raw| raw.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|cleaned| !cleaned.is_empty())
}

pub(crate) fn normalize_email(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_lose_bom_and_case() {
        assert_eq!(normalize_header("\u{feff}First  Name "), "first name");
        assert_eq!(normalize_header("EMAIL"), "email");
    }

    #[test]
    fn blank_cells_become_none() {
        assert_eq!(clean_field(Some("   ")), None);
        assert_eq!(clean_field(None), None);
        assert_eq!(clean_field(Some("  Acme   Corp ")), Some("Acme Corp".to_string()));
    }
}
