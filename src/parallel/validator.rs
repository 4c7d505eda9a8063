//! Header and record checks applied by the source reader before a record is
//! emitted.

use std::collections::HashSet;

use crate::error::PipelineError;
use crate::record::Record;

/// Reject empty headers, blank or duplicate (case-insensitive) names, and
/// names outside letters, digits, space, underscore and hyphen.
pub fn validate_headers(headers: &[String]) -> Result<(), PipelineError> {
    if headers.is_empty() {
        return Err(PipelineError::InvalidCsv("header row is empty".to_string()));
    }

    let mut seen = HashSet::with_capacity(headers.len());
    for (i, header) in headers.iter().enumerate() {
        let trimmed = header.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::validation(
                format!("column {}", i + 1),
                header.as_str(),
                "empty header name",
            ));
        }

        if !seen.insert(trimmed.to_lowercase()) {
            return Err(PipelineError::validation(
                format!("column {}", i + 1),
                header.as_str(),
                "duplicate header name",
            ));
        }

        if !is_valid_header_name(header) {
            return Err(PipelineError::validation(
                format!("column {}", i + 1),
                header.as_str(),
                "header name contains invalid characters",
            ));
        }
    }

    Ok(())
}

pub fn is_valid_header_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ' ')
}

/// Field count must match the header when one exists; otherwise the record
/// must carry at least one field.
pub fn validate_record(record: &Record) -> Result<(), PipelineError> {
    if record.fields.is_empty() {
        return Err(PipelineError::InvalidRecord(format!(
            "record has no data (line {} in {})",
            record.line_number, record.source
        )));
    }

    let expected = record.header_len();
    if expected > 0 && record.fields.len() != expected {
        return Err(PipelineError::InvalidRecord(format!(
            "field count mismatch: expected {} fields, got {} (line {} in {})",
            expected,
            record.fields.len(),
            record.line_number,
            record.source
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_valid_headers() {
        assert!(validate_headers(&names(&["id", "first name", "last_name", "zip-code"])).is_ok());
        assert!(validate_headers(&names(&["größe", "名前"])).is_ok());
    }

    #[test]
    fn test_empty_header_row() {
        assert!(matches!(
            validate_headers(&[]),
            Err(PipelineError::InvalidCsv(_))
        ));
    }

    #[test]
    fn test_blank_header_name() {
        let err = validate_headers(&names(&["id", "  ", "name"])).unwrap_err();
        assert_eq!(
            err,
            PipelineError::validation("column 2", "  ", "empty header name")
        );
    }

    #[test]
    fn test_duplicates_are_case_insensitive() {
        let err = validate_headers(&names(&["Email", "name", "email"])).unwrap_err();
        assert!(err.to_string().contains("duplicate header name"));
        assert!(err.to_string().contains("column 3"));
    }

    #[test]
    fn test_invalid_characters() {
        assert!(!is_valid_header_name("price($)"));
        assert!(!is_valid_header_name("a.b"));
        assert!(is_valid_header_name("Unit Price_2-b"));
        assert!(validate_headers(&names(&["id", "e-mail@"])).is_err());
    }

    #[test]
    fn test_validate_record() {
        let header = Some(Arc::new(names(&["id", "name"])));
        let ok = Record::new(2, "a.csv", names(&["1", "x"]), header.clone());
        assert!(validate_record(&ok).is_ok());

        let short = Record::new(3, "a.csv", names(&["1"]), header);
        let msg = validate_record(&short).unwrap_err().to_string();
        assert!(msg.contains("expected 2 fields, got 1 (line 3 in a.csv)"));

        let empty = Record::new(1, "b.csv", Vec::new(), None);
        assert!(validate_record(&empty).is_err());
    }
}
