use tracing::warn;

/// Splits "Name: Value" at the first colon.
pub fn split_header(header_str: &str) -> Option<(&str, &str)> {
    let Some((name, value)) = header_str.split_once(':') else {
        warn!(
            "Invalid header format: '{}'. Expected 'Name: Value'",
            header_str
        );
        return None;
    };
    Some((name.trim(), value.trim()))
}
