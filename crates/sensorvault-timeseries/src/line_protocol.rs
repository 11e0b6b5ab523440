//! InfluxDB line protocol
//!
//! `measurement[,tag=value...] field=value[,field=value...] [timestamp]`
//!
//! Backslashes, commas, equals signs and spaces in measurement names, tag keys,
//! tag values and field keys are backslash-escaped. String field values are double-quoted
//! with `\` and `"` escaped. Integers carry an `i` suffix. Timestamps are Unix
//! seconds (the client writes with `precision=second`).

use std::collections::BTreeMap;

use sensorvault_core::{FieldValue, Point};

use crate::error::{TimeSeriesError, TimeSeriesResult};

/// Escape a tag key, tag value or field key.
pub fn escape_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | ',' | '=' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape a measurement name (`=` is legal there).
pub fn escape_measurement(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | ',' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape the contents of a string field value (without the surrounding quotes).
pub fn escape_string_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        if matches!(c, '\\' | '"') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Reverse [`escape_key`] / [`escape_measurement`].
pub fn unescape_key(s: &str) -> String {
    unescape(s, &['\\', ',', '=', ' '])
}

/// Reverse [`escape_string_value`].
pub fn unescape_string_value(s: &str) -> String {
    unescape(s, &['\\', '"'])
}

fn unescape(s: &str, escapable: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if escapable.contains(&next) {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

fn encode_field_value(value: &FieldValue) -> TimeSeriesResult<String> {
    Ok(match value {
        FieldValue::Float(v) => {
            if !v.is_finite() {
                return Err(TimeSeriesError::InvalidPoint(format!(
                    "float field value must be finite, got {}",
                    v
                )));
            }
            format!("{}", v)
        }
        FieldValue::Integer(v) => format!("{}i", v),
        FieldValue::Boolean(v) => v.to_string(),
        FieldValue::String(v) => format!("\"{}\"", escape_string_value(v)),
    })
}

/// Encode one point as a line of line protocol (no trailing newline).
pub fn encode_point(point: &Point) -> TimeSeriesResult<String> {
    if point.measurement.is_empty() {
        return Err(TimeSeriesError::InvalidPoint(
            "measurement is required".to_string(),
        ));
    }
    if point.fields.is_empty() {
        return Err(TimeSeriesError::InvalidPoint(format!(
            "point in '{}' has no fields",
            point.measurement
        )));
    }

    let mut line = escape_measurement(&point.measurement);

    for (key, value) in &point.tags {
        if key.is_empty() || value.is_empty() {
            return Err(TimeSeriesError::InvalidPoint(format!(
                "tag '{}' must have a non-empty key and value",
                key
            )));
        }
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }

    line.push(' ');
    let mut fields = Vec::with_capacity(point.fields.len());
    for (key, value) in &point.fields {
        fields.push(format!("{}={}", escape_key(key), encode_field_value(value)?));
    }
    line.push_str(&fields.join(","));

    if point.timestamp > 0 {
        line.push(' ');
        line.push_str(&point.timestamp.to_string());
    }

    Ok(line)
}

/// Encode a batch as newline-separated lines.
pub fn encode_batch(points: &[Point]) -> TimeSeriesResult<String> {
    let lines = points
        .iter()
        .map(encode_point)
        .collect::<TimeSeriesResult<Vec<_>>>()?;
    Ok(lines.join("\n"))
}

/// Split on `sep` where it is neither backslash-escaped nor inside a quoted string.
fn split_unescaped(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    let mut in_quotes = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Split `key=value` at the first unescaped `=`.
fn split_pair(s: &str) -> TimeSeriesResult<(&str, &str)> {
    let parts = split_unescaped(s, '=');
    if parts.len() < 2 {
        return Err(TimeSeriesError::InvalidPoint(format!(
            "expected key=value, got '{}'",
            s
        )));
    }
    let key_len = parts[0].len();
    Ok((&s[..key_len], &s[key_len + 1..]))
}

fn parse_field_value(raw: &str) -> TimeSeriesResult<FieldValue> {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Ok(FieldValue::String(unescape_string_value(
            &raw[1..raw.len() - 1],
        )));
    }
    match raw {
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Boolean(false)),
        _ => {}
    }
    if let Some(int) = raw.strip_suffix('i') {
        return int
            .parse()
            .map(FieldValue::Integer)
            .map_err(|_| TimeSeriesError::InvalidPoint(format!("bad integer field '{}'", raw)));
    }
    raw.parse()
        .map(FieldValue::Float)
        .map_err(|_| TimeSeriesError::InvalidPoint(format!("bad field value '{}'", raw)))
}

/// Parse one line of line protocol back into a point.
pub fn parse_line(line: &str) -> TimeSeriesResult<Point> {
    let sections = split_unescaped(line.trim_end_matches(['\n', '\r']), ' ');
    if sections.len() < 2 || sections.len() > 3 {
        return Err(TimeSeriesError::InvalidPoint(format!(
            "expected 2 or 3 space-separated sections, got {}",
            sections.len()
        )));
    }

    let series = split_unescaped(sections[0], ',');
    let measurement = unescape_key(series[0]);
    let mut tags = BTreeMap::new();
    for tag in &series[1..] {
        let (key, value) = split_pair(tag)?;
        tags.insert(unescape_key(key), unescape_key(value));
    }

    let mut fields = BTreeMap::new();
    for field in split_unescaped(sections[1], ',') {
        let (key, value) = split_pair(field)?;
        fields.insert(unescape_key(key), parse_field_value(value)?);
    }

    let timestamp = match sections.get(2) {
        Some(ts) => ts
            .parse()
            .map_err(|_| TimeSeriesError::InvalidPoint(format!("bad timestamp '{}'", ts)))?,
        None => 0,
    };

    Ok(Point {
        measurement,
        tags,
        fields,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_round_trip() {
        for s in [
            "plain",
            "a,b",
            "k=v",
            "with space",
            ", = ,",
            "trailing\\",
            "\\,mixed",
            "\\\\",
            "a\\=b",
        ] {
            assert_eq!(unescape_key(&escape_key(s)), s, "round trip of {:?}", s);
        }
        for s in ["say \"hi\"", "C:\\temp", "\\\"", ""] {
            assert_eq!(unescape_string_value(&escape_string_value(s)), s);
        }
    }

    #[test]
    fn test_escape_key() {
        assert_eq!(escape_key("room 1,a=b"), "room\\ 1\\,a\\=b");
        assert_eq!(escape_key("C:\\"), "C:\\\\");
        assert_eq!(escape_measurement("a\\b c"), "a\\\\b\\ c");
        assert_eq!(escape_string_value("a\"b\\c"), "a\\\"b\\\\c");
    }

    #[test]
    fn test_encode_point() {
        let point = Point::new("temperature")
            .tag("dev_id", "7")
            .tag("site", "north wing")
            .field("value", 21.5)
            .field("count", 3i64)
            .field("ok", true)
            .field("note", "say \"hi\"")
            .at(1000);
        assert_eq!(
            encode_point(&point).unwrap(),
            "temperature,dev_id=7,site=north\\ wing count=3i,note=\"say \\\"hi\\\"\",ok=true,value=21.5 1000"
        );
    }

    #[test]
    fn test_encode_rejects_empty_fields_and_nan() {
        assert!(encode_point(&Point::new("m")).is_err());
        assert!(encode_point(&Point::new("m").field("v", f64::NAN)).is_err());
        assert!(encode_point(&Point::new("").field("v", 1.0)).is_err());
    }

    #[test]
    fn test_parse_line_round_trip() {
        let point = Point::new("air quality")
            .tag("dev_id", "7")
            .tag("loc", "a,b=c d")
            .field("pm 2.5", 12.25)
            .field("count", -4i64)
            .field("label", "x, y=\"z\"")
            .field("ok", false)
            .at(1700000000);
        let line = encode_point(&point).unwrap();
        assert_eq!(parse_line(&line).unwrap(), point);
    }

    #[test]
    fn test_trailing_backslash_does_not_swallow_separator() {
        let point = Point::new("m\\")
            .tag("a", "C:\\")
            .tag("b", "x")
            .field("path\\", "D:\\")
            .field("v", 1.0)
            .at(5);
        let line = encode_point(&point).unwrap();
        assert_eq!(line, "m\\\\,a=C:\\\\,b=x path\\\\=\"D:\\\\\",v=1 5");

        let parsed = parse_line(&line).unwrap();
        assert_eq!(parsed.tags.get("a").map(String::as_str), Some("C:\\"));
        assert_eq!(parsed.tags.get("b").map(String::as_str), Some("x"));
        assert_eq!(parsed, point);
    }

    #[test]
    fn test_parse_line_without_timestamp() {
        let point = parse_line("m,dev_id=1 value=1").unwrap();
        assert_eq!(point.timestamp, 0);
        assert_eq!(point.fields.get("value"), Some(&FieldValue::Float(1.0)));
        assert!(parse_line("only_measurement").is_err());
    }

    #[test]
    fn test_encode_batch_joins_lines() {
        let points = vec![
            Point::new("m").field("v", 1.0).at(1),
            Point::new("m").field("v", 2.0).at(2),
        ];
        assert_eq!(encode_batch(&points).unwrap(), "m v=1 1\nm v=2 2");
    }
}
