//! Text rendering of SQLite values.
//!
//! Query results go back to a language model as plain text, so rows are
//! written the way an interactive SQL shell prints tuples: `(1, 'AC/DC')`.

use rusqlite::types::Value;

/// Render a row as a tuple literal. Single-column rows keep a trailing comma.
pub fn tuple(row: &[Value]) -> String {
    let cells: Vec<String> = row.iter().map(literal).collect();
    match cells.as_slice() {
        [single] => format!("({single},)"),
        _ => format!("({})", cells.join(", ")),
    }
}

/// Render a value as it appears inside a tuple: strings quoted.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Text(text) => quote(text),
        other => plain(other),
    }
}

/// Render a value for table display: strings as-is.
pub fn plain(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Real(f) => real(*f),
        Value::Text(text) => text.clone(),
        Value::Blob(bytes) => format!("b'{}'", bytes.escape_ascii()),
    }
}

fn real(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        // Debug keeps the decimal point on whole numbers ("3.0") and switches
        // to exponent form at the same magnitudes as the shell does.
        let shortest = format!("{f:?}");
        match shortest.split_once('e') {
            Some((mantissa, exponent)) => {
                let (sign, digits) = match exponent.strip_prefix('-') {
                    Some(digits) => ('-', digits),
                    None => ('+', exponent),
                };
                format!("{mantissa}e{sign}{digits:0>2}")
            }
            None => shortest,
        }
    }
}

fn quote(text: &str) -> String {
    let delimiter = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };

    let mut out = String::with_capacity(text.len() + 2);
    out.push(delimiter);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuples_quote_text_and_keep_numbers_bare() {
        let row = vec![
            Value::Integer(1),
            Value::Text("For Those About To Rock".into()),
            Value::Real(0.99),
            Value::Null,
        ];
        assert_eq!(tuple(&row), "(1, 'For Those About To Rock', 0.99, None)");
    }

    #[test]
    fn single_column_rows_have_trailing_comma() {
        assert_eq!(tuple(&[Value::Integer(275)]), "(275,)");
    }

    #[test]
    fn quote_switches_delimiter_for_apostrophes() {
        assert_eq!(literal(&Value::Text("Guns N' Roses".into())), "\"Guns N' Roses\"");
        assert_eq!(literal(&Value::Text("it's \"x\"".into())), "'it\\'s \"x\"'");
        assert_eq!(literal(&Value::Text("a\nb".into())), "'a\\nb'");
    }

    #[test]
    fn whole_reals_keep_decimal_point() {
        assert_eq!(plain(&Value::Real(3.0)), "3.0");
        assert_eq!(plain(&Value::Real(f64::INFINITY)), "inf");
    }

    #[test]
    fn exponents_are_signed_and_two_digits() {
        let row = [Value::Real(1e16), Value::Real(1e-5), Value::Real(-2.5e-300)];
        assert_eq!(tuple(&row), "(1e+16, 1e-05, -2.5e-300)");
        assert_eq!(plain(&Value::Real(1.5e22)), "1.5e+22");
        assert_eq!(plain(&Value::Real(0.0001)), "0.0001");
        assert_eq!(plain(&Value::Real(123456789.0)), "123456789.0");
    }

    #[test]
    fn plain_text_is_unquoted_and_blobs_escaped() {
        assert_eq!(plain(&Value::Text("Rock".into())), "Rock");
        assert_eq!(plain(&Value::Blob(vec![b'h', b'i', 0])), "b'hi\\x00'");
    }
}
