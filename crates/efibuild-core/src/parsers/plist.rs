//! Property list reading and XML writing.
//!
//! Reading goes through the `plist` crate (XML or binary). Writing is done
//! here so two details match what the bootloader tooling expects: UIDs are
//! bounded below 2^32, and short `<data>` values stay on one line while
//! long ones wrap at the same width as upstream.

use std::fmt::Write as _;
use std::io::Cursor;
use std::path::Path;
use std::time::SystemTime;

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use efibuild_schema::{Dict, Uid, Value};

use crate::error::{Error, Result};

const HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
"#;

/// Width budget of a `<data>` line before indentation is subtracted.
const DATA_LINE_WIDTH: usize = 76;

pub fn read_plist(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path)?;
    read_plist_bytes(&bytes)
}

pub fn read_plist_bytes(bytes: &[u8]) -> Result<Value> {
    let raw = plist::Value::from_reader(Cursor::new(bytes))?;
    from_plist(raw)
}

fn from_plist(raw: plist::Value) -> Result<Value> {
    Ok(match raw {
        plist::Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_plist)
                .collect::<Result<Vec<_>>>()?,
        ),
        plist::Value::Dictionary(dict) => {
            let mut out = Dict::new();
            for (k, v) in dict {
                out.insert(k, from_plist(v)?);
            }
            Value::Dict(out)
        }
        plist::Value::Boolean(b) => Value::Bool(b),
        plist::Value::Data(d) => Value::Data(d),
        plist::Value::Date(d) => Value::Date(DateTime::<Utc>::from(SystemTime::from(d))),
        plist::Value::Real(r) => Value::Real(r),
        plist::Value::Integer(i) => match (i.as_signed(), i.as_unsigned()) {
            (Some(signed), _) => Value::Integer(signed),
            (None, Some(unsigned)) => Value::Integer(i64::try_from(unsigned).map_err(|_| {
                Error::SchemaViolation(format!("integer {unsigned} does not fit in 64 signed bits"))
            })?),
            (None, None) => Value::Integer(0),
        },
        plist::Value::String(s) => Value::String(s),
        plist::Value::Uid(u) => Value::Uid(Uid::new(u.get())?),
        _ => Value::Null,
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlistOptions {
    /// Emit dictionary keys in sorted order instead of insertion order.
    pub sort_keys: bool,
}

/// Serialize `value` as an XML property list.
pub fn write_plist(value: &Value, opts: PlistOptions) -> String {
    let mut out = String::from(HEADER);
    write_node(&mut out, value, 0, opts);
    out.push_str("</plist>\n");
    out
}

pub fn save_plist(path: &Path, value: &Value, opts: PlistOptions) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, write_plist(value, opts))?;
    Ok(())
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn write_node(out: &mut String, value: &Value, depth: usize, opts: PlistOptions) {
    let pad = "\t".repeat(depth);
    match value {
        Value::Null => {}
        Value::Bool(true) => {
            let _ = writeln!(out, "{pad}<true/>");
        }
        Value::Bool(false) => {
            let _ = writeln!(out, "{pad}<false/>");
        }
        Value::Integer(i) => {
            let _ = writeln!(out, "{pad}<integer>{i}</integer>");
        }
        Value::Real(r) => {
            let _ = writeln!(out, "{pad}<real>{r:?}</real>");
        }
        Value::Date(d) => {
            let _ = writeln!(
                out,
                "{pad}<date>{}</date>",
                d.to_rfc3339_opts(SecondsFormat::Secs, true)
            );
        }
        Value::String(s) => {
            let _ = writeln!(out, "{pad}<string>{}</string>", escape(s));
        }
        Value::Uid(u) => {
            let _ = writeln!(out, "{pad}<dict>");
            let _ = writeln!(out, "{pad}\t<key>CF$UID</key>");
            let _ = writeln!(out, "{pad}\t<integer>{}</integer>", u.get());
            let _ = writeln!(out, "{pad}</dict>");
        }
        Value::Data(bytes) => write_data(out, bytes, depth),
        Value::Array(items) if items.is_empty() => {
            let _ = writeln!(out, "{pad}<array/>");
        }
        Value::Array(items) => {
            let _ = writeln!(out, "{pad}<array>");
            for item in items {
                write_node(out, item, depth + 1, opts);
            }
            let _ = writeln!(out, "{pad}</array>");
        }
        Value::Dict(dict) if dict.values().all(Value::is_null) => {
            let _ = writeln!(out, "{pad}<dict/>");
        }
        Value::Dict(dict) => {
            let _ = writeln!(out, "{pad}<dict>");
            let mut entries: Vec<_> = dict.iter().filter(|(_, v)| !v.is_null()).collect();
            if opts.sort_keys {
                entries.sort_by(|a, b| a.0.cmp(b.0));
            }
            for (key, item) in entries {
                let _ = writeln!(out, "{pad}\t<key>{}</key>", escape(key));
                write_node(out, item, depth + 1, opts);
            }
            let _ = writeln!(out, "{pad}</dict>");
        }
    }
}

/// `<data>` on one line when it fits the line budget, otherwise base64
/// wrapped on indented lines between the tags.
fn write_data(out: &mut String, bytes: &[u8], depth: usize) {
    let pad = "\t".repeat(depth);
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    let budget = DATA_LINE_WIDTH.saturating_sub(8 * depth).max(16);

    if encoded.len() <= budget {
        let _ = writeln!(out, "{pad}<data>{encoded}</data>");
        return;
    }

    let per_line = budget / 4 * 4;
    let _ = writeln!(out, "{pad}<data>");
    for chunk in encoded.as_bytes().chunks(per_line) {
        let _ = writeln!(out, "{pad}{}", String::from_utf8_lossy(chunk));
    }
    let _ = writeln!(out, "{pad}</data>");
}

#[cfg(test)]
mod tests {
    use super::*;
    use efibuild_schema::dict;

    #[test]
    fn test_round_trip() {
        let value = dict! {
            "ACPI" => dict! {
                "Add" => vec![dict! { "Path" => "SSDT-EC.aml", "Enabled" => true }],
                "Quirks" => dict! { "ResetLogoStatus" => false },
            },
            "Count" => 3i64,
            "Blob" => Value::Data(vec![0, 1, 2, 3]),
            "Empty" => Value::Array(vec![]),
            "Escaped" => "a < b & c",
        };
        let xml = write_plist(&value, PlistOptions::default());
        assert!(xml.contains("<data>AAECAw==</data>"));
        assert!(xml.contains("<array/>"));
        assert!(xml.contains("<string>a &lt; b &amp; c</string>"));
        assert_eq!(read_plist_bytes(xml.as_bytes()).unwrap(), value);
    }

    #[test]
    fn test_oversized_integer_is_rejected() {
        let xml = format!(
            "{HEADER}<dict>\n\t<key>Big</key>\n\t<integer>18446744073709551615</integer>\n</dict>\n</plist>\n"
        );
        assert!(matches!(
            read_plist_bytes(xml.as_bytes()),
            Err(Error::SchemaViolation(_))
        ));

        let xml = format!("{HEADER}<integer>-5</integer>\n</plist>\n");
        assert_eq!(read_plist_bytes(xml.as_bytes()).unwrap(), Value::Integer(-5));
    }

    #[test]
    fn test_long_data_wraps() {
        let value = dict! { "Blob" => Value::Data(vec![0xAB; 120]) };
        let xml = write_plist(&value, PlistOptions::default());
        let data_start = xml.find("<data>\n").expect("wrapped data");
        let body: Vec<&str> = xml[data_start..].lines().skip(1).take_while(|l| !l.contains("</data>")).collect();
        assert!(body.len() > 1);
        assert!(body.iter().all(|l| l.trim().len() <= 68));
        assert_eq!(read_plist_bytes(xml.as_bytes()).unwrap(), value);
    }

    #[test]
    fn test_sorted_keys() {
        let value = dict! { "b" => 1i64, "a" => 2i64 };
        let xml = write_plist(&value, PlistOptions { sort_keys: true });
        assert!(xml.find("<key>a</key>").unwrap() < xml.find("<key>b</key>").unwrap());
    }
}
