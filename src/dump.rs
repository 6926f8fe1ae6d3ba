//
// dump.rs
// IML-Prep
//
// Text dump of a DICOM dataset used by `inspect`: one line per element, sequences recursed up to
// a depth, long values cut short.
//

use std::fmt::Write;

use dicom::core::dictionary::DataDictionary;
use dicom::core::value::Value;
use dicom::core::{PrimitiveValue, Tag};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::InMemDicomObject;

pub const DEFAULT_MAX_DEPTH: usize = 3;
pub const DEFAULT_MAX_VALUE_LEN: usize = 120;

pub fn dump_to_string(
    obj: &InMemDicomObject<StandardDataDictionary>,
    max_depth: usize,
    max_value_len: usize,
) -> String {
    let mut out = String::new();
    dump_object(obj, 0, max_depth, max_value_len, &mut out);
    out
}

fn dump_object(
    obj: &InMemDicomObject<StandardDataDictionary>,
    depth: usize,
    max_depth: usize,
    max_value_len: usize,
    out: &mut String,
) {
    let indent = "  ".repeat(depth);
    for elem in obj.iter() {
        let tag = elem.header().tag;
        let vr = elem.header().vr;
        let head = format!("{}{} {} {}", indent, format_tag(tag), tag_name(tag), vr);

        match elem.value() {
            Value::Primitive(p) => {
                let _ = writeln!(out, "{} {}", head, preview_primitive(p, max_value_len));
            }
            Value::Sequence(seq) => {
                let _ = writeln!(out, "{} [sequence: {} item(s)]", head, seq.items().len());
                if depth < max_depth {
                    for (idx, item) in seq.items().iter().enumerate() {
                        let _ = writeln!(out, "{}  Item {}", indent, idx + 1);
                        dump_object(item, depth + 2, max_depth, max_value_len, out);
                    }
                }
            }
            Value::PixelSequence(p) => {
                let _ = writeln!(out, "{} [encapsulated: {} fragment(s)]", head, p.fragments().len());
            }
        }
    }
}

fn preview_primitive(value: &PrimitiveValue, max_value_len: usize) -> String {
    match value {
        PrimitiveValue::U8(bytes) if bytes.len() > max_value_len => {
            format!("{} bytes", bytes.len())
        }
        _ => {
            let text = value.to_str();
            if text.is_empty() {
                format!("{} bytes", value.to_bytes().len())
            } else {
                truncate(&text, max_value_len)
            }
        }
    }
}

fn truncate(input: &str, limit: usize) -> String {
    match input.char_indices().nth(limit) {
        None => input.to_string(),
        Some((cut, _)) => format!("{}…", &input[..cut]),
    }
}

pub fn format_tag(tag: Tag) -> String {
    format!("({:04X},{:04X})", tag.group(), tag.element())
}

fn tag_name(tag: Tag) -> String {
    StandardDataDictionary
        .by_tag(tag)
        .map(|e| e.alias.to_string())
        .unwrap_or_else(|| "UnknownTag".to_string())
}
