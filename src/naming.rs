//
// naming.rs
// IML-Prep
//
// Builds filesystem-safe output folder names from study/series metadata.
//

use std::sync::OnceLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dicom_access::{
    ElementAccess, BODY_PART_EXAMINED, SERIES_DESCRIPTION, SERIES_INSTANCE_UID, SERIES_NUMBER,
    STUDY_DATE, STUDY_DESCRIPTION, STUDY_INSTANCE_UID,
};

/// How converted images are grouped below their patient folder.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SplitBy {
    Study,
    #[default]
    Series,
    #[value(name = "series+bodypart")]
    #[serde(rename = "series+bodypart")]
    SeriesBodyPart,
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\-.]+").expect("static regex"))
}

fn underscore_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_+").expect("static regex"))
}

/// Replaces anything outside `[\w.-]` with `_`, collapses runs and trims; `maxlen == 0` keeps the full length.
pub fn slugify(input: &str, maxlen: usize) -> String {
    if input.is_empty() {
        return "NA".to_string();
    }
    let replaced = unsafe_chars().replace_all(input, "_");
    let collapsed = underscore_runs().replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches('_');
    if maxlen > 0 {
        trimmed.chars().take(maxlen).collect()
    } else {
        trimmed.to_string()
    }
}

pub fn short_uid(uid: &str) -> &str {
    let count = uid.chars().count();
    if count <= 6 {
        return uid;
    }
    let start = uid
        .char_indices()
        .nth(count - 6)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    &uid[start..]
}

fn series_number_label(raw: Option<&str>) -> String {
    match raw {
        Some(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => match s.parse::<u64>() {
            Ok(n) => format!("S{:03}", n),
            Err(_) => "SNA".to_string(),
        },
        _ => "SNA".to_string(),
    }
}

/// Output sub-folder for one instance, derived from its study/series attributes.
pub fn subdir_for<T: ElementAccess>(obj: &T, split_by: SplitBy) -> String {
    let text = |tag| obj.element_str(tag).unwrap_or_default();

    let date = slugify(&text(STUDY_DATE), 16);
    let study_desc = slugify(&text(STUDY_DESCRIPTION), 48);
    let series_desc = slugify(&text(SERIES_DESCRIPTION), 48);
    let body_part = slugify(&text(BODY_PART_EXAMINED), 24);
    let series_num = series_number_label(obj.element_str(SERIES_NUMBER).as_deref());
    let study_uid = text(STUDY_INSTANCE_UID);
    let series_uid = text(SERIES_INSTANCE_UID);

    let base = match split_by {
        SplitBy::Study => format!("{}__{}__{}", date, study_desc, short_uid(&study_uid)),
        SplitBy::Series => format!(
            "{}__{}__{}__{}",
            date,
            series_num,
            series_desc,
            short_uid(&series_uid)
        ),
        SplitBy::SeriesBodyPart => format!(
            "{}__{}__{}__{}__{}",
            date,
            series_num,
            series_desc,
            body_part,
            short_uid(&series_uid)
        ),
    };

    let slug = slugify(&base, 120);
    if slug.is_empty() {
        "UNSORTED".to_string()
    } else {
        slug
    }
}

/// Sort key that orders embedded digit runs numerically ("2" before "10").
pub fn natural_key(name: &str) -> Vec<NaturalChunk> {
    let mut chunks = Vec::new();
    let mut digits = String::new();
    let mut text = String::new();

    for ch in name.chars() {
        if ch.is_ascii_digit() {
            if !text.is_empty() {
                chunks.push(NaturalChunk::Text(std::mem::take(&mut text)));
            }
            digits.push(ch);
        } else {
            if !digits.is_empty() {
                chunks.push(NaturalChunk::number(&std::mem::take(&mut digits)));
            }
            text.push(ch);
        }
    }
    if !digits.is_empty() {
        chunks.push(NaturalChunk::number(&digits));
    }
    if !text.is_empty() {
        chunks.push(NaturalChunk::Text(text));
    }
    chunks
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaturalChunk {
    // Numbers sort before text, matching a leading-digit comparison.
    Number(u128, usize),
    Text(String),
}

impl NaturalChunk {
    fn number(digits: &str) -> Self {
        // Leading zeros break ties so "01" and "1" stay distinct.
        NaturalChunk::Number(digits.parse().unwrap_or(u128::MAX), digits.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_replaces_and_collapses() {
        assert_eq!(slugify("CT  Crânio / sem contraste", 0), "CT_Crânio_sem_contraste");
        assert_eq!(slugify("__a!!b__", 0), "a_b");
        assert_eq!(slugify("", 10), "NA");
        assert_eq!(slugify("abcdefgh", 4), "abcd");
        assert_eq!(slugify("1.2-3", 0), "1.2-3");
    }

    #[test]
    fn short_uid_keeps_tail() {
        assert_eq!(short_uid("1.2.840.113619.2.55"), "9.2.55");
        assert_eq!(short_uid("12345"), "12345");
        assert_eq!(short_uid(""), "");
    }

    #[test]
    fn series_number_requires_digits() {
        assert_eq!(series_number_label(Some("7")), "S007");
        assert_eq!(series_number_label(Some("1234")), "S1234");
        assert_eq!(series_number_label(Some("-1")), "SNA");
        assert_eq!(series_number_label(None), "SNA");
    }

    #[test]
    fn natural_key_orders_numbers() {
        let mut names = vec!["img10.png", "img2.png", "img1.png"];
        names.sort_by_key(|n| natural_key(n));
        assert_eq!(names, vec!["img1.png", "img2.png", "img10.png"]);
    }
}
