//! Repair of UTF-8 text that was mis-decoded as ISO-8859-1.
//!
//! Older clients wrote history whose site keys and titles had gone through a
//! Latin-1 decode of UTF-8 bytes. Such text shows C1 control characters
//! (U+0080..U+009F) or replacement characters. Reinterpreting every char as a
//! single byte recovers the original byte sequence, which is then decoded as
//! UTF-8. The repair never fails: anything it cannot fix is returned as-is.

use std::borrow::Cow;

use super::history::{HistoryRecord, KEY_SEPARATOR};

/// Whether `text` carries the marks of a Latin-1 mis-decode
pub fn looks_misdecoded(text: &str) -> bool {
    text.chars()
        .any(|c| c == char::REPLACEMENT_CHARACTER || ('\u{80}'..'\u{A0}').contains(&c))
}

/// One Latin-1 → UTF-8 round trip, or `None` if the text cannot be reinterpreted
fn redecode(text: &str) -> Option<String> {
    let bytes = text
        .chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

/// Repair `text` if it looks mis-decoded.
///
/// The round trip is repeated until the text no longer looks mis-decoded or can
/// no longer be reinterpreted, so text that was mangled twice is fixed fully and
/// `repair(&repair(s)) == repair(s)` holds.
pub fn repair(text: &str) -> Cow<'_, str> {
    let mut current = Cow::Borrowed(text);
    while looks_misdecoded(&current) {
        match redecode(&current) {
            Some(fixed) => current = Cow::Owned(fixed),
            None => break,
        }
    }

    if let Cow::Owned(fixed) = &current {
        log::debug!("encoding repair: '{}' -> '{}'", text, fixed);
    }
    current
}

/// Repair the site-key segment of a composite history key.
///
/// Keys with fewer than three segments are left alone.
pub fn repair_history_key(key: &str) -> Cow<'_, str> {
    let parts: Vec<&str> = key.split(KEY_SEPARATOR).collect();
    if parts.len() < 3 {
        return Cow::Borrowed(key);
    }

    match repair(parts[0]) {
        Cow::Borrowed(_) => Cow::Borrowed(key),
        Cow::Owned(site_key) => {
            let mut fixed = site_key;
            for part in &parts[1..] {
                fixed.push_str(KEY_SEPARATOR);
                fixed.push_str(part);
            }
            Cow::Owned(fixed)
        }
    }
}

/// Repair the key and title of a record in place. Returns whether anything changed.
pub fn repair_record(record: &mut HistoryRecord) -> bool {
    let fixed_key = match repair_history_key(&record.key) {
        Cow::Owned(key) => Some(key),
        Cow::Borrowed(_) => None,
    };
    let fixed_name = match repair(&record.vod_name) {
        Cow::Owned(name) => Some(name),
        Cow::Borrowed(_) => None,
    };

    let changed = fixed_key.is_some() || fixed_name.is_some();
    if let Some(key) = fixed_key {
        record.key = key;
    }
    if let Some(name) = fixed_name {
        record.vod_name = name;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decode UTF-8 bytes as if they were Latin-1, the way the corrupt data was produced
    fn mangle(text: &str) -> String {
        text.bytes().map(char::from).collect()
    }

    #[test]
    fn test_repairs_mangled_cjk() {
        let original = "电影天堂";
        let mangled = mangle(original);
        assert!(looks_misdecoded(&mangled));
        assert_eq!(repair(&mangled), original);
    }

    #[test]
    fn test_clean_text_untouched() {
        for text in ["", "plain ascii", "电影天堂", "café"] {
            assert!(matches!(repair(text), Cow::Borrowed(_)), "{text}");
        }
    }

    #[test]
    fn test_replacement_char_fails_open() {
        let text = "broken \u{FFFD} title";
        assert_eq!(repair(text), text);
    }

    #[test]
    fn test_invalid_utf8_after_round_trip_fails_open() {
        // 0x85 alone is a stray continuation byte
        let text = "a\u{85}b";
        assert!(looks_misdecoded(text));
        assert_eq!(repair(text), text);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let twice = mangle(&mangle("追剧"));
        let samples = [
            "plain".to_string(),
            mangle("追剧"),
            twice,
            "x\u{FFFD}".to_string(),
            "a\u{85}b".to_string(),
            mangle("Ā\u{80}"),
        ];
        for s in &samples {
            let once = repair(s).into_owned();
            assert_eq!(repair(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn test_double_mangled_text_fully_repaired() {
        let twice = mangle(&mangle("追剧"));
        assert_eq!(repair(&twice), "追剧");
    }

    #[test]
    fn test_repair_history_key_only_touches_site_segment() {
        let key = format!("{}@@@{}@@@3", mangle("站点"), mangle("片名"));
        let fixed = repair_history_key(&key);
        assert_eq!(fixed, format!("站点@@@{}@@@3", mangle("片名")));
    }

    #[test]
    fn test_repair_record() {
        let mut record = HistoryRecord::new(format!("{}@@@9@@@1", mangle("站点")), mangle("片名"));
        assert!(repair_record(&mut record));
        assert_eq!(record.key, "站点@@@9@@@1");
        assert_eq!(record.vod_name, "片名");
        assert!(!repair_record(&mut record));
    }

    #[test]
    fn test_repair_history_key_short_key_unchanged() {
        let key = format!("{}@@@1", mangle("站点"));
        assert_eq!(repair_history_key(&key), key);
    }
}
