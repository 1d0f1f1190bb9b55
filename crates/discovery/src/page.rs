//! Cursor-based paging over a capability snapshot (§4.7, §8 invariant 10).

use muxd_domain::Entry;

use crate::error::DiscoveryError;

/// List operations never return more than this many entries per page
/// (§4.7), regardless of the caller-requested page size.
pub const MAX_PAGE_SIZE: usize = 200;

/// Page `entries` starting just past `cursor`. `cursor` must exactly match
/// a previous entry's key (tool/prompt name or resource URI) or be
/// empty/absent for the first page; anything else is `InvalidCursor`.
pub fn paginate(
    entries: &[Entry],
    cursor: Option<&str>,
    page_size: usize,
) -> Result<(Vec<Entry>, Option<String>), DiscoveryError> {
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let start = match cursor {
        None => 0,
        Some(c) if c.is_empty() => 0,
        Some(c) => {
            let pos = entries
                .iter()
                .position(|e| e.key == c)
                .ok_or(DiscoveryError::InvalidCursor)?;
            pos + 1
        }
    };
    if start > entries.len() {
        return Err(DiscoveryError::InvalidCursor);
    }
    let end = (start + page_size).min(entries.len());
    let page = entries[start..end].to_vec();
    let next_cursor = if end < entries.len() {
        page.last().map(|e| e.key.clone())
    } else {
        None
    };
    Ok((page, next_cursor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use muxd_domain::EntrySource;

    fn entry(key: &str) -> Entry {
        Entry {
            key: key.into(),
            spec_key: "fp".into(),
            server_name: "srv".into(),
            schema: serde_json::json!({}),
            source: EntrySource::Live,
            cached_at: Utc::now(),
        }
    }

    #[test]
    fn empty_cursor_starts_at_zero() {
        let entries = vec![entry("a"), entry("b")];
        let (page, next) = paginate(&entries, None, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].key, "a");
        assert_eq!(next, Some("a".to_string()));
    }

    #[test]
    fn last_page_has_no_next_cursor() {
        let entries = vec![entry("a"), entry("b")];
        let (page, next) = paginate(&entries, Some("a"), 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].key, "b");
        assert!(next.is_none());
    }

    #[test]
    fn unknown_cursor_is_invalid() {
        let entries = vec![entry("a")];
        assert!(matches!(
            paginate(&entries, Some("ghost"), 10),
            Err(DiscoveryError::InvalidCursor)
        ));
    }

    #[test]
    fn cursor_on_final_entry_yields_empty_page() {
        let entries = vec![entry("a")];
        let (page, next) = paginate(&entries, Some("a"), 10).unwrap();
        assert!(page.is_empty());
        assert!(next.is_none());
    }

    #[test]
    fn page_size_is_capped_at_max() {
        let entries: Vec<Entry> = (0..250).map(|i| entry(&i.to_string())).collect();
        let (page, next) = paginate(&entries, None, 1000).unwrap();
        assert_eq!(page.len(), MAX_PAGE_SIZE);
        assert!(next.is_some());
    }
}
