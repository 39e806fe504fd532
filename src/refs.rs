/// Domain operations over a session's reference list.
///
/// The list is kept sorted at all times: active references in descending TTL
/// order (a missing TTL counts as the configured default), disabled entries
/// pushed to the end. Path is the identity key; adding an existing path is a
/// no-op regardless of TTL or persistence flags.
use crate::error::{Error, Result};
use crate::session::Reference;

pub fn sort(refs: &mut [Reference], default_ttl: i64) {
    // Stable: ties keep their insertion order.
    refs.sort_by_key(|r| (r.disabled, std::cmp::Reverse(effective_ttl(r, default_ttl))));
}

fn effective_ttl(r: &Reference, default_ttl: i64) -> i64 {
    r.ttl.unwrap_or(default_ttl)
}

/// Append a new reference unless the path is already present, then re-sort.
/// Returns whether the reference was added.
pub fn add(
    refs: &mut Vec<Reference>,
    path: &str,
    ttl: Option<i64>,
    persist: bool,
    default_ttl: i64,
) -> bool {
    if refs.iter().any(|r| r.path == path) {
        return false;
    }
    refs.push(Reference::new(path, ttl.or(Some(default_ttl)), persist));
    sort(refs, default_ttl);
    true
}

/// Set the TTL for `path`. A TTL of 0 or below disables the reference; a
/// positive TTL re-enables it.
pub fn update_ttl(refs: &mut [Reference], path: &str, new_ttl: i64, default_ttl: i64) -> Result<()> {
    let r = refs
        .iter_mut()
        .find(|r| r.path == path)
        .ok_or_else(|| Error::NotFound(format!("reference '{path}'")))?;
    apply_ttl(r, new_ttl);
    sort(refs, default_ttl);
    Ok(())
}

pub fn update_ttl_by_index(
    refs: &mut [Reference],
    index: usize,
    new_ttl: i64,
    default_ttl: i64,
) -> Result<()> {
    let r = refs
        .get_mut(index)
        .ok_or_else(|| Error::Validation(format!("reference index {index} out of range")))?;
    apply_ttl(r, new_ttl);
    sort(refs, default_ttl);
    Ok(())
}

fn apply_ttl(r: &mut Reference, new_ttl: i64) {
    r.ttl = Some(new_ttl.max(0));
    r.disabled = new_ttl <= 0;
}

/// Age every non-persistent, enabled reference by one prompt build. A TTL
/// that reaches 0 disables the reference.
pub fn decrement_all_ttl(refs: &mut [Reference], default_ttl: i64) {
    for r in refs.iter_mut() {
        if r.persist || r.disabled {
            continue;
        }
        let next = effective_ttl(r, default_ttl) - 1;
        r.ttl = Some(next.max(0));
        if next <= 0 {
            r.disabled = true;
        }
    }
    sort(refs, default_ttl);
}

/// Flip the disabled flag; returns the new state.
pub fn toggle_disabled_by_index(
    refs: &mut [Reference],
    index: usize,
    default_ttl: i64,
) -> Result<bool> {
    let r = refs
        .get_mut(index)
        .ok_or_else(|| Error::Validation(format!("reference index {index} out of range")))?;
    r.disabled = !r.disabled;
    let state = r.disabled;
    sort(refs, default_ttl);
    Ok(state)
}

pub fn update_persist_by_index(
    refs: &mut [Reference],
    index: usize,
    persist: bool,
    default_ttl: i64,
) -> Result<()> {
    let r = refs
        .get_mut(index)
        .ok_or_else(|| Error::Validation(format!("reference index {index} out of range")))?;
    r.persist = persist;
    sort(refs, default_ttl);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(path: &str, ttl: Option<i64>) -> Reference {
        Reference::new(path, ttl, false)
    }

    #[test]
    fn test_sort_active_desc_then_disabled() {
        let mut refs = vec![r("low.py", Some(1)), r("high.py", Some(10)), {
            let mut d = r("disabled.py", Some(5));
            d.disabled = true;
            d
        }];
        sort(&mut refs, 3);
        let order: Vec<&str> = refs.iter().map(|x| x.path.as_str()).collect();
        assert_eq!(order, vec!["high.py", "low.py", "disabled.py"]);
    }

    #[test]
    fn test_sort_none_ttl_uses_default() {
        let mut refs = vec![r("none.py", None), r("high.py", Some(10)), r("low.py", Some(1))];
        sort(&mut refs, 5);
        let order: Vec<&str> = refs.iter().map(|x| x.path.as_str()).collect();
        assert_eq!(order, vec!["high.py", "none.py", "low.py"]);
    }

    #[test]
    fn test_add_dedupes_on_path() {
        let mut refs = Vec::new();
        assert!(add(&mut refs, "a.md", None, false, 3));
        assert!(!add(&mut refs, "a.md", Some(99), true, 3));
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].ttl, Some(3));
        assert!(!refs[0].persist);
    }

    #[test]
    fn test_update_ttl_zero_disables_positive_enables() {
        let mut refs = vec![r("a.md", Some(3))];
        update_ttl(&mut refs, "a.md", 0, 3).unwrap();
        assert!(refs[0].disabled);
        assert_eq!(refs[0].ttl, Some(0));

        update_ttl(&mut refs, "a.md", 4, 3).unwrap();
        assert!(!refs[0].disabled);
        assert_eq!(refs[0].ttl, Some(4));
    }

    #[test]
    fn test_update_ttl_unknown_path() {
        let mut refs = vec![r("a.md", Some(3))];
        assert!(update_ttl(&mut refs, "missing.md", 1, 3).is_err());
    }

    #[test]
    fn test_decrement_skips_persistent_and_disabled() {
        let mut persistent = r("keep.md", Some(2));
        persistent.persist = true;
        let mut disabled = r("off.md", Some(2));
        disabled.disabled = true;
        let mut refs = vec![r("a.md", Some(2)), persistent, disabled];

        decrement_all_ttl(&mut refs, 3);

        let by_path = |p: &str| refs.iter().find(|x| x.path == p).unwrap().clone();
        assert_eq!(by_path("a.md").ttl, Some(1));
        assert_eq!(by_path("keep.md").ttl, Some(2));
        assert_eq!(by_path("off.md").ttl, Some(2));
    }

    #[test]
    fn test_decrement_to_zero_disables() {
        let mut refs = vec![r("a.md", Some(1)), r("b.md", None)];
        decrement_all_ttl(&mut refs, 1);
        assert!(refs.iter().all(|x| x.disabled));
        assert!(refs.iter().all(|x| x.ttl == Some(0)));
    }

    #[test]
    fn test_decrement_n_times_equals_bulk_decrement() {
        let mut stepped = vec![r("a.md", Some(5)), r("b.md", Some(2))];
        for _ in 0..4 {
            decrement_all_ttl(&mut stepped, 3);
        }
        // a: 5-4 = 1 still active; b: floored at 0, disabled after hitting 0.
        let a = stepped.iter().find(|x| x.path == "a.md").unwrap();
        let b = stepped.iter().find(|x| x.path == "b.md").unwrap();
        assert_eq!(a.ttl, Some(1));
        assert!(!a.disabled);
        assert_eq!(b.ttl, Some(0));
        assert!(b.disabled);
    }

    #[test]
    fn test_toggle_and_persist_by_index() {
        let mut refs = vec![r("a.md", Some(3))];
        assert!(toggle_disabled_by_index(&mut refs, 0, 3).unwrap());
        assert!(!toggle_disabled_by_index(&mut refs, 0, 3).unwrap());
        update_persist_by_index(&mut refs, 0, true, 3).unwrap();
        assert!(refs[0].persist);
        assert!(toggle_disabled_by_index(&mut refs, 7, 3).is_err());
    }
}
