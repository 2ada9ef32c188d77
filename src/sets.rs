//! Token-set edits on comma-separated lists
//!
//! Subscription fields and accumulated default distributions are
//! maintained as ordered, de-duplicated lists of tokens.

fn tokens(list: &str) -> impl Iterator<Item = &str> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
}

/// Append each token of `items` not already in `list`
///
/// Returns the new list (joined with `sep`) and how many tokens were added.
///
/// # Examples
///
/// ```
/// use news_relay::sets::set_add;
///
/// let (list, added) = set_add("comp.all, misc.test", "misc.test,rec.pets", ", ");
/// assert_eq!(list, "comp.all, misc.test, rec.pets");
/// assert_eq!(added, 1);
/// ```
#[must_use]
pub fn set_add(list: &str, items: &str, sep: &str) -> (String, usize) {
    let mut out: Vec<&str> = tokens(list).collect();
    let mut added = 0;
    for item in tokens(items) {
        if !out.contains(&item) {
            out.push(item);
            added += 1;
        }
    }
    (out.join(sep), added)
}

/// Remove every token of `items` present in `list`
///
/// Returns the new list (joined with `sep`) and how many tokens were removed.
#[must_use]
pub fn set_sub(list: &str, items: &str, sep: &str) -> (String, usize) {
    let doomed: Vec<&str> = tokens(items).collect();
    let mut removed = 0;
    let kept: Vec<&str> = tokens(list)
        .filter(|t| {
            let hit = doomed.contains(t);
            if hit {
                removed += 1;
            }
            !hit
        })
        .collect();
    (kept.join(sep), removed)
}
