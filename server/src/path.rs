/*
 * This file is part of meshreg.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Pure path utilities: normalization, folder/provider marks, twin
//! toggling, child-of testing, parent extraction. Nothing here touches
//! the link tree — these are string transforms any caller (registry,
//! sync peer) can use without taking a lock.
//!
//! Grammar: `/`-separated segments, a leading `/` marks an absolute
//! path, a trailing `/` marks a folder, a trailing `!` on the last
//! segment marks the provider side of a twin. An empty segment is
//! spelled `@` so it survives splitting on `/` (`//x` is `/@/x`).

const SEP: char = '/';
const PROVIDER_MARK: char = '!';
const EMPTY_SEGMENT: char = '@';

/// Split `path` into its `/`-separated segments. Does not validate;
/// callers normalize first. Segments are returned verbatim — an `@`
/// segment is not expanded here, see [`canonical_segment`].
fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEP).filter(|s| !s.is_empty())
}

/// Replace a literal `@` segment with the empty name it stands for.
/// Any other segment is returned unchanged.
pub fn canonical_segment(seg: &str) -> &str {
    if seg.len() == 1 && seg.starts_with(EMPTY_SEGMENT) {
        ""
    } else {
        seg
    }
}

/// The inverse of [`canonical_segment`]: spell an empty segment name as
/// `@` so it survives a later split/normalize round-trip.
pub fn escape_segment(name: &str) -> std::borrow::Cow<'_, str> {
    if name.is_empty() {
        std::borrow::Cow::Owned(EMPTY_SEGMENT.to_string())
    } else {
        std::borrow::Cow::Borrowed(name)
    }
}

/// `true` if `path` ends in `/`, i.e. names a folder.
pub fn is_folder(path: &str) -> bool {
    path.ends_with(SEP)
}

/// `true` if `path`'s last segment ends in `!`, i.e. names the
/// provider side of a twin. A folder is never a provider.
pub fn is_provider(path: &str) -> bool {
    if is_folder(path) {
        return false;
    }
    path.rsplit(SEP)
        .next()
        .map(|last| last.ends_with(PROVIDER_MARK))
        .unwrap_or(false)
}

/// `true` if `path` is structurally valid: non-empty, and not both a
/// folder and a provider (`/!` is illegal).
pub fn is_valid(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    !(is_folder(path) && path.trim_end_matches(SEP).ends_with(PROVIDER_MARK))
}

/// Collapse repeated `/` (preserving a leading pair that marks an
/// absolute path under the `@`-escaping convention), and preserve the
/// trailing folder mark. Idempotent: `normalize(normalize(p)) ==
/// normalize(p)`.
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let folder = is_folder(path);
    let absolute = path.starts_with(SEP);
    let leading_empty = absolute && path[1..].starts_with(SEP);
    let mut out = String::with_capacity(path.len());
    if absolute {
        out.push(SEP);
    }
    if leading_empty {
        out.push(EMPTY_SEGMENT);
        out.push(SEP);
    }
    let body = path.trim_start_matches(SEP);
    let mut first = true;
    for seg in segments(body) {
        if !first {
            out.push(SEP);
        }
        out.push_str(seg);
        first = false;
    }
    if folder && !out.ends_with(SEP) {
        out.push(SEP);
    }
    if out.is_empty() {
        out.push(SEP);
    }
    out
}

/// The last segment's name, without the trailing folder mark or
/// provider mark. `None` for the root.
pub fn last_segment(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches(SEP);
    let last = trimmed.rsplit(SEP).next()?;
    if last.is_empty() {
        return None;
    }
    Some(last.trim_end_matches(PROVIDER_MARK))
}

/// The parent path of `path`, or `None` for the root. Preserves
/// absoluteness; the result is always a folder path.
pub fn parent(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches(SEP);
    let idx = trimmed.rfind(SEP)?;
    let absolute = path.starts_with(SEP);
    let parent_segs = &trimmed[..idx];
    if parent_segs.is_empty() {
        return Some(if absolute {
            SEP.to_string()
        } else {
            String::new()
        });
    }
    let mut out = String::with_capacity(parent_segs.len() + 1);
    out.push_str(parent_segs);
    out.push(SEP);
    Some(out)
}

/// Toggle the trailing `!` on the last segment. Folder paths have no
/// twin and are returned unchanged.
pub fn twin_path(path: &str) -> Option<String> {
    if is_folder(path) {
        return None;
    }
    let (head, last) = match path.rfind(SEP) {
        Some(idx) => (&path[..=idx], &path[idx + 1..]),
        None => ("", path),
    };
    let toggled = match last.strip_suffix(PROVIDER_MARK) {
        Some(base) => base.to_string(),
        None => format!("{last}{PROVIDER_MARK}"),
    };
    Some(format!("{head}{toggled}"))
}

/// Force the provider polarity of `path` to `provider`. A no-op if the
/// path is already at the requested polarity.
pub fn provider_path(path: &str, provider: bool) -> Option<String> {
    if is_provider(path) == provider {
        return Some(path.to_string());
    }
    twin_path(path)
}

/// If `descendant` lies strictly under `parent` in the path tree,
/// return the immediate child of `parent` on the way to `descendant`
/// (a folder path unless it's exactly `descendant` itself and
/// `descendant` is a leaf). Returns `None` if `descendant` does not
/// descend from `parent`.
pub fn child_path(parent: &str, descendant: &str) -> Option<String> {
    let parent_norm = normalize_as_folder(parent);
    let descendant_norm = normalize(descendant);
    let rest = descendant_norm.strip_prefix(&parent_norm)?;
    if rest.is_empty() {
        return None;
    }
    let next_sep = rest.find(SEP);
    match next_sep {
        Some(idx) => Some(format!("{parent_norm}{}{SEP}", &rest[..idx])),
        None => Some(format!("{parent_norm}{rest}")),
    }
}

fn normalize_as_folder(path: &str) -> String {
    let mut norm = normalize(path);
    if !norm.ends_with(SEP) {
        norm.push(SEP);
    }
    norm
}

/// `true` if `maybe_ancestor` is `path` itself or a folder ancestor of
/// it.
pub fn is_descendant_of(path: &str, maybe_ancestor: &str) -> bool {
    let anc = normalize_as_folder(maybe_ancestor);
    let p = normalize(path);
    p == anc.trim_end_matches(SEP) || p.starts_with(&anc)
}

/// Rewrite `path`, which lives under `from_base`, so that it instead
/// lives under `to_base`. Used by the sync peer to translate a local
/// mount path to/from its remote counterpart. Returns `None` if `path`
/// is not under `from_base`.
pub fn rebase(path: &str, from_base: &str, to_base: &str) -> Option<String> {
    let from = normalize_as_folder(from_base);
    let to = normalize_as_folder(to_base);
    let p = normalize(path);
    let rest = p.strip_prefix(from.trim_end_matches(SEP))?;
    let rest = rest.strip_prefix(SEP).unwrap_or(rest);
    if rest.is_empty() {
        Some(to)
    } else {
        Some(format!("{to}{rest}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_and_provider_detection() {
        assert!(is_folder("/a/b/"));
        assert!(!is_folder("/a/b"));
        assert!(is_provider("/a/b!"));
        assert!(!is_provider("/a/b"));
        assert!(!is_provider("/a/b!/"));
    }

    #[test]
    fn illegal_folder_provider_combo_is_invalid() {
        assert!(!is_valid("/!"));
        assert!(!is_valid(""));
        assert!(is_valid("/"));
    }

    #[test]
    fn normalize_collapses_duplicate_separators() {
        assert_eq!(normalize("/a//b///c"), "/a/b/c");
        assert_eq!(normalize("/a/b/"), "/a/b/");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn normalize_expands_leading_pair_to_at_abbreviation() {
        assert_eq!(normalize("//x"), "/@/x");
        assert_eq!(normalize("//x/y"), "/@/x/y");
        assert_eq!(normalize("/@/x"), "/@/x");
    }

    #[test]
    fn normalize_is_idempotent() {
        for p in ["/a//b/", "/x/y/z", "/", "/a!", "//x"] {
            let once = normalize(p);
            let twice = normalize(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn last_segment_strips_marks() {
        assert_eq!(last_segment("/a/b/c!"), Some("c"));
        assert_eq!(last_segment("/a/b/"), Some("b"));
        assert_eq!(last_segment("/"), None);
    }

    #[test]
    fn parent_walks_up_one_level() {
        assert_eq!(parent("/a/b/c"), Some("/a/b/".to_string()));
        assert_eq!(parent("/a/"), Some("/".to_string()));
        assert_eq!(parent("/"), None);
    }

    #[test]
    fn twin_path_toggles_provider_mark() {
        assert_eq!(twin_path("/a/b"), Some("/a/b!".to_string()));
        assert_eq!(twin_path("/a/b!"), Some("/a/b".to_string()));
        assert_eq!(twin_path("/a/"), None);
    }

    #[test]
    fn provider_path_forces_polarity() {
        assert_eq!(provider_path("/a/b", true), Some("/a/b!".to_string()));
        assert_eq!(provider_path("/a/b!", true), Some("/a/b!".to_string()));
        assert_eq!(provider_path("/a/b!", false), Some("/a/b".to_string()));
    }

    #[test]
    fn child_path_finds_immediate_descendant() {
        assert_eq!(
            child_path("/a/", "/a/b/c"),
            Some("/a/b/".to_string())
        );
        assert_eq!(child_path("/a/", "/a/b"), Some("/a/b".to_string()));
        assert_eq!(child_path("/a/", "/z/b"), None);
        assert_eq!(child_path("/a/", "/a/"), None);
    }

    #[test]
    fn is_descendant_of_includes_self() {
        assert!(is_descendant_of("/a/b", "/a/"));
        assert!(is_descendant_of("/a/", "/a/"));
        assert!(!is_descendant_of("/x/b", "/a/"));
    }

    #[test]
    fn rebase_translates_mount_prefix() {
        assert_eq!(
            rebase("/local/sensors/temp", "/local/", "/remote/"),
            Some("/remote/sensors/temp".to_string())
        );
        assert_eq!(rebase("/other/x", "/local/", "/remote/"), None);
    }

    #[test]
    fn empty_segment_escape_round_trips() {
        let escaped = escape_segment("");
        assert_eq!(escaped, "@");
        assert_eq!(canonical_segment(&escaped), "");
        assert_eq!(canonical_segment("x"), "x");
        let segs: Vec<&str> = segments("/@/x").collect();
        assert_eq!(segs, vec!["@", "x"]);
    }
}
