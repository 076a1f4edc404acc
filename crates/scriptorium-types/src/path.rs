//! Absolute and relative path values.
//!
//! Two disjoint kinds:
//!
//! - [`AbsPath`] always begins with exactly one `/` and never ends with `/`
//!   unless it is the root.
//! - [`RelPath`] never begins with `/`. The empty relative path means "here".
//!
//! Construction never fails: empty segments, `.` and `..` are coerced away,
//! so any user-supplied string becomes a valid value. Both kinds compare and
//! hash by their normalized string.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Normalized absolute path (`/a/b/c.md`, or `/` for the root).
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct AbsPath(String);

/// Normalized relative path (`a/b/c.md`, or the empty path).
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct RelPath(String);

/// Split a raw string into normalized segments.
///
/// `..` pops the previous segment and is dropped at the top.
fn normalized_segments(raw: &str) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for seg in raw.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
    }
    out
}

/// Split `name` into stem and extension (extension keeps its dot).
///
/// A leading dot is part of the stem, so `.trash` has no extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

// ============================================================================
// AbsPath
// ============================================================================

impl AbsPath {
    /// Build a normalized absolute path from any string.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let segs = normalized_segments(raw.as_ref());
        if segs.is_empty() {
            Self::root()
        } else {
            Self(format!("/{}", segs.join("/")))
        }
    }

    /// The root path `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Segments after the root, in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Number of segments; the root has depth 0.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Last segment, or the empty string for the root.
    pub fn basename(&self) -> &str {
        if self.is_root() {
            return "";
        }
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Parent path. The root is its own parent.
    pub fn dirname(&self) -> AbsPath {
        match self.0.rfind('/') {
            Some(0) | None => Self::root(),
            Some(idx) => Self(self.0[..idx].to_string()),
        }
    }

    /// File extension without the dot, lowercased.
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = split_extension(self.basename());
        ext.strip_prefix('.')
            .filter(|e| !e.is_empty())
            .map(|e| e.to_ascii_lowercase())
    }

    /// Append one or more segments and renormalize.
    pub fn join(&self, part: impl AsRef<str>) -> AbsPath {
        Self::new(format!("{}/{}", self.0, part.as_ref()))
    }

    /// Append a relative path.
    pub fn join_rel(&self, rel: &RelPath) -> AbsPath {
        self.join(rel.as_str())
    }

    /// Same parent, different basename.
    pub fn with_basename(&self, name: &str) -> AbsPath {
        if self.is_root() {
            return Self::root();
        }
        self.dirname().join(name)
    }

    /// True when `self` is `other` or lies beneath it (segment-wise).
    pub fn starts_with(&self, other: &AbsPath) -> bool {
        if other.is_root() || self == other {
            return true;
        }
        self.0.starts_with(&other.0) && self.0.as_bytes().get(other.0.len()) == Some(&b'/')
    }

    /// The part of `self` below `ancestor`, if `ancestor` contains it.
    pub fn strip_prefix(&self, ancestor: &AbsPath) -> Option<RelPath> {
        if !self.starts_with(ancestor) {
            return None;
        }
        if ancestor.is_root() {
            return Some(RelPath::new(&self.0));
        }
        Some(RelPath::new(&self.0[ancestor.0.len()..]))
    }

    /// Move `self` from under `from` to under `to`.
    ///
    /// Returns `None` when `self` is not inside `from`.
    pub fn rebase(&self, from: &AbsPath, to: &AbsPath) -> Option<AbsPath> {
        self.strip_prefix(from).map(|rest| to.join_rel(&rest))
    }

    /// Drop the leading slash.
    pub fn to_rel(&self) -> RelPath {
        RelPath::new(&self.0)
    }
}

impl fmt::Display for AbsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AbsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AbsPath({:?})", self.0)
    }
}

impl AsRef<str> for AbsPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AbsPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AbsPath {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&AbsPath> for AbsPath {
    fn from(p: &AbsPath) -> Self {
        p.clone()
    }
}

impl Serialize for AbsPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AbsPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}

// ============================================================================
// RelPath
// ============================================================================

impl RelPath {
    /// Build a normalized relative path from any string.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalized_segments(raw.as_ref()).join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// First segment and the remainder, or `None` for the empty path.
    pub fn split_first(&self) -> Option<(&str, RelPath)> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.split_once('/') {
            Some((head, rest)) => Some((head, RelPath(rest.to_string()))),
            None => Some((self.0.as_str(), RelPath::default())),
        }
    }

    pub fn join(&self, part: impl AsRef<str>) -> RelPath {
        Self::new(format!("{}/{}", self.0, part.as_ref()))
    }

    /// Root the path at `/`.
    pub fn to_abs(&self) -> AbsPath {
        AbsPath::new(&self.0)
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelPath({:?})", self.0)
    }
}

impl AsRef<str> for RelPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RelPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for RelPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RelPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}

// ============================================================================
// Free functions
// ============================================================================

/// Shorthand for [`AbsPath::new`].
pub fn abs_path(raw: impl AsRef<str>) -> AbsPath {
    AbsPath::new(raw)
}

/// Shorthand for [`RelPath::new`].
pub fn rel_path(raw: impl AsRef<str>) -> RelPath {
    RelPath::new(raw)
}

/// Concatenate `parts` onto `base` and renormalize.
pub fn join_path<I, S>(base: &AbsPath, parts: I) -> AbsPath
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts
        .into_iter()
        .fold(base.clone(), |acc, part| acc.join(part))
}

/// True when `parent` is `child` or one of its ancestors.
pub fn is_ancestor(child: &AbsPath, parent: &AbsPath) -> bool {
    child.starts_with(parent)
}

/// Next candidate name: `file.md` → `file-1.md`, `file-1.md` → `file-2.md`.
///
/// The trailing digit run of the stem is incremented as a decimal string,
/// so the sequence is strictly increasing and never repeats.
pub fn inc_name(name: &str) -> String {
    let (stem, ext) = split_extension(name);
    let head_len = stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if head_len < stem.len() {
        let (head, digits) = stem.split_at(head_len);
        format!("{head}{}{ext}", increment_decimal(digits))
    } else {
        format!("{stem}-1{ext}")
    }
}

/// [`inc_name`] applied to the basename. The root is a fixed point.
pub fn inc_path(path: &AbsPath) -> AbsPath {
    if path.is_root() {
        return path.clone();
    }
    path.with_basename(&inc_name(path.basename()))
}

fn increment_decimal(digits: &str) -> String {
    let mut chars: Vec<char> = digits.chars().collect();
    for c in chars.iter_mut().rev() {
        if *c == '9' {
            *c = '0';
        } else {
            *c = char::from(*c as u8 + 1);
            return chars.into_iter().collect();
        }
    }
    let mut out = String::with_capacity(chars.len() + 1);
    out.push('1');
    out.extend(chars);
    out
}

/// Drop every path that has an ancestor elsewhere in the list.
///
/// Deleting `/a` already deletes `/a/b`, so batch removal works on the
/// reduced set. Output is sorted.
pub fn reduce_lineage(paths: &[AbsPath]) -> Vec<AbsPath> {
    let mut sorted: Vec<AbsPath> = paths.to_vec();
    sorted.sort();
    sorted.dedup();
    let mut kept: Vec<AbsPath> = Vec::new();
    for path in sorted {
        if !kept.iter().any(|k| path.starts_with(k)) {
            kept.push(path);
        }
    }
    kept
}

// ============================================================================
// Percent encoding
// ============================================================================

/// Bytes left alone by segment encoding (the `encodeURIComponent` set).
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"-_.!~*'()".contains(&b)
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// A segment made only of unreserved bytes and `%XX` escapes, with at
/// least one escape.
fn looks_encoded(seg: &str) -> bool {
    let bytes = seg.as_bytes();
    let mut saw_escape = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let valid = i + 2 < bytes.len()
                    && hex_val(bytes[i + 1]).is_some()
                    && hex_val(bytes[i + 2]).is_some();
                if !valid {
                    return false;
                }
                saw_escape = true;
                i += 3;
            }
            b if is_unreserved(b) => i += 1,
            _ => return false,
        }
    }
    saw_escape
}

/// Percent-encode one segment unless it is already encoded.
pub fn encode_segment(seg: &str) -> String {
    if looks_encoded(seg) {
        return seg.to_string();
    }
    let mut out = String::with_capacity(seg.len());
    for &b in seg.as_bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Decode `%XX` escapes in one segment.
///
/// Malformed escapes stay literal; a result that is not UTF-8 leaves the
/// segment untouched.
pub fn decode_segment(seg: &str) -> String {
    if !seg.contains('%') {
        return seg.to_string();
    }
    let bytes = seg.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| seg.to_string())
}

/// Encode every `/`-separated segment independently.
///
/// A segment that already looks encoded is passed through, so a name
/// holding a literal escape such as `%41.md` does not round trip:
/// `decode_path(&encode_path(p))` yields `A.md` for it. Names mixing
/// `%XX` with reserved characters are still encoded and round trip.
pub fn encode_path(path: &str) -> String {
    path.split('/').map(encode_segment).collect::<Vec<_>>().join("/")
}

/// Decode every `/`-separated segment independently.
pub fn decode_path(path: &str) -> String {
    path.split('/').map(decode_segment).collect::<Vec<_>>().join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abs_normalization() {
        assert_eq!(AbsPath::new("").as_str(), "/");
        assert_eq!(AbsPath::new("a/b").as_str(), "/a/b");
        assert_eq!(AbsPath::new("//a///b/").as_str(), "/a/b");
        assert_eq!(AbsPath::new("/a/./b/../c").as_str(), "/a/c");
        assert_eq!(AbsPath::new("/../..").as_str(), "/");
    }

    #[test]
    fn test_rel_normalization() {
        assert_eq!(RelPath::new("/a/b/").as_str(), "a/b");
        assert_eq!(RelPath::new("").as_str(), "");
        assert!(RelPath::new("/").is_empty());
    }

    #[test]
    fn test_components() {
        let p = AbsPath::new("/docs/notes/todo.md");
        assert_eq!(p.basename(), "todo.md");
        assert_eq!(p.dirname().as_str(), "/docs/notes");
        assert_eq!(p.depth(), 3);
        assert_eq!(p.extension().as_deref(), Some("md"));

        let root = AbsPath::root();
        assert_eq!(root.basename(), "");
        assert_eq!(root.dirname(), root);
        assert_eq!(root.depth(), 0);
        assert_eq!(AbsPath::new("/a").dirname(), root);
    }

    #[test]
    fn test_join() {
        let base = AbsPath::new("/a");
        assert_eq!(base.join("b/c.md").as_str(), "/a/b/c.md");
        assert_eq!(join_path(&base, ["b", "/c/", "d"]).as_str(), "/a/b/c/d");
        assert_eq!(join_path(&AbsPath::root(), ["x"]).as_str(), "/x");
    }

    #[test]
    fn test_ancestor() {
        let a = AbsPath::new("/a");
        let ab = AbsPath::new("/a/b");
        let abc = AbsPath::new("/abc");
        assert!(is_ancestor(&ab, &a));
        assert!(is_ancestor(&a, &a));
        assert!(!is_ancestor(&abc, &a));
        assert!(!is_ancestor(&a, &ab));
        assert!(is_ancestor(&abc, &AbsPath::root()));
    }

    #[test]
    fn test_strip_and_rebase() {
        let p = AbsPath::new("/a/b/c.md");
        assert_eq!(p.strip_prefix(&AbsPath::new("/a")).unwrap().as_str(), "b/c.md");
        assert!(p.strip_prefix(&AbsPath::new("/b")).is_none());
        assert_eq!(
            p.rebase(&AbsPath::new("/a"), &AbsPath::new("/z")).unwrap().as_str(),
            "/z/b/c.md"
        );
    }

    #[test]
    fn test_split_first() {
        let r = RelPath::new("a/b/c");
        let (head, rest) = r.split_first().unwrap();
        assert_eq!(head, "a");
        assert_eq!(rest.as_str(), "b/c");
        let c = RelPath::new("c");
        let (head, rest) = c.split_first().unwrap();
        assert_eq!(head, "c");
        assert!(rest.is_empty());
        assert!(RelPath::default().split_first().is_none());
    }

    #[test]
    fn test_inc_name() {
        assert_eq!(inc_name("file.md"), "file-1.md");
        assert_eq!(inc_name("file-1.md"), "file-2.md");
        assert_eq!(inc_name("file-9.md"), "file-10.md");
        assert_eq!(inc_name("v099"), "v100");
        assert_eq!(inc_name(".trash"), ".trash-1");
        assert_eq!(inc_name("archive.tar.gz"), "archive.tar-1.gz");
    }

    #[test]
    fn test_inc_path_root_fixed_point() {
        assert_eq!(inc_path(&AbsPath::root()), AbsPath::root());
        assert_eq!(inc_path(&AbsPath::new("/a/note.md")).as_str(), "/a/note-1.md");
    }

    #[test]
    fn test_inc_never_revisits() {
        let mut seen = std::collections::HashSet::new();
        let mut p = AbsPath::new("/notes/file.md");
        for _ in 0..250 {
            assert!(seen.insert(p.clone()), "revisited {p}");
            p = inc_path(&p);
        }
    }

    #[test]
    fn test_reduce_lineage() {
        let paths = vec![
            AbsPath::new("/a/b"),
            AbsPath::new("/a"),
            AbsPath::new("/c.md"),
            AbsPath::new("/a/b/c"),
            AbsPath::new("/ab"),
        ];
        let reduced = reduce_lineage(&paths);
        let strs: Vec<_> = reduced.iter().map(|p| p.as_str()).collect();
        assert_eq!(strs, vec!["/a", "/ab", "/c.md"]);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        for raw in [
            "/plain/path.md",
            "/with space/a b.md",
            "/unicode/ノート.md",
            "/percent/100%.md",
            "/odd/#hash?q=1&x.png",
            "relative/dir/file (1).md",
        ] {
            let encoded = encode_path(raw);
            assert_eq!(decode_path(&encoded), raw, "round trip of {raw}");
        }
    }

    #[test]
    fn test_encode_idempotent() {
        let once = encode_path("/a b/c d.png");
        assert_eq!(once, "/a%20b/c%20d.png");
        assert_eq!(encode_path(&once), once);
    }

    #[test]
    fn test_literal_escape_names_decode_to_their_escape() {
        let encoded = encode_path("/x/%41.md");
        assert_eq!(encoded, "/x/%41.md");
        assert_eq!(decode_path(&encoded), "/x/A.md");

        // A reserved character forces encoding and the name survives
        let mixed = encode_path("/x/%41 b.md");
        assert_eq!(mixed, "/x/%2541%20b.md");
        assert_eq!(decode_path(&mixed), "/x/%41 b.md");
    }

    #[test]
    fn test_serde_normalizes() {
        let p: AbsPath = serde_json::from_str("\"a//b/\"").unwrap();
        assert_eq!(p.as_str(), "/a/b");
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"/a/b\"");
    }
}
