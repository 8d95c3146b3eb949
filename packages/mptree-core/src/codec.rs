use std::cmp::Ordering;
use std::fmt::Write as _;

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 1-based ordinal of a node among its siblings.
pub type Position = u64;

pub const DEFAULT_WIDTH: usize = 4;
pub const DEFAULT_SEPARATOR: char = '.';
const MAX_WIDTH: usize = 18;

/// Translates between position sequences and materialized path strings.
///
/// Every segment is the position rendered as zero-padded decimal of one fixed width, and
/// segments are joined by a separator that sorts below `'0'`. Together these make byte order
/// on encoded paths equal preorder on the tree and make string prefixes equal ancestry, so the
/// database can do all ordering and subtree filtering with plain range predicates.
///
/// The width is uniform across levels: a subtree move keeps every descendant's suffix
/// byte-for-byte, which is only valid if the suffix means the same thing at the new depth.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "CodecConfig", into = "CodecConfig")
)]
pub struct PathCodec {
    width: usize,
    separator: char,
}

impl Default for PathCodec {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            separator: DEFAULT_SEPARATOR,
        }
    }
}

impl PathCodec {
    pub fn new(width: usize, separator: char) -> Result<Self> {
        if width == 0 || width > MAX_WIDTH {
            return Err(Error::Configuration(format!(
                "path segment width must be within 1..={MAX_WIDTH}, got {width}"
            )));
        }
        // The separator's successor is used as the exclusive upper bound of subtree ranges,
        // so both must stay below '0'.
        if !('!'..='/').contains(&separator) {
            return Err(Error::Configuration(format!(
                "path separator must be ASCII punctuation sorting below '0', got {separator:?}"
            )));
        }
        Ok(Self { width, separator })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Largest position a single segment can hold.
    pub fn max_position(&self) -> Position {
        10u64.pow(self.width as u32) - 1
    }

    pub fn encode(&self, seq: &[Position]) -> Result<String> {
        if seq.is_empty() {
            return Err(Error::InvalidOperation(
                "cannot encode an empty position sequence".into(),
            ));
        }
        let mut out = String::with_capacity(seq.len() * (self.width + 1));
        for (i, &pos) in seq.iter().enumerate() {
            if i > 0 {
                out.push(self.separator);
            }
            self.push_segment(&mut out, pos)?;
        }
        Ok(out)
    }

    pub fn decode(&self, path: &str) -> Result<Vec<Position>> {
        if path.is_empty() {
            return Err(Error::malformed(path, "empty path"));
        }
        let mut seq = Vec::with_capacity(self.depth(path));
        for segment in path.split(self.separator) {
            seq.push(self.decode_segment(path, segment)?);
        }
        Ok(seq)
    }

    /// True when `ancestor` is a strict ancestor of `descendant`.
    pub fn is_prefix_of(&self, ancestor: &str, descendant: &str) -> bool {
        descendant.len() > ancestor.len()
            && descendant.starts_with(ancestor)
            && descendant.as_bytes()[ancestor.len()] == self.separator as u8
    }

    /// Byte-wise comparison; matches `ORDER BY` under binary / "C" collation.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        a.as_bytes().cmp(b.as_bytes())
    }

    pub fn root_path(&self) -> String {
        let mut out = String::with_capacity(self.width);
        let _ = write!(out, "{:0width$}", 1, width = self.width);
        out
    }

    pub fn child_path(&self, parent: &str, position: Position) -> Result<String> {
        let mut out = String::with_capacity(self.child_path_len(parent));
        out.push_str(parent);
        out.push(self.separator);
        self.push_segment(&mut out, position)?;
        Ok(out)
    }

    /// Parent path by string slicing; `None` for a single-segment path.
    pub fn parent_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        path.rfind(self.separator).map(|idx| &path[..idx])
    }

    pub fn depth(&self, path: &str) -> usize {
        path.matches(self.separator).count() + 1
    }

    pub fn last_position(&self, path: &str) -> Result<Position> {
        let segment = match path.rfind(self.separator) {
            Some(idx) => &path[idx + 1..],
            None => path,
        };
        self.decode_segment(path, segment)
    }

    /// Every strict ancestor path of `path`, root first.
    pub fn ancestor_paths(&self, path: &str) -> Vec<String> {
        path.match_indices(self.separator)
            .map(|(idx, _)| path[..idx].to_string())
            .collect()
    }

    /// Half-open byte range `[lower, upper)` containing exactly the strict descendants of `path`.
    pub fn subtree_bounds(&self, path: &str) -> (String, String) {
        let mut lower = String::with_capacity(path.len() + 1);
        lower.push_str(path);
        lower.push(self.separator);
        let mut upper = String::with_capacity(path.len() + 1);
        upper.push_str(path);
        upper.push(char::from(self.separator as u8 + 1));
        (lower, upper)
    }

    /// Encoded length of any direct child of `parent`.
    pub fn child_path_len(&self, parent: &str) -> usize {
        parent.len() + 1 + self.width
    }

    /// Replace the `old_prefix` of `path` with `new_prefix`, keeping the suffix untouched.
    pub fn rebase(&self, path: &str, old_prefix: &str, new_prefix: &str) -> Result<String> {
        if path != old_prefix && !self.is_prefix_of(old_prefix, path) {
            return Err(Error::InvalidOperation(format!(
                "{path:?} is not inside the subtree at {old_prefix:?}"
            )));
        }
        let mut out = String::with_capacity(new_prefix.len() + path.len() - old_prefix.len());
        out.push_str(new_prefix);
        out.push_str(&path[old_prefix.len()..]);
        Ok(out)
    }

    /// Add `delta` to the segment at 1-based `level` and re-encode.
    pub fn shift(&self, path: &str, level: usize, delta: Position) -> Result<String> {
        let mut seq = self.decode(path)?;
        let slot = level
            .checked_sub(1)
            .and_then(|i| seq.get_mut(i))
            .ok_or_else(|| {
                Error::InvalidOperation(format!("{path:?} has no segment at level {level}"))
            })?;
        *slot = slot.checked_add(delta).ok_or_else(|| {
            Error::InvalidOperation(format!("position overflow shifting {path:?}"))
        })?;
        self.encode(&seq)
    }

    fn push_segment(&self, out: &mut String, position: Position) -> Result<()> {
        if position == 0 {
            return Err(Error::InvalidOperation("positions are 1-based".into()));
        }
        if position > self.max_position() {
            return Err(Error::InvalidOperation(format!(
                "position {position} exceeds the {}-digit segment capacity ({})",
                self.width,
                self.max_position()
            )));
        }
        let _ = write!(out, "{:0width$}", position, width = self.width);
        Ok(())
    }

    fn decode_segment(&self, path: &str, segment: &str) -> Result<Position> {
        if segment.len() != self.width {
            return Err(Error::malformed(
                path,
                format!(
                    "segment {segment:?} has width {}, expected {}",
                    segment.len(),
                    self.width
                ),
            ));
        }
        if !segment.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::malformed(
                path,
                format!("segment {segment:?} is not decimal"),
            ));
        }
        let position: Position = segment
            .parse()
            .map_err(|e| Error::malformed(path, format!("segment {segment:?}: {e}")))?;
        if position == 0 {
            return Err(Error::malformed(path, "position 0 is never encoded"));
        }
        Ok(position)
    }
}

#[cfg(feature = "serde")]
#[derive(Serialize, Deserialize)]
#[serde(default)]
struct CodecConfig {
    width: usize,
    separator: char,
}

#[cfg(feature = "serde")]
impl Default for CodecConfig {
    fn default() -> Self {
        let codec = PathCodec::default();
        Self {
            width: codec.width,
            separator: codec.separator,
        }
    }
}

#[cfg(feature = "serde")]
impl TryFrom<CodecConfig> for PathCodec {
    type Error = Error;

    fn try_from(cfg: CodecConfig) -> Result<Self> {
        PathCodec::new(cfg.width, cfg.separator)
    }
}

#[cfg(feature = "serde")]
impl From<PathCodec> for CodecConfig {
    fn from(codec: PathCodec) -> Self {
        Self {
            width: codec.width,
            separator: codec.separator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_root_and_children() {
        let codec = PathCodec::default();
        assert_eq!(codec.root_path(), "0001");
        assert_eq!(codec.encode(&[1]).unwrap(), "0001");
        assert_eq!(codec.encode(&[1, 12, 3]).unwrap(), "0001.0012.0003");
        assert_eq!(codec.child_path("0001", 42).unwrap(), "0001.0042");
    }

    #[test]
    fn decode_rejects_anything_encode_cannot_produce() {
        let codec = PathCodec::default();
        for bad in [
            "", "1", "00001", "0001.", ".0001", "0001..0002", "0001.00a2", "0000", "0001.0000",
            "0001/0002", "0001.+001",
        ] {
            match codec.decode(bad) {
                Err(Error::MalformedPath { .. }) => {}
                other => panic!("expected MalformedPath for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn encode_rejects_invalid_sequences() {
        let codec = PathCodec::new(2, '.').unwrap();
        assert!(matches!(codec.encode(&[]), Err(Error::InvalidOperation(_))));
        assert!(matches!(codec.encode(&[1, 0]), Err(Error::InvalidOperation(_))));
        assert!(matches!(codec.encode(&[1, 100]), Err(Error::InvalidOperation(_))));
        assert_eq!(codec.encode(&[1, 99]).unwrap(), "01.99");
    }

    #[test]
    fn prefix_relation_requires_segment_boundary() {
        let codec = PathCodec::default();
        assert!(codec.is_prefix_of("0001", "0001.0002"));
        assert!(codec.is_prefix_of("0001", "0001.0002.0003"));
        assert!(!codec.is_prefix_of("0001", "0001"));
        assert!(!codec.is_prefix_of("0001.0001", "0001.00012"));
        assert!(!codec.is_prefix_of("0001.0002", "0001.0001.0002"));
    }

    #[test]
    fn structural_helpers() {
        let codec = PathCodec::default();
        let p = "0001.0003.0007";
        assert_eq!(codec.parent_path(p), Some("0001.0003"));
        assert_eq!(codec.parent_path("0001"), None);
        assert_eq!(codec.depth(p), 3);
        assert_eq!(codec.last_position(p).unwrap(), 7);
        assert_eq!(codec.ancestor_paths(p), vec!["0001", "0001.0003"]);
        assert_eq!(
            codec.subtree_bounds("0001.0003"),
            ("0001.0003.".to_string(), "0001.0003/".to_string())
        );
        assert_eq!(codec.child_path_len("0001.0003"), 14);
        assert_eq!(codec.rebase(p, "0001.0003", "0001.0009.0001").unwrap(), "0001.0009.0001.0007");
        assert!(codec.rebase("0001.0004", "0001.0003", "0001.0009").is_err());
        assert_eq!(codec.shift(p, 2, 2).unwrap(), "0001.0005.0007");
    }

    #[test]
    fn subtree_bounds_bracket_descendants_only() {
        let codec = PathCodec::default();
        let (lo, hi) = codec.subtree_bounds("0001.0002");
        for inside in ["0001.0002.0001", "0001.0002.9999.0001"] {
            assert!(inside > lo.as_str() && inside < hi.as_str(), "{inside}");
        }
        for outside in ["0001.0002", "0001.0003", "0001.0001.0005", "0001"] {
            assert!(!(outside > lo.as_str() && outside < hi.as_str()), "{outside}");
        }
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(PathCodec::new(0, '.').is_err());
        assert!(PathCodec::new(19, '.').is_err());
        assert!(PathCodec::new(4, '0').is_err());
        assert!(PathCodec::new(4, ':').is_err());
        assert!(PathCodec::new(4, '/').is_ok());
    }
}
