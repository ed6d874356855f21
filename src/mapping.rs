//! A parser for obfuscation mapping files.
//!
//! The mapping file format is the one produced by the proguard/R8 family of
//! obfuscators, described
//! [here](https://www.guardsquare.com/manual/tools/retrace).

use std::str;

use serde::Deserialize;

#[cfg(feature = "uuid")]
use uuid::Uuid;

/// Error when parsing a mapping line.
///
/// Since the mapping is parsed line-by-line, an error also carries the
/// offending line.
#[derive(Copy, Clone, Debug, PartialEq, thiserror::Error)]
#[error("{kind}")]
pub struct ParseError<'s> {
    line: &'s [u8],
    kind: ParseErrorKind,
}

impl<'s> ParseError<'s> {
    /// The offending line that caused the error.
    pub fn line(&self) -> &[u8] {
        self.line
    }

    /// The specific parse Error.
    pub fn kind(&self) -> ParseErrorKind {
        self.kind
    }
}

/// The specific parse Error.
#[derive(Copy, Clone, Debug, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    /// The line failed utf-8 conversion.
    #[error(transparent)]
    Utf8Error(#[from] str::Utf8Error),
    /// The line failed parsing.
    #[error("{0}")]
    ParseError(&'static str),
}

/// An inclusive range of source lines attributed to one method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineRange {
    /// First attributed line, 1-based.
    pub start: u32,
    /// Last attributed line, inclusive.
    pub end: u32,
}

impl LineRange {
    /// Whether the given line number falls into this range.
    pub fn contains(&self, line: u32) -> bool {
        self.start <= line && line <= self.end
    }
}

/// A single record of an obfuscation mapping file.
#[derive(Clone, Debug, PartialEq)]
pub enum MappingRecord<'s> {
    /// A comment header, `# key[: value]`.
    ///
    /// R8-style JSON metadata comments are folded into this variant as well;
    /// the `sourceFile` one surfaces the original file name as its value.
    Header {
        /// The key of the header.
        key: &'s str,
        /// Optional value if the header is a KV pair.
        value: Option<&'s str>,
    },
    /// A class mapping, `original -> obfuscated:`.
    Class {
        /// Original name of the class.
        original: &'s str,
        /// Obfuscated name of the class.
        obfuscated: &'s str,
    },
    /// A field mapping, `type original -> obfuscated`.
    Field {
        /// Type of the field.
        ty: &'s str,
        /// Original name of the field.
        original: &'s str,
        /// Obfuscated name of the field.
        obfuscated: &'s str,
    },
    /// A method mapping, `[start:end:]ret original(args) -> obfuscated`.
    Method {
        /// Return type of the method.
        ty: &'s str,
        /// Original name of the method.
        original: &'s str,
        /// Obfuscated name of the method.
        obfuscated: &'s str,
        /// Arguments of the method as a raw string.
        arguments: &'s str,
        /// The range of obfuscated source lines attributed to this method.
        ///
        /// Absent for methods without an executable body (e.g. interface
        /// methods) and for `0:0` markers.
        line_range: Option<LineRange>,
    },
}

impl<'s> MappingRecord<'s> {
    /// Parses a single line of an obfuscation mapping file.
    ///
    /// # Examples
    ///
    /// ```
    /// use retrace::{LineRange, MappingRecord};
    ///
    /// let parsed = MappingRecord::try_parse(b"org.jeyzer.demo.DemoEvent -> a.b.c:");
    /// assert_eq!(
    ///     parsed,
    ///     Ok(MappingRecord::Class {
    ///         original: "org.jeyzer.demo.DemoEvent",
    ///         obfuscated: "a.b.c",
    ///     })
    /// );
    ///
    /// let parsed =
    ///     MappingRecord::try_parse(b"    51:56:void start(org.jeyzer.publish.JzrActionContext) -> a");
    /// assert_eq!(
    ///     parsed,
    ///     Ok(MappingRecord::Method {
    ///         ty: "void",
    ///         original: "start",
    ///         obfuscated: "a",
    ///         arguments: "org.jeyzer.publish.JzrActionContext",
    ///         line_range: Some(LineRange { start: 51, end: 56 }),
    ///     })
    /// );
    ///
    /// // methods without an executable body carry no line range
    /// let parsed = MappingRecord::try_parse(b"    java.lang.String getName() -> b");
    /// assert_eq!(
    ///     parsed,
    ///     Ok(MappingRecord::Method {
    ///         ty: "java.lang.String",
    ///         original: "getName",
    ///         obfuscated: "b",
    ///         arguments: "",
    ///         line_range: None,
    ///     })
    /// );
    /// ```
    pub fn try_parse(line: &'s [u8]) -> Result<Self, ParseError<'s>> {
        let (line, rest) = split_line(line);
        if !rest.iter().all(is_newline) {
            return Err(ParseError {
                line,
                kind: ParseErrorKind::ParseError("line is not a valid mapping record"),
            });
        }
        parse_record(line)
    }
}

/// An obfuscation mapping file.
#[derive(Clone, Default)]
pub struct ObfuscationMapping<'s> {
    source: &'s [u8],
}

impl std::fmt::Debug for ObfuscationMapping<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObfuscationMapping").finish()
    }
}

impl<'s> ObfuscationMapping<'s> {
    /// Create a new mapping over the raw file contents.
    pub fn new(source: &'s [u8]) -> Self {
        Self { source }
    }

    /// Whether this looks like a valid mapping file.
    ///
    /// # Examples
    ///
    /// ```
    /// use retrace::ObfuscationMapping;
    ///
    /// let valid = ObfuscationMapping::new(b"a -> b:\n    void run() -> b");
    /// assert_eq!(valid.is_valid(), true);
    ///
    /// let invalid = ObfuscationMapping::new(
    ///     br#"
    /// # looks: like
    /// a -> mapping:
    ///   but(is) -> not
    /// "#,
    /// );
    /// assert_eq!(invalid.is_valid(), false);
    /// ```
    pub fn is_valid(&self) -> bool {
        // In order to not parse the whole file, we look for a class followed
        // by a member in the first 50 records, which is a good heuristic.
        let mut has_class_line = false;
        for record in self.iter().take(50) {
            match record {
                Ok(MappingRecord::Class { .. }) => {
                    has_class_line = true;
                }
                Ok(MappingRecord::Field { .. }) | Ok(MappingRecord::Method { .. })
                    if has_class_line =>
                {
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    /// Whether the mapping file contains line-range info.
    ///
    /// # Examples
    ///
    /// ```
    /// use retrace::ObfuscationMapping;
    ///
    /// let with = ObfuscationMapping::new(b"a -> b:\n    1:1:void run() -> a");
    /// assert_eq!(with.has_line_info(), true);
    ///
    /// let without = ObfuscationMapping::new(b"a -> b:\n    void run() -> b");
    /// assert_eq!(without.has_line_info(), false);
    /// ```
    pub fn has_line_info(&self) -> bool {
        self.iter().flatten().any(|record| {
            matches!(
                record,
                MappingRecord::Method {
                    line_range: Some(_),
                    ..
                }
            )
        })
    }

    /// Returns a summary of the file.
    pub fn summary(&self) -> MappingSummary<'s> {
        MappingSummary::new(self)
    }

    /// Calculates the UUID of the mapping file.
    ///
    /// The UUID is a v5 hash over the raw file contents, so the same mapping
    /// always yields the same id.
    #[cfg(feature = "uuid")]
    pub fn uuid(&self) -> Uuid {
        lazy_static::lazy_static! {
            static ref NAMESPACE: Uuid = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"jeyzer.org");
        }
        Uuid::new_v5(&NAMESPACE, self.source)
    }

    /// Create an iterator over the [`MappingRecord`]s of the file.
    ///
    /// Lines that match no record grammar yield an `Err`; consumers decide
    /// whether to skip or abort.
    pub fn iter(&self) -> MappingRecordIter<'s> {
        MappingRecordIter { slice: self.source }
    }
}

/// An iterator yielding [`MappingRecord`]s, created by
/// [`ObfuscationMapping::iter`].
#[derive(Clone, Default)]
pub struct MappingRecordIter<'s> {
    slice: &'s [u8],
}

impl std::fmt::Debug for MappingRecordIter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingRecordIter").finish()
    }
}

impl<'s> Iterator for MappingRecordIter<'s> {
    type Item = Result<MappingRecord<'s>, ParseError<'s>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.slice = consume_leading_newlines(self.slice);
        if self.slice.is_empty() {
            return None;
        }

        let (line, rest) = split_line(self.slice);
        self.slice = rest;
        Some(parse_record(line))
    }
}

/// Summary of a mapping file.
#[derive(Clone, Debug)]
pub struct MappingSummary<'s> {
    compiler: Option<&'s str>,
    compiler_version: Option<&'s str>,
    min_api: Option<u32>,
    class_count: usize,
    method_count: usize,
}

impl<'s> MappingSummary<'s> {
    fn new(mapping: &ObfuscationMapping<'s>) -> MappingSummary<'s> {
        let mut compiler = None;
        let mut compiler_version = None;
        let mut min_api = None;
        let mut class_count = 0;
        let mut method_count = 0;

        for record in mapping.iter().flatten() {
            match record {
                MappingRecord::Header { key, value } => match key {
                    "compiler" => {
                        compiler = value;
                    }
                    "compiler_version" => {
                        compiler_version = value;
                    }
                    "min_api" => {
                        min_api = value.and_then(|x| x.parse().ok());
                    }
                    _ => {}
                },
                MappingRecord::Class { .. } => class_count += 1,
                MappingRecord::Method { .. } => method_count += 1,
                _ => {}
            }
        }

        MappingSummary {
            compiler,
            compiler_version,
            min_api,
            class_count,
            method_count,
        }
    }

    /// Returns the name of the compiler that created the mapping.
    pub fn compiler(&self) -> Option<&str> {
        self.compiler
    }

    /// Returns the version of the compiler.
    pub fn compiler_version(&self) -> Option<&str> {
        self.compiler_version
    }

    /// Returns the min-api value.
    pub fn min_api(&self) -> Option<u32> {
        self.min_api
    }

    /// Returns the number of classes in the mapping file.
    pub fn class_count(&self) -> usize {
        self.class_count
    }

    /// Returns the number of methods in the mapping file.
    pub fn method_count(&self) -> usize {
        self.method_count
    }
}

/// R8-style JSON metadata comment, e.g.
/// `# {"id":"sourceFile","fileName":"DemoEvent.kt"}`.
#[derive(Deserialize)]
struct MetadataComment<'s> {
    #[serde(borrow)]
    id: &'s str,
    #[serde(rename = "fileName", default, borrow)]
    file_name: Option<&'s str>,
}

fn parse_record(line: &[u8]) -> Result<MappingRecord<'_>, ParseError<'_>> {
    let text = str::from_utf8(line).map_err(|e| ParseError {
        line,
        kind: ParseErrorKind::Utf8Error(e),
    })?;

    let record = if let Some(rest) = text.strip_prefix('#') {
        parse_header(rest)
    } else if let Some(rest) = text.strip_prefix("    ") {
        parse_member(rest)
    } else {
        parse_class(text)
    };

    record.ok_or(ParseError {
        line,
        kind: ParseErrorKind::ParseError("line is not a valid mapping record"),
    })
}

fn parse_header(rest: &str) -> Option<MappingRecord<'_>> {
    let trimmed = rest.trim_start();
    if trimmed.starts_with('{') {
        if let Ok(meta) = serde_json::from_str::<MetadataComment>(trimmed) {
            return Some(MappingRecord::Header {
                key: meta.id,
                value: meta.file_name,
            });
        }
        // not a metadata object after all, fall back to the plain form
    }

    match rest.split_once(':') {
        Some((key, value)) => Some(MappingRecord::Header {
            key: key.trim(),
            value: Some(value.trim()),
        }),
        None => Some(MappingRecord::Header {
            key: rest.trim(),
            value: None,
        }),
    }
}

fn parse_class(text: &str) -> Option<MappingRecord<'_>> {
    // `originalclassname -> obfuscatedclassname:`
    let rest = text.strip_suffix(':')?;
    let (original, obfuscated) = rest.split_once(" -> ")?;
    if original.is_empty() || original.contains(' ') {
        return None;
    }
    if obfuscated.is_empty() || obfuscated.contains(' ') || obfuscated.contains(':') {
        return None;
    }
    Some(MappingRecord::Class {
        original,
        obfuscated,
    })
}

fn parse_member(rest: &str) -> Option<MappingRecord<'_>> {
    // field line or method line:
    // `originalfieldtype originalfieldname -> obfuscatedfieldname`
    // `[startline:endline:]ret originalmethodname(args)[:origstart[:origend]] -> obfuscatedmethodname`
    let (line_range, rest) = split_line_range(rest)?;

    let (ty, rest) = rest.split_once(' ')?;
    if ty.is_empty() {
        return None;
    }

    let (lhs, obfuscated) = rest.rsplit_once(" -> ")?;
    if obfuscated.is_empty() || obfuscated.contains(' ') {
        return None;
    }

    match lhs.find('(') {
        Some(paren) => {
            let original = &lhs[..paren];
            if original.is_empty() || original.contains(' ') {
                return None;
            }
            let after = &lhs[paren + 1..];
            let close = after.find(')')?;
            let arguments = &after[..close];
            // R8 appends the original line span after the argument list; the
            // leading range is the one frames are attributed by, so the
            // trailer is only validated and then dropped.
            if !is_original_lines_trailer(&after[close + 1..]) {
                return None;
            }
            Some(MappingRecord::Method {
                ty,
                original,
                obfuscated,
                arguments,
                line_range,
            })
        }
        None => {
            if line_range.is_some() || lhs.is_empty() || lhs.contains(' ') {
                return None;
            }
            Some(MappingRecord::Field {
                ty,
                original: lhs,
                obfuscated,
            })
        }
    }
}

fn split_line_range(s: &str) -> Option<(Option<LineRange>, &str)> {
    let digits = leading_digits(s);
    if digits == 0 {
        return Some((None, s));
    }
    let start: u32 = s[..digits].parse().ok()?;

    let rest = s[digits..].strip_prefix(':')?;
    let digits = leading_digits(rest);
    if digits == 0 {
        return None;
    }
    let end: u32 = rest[..digits].parse().ok()?;
    let rest = rest[digits..].strip_prefix(':')?;

    if start > end {
        return None;
    }
    // `0:0` markers carry no attributable range
    let range = (start > 0 && end > 0).then_some(LineRange { start, end });
    Some((range, rest))
}

fn is_original_lines_trailer(trailer: &str) -> bool {
    if trailer.is_empty() {
        return true;
    }
    let Some(trailer) = trailer.strip_prefix(':') else {
        return false;
    };
    let mut parts = 0;
    for part in trailer.split(':') {
        parts += 1;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }
    parts <= 2
}

fn leading_digits(s: &str) -> usize {
    s.bytes().take_while(u8::is_ascii_digit).count()
}

fn consume_leading_newlines(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|c| !is_newline(c)) {
        Some(pos) => &bytes[pos..],
        None => b"",
    }
}

/// Splits off the first line, excluding any line terminator.
fn split_line(bytes: &[u8]) -> (&[u8], &[u8]) {
    let pos = bytes.iter().position(is_newline).unwrap_or(bytes.len());
    bytes.split_at(pos)
}

fn is_newline(byte: &u8) -> bool {
    *byte == b'\r' || *byte == b'\n'
}
