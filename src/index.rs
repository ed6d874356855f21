//! The queryable obfuscated-name index built from a mapping file.

use std::collections::HashMap;
use std::fmt;

use crate::mapping::{LineRange, MappingRecord, ObfuscationMapping};

/// One original method reachable under an obfuscated name.
///
/// Several originals can collapse onto the same obfuscated name through
/// overloading or inlining; the line range is what tells them apart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodEntry<'s> {
    obfuscated: &'s str,
    original: &'s str,
    ty: &'s str,
    arguments: &'s str,
    line_range: Option<LineRange>,
}

impl<'s> MethodEntry<'s> {
    /// The obfuscated name of the method.
    pub fn obfuscated(&self) -> &'s str {
        self.obfuscated
    }

    /// The original name of the method.
    pub fn original(&self) -> &'s str {
        self.original
    }

    /// The original return type of the method.
    pub fn return_type(&self) -> &'s str {
        self.ty
    }

    /// The original argument list of the method, as a raw string.
    pub fn arguments(&self) -> &'s str {
        self.arguments
    }

    /// The range of obfuscated source lines attributed to this method.
    pub fn line_range(&self) -> Option<LineRange> {
        self.line_range
    }

    /// Whether a stack-frame line number is attributed to this method.
    ///
    /// Always `false` for entries without a range (the abstract-method
    /// case), whatever the input.
    pub fn contains_line(&self, line: u32) -> bool {
        self.line_range.map_or(false, |range| range.contains(line))
    }
}

impl fmt::Display for MethodEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}({})", self.ty, self.original, self.arguments)
    }
}

/// One class of the mapping, with its per-obfuscated-name method table.
#[derive(Clone, Debug)]
pub struct ClassEntry<'s> {
    obfuscated: &'s str,
    original: &'s str,
    source_file: Option<&'s str>,
    methods: HashMap<&'s str, Vec<MethodEntry<'s>>>,
}

impl<'s> ClassEntry<'s> {
    /// The obfuscated name of the class, in dotted form.
    pub fn obfuscated(&self) -> &'s str {
        self.obfuscated
    }

    /// The original name of the class, in dotted form.
    pub fn original(&self) -> &'s str {
        self.original
    }

    /// The original source file of the class, when the mapping recorded one.
    pub fn source_file(&self) -> Option<&'s str> {
        self.source_file
    }

    /// All original methods reachable under an obfuscated method name, in
    /// mapping-file declaration order. Empty if the name is unknown.
    pub fn methods_named(&self, obfuscated: &str) -> &[MethodEntry<'s>] {
        self.methods.get(obfuscated).map_or(&[], Vec::as_slice)
    }
}

/// An index from obfuscated class name to [`ClassEntry`].
///
/// Built once from an [`ObfuscationMapping`] and read-only afterwards, so it
/// can be shared freely across threads rewriting independent traces.
///
/// # Examples
///
/// ```
/// use retrace::MappingIndex;
///
/// let index = MappingIndex::from(
///     "org.jeyzer.demo.features.event.DemoEvent -> a.b.c:\n    51:56:void start() -> a",
/// );
///
/// let class = index.lookup_class("a.b.c").unwrap();
/// assert_eq!(class.original(), "org.jeyzer.demo.features.event.DemoEvent");
/// assert!(class.methods_named("a")[0].contains_line(53));
/// ```
#[derive(Clone, Debug, Default)]
pub struct MappingIndex<'s> {
    classes: HashMap<&'s str, ClassEntry<'s>>,
}

impl<'s> MappingIndex<'s> {
    /// Build the index from a mapping.
    ///
    /// Unparsable mapping lines are skipped; field records are parsed but
    /// not indexed.
    pub fn new(mapping: ObfuscationMapping<'s>) -> Self {
        let mut classes = HashMap::new();
        let mut current: Option<ClassEntry<'s>> = None;

        for record in mapping.iter().filter_map(Result::ok) {
            match record {
                MappingRecord::Header { key, value } => {
                    // R8 places the sourceFile comment right below its class line
                    if key == "sourceFile" {
                        if let Some(class) = current.as_mut() {
                            class.source_file = value;
                        }
                    }
                }
                MappingRecord::Class {
                    original,
                    obfuscated,
                } => {
                    if let Some(class) = current.take() {
                        classes.insert(class.obfuscated, class);
                    }
                    current = Some(ClassEntry {
                        obfuscated,
                        original,
                        source_file: None,
                        methods: HashMap::new(),
                    });
                }
                MappingRecord::Method {
                    ty,
                    original,
                    obfuscated,
                    arguments,
                    line_range,
                } => {
                    if let Some(class) = current.as_mut() {
                        class
                            .methods
                            .entry(obfuscated)
                            .or_insert_with(|| Vec::with_capacity(1))
                            .push(MethodEntry {
                                obfuscated,
                                original,
                                ty,
                                arguments,
                                line_range,
                            });
                    }
                }
                MappingRecord::Field { .. } => {}
            }
        }
        if let Some(class) = current.take() {
            classes.insert(class.obfuscated, class);
        }

        Self { classes }
    }

    /// Looks up a class by its fully-qualified obfuscated name.
    ///
    /// A missing entry is the normal outcome for JDK and library classes.
    pub fn lookup_class(&self, obfuscated: &str) -> Option<&ClassEntry<'s>> {
        self.classes.get(obfuscated)
    }

    /// The number of classes in the index.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the index holds no classes at all.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl<'s> From<&'s str> for MappingIndex<'s> {
    fn from(s: &'s str) -> Self {
        Self::new(ObfuscationMapping::new(s.as_bytes()))
    }
}

impl<'s> From<&'s [u8]> for MappingIndex<'s> {
    fn from(s: &'s [u8]) -> Self {
        Self::new(ObfuscationMapping::new(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static MAPPING: &str = "\
org.jeyzer.demo.features.MonitorTask -> a.b.c:
    51:56:void start(org.jeyzer.publish.JzrActionContext) -> a
    60:65:void restart() -> a
    void show() -> a
    java.lang.String getName() -> b
org.jeyzer.demo.features.c.e -> a.b.d:
    boolean oneshot -> a
";

    #[test]
    fn lookup_is_by_obfuscated_name() {
        let index = MappingIndex::from(MAPPING);
        assert_eq!(index.len(), 2);

        let class = index.lookup_class("a.b.c").unwrap();
        assert_eq!(class.original(), "org.jeyzer.demo.features.MonitorTask");
        assert_eq!(class.obfuscated(), "a.b.c");

        assert!(index.lookup_class("org.jeyzer.demo.features.MonitorTask").is_none());
        assert!(index.lookup_class("java.lang.Thread").is_none());
    }

    #[test]
    fn methods_keep_declaration_order() {
        let index = MappingIndex::from(MAPPING);
        let class = index.lookup_class("a.b.c").unwrap();

        let methods = class.methods_named("a");
        assert_eq!(methods.len(), 3);
        assert_eq!(methods[0].original(), "start");
        assert_eq!(methods[1].original(), "restart");
        assert_eq!(methods[2].original(), "show");

        assert!(class.methods_named("zz").is_empty());
    }

    #[test]
    fn contains_line_is_false_without_a_range() {
        let index = MappingIndex::from(MAPPING);
        let class = index.lookup_class("a.b.c").unwrap();
        let show = &class.methods_named("a")[2];

        assert_eq!(show.line_range(), None);
        assert!(!show.contains_line(0));
        assert!(!show.contains_line(53));
        assert!(!show.contains_line(u32::MAX));
    }

    #[test]
    fn method_entry_displays_its_signature() {
        let index = MappingIndex::from(MAPPING);
        let class = index.lookup_class("a.b.c").unwrap();
        assert_eq!(
            class.methods_named("a")[0].to_string(),
            "void start(org.jeyzer.publish.JzrActionContext)"
        );
        assert_eq!(class.methods_named("b")[0].to_string(), "java.lang.String getName()");
    }

    #[test]
    fn source_file_header_attaches_to_the_open_class() {
        let index = MappingIndex::from(
            "com.example.Main -> a.a:\n# {\"id\":\"sourceFile\",\"fileName\":\"Main.kt\"}\n    1:1:void run() -> a\ncom.example.Other -> a.b:\n",
        );
        assert_eq!(index.lookup_class("a.a").unwrap().source_file(), Some("Main.kt"));
        assert_eq!(index.lookup_class("a.b").unwrap().source_file(), None);
    }

    #[test]
    fn fields_are_not_indexed_as_methods() {
        let index = MappingIndex::from(MAPPING);
        let class = index.lookup_class("a.b.d").unwrap();
        assert!(class.methods_named("a").is_empty());
    }
}
