//! The line-rewriting engine.
//!
//! Classifies each raw trace line against the formats accumulated over the
//! years (recorder dumps, jstack, Java Flight Recorder) and substitutes the
//! original names for the obfuscated ones it recognizes. Anything it does
//! not recognize is echoed unchanged; rewriting never fails.

use crate::index::{ClassEntry, MappingIndex};

// The jzr recorder emits space-indented dumps, jstack and JFR tab-indented
// ones.
const AT_PREFIX: &str = "    at ";
const AT_ALT_PREFIX: &str = "\tat ";
const LOCKED_PREFIX: &str = "      - locked ";
const LOCKED_ALT_PREFIX: &str = "\t- locked ";
// Only the JFR shape exists for "waiting to lock"; the recorder never
// emits it.
const WAITING_PREFIX: &str = "\t- waiting to lock ";
const THREAD_HEADER_PREFIX: &str = "\"";
const CAUSED_BY_PREFIX: &str = "Caused by: ";
const JAVA_SUFFIX: &str = ".java";
const ALTERNATE_INDENT: &str = "                ";

/// One trace line, classified by its recognized prefix.
///
/// First matching prefix wins; the order below is part of the contract.
/// Classification is by prefix alone; a line whose body then fails its
/// grammar is echoed unchanged.
enum TraceLine<'l> {
    Frame(&'l str),
    LockHeld(&'l str),
    LockAwaited(&'l str),
    ThreadHeader(&'l str),
    Exception { caused_by: bool, rest: &'l str },
}

impl<'l> TraceLine<'l> {
    fn classify(line: &'l str) -> Self {
        if line.starts_with(AT_PREFIX) || line.starts_with(AT_ALT_PREFIX) {
            TraceLine::Frame(line)
        } else if line.starts_with(LOCKED_PREFIX) || line.starts_with(LOCKED_ALT_PREFIX) {
            TraceLine::LockHeld(line)
        } else if line.starts_with(WAITING_PREFIX) {
            TraceLine::LockAwaited(line)
        } else if line.starts_with(THREAD_HEADER_PREFIX) {
            TraceLine::ThreadHeader(line)
        } else {
            match line.strip_prefix(CAUSED_BY_PREFIX) {
                Some(rest) => TraceLine::Exception {
                    caused_by: true,
                    rest,
                },
                None => TraceLine::Exception {
                    caused_by: false,
                    rest: line,
                },
            }
        }
    }
}

/// The pieces of a stack-frame line,
/// `at [module]class.method([module-alt]source[:line])`.
struct Frame<'l> {
    module: Option<&'l str>,
    class: &'l str,
    method: &'l str,
    module_alt: Option<&'l str>,
    source: &'l str,
    line: Option<u32>,
}

/// Rewrites obfuscated trace lines using a [`MappingIndex`].
///
/// The rewriter holds no state besides the index reference; every call is
/// independent, so one rewriter (or one index shared by several) can serve
/// any number of traces concurrently.
///
/// # Examples
///
/// ```
/// use retrace::{LineRewriter, MappingIndex};
///
/// let index = MappingIndex::from(
///     "org.jeyzer.demo.features.MonitorTask -> a.b.c:\n    51:56:void run() -> a",
/// );
/// let rewriter = LineRewriter::new(&index);
///
/// assert_eq!(
///     rewriter.rewrite_line("\tat a.b.c.a(SourceFile:53)"),
///     "\tat org.jeyzer.demo.features.MonitorTask.run(SourceFile:53)\n",
/// );
/// ```
#[derive(Clone, Copy, Debug)]
pub struct LineRewriter<'s> {
    index: &'s MappingIndex<'s>,
}

impl<'s> LineRewriter<'s> {
    /// Create a new rewriter over a built index.
    pub fn new(index: &'s MappingIndex<'s>) -> Self {
        Self { index }
    }

    /// Rewrites one raw trace line.
    ///
    /// Always returns exactly one newline-terminated chunk. A frame whose
    /// line number cannot tell several collapsed originals apart lists the
    /// extra candidates on indented continuation lines inside that chunk.
    /// Unrecognized or unmapped input comes back verbatim.
    pub fn rewrite_line(&self, line: &str) -> String {
        let mut out = String::with_capacity(line.len() + 1);
        self.append_line(&mut out, line);
        out
    }

    /// Rewrites a whole trace, line by line.
    ///
    /// # Examples
    ///
    /// ```
    /// use retrace::{LineRewriter, MappingIndex};
    ///
    /// let index = MappingIndex::from("com.example.Mapper -> a.b:");
    /// let rewriter = LineRewriter::new(&index);
    ///
    /// assert_eq!(
    ///     rewriter.rewrite_trace("a.b: Crash\n    ... 13 more"),
    ///     "com.example.Mapper: Crash\n    ... 13 more\n",
    /// );
    /// ```
    pub fn rewrite_trace(&self, trace: &str) -> String {
        let mut out = String::with_capacity(trace.len() + 1);
        for line in trace.lines() {
            self.append_line(&mut out, line);
        }
        out
    }

    fn append_line(&self, out: &mut String, line: &str) {
        match TraceLine::classify(line) {
            TraceLine::Frame(line) => self.append_frame(out, line),
            TraceLine::LockHeld(line) => self.append_lock_held(out, line),
            TraceLine::LockAwaited(line) => self.append_lock_awaited(out, line),
            TraceLine::ThreadHeader(line) => self.append_thread_header(out, line),
            TraceLine::Exception { caused_by, rest } => {
                if caused_by {
                    out.push_str(CAUSED_BY_PREFIX);
                }
                self.append_exception(out, rest);
            }
        }
        out.push('\n');
    }

    fn append_frame(&self, out: &mut String, line: &str) {
        let Some(frame) = parse_frame(line) else {
            out.push_str(line);
            return;
        };

        let Some(class) = self.index.lookup_class(frame.class) else {
            append_source_heuristic(out, line);
            return;
        };

        let remapped = remapped_source(class, frame.source);
        let source = remapped.as_deref().unwrap_or(frame.source);

        let prefix = if line.starts_with(AT_PREFIX) {
            AT_PREFIX
        } else {
            AT_ALT_PREFIX
        };
        out.push_str(prefix);
        if let Some(module) = frame.module {
            out.push_str(module);
        }
        out.push_str(class.original());
        out.push('.');

        let methods = class.methods_named(frame.method);
        let matched: Vec<_> = match frame.line {
            Some(number) => methods
                .iter()
                .filter(|method| method.contains_line(number))
                .collect(),
            None => methods.iter().collect(),
        };

        match matched.split_first() {
            // nothing to tell the methods apart by, keep the obfuscated name
            None => append_method(out, frame.method, frame.module_alt, source, frame.line),
            Some((first, rest)) => {
                append_method(out, first.original(), frame.module_alt, source, frame.line);
                for entry in rest {
                    // further originals the line range cannot tell apart
                    out.push('\n');
                    out.push_str(ALTERNATE_INDENT);
                    out.push_str(entry.original());
                }
            }
        }
    }

    fn append_lock_held(&self, out: &mut String, line: &str) {
        if let Some(rest) = line.strip_prefix(LOCKED_PREFIX) {
            // recorder shape: `      - locked a.b.c@4b8a0d03`
            let Some((name, lock_id)) = split_lock_suffixed(rest) else {
                out.push_str(line);
                return;
            };
            let Some(class) = self.index.lookup_class(name) else {
                out.push_str(line);
                return;
            };
            out.push_str(LOCKED_PREFIX);
            out.push_str(class.original());
            out.push_str(lock_id);
        } else {
            // jstack/JFR shape: `\t- locked <0x00000000f351d9d0> (a a.b.c)`
            let Some((lock_id, name)) = split_lock_parenthesized(line, LOCKED_ALT_PREFIX) else {
                out.push_str(line);
                return;
            };
            let Some(class) = self.index.lookup_class(name) else {
                out.push_str(line);
                return;
            };
            out.push_str(LOCKED_ALT_PREFIX);
            out.push_str(lock_id);
            out.push_str("(a ");
            out.push_str(class.original());
            out.push(')');
        }
    }

    fn append_lock_awaited(&self, out: &mut String, line: &str) {
        let Some((lock_id, name)) = split_lock_parenthesized(line, WAITING_PREFIX) else {
            out.push_str(line);
            return;
        };
        let Some(class) = self.index.lookup_class(name) else {
            out.push_str(line);
            return;
        };
        out.push_str(WAITING_PREFIX);
        out.push_str(lock_id);
        out.push_str("(a ");
        out.push_str(class.original());
        out.push(')');
    }

    fn append_thread_header(&self, out: &mut String, line: &str) {
        // `"pool-1-thread-3" Id=18 BLOCKED on lock=a.b.c@3c7b4d2a owned by ...`
        let Some(pos) = line.rfind("on lock=") else {
            out.push_str(line);
            return;
        };
        let (head, rest) = line.split_at(pos + "on lock=".len());
        let Some((name, lock_id)) = split_lock_suffixed(rest) else {
            out.push_str(line);
            return;
        };
        let Some(class) = self.index.lookup_class(name) else {
            out.push_str(line);
            return;
        };
        out.push_str(head);
        out.push_str(class.original());
        out.push_str(lock_id);
    }

    fn append_exception(&self, out: &mut String, line: &str) {
        match line.split_once(':') {
            Some((name, tail)) => {
                out.push_str(self.resolve_class_name(name));
                out.push(':');
                out.push_str(tail);
            }
            // a bare class name, e.g. `java.lang.NullPointerException`
            None => out.push_str(self.resolve_class_name(line)),
        }
    }

    fn resolve_class_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.index
            .lookup_class(name)
            .map_or(name, |class| class.original())
    }
}

fn parse_frame(line: &str) -> Option<Frame<'_>> {
    let rest = line
        .strip_prefix(AT_PREFIX)
        .or_else(|| line.strip_prefix(AT_ALT_PREFIX))?;
    let rest = rest.strip_suffix(')')?;
    let (call, descriptor) = rest.split_once('(')?;

    let (module, call) = split_module(call);
    let (class, method) = call.rsplit_once('.')?;
    if method.is_empty() {
        return None;
    }

    let (module_alt, descriptor) = split_module(descriptor);
    let (source, line_number) = match descriptor.split_once(':') {
        Some((source, number)) => {
            if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            (source, Some(number.parse().ok()?))
        }
        None => (descriptor, None),
    };
    if source.is_empty() {
        return None;
    }

    Some(Frame {
        module,
        class,
        method,
        module_alt,
        source,
        line: line_number,
    })
}

/// Splits a leading `<…@…>/` or `app//` module marker off a frame section.
fn split_module(s: &str) -> (Option<&str>, &str) {
    if let Some(pos) = s.rfind('/') {
        if s[..pos].contains('@') {
            return (Some(&s[..=pos]), &s[pos + 1..]);
        }
    }
    if let Some(rest) = s.strip_prefix("app//") {
        return (Some("app//"), rest);
    }
    (None, s)
}

fn append_method(
    out: &mut String,
    name: &str,
    module_alt: Option<&str>,
    source: &str,
    line: Option<u32>,
) {
    out.push_str(name);
    out.push('(');
    if let Some(module_alt) = module_alt {
        out.push_str(module_alt);
    }
    out.push_str(source);
    if let Some(line) = line {
        out.push(':');
        out.push_str(&line.to_string());
    }
    out.push(')');
}

/// The replacement for a mapped frame's source token, when one applies.
///
/// Placeholder tokens without an extension (`Unknown Source`, `Native
/// Method`) are kept, and a class without a dotted form has no short name to
/// derive a file from.
fn remapped_source(class: &ClassEntry<'_>, source: &str) -> Option<String> {
    if !source.contains('.') {
        return None;
    }
    if let Some(file) = class.source_file() {
        return Some(file.into());
    }
    let (_, short) = class.original().rsplit_once('.')?;
    if short.is_empty() {
        return None;
    }
    Some(format!("{}{}", strip_inner_class(short), JAVA_SUFFIX))
}

/// Best-effort source fixup for frames whose class is not in the index,
/// e.g. `java.lang.Thread$Worker.sleep(Native Method)`: when the token
/// before the method name looks like a class (short name starts uppercase),
/// the descriptor is replaced with that class's presumed file name.
fn append_source_heuristic(out: &mut String, line: &str) {
    let Some(end) = line.rfind('.') else {
        out.push_str(line);
        return;
    };
    let Some(start) = line[..end].rfind('.') else {
        out.push_str(line);
        return;
    };
    let short = &line[start + 1..end];
    if !short.starts_with(|c: char| c.is_uppercase()) {
        // a package segment, not a class
        out.push_str(line);
        return;
    }
    let Some(paren) = line[end..].find('(') else {
        out.push_str(line);
        return;
    };
    out.push_str(&line[..=end + paren]);
    out.push_str(strip_inner_class(short));
    out.push_str(JAVA_SUFFIX);
    out.push(')');
}

/// `<class>@<id>`, the id anchored at the last `@`.
fn split_lock_suffixed(rest: &str) -> Option<(&str, &str)> {
    let at = rest.rfind('@')?;
    Some((&rest[..at], &rest[at..]))
}

/// `<id> (a <class>)`, the id running up to the first `(`.
fn split_lock_parenthesized<'l>(line: &'l str, prefix: &str) -> Option<(&'l str, &'l str)> {
    let rest = line.strip_prefix(prefix)?;
    let rest = rest.strip_suffix(')')?;
    let paren = rest.find('(')?;
    let lock_id = &rest[..paren];
    if lock_id.is_empty() {
        return None;
    }
    let name = rest[paren..].strip_prefix("(a ")?;
    Some((lock_id, name))
}

fn strip_inner_class(class: &str) -> &str {
    match class.find('$') {
        Some(pos) => &class[..pos],
        None => class,
    }
}
