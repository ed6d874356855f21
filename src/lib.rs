//! This crate rewrites obfuscated JVM stack traces back into readable ones.
//!
//! Crash and thread dumps captured in production carry the shortened class
//! and method names a proguard-style obfuscator substituted at build time.
//! Given the mapping file recorded by that build, this crate indexes the
//! obfuscated-to-original associations and rewrites a trace line by line,
//! recognizing the frame, monitor-lock and thread-header formats emitted by
//! the jzr recorder, jstack and Java Flight Recorder. Lines it does not
//! recognize (or cannot resolve) pass through unchanged.
//!
//! # Examples
//!
//! ```
//! let mapping = b"org.jeyzer.demo.features.MonitorTask -> a.b.c:
//!     51:56:void run() -> a";
//! let index = retrace::MappingIndex::from(&mapping[..]);
//! let rewriter = retrace::LineRewriter::new(&index);
//!
//! // re-mapping an exception line
//! assert_eq!(
//!     rewriter.rewrite_line("a.b.c: task failed"),
//!     "org.jeyzer.demo.features.MonitorTask: task failed\n",
//! );
//!
//! // re-mapping a stack frame, with the line number picking the method
//! assert_eq!(
//!     rewriter.rewrite_line("    at a.b.c.a(SourceFile:53)"),
//!     "    at org.jeyzer.demo.features.MonitorTask.run(SourceFile:53)\n",
//! );
//! ```

#![warn(missing_docs)]

mod index;
mod mapping;
mod rewrite;

pub use index::{ClassEntry, MappingIndex, MethodEntry};
pub use mapping::{
    LineRange, MappingRecord, MappingRecordIter, MappingSummary, ObfuscationMapping, ParseError,
    ParseErrorKind,
};
pub use rewrite::LineRewriter;
