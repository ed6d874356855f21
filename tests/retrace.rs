use retrace::{LineRewriter, MappingIndex};

static MAPPING: &[u8] = include_bytes!("res/mapping.txt");

#[test]
fn test_retrace_thread_dump() {
    let index = MappingIndex::from(MAPPING);
    let rewriter = LineRewriter::new(&index);

    let dump = "\
java.lang.RuntimeException: demo failure
    at org.jeyzer.demo.features.a.b.a(SourceFile:53)
    at org.jeyzer.demo.a.a(SourceFile:44)
    at some.unknown.method(SourceFile:76)
Caused by: java.lang.IllegalStateException: monitor not ready
    at org.jeyzer.demo.features.a.b.d(SourceFile:65)
    ... 2 more";

    assert_eq!(
        rewriter.rewrite_trace(dump),
        "\
java.lang.RuntimeException: demo failure
    at org.jeyzer.demo.features.event.DemoEventTask.start(SourceFile:53)
    at org.jeyzer.demo.DemoHelper.displaySticker(SourceFile:44)
    at some.unknown.method(SourceFile:76)
Caused by: java.lang.IllegalStateException: monitor not ready
    at org.jeyzer.demo.features.event.DemoEventTask.stop(SourceFile:65)
    ... 2 more\n"
    );
}

#[test]
fn test_retrace_jstack_dump() {
    let index = MappingIndex::from(MAPPING);
    let rewriter = LineRewriter::new(&index);

    let dump = "\
\"jzr-monitor\" Id=12 BLOCKED on lock=org.jeyzer.demo.features.c.e@1f2e3d4c
\tat org.jeyzer.demo.features.c.e.a(SourceFile:22)
\t- locked <0x00000000f351d9d0> (a org.jeyzer.demo.features.c.e)
\t- waiting to lock <0x00000000f3511948> (a org.jeyzer.demo.features.c.e)";

    assert_eq!(
        rewriter.rewrite_trace(dump),
        "\
\"jzr-monitor\" Id=12 BLOCKED on lock=org.jeyzer.demo.features.lock.LockedTask@1f2e3d4c
\tat org.jeyzer.demo.features.lock.LockedTask.acquire(SourceFile:22)
\t- locked <0x00000000f351d9d0> (a org.jeyzer.demo.features.lock.LockedTask)
\t- waiting to lock <0x00000000f3511948> (a org.jeyzer.demo.features.lock.LockedTask)\n"
    );
}

#[test]
fn test_line_range_disambiguation() {
    // two originals collapsed onto the obfuscated method `a`
    let index = MappingIndex::from(
        "com.example.Thing -> o.a:
    10:20:void foo() -> a
    21:30:void bar() -> a",
    );
    let rewriter = LineRewriter::new(&index);

    assert_eq!(
        rewriter.rewrite_line("    at o.a.a(SourceFile:15)"),
        "    at com.example.Thing.foo(SourceFile:15)\n"
    );
    assert_eq!(
        rewriter.rewrite_line("    at o.a.a(SourceFile:25)"),
        "    at com.example.Thing.bar(SourceFile:25)\n"
    );
    // without a line number both candidates are reported, first one primary
    assert_eq!(
        rewriter.rewrite_line("    at o.a.a(SourceFile)"),
        "    at com.example.Thing.foo(SourceFile)\n                bar\n"
    );
}

#[test]
fn test_identity_on_unmapped_input() {
    let index = MappingIndex::from(MAPPING);
    let rewriter = LineRewriter::new(&index);

    let lines = [
        "java.lang.RuntimeException: some text",
        "Caused by: java.lang.NullPointerException",
        "    at some.unknown.method(SourceFile:76)",
        "\tat some.unknown.method2(UnknownSource)",
        "      - locked java.util.ArrayDeque@1f2e3d4c",
        "\t- locked <0x00000000f351d9d0> (a java.util.ArrayDeque)",
        "\t- waiting to lock <0x00000000f3511948> (a java.util.ArrayDeque)",
        "\"main\" Id=1 RUNNABLE",
        "    ... 13 more",
        "   java.lang.Thread.State: BLOCKED",
        "",
    ];
    for line in lines {
        assert_eq!(rewriter.rewrite_line(line), format!("{}\n", line));
    }
}

#[test]
fn test_idempotence_under_identity_mapping() {
    let index = MappingIndex::from(
        "com.example.demo.Worker -> com.example.demo.Worker:
    10:20:void work() -> work
com.example.demo.WorkerException -> com.example.demo.WorkerException:",
    );
    let rewriter = LineRewriter::new(&index);

    let retraced = "\
com.example.demo.WorkerException: stalled
    at com.example.demo.Worker.work(Worker.java:12)
      - locked com.example.demo.Worker@deadbeef
\t- locked <0x00000000f351d9d0> (a com.example.demo.Worker)";

    assert_eq!(rewriter.rewrite_trace(retraced), format!("{}\n", retraced));
}

#[test]
fn test_abstract_method_never_matches_a_line() {
    let index = MappingIndex::from(
        "com.example.Iface -> o.b:
    void show() -> a",
    );
    let entry = &index.lookup_class("o.b").unwrap().methods_named("a")[0];

    assert!(!entry.contains_line(0));
    assert!(!entry.contains_line(1));
    assert!(!entry.contains_line(u32::MAX));

    // a frame citing a line falls back to the obfuscated method name
    let rewriter = LineRewriter::new(&index);
    assert_eq!(
        rewriter.rewrite_line("    at o.b.a(SourceFile:7)"),
        "    at com.example.Iface.a(SourceFile:7)\n"
    );
}

#[test]
fn test_lock_shapes_are_never_swapped() {
    let index = MappingIndex::from("com.example.Gate -> o.c:");
    let rewriter = LineRewriter::new(&index);

    // resolving: each shape keeps its own token ordering
    assert_eq!(
        rewriter.rewrite_line("      - locked o.c@cafe0001"),
        "      - locked com.example.Gate@cafe0001\n"
    );
    assert_eq!(
        rewriter.rewrite_line("\t- locked <0x00000000f351d9d0> (a o.c)"),
        "\t- locked <0x00000000f351d9d0> (a com.example.Gate)\n"
    );

    // not resolving: untouched, still the input shape
    assert_eq!(
        rewriter.rewrite_line("      - locked x.y@cafe0001"),
        "      - locked x.y@cafe0001\n"
    );
    assert_eq!(
        rewriter.rewrite_line("\t- locked <0x1> (a x.y)"),
        "\t- locked <0x1> (a x.y)\n"
    );
}

#[test]
fn test_caused_by_prefix_is_preserved() {
    let index = MappingIndex::from("com.example.Failure -> o.d:");
    let rewriter = LineRewriter::new(&index);

    assert_eq!(
        rewriter.rewrite_line("Caused by: o.d: msg"),
        "Caused by: com.example.Failure: msg\n"
    );
}

#[test]
fn test_placeholder_source_survives_a_mapped_frame() {
    let index = MappingIndex::from(
        "original.pkg.Thing -> a.b.c:
    void go() -> x",
    );
    let rewriter = LineRewriter::new(&index);

    // `go` is not an obfuscated method name here, and `Unknown Source` is
    // no file name; both stay as they were
    assert_eq!(
        rewriter.rewrite_line("    at a.b.c.go(Unknown Source)"),
        "    at original.pkg.Thing.go(Unknown Source)\n"
    );
}

#[test]
fn test_inner_classes_are_stripped_from_source_names() {
    let index = MappingIndex::from(
        "com.example.Outer$Inner -> o.e:
    5:9:void run() -> a",
    );
    let rewriter = LineRewriter::new(&index);

    assert_eq!(
        rewriter.rewrite_line("    at o.e.a(e.java:7)"),
        "    at com.example.Outer$Inner.run(Outer.java:7)\n"
    );
}

#[test]
fn test_recorded_source_file_wins_over_the_short_name() {
    let index = MappingIndex::from(
        "com.example.MainKt -> o.f:
# {\"id\":\"sourceFile\",\"fileName\":\"Main.kt\"}
    5:9:void run() -> a",
    );
    let rewriter = LineRewriter::new(&index);

    assert_eq!(
        rewriter.rewrite_line("    at o.f.a(f.java:7)"),
        "    at com.example.MainKt.run(Main.kt:7)\n"
    );
}
