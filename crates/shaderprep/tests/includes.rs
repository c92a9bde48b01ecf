use shaderprep::{preprocess, DefineSet, FragmentTable, PreprocessError};

fn table() -> FragmentTable {
    [
        (
            "colorconvert.glsl",
            "#ifndef COLORSPACE\n#define COLORSPACE 0\n#endif\n#define HAS_CONVERT 1\nvec3 convert(vec3 c) { return c * COLORSPACE; }",
        ),
        ("outer.glsl", "#include \"inner.glsl\"\nfloat outer = DEPTH;"),
        ("inner.glsl", "#define DEPTH 2\nfloat inner = DEPTH;"),
        ("loop_a.glsl", "#include \"loop_b.glsl\""),
        ("loop_b.glsl", "#include \"loop_a.glsl\""),
        ("twice.glsl", "float twice = 1.0;"),
    ]
    .into_iter()
    .collect()
}

#[test]
fn include_observes_defines_from_including_file() {
    let source = "#define COLORSPACE 3\n#include \"colorconvert.glsl\"\nvoid main() {}";
    let out = preprocess(source, &DefineSet::new(), &table()).unwrap();
    assert!(out.contains("return c * 3;"));
}

#[test]
fn include_can_extend_defines_for_the_rest_of_the_file() {
    let source = "#include \"colorconvert.glsl\"\n#if HAS_CONVERT\nfloat ok = 1.0;\n#endif";
    let out = preprocess(source, &DefineSet::new(), &table()).unwrap();
    assert!(out.contains("float ok = 1.0;"));
    assert!(out.contains("return c * 0;"));
}

#[test]
fn caller_defines_are_not_mutated() {
    let defines = DefineSet::new().with("COLORSPACE", 1);
    let before = defines.clone();
    let source = "#include \"colorconvert.glsl\"\n#define EXTRA 5";
    preprocess(source, &defines, &table()).unwrap();
    assert_eq!(defines, before);
    assert!(defines.get("HAS_CONVERT").is_none());

    // a second compilation unit sees none of the first one's shader defines
    let other = preprocess("#ifdef HAS_CONVERT\nleak\n#endif", &defines, &table()).unwrap();
    assert!(!other.contains("leak"));
}

#[test]
fn nested_includes_share_the_live_define_map() {
    let out = preprocess("#include \"outer.glsl\"", &DefineSet::new(), &table()).unwrap();
    assert_eq!(out, "float inner = 2;\nfloat outer = 2;");
}

#[test]
fn same_fragment_may_be_included_twice() {
    let out = preprocess(
        "#include \"twice.glsl\"\n#include \"twice.glsl\"",
        &DefineSet::new(),
        &table(),
    )
    .unwrap();
    assert_eq!(out.matches("float twice").count(), 2);
}

#[test]
fn include_inside_skipped_branch_is_not_resolved() {
    let out = preprocess(
        "#if 0\n#include \"does_not_exist.glsl\"\n#endif\nok",
        &DefineSet::new(),
        &table(),
    )
    .unwrap();
    assert_eq!(out, "ok");
}

#[test]
fn missing_include_is_a_hard_error() {
    let err = preprocess("#include \"nope.glsl\"", &DefineSet::new(), &table()).unwrap_err();
    assert!(matches!(err, PreprocessError::MissingInclude { ref name, line: 1, .. } if name == "nope.glsl"));
}

#[test]
fn malformed_include_is_rejected() {
    for bad in ["#include nope.glsl", "#include <nope.glsl>", "#include \"\"", "#include \"a.glsl"] {
        let err = preprocess(bad, &DefineSet::new(), &table()).unwrap_err();
        assert!(
            matches!(err, PreprocessError::InvalidInclude { .. }),
            "{bad} should be invalid, got {err:?}"
        );
    }
}

#[test]
fn include_cycles_are_detected() {
    let err = preprocess("#include \"loop_a.glsl\"", &DefineSet::new(), &table()).unwrap_err();
    assert!(matches!(err, PreprocessError::IncludeCycle { .. }));
}

#[test]
fn errors_name_the_fragment_they_come_from() {
    let table: FragmentTable = [("broken.glsl", "#endif")].into_iter().collect();
    let err = preprocess("#include \"broken.glsl\"", &DefineSet::new(), &table).unwrap_err();
    assert_eq!(err.to_string(), "broken.glsl:1: #endif without matching #if");
}
