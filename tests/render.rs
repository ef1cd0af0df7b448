use serial_test::serial;
use std::path::Path;


const BIN: &str = env!("CARGO_BIN_EXE_render-rs");

fn render(example_bin: &str, type_name: &str, location: &str) -> String {
    let registry = testlib::registry_file();
    let (stdout, stderr, success) = testlib::run(
        BIN,
        registry.path(),
        &["checkpoint", type_name, location, example_bin],
    );
    assert!(success, "stdout: {}, stderr: {}", stdout, stderr);
    assert!(
        stderr.contains("+++ exited with 0 +++"),
        "stderr: {}",
        stderr
    );
    assert!(stdout.ends_with("done\n"), "stdout: {}", stdout);
    stdout
}

#[test]
fn test_render_no_args() {
    testlib::test_no_args(BIN, "FUNCTION TYPE LOCATION");
}

#[test]
#[serial]
fn test_render_symbol() {
    let example_bin = testlib::build_example("render_symbol");
    let _cleanup = testlib::Cleanup {
        path: Path::new(&example_bin),
    };

    let stdout = render(&example_bin, "point", "origin");
    assert!(
        stdout.contains("point @ origin = point(3, 4)\n"),
        "stdout: {}",
        stdout
    );
    assert!(stdout.contains("freed 1 match 1\n"), "stdout: {}", stdout);
}

#[test]
#[serial]
fn test_render_pointer() {
    let example_bin = testlib::build_example("render_pointer");
    let _cleanup = testlib::Cleanup {
        path: Path::new(&example_bin),
    };

    let stdout = render(&example_bin, "point", "*cursor");
    assert!(
        stdout.contains("point @ *cursor = point(3, 4)\n"),
        "stdout: {}",
        stdout
    );
    assert!(stdout.contains("freed 1 match 1\n"), "stdout: {}", stdout);

    let stdout = render(&example_bin, "point", "*%rdi");
    assert!(
        stdout.contains("point @ *%rdi = point(3, 4)\n"),
        "stdout: {}",
        stdout
    );
}

#[test]
#[serial]
fn test_render_register() {
    let example_bin = testlib::build_example("render_register");
    let _cleanup = testlib::Cleanup {
        path: Path::new(&example_bin),
    };

    let stdout = render(&example_bin, "point", "%rdi");
    assert!(
        stdout.contains(
            "point @ %rdi = <error: variable(0xffffffffffffffff) is in register (not memory), cannot pass address>\n"
        ),
        "stdout: {}",
        stdout
    );
    assert!(stdout.contains("freed 0 match 0\n"), "stdout: {}", stdout);
}

#[test]
#[serial]
fn test_render_unregistered() {
    let example_bin = testlib::build_example("render_unregistered");
    let _cleanup = testlib::Cleanup {
        path: Path::new(&example_bin),
    };

    let stdout = render(&example_bin, "other", "origin");
    assert!(
        stdout.contains("other @ origin = <no summary for other>\n"),
        "stdout: {}",
        stdout
    );
}

#[test]
#[serial]
fn test_render_missing_renderer() {
    let example_bin = testlib::build_example("render_missing");
    let _cleanup = testlib::Cleanup {
        path: Path::new(&example_bin),
    };

    let stdout = render(&example_bin, "missing", "origin");
    assert!(
        stdout.contains(
            "missing @ origin = <error: expression failed: No symbol \"debug_print_missing\" in current context.>\n"
        ),
        "stdout: {}",
        stdout
    );
    assert!(stdout.contains("freed 0 match 0\n"), "stdout: {}", stdout);
}

#[test]
#[serial]
fn test_render_empty_string() {
    let example_bin = testlib::build_example("render_empty");
    let _cleanup = testlib::Cleanup {
        path: Path::new(&example_bin),
    };

    let stdout = render(&example_bin, "empty", "origin");
    assert!(
        stdout.contains("empty @ origin = \n"),
        "stdout: {}",
        stdout
    );
    assert!(stdout.contains("freed 1 match 1\n"), "stdout: {}", stdout);
}

#[test]
#[serial]
fn test_render_long_string_is_capped() {
    let example_bin = testlib::build_example("render_long");
    let _cleanup = testlib::Cleanup {
        path: Path::new(&example_bin),
    };

    let stdout = render(&example_bin, "long", "origin");
    let expected = format!("long @ origin = {}\n", "x".repeat(2048));
    assert!(stdout.starts_with(&expected), "stdout: {}", stdout);
    assert!(stdout.contains("freed 1 match 1\n"), "stdout: {}", stdout);
}

#[test]
#[serial]
fn test_render_unaligned_string() {
    let example_bin = testlib::build_example("render_odd");
    let _cleanup = testlib::Cleanup {
        path: Path::new(&example_bin),
    };

    let stdout = render(&example_bin, "odd", "origin");
    assert!(
        stdout.contains("odd @ origin = odd3\n"),
        "stdout: {}",
        stdout
    );
    assert!(stdout.contains("freed 1 match 1\n"), "stdout: {}", stdout);
}

#[test]
#[serial]
fn test_render_bad_location() {
    let example_bin = testlib::build_example("render_bad_location");
    let _cleanup = testlib::Cleanup {
        path: Path::new(&example_bin),
    };

    let registry = testlib::registry_file();
    let (stdout, stderr, success) = testlib::run(
        BIN,
        registry.path(),
        &["checkpoint", "point", "not a location", &example_bin],
    );
    assert!(!success);
    assert!(stdout.is_empty(), "stdout: {}", stdout);
    assert!(stderr.contains("EINVAL"), "stderr: {}", stderr);
}
