use pystatic::CompileSession;
use pystatic::config::CompilerConfig;
use pystatic::runtime_io::BufferIo;
use pystatic::vm::{Module, Vm};
use std::fs;
use std::path::{Path, PathBuf};

/// E2E 통합 테스트: tests/programs/ 의 모든 .py 파일을 정적/동적 모드로 각각
/// 컴파일해 실행하고, 두 출력이 서로 같고 .out 파일과도 같은지 확인합니다.

fn programs_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/programs")
}

fn get_test_programs() -> Vec<PathBuf> {
    let mut programs: Vec<PathBuf> = fs::read_dir(programs_dir())
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("py"))
                .collect()
        })
        .unwrap_or_default();
    programs.sort();
    programs
}

fn execute(module: Module, entry: &str) -> Result<String, String> {
    let mut vm = Vm::new();
    vm.load(module);
    let mut io = BufferIo::new();
    match vm.run_with_io(entry, &mut io) {
        Ok(_) => Ok(io.take_output()),
        Err(e) => Err(format!("{}\noutput so far:\n{}", e, io.take_output())),
    }
}

/// Returns (static output, dynamic output).
fn run_test_program(path: &Path) -> Result<(String, String), String> {
    let mut session = CompileSession::new(CompilerConfig::default());
    let name = session
        .add_file(path)
        .map_err(|e| format!("{}: {}", path.display(), e))?;

    let module = session
        .compile(&name)
        .map_err(|e| session.render(&e, &name))?;
    if !module.is_static {
        return Err(format!("{} was not compiled statically", path.display()));
    }
    let static_out = execute(module, &name).map_err(|e| format!("static run: {}", e))?;

    let module = session
        .compile_dynamic(&name)
        .map_err(|e| session.render(&e, &name))?;
    let dynamic_out = execute(module, &name).map_err(|e| format!("dynamic run: {}", e))?;

    Ok((static_out, dynamic_out))
}

fn check_program(path: &Path) -> Result<(), String> {
    let expected = fs::read_to_string(path.with_extension("out"))
        .map_err(|e| format!("missing expected output for {}: {}", path.display(), e))?;
    let (static_out, dynamic_out) = run_test_program(path)?;
    if static_out != dynamic_out {
        return Err(format!(
            "static and dynamic output differ\n--- static\n{}--- dynamic\n{}",
            static_out, dynamic_out
        ));
    }
    if static_out != expected {
        return Err(format!(
            "unexpected output\n--- expected\n{}--- actual\n{}",
            expected, static_out
        ));
    }
    Ok(())
}

#[test]
fn test_e2e_all_programs() {
    let programs = get_test_programs();
    assert!(!programs.is_empty(), "no programs in tests/programs/");

    let mut failures = Vec::new();
    for path in &programs {
        let name = path.file_name().unwrap().to_string_lossy();
        match check_program(path) {
            Ok(()) => println!("{} ... ok", name),
            Err(err) => {
                println!("{} ... FAILED", name);
                failures.push(format!("{}: {}", name, err));
            }
        }
    }

    println!(
        "e2e: {} passed, {} failed",
        programs.len() - failures.len(),
        failures.len()
    );
    assert!(failures.is_empty(), "{}", failures.join("\n\n"));
}

macro_rules! test_program {
    ($test_name:ident, $filename:literal) => {
        #[test]
        fn $test_name() {
            let _ = include_str!(concat!("programs/", $filename));

            let path = programs_dir().join($filename);
            if let Err(err) = check_program(&path) {
                panic!("{}: {}", $filename, err);
            }
        }
    };
}

test_program!(test_arith, "arith.py");
test_program!(test_calls, "calls.py");
test_program!(test_classes, "classes.py");
test_program!(test_closures, "closures.py");
test_program!(test_collections, "collections.py");
test_program!(test_exceptions, "exceptions.py");
test_program!(test_primitives, "primitives.py");
