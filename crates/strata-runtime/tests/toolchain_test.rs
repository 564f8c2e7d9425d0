use mockall::mock;
use std::path::{Path, PathBuf};
use strata_core::{AppRef, StrataConfig};
use strata_runtime::executor::{CommandExecutor, CommandOutput};
use strata_runtime::process::ProcessError;
use strata_runtime::toolchain::{
    InstallError, PythonToolchain, ToolchainError, env_python, failing_requirement,
    requirement_name, version_matches,
};
use tempfile::TempDir;

fn stdout(text: &str) -> CommandOutput {
    CommandOutput {
        stdout: text.to_owned(),
        stderr: String::new(),
    }
}

mock! {
    Executor {}

    impl CommandExecutor for Executor {
        async fn exec(
            &self,
            program: &str,
            args: &[String],
            cwd: &Path,
        ) -> Result<CommandOutput, ProcessError>;
    }
}

fn failed(stderr: &str) -> ProcessError {
    ProcessError::CommandFailed {
        program: "python".to_owned(),
        args: vec![],
        status: "exit status: 1".to_owned(),
        stderr: stderr.to_owned(),
    }
}

const PIP_NOT_FOUND: &str = "\
ERROR: Could not find a version that satisfies the requirement doesnotexist-pkg==9.9.9 (from versions: none)
ERROR: No matching distribution found for doesnotexist-pkg==9.9.9
";

// ── Interpreter ──

#[tokio::test]
async fn interpreter_version_strips_prefix() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|program, args, _| program == "python3.12" && args == ["--version".to_owned()])
        .returning(|_, _, _| Ok(stdout("Python 3.12.1\n")));

    let toolchain = PythonToolchain::with_executor(mock);
    let version = toolchain.interpreter_version("python3.12").await.unwrap();

    assert_eq!(version, "3.12.1");
}

#[tokio::test]
async fn interpreter_missing_is_reported() {
    let mut mock = MockExecutor::new();
    mock.expect_exec().returning(|program, _, _| {
        Err(ProcessError::NotFound {
            program: program.to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        })
    });

    let toolchain = PythonToolchain::with_executor(mock);
    let result = toolchain.interpreter_version("python3.12").await;

    assert!(matches!(result, Err(ToolchainError::Interpreter { .. })));
}

#[tokio::test]
async fn pinned_interpreter_rejects_other_version() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .returning(|_, _, _| Ok(stdout("Python 3.11.8\n")));

    let toolchain = PythonToolchain::with_executor(mock);
    let result = toolchain.pinned_interpreter("python3", "3.12").await;

    match result {
        Err(ToolchainError::VersionMismatch {
            expected, found, ..
        }) => {
            assert_eq!(expected, "3.12");
            assert_eq!(found, "3.11.8");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn pinned_interpreter_accepts_patch_release() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .returning(|_, _, _| Ok(stdout("Python 3.12.4\n")));

    let toolchain = PythonToolchain::with_executor(mock);
    let version = toolchain.pinned_interpreter("python3", "3.12").await.unwrap();

    assert_eq!(version, "3.12.4");
}

#[test]
fn version_matching_respects_component_boundaries() {
    assert!(version_matches("3.12.1", "3.12"));
    assert!(version_matches("3.12.1", "3.12.1"));
    assert!(version_matches("3.12", "3.12"));
    assert!(!version_matches("3.1.2", "3.12"));
    assert!(!version_matches("3.120.0", "3.12"));
    assert!(!version_matches("3.11.9", "3.12"));
}

#[tokio::test]
async fn create_env_runs_venv_module() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|program, args, _| {
            program == "python3.12"
                && args[..2] == ["-m".to_owned(), "venv".to_owned()]
                && args[2].ends_with("env")
        })
        .times(1)
        .returning(|_, _, _| Ok(CommandOutput::default()));

    let toolchain = PythonToolchain::with_executor(mock);
    toolchain
        .create_env("python3.12", Path::new("/layers/staging/env"))
        .await
        .unwrap();
}

#[test]
fn env_python_is_inside_env() {
    let python = env_python(Path::new("/layer/env"));
    if cfg!(windows) {
        assert_eq!(python, PathBuf::from("/layer/env/Scripts/python.exe"));
    } else {
        assert_eq!(python, PathBuf::from("/layer/env/bin/python"));
    }
}

// ── Toolchain upgrade ──

#[tokio::test]
async fn upgrade_toolchain_never_uses_cache() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|program, args, _| {
            program.ends_with("python")
                && args.contains(&"--no-cache-dir".to_owned())
                && args.contains(&"--upgrade".to_owned())
                && args.last().map(String::as_str) == Some("pip")
        })
        .times(1)
        .returning(|_, _, _| Ok(stdout("Successfully installed pip-24.0\n")));

    let toolchain = PythonToolchain::with_executor(mock);
    toolchain
        .upgrade_toolchain(Path::new("/layer/env/bin/python"))
        .await
        .unwrap();
}

#[tokio::test]
async fn upgrade_toolchain_failure() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .returning(|_, _, _| Err(failed("network unreachable")));

    let toolchain = PythonToolchain::with_executor(mock);
    let result = toolchain
        .upgrade_toolchain(Path::new("/layer/env/bin/python"))
        .await;

    assert!(matches!(result, Err(ToolchainError::ToolchainUpgrade { .. })));
}

const PIP_OFFLINE: &str = "\
WARNING: Retrying (Retry(total=0, connect=None, read=None, redirect=None, status=None)) after connection broken by 'NewConnectionError': /simple/pip/
WARNING: Could not fetch URL https://pypi.org/simple/pip/: connection error
";

#[tokio::test]
async fn upgrade_toolchain_never_retries() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|_, args, _| {
            let r = args.iter().position(|a| a == "--retries").unwrap();
            args[r + 1] == "0"
        })
        .times(1)
        .returning(|_, _, _| Ok(stdout("Successfully installed pip-24.0\n")));

    let toolchain = PythonToolchain::with_executor(mock);
    toolchain
        .upgrade_toolchain(Path::new("/layer/env/bin/python"))
        .await
        .unwrap();
}

#[tokio::test]
async fn upgrade_toolchain_with_unreachable_index_fails() {
    let mut mock = MockExecutor::new();
    // pip exits 0 and keeps the bundled version when the index is offline.
    mock.expect_exec().times(1).returning(|_, _, _| {
        Ok(CommandOutput {
            stdout: "Requirement already satisfied: pip in ./env/lib/python3.12/site-packages (23.2.1)\n"
                .to_owned(),
            stderr: PIP_OFFLINE.to_owned(),
        })
    });

    let toolchain = PythonToolchain::with_executor(mock);
    let result = toolchain
        .upgrade_toolchain(Path::new("/layer/env/bin/python"))
        .await;

    match result {
        Err(ToolchainError::IndexUnreachable { detail }) => {
            assert!(detail.contains("Retrying"), "{detail}");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn upgrade_toolchain_ignores_unrelated_warnings() {
    let mut mock = MockExecutor::new();
    mock.expect_exec().returning(|_, _, _| {
        Ok(CommandOutput {
            stdout: "Successfully installed pip-24.0\n".to_owned(),
            stderr: "WARNING: Running pip as the 'root' user can result in broken permissions\n"
                .to_owned(),
        })
    });

    let toolchain = PythonToolchain::with_executor(mock);
    toolchain
        .upgrade_toolchain(Path::new("/layer/env/bin/python"))
        .await
        .unwrap();
}

// ── Dependency install ──

#[tokio::test]
async fn install_passes_manifest_and_extras() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|_, args, cwd| {
            let r = args.iter().position(|a| a == "-r").unwrap();
            args.contains(&"--no-cache-dir".to_owned())
                && args[r + 1] == "/layer/app/requirements.txt"
                && args.last().map(String::as_str) == Some("gunicorn")
                && cwd == Path::new("/layer/app")
        })
        .times(1)
        .returning(|_, _, _| Ok(CommandOutput::default()));

    let toolchain = PythonToolchain::with_executor(mock);
    toolchain
        .install_requirements(
            Path::new("/layer/env/bin/python"),
            Path::new("/layer/app/requirements.txt"),
            &["gunicorn".to_owned()],
            Path::new("/layer/app"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn install_identifies_unresolvable_requirement() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .returning(|_, _, _| Err(failed(PIP_NOT_FOUND)));

    let toolchain = PythonToolchain::with_executor(mock);
    let result = toolchain
        .install_requirements(
            Path::new("/layer/env/bin/python"),
            Path::new("requirements.txt"),
            &[],
            Path::new("."),
        )
        .await;

    match result {
        Err(InstallError::Unresolvable { requirement, .. }) => {
            assert_eq!(requirement, "doesnotexist-pkg==9.9.9");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn install_other_failure_is_generic() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .returning(|_, _, _| Err(failed("ERROR: Could not install packages due to an OSError")));

    let toolchain = PythonToolchain::with_executor(mock);
    let result = toolchain
        .install_requirements(
            Path::new("/layer/env/bin/python"),
            Path::new("requirements.txt"),
            &[],
            Path::new("."),
        )
        .await;

    assert!(matches!(result, Err(InstallError::Failed { .. })));
}

#[test]
fn failing_requirement_parses_pip_output() {
    assert_eq!(
        failing_requirement(PIP_NOT_FOUND).as_deref(),
        Some("doesnotexist-pkg==9.9.9")
    );
    assert_eq!(failing_requirement("ERROR: something else"), None);
}

#[test]
fn requirement_name_normalizes() {
    assert_eq!(requirement_name("DoesNotExist_Pkg==9.9.9"), "doesnotexist-pkg");
    assert_eq!(requirement_name("flask"), "flask");
}

// ── Application object ──

#[tokio::test]
async fn resolve_app_runs_in_workdir() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|_, args, cwd| {
            args[0] == "-c"
                && args[2] == "app"
                && args[3] == "server"
                && cwd == Path::new("/layer/app")
        })
        .times(1)
        .returning(|_, _, _| Ok(CommandOutput::default()));

    let toolchain = PythonToolchain::with_executor(mock);
    let app: AppRef = "app:server".parse().unwrap();
    toolchain
        .resolve_app(Path::new("/layer/env/bin/python"), &app, Path::new("/layer/app"))
        .await
        .unwrap();
}

#[tokio::test]
async fn resolve_app_failure_carries_last_stderr_line() {
    let mut mock = MockExecutor::new();
    mock.expect_exec().returning(|_, _, _| {
        Err(failed(
            "Traceback (most recent call last):\n  ...\nmodule 'app' has no attribute 'server'\n",
        ))
    });

    let toolchain = PythonToolchain::with_executor(mock);
    let app: AppRef = "app:server".parse().unwrap();
    let err = toolchain
        .resolve_app(Path::new("/layer/env/bin/python"), &app, Path::new("."))
        .await
        .unwrap_err();

    match &err {
        ToolchainError::AppResolution { app, detail } => {
            assert_eq!(app, "app:server");
            assert_eq!(detail, "module 'app' has no attribute 'server'");
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ── Doctor ──

#[tokio::test]
async fn doctor_all_checks_pass() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("requirements.txt"), "flask==3.0.0\n").unwrap();
    std::fs::write(tmp.path().join("app.py"), "server = None\n").unwrap();

    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .returning(|_, _, _| Ok(stdout("Python 3.12.2\n")));

    let mut config = StrataConfig::default();
    // Port 0 always binds.
    config.launch.bind = "127.0.0.1:0".to_owned();

    let toolchain = PythonToolchain::with_executor(mock);
    let mut report = toolchain.doctor(&config, tmp.path()).await;
    report.config_file = strata_runtime::CheckResult::ok("Found");

    assert!(report.interpreter.passed);
    assert!(report.pinned_version.passed);
    assert!(report.manifest.passed, "{}", report.manifest.detail);
    assert!(report.manifest.detail.contains("1 requirement"));
    assert!(report.app_module.passed, "{}", report.app_module.detail);
    assert!(report.port.passed, "{}", report.port.detail);
    assert!(report.all_passed());

    let rendered = report.to_string();
    assert!(rendered.contains("[OK] Interpreter"));
}

#[tokio::test]
async fn doctor_reports_every_failure() {
    let tmp = TempDir::new().unwrap();
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();

    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .returning(|_, _, _| Ok(stdout("Python 3.10.0\n")));

    let mut config = StrataConfig::default();
    config.launch.bind = occupied.local_addr().unwrap().to_string();

    let toolchain = PythonToolchain::with_executor(mock);
    let report = toolchain.doctor(&config, tmp.path()).await;

    assert!(report.interpreter.passed);
    assert!(!report.pinned_version.passed);
    assert!(!report.manifest.passed);
    assert!(!report.app_module.passed);
    assert!(!report.port.passed);
    assert!(!report.all_passed());
    assert!(report.to_string().contains("[NG] Port"));
}
