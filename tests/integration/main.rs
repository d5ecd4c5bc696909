//! Integration tests for Kiln

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn kiln() -> Command {
        cargo_bin_cmd!("kiln")
    }

    #[test]
    fn help_displays() {
        kiln()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("layered build cache"));
    }

    #[test]
    fn version_displays() {
        kiln()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        kiln()
            .env("KILN_CONFIG", &path)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        kiln()
            .env("KILN_CONFIG", dir.path().join("config.toml"))
            .args(["--no-local", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("[checks.lint]"));
    }

    #[test]
    fn config_init_writes_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");

        kiln()
            .env("KILN_CONFIG", &path)
            .args(["config", "init"])
            .assert()
            .success();
        assert!(path.is_file());

        kiln()
            .env("KILN_CONFIG", &path)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));
    }

    #[test]
    fn unknown_command_fails() {
        kiln().arg("deploy").assert().failure();
    }
}

#[cfg(unix)]
mod pipeline_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
[package]
name = "demo"
version = "0.1.0"
toolchain = ">=1.80"

[dependencies]
serde = "^1.0"
"#;

    const REGISTRY: &str = r#"
snapshot = "2026-10-01"

[[package]]
name = "serde"
version = "1.0.200"
checksum = "aa01"

[[package]]
name = "serde"
version = "1.0.210"
checksum = "aa02"
"#;

    /// A project wired to shell-script builds and checks
    struct Project {
        dir: TempDir,
    }

    impl Project {
        fn new() -> Self {
            Self::with_fmt("exit 0")
        }

        fn with_fmt(fmt_script: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let project = dir.path().join("project");
            fs::create_dir_all(project.join("src")).unwrap();
            fs::write(project.join("Kiln.toml"), MANIFEST).unwrap();
            fs::write(project.join("src/lib.rs"), "pub fn answer() -> u32 { 42 }\n").unwrap();
            fs::write(project.join("README.md"), "# demo\n").unwrap();
            fs::write(dir.path().join("registry.toml"), REGISTRY).unwrap();
            fs::write(dir.path().join("advisory.txt"), "db-1\n").unwrap();

            let root = dir.path().display();
            let local = format!(
                r#"
[toolchain]
version = "1.82.0"
deps_build = ["sh", "-c", 'echo resolving dependencies']
project_build = ["sh", "-c", 'echo compiling demo']

[registry]
index = '{root}/registry.toml'

[cache]
dir = '{root}/cache'

[env]
passthrough = []

[checks]
order = ["lint", "fmt", "audit"]

[checks.lint]
command = ["sh", "-c", 'exit 0']
tool = "sh"

[checks.fmt]
command = ["sh", "-c", '{fmt_script}']
tool = "sh"

[checks.audit]
command = ["sh", "-c", 'echo no advisories']
tool = "sh"
data_version_command = ["cat", '{root}/advisory.txt']

[checks.license]
enabled = false

[checks.test]
enabled = false
"#
            );
            fs::write(project.join(".kiln.toml"), local).unwrap();

            Self { dir }
        }

        fn root(&self) -> PathBuf {
            self.dir.path().join("project")
        }

        fn kiln(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("kiln");
            cmd.env("KILN_CONFIG", self.dir.path().join("global.toml"))
                .env_remove("KILN_PROJECT")
                .env_remove("KILN_LOG")
                .arg("-C")
                .arg(self.root());
            cmd
        }

        fn stdout(&self, args: &[&str]) -> String {
            let output = self.kiln().args(args).output().unwrap();
            assert!(output.status.success(), "kiln {:?} failed", args);
            String::from_utf8(output.stdout).unwrap()
        }
    }

    #[test]
    fn lock_writes_lockfile() {
        let project = Project::new();

        project
            .kiln()
            .arg("lock")
            .assert()
            .success()
            .stdout(predicate::str::contains("Wrote Kiln.lock"));

        let lock = fs::read_to_string(project.root().join("Kiln.lock")).unwrap();
        assert!(lock.contains("1.0.210"));

        project
            .kiln()
            .arg("lock")
            .assert()
            .success()
            .stdout(predicate::str::contains("up to date"));
    }

    #[test]
    fn second_build_is_cached() {
        let project = Project::new();

        project
            .kiln()
            .arg("build")
            .assert()
            .success()
            .stdout(predicate::str::contains("(built)"));

        project
            .kiln()
            .arg("build")
            .assert()
            .success()
            .stdout(predicate::str::contains("(cached)"))
            .stdout(predicate::str::contains("(built)").not());
    }

    #[test]
    fn excluded_edit_keeps_fingerprint() {
        let project = Project::new();
        let before = project.stdout(&["fingerprint"]);

        fs::write(project.root().join("README.md"), "# demo\n\nMore words.\n").unwrap();
        fs::create_dir_all(project.root().join("docs")).unwrap();
        fs::write(project.root().join("docs/guide.md"), "guide\n").unwrap();
        assert_eq!(before, project.stdout(&["fingerprint"]));

        fs::write(project.root().join("src/lib.rs"), "pub fn answer() -> u32 { 43 }\n").unwrap();
        assert_ne!(before, project.stdout(&["fingerprint"]));
    }

    #[test]
    fn checks_pass() {
        let project = Project::new();

        project
            .kiln()
            .arg("check")
            .assert()
            .success()
            .stdout(predicate::str::is_match(r"lint\s+pass").unwrap())
            .stdout(predicate::str::is_match(r"audit\s+pass").unwrap())
            .stdout(predicate::str::contains("license").not());
    }

    #[test]
    fn failing_check_reports_every_outcome() {
        let project = Project::with_fmt("echo bad formatting in src/lib.rs >&2; exit 1");

        project
            .kiln()
            .arg("check")
            .assert()
            .failure()
            .stdout(predicate::str::is_match(r"lint\s+pass").unwrap())
            .stdout(predicate::str::is_match(r"fmt\s+fail").unwrap())
            .stdout(predicate::str::is_match(r"audit\s+pass").unwrap())
            .stdout(predicate::str::contains("bad formatting in src/lib.rs"))
            .stderr(predicate::str::contains("failed: fmt"));
    }

    #[test]
    fn advisory_update_reruns_only_audit() {
        let project = Project::new();
        project.kiln().arg("check").assert().success();

        fs::write(project.dir.path().join("advisory.txt"), "db-2\n").unwrap();

        project
            .kiln()
            .arg("check")
            .assert()
            .success()
            .stdout(predicate::str::is_match(r"lint\s+pass\s+cached").unwrap())
            .stdout(predicate::str::is_match(r"fmt\s+pass\s+cached").unwrap())
            .stdout(predicate::str::is_match(r"audit\s+pass\s+ran").unwrap());
    }

    #[test]
    fn check_json_report() {
        let project = Project::with_fmt("exit 1");

        let output = project
            .kiln()
            .args(["check", "--format", "json"])
            .output()
            .unwrap();
        assert!(!output.status.success());

        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["package"], "demo");
        assert_eq!(report["status"], "fail");
        let names: Vec<&str> = report["checks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["lint", "fmt", "audit"]);
        assert_eq!(report["checks"][1]["outcome"], "fail");
    }

    #[test]
    fn skip_and_named_checks() {
        let project = Project::new();

        project
            .kiln()
            .args(["check", "--skip", "fmt,audit"])
            .assert()
            .success()
            .stdout(predicate::str::contains("lint"))
            .stdout(predicate::str::contains("audit").not());

        project
            .kiln()
            .args(["check", "audit"])
            .assert()
            .success()
            .stdout(predicate::str::is_match(r"audit\s+pass").unwrap())
            .stdout(predicate::str::contains("lint").not());
    }

    #[test]
    fn unknown_check_fails_before_building() {
        let project = Project::new();

        project
            .kiln()
            .args(["check", "typo"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown check: typo"));

        project
            .kiln()
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries"));
    }

    #[test]
    fn missing_registry_is_reported() {
        let project = Project::new();
        let local = project.root().join(".kiln.toml");
        let config = fs::read_to_string(&local).unwrap();
        let config = config
            .lines()
            .filter(|l| !l.starts_with("index"))
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(&local, config).unwrap();

        project
            .kiln()
            .arg("build")
            .assert()
            .failure()
            .stderr(predicate::str::contains("no registry snapshot is configured"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn missing_project_dir_fails() {
        let project = Project::new();

        cargo_bin_cmd!("kiln")
            .env("KILN_CONFIG", project.dir.path().join("global.toml"))
            .arg("-C")
            .arg(project.dir.path().join("nope"))
            .arg("build")
            .assert()
            .failure()
            .stderr(predicate::str::contains("project directory does not exist"));
    }

    #[test]
    fn shell_print_exports_environment() {
        let project = Project::new();

        project
            .kiln()
            .args(["shell", "--print"])
            .assert()
            .success()
            .stdout(predicate::str::contains("export KILN_DEPS_DIR="))
            .stdout(predicate::str::contains("export KILN_DEPS_FINGERPRINT="));
    }

    #[test]
    fn shell_command_exit_code_propagates() {
        let project = Project::new();

        project
            .kiln()
            .args(["shell", "--", "sh", "-c", "test -n \"$KILN_DEPS_DIR\" && exit 3"])
            .assert()
            .code(3);
    }

    #[test]
    fn cache_list_and_clear() {
        let project = Project::new();
        project.kiln().arg("check").assert().success();

        project
            .kiln()
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("deps"))
            .stdout(predicate::str::contains("project"))
            .stdout(predicate::str::contains("check"));

        project
            .kiln()
            .args(["cache", "clear", "--yes"])
            .assert()
            .success();

        project
            .kiln()
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries"));
    }

    #[test]
    fn cache_gc_dry_run_keeps_fresh_entries() {
        let project = Project::new();
        project.kiln().arg("build").assert().success();

        project
            .kiln()
            .args(["cache", "gc", "--days", "1", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No entries older than 1 days"));
    }
}
