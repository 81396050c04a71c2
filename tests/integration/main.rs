//! Integration tests for with-env

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// Command with an isolated config file and cache directory
    fn with_env(home: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("with-env");
        cmd.env("WITH_ENV_CONFIG", home.path().join("config.toml"))
            .env("XDG_CACHE_HOME", home.path().join("cache"))
            .env_remove("RUST_LOG")
            .current_dir(home.path());
        cmd
    }

    fn write_config(home: &TempDir, contents: &str) {
        std::fs::write(home.path().join("config.toml"), contents).unwrap();
    }

    #[cfg(unix)]
    fn write_script(path: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Config using a stand-in virtualenv that only creates `<root>/bin`
    #[cfg(unix)]
    fn fake_virtualenv(home: &TempDir) {
        let script = home.path().join("fake-virtualenv");
        write_script(&script, "for last; do :; done\nmkdir -p \"$last/bin\"");
        std::fs::create_dir_all(home.path().join("tmp")).unwrap();
        std::fs::write(home.path().join("requirements.txt"), "").unwrap();
        write_config(
            home,
            &format!(
                "[python]\nvirtualenv = \"{}\"\n\n[cache]\ntemp_dir = \"{}\"\n",
                script.display(),
                home.path().join("tmp").display()
            ),
        );
    }

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        with_env(&home)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("provisioned environments"));
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        with_env(&home)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("with-env"));
    }

    #[test]
    fn cache_path_uses_xdg_cache_home() {
        let home = TempDir::new().unwrap();
        with_env(&home)
            .args(["cache", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("with-env/python-virtualenvs"))
            .stdout(predicate::str::contains(
                home.path().join("cache").display().to_string(),
            ));
    }

    #[test]
    fn cache_path_uses_configured_dir() {
        let home = TempDir::new().unwrap();
        let custom = home.path().join("elsewhere");
        write_config(&home, &format!("[cache]\ndir = \"{}\"\n", custom.display()));

        with_env(&home)
            .args(["cache", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(custom.display().to_string()));
    }

    #[test]
    fn cache_list_empty() {
        let home = TempDir::new().unwrap();
        with_env(&home)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached environments found"));
    }

    #[test]
    fn cache_list_json_empty() {
        let home = TempDir::new().unwrap();
        with_env(&home)
            .args(["cache", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::starts_with("[]"));
    }

    #[test]
    fn invalid_config_is_setup_failure() {
        let home = TempDir::new().unwrap();
        write_config(&home, "[cache]\nmax_entries = \"many\"\n");

        with_env(&home)
            .args(["cache", "path"])
            .assert()
            .code(125)
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn missing_manifest_is_setup_failure() {
        let home = TempDir::new().unwrap();
        with_env(&home)
            .args(["python", "-r", "missing.txt", "true"])
            .assert()
            .code(125)
            .stderr(predicate::str::contains("Cannot read dependency manifest"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn completions_generate() {
        let home = TempDir::new().unwrap();
        with_env(&home)
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("with-env"));
    }

    #[cfg(unix)]
    #[test]
    fn newdb_forwards_exit_code_and_sets_pgdatabase() {
        let home = TempDir::new().unwrap();
        write_config(&home, "[database]\ncreatedb = \"true\"\ndropdb = \"true\"\n");

        with_env(&home)
            .args(["newdb", "--prefix", "itest", "sh", "-c"])
            .arg("case \"$PGDATABASE\" in itest_*) exit 7;; esac; exit 1")
            .assert()
            .code(7);
    }

    #[cfg(unix)]
    #[test]
    fn newdb_missing_program_is_127() {
        let home = TempDir::new().unwrap();
        write_config(&home, "[database]\ncreatedb = \"true\"\ndropdb = \"true\"\n");

        with_env(&home)
            .args(["newdb", "with-env-no-such-program"])
            .assert()
            .code(127);
    }

    #[cfg(unix)]
    #[test]
    fn newdb_createdb_failure_is_setup_failure() {
        let home = TempDir::new().unwrap();
        write_config(&home, "[database]\ncreatedb = \"false\"\ndropdb = \"true\"\n");

        with_env(&home)
            .args(["newdb", "true"])
            .assert()
            .code(125)
            .stderr(predicate::str::contains("Provisioning failed"));
    }

    #[cfg(unix)]
    #[test]
    fn python_runs_in_cached_environment() {
        let home = TempDir::new().unwrap();
        fake_virtualenv(&home);

        with_env(&home)
            .args(["python", "sh", "-c", "echo \"$VIRTUAL_ENV\"; exit 3"])
            .assert()
            .code(3)
            .stdout(predicate::str::contains("with-env/python-virtualenvs"));

        with_env(&home)
            .args(["cache", "list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::is_match("^[0-9a-f]{64}\n$").unwrap());

        with_env(&home)
            .args(["cache", "info"])
            .assert()
            .success()
            .stdout(predicate::str::contains("cached"))
            .stdout(predicate::str::contains("not cached").not());
    }

    #[cfg(unix)]
    #[test]
    fn python_no_cache_cleans_up() {
        let home = TempDir::new().unwrap();
        fake_virtualenv(&home);

        with_env(&home)
            .args(["python", "--no-cache", "sh", "-c", "test -d \"$VIRTUAL_ENV/bin\""])
            .assert()
            .success();

        let leftovers = std::fs::read_dir(home.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);

        with_env(&home)
            .args(["cache", "list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached environments found"));
    }

    #[cfg(unix)]
    #[test]
    fn cache_clear_and_prune() {
        let home = TempDir::new().unwrap();
        fake_virtualenv(&home);

        with_env(&home).args(["python", "true"]).assert().success();

        with_env(&home)
            .args(["cache", "prune", "--max-entries", "5"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Nothing to prune"));

        with_env(&home)
            .args(["cache", "clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("cleared 1 environment(s)"));
    }
}
