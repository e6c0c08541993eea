//! Integration tests for setupforge

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn setupforge() -> Command {
        cargo_bin_cmd!("setupforge")
    }

    #[test]
    fn help_displays() {
        setupforge()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("catalog sync and installer build"));
    }

    #[test]
    fn version_displays() {
        setupforge()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("setupforge"));
    }

    #[test]
    fn config_path() {
        setupforge()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        setupforge()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("[catalog]"));
    }

    #[test]
    fn catalog_reports_state() {
        // Not-ready on a cold machine, a package count on a warm one
        setupforge().arg("catalog").assert().success().stdout(
            predicate::str::contains("Catalog not ready")
                .or(predicate::str::contains("Packages:")),
        );
    }

    #[test]
    fn build_requires_packages() {
        setupforge()
            .arg("build")
            .assert()
            .failure()
            .stderr(predicate::str::contains("--package"));
    }

    #[test]
    fn build_without_toolchain_or_template_fails() {
        setupforge()
            .args(["build", "--package", "Mozilla.Firefox=Firefox"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn fetch_missing_token_env_fails() {
        setupforge()
            .args([
                "fetch",
                "acme",
                "private-repo",
                "--token-env",
                "SETUPFORGE_INTEGRATION_UNSET_TOKEN",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("SETUPFORGE_INTEGRATION_UNSET_TOKEN"));
    }

    #[test]
    fn catalog_show_accepts_limit() {
        setupforge()
            .args(["catalog", "show", "--limit", "3"])
            .assert()
            .success();
    }
}
