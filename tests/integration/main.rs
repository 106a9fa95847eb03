//! Integration tests for cachegraph

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Command isolated from the user's configuration
    fn cachegraph(temp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("cachegraph");
        cmd.env("CACHEGRAPH_CONFIG", temp.path().join("config.toml"));
        cmd
    }

    fn fixture() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("graph.toml")
    }

    fn export_json(temp: &TempDir, extra: &[&str]) -> serde_json::Value {
        let output = cachegraph(temp)
            .arg("export")
            .arg(fixture())
            .args(["--key", "app"])
            .args(extra)
            .output()
            .unwrap();
        assert!(output.status.success(), "{:?}", output);
        serde_json::from_slice(&output.stdout).unwrap()
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        cachegraph(&temp)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("cache provenance"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        cachegraph(&temp)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("cachegraph"));
    }

    #[test]
    fn export_max_includes_layers() {
        let temp = TempDir::new().unwrap();
        let config = export_json(&temp, &["--mode", "max"]);

        let records = config["records"].as_array().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(config["layers"].as_array().unwrap().len(), 2);
        assert_eq!(records[0]["inputs"].as_array().unwrap().len(), 2);
        // The released library result exports without content
        assert!(records[1].get("results").is_none());
        assert_eq!(records[2]["results"][0]["layer"], 0);
    }

    #[test]
    fn export_min_omits_layers() {
        let temp = TempDir::new().unwrap();
        let config = export_json(&temp, &["--mode", "min"]);

        assert_eq!(config["records"].as_array().unwrap().len(), 3);
        assert!(config["layers"].as_array().unwrap().is_empty());
    }

    #[test]
    fn export_without_roots_strips_base_results() {
        let temp = TempDir::new().unwrap();
        let config = export_json(&temp, &["--mode", "max", "--no-roots"]);

        let records = config["records"].as_array().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["results"].as_array().unwrap().len(), 1);
        assert!(records[2].get("results").is_none());
    }

    #[test]
    fn export_unknown_key_fails() {
        let temp = TempDir::new().unwrap();
        cachegraph(&temp)
            .arg("export")
            .arg(fixture())
            .args(["--key", "missing"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("key 'missing'"));
    }

    #[test]
    fn export_invalid_manifest_shows_hint() {
        let temp = TempDir::new().unwrap();
        let manifest = temp.path().join("bad.toml");
        std::fs::write(
            &manifest,
            "[[keys]]\nid = \"app\"\nvtx = \"x\"\ndeps = [[{ key = \"base\" }]]\n",
        )
        .unwrap();

        cachegraph(&temp)
            .arg("export")
            .arg(&manifest)
            .args(["--key", "app"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid graph manifest"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn inspect_summarizes_export() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("cache.json");

        cachegraph(&temp)
            .arg("export")
            .arg(fixture())
            .args(["--key", "app", "--mode", "max", "--output"])
            .arg(&out)
            .assert()
            .success()
            .stdout(predicate::str::contains("Exported 3 record(s)"));

        cachegraph(&temp)
            .arg("inspect")
            .arg(&out)
            .args(["--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"records\": 3"))
            .stdout(predicate::str::contains("\"links\": 3"))
            .stdout(predicate::str::contains("\"roots\": 1"));

        cachegraph(&temp)
            .arg("inspect")
            .arg(&out)
            .assert()
            .success()
            .stdout(predicate::str::contains("DIGEST"));
    }

    #[test]
    fn config_path() {
        let temp = TempDir::new().unwrap();
        cachegraph(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_init_then_show() {
        let temp = TempDir::new().unwrap();
        cachegraph(&temp).args(["config", "init"]).assert().success();
        assert!(temp.path().join("config.toml").exists());

        cachegraph(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[export]"));
    }

    #[test]
    fn config_mode_applies_to_export() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("config.toml"),
            "[export]\nmode = \"max\"\n",
        )
        .unwrap();

        let config = export_json(&temp, &[]);
        assert_eq!(config["layers"].as_array().unwrap().len(), 2);
    }
}
