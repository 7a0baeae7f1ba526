// End-to-end runs of the depot binary against a scratch store.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(trusted_keys: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let ws = Self { dir };
        ws.write_config(trusted_keys);
        ws
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn store_dir(&self) -> PathBuf {
        self.root().join("store")
    }

    fn config_path(&self) -> PathBuf {
        self.root().join("depot.toml")
    }

    fn write_config(&self, trusted_keys: &[&str]) {
        let keys: Vec<_> = trusted_keys.iter().map(|k| format!("\"{k}\"")).collect();
        let config = format!(
            "trusted_public_keys = [{}]\n\n[store]\nstore_dir = \"{}\"\nstate_dir = \"{}\"\n",
            keys.join(", "),
            self.store_dir().display(),
            self.root().join("var").display(),
        );
        std::fs::write(self.config_path(), config).unwrap();
    }

    fn command(&self, args: &[&str]) -> Command {
        self.command_on("local", args)
    }

    fn command_on(&self, store: &str, args: &[&str]) -> Command {
        self.build_command(Some(store), args)
    }

    /// A command that leaves the store choice to `NIX_REMOTE`, which is unset.
    fn command_without_store(&self, args: &[&str]) -> Command {
        self.build_command(None, args)
    }

    fn build_command(&self, store: Option<&str>, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_depot"));
        cmd.arg("--config").arg(self.config_path());
        if let Some(store) = store {
            cmd.arg("--store").arg(store);
        }
        cmd.args(args)
            .env_remove("NIX_REMOTE")
            .env_remove("DEPOT_CONFIG")
            .env("RUST_LOG", "error");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().unwrap()
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "depot {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout).unwrap()
    }

    fn run_with_stdin(&self, args: &[&str], stdin: &str) -> Output {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        child
            .stdin
            .take()
            .unwrap()
            .write_all(stdin.as_bytes())
            .unwrap();
        child.wait_with_output().unwrap()
    }

    /// Place a file in the store and register it through `load-db`.
    fn add_registered_file(&self, name: &str, contents: &str) -> String {
        let text_file = self.root().join(format!("{name}.txt"));
        std::fs::write(&text_file, contents).unwrap();
        let path = self
            .run_ok(&["make-path", "text", name, "--file", text_file.to_str().unwrap()])
            .trim()
            .to_string();

        std::fs::create_dir_all(self.store_dir()).unwrap();
        std::fs::write(&path, contents).unwrap();
        let output = self.run_with_stdin(&["load-db"], &format!("{path}\n\n0\n"));
        assert!(
            output.status.success(),
            "load-db failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        path
    }
}

#[test]
fn test_make_path_is_deterministic() {
    let ws = Workspace::new(&[]);
    let hash = "sha256:1b8m03r63zqhnjf7l5wnldhh7c134ap5vpj0850ymkq1iyzicy5s";
    let args = ["make-path", "fixed", "foo", "--hash", hash, "--recursive"];

    let first = ws.run_ok(&args);
    let second = ws.run_ok(&args);
    assert_eq!(first, second);
    assert!(first.starts_with(&format!("{}/", ws.store_dir().display())));
    assert!(first.trim_end().ends_with("-foo"));

    let flat = ws.run_ok(&["make-path", "fixed", "foo", "--hash", hash]);
    assert_ne!(first, flat);
}

#[test]
fn test_make_path_rejects_bad_names() {
    let ws = Workspace::new(&[]);
    let hash = "sha256:1b8m03r63zqhnjf7l5wnldhh7c134ap5vpj0850ymkq1iyzicy5s";
    let output = ws.run(&["make-path", "fixed", ".hidden", "--hash", hash]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains(".hidden"));
}

#[test]
fn test_hash_path_formats() {
    let ws = Workspace::new(&[]);
    let file = ws.root().join("empty");
    std::fs::write(&file, "").unwrap();
    let file = file.to_str().unwrap();

    assert_eq!(
        ws.run_ok(&["hash-path", file, "--flat", "--format", "base16"]).trim(),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    let sri = ws.run_ok(&["hash-path", file, "--format", "sri"]);
    assert!(sri.starts_with("sha256-"));
}

#[test]
fn test_load_db_then_path_info_and_dump_db() {
    let ws = Workspace::new(&[]);
    let path = ws.add_registered_file("hello", "hello world");

    let info = ws.run_ok(&["path-info", &path]);
    let fields: Vec<_> = info.trim_end().split('\t').collect();
    assert_eq!(fields[0], path);
    assert!(fields[1].starts_with("sha256:"));

    let json = ws.run_ok(&["path-info", "--json", &path]);
    let records: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(records[0]["path"], path.as_str());

    let dump = ws.run_ok(&["dump-db", "--no-hash"]);
    assert_eq!(dump, format!("{path}\n\n0\n"));
}

#[test]
fn test_path_info_of_invalid_path_fails() {
    let ws = Workspace::new(&[]);
    let missing = format!(
        "{}/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-missing",
        ws.store_dir().display()
    );
    let output = ws.run(&["path-info", &missing]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("is not valid"));
}

#[test]
fn test_sign_and_verify() {
    let ws = Workspace::new(&[]);
    let path = ws.add_registered_file("signed", "signed contents");

    let key_file = ws.root().join("key.sec");
    let public_key = ws
        .run_ok(&["key", "generate", "test-1", "--output", key_file.to_str().unwrap()])
        .trim()
        .to_string();
    assert!(public_key.starts_with("test-1:"));

    // No trusted keys yet: contents check passes, signature threshold fails.
    assert!(ws.run(&["verify", &path]).status.success());
    assert!(!ws.run(&["verify", "--sigs-needed", "1", &path]).status.success());

    ws.run_ok(&["sign", "--key-file", key_file.to_str().unwrap(), &path]);
    let info = ws.run_ok(&["path-info", "--sigs", &path]);
    assert!(info.contains("test-1:"));

    ws.write_config(&[public_key.as_str()]);
    ws.run_ok(&["verify", "--sigs-needed", "1", &path]);
    ws.run_ok(&["verify", "--sigs-needed", "1"]);
}

#[test]
fn test_verify_detects_modified_contents() {
    let ws = Workspace::new(&[]);
    let path = ws.add_registered_file("mutable", "original");
    std::fs::write(&path, "tampered").unwrap();

    let output = ws.run(&["verify", &path]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("was modified"));
}

#[test]
fn test_copy_to_binary_cache() {
    let ws = Workspace::new(&[]);
    let path = ws.add_registered_file("cached", "cache me");
    let cache_uri = format!("file://{}", ws.root().join("cache").display());

    ws.run_ok(&["copy", "--from", "local", "--to", &cache_uri, &path]);

    let output = ws.command_on(&cache_uri, &["path-info", &path]).output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with(&path));
    let hash_part = Path::new(&path).file_name().unwrap().to_str().unwrap()[..32].to_string();
    assert!(ws.root().join("cache").join(format!("{hash_part}.narinfo")).exists());
}

#[test]
fn test_key_public_matches_generate() {
    let ws = Workspace::new(&[]);
    let key_file = ws.root().join("key.sec");
    let public_key = ws.run_ok(&["key", "generate", "k-1", "--output", key_file.to_str().unwrap()]);
    let derived = ws.run_ok(&["key", "public", key_file.to_str().unwrap()]);
    assert_eq!(public_key, derived);
}

#[test]
fn test_nix_remote_selects_default_store() {
    let ws = Workspace::new(&[]);
    let path = ws.add_registered_file("remote", "found through the environment");
    let cache = ws.root().join("cache");
    let cache_uri = format!("file://{}", cache.display());

    // Unset: auto-detection picks the writable local store.
    let output = ws.command_without_store(&["path-info", &path]).output().unwrap();
    assert!(output.status.success());

    // The binary cache is empty, so the local registration must not be seen.
    let output = ws
        .command_without_store(&["path-info", &path])
        .env("NIX_REMOTE", &cache_uri)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("is not valid"));
    assert!(cache.join("nix-cache-info").exists());

    ws.run_ok(&["copy", "--from", "local", "--to", &cache_uri, &path]);
    let output = ws
        .command_without_store(&["path-info", &path])
        .env("NIX_REMOTE", &cache_uri)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with(&path));
}
