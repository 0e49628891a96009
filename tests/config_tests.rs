// Config loading tests

use anyhow::Result;
use dify_stream::Config;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_full_config() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("dify-stream.toml");
    fs::write(
        &path,
        r#"
[server]
endpoint = "https://api.example.com/v1"
api_key = "app-secret"
user = "bench-user"

[audio]
flush_threshold_kib = 64
max_buffer_kib = 512
silence_threshold = 0.0002
"#,
    )?;

    let cfg = Config::load(path.to_str().unwrap())?;

    assert_eq!(cfg.server.endpoint, "https://api.example.com/v1");
    assert_eq!(cfg.server.api_key, "app-secret");
    assert_eq!(cfg.server.user, "bench-user");

    let assembler = cfg.audio.assembler_config();
    assert_eq!(assembler.flush_threshold_bytes, 64 * 1024);
    assert_eq!(assembler.max_buffer_bytes, 512 * 1024);

    Ok(())
}

#[test]
fn test_missing_audio_section_uses_defaults() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("minimal.toml");
    fs::write(
        &path,
        r#"
[server]
endpoint = "https://api.example.com/v1"
api_key = "app-secret"
"#,
    )?;

    let cfg = Config::load(path.to_str().unwrap())?;

    assert_eq!(cfg.audio.flush_threshold_kib, 80);
    assert_eq!(cfg.audio.max_buffer_kib, 1024);
    // No user configured: a per-install identity is generated
    assert!(cfg.server.user.starts_with("dify-stream-"));

    Ok(())
}
