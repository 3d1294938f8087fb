//! Known Whisper model sizes, where their files live, and how to fetch a missing one.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use tracing::{debug, info};

use crate::{Error, Result};

/// A downloadable ggml model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    /// Size name users configure (e.g. `small`).
    pub name: &'static str,
    /// File name inside the model directory.
    pub filename: &'static str,
    pub url: &'static str,
}

// whisper.cpp's standard Hugging Face repo for ggml models.
static MODELS: &[ModelSpec] = &[
    ModelSpec {
        name: "tiny",
        filename: "ggml-tiny.bin",
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-tiny.bin",
    },
    ModelSpec {
        name: "base",
        filename: "ggml-base.bin",
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-base.bin",
    },
    ModelSpec {
        name: "small",
        filename: "ggml-small.bin",
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-small.bin",
    },
    ModelSpec {
        name: "medium",
        filename: "ggml-medium.bin",
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-medium.bin",
    },
    ModelSpec {
        name: "large",
        filename: "ggml-large-v3.bin",
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-large-v3.bin",
    },
];

pub fn lookup(name: &str) -> Option<&'static ModelSpec> {
    let name = name.trim();
    MODELS.iter().find(|m| m.name.eq_ignore_ascii_case(name))
}

pub fn names() -> impl Iterator<Item = &'static str> {
    MODELS.iter().map(|m| m.name)
}

/// Path of the model file for `name` inside `dir`, whether or not it exists yet.
pub fn model_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let spec = lookup(name).ok_or_else(|| Error::model(format!("unknown model size '{name}'")))?;
    Ok(dir.join(spec.filename))
}

/// Locate the model file, downloading it first when `fetch` is set and it is missing.
pub fn ensure_model(dir: &Path, name: &str, fetch: bool) -> Result<PathBuf> {
    let path = model_path(dir, name)?;
    if path.is_file() {
        return Ok(path);
    }
    if !fetch {
        return Err(Error::model(format!(
            "model file not found: {} (run with --fetch-model to download it)",
            path.display()
        )));
    }

    let spec = lookup(name).ok_or_else(|| Error::model(format!("unknown model size '{name}'")))?;
    fs::create_dir_all(dir).map_err(|e| {
        Error::model(format!("failed to create model dir {}: {e}", dir.display()))
    })?;

    info!(model = spec.name, url = spec.url, "downloading model");
    let client = Client::builder()
        .user_agent(concat!("mailscribe/", env!("CARGO_PKG_VERSION")))
        .timeout(None::<std::time::Duration>)
        .build()
        .map_err(|e| Error::model(format!("failed to build HTTP client: {e}")))?;
    download_to_path(&client, spec.url, &path)?;
    info!(path = %path.display(), "model saved");
    Ok(path)
}

/// Download `url` into `dest`. Bytes land in `<dest>.part` first and only replace `dest`
/// once the body is complete and synced.
pub fn download_to_path(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let resp = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::model(format!("download of {url} failed: {e}")))?;

    let total = resp.content_length();
    write_atomically(resp, total, dest)
}

fn write_atomically<R: Read>(mut body: R, total: Option<u64>, dest: &Path) -> Result<()> {
    let part = PartFile::create(dest)?;

    let progress = progress_bar(total);
    let copied = io::copy(&mut body, &mut progress.wrap_write(&part.file));
    progress.finish_and_clear();
    let copied = copied.map_err(|e| Error::model(format!("download interrupted: {e}")))?;

    part.commit(dest)?;
    debug!(bytes = copied, path = %dest.display(), "model file written");
    Ok(())
}

fn progress_bar(total: Option<u64>) -> ProgressBar {
    let bar = match total {
        Some(total) if total > 0 => ProgressBar::new(total),
        _ => ProgressBar::new_spinner(),
    };
    let style = ProgressStyle::with_template(
        "{spinner:.green} {bytes}/{total_bytes} {bar:40.cyan/blue} {eta}",
    )
    .map(|style| style.progress_chars("#>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// A `<dest>.part` file that deletes itself on drop unless committed.
struct PartFile {
    path: PathBuf,
    file: fs::File,
    committed: bool,
}

impl PartFile {
    fn create(dest: &Path) -> Result<Self> {
        let mut name = dest.as_os_str().to_owned();
        name.push(".part");
        let path = PathBuf::from(name);
        let file = fs::File::create(&path)
            .map_err(|e| Error::model(format!("failed to create {}: {e}", path.display())))?;
        Ok(Self {
            path,
            file,
            committed: false,
        })
    }

    fn commit(mut self, dest: &Path) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| Error::model(format!("failed to sync {}: {e}", self.path.display())))?;
        fs::rename(&self.path, dest).map_err(|e| {
            Error::model(format!("failed to move model into {}: {e}", dest.display()))
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_size() {
        assert_eq!(
            names().collect::<Vec<_>>(),
            ["tiny", "base", "small", "medium", "large"]
        );
        assert_eq!(lookup("Large").map(|m| m.filename), Some("ggml-large-v3.bin"));
        assert!(lookup("large-v3-turbo").is_none());
    }

    #[test]
    fn missing_model_without_fetch_is_a_model_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let err = ensure_model(dir.path(), "tiny", false).unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert!(err.to_string().contains("--fetch-model"));
        Ok(())
    }

    #[test]
    fn existing_model_is_found() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("ggml-base.bin"), b"ggml")?;
        assert_eq!(
            ensure_model(dir.path(), "base", false)?,
            dir.path().join("ggml-base.bin")
        );
        Ok(())
    }

    #[test]
    fn completed_download_replaces_the_part_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let dest_path = dir.path().join("model.bin");
        let tmp_path = PathBuf::from(format!("{}.part", dest_path.display()));

        let bytes = b"abc123".to_vec();
        write_atomically(
            std::io::Cursor::new(bytes.clone()),
            Some(bytes.len() as u64),
            &dest_path,
        )?;

        assert!(!tmp_path.exists());
        assert_eq!(std::fs::read(&dest_path)?, bytes);
        Ok(())
    }

    struct FailsAfter {
        remaining: usize,
    }

    impl Read for FailsAfter {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.remaining == 0 {
                return Err(std::io::Error::other("connection reset"));
            }
            let n = self.remaining.min(buf.len());
            buf[..n].fill(b'x');
            self.remaining -= n;
            Ok(n)
        }
    }

    #[test]
    fn failed_download_leaves_no_partial_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let dest_path = dir.path().join("model.bin");
        let tmp_path = PathBuf::from(format!("{}.part", dest_path.display()));

        let err = write_atomically(FailsAfter { remaining: 3 }, None, &dest_path).unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert!(err.to_string().contains("connection reset"));
        assert!(!dest_path.exists());
        assert!(!tmp_path.exists());
        Ok(())
    }

    #[test]
    fn download_over_http() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/ggml-tiny.bin")
            .with_body(b"model-bytes")
            .create();

        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("ggml-tiny.bin");
        download_to_path(
            &Client::new(),
            &format!("{}/ggml-tiny.bin", server.url()),
            &dest,
        )?;
        assert_eq!(std::fs::read(&dest)?, b"model-bytes");
        Ok(())
    }
}
