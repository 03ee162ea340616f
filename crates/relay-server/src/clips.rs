//! Recorded clip directory.
//!
//! Lists the clips the recorder writes, enforces the retention count lazily
//! at listing time, and renders the HTML folder view.
//!
//! Listing order is reverse lexicographic by file name. That is "newest first"
//! only because the recorder names clips with a sortable timestamp prefix; files
//! named any other way are still listed, just not chronologically.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

const CLIP_EXTENSIONS: &[&str] = &["mp4", "avi"];

/// True when the file name has a recognized video extension.
pub fn is_clip_file_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(OsStr::to_str)
        .map(|ext| CLIP_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Clip directory with its retention limit.
#[derive(Clone, Debug)]
pub struct ClipLibrary {
    dir: PathBuf,
    max_clips: usize,
}

impl ClipLibrary {
    pub fn new(dir: PathBuf, max_clips: usize) -> Self {
        Self { dir, max_clips }
    }

    pub fn dir(&self) -> &Path {
        self.dir.as_path()
    }

    pub fn max_clips(&self) -> usize {
        self.max_clips
    }

    /// Create the directory when the recorder has not done so yet.
    pub fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)
                .with_context(|| format!("create clips dir {:?}", self.dir))?;
            tracing::info!(dir = %self.dir.display(), "created clips directory");
        }
        Ok(())
    }

    /// Prune to the retention limit, then return clip names, newest name first.
    pub fn list_clips(&self) -> Result<Vec<String>> {
        self.prune_old_clips(self.max_clips);
        let mut names = self.clip_names()?;
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Delete the least recently modified clips beyond `max_clips`.
    ///
    /// Best effort: read and delete failures are logged and skipped. Returns the
    /// names that were removed.
    pub fn prune_old_clips(&self, max_clips: usize) -> Vec<String> {
        let names = match self.clip_names() {
            Ok(names) => names,
            Err(e) => {
                tracing::error!(error = %e, "error pruning clips");
                return Vec::new();
            }
        };
        if names.len() <= max_clips {
            return Vec::new();
        }

        let mut with_times: Vec<(SystemTime, String)> = names
            .into_iter()
            .filter_map(|name| {
                let modified = fs::metadata(self.dir.join(&name))
                    .and_then(|meta| meta.modified());
                match modified {
                    Ok(mtime) => Some((mtime, name)),
                    Err(e) => {
                        tracing::warn!(clip = %name, error = %e, "failed to stat clip");
                        None
                    }
                }
            })
            .collect();
        if with_times.len() <= max_clips {
            return Vec::new();
        }
        with_times.sort();

        let extra = with_times.len() - max_clips;
        let mut removed = Vec::with_capacity(extra);
        for (_, name) in with_times.into_iter().take(extra) {
            match fs::remove_file(self.dir.join(&name)) {
                Ok(()) => {
                    tracing::info!(clip = %name, "pruned old clip");
                    removed.push(name);
                }
                Err(e) => {
                    tracing::error!(clip = %name, error = %e, "failed to delete clip");
                }
            }
        }
        removed
    }

    fn clip_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir).with_context(|| format!("read_dir {:?}", self.dir))? {
            let entry = entry.context("read_dir entry")?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_clip_file_name(&name) {
                continue;
            }
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

/// Render the clip folder view with links under `/clips/`.
pub fn render_clips_html(names: &[String]) -> String {
    let list = names
        .iter()
        .map(|name| {
            format!(
                "<li><a href=\"/clips/{}\">{}</a></li>",
                urlencoding::encode(name),
                escape_html(name)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Clips Folder View</title>
  <style>
    body {{ background:#111; color:#eee; font-family:Arial,sans-serif; }}
    a {{ color:#6cf; }}
  </style>
</head>
<body>
  <h1>Clips Folder View</h1>
  <ul>{list}</ul>
</body>
</html>
"#
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
