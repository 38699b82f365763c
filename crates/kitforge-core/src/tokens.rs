//! Literal `{{KEY}}` token substitution over a template tree.

use crate::error::Result;
use crate::io;
use crate::template::{self, TemplateFile};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;

const TEXT_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "mjs", "cjs", "json", "html", "htm", "css", "scss", "md", "txt",
    "yaml", "yml", "env", "sh", "sql", "toml", "xml", "svg", "ejs", "hbs", "vue",
];

const TEXT_FILE_NAMES: &[&str] = &[
    "Dockerfile",
    "Procfile",
    "Makefile",
    ".gitignore",
    ".npmrc",
    ".nvmrc",
    ".dockerignore",
    "VERSION",
];

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| Regex::new(r"\{\{([A-Z][A-Z0-9_]*)\}\}").expect("valid token regex"))
}

/// Outcome of rendering one product tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderReport {
    pub files_written: usize,
    pub text_files: usize,
    /// Relative path → token names left in place because no value was supplied.
    pub unresolved: BTreeMap<PathBuf, Vec<String>>,
}

/// Whether substitution applies to this path; everything else is byte-copied.
pub fn is_text_path(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if TEXT_FILE_NAMES.contains(&name) || name.starts_with(".env") {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Replace every `{{KEY}}` for each key in `tokens`.
///
/// Returns the rendered text and the names of tokens that remain because no
/// value was supplied.
pub fn substitute(text: &str, tokens: &BTreeMap<String, String>) -> (String, Vec<String>) {
    let mut out = text.to_string();
    for (key, value) in tokens {
        let placeholder = format!("{{{{{key}}}}}");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, value);
        }
    }
    let mut unresolved: Vec<String> = token_re()
        .captures_iter(&out)
        .map(|c| c[1].to_string())
        .collect();
    unresolved.sort();
    unresolved.dedup();
    (out, unresolved)
}

/// Write `files` under `workspace_dir`, substituting tokens in text files and
/// copying everything else byte-for-byte.
pub fn render(
    files: &[TemplateFile],
    workspace_dir: &Path,
    tokens: &BTreeMap<String, String>,
) -> Result<RenderReport> {
    let mut report = RenderReport::default();
    io::ensure_dir(workspace_dir)?;

    for file in files {
        let dest = workspace_dir.join(&file.path);
        if let Some(parent) = dest.parent() {
            io::ensure_dir(parent)?;
        }

        let text = if is_text_path(&file.path) {
            match std::str::from_utf8(&file.contents) {
                Ok(t) => Some(t),
                Err(_) => {
                    warn!(path = %file.path.display(), "text-like file is not UTF-8, copying verbatim");
                    None
                }
            }
        } else {
            None
        };

        match text {
            Some(t) => {
                let (rendered, unresolved) = substitute(t, tokens);
                std::fs::write(&dest, rendered)?;
                report.text_files += 1;
                if !unresolved.is_empty() {
                    warn!(
                        path = %file.path.display(),
                        tokens = ?unresolved,
                        "unresolved template tokens left in place"
                    );
                    report.unresolved.insert(file.path.clone(), unresolved);
                }
            }
            None => std::fs::write(&dest, &file.contents)?,
        }
        if file.executable {
            io::set_executable(&dest, true)?;
        }
        report.files_written += 1;
    }
    Ok(report)
}

/// Render a template directory straight from disk.
pub fn render_dir(
    template_dir: &Path,
    workspace_dir: &Path,
    tokens: &BTreeMap<String, String>,
) -> Result<RenderReport> {
    let files = template::load_dir(template_dir)?;
    render(&files, workspace_dir, tokens)
}
