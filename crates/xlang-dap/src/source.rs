use std::sync::LazyLock;

use regex_lite::Regex;

use crate::command::ModuleHandle;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[a-z]+").expect("word pattern is valid"));

/// Minimum length (exclusive) of a word that offers a column breakpoint.
const COLUMN_BREAKPOINT_MIN_LEN: usize = 8;

/// A maximal alphabetic run inside a source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub name: String,
    pub line: usize,
    /// Character offset of the run within its line.
    pub index: usize,
}

/// Split `text` into its alphabetic runs, left to right.
pub fn scan_words(line: usize, text: &str) -> Vec<Word> {
    WORD_RE
        .find_iter(text)
        .map(|m| Word {
            name: m.as_str().to_string(),
            line,
            index: text[..m.start()].chars().count(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    Windows,
    Posix,
}

impl PathStyle {
    pub fn host() -> Self {
        if cfg!(windows) {
            PathStyle::Windows
        } else {
            PathStyle::Posix
        }
    }
}

/// Normalize a path the way the host platform compares them.
pub fn normalize_path(path: &str) -> String {
    normalize_path_with(path, PathStyle::host())
}

pub fn normalize_path_with(path: &str, style: PathStyle) -> String {
    match style {
        PathStyle::Windows => path.replace('/', "\\").to_lowercase(),
        PathStyle::Posix => path.replace('\\', "/"),
    }
}

/// The single active source file and everything derived from its content.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    file: Option<String>,
    module: Option<ModuleHandle>,
    lines: Vec<String>,
    instructions: Vec<Word>,
    starts: Vec<usize>,
    ends: Vec<usize>,
}

impl SourceRegistry {
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn module(&self) -> Option<&ModuleHandle> {
        self.module.as_ref()
    }

    /// Whether `path` (already normalized) is the loaded file.
    pub fn is_current(&self, path: &str) -> bool {
        self.file.as_deref() == Some(path)
    }

    /// Make `path` the current file with the given content and module.
    pub fn replace(&mut self, path: String, content: &[u8], module: ModuleHandle) {
        self.file = Some(path);
        self.module = Some(module);
        self.initialize_contents(content);
    }

    /// Rebuild lines and the flat token table from raw bytes.
    pub fn initialize_contents(&mut self, content: &[u8]) {
        let text = String::from_utf8_lossy(content);
        self.lines = text
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect();

        self.instructions.clear();
        self.starts.clear();
        self.ends.clear();

        for (line_no, line) in self.lines.iter().enumerate() {
            self.starts.push(self.instructions.len());
            self.instructions.extend(scan_words(line_no, line));
            self.ends.push(self.instructions.len());
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Trimmed content of `line`; empty past the end of the file.
    pub fn line_text(&self, line: usize) -> &str {
        self.lines.get(line).map(|l| l.trim()).unwrap_or_default()
    }

    /// Raw length of `line` in characters.
    pub fn line_len(&self, line: usize) -> usize {
        self.lines.get(line).map(|l| l.chars().count()).unwrap_or(0)
    }

    pub fn instructions(&self) -> &[Word] {
        &self.instructions
    }

    pub fn starts(&self) -> &[usize] {
        &self.starts
    }

    pub fn ends(&self) -> &[usize] {
        &self.ends
    }

    /// First instruction address of `line`. Lines past the end map to the
    /// end of the table so the mapping stays monotonic.
    pub fn instruction_for_line(&self, line: usize) -> usize {
        self.starts
            .get(line)
            .copied()
            .unwrap_or(self.instructions.len())
    }

    pub fn instruction(&self, address: i64) -> Option<&Word> {
        usize::try_from(address)
            .ok()
            .and_then(|a| self.instructions.get(a))
    }

    /// Start offsets of the long words on `line` that accept a column
    /// breakpoint.
    pub fn column_breakpoints(&self, line: usize) -> Vec<usize> {
        scan_words(line, self.line_text(line))
            .into_iter()
            .filter(|w| w.name.chars().count() > COLUMN_BREAKPOINT_MIN_LEN)
            .map(|w| w.index)
            .collect()
    }
}
