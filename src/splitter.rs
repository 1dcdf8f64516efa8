//! Fixed-size, overlapping character windows over extracted document text.

use anyhow::Result;

/// Window length and overlap, both measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Characters per window.
    pub chunk_size: usize,
    /// Characters shared by consecutive windows.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

impl ChunkingConfig {
    /// Builds a config, rejecting windows that would never advance.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        anyhow::ensure!(chunk_size > 0, "chunk size must be positive");
        anyhow::ensure!(
            chunk_overlap < chunk_size,
            "chunk overlap {} must be smaller than chunk size {}",
            chunk_overlap,
            chunk_size
        );
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Distance between the starts of consecutive windows.
    pub fn stride(&self) -> usize {
        self.chunk_size.saturating_sub(self.chunk_overlap).max(1)
    }

    /// Number of windows produced for a text of `char_len` characters.
    ///
    /// Equals `ceil((L - O) / (W - O))` for `L > W`, and one window for any
    /// non-empty text that fits in a single window.
    pub fn expected_windows(&self, char_len: usize) -> usize {
        if char_len == 0 {
            return 0;
        }
        if char_len <= self.chunk_size {
            return 1;
        }
        1 + (char_len - self.chunk_size).div_ceil(self.stride())
    }
}

/// One window of document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    /// Zero-based position of the window in the document.
    pub index: usize,
    /// Character offset where the window starts.
    pub char_start: usize,
    /// Character offset one past the window's last character.
    pub char_end: usize,
    /// Window contents.
    pub text: String,
}

/// Splits `text` into windows of `chunk_size` characters that overlap by
/// `chunk_overlap` characters. Whitespace-only input yields no windows.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<TextWindow> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let offsets: Vec<usize> = text.char_indices().map(|(idx, _)| idx).collect();
    let char_len = offsets.len();
    let byte_at = |char_pos: usize| {
        if char_pos >= char_len {
            text.len()
        } else {
            offsets[char_pos]
        }
    };

    let size = config.chunk_size.max(1);
    let stride = config.stride();
    let mut windows = Vec::with_capacity(config.expected_windows(char_len));
    let mut start = 0usize;
    loop {
        let end = (start + size).min(char_len);
        windows.push(TextWindow {
            index: windows.len(),
            char_start: start,
            char_end: end,
            text: text[byte_at(start)..byte_at(end)].to_string(),
        });
        if end == char_len {
            break;
        }
        start += stride;
    }
    windows
}
