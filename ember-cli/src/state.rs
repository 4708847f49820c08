use ember::{Scanner, TokenType};

/// Pending input of the interactive prompt. A program is only handed back
/// once every `{` it opened has been closed.
#[derive(Debug, Default)]
pub struct ReplState {
    pending: String,
    open_braces: usize,
}

impl ReplState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompt(&self) -> String {
        match self.open_braces {
            0 => "> ".to_string(),
            depth => format!("..{} ", depth),
        }
    }

    /// Appends a line and returns the whole program once its braces balance.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        // Scanner tokens, so braces inside strings and comments don't count
        for token in Scanner::with_comments(line).flatten() {
            match token.token_type {
                TokenType::LeftBrace => self.open_braces += 1,
                TokenType::RightBrace => self.open_braces = self.open_braces.saturating_sub(1),
                _ => {}
            }
        }

        self.pending.push_str(line);
        self.pending.push('\n');

        if self.open_braces == 0 {
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    pub fn cancel(&mut self) {
        self.pending.clear();
        self.open_braces = 0;
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
