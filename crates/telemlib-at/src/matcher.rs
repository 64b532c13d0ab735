//! Byte-at-a-time response matcher.
//!
//! The modem's responses arrive as an undelimited byte stream in which
//! solicited responses, terminal lines, prompts, and unsolicited result
//! codes are interleaved. The [`Matcher`] watches that stream one byte at
//! a time, comparing the accumulated bytes prefix-wise against every
//! registered response literal and narrowing the set of still-plausible
//! candidates ("armed" literals). When exactly one candidate remains and
//! the accumulation equals its complete literal, the matcher emits that
//! literal's [`Token`] and resets.
//!
//! Whenever no candidate remains, the accumulation is discarded and the
//! offending byte is re-examined against the full candidate set, so a
//! response can begin immediately after line noise.

use tracing::warn;

/// Maximum number of literals one matcher accepts.
///
/// Registration beyond this count is logged and ignored.
pub const MAX_EXPECTATIONS: usize = 32;

/// Handle to a registered literal, returned on registration and emitted on
/// a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub usize);

/// Prefix matcher over a fixed table of response literals.
#[derive(Debug)]
pub struct Matcher {
    literals: Vec<Vec<u8>>,
    /// Accumulated bytes of the match in progress. Never grows past the
    /// longest registered literal.
    buf: Vec<u8>,
    /// Armed flags, parallel to `literals`.
    armed: Vec<bool>,
    armed_count: usize,
}

impl Matcher {
    /// Create an empty matcher.
    pub fn new() -> Self {
        Matcher {
            literals: Vec::new(),
            buf: Vec::new(),
            armed: Vec::new(),
            armed_count: 0,
        }
    }

    /// Register a response literal.
    ///
    /// Returns the literal's [`Token`], or `None` if the table is full
    /// (logged, no-op) or the literal is empty. Empty literals cannot be
    /// matched against a byte stream; commands with an empty response
    /// literal complete through the terminal `OK`/`ERROR` path instead.
    pub fn register(&mut self, literal: &[u8]) -> Option<Token> {
        if literal.is_empty() {
            return None;
        }
        if self.literals.len() >= MAX_EXPECTATIONS {
            warn!(
                literal = %String::from_utf8_lossy(literal),
                "matcher table full ({MAX_EXPECTATIONS} entries), ignoring registration"
            );
            return None;
        }
        self.literals.push(literal.to_vec());
        self.armed.push(true);
        self.armed_count += 1;
        Some(Token(self.literals.len() - 1))
    }

    /// Number of registered literals.
    pub fn len(&self) -> usize {
        self.literals.len()
    }

    /// Returns `true` if no literals are registered.
    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    /// Discard the accumulation and re-arm every literal.
    pub fn reset(&mut self) {
        self.buf.clear();
        for flag in &mut self.armed {
            *flag = true;
        }
        self.armed_count = self.literals.len();
    }

    /// Feed one byte from the stream.
    ///
    /// Returns the matched literal's token when the byte completes a
    /// unique full match; `None` otherwise.
    pub fn feed(&mut self, byte: u8) -> Option<Token> {
        if let Some(token) = self.advance(byte) {
            return Some(token);
        }
        if self.armed_count == 0 {
            // Stream noise killed every candidate. Start over and give the
            // byte a second look -- it may begin the next response.
            self.reset();
            return self.advance(byte);
        }
        None
    }

    /// Append `byte` and narrow the armed set. Emits a token on a unique
    /// full match. Leaves `armed_count == 0` when the byte fits nothing.
    fn advance(&mut self, byte: u8) -> Option<Token> {
        let pos = self.buf.len();
        self.buf.push(byte);

        for (i, literal) in self.literals.iter().enumerate() {
            if !self.armed[i] {
                continue;
            }
            if pos >= literal.len() || literal[pos] != byte {
                self.armed[i] = false;
                self.armed_count -= 1;
            }
        }

        if self.armed_count == 1 {
            let i = self.armed.iter().position(|&a| a).unwrap();
            if self.literals[i].len() == self.buf.len() {
                self.reset();
                return Some(Token(i));
            }
        }
        None
    }

    /// Verify that no registered literal is a prefix of (or equal to)
    /// another.
    ///
    /// Such a pair could leave two candidates simultaneously plausible at
    /// the moment the shorter one completes, and the matcher would then
    /// never dispatch it. Returns the first offending pair of tokens.
    pub fn verify_unambiguous(&self) -> Result<(), (Token, Token)> {
        for (i, a) in self.literals.iter().enumerate() {
            for (j, b) in self.literals.iter().enumerate() {
                if i != j && b.starts_with(a.as_slice()) {
                    return Err((Token(i), Token(j)));
                }
            }
        }
        Ok(())
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}
