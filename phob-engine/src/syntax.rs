//! Pre-protection syntax checks.
//!
//! Malformed input fails the build instead of ending up sealed inside a
//! container that can never run.

/// Extensions treated as PHP scripts.
pub const SCRIPT_EXTENSIONS: &[&str] = &["php", "phtml", "php5", "php7", "php8", "inc"];

/// Checks one file before it is protected.
pub trait SourceCheck: Send + Sync {
    /// Returns a description of the first problem found, if any.
    fn check(&self, path: &str, contents: &[u8]) -> Result<(), String>;
}

/// Lexical well-formedness check for PHP scripts.
///
/// Scripts must be UTF-8, contain an open tag, terminate every string,
/// comment and heredoc, and balance `()`, `[]` and `{}` across the whole
/// file (blocks may span `?>` … `<?php`). Files with other extensions are
/// protected as opaque data.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptSyntax;

impl SourceCheck for ScriptSyntax {
    fn check(&self, path: &str, contents: &[u8]) -> Result<(), String> {
        if !is_script(path) {
            return Ok(());
        }
        let text = std::str::from_utf8(contents)
            .map_err(|e| format!("not valid UTF-8 (byte {})", e.valid_up_to()))?;
        check_php(text)
    }
}

fn is_script(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| {
            SCRIPT_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Html,
    Code,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    stack: Vec<(char, usize)>,
}

impl Lexer {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
            stack: Vec::new(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn starts_with(&self, pat: &str) -> bool {
        pat.chars()
            .enumerate()
            .all(|(i, c)| self.peek(i).is_some_and(|p| p.eq_ignore_ascii_case(&c)))
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn advance(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    /// Skips to the end of an open tag if one starts here.
    fn open_tag(&mut self) -> bool {
        if self.starts_with("<?php") {
            self.advance(5);
            true
        } else if self.starts_with("<?=") {
            self.advance(3);
            true
        } else if self.starts_with("<?") {
            self.advance(2);
            true
        } else {
            false
        }
    }

    fn quoted(&mut self, quote: char) -> Result<(), String> {
        let start = self.line;
        self.bump();
        while let Some(c) = self.bump() {
            if c == '\\' {
                self.bump();
            } else if c == quote {
                return Ok(());
            }
        }
        Err(format!("unterminated string starting on line {start}"))
    }

    fn block_comment(&mut self) -> Result<(), String> {
        let start = self.line;
        self.advance(2);
        while self.peek(0).is_some() {
            if self.starts_with("*/") {
                self.advance(2);
                return Ok(());
            }
            self.bump();
        }
        Err(format!("unterminated comment starting on line {start}"))
    }

    /// Line comments end at a newline or a close tag.
    fn line_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' || self.starts_with("?>") {
                return;
            }
            self.bump();
        }
    }

    /// Heredoc/nowdoc: `<<<ID`, `<<<'ID'` or `<<<"ID"`, closed by a line
    /// whose first non-blank text is `ID`.
    fn heredoc(&mut self) -> Result<(), String> {
        let start = self.line;
        self.advance(3);
        while matches!(self.peek(0), Some(' ' | '\t')) {
            self.bump();
        }
        let quote = match self.peek(0) {
            Some(q @ ('\'' | '"')) => {
                self.bump();
                Some(q)
            }
            _ => None,
        };
        let mut label = String::new();
        while let Some(c) = self.peek(0) {
            if c.is_alphanumeric() || c == '_' {
                label.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if label.is_empty() {
            return Err(format!("heredoc without label on line {start}"));
        }
        if let Some(q) = quote
            && self.bump() != Some(q)
        {
            return Err(format!("malformed heredoc label on line {start}"));
        }

        loop {
            // Move to the start of the next line.
            loop {
                match self.bump() {
                    Some('\n') => break,
                    Some(_) => {}
                    None => return Err(format!("unterminated heredoc starting on line {start}")),
                }
            }
            while matches!(self.peek(0), Some(' ' | '\t')) {
                self.bump();
            }
            if self.starts_with(&label)
                && !self
                    .peek(label.chars().count())
                    .is_some_and(|c| c.is_alphanumeric() || c == '_')
            {
                self.advance(label.chars().count());
                return Ok(());
            }
        }
    }

    fn open(&mut self, c: char) {
        self.stack.push((c, self.line));
        self.bump();
    }

    fn close(&mut self, c: char) -> Result<(), String> {
        let expected = match c {
            ')' => '(',
            ']' => '[',
            _ => '{',
        };
        match self.stack.pop() {
            Some((open, _)) if open == expected => {
                self.bump();
                Ok(())
            }
            Some((open, line)) => Err(format!(
                "'{c}' on line {} does not close '{open}' from line {line}",
                self.line
            )),
            None => Err(format!("unmatched '{c}' on line {}", self.line)),
        }
    }
}

fn check_php(text: &str) -> Result<(), String> {
    let mut lx = Lexer::new(text);
    let mut mode = Mode::Html;
    let mut saw_tag = false;

    while let Some(c) = lx.peek(0) {
        match mode {
            Mode::Html => {
                if lx.open_tag() {
                    saw_tag = true;
                    mode = Mode::Code;
                } else {
                    lx.bump();
                }
            }
            Mode::Code => match c {
                '?' if lx.starts_with("?>") => {
                    lx.advance(2);
                    mode = Mode::Html;
                }
                '\'' | '"' | '`' => lx.quoted(c)?,
                '/' if lx.starts_with("//") => lx.line_comment(),
                '/' if lx.starts_with("/*") => lx.block_comment()?,
                '#' if lx.peek(1) == Some('[') => {
                    lx.bump();
                    lx.open('[');
                }
                '#' => lx.line_comment(),
                '<' if lx.starts_with("<<<") => lx.heredoc()?,
                '(' | '[' | '{' => lx.open(c),
                ')' | ']' | '}' => lx.close(c)?,
                _ => {
                    lx.bump();
                }
            },
        }
    }

    if !saw_tag {
        return Err("no PHP open tag found".to_string());
    }
    if let Some((open, line)) = lx.stack.pop() {
        return Err(format!("unclosed '{open}' from line {line}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(src: &str) {
        assert_eq!(check_php(src), Ok(()), "rejected: {src}");
    }

    fn bad(src: &str) {
        assert!(check_php(src).is_err(), "accepted: {src}");
    }

    #[test]
    fn accepts_plain_script() {
        ok("<?php\nfunction f($a) { return [$a, ($a + 1)]; }\necho f(1);\n");
    }

    #[test]
    fn accepts_blocks_spanning_html() {
        ok("<html><?php if ($x) { ?><b>yes</b><?php } ?></html>");
    }

    #[test]
    fn ignores_brackets_in_strings_and_comments() {
        ok("<?php echo '}'; echo \"(\\\"\"; // )\n# ]\n/* { */ echo `ls {`;");
    }

    #[test]
    fn accepts_heredoc_and_nowdoc() {
        ok("<?php\n$a = <<<EOT\n{ unbalanced ( text\nEOT;\n$b = <<<'RAW'\n]\n  RAW;\n");
    }

    #[test]
    fn accepts_attributes() {
        ok("<?php\n#[Route('/x')]\nfunction x() {}\n");
    }

    #[test]
    fn accepts_short_echo_tag() {
        ok("<p><?= $name ?></p>");
    }

    #[test]
    fn rejects_missing_tag() {
        bad("echo 1;");
    }

    #[test]
    fn rejects_unbalanced() {
        bad("<?php function f() { return 1;");
        bad("<?php echo (1]);");
        bad("<?php }");
    }

    #[test]
    fn rejects_unterminated_constructs() {
        bad("<?php echo 'abc;");
        bad("<?php /* never closed");
        bad("<?php $a = <<<EOT\nno end\n");
    }

    #[test]
    fn non_scripts_are_opaque() {
        assert!(ScriptSyntax.check("logo.png", &[0xff, 0xd8, 0x00]).is_ok());
        assert!(ScriptSyntax.check("notes.txt", b"{").is_ok());
        assert!(ScriptSyntax.check("x.PHP", b"{").is_err());
        assert!(ScriptSyntax.check("x.php", &[0xff, 0xfe]).is_err());
    }
}
