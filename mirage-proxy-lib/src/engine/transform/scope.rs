//! Scoping transform for sub-resource scripts.
//!
//! Free references to `location` (and `window.location`, `self.location`,
//! `globalThis.location`, `document.location`) are redirected to the
//! proxy-aware shim `$mirage.location`, so a script sees the real origin
//! while executing on the controlling one.
//!
//! This is a single pass over a light tokenizer, not a parser: strings,
//! comments, regex literals and template text are copied verbatim. Names in
//! binding or member position are left alone: property accesses
//! (`a.location`), object keys and shorthands, class members, method names,
//! `var`/`let`/`const` binding lists, function and arrow parameters and
//! `catch` bindings. A default value inside a parameter or destructuring
//! pattern is not scoped.

/// Global namespace shared by the injected helpers
pub const NAMESPACE: &str = "$mirage";

const SCOPED_GLOBAL: &str = "location";
const SCOPED_REPLACEMENT: &str = "$mirage.location";

/// Objects whose `.location` is the page location
const GLOBAL_OBJECTS: [&str; 4] = ["window", "self", "globalThis", "document"];

const DECLARATION_KEYWORDS: [&str; 5] = ["var", "let", "const", "function", "class"];

/// Keywords opening a binding list
const BINDING_KEYWORDS: [&str; 3] = ["var", "let", "const"];

/// Words that can only be followed by a member name
const MEMBER_MODIFIERS: [&str; 4] = ["get", "set", "static", "async"];

/// Keywords whose parenthesized head is followed by a block, not a body
const CONTROL_KEYWORDS: [&str; 5] = ["if", "while", "for", "switch", "with"];

/// Keywords after which `/` starts a regular expression
const REGEX_KEYWORDS: [&str; 14] = [
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

/// Rewrite a script so that browsing-context globals go through the shim
pub fn scope(source: &str) -> String {
    Scoper::new(source).run()
}

/// Last significant token seen in code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev<'a> {
    Start,
    Punct(u8),
    Word(&'a str),
    Literal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame<'a> {
    Brace,
    ClassBody,
    TemplateExpr,
    Bracket,
    /// Opening position and the token before it
    Paren(usize, Prev<'a>),
}

/// An open `var`/`let`/`const` statement
#[derive(Debug, Clone, Copy)]
struct Declaration {
    depth: usize,
    /// Inside a binding target rather than an initializer
    binding: bool,
}

struct Scoper<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    out: String,
    stack: Vec<Frame<'a>>,
    declarations: Vec<Declaration>,
    prev: Prev<'a>,
    prev_end: usize,
    class_pending: bool,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_ident_char(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

impl<'a> Scoper<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            out: String::with_capacity(src.len().saturating_add(src.len() / 16)),
            stack: Vec::new(),
            declarations: Vec::new(),
            prev: Prev::Start,
            prev_end: 0,
            class_pending: false,
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos.saturating_add(offset)).copied()
    }

    fn copy_to(&mut self, end: usize) {
        let end = end.min(self.bytes.len());
        self.out.push_str(&self.src[self.pos..end]);
        self.pos = end;
    }

    fn mark(&mut self, prev: Prev<'a>) {
        self.prev = prev;
        self.prev_end = self.pos;
    }

    fn run(mut self) -> String {
        if self.src.starts_with("#!") {
            let end = self.src.find('\n').unwrap_or(self.src.len());
            self.copy_to(end);
        }

        while let Some(b) = self.peek(0) {
            match b {
                b'\n' => {
                    self.end_declaration_at_newline();
                    self.copy_to(self.pos + 1);
                }
                b' ' | b'\t' | b'\r' => self.copy_to(self.pos + 1),
                b'/' if self.peek(1) == Some(b'/') => self.line_comment(),
                b'/' if self.peek(1) == Some(b'*') => self.block_comment(),
                b'/' if self.regex_allowed() => self.regex_or_punct(),
                b'\'' | b'"' => self.string(),
                b'`' => {
                    self.copy_to(self.pos + 1);
                    self.template();
                }
                b'{' => {
                    let frame = if std::mem::take(&mut self.class_pending) {
                        Frame::ClassBody
                    } else {
                        Frame::Brace
                    };
                    self.stack.push(frame);
                    self.punct(b);
                }
                b'}' => match self.stack.last().copied() {
                    Some(Frame::TemplateExpr) => {
                        self.stack.pop();
                        self.close_declarations();
                        self.copy_to(self.pos + 1);
                        self.template();
                    }
                    Some(Frame::Brace | Frame::ClassBody) => {
                        self.stack.pop();
                        self.close_declarations();
                        self.punct(b);
                    }
                    _ => self.punct(b),
                },
                b'(' => {
                    self.stack.push(Frame::Paren(self.pos, self.prev));
                    self.punct(b);
                }
                b'[' => {
                    self.stack.push(Frame::Bracket);
                    self.punct(b);
                }
                b')' | b']' => {
                    let closes = match self.stack.last().copied() {
                        Some(Frame::Paren(..)) => b == b')',
                        Some(Frame::Bracket) => b == b']',
                        _ => false,
                    };
                    if closes {
                        self.stack.pop();
                        self.close_declarations();
                    }
                    self.punct(b);
                }
                b'=' | b',' | b';' => {
                    self.declaration_punct(b);
                    self.punct(b);
                }
                b'#' if self.peek(1).is_some_and(is_ident_start) => {
                    // Private name: never a global reference
                    let end = self.ident_end(self.pos + 1);
                    self.copy_to(end);
                    self.mark(Prev::Literal);
                }
                b if b.is_ascii_digit() => self.number(),
                b if is_ident_start(b) => self.identifier(),
                _ => self.punct(b),
            }
        }

        self.out
    }

    fn punct(&mut self, b: u8) {
        self.copy_to(self.pos + 1);
        self.mark(Prev::Punct(b));
    }

    fn line_comment(&mut self) {
        let end = self.src[self.pos..].find('\n').map_or(self.bytes.len(), |i| self.pos + i);
        self.copy_to(end);
    }

    fn block_comment(&mut self) {
        let end = self.src[self.pos + 2..]
            .find("*/")
            .map_or(self.bytes.len(), |i| self.pos + 2 + i + 2);
        self.copy_to(end);
    }

    fn string(&mut self) {
        let end = quoted_end(self.bytes, self.pos);
        self.copy_to(end);
        self.mark(Prev::Literal);
    }

    /// Copy template text up to the closing backtick or the next `${`
    fn template(&mut self) {
        let mut i = self.pos;
        while let Some(&b) = self.bytes.get(i) {
            match b {
                b'\\' => i += 2,
                b'`' => {
                    self.copy_to(i + 1);
                    self.mark(Prev::Literal);
                    return;
                }
                b'$' if self.bytes.get(i + 1) == Some(&b'{') => {
                    self.copy_to(i + 2);
                    self.stack.push(Frame::TemplateExpr);
                    self.mark(Prev::Punct(b'{'));
                    return;
                }
                _ => i += 1,
            }
        }
        self.copy_to(i);
    }

    fn regex_allowed(&self) -> bool {
        match self.prev {
            Prev::Start => true,
            Prev::Punct(b) => !matches!(b, b')' | b']'),
            Prev::Word(w) => REGEX_KEYWORDS.contains(&w),
            Prev::Literal => false,
        }
    }

    fn regex_or_punct(&mut self) {
        let mut i = self.pos + 1;
        let mut in_class = false;
        loop {
            match self.bytes.get(i) {
                None | Some(b'\n') => {
                    // Not a terminated regex literal on this line
                    self.punct(b'/');
                    return;
                }
                Some(b'\\') => i += 2,
                Some(b'[') => {
                    in_class = true;
                    i += 1;
                }
                Some(b']') => {
                    in_class = false;
                    i += 1;
                }
                Some(b'/') if !in_class => {
                    i += 1;
                    break;
                }
                Some(_) => i += 1,
            }
        }
        let end = self.ident_end(i);
        self.copy_to(end);
        self.mark(Prev::Literal);
    }

    fn number(&mut self) {
        let mut i = self.pos;
        while self.bytes.get(i).is_some_and(|&b| is_ident_char(b) || b == b'.') {
            i += 1;
        }
        self.copy_to(i);
        self.mark(Prev::Literal);
    }

    fn ident_end(&self, from: usize) -> usize {
        let mut i = from;
        while self.bytes.get(i).is_some_and(|&b| is_ident_char(b)) {
            i += 1;
        }
        i
    }

    fn next_significant(&self, from: usize) -> Option<u8> {
        self.bytes[from.min(self.bytes.len())..]
            .iter()
            .copied()
            .find(|b| !b.is_ascii_whitespace())
    }

    /// Whether the next non-whitespace text at `from` is `token`
    fn next_is(&self, from: usize, token: &[u8]) -> bool {
        let rest = &self.bytes[from.min(self.bytes.len())..];
        let start = rest.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(rest.len());
        rest[start..].starts_with(token)
    }

    /// `.location` directly after `end`, ending on an identifier boundary
    fn followed_by_location(&self, end: usize) -> bool {
        let suffix = b".location";
        self.bytes.get(end..end + suffix.len()) == Some(suffix.as_slice())
            && !self.bytes.get(end + suffix.len()).is_some_and(|&b| is_ident_char(b))
    }

    fn identifier(&mut self) {
        let start = self.pos;
        let end = self.ident_end(start);
        let src = self.src;
        let word = &src[start..end];
        let is_property = self.prev == Prev::Punct(b'.');

        if !is_property && GLOBAL_OBJECTS.contains(&word) && self.followed_by_location(end) {
            self.out.push_str(SCOPED_REPLACEMENT);
            self.pos = end + ".location".len();
            self.mark(Prev::Literal);
            return;
        }

        if word == SCOPED_GLOBAL && !is_property && self.is_free_reference(start, end) {
            self.out.push_str(SCOPED_REPLACEMENT);
            self.pos = end;
            self.mark(Prev::Literal);
            return;
        }

        if !is_property {
            self.keyword(word);
        }
        self.copy_to(end);
        self.mark(Prev::Word(word));
    }

    fn keyword(&mut self, word: &str) {
        if BINDING_KEYWORDS.contains(&word) {
            self.declarations.push(Declaration { depth: self.stack.len(), binding: true });
            return;
        }
        if word == "class" {
            self.class_pending = true;
        }
        if matches!(word, "of" | "in") {
            if let Some(decl) = self.declarations.last_mut() {
                if decl.depth == self.stack.len() {
                    decl.binding = false;
                }
            }
        }
    }

    fn declaration_punct(&mut self, b: u8) {
        let depth = self.stack.len();
        let Some(decl) = self.declarations.last_mut() else {
            return;
        };
        if decl.depth != depth {
            return;
        }
        match b {
            b'=' => decl.binding = false,
            b',' => decl.binding = true,
            _ => {
                self.declarations.pop();
            }
        }
    }

    fn close_declarations(&mut self) {
        let depth = self.stack.len();
        while self.declarations.last().is_some_and(|d| d.depth > depth) {
            self.declarations.pop();
        }
    }

    /// A line break after a complete declarator ends the statement
    fn end_declaration_at_newline(&mut self) {
        let Some(decl) = self.declarations.last() else {
            return;
        };
        let continues = match self.prev {
            Prev::Punct(b) => matches!(b, b',' | b'='),
            Prev::Word(w) => BINDING_KEYWORDS.contains(&w),
            _ => false,
        };
        if decl.depth == self.stack.len() && !continues {
            self.declarations.pop();
        }
    }

    fn in_binding(&self) -> bool {
        self.declarations.last().is_some_and(|d| d.binding)
    }

    fn is_free_reference(&self, start: usize, end: usize) -> bool {
        if let Prev::Word(w) = self.prev {
            if DECLARATION_KEYWORDS.contains(&w) || MEMBER_MODIFIERS.contains(&w) {
                return false;
            }
        }
        if self.in_binding() || self.in_parameter_position() || self.is_class_member(start) {
            return false;
        }
        // Single arrow parameter
        if self.next_is(end, b"=>") {
            return false;
        }

        let after_list_start = matches!(self.prev, Prev::Punct(b'{') | Prev::Punct(b','));
        let in_object = self.stack.last() == Some(&Frame::Brace);
        match self.next_significant(end) {
            // Object key
            Some(b':') if after_list_start => false,
            // Shorthand property
            Some(b'}') | Some(b',') if after_list_start && in_object => false,
            // Method definition
            Some(b'(') if self.starts_member(end) => false,
            _ => true,
        }
    }

    /// Name directly in a class body outside any initializer
    fn is_class_member(&self, start: usize) -> bool {
        if self.stack.last() != Some(&Frame::ClassBody) {
            return false;
        }
        let newline_before = self.src[self.prev_end.min(start)..start].contains('\n');
        newline_before || matches!(self.prev, Prev::Punct(b'{' | b';' | b'}' | b'*'))
    }

    /// `name(...) {` at the start of an object or class member
    fn starts_member(&self, end: usize) -> bool {
        if !matches!(self.prev, Prev::Punct(b'{' | b',' | b';' | b'}' | b'*')) {
            return false;
        }
        let Some(open) = self.bytes[end..].iter().position(|&b| b == b'(') else {
            return false;
        };
        matching_paren(self.bytes, end + open).is_some_and(|close| self.next_is(close, b"{"))
    }

    /// Binding slot of a function, arrow or `catch` parameter list
    fn in_parameter_position(&self) -> bool {
        let Some(&Frame::Paren(open, before)) = self.stack.last() else {
            return false;
        };
        if !matches!(self.prev, Prev::Punct(b'(' | b',')) {
            return false;
        }
        let Some(close) = matching_paren(self.bytes, open) else {
            return false;
        };
        if self.next_is(close, b"=>") {
            return true;
        }
        self.next_is(close, b"{")
            && match before {
                Prev::Word(w) => !CONTROL_KEYWORDS.contains(&w),
                Prev::Punct(b) => b == b']',
                _ => false,
            }
    }
}

/// End of the quoted literal starting at `start`
fn quoted_end(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while let Some(&b) = bytes.get(i) {
        match b {
            b'\\' => i += 2,
            b'\n' if quote != b'`' => return i,
            _ if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Position just after the `)` matching the `(` at `open`
fn matching_paren(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while let Some(&b) = bytes.get(i) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            b'\'' | b'"' | b'`' => {
                i = quoted_end(bytes, i);
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    None
}
