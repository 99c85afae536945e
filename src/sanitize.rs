//! Allow-list HTML sanitization over a detached node tree.
//!
//! Generated stories are untrusted markup. They are parsed into a [`Fragment`],
//! rewritten so that only [`ALLOWED_TAGS`] survive with safe attributes, and
//! serialized back to a string. Nothing here touches a live document.

use std::fmt;

/// Elements that survive sanitization with their tag identity intact.
pub const ALLOWED_TAGS: &[&str] = &["div", "h2", "h3", "h4", "p", "ul", "li", "strong", "em", "br"];

/// Disallowed elements are replaced by this attribute-less wrapper.
pub const NEUTRAL_TAG: &str = "span";

const REMOVED_TAGS: &[&str] = &["script"];
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];
const RAW_TEXT_TAGS: &[&str] = &[
    "script", "style", "iframe", "xmp", "noembed", "noframes", "title", "textarea",
];
const ESCAPABLE_RAW_TEXT_TAGS: &[&str] = &["title", "textarea"];
const BLOCK_TAGS: &[&str] = &["div", "h2", "h3", "h4", "p", "ul", "li"];
const EXECUTABLE_SCHEMES: &[&str] = &["javascript:", "vbscript:"];

/// Deepest element nesting the parser builds. Past it, new elements become
/// siblings of the deepest open element, so every tree walk stays bounded.
pub const MAX_DEPTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// A parsed HTML fragment: a forest of nodes with no document wrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub nodes: Vec<Node>,
}

/// Parses, sanitizes and re-serializes `html` in one step.
pub fn sanitize_html(html: &str) -> String {
    Fragment::parse(html).sanitized().to_html()
}

impl Fragment {
    pub fn parse(html: &str) -> Self {
        Self {
            nodes: Parser::new(html).run(),
        }
    }

    /// Applies the allow-list bottom-up, so violations nested inside replaced
    /// wrappers are handled as well.
    pub fn sanitized(self) -> Self {
        Self {
            nodes: sanitize_nodes(self.nodes),
        }
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        write_nodes(&mut out, &self.nodes);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Rendered text with block boundaries as line breaks. Used wherever the
    /// story leaves the page (clipboard, files) so no markup travels with it.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        write_text(&mut out, &self.nodes, TextStyle::Plain);
        tidy_lines(&out)
    }

    /// Markdown rendition for terminal display.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        write_text(&mut out, &self.nodes, TextStyle::Markdown);
        tidy_lines(&out)
    }

    /// Every element in document order, at any depth.
    pub fn elements(&self) -> Vec<&Element> {
        let mut found = Vec::new();
        collect_elements(&self.nodes, &mut found);
        found
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_html())
    }
}

fn collect_elements<'a>(nodes: &'a [Node], found: &mut Vec<&'a Element>) {
    for node in nodes {
        if let Node::Element(element) = node {
            found.push(element);
            collect_elements(&element.children, found);
        }
    }
}

fn sanitize_nodes(nodes: Vec<Node>) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Text(text) => push_text(&mut out, text),
            Node::Element(element) if REMOVED_TAGS.contains(&element.name.as_str()) => {}
            Node::Element(mut element) => {
                let children = sanitize_nodes(std::mem::take(&mut element.children));
                if ALLOWED_TAGS.contains(&element.name.as_str()) {
                    element.attrs.retain(is_safe_attribute);
                    element.children = children;
                    out.push(Node::Element(element));
                } else {
                    out.push(Node::Element(Element {
                        name: NEUTRAL_TAG.to_string(),
                        attrs: Vec::new(),
                        children,
                    }));
                }
            }
        }
    }
    out
}

fn is_safe_attribute(attr: &Attribute) -> bool {
    if attr.name.starts_with("on") {
        return false;
    }
    if !attr
        .name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return false;
    }
    let normalized: String = attr
        .value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    !(EXECUTABLE_SCHEMES
        .iter()
        .any(|scheme| normalized.contains(scheme))
        || normalized.starts_with("data:"))
}

// Adjacent text nodes are merged so the tree matches what a re-parse of the
// serialized output would produce.
fn push_text(nodes: &mut Vec<Node>, text: String) {
    if text.is_empty() {
        return;
    }
    if let Some(Node::Text(previous)) = nodes.last_mut() {
        previous.push_str(&text);
    } else {
        nodes.push(Node::Text(text));
    }
}

fn write_nodes(out: &mut String, nodes: &[Node]) {
    for node in nodes {
        match node {
            Node::Text(text) => escape_into(out, text, false),
            Node::Element(element) => {
                out.push('<');
                out.push_str(&element.name);
                for attr in &element.attrs {
                    out.push(' ');
                    out.push_str(&attr.name);
                    out.push_str("=\"");
                    escape_into(out, &attr.value, true);
                    out.push('"');
                }
                out.push('>');
                if VOID_TAGS.contains(&element.name.as_str()) {
                    continue;
                }
                write_nodes(out, &element.children);
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
        }
    }
}

fn escape_into(out: &mut String, text: &str, attribute: bool) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '"' if attribute => out.push_str("&quot;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TextStyle {
    Plain,
    Markdown,
}

fn write_text(out: &mut String, nodes: &[Node], style: TextStyle) {
    for node in nodes {
        match node {
            Node::Text(text) => push_collapsed(out, text),
            Node::Element(element) => {
                let name = element.name.as_str();
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                let block = BLOCK_TAGS.contains(&name);
                let paragraph = matches!(name, "p" | "h2" | "h3" | "h4");
                if block {
                    ensure_break(out, paragraph);
                }
                let marker = match (style, name) {
                    (TextStyle::Markdown, "h2") => "## ",
                    (TextStyle::Markdown, "h3") => "### ",
                    (TextStyle::Markdown, "h4") => "#### ",
                    (TextStyle::Markdown, "li") => "- ",
                    (TextStyle::Plain, "li") => "• ",
                    (TextStyle::Markdown, "strong") => "**",
                    (TextStyle::Markdown, "em") => "*",
                    _ => "",
                };
                out.push_str(marker);
                write_text(out, &element.children, style);
                if matches!(name, "strong" | "em") {
                    out.push_str(marker);
                }
                if block {
                    ensure_break(out, paragraph);
                }
            }
        }
    }
}

fn ensure_break(out: &mut String, blank_line: bool) {
    if out.is_empty() {
        return;
    }
    if !out.ends_with('\n') {
        out.push('\n');
    }
    if blank_line && !out.ends_with("\n\n") {
        out.push('\n');
    }
}

fn push_collapsed(out: &mut String, text: &str) {
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_whitespace() && c != '\u{a0}' {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() && !out.ends_with([' ', '\n']) {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }
    if pending_space && !out.is_empty() && !out.ends_with([' ', '\n']) {
        out.push(' ');
    }
}

// Trims every line and keeps at most one blank line between paragraphs.
fn tidy_lines(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0usize;
    for line in raw.lines().map(str::trim) {
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if blank_run > 0 {
                out.push('\n');
            }
        }
        blank_run = 0;
        out.push_str(line);
    }
    out
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    text_start: usize,
    root: Vec<Node>,
    open: Vec<Element>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            text_start: 0,
            root: Vec::new(),
            open: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Node> {
        let input = self.input;
        let bytes = input.as_bytes();
        while self.pos < bytes.len() {
            if bytes[self.pos] != b'<' {
                self.pos += 1;
                continue;
            }
            let next = bytes.get(self.pos + 1).copied();
            match next {
                Some(b'!') => {
                    self.flush_text();
                    let end = if self.input[self.pos..].starts_with("<!--") {
                        self.find_from(self.pos + 4, "-->").map(|idx| idx + 3)
                    } else {
                        self.find_from(self.pos + 2, ">").map(|idx| idx + 1)
                    };
                    self.skip_to(end);
                }
                Some(b'?') => {
                    self.flush_text();
                    let end = self.find_from(self.pos + 2, ">").map(|idx| idx + 1);
                    self.skip_to(end);
                }
                Some(b'/') => {
                    self.flush_text();
                    let name_start = self.pos + 2;
                    let end = self.find_from(name_start, ">").map(|idx| idx + 1);
                    if bytes.get(name_start).is_some_and(u8::is_ascii_alphabetic) {
                        let name_end = self.input[name_start..]
                            .find(|c: char| c.is_ascii_whitespace() || c == '/' || c == '>')
                            .map_or(self.input.len(), |idx| name_start + idx);
                        if end.is_some() {
                            let name = self.input[name_start..name_end].to_ascii_lowercase();
                            self.close(&name);
                        }
                    }
                    self.skip_to(end);
                }
                Some(c) if c.is_ascii_alphabetic() => {
                    self.flush_text();
                    match parse_start_tag(self.input, self.pos + 1) {
                        Some(tag) => {
                            self.pos = tag.end;
                            self.text_start = tag.end;
                            self.open_element(tag.element, tag.self_closing);
                        }
                        None => self.skip_to(None),
                    }
                }
                _ => self.pos += 1,
            }
        }
        self.flush_text();
        while !self.open.is_empty() {
            self.pop_open();
        }
        self.root
    }

    fn find_from(&self, from: usize, needle: &str) -> Option<usize> {
        self.input
            .get(from..)
            .and_then(|rest| rest.find(needle))
            .map(|idx| from + idx)
    }

    fn skip_to(&mut self, end: Option<usize>) {
        let end = end.unwrap_or(self.input.len());
        self.pos = end;
        self.text_start = end;
    }

    fn flush_text(&mut self) {
        if self.text_start < self.pos {
            let text = decode_entities(&self.input[self.text_start..self.pos]);
            push_text(self.children(), text);
        }
        self.text_start = self.pos;
    }

    fn children(&mut self) -> &mut Vec<Node> {
        match self.open.last_mut() {
            Some(element) => &mut element.children,
            None => &mut self.root,
        }
    }

    fn open_element(&mut self, mut element: Element, self_closing: bool) {
        if self.open.len() >= MAX_DEPTH {
            self.pop_open();
        }
        let name = element.name.clone();
        if RAW_TEXT_TAGS.contains(&name.as_str()) {
            let (content, resume) = self.raw_text(&name);
            let text = if ESCAPABLE_RAW_TEXT_TAGS.contains(&name.as_str()) {
                decode_entities(content)
            } else {
                content.to_string()
            };
            push_text(&mut element.children, text);
            self.children().push(Node::Element(element));
            self.pos = resume;
            self.text_start = resume;
        } else if self_closing || VOID_TAGS.contains(&name.as_str()) {
            self.children().push(Node::Element(element));
        } else {
            self.open.push(element);
        }
    }

    // Content of a raw-text element runs to its matching end tag, or to the
    // end of input when there is none.
    fn raw_text(&self, name: &str) -> (&'a str, usize) {
        let input = self.input;
        let rest = &input[self.pos..];
        let lowered = rest.to_ascii_lowercase();
        let needle = format!("</{name}");
        let mut search_from = 0;
        while let Some(idx) = lowered[search_from..].find(&needle) {
            let start = search_from + idx;
            let after = start + needle.len();
            let boundary = lowered[after..].chars().next();
            if matches!(boundary, None | Some('>') | Some('/'))
                || boundary.is_some_and(|c| c.is_ascii_whitespace())
            {
                let close = lowered[after..]
                    .find('>')
                    .map_or(rest.len(), |gt| after + gt + 1);
                return (&rest[..start], self.pos + close);
            }
            search_from = after;
        }
        (rest, input.len())
    }

    fn close(&mut self, name: &str) {
        if let Some(depth) = self.open.iter().rposition(|element| element.name == name) {
            while self.open.len() > depth {
                self.pop_open();
            }
        }
    }

    fn pop_open(&mut self) {
        if let Some(element) = self.open.pop() {
            self.children().push(Node::Element(element));
        }
    }
}

struct StartTag {
    element: Element,
    self_closing: bool,
    end: usize,
}

// `start` points just past the `<`. Returns `None` when input ends inside the tag.
fn parse_start_tag(input: &str, start: usize) -> Option<StartTag> {
    let bytes = input.as_bytes();
    let mut i = start;
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'/' && bytes[i] != b'>'
    {
        i += 1;
    }
    let name = input[start..i].to_ascii_lowercase();
    let mut attrs: Vec<Attribute> = Vec::new();
    let mut self_closing = false;

    loop {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            self_closing = bytes[i] == b'/';
            i += 1;
        }
        match bytes.get(i) {
            None => return None,
            Some(b'>') => {
                i += 1;
                break;
            }
            Some(_) => self_closing = false,
        }

        let name_start = i;
        i += 1;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'/' | b'>' | b'=')
        {
            i += 1;
        }
        let attr_name = input[name_start..i].to_ascii_lowercase();

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut value = String::new();
        if bytes.get(i) == Some(&b'=') {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            match bytes.get(i) {
                Some(&quote) if quote == b'"' || quote == b'\'' => {
                    let close = input[i + 1..].find(quote as char)? + i + 1;
                    value = decode_entities(&input[i + 1..close]);
                    i = close + 1;
                }
                _ => {
                    let value_start = i;
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                        i += 1;
                    }
                    value = decode_entities(&input[value_start..i]);
                }
            }
        }
        if !attrs.iter().any(|attr| attr.name == attr_name) {
            attrs.push(Attribute {
                name: attr_name,
                value,
            });
        }
    }

    Some(StartTag {
        element: Element {
            name,
            attrs,
            children: Vec::new(),
        },
        self_closing,
        end: i,
    })
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest[1..]
            .char_indices()
            .take(11)
            .find(|&(_, c)| c == ';')
            .and_then(|(semi, _)| decode_reference(&rest[1..1 + semi]).map(|c| (c, semi + 2)));
        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_reference(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let numeric = name.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse::<u32>().ok()?,
            };
            Some(match char::from_u32(code) {
                Some(c) if code != 0 => c,
                _ => char::REPLACEMENT_CHARACTER,
            })
        }
    }
}
