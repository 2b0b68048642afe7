//! CSS selector subset used to locate transcript content
//!
//! Supported syntax: type selectors, `*`, `.class`, `#id`, `[attr]` and
//! `[attr=value]` compounds, joined by descendant (whitespace) or child (`>`)
//! combinators, with comma-separated groups.

use inkwatch_core::{InkwatchError, Result};

/// How a compound relates to the compound before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AttrCondition {
    pub(crate) name: String,
    pub(crate) value: Option<String>,
}

/// A compound selector such as `div.message[data-raw]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Step {
    pub(crate) tag: Option<String>,
    pub(crate) universal: bool,
    pub(crate) id: Option<String>,
    pub(crate) classes: Vec<String>,
    pub(crate) attrs: Vec<AttrCondition>,
}

impl Step {
    fn is_empty(&self) -> bool {
        self.tag.is_none()
            && !self.universal
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
    }
}

/// A compound plus the combinator linking it to the previous compound
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Part {
    pub(crate) step: Step,
    pub(crate) combinator: Option<Combinator>,
}

/// A parsed selector list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    groups: Vec<Vec<Part>>,
}

impl Selector {
    /// Parse a selector string
    ///
    /// # Example
    ///
    /// ```
    /// use inkwatch_dom::Selector;
    ///
    /// let selector = Selector::parse(".message[data-raw]").unwrap();
    /// assert_eq!(selector.as_str(), ".message[data-raw]");
    /// assert!(Selector::parse("div:hover").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser {
            chars: input.chars().collect(),
            pos: 0,
            source: input,
        };
        let groups = parser.parse_groups()?;
        Ok(Self {
            source: input.trim().to_string(),
            groups,
        })
    }

    /// Original selector text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub(crate) fn groups(&self) -> &[Vec<Part>] {
        &self.groups
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for Selector {
    type Err = InkwatchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn unsupported(&self, reason: &str) -> InkwatchError {
        InkwatchError::UnsupportedSelector(format!("{} ({})", self.source, reason))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn parse_groups(&mut self) -> Result<Vec<Vec<Part>>> {
        let mut groups = Vec::new();
        loop {
            groups.push(self.parse_group()?);
            match self.peek() {
                Some(',') => self.pos += 1,
                None => break,
                Some(c) => return Err(self.unsupported(&format!("unexpected '{}'", c))),
            }
        }
        Ok(groups)
    }

    fn parse_group(&mut self) -> Result<Vec<Part>> {
        let mut parts: Vec<Part> = Vec::new();
        let mut pending: Option<Combinator> = None;

        loop {
            let saw_space = self.skip_whitespace();
            match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    if parts.is_empty() || pending.is_some() {
                        return Err(self.unsupported("misplaced '>'"));
                    }
                    pending = Some(Combinator::Child);
                    self.pos += 1;
                }
                Some(_) => {
                    if !parts.is_empty() && pending.is_none() && !saw_space {
                        return Err(self.unsupported("unexpected character"));
                    }
                    let step = self.parse_step()?;
                    let combinator = if parts.is_empty() {
                        None
                    } else {
                        Some(pending.take().unwrap_or(Combinator::Descendant))
                    };
                    parts.push(Part { step, combinator });
                }
            }
        }

        if parts.is_empty() {
            return Err(self.unsupported("empty selector"));
        }
        if pending.is_some() {
            return Err(self.unsupported("dangling combinator"));
        }
        Ok(parts)
    }

    fn parse_step(&mut self) -> Result<Step> {
        let mut step = Step::default();

        while let Some(c) = self.peek() {
            match c {
                '*' if step.is_empty() => {
                    step.universal = true;
                    self.pos += 1;
                }
                '.' => {
                    self.pos += 1;
                    step.classes.push(self.parse_ident()?);
                }
                '#' => {
                    self.pos += 1;
                    step.id = Some(self.parse_ident()?);
                }
                '[' => {
                    self.pos += 1;
                    step.attrs.push(self.parse_attr()?);
                }
                c if is_ident_char(c) && step.is_empty() => {
                    step.tag = Some(self.parse_ident()?.to_ascii_lowercase());
                }
                c if c.is_whitespace() || c == '>' || c == ',' => break,
                other => return Err(self.unsupported(&format!("unexpected '{}'", other))),
            }
        }

        if step.is_empty() {
            return Err(self.unsupported("expected a compound selector"));
        }
        Ok(step)
    }

    fn parse_ident(&mut self) -> Result<String> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.unsupported("expected an identifier"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_attr(&mut self) -> Result<AttrCondition> {
        self.skip_whitespace();
        let name = self.parse_ident()?;
        self.skip_whitespace();

        let value = match self.peek() {
            Some(']') => None,
            Some('=') => {
                self.pos += 1;
                self.skip_whitespace();
                let value = self.parse_attr_value()?;
                self.skip_whitespace();
                Some(value)
            }
            _ => return Err(self.unsupported("unsupported attribute condition")),
        };

        if self.peek() != Some(']') {
            return Err(self.unsupported("unterminated attribute selector"));
        }
        self.pos += 1;
        Ok(AttrCondition { name, value })
    }

    fn parse_attr_value(&mut self) -> Result<String> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != quote) {
                    self.pos += 1;
                }
                if self.peek().is_none() {
                    return Err(self.unsupported("unterminated string"));
                }
                let value = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                Ok(value)
            }
            _ => self.parse_ident(),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}
