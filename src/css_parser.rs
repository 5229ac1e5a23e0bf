use std::collections::HashMap;

use thiserror::Error;

use crate::selector::{DescendantSelector, Selector, TagSelector};

/// A parsed rule: selector plus lowercased property -> raw value pairs.
pub type Rule = (Selector, HashMap<String, String>);

#[derive(Debug, Error)]
#[error("css syntax error at {0}")]
pub struct CssSyntaxError(usize);

/// Error-tolerant parser for the supported CSS subset.
///
/// On any syntax error the parser skips ahead to the next `;` or `}` and
/// carries on, so one broken declaration never takes down a sheet.
pub struct CssParser {
    s: Vec<char>,
    i: usize,
}

impl CssParser {
    pub fn new(style: &str) -> Self {
        Self { s: style.chars().collect(), i: 0 }
    }

    fn whitespace(&mut self) {
        while self.i < self.s.len() && self.s[self.i].is_whitespace() {
            self.i += 1;
        }
    }

    fn word(&mut self) -> Result<String, CssSyntaxError> {
        let start = self.i;
        while self.i < self.s.len() {
            let c = self.s[self.i];
            if c.is_alphanumeric() || "#-.%".contains(c) {
                self.i += 1;
            } else {
                break;
            }
        }
        if self.i == start {
            return Err(CssSyntaxError(self.i));
        }
        Ok(self.s[start..self.i].iter().collect())
    }

    fn literal(&mut self, expected: char) -> Result<(), CssSyntaxError> {
        if self.i < self.s.len() && self.s[self.i] == expected {
            self.i += 1;
            Ok(())
        } else {
            Err(CssSyntaxError(self.i))
        }
    }

    fn pair(&mut self) -> Result<(String, String), CssSyntaxError> {
        let prop = self.word()?;
        self.whitespace();
        self.literal(':')?;
        self.whitespace();
        let value = self.word()?;
        Ok((prop.to_ascii_lowercase(), value))
    }

    /// Skips to one of `chars` and returns which one stopped the scan.
    fn ignore_until(&mut self, chars: &[char]) -> Option<char> {
        while self.i < self.s.len() {
            if chars.contains(&self.s[self.i]) {
                return Some(self.s[self.i]);
            }
            self.i += 1;
        }
        None
    }

    /// Parses a declaration block body (without braces), e.g. the contents
    /// of an inline `style` attribute.
    pub fn body(&mut self) -> HashMap<String, String> {
        let mut pairs = HashMap::new();
        while self.i < self.s.len() && self.s[self.i] != '}' {
            match self.pair() {
                Ok((prop, value)) => {
                    pairs.insert(prop, value);
                    self.whitespace();
                    if self.literal(';').is_err() {
                        break;
                    }
                    self.whitespace();
                }
                Err(_) => match self.ignore_until(&[';', '}']) {
                    Some(';') => {
                        let _ = self.literal(';');
                        self.whitespace();
                    }
                    _ => break,
                },
            }
        }
        pairs
    }

    /// Parses a selector: a tag, optionally followed by descendant parts.
    pub fn selector(&mut self) -> Result<Selector, CssSyntaxError> {
        let mut out = Selector::Tag(TagSelector { tag: self.word()?.to_ascii_lowercase() });
        self.whitespace();
        while self.i < self.s.len() && self.s[self.i] != '{' {
            let tag = self.word()?;
            let descendant = Selector::Tag(TagSelector { tag: tag.to_ascii_lowercase() });
            out = Selector::Descendant(DescendantSelector {
                ancestor: Box::new(out),
                descendant: Box::new(descendant),
            });
            self.whitespace();
        }
        Ok(out)
    }

    pub fn parse(&mut self) -> Vec<Rule> {
        let mut rules = Vec::new();
        while self.i < self.s.len() {
            self.whitespace();
            if self.i >= self.s.len() {
                break;
            }
            let rule = self.selector().and_then(|selector| {
                self.literal('{')?;
                self.whitespace();
                let body = self.body();
                self.literal('}')?;
                Ok((selector, body))
            });
            match rule {
                Ok(rule) => rules.push(rule),
                Err(_) => match self.ignore_until(&['}']) {
                    Some('}') => {
                        let _ = self.literal('}');
                        self.whitespace();
                    }
                    _ => break,
                },
            }
        }
        rules
    }
}
