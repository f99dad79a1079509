//! Path Text Parser
//!
//! Recursive-descent parser for the path grammar:
//!
//! ```text
//! /World/Char/Arm.geom            absolute prim property
//! Char/Arm                        relative prim
//! ../..                           parent-relative
//! .radius                         property on the reflexive prim
//! /Model{lod=high}Geo             variant selection, then child
//! /A.rel[/B]                      relationship target
//! /A.rel[/B].attr                 relational attribute
//! /A.b.mapper[/C.d].scale         mapper and mapper arg
//! /A.b.expression                 expression
//! ```
//!
//! Prim and property names are identifiers; property names may be
//! namespaced with `:` (never leading, trailing, or doubled). Variant
//! selections tolerate whitespace inside the braces and may select the
//! empty variant (`{set=}`). Bracketed target paths must be absolute.
//!
//! Parsing builds the interned path directly through the append
//! operations, so a successfully parsed string round-trips bit-exact
//! (modulo whitespace inside variant selections).

use crate::path::Path;
use std::fmt;
use strata_core::Token;
use tracing::warn;

/// A path string that violates the grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParseError {
    message: String,
    position: usize,
}

impl PathParseError {
    fn new(message: impl Into<String>, position: usize) -> PathParseError {
        PathParseError {
            message: message.into(),
            position,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

impl fmt::Display for PathParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.position)
    }
}

impl std::error::Error for PathParseError {}

pub(crate) fn parse_path(text: &str) -> Result<Path, PathParseError> {
    Parser {
        bytes: text.as_bytes(),
        pos: 0,
    }
    .parse()
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse(mut self) -> Result<Path, PathParseError> {
        if self.bytes.is_empty() {
            return Err(self.error("empty path"));
        }

        let mut path;
        let mut allow_direct_property = true;
        if self.peek() == Some(b'/') {
            self.pos += 1;
            path = Path::absolute_root_path();
            if self.at_end() {
                return Ok(path);
            }
            (path, allow_direct_property) = self.parse_prim_elements(path)?;
        } else if self.peek() == Some(b'.') && self.peek_at(1) != Some(b'.') {
            // "." alone, or a property on the reflexive prim (".bar").
            path = Path::reflexive_relative_path();
            if self.bytes.len() == 1 {
                self.pos += 1;
                return Ok(path);
            }
            // Leave the '.' for the property parser below.
        } else {
            (path, allow_direct_property) =
                self.parse_prim_elements(Path::reflexive_relative_path())?;
        }

        if self.peek() == Some(b'.') {
            if !allow_direct_property {
                return Err(self.error("expected '/' before a property on '..'"));
            }
            path = self.parse_property_part(path)?;
        }

        if !self.at_end() {
            return Err(self.error("unexpected trailing characters"));
        }
        Ok(path)
    }

    // =========================================================================
    // Prim part
    // =========================================================================

    // Parse the prim-element run. The returned flag says whether a
    // property may follow directly: after '..' a property needs a '/'
    // separator ("../.radius"), never direct attachment ("...radius").
    fn parse_prim_elements(&mut self, start: Path) -> Result<(Path, bool), PathParseError> {
        let mut path = start;
        loop {
            // One prim element: '..' or an identifier.
            let is_dotdot = self.peek() == Some(b'.');
            if is_dotdot {
                if self.peek_at(1) == Some(b'.') {
                    self.pos += 2;
                    path = path.append_child(Token::new(".."));
                    if path.is_empty() {
                        return Err(self.error("cannot step above the absolute root"));
                    }
                } else {
                    return Err(self.error("expected a prim name"));
                }
            } else {
                let name = self.parse_identifier("prim name")?;
                path = path.append_child(Token::new(name));
                if path.is_empty() {
                    return Err(self.error("invalid prim element"));
                }
            }

            // Variant selections, with whitespace tolerated around the
            // braces.
            let mut saw_variant = false;
            loop {
                let save = self.pos;
                self.skip_spaces();
                if self.peek() == Some(b'{') {
                    path = self.parse_variant_selection(path)?;
                    saw_variant = true;
                } else if self.at_end() && saw_variant {
                    // Trailing whitespace after the last selection.
                    break;
                } else {
                    self.pos = save;
                    break;
                }
            }

            match self.peek() {
                Some(b'/') => {
                    self.pos += 1;
                    // "../.radius": a '/' then a property ends the run.
                    if is_dotdot
                        && !saw_variant
                        && self.peek() == Some(b'.')
                        && self.peek_at(1) != Some(b'.')
                    {
                        return Ok((path, true));
                    }
                }
                // A child may follow a variant selection directly.
                Some(c) if saw_variant && (c.is_ascii_alphabetic() || c == b'_') => {}
                // '..' continues the element run ("../..").
                Some(b'.') if self.peek_at(1) == Some(b'.') => {}
                _ => return Ok((path, !is_dotdot || saw_variant)),
            }
        }
    }

    fn parse_variant_selection(&mut self, path: Path) -> Result<Path, PathParseError> {
        self.expect(b'{')?;
        self.skip_spaces();
        let set_start = self.pos;
        let set = self.parse_variant_set_name()?;
        if set.contains('-') {
            // Accepted for historical reasons.
            warn!(
                set,
                offset = set_start,
                "variant set names containing '-' are deprecated"
            );
        }
        self.skip_spaces();
        self.expect(b'=')?;
        self.skip_spaces();
        let variant = self.parse_variant_value();
        self.skip_spaces();
        self.expect(b'}')?;

        let appended = path.append_variant_selection(set, &variant);
        if appended.is_empty() {
            return Err(self.error("variant selection not allowed here"));
        }
        Ok(appended)
    }

    fn parse_variant_set_name(&mut self) -> Result<&'a str, PathParseError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => self.pos += 1,
            _ => return Err(self.error("expected a variant set name")),
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'-' {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(self.slice(start))
    }

    // Variant values may be empty and admit a wider character set than
    // identifiers.
    fn parse_variant_value(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, b'_' | b'|' | b'-' | b'.') {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.slice(start).to_string()
    }

    // =========================================================================
    // Property part
    // =========================================================================

    fn parse_property_part(&mut self, prim_path: Path) -> Result<Path, PathParseError> {
        self.expect(b'.')?;
        let name = self.parse_namespaced_identifier()?;
        let mut path = prim_path.append_property(Token::new(name));
        if path.is_empty() {
            return Err(self.error("property not allowed here"));
        }

        loop {
            match self.peek() {
                Some(b'[') => {
                    if !path.is_property_path() {
                        return Err(self.error("target not allowed here"));
                    }
                    let target = self.parse_bracketed_path()?;
                    path = path.append_target(&target);
                    if path.is_empty() {
                        return Err(self.error("invalid target path"));
                    }
                }
                Some(b'.') => {
                    self.pos += 1;
                    path = self.parse_property_suffix(path)?;
                }
                _ => return Ok(path),
            }
        }
    }

    // One '.'-introduced suffix element: a mapper, an expression, a
    // relational attribute, or a mapper arg, depending on what the
    // path currently ends in.
    fn parse_property_suffix(&mut self, path: Path) -> Result<Path, PathParseError> {
        let word_start = self.pos;
        let word = self.parse_namespaced_identifier()?;

        if path.is_property_path() {
            if word == "mapper" && self.peek() == Some(b'[') {
                let target = self.parse_bracketed_path()?;
                let mapper = path.append_mapper(&target);
                if mapper.is_empty() {
                    return Err(self.error("invalid mapper target"));
                }
                return Ok(mapper);
            }
            if word == "expression" {
                return Ok(path.append_expression());
            }
        }

        if path.is_target_path() {
            let attr = path.append_relational_attribute(Token::new(word));
            if attr.is_empty() {
                return Err(PathParseError::new("invalid relational attribute name", word_start));
            }
            return Ok(attr);
        }

        if path.is_mapper_path() {
            let arg = path.append_mapper_arg(Token::new(word));
            if arg.is_empty() {
                return Err(PathParseError::new("invalid mapper arg name", word_start));
            }
            return Ok(arg);
        }

        Err(PathParseError::new(
            format!("unexpected path element '.{word}'"),
            word_start,
        ))
    }

    // '[' absolute path ']', brackets nesting for embedded targets.
    fn parse_bracketed_path(&mut self) -> Result<Path, PathParseError> {
        self.expect(b'[')?;
        let start = self.pos;
        let mut depth = 1usize;
        while let Some(c) = self.peek() {
            match c {
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        if depth != 0 {
            return Err(self.error("unterminated '['"));
        }
        let inner = self.slice(start);
        self.pos += 1; // consume ']'

        let target = parse_path(inner)
            .map_err(|e| PathParseError::new(e.message, start + e.position))?;
        if !target.is_absolute_path() {
            return Err(PathParseError::new("target paths must be absolute", start));
        }
        Ok(target)
    }

    // =========================================================================
    // Lexical helpers
    // =========================================================================

    fn parse_identifier(&mut self, what: &str) -> Result<&'a str, PathParseError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => self.pos += 1,
            _ => return Err(self.error(format!("expected {what}"))),
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(self.slice(start))
    }

    fn parse_namespaced_identifier(&mut self) -> Result<&'a str, PathParseError> {
        let start = self.pos;
        self.parse_identifier("property name")?;
        while self.peek() == Some(b':') {
            self.pos += 1;
            self.parse_identifier("identifier after ':'")?;
        }
        Ok(self.slice(start))
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: u8) -> Result<(), PathParseError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", c as char)))
        }
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    #[inline]
    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    #[inline]
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn slice(&self, start: usize) -> &'a str {
        // Safety of from_utf8: we only advance over ASCII bytes.
        std::str::from_utf8(&self.bytes[start..self.pos]).expect("ASCII path slice")
    }

    fn error(&self, message: impl Into<String>) -> PathParseError {
        PathParseError::new(message, self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(s: &str) {
        let path = parse_path(s).unwrap_or_else(|e| panic!("parse error: {e} in {s:?}"));
        let printed = path.as_string();
        let expect: String = s.chars().filter(|c| *c != ' ').collect();
        assert_eq!(printed, expect, "round trip mismatch for {s:?}");
    }

    fn invalid(s: &str) {
        assert!(parse_path(s).is_err(), "expected parse failure for {s:?}");
    }

    #[test]
    fn test_valid_paths_round_trip() {
        for s in [
            ".",
            "/",
            "Foo",
            "/Foo",
            ".bar",
            "/Foo/Bar.baz",
            "/Foo/Bar.baz:argle:bargle",
            "/_Foo/_Bar._baz",
            "Foo/Bar",
            "Foo.bar",
            "Foo.bar:baz",
            "/Some/Kinda/Long/Path/Just/To/Make/Sure",
            "Some/Kinda/Long/Path.property",
            "../Some/Kinda/Long/Path",
            "../../Some/Long/Path.property:bar:baz",
            "/Foo/Bar.baz[/targ].boom",
            "Foo.bar[/targ.attr].boom:bargle",
            ".bar[/targ].boom",
            "../../.radius",
            "../..",
            "foo{a=x}",
            "/foo{a=x}",
            "../foo{a=x}",
            "foo{a=x}.prop",
            "foo{a=1}",
            "foo{a=}",
            "foo{a=x}{b=y}",
            "foo{a=x}{b=y}.prop:bar:baz",
            "foo{a=x}bar",
            "/foo{a=x}bar.prop",
            "foo{a=x}bar{b=y}blah{c=z}.prop",
            "foo{a=x}bar/blah{c=z}baz/Burma.Shave",
            "foo{a=.x}",
            "foo{a=|}",
            "foo{a=-}",
            "foo{a=.|-_|-_}",
            "foo.expression",
            "foo.expression.expression",
            "foo.expression.mapper[/A.b]",
            "foo.mapper",
            "foo.mapper.expression",
            "foo.mapper.mapper[/A.b]",
            "foo.mapper.mapper[/A.b].arg",
        ] {
            roundtrip(s);
        }
    }

    #[test]
    fn test_whitespace_in_variant_selections() {
        for s in [
            "foo{ a = x }",
            "foo {a=x} {b=y} ",
            "foo { a = x} { b = y } ",
            "foo{ a = x }{b=y}",
        ] {
            roundtrip(s);
        }
    }

    #[test]
    fn test_invalid_paths() {
        for s in [
            "",
            "DD/DDD.&ddf$",
            "DD[]/DDD",
            "DD[]/DDD.bar",
            "foo.prop/bar",
            "/foo.prop/bar.blah",
            "/foo//bar",
            "/foo/.bar",
            "/foo..bar",
            "/foo.bar.baz",
            "/.foo",
            "/Foo.:bar",
            "/Foo.bar:",
            "/Foo.:bar:",
            "/Foo.bar::baz",
            "/Foo.bar:0",
            "</foo.bar",
            "</Foo/Bar/>",
            "/Foo:Bar",
            "/..",
            "123",
            "/Foo.b[targ]",
        ] {
            invalid(s);
        }
    }

    #[test]
    fn test_parse_builds_expected_structure() {
        let p = parse_path("/World/Char/Arm.geom").unwrap();
        assert!(p.is_prim_property_path());
        assert!(p.is_absolute_path());
        assert_eq!(p.name(), "geom");
        assert_eq!(p.parent_path().as_string(), "/World/Char/Arm");
    }

    #[test]
    fn test_embedded_target_is_a_path() {
        let p = parse_path("/A.rel[/B/C].x").unwrap();
        assert_eq!(p.target_path().as_string(), "/B/C");
        assert!(p.is_relational_attribute_path());
    }

    #[test]
    fn test_error_positions() {
        let err = parse_path("/Foo.bar:").unwrap_err();
        assert!(err.position() >= 8);
        let err = parse_path("/foo//bar").unwrap_err();
        assert_eq!(err.position(), 5);
    }

    #[test]
    fn test_relative_dotdot_chain() {
        let p = parse_path("../..").unwrap();
        assert_eq!(p.as_string(), "../..");
        assert_eq!(p.element_count(), 2);
    }

    #[test]
    fn test_interior_dotdot_normalizes() {
        // '..' after a named prim climbs instead of stacking.
        let p = parse_path("Foo/..").unwrap();
        assert_eq!(p, Path::reflexive_relative_path());
    }
}
