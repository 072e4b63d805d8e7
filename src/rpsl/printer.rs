// Copyright 2023 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The [`PrettyPrinter`] type.

use std::fmt::{self, Write};

use crate::object::Object;

/// Formats [`Object`]s as RPSL text.
///
/// Values are aligned in a column whose width is the longest key of
/// the object (or `min_padding`, whichever is larger) plus
/// `add_padding`. Multi-line values continue on lines indented to the
/// same column; empty continuation lines are written as `+`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PrettyPrinter {
    pub min_padding: usize,
    pub add_padding: usize,
}

impl PrettyPrinter {
    /// The layout used on the whois wire: values start at column 16.
    pub const WHOIS: Self = Self {
        min_padding: 16,
        add_padding: 0,
    };

    pub fn new(min_padding: usize, add_padding: usize) -> Self {
        Self {
            min_padding,
            add_padding,
        }
    }

    /// Returns the column at which values of `object` start.
    fn width(&self, object: &Object) -> usize {
        let longest = object
            .attributes()
            .iter()
            .map(|attr| attr.key.chars().count())
            .max()
            .unwrap_or(0);
        longest.max(self.min_padding) + self.add_padding
    }

    /// Writes `object` to `f`. Every line, including the last, ends
    /// with `\n`.
    pub fn write(&self, f: &mut impl Write, object: &Object) -> fmt::Result {
        let width = self.width(object);
        for attr in object.attributes() {
            let value = attr.value.replace("\r\n", "\n").replace('\r', "\n");
            let mut lines = value.split('\n');
            let first = lines.next().unwrap_or_default();

            f.write_str(&attr.key)?;
            f.write_char(':')?;
            if !first.is_empty() {
                let used = attr.key.chars().count() + 1;
                write_spaces(f, width.saturating_sub(used).max(1))?;
                f.write_str(first)?;
            }
            f.write_char('\n')?;

            for line in lines {
                if line.is_empty() {
                    f.write_str("+\n")?;
                } else {
                    write_spaces(f, width.max(1))?;
                    f.write_str(line)?;
                    f.write_char('\n')?;
                }
            }
        }
        Ok(())
    }

    /// Formats `object` into a new `String`.
    pub fn format(&self, object: &Object) -> String {
        let mut text = String::new();
        // Writing to a String cannot fail.
        let _ = self.write(&mut text, object);
        text
    }
}

impl Default for PrettyPrinter {
    fn default() -> Self {
        Self::new(0, 8)
    }
}

fn write_spaces(f: &mut impl Write, count: usize) -> fmt::Result {
    for _ in 0..count {
        f.write_char(' ')?;
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpsl::Parser;

    fn sample() -> Object {
        let mut object = Object::new("person", "John Doe");
        object.push("address", "Example Street 1\n\nExample City");
        object.push("remarks", "");
        object.push("nic-hdl", "JD1-TEST");
        object
    }

    fn pad(count: usize) -> String {
        " ".repeat(count)
    }

    #[test]
    fn default_layout_pads_longest_key() {
        let expected = format!(
            "person:{}John Doe\n\
             address:{}Example Street 1\n\
             +\n\
             {}Example City\n\
             remarks:\n\
             nic-hdl:{}JD1-TEST\n",
            pad(8),
            pad(7),
            pad(15),
            pad(7),
        );
        assert_eq!(PrettyPrinter::default().format(&sample()), expected);
    }

    #[test]
    fn whois_layout_uses_column_16() {
        let object = Object::new("mntner", "EX-MNT");
        assert_eq!(
            PrettyPrinter::WHOIS.format(&object),
            format!("mntner:{}EX-MNT\n", pad(9))
        );
        let mut long = Object::new("a-very-long-attribute-key", "x");
        long.push("b", "y");
        assert_eq!(
            PrettyPrinter::WHOIS.format(&long),
            format!("a-very-long-attribute-key: x\nb:{}y\n", pad(23))
        );
    }

    #[test]
    fn printed_objects_parse_back() {
        for printer in [PrettyPrinter::default(), PrettyPrinter::WHOIS, PrettyPrinter::new(0, 0)] {
            let object = sample();
            let text = printer.format(&object);
            let parsed: Vec<_> = Parser::new(text.as_bytes()).map(|r| r.unwrap()).collect();
            assert_eq!(parsed, [object]);
        }
    }

    #[test]
    fn display_uses_default_layout() {
        assert_eq!(
            Object::new("poem", "ODE").to_string(),
            format!("poem:{}ODE\n", pad(7))
        );
    }
}
