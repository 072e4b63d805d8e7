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

//! Parsing of whois request lines.

use crate::engine::{QueryOptions, Term};

/// A parsed whois request line.
///
/// A request is a list of whitespace-separated tokens. Tokens starting
/// with `-` are flags; the rest are query terms, each answered on its
/// own. The recognized flags are:
///
/// | Flag       | Meaning                                        |
/// |------------|------------------------------------------------|
/// | `-T TYPES` | restrict primary objects to a comma-separated class list |
/// | `-i ATTRS` | inverse query on a comma-separated attribute list |
/// | `-l [N]`   | add `N` levels (default one) of less specifics |
/// | `-L`       | add all less specifics                         |
/// | `-m`       | add one level of more specifics                |
/// | `-M`       | add all more specifics                         |
/// | `-x`       | exact network matches only                     |
/// | `-d`       | add reverse-DNS domains                        |
/// | `-r`       | do not add related objects                     |
/// | `-K`       | print primary keys only                        |
///
/// Flags may be combined, as in `-rx`. A flag taking an argument takes
/// the rest of its group if there is any (`-Tperson`), and otherwise
/// the next token (`-rT person`). Unknown flags are ignored.
#[derive(Clone, Debug)]
pub struct Request {
    pub options: QueryOptions,
    pub primary_keys_only: bool,
    pub inverse_keys: Option<Vec<String>>,
    pub terms: Vec<String>,
}

impl Request {
    pub fn parse(line: &str) -> Self {
        let mut request = Self {
            options: QueryOptions::default(),
            primary_keys_only: false,
            inverse_keys: None,
            terms: Vec::new(),
        };

        let mut tokens = line.split_whitespace().peekable();
        while let Some(token) = tokens.next() {
            let Some(flags) = token.strip_prefix('-').filter(|flags| !flags.is_empty()) else {
                request.terms.push(token.to_owned());
                continue;
            };
            // Long options are not supported.
            if flags.starts_with('-') {
                continue;
            }
            for (i, flag) in flags.char_indices() {
                let rest = &flags[i + flag.len_utf8()..];
                match flag {
                    // These take an argument: the rest of the group, or
                    // else the next token.
                    'T' | 'i' => {
                        let argument = if rest.is_empty() {
                            tokens.next()
                        } else {
                            Some(rest)
                        };
                        if let Some(argument) = argument {
                            request.set_list(flag, argument);
                        }
                        break;
                    }
                    // The level count is optional.
                    'l' if rest.is_empty() => {
                        let levels = tokens.peek().and_then(|next| next.parse::<i32>().ok());
                        if levels.is_some() {
                            tokens.next();
                        }
                        request.options.less_specific_levels = levels.unwrap_or(1);
                    }
                    'l' => {
                        if let Ok(levels) = rest.parse::<i32>() {
                            request.options.less_specific_levels = levels;
                            break;
                        }
                        request.options.less_specific_levels = 1;
                    }
                    _ => request.set_flag(flag),
                }
            }
        }
        request
    }

    fn set_list(&mut self, flag: char, list: &str) {
        match flag {
            'T' => self.options.classes = Some(split_list(list)),
            'i' => self.inverse_keys = Some(split_list(list)),
            _ => (),
        }
    }

    fn set_flag(&mut self, flag: char) {
        match flag {
            'L' => self.options.less_specific_levels = -1,
            'm' => self.options.more_specific_levels = 1,
            'M' => self.options.more_specific_levels = -1,
            'x' => self.options.exact_match = true,
            'd' => self.options.reverse_domain = true,
            'r' => self.options.related = false,
            'K' => {
                self.primary_keys_only = true;
                self.options.related = false;
            }
            _ => (),
        }
    }

    /// Returns the query terms of the request.
    pub fn terms(&self) -> impl Iterator<Item = Term> + '_ {
        self.terms.iter().map(|term| match self.inverse_keys {
            Some(ref keys) => Term::Inverse {
                keys: keys.clone(),
                values: vec![term.clone()],
            },
            None => Term::Text(term.clone()),
        })
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}
