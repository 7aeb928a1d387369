/*
 * urlencoded.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Portinaio, an embeddable HTTP/1.x server library.
 *
 * Portinaio is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Portinaio is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Portinaio.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Streaming application/x-www-form-urlencoded decoder. Pairs split on `&`
//! and the first `=`; later `=` belong to the value. Pairs with an empty key
//! are skipped. Keys and values are percent-unescaped; `+` is literal.

use crate::request::FieldMap;

/// Push decoder. Feed body bytes via `receive`, then take the result with
/// `finish`.
#[derive(Default)]
pub struct UrlEncodedParser {
    current: Vec<u8>,
    fields: FieldMap,
}

impl UrlEncodedParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receive(&mut self, data: &[u8]) {
        for &b in data {
            if b == b'&' {
                self.flush_pair();
            } else {
                self.current.push(b);
            }
        }
    }

    pub fn finish(mut self) -> FieldMap {
        self.flush_pair();
        self.fields
    }

    fn flush_pair(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let pair = std::mem::take(&mut self.current);
        let (key, value) = match pair.iter().position(|&b| b == b'=') {
            Some(i) => (&pair[..i], &pair[i + 1..]),
            None => (&pair[..], &[][..]),
        };
        let key = unescape_component(key);
        if key.is_empty() {
            return;
        }
        self.fields.add(key, unescape_component(value));
    }
}

/// Percent-decode raw bytes, then decode as UTF-8 (lossy).
fn unescape_component(raw: &[u8]) -> String {
    percent_encoding::percent_decode(raw)
        .decode_utf8_lossy()
        .into_owned()
}
