// Pastebin Lite
// Copyright (C) 2021  Edward Shen
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::fmt::{Debug, Display};
use std::str::FromStr;

use rand::prelude::Distribution;
use rand::Rng;
use thiserror::Error;

/// Length of every paste id handed out by the server.
pub const SHORT_CODE_SIZE: usize = 12;

pub struct ShortCode<const N: usize>([ShortCodeChar; N]);

impl<const N: usize> Display for ShortCode<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_iter(self.0.map(|v| v.0)))
    }
}

impl<const N: usize> Debug for ShortCode<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ShortCode").field(&self.to_string()).finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidShortCode {
    #[error("expected {expected} characters, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("{0:?} is not a valid short code character")]
    Char(char),
}

impl<const N: usize> FromStr for ShortCode<N> {
    type Err = InvalidShortCode;

    fn from_str(v: &str) -> Result<Self, Self::Err> {
        let actual = v.chars().count();
        if actual != N {
            return Err(InvalidShortCode::Length { expected: N, actual });
        }

        // This is fine, it'll get overwritten anyways.
        let mut output = [ShortCodeChar('\0'); N];
        for (slot, c) in output.iter_mut().zip(v.chars()) {
            *slot = c.try_into().map_err(|_| InvalidShortCode::Char(c))?;
        }

        Ok(Self(output))
    }
}

/// `ShortCodeChar` uses the Word-safe alphabet, a Base32 extension of the Open
/// Location Code Base20 alphabet. Every character is URL-safe.
#[derive(Clone, Copy, Debug)]
struct ShortCodeChar(char);

impl TryFrom<char> for ShortCodeChar {
    type Error = &'static str;

    fn try_from(v: char) -> Result<Self, Self::Error> {
        if v.is_ascii() && ALPHABET.contains(&(v as u8)) {
            Ok(Self(v))
        } else {
            Err("a valid short code character")
        }
    }
}

/// Draws short codes from any rng. Callers must supply an unpredictable one.
pub struct Generator;

const ALPHABET: &[u8; 32] = b"23456789CFGHJMPQRVWXcfghjmpqrvwx";

impl Distribution<ShortCodeChar> for Generator {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ShortCodeChar {
        ShortCodeChar(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
    }
}

impl<const N: usize> Distribution<ShortCode<N>> for Generator {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ShortCode<N> {
        let mut arr = [ShortCodeChar('\0'); N];

        for c in &mut arr {
            *c = self.sample(rng);
        }

        ShortCode(arr)
    }
}
