//! External identifier obfuscation
//!
//! Internal ids are sequential SQLite row ids. They are never shown to
//! clients; every resource is exposed through a short opaque token produced
//! by a Hashids-compatible codec salted per resource type. Encoding is
//! deterministic and reversible, and decoding rejects any string that does
//! not re-encode to itself.
//!
//! Different salts shuffle the alphabet differently, but the per-type codecs
//! still collide at realistic sizes: project 898 and method 85511 share the
//! token `4BVn4`. A token says nothing about its type. The store decodes it
//! with the codec of the type the caller asked for and matches the `id`
//! column of that type's table, so a colliding token resolves to whichever
//! row of the requested type it names.

use crate::{Error, Result};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890";
const SEPARATORS: &[u8] = b"cfhistuCFHISTU";
const GUARD_RATIO: usize = 12;

/// Salt prefix applied to every per-type salt
pub const DEFAULT_SALT_PREFIX: &str = "sagittarius";

/// Shortest external id handed out
pub const DEFAULT_MIN_LENGTH: usize = 5;

/// Salt of the continuation-token namespace
const STAGE_TOKEN_SALT: &str = "SampleStageToken";

/// Hashids codec for one salt
#[derive(Debug, Clone)]
pub struct HashIds {
    salt: Vec<u8>,
    min_length: usize,
    alphabet: Vec<u8>,
    separators: Vec<u8>,
    guards: Vec<u8>,
}

impl HashIds {
    /// Build a codec over the default alphabet
    pub fn new(salt: &str, min_length: usize) -> Self {
        let salt = salt.as_bytes().to_vec();

        let mut separators = SEPARATORS.to_vec();
        let mut alphabet: Vec<u8> = ALPHABET
            .iter()
            .copied()
            .filter(|c| !separators.contains(c))
            .collect();

        // 48 letters against 14 separators already satisfies the 3.5:1
        // separator ratio, so no letters are promoted to separators.
        consistent_shuffle(&mut separators, &salt);
        consistent_shuffle(&mut alphabet, &salt);

        let guard_count = alphabet.len().div_ceil(GUARD_RATIO);
        let guards: Vec<u8> = alphabet.drain(..guard_count).collect();

        Self {
            salt,
            min_length,
            alphabet,
            separators,
            guards,
        }
    }

    /// Encode a single value
    pub fn encode(&self, value: u64) -> String {
        self.encode_many(&[value])
    }

    /// Encode a sequence of values into one token
    pub fn encode_many(&self, values: &[u64]) -> String {
        if values.is_empty() {
            return String::new();
        }

        let mut alphabet = self.alphabet.clone();
        let values_hash: u64 = values
            .iter()
            .enumerate()
            .map(|(i, v)| v % (i as u64 + 100))
            .sum();

        let lottery = alphabet[(values_hash % alphabet.len() as u64) as usize];
        let mut encoded = vec![lottery];

        for (i, &value) in values.iter().enumerate() {
            let salt = self.round_salt(lottery, &alphabet);
            consistent_shuffle(&mut alphabet, &salt);

            let last = hash(value, &alphabet);
            encoded.extend_from_slice(&last);

            let folded = value % (u64::from(last[0]) + i as u64);
            encoded.push(self.separators[(folded % self.separators.len() as u64) as usize]);
        }
        encoded.pop();

        if encoded.len() < self.min_length {
            self.pad(&mut encoded, alphabet, values_hash);
        }

        encoded.into_iter().map(char::from).collect()
    }

    /// Decode a token; `None` when it is not a token this codec produced
    pub fn decode(&self, token: &str) -> Option<Vec<u64>> {
        if token.is_empty() || !token.is_ascii() {
            return None;
        }

        let parts: Vec<&[u8]> = token
            .as_bytes()
            .split(|c| self.guards.contains(c))
            .collect();
        let core = if parts.len() == 2 || parts.len() == 3 {
            parts[1]
        } else {
            parts[0]
        };

        let (&lottery, rest) = core.split_first()?;
        let mut alphabet = self.alphabet.clone();
        let mut values = Vec::new();

        for part in rest.split(|c| self.separators.contains(c)) {
            let salt = self.round_salt(lottery, &alphabet);
            consistent_shuffle(&mut alphabet, &salt);
            values.push(unhash(part, &alphabet)?);
        }

        if self.encode_many(&values) == token {
            Some(values)
        } else {
            None
        }
    }

    /// Decode a token that must carry exactly one value
    pub fn decode_one(&self, token: &str) -> Option<u64> {
        match self.decode(token)?.as_slice() {
            [value] => Some(*value),
            _ => None,
        }
    }

    fn round_salt(&self, lottery: u8, alphabet: &[u8]) -> Vec<u8> {
        let mut salt = Vec::with_capacity(1 + self.salt.len() + alphabet.len());
        salt.push(lottery);
        salt.extend_from_slice(&self.salt);
        salt.extend_from_slice(alphabet);
        salt.truncate(alphabet.len());
        salt
    }

    fn pad(&self, encoded: &mut Vec<u8>, mut alphabet: Vec<u8>, values_hash: u64) {
        let guard_at = |c: u8| {
            self.guards[((values_hash + u64::from(c)) % self.guards.len() as u64) as usize]
        };

        let front = guard_at(encoded[0]);
        encoded.insert(0, front);

        if encoded.len() < self.min_length {
            let back = guard_at(encoded[2]);
            encoded.push(back);
        }

        let split_at = alphabet.len() / 2;
        while encoded.len() < self.min_length {
            let salt = alphabet.clone();
            consistent_shuffle(&mut alphabet, &salt);

            let mut padded = alphabet[split_at..].to_vec();
            padded.extend_from_slice(encoded);
            padded.extend_from_slice(&alphabet[..split_at]);

            let excess = padded.len().saturating_sub(self.min_length);
            if excess > 0 {
                let from = excess / 2;
                padded = padded[from..from + self.min_length].to_vec();
            }
            *encoded = padded;
        }
    }
}

fn consistent_shuffle(alphabet: &mut [u8], salt: &[u8]) {
    if salt.is_empty() || alphabet.len() < 2 {
        return;
    }

    let mut index = 0usize;
    let mut sum = 0usize;
    for i in (1..alphabet.len()).rev() {
        index %= salt.len();
        let integer = usize::from(salt[index]);
        sum += integer;
        let j = (integer + index + sum) % i;
        alphabet.swap(i, j);
        index += 1;
    }
}

fn hash(mut value: u64, alphabet: &[u8]) -> Vec<u8> {
    let base = alphabet.len() as u64;
    let mut out = Vec::new();
    loop {
        out.push(alphabet[(value % base) as usize]);
        value /= base;
        if value == 0 {
            break;
        }
    }
    out.reverse();
    out
}

fn unhash(part: &[u8], alphabet: &[u8]) -> Option<u64> {
    let base = alphabet.len() as u64;
    part.iter().try_fold(0u64, |acc, c| {
        let position = alphabet.iter().position(|a| a == c)? as u64;
        acc.checked_mul(base)?.checked_add(position)
    })
}

/// Resource types that carry an external id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Project,
    Sample,
    Method,
    Stage,
    StageFile,
    UserAuthentication,
    UserAuthorization,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Project,
        ResourceKind::Sample,
        ResourceKind::Method,
        ResourceKind::Stage,
        ResourceKind::StageFile,
        ResourceKind::UserAuthentication,
        ResourceKind::UserAuthorization,
    ];

    /// Name mixed into the salt; changing it re-keys every issued id
    pub fn salt_name(self) -> &'static str {
        match self {
            ResourceKind::Project => "Project",
            ResourceKind::Sample => "Sample",
            ResourceKind::Method => "Method",
            ResourceKind::Stage => "SampleStage",
            ResourceKind::StageFile => "SampleStageFile",
            ResourceKind::UserAuthentication => "UserAuthentication",
            ResourceKind::UserAuthorization => "UserAuthorization",
        }
    }

    /// Backing table
    pub fn table(self) -> &'static str {
        match self {
            ResourceKind::Project => "project",
            ResourceKind::Sample => "sample",
            ResourceKind::Method => "method",
            ResourceKind::Stage => "stage",
            ResourceKind::StageFile => "stage_file",
            ResourceKind::UserAuthentication => "user_authentication",
            ResourceKind::UserAuthorization => "user_authorization",
        }
    }

    /// Human-readable name used in error messages
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Project => "project",
            ResourceKind::Sample => "sample",
            ResourceKind::Method => "method",
            ResourceKind::Stage => "stage",
            ResourceKind::StageFile => "file",
            ResourceKind::UserAuthentication => "user authentication",
            ResourceKind::UserAuthorization => "user",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Per-type external id codecs plus the continuation-token codec
#[derive(Debug, Clone)]
pub struct Obfuscator {
    codecs: Vec<HashIds>,
    stage_token: HashIds,
}

impl Obfuscator {
    pub fn new(salt_prefix: &str, min_length: usize) -> Self {
        let codecs = ResourceKind::ALL
            .iter()
            .map(|kind| HashIds::new(&format!("{};{}", salt_prefix, kind.salt_name()), min_length))
            .collect();

        Self {
            codecs,
            stage_token: HashIds::new(STAGE_TOKEN_SALT, DEFAULT_MIN_LENGTH),
        }
    }

    /// External id for a persisted row. Row ids are assigned by SQLite, so
    /// this can only be called once the insert has happened.
    pub fn encode(&self, kind: ResourceKind, id: i64) -> Result<String> {
        let value = u64::try_from(id).map_err(|_| {
            Error::Internal(format!("cannot encode negative {} id {}", kind.label(), id))
        })?;
        Ok(self.codecs[kind.index()].encode(value))
    }

    /// Internal id for an external id of `kind`
    pub fn decode(&self, kind: ResourceKind, external_id: &str) -> Option<i64> {
        self.codecs[kind.index()]
            .decode_one(external_id)
            .and_then(|v| i64::try_from(v).ok())
    }

    /// Continuation token naming `last_stage_id` (0 for an empty sequence)
    pub fn encode_stage_token(&self, last_stage_id: i64) -> Result<String> {
        let value = u64::try_from(last_stage_id)
            .map_err(|_| Error::Internal(format!("cannot encode stage token {}", last_stage_id)))?;
        Ok(self.stage_token.encode(value))
    }

    pub fn decode_stage_token(&self, token: &str) -> Option<i64> {
        self.stage_token
            .decode_one(token)
            .and_then(|v| i64::try_from(v).ok())
    }
}

impl Default for Obfuscator {
    fn default() -> Self {
        Self::new(DEFAULT_SALT_PREFIX, DEFAULT_MIN_LENGTH)
    }
}
