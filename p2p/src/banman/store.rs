//! Ban list persistence.
use std::collections::BTreeMap;
use std::path::Path;
use std::{fs, io};

use microserde::json::{Array, Number, Object, Value};

use bulwark_common::p2p::NetAddr;
use bulwark_common::time::LocalTime;

use crate::error::Error;

/// A timed ban.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanEntry {
    /// When the ban was created.
    pub created: LocalTime,
    /// When the ban expires.
    pub until: LocalTime,
}

/// The set of discouraged and banned addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BanList {
    /// Discouraged addresses, with the time they were discouraged.
    pub discouraged: BTreeMap<NetAddr, LocalTime>,
    /// Banned addresses.
    pub banned: BTreeMap<NetAddr, BanEntry>,
}

impl BanList {
    /// Whether the list has no entries.
    pub fn is_empty(&self) -> bool {
        self.discouraged.is_empty() && self.banned.is_empty()
    }

    /// Convert to a JSON value.
    pub fn to_json(&self) -> Value {
        let secs = |t: &LocalTime| Value::Number(Number::U64(t.as_secs()));

        let discouraged: Array = self
            .discouraged
            .iter()
            .map(|(addr, since)| {
                let mut obj = Object::new();

                obj.insert("address".to_owned(), Value::String(addr.to_string()));
                obj.insert("since".to_owned(), secs(since));

                Value::Object(obj)
            })
            .collect();

        let banned: Array = self
            .banned
            .iter()
            .map(|(addr, entry)| {
                let mut obj = Object::new();

                obj.insert("address".to_owned(), Value::String(addr.to_string()));
                obj.insert("created".to_owned(), secs(&entry.created));
                obj.insert("until".to_owned(), secs(&entry.until));

                Value::Object(obj)
            })
            .collect();

        let mut obj = Object::new();
        obj.insert("discouraged".to_owned(), Value::Array(discouraged));
        obj.insert("banned".to_owned(), Value::Array(banned));

        Value::Object(obj)
    }

    /// Convert from a JSON value.
    pub fn from_json(v: Value) -> Result<Self, Error> {
        let mut obj = match v {
            Value::Object(obj) => obj,
            _ => return Err(Error::BanList("expected an object".to_owned())),
        };
        let mut list = BanList::default();

        for entry in array(obj.remove("discouraged"), "discouraged")? {
            let entry = object(entry)?;
            let addr = address(&entry)?;
            let since = time(&entry, "since")?;

            list.discouraged.insert(addr, since);
        }
        for entry in array(obj.remove("banned"), "banned")? {
            let entry = object(entry)?;
            let addr = address(&entry)?;
            let created = time(&entry, "created")?;
            let until = time(&entry, "until")?;

            list.banned.insert(addr, BanEntry { created, until });
        }
        Ok(list)
    }
}

fn array(v: Option<Value>, key: &str) -> Result<Array, Error> {
    match v {
        Some(Value::Array(ary)) => Ok(ary),
        None => Ok(Array::new()),
        _ => Err(Error::BanList(format!("`{}` is not an array", key))),
    }
}

fn object(v: Value) -> Result<Object, Error> {
    match v {
        Value::Object(obj) => Ok(obj),
        _ => Err(Error::BanList("entry is not an object".to_owned())),
    }
}

fn address(obj: &Object) -> Result<NetAddr, Error> {
    match obj.get("address") {
        Some(Value::String(addr)) => addr
            .parse::<NetAddr>()
            .map_err(|e| Error::BanList(e.to_string())),
        _ => Err(Error::BanList("missing `address`".to_owned())),
    }
}

fn time(obj: &Object, key: &str) -> Result<LocalTime, Error> {
    match obj.get(key) {
        Some(Value::Number(Number::U64(n))) => Ok(LocalTime::from_secs(*n)),
        _ => Err(Error::BanList(format!("missing or invalid `{}`", key))),
    }
}

/// Ban list storage.
pub trait Store: Send {
    /// Load the ban list.
    fn load(&mut self) -> Result<BanList, Error>;

    /// Replace the stored ban list.
    fn save(&mut self, list: &BanList) -> Result<(), Error>;
}

/// In-memory store. Nothing survives the process.
#[derive(Debug, Default, Clone)]
pub struct Memory {
    list: BanList,
}

impl Memory {
    /// The last saved list.
    pub fn list(&self) -> &BanList {
        &self.list
    }
}

impl Store for Memory {
    fn load(&mut self) -> Result<BanList, Error> {
        Ok(self.list.clone())
    }

    fn save(&mut self, list: &BanList) -> Result<(), Error> {
        self.list = list.clone();

        Ok(())
    }
}

/// A JSON file-backed implementation of [`Store`].
#[derive(Debug)]
pub struct File {
    file: fs::File,
}

impl File {
    /// Open a ban list file, creating it if it doesn't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map(|file| Self { file })
    }
}

impl Store for File {
    fn load(&mut self) -> Result<BanList, Error> {
        use io::{Read, Seek};

        let mut s = String::new();

        self.file.seek(io::SeekFrom::Start(0))?;
        self.file.read_to_string(&mut s)?;

        if s.trim().is_empty() {
            return Ok(BanList::default());
        }
        let val = microserde::json::from_str(&s)
            .map_err(|_| Error::BanList("malformed JSON".to_owned()))?;

        BanList::from_json(val)
    }

    fn save(&mut self, list: &BanList) -> Result<(), Error> {
        use io::{Seek, Write};

        let s = microserde::json::to_string(&list.to_json());

        self.file.set_len(0)?;
        self.file.seek(io::SeekFrom::Start(0))?;
        self.file.write_all(s.as_bytes())?;
        self.file.sync_data()?;

        Ok(())
    }
}
