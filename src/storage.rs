//! File-backed key/value store for shoot presets and miscellaneous settings.
//!
//! On-disk format: a single flag byte (0 means a DEFLATE stream follows,
//! any printable ASCII byte means the body is raw UTF-8), then a text body
//! of `version: 2` followed by one `<encoded-key>\t<encoded-value>` line
//! per entry. Version 1 files (base64 values) are still read.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::utils::Color;

const DEFLATE_FLAG: u8 = 0;
const ACTUAL_VERSION: u32 = 2;
const FLUSH_PERIOD: Duration = Duration::from_secs(5);

/* not proper protection or anything, just keeps a few values from being
   plain-texted in the save file */
const OBFUSCATION_SUFFIX: &str = "encisfinedontworry";

pub struct Storage {
    inner: Arc<Inner>,
}

struct Inner {
    map: Mutex<HashMap<String, String>>,
    dirty: AtomicBool,
    filename: Option<PathBuf>,
    disable_compression: bool,
}

impl Storage {
    /// Opens the store, loading existing data. Any I/O or parse problem
    /// results in an empty store; nothing is propagated.
    pub fn new(filename: Option<PathBuf>, disable_compression: bool) -> Self {
        let inner = Arc::new(Inner {
            map: Mutex::new(HashMap::new()),
            dirty: AtomicBool::new(false),
            filename,
            disable_compression,
        });
        inner.load();

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        std::thread::spawn(move || loop {
            std::thread::sleep(FLUSH_PERIOD);
            match weak.upgrade() {
                Some(inner) => inner.flush_if_dirty(),
                None => break,
            }
        });

        Self { inner }
    }

    /// In-memory store without a backing file; never persists.
    pub fn in_memory() -> Self {
        Self::new(None, false)
    }

    pub fn len(&self) -> usize {
        self.inner.map.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.map.lock().unwrap().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.map.lock().unwrap().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) {
        let mut map = self.inner.map.lock().unwrap();
        if map.get(key).map(String::as_str) == Some(value) {
            return;
        }
        map.insert(key.to_string(), value.to_string());
        drop(map);
        self.inner.dirty.store(true, Ordering::Release);
    }

    pub fn remove(&self, key: &str) {
        let mut map = self.inner.map.lock().unwrap();
        if map.remove(key).is_some() {
            drop(map);
            self.inner.dirty.store(true, Ordering::Release);
        }
    }

    /// Removes every key matching the predicate.
    pub fn clean_up(&self, predicate: impl Fn(&str) -> bool) {
        let mut map = self.inner.map.lock().unwrap();
        map.retain(|k, _| !predicate(k));
        drop(map);
        self.inner.dirty.store(true, Ordering::Release);
    }

    /// Writes pending changes out immediately. Call before shutdown.
    pub fn save_now(&self) {
        self.inner.save();
        self.inner.dirty.store(false, Ordering::Release);
    }

    /* typed helpers */

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn set_int(&self, key: &str, value: i64) {
        self.set(key, &value.to_string());
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).map(|v| v == "1").unwrap_or(default)
    }

    pub fn set_bool(&self, key: &str, value: bool) {
        self.set(key, if value { "1" } else { "0" });
    }

    pub fn get_double(&self, key: &str, default: f64) -> f64 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn set_double(&self, key: &str, value: f64) {
        self.set(key, &value.to_string());
    }

    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(v) if !v.is_empty() => v.split('\n').map(decode).collect(),
            _ => Vec::new(),
        }
    }

    pub fn set_string_list<I, S>(&self, key: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = values
            .into_iter()
            .map(|s| encode(s.as_ref()))
            .collect::<Vec<_>>()
            .join("\n");
        self.set(key, &joined);
    }

    pub fn get_duration(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(default)
    }

    pub fn set_duration(&self, key: &str, value: Duration) {
        self.set(key, &value.as_secs_f64().to_string());
    }

    pub fn get_date_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key)
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|d| d.with_timezone(&Utc))
    }

    pub fn set_date_time(&self, key: &str, value: DateTime<Utc>) {
        self.set(key, &value.to_rfc3339());
    }

    pub fn get_uri(&self, key: &str) -> Option<url::Url> {
        let raw = self.get(key)?;
        match url::Url::parse(&raw) {
            Ok(u) => Some(u),
            Err(e) => {
                log::warn!("cannot load uri: {e}");
                None
            }
        }
    }

    pub fn set_uri(&self, key: &str, value: &url::Url) {
        self.set(key, value.as_str());
    }

    pub fn get_color(&self, key: &str) -> Option<Color> {
        self.get(key)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|v| Color::unpack(v as i32))
    }

    pub fn set_color(&self, key: &str, value: Color) {
        self.set_int(key, value.pack() as i64);
    }

    /* obfuscated values */

    pub fn get_encrypted(&self, key: &str, default: Option<&str>) -> Option<String> {
        let raw = match self.get(key) {
            Some(r) => r,
            None => return default.map(str::to_string),
        };
        let bytes = match BASE64.decode(raw.as_bytes()) {
            Ok(b) => b,
            Err(_) => return default.map(str::to_string),
        };
        let plain = match String::from_utf8(xor_cipher(&bytes, key)) {
            Ok(p) => p,
            Err(_) => return default.map(str::to_string),
        };
        match plain.strip_suffix(OBFUSCATION_SUFFIX) {
            Some(value) => Some(value.to_string()),
            None => default.map(str::to_string),
        }
    }

    pub fn set_encrypted(&self, key: &str, value: &str) {
        let plain = format!("{value}{OBFUSCATION_SUFFIX}");
        let encoded = BASE64.encode(xor_cipher(plain.as_bytes(), key));
        self.set(key, &encoded);
    }
}

impl Inner {
    fn load(&self) {
        let filename = match &self.filename {
            Some(f) if f.exists() => f.clone(),
            _ => return,
        };

        let result = std::fs::read(&filename)
            .map_err(|e| e.to_string())
            .and_then(|bytes| decode_bytes(&bytes))
            .and_then(|text| parse_body(&text));

        let mut map = self.map.lock().unwrap();
        match result {
            Ok(parsed) => *map = parsed,
            Err(e) => {
                log::warn!("cannot load data: {e}");
                map.clear();
            }
        }
    }

    fn flush_if_dirty(&self) {
        if self.dirty.swap(false, Ordering::AcqRel) {
            self.save();
        }
    }

    fn save(&self) {
        let filename = match &self.filename {
            Some(f) => f.clone(),
            None => return,
        };

        // snapshot under the lock, serialize and write outside it
        let snapshot: Vec<(String, String)> = {
            let map = self.map.lock().unwrap();
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut body = format!("version: {ACTUAL_VERSION}");
        for (k, v) in &snapshot {
            body.push('\n');
            body.push_str(&encode(k));
            body.push('\t');
            body.push_str(&encode(v));
        }

        let bytes = if self.disable_compression {
            body.into_bytes()
        } else {
            match encode_deflate(&body) {
                Ok(b) => b,
                Err(e) => {
                    log::warn!("cannot save values: {e}");
                    return;
                }
            }
        };

        // whole-file replace so a crash mid-write leaves the old data intact
        let tmp = filename.with_extension("tmp");
        let written = std::fs::write(&tmp, &bytes).and_then(|_| std::fs::rename(&tmp, &filename));
        if let Err(e) = written {
            log::warn!("cannot save values: {e}");
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.inner.flush_if_dirty();
    }
}

/// Line-level escaping: backslash, LF and TAB are escaped; CR and BS are
/// silently dropped.
pub fn encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 5);
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\t' => result.push_str("\\t"),
            '\r' | '\u{8}' => {}
            _ => result.push(c),
        }
    }
    result
}

pub fn decode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => result.push('\\'),
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            _ => {}
        }
    }
    result
}

fn encode_deflate(body: &str) -> std::io::Result<Vec<u8>> {
    let mut output = vec![DEFLATE_FLAG];
    let mut encoder = DeflateEncoder::new(&mut output, Compression::default());
    encoder.write_all(body.as_bytes())?;
    encoder.finish()?;
    Ok(output)
}

fn decode_bytes(bytes: &[u8]) -> Result<String, String> {
    if bytes.is_empty() {
        return Ok(String::new());
    }

    let deflate_mode = bytes[0] == DEFLATE_FLAG;
    if !deflate_mode
        && !bytes
            .iter()
            .any(|&b| b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
    {
        return String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string());
    }

    let offset = if deflate_mode { 1 } else { 0 };
    let mut decoder = DeflateDecoder::new(&bytes[offset..]);
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .map_err(|e| e.to_string())?;
    Ok(text)
}

fn parse_body(text: &str) -> Result<HashMap<String, String>, String> {
    let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
    let header = lines.next().unwrap_or("");
    let version: u32 = header
        .strip_prefix("version:")
        .map(str::trim)
        .ok_or_else(|| format!("bad header: {header:?}"))?
        .parse()
        .map_err(|e| format!("bad version: {e}"))?;

    let mut map = HashMap::new();
    match version {
        2 => {
            for line in lines {
                if let Some((k, v)) = line.split_once('\t') {
                    map.insert(decode(k), decode(v));
                }
            }
        }
        1 => {
            for line in lines {
                if let Some((k, v)) = line.split_once('\t') {
                    let decoded = BASE64
                        .decode(v.as_bytes())
                        .ok()
                        .and_then(|b| String::from_utf8(b).ok());
                    if let Some(value) = decoded {
                        map.insert(k.to_string(), value);
                    }
                }
            }
        }
        other => return Err(format!("invalid version: {other}")),
    }
    Ok(map)
}

fn xor_cipher(data: &[u8], key: &str) -> Vec<u8> {
    let key = key.as_bytes();
    if key.is_empty() {
        return data.to_vec();
    }
    data.iter()
        .enumerate()
        .map(|(i, &b)| b ^ key[i % key.len()])
        .collect()
}
