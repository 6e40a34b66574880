//! Minimal VCF header model for rewriting the provenance of merged call sets.

use crate::error::{Result, VarcallError};

/// Meta-information lines (`##key=value`) plus the `#CHROM` column line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcfHeader {
    meta: Vec<String>,
    columns: String,
}

impl VcfHeader {
    /// Parse header text as printed by `bcftools view -h`.
    pub fn parse(text: &str, origin: &str) -> Result<Self> {
        let mut meta = Vec::new();
        let mut columns = None;

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.starts_with("##") {
                meta.push(line.to_string());
            } else if line.starts_with("#CHROM") {
                columns = Some(line.to_string());
            } else if !line.is_empty() {
                // Body lines after the header are ignored
                break;
            }
        }

        let columns = columns
            .ok_or_else(|| VarcallError::format(origin, "VCF header has no #CHROM line"))?;
        if meta.first().map_or(true, |l| !l.starts_with("##fileformat=")) {
            return Err(VarcallError::format(
                origin,
                "VCF header must start with ##fileformat",
            ));
        }

        Ok(Self { meta, columns })
    }

    pub fn meta_lines(&self) -> &[String] {
        &self.meta
    }

    /// Values of every `##key=` line.
    pub fn meta_values(&self, key: &str) -> Vec<&str> {
        let prefix = format!("##{}=", key);
        self.meta
            .iter()
            .filter_map(|line| line.strip_prefix(prefix.as_str()))
            .collect()
    }

    /// Remove meta lines whose key starts with any of the given prefixes.
    ///
    /// `##fileformat` is never removed.
    pub fn remove_keys_with_prefix(&mut self, prefixes: &[String]) -> usize {
        let before = self.meta.len();
        self.meta.retain(|line| {
            let key = meta_key(line);
            key == "fileformat" || !prefixes.iter().any(|p| key.starts_with(p.as_str()))
        });
        before - self.meta.len()
    }

    /// Replace all `##key=` lines with a single one at the first occurrence,
    /// or append it when the key is new.
    pub fn set(&mut self, key: &str, value: &str) {
        let line = format!("##{}={}", key, value);
        match self.meta.iter().position(|l| meta_key(l) == key) {
            Some(pos) => {
                self.meta[pos] = line;
                let mut idx = 0;
                self.meta.retain(|l| {
                    let keep = idx <= pos || meta_key(l) != key;
                    idx += 1;
                    keep
                });
            }
            None => self.meta.push(line),
        }
    }

    /// Remove all `##key=` lines.
    pub fn remove(&mut self, key: &str) {
        self.meta.retain(|l| meta_key(l) != key);
    }

    /// Append a structured `##key=<k1=v1,k2=v2>` line.
    pub fn push_structured(&mut self, key: &str, fields: &[(&str, String)]) {
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        self.meta.push(format!("##{}=<{}>", key, body));
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for line in &self.meta {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&self.columns);
        out.push('\n');
        out
    }
}

fn meta_key(line: &str) -> &str {
    let body = line.trim_start_matches('#');
    body.split_once('=').map_or(body, |(key, _)| key)
}

/// Quote a value for a structured meta line, escaping quotes and backslashes.
pub fn escape_meta_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
