//! Parser for the `sys_partition.fex` partition table embedded in Allwinner
//! firmware images.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    /// Size in 512-byte sectors.
    pub size: u64,
    pub downloadfile: String,
    pub user_type: u32,
    pub keydata: bool,
    pub encrypt: bool,
    pub verify: bool,
    pub ro: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionTable {
    /// Reserved region before the first partition, in KB.
    pub mbr_size: u32,
    pub partitions: Vec<Partition>,
}

impl PartitionTable {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    pub fn parse_bytes(data: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(data))
    }

    pub fn parse(input: &str) -> Self {
        let mut table = PartitionTable::default();
        let mut in_mbr = false;
        let mut in_partition = false;
        let mut current = Partition::default();

        for raw in input.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with("//") {
                continue;
            }

            match line {
                "[partition_start]" => {
                    in_partition = true;
                    in_mbr = false;
                    continue;
                }
                "[mbr]" => {
                    in_mbr = true;
                    in_partition = false;
                    continue;
                }
                "[partition]" => {
                    in_mbr = false;
                    if !current.name.is_empty() {
                        table.partitions.push(std::mem::take(&mut current));
                    }
                    current = Partition::default();
                    in_partition = true;
                    continue;
                }
                _ => {}
            }

            if in_mbr {
                if let Some(rest) = line.strip_prefix("size") {
                    let rest = rest.trim_start_matches([' ', '\t']);
                    if let Some(value) = rest.strip_prefix('=') {
                        let mut value = value.trim_start_matches([' ', '\t']);
                        table.mbr_size = parse_number(&mut value) as u32;
                    }
                }
            } else if in_partition {
                parse_partition_line(line, &mut current);
            }
        }

        if in_partition && !current.name.is_empty() {
            table.partitions.push(current);
        }

        table
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partition_by_name(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    pub fn has_partition(&self, name: &str) -> bool {
        self.partitions.iter().any(|p| p.name == name)
    }

    /// Fixed-width table with one-letter flag codes, the layout the stock
    /// tool prints.
    pub fn dump_to_string(&self) -> String {
        let rule = "-".repeat(104);
        let mut out = String::new();
        out.push_str("\nPartition details:\n");
        out.push_str(&rule);
        out.push('\n');
        out.push_str(&format!(
            "{:<20}{:<20}{:<35}{:<10}{}\n",
            "Name", "Size", "Download File", "User Type", "Flags"
        ));
        out.push_str(&rule);
        out.push('\n');

        for partition in &self.partitions {
            let downloadfile = if partition.downloadfile.is_empty() {
                "-"
            } else {
                &partition.downloadfile
            };
            let mut flags = String::new();
            if partition.keydata {
                flags.push('K');
            }
            if partition.encrypt {
                flags.push('E');
            }
            if partition.verify {
                flags.push('V');
            }
            if partition.ro {
                flags.push('R');
            }
            if flags.is_empty() {
                flags.push('-');
            }
            out.push_str(&format!(
                "{:<20}{:<20}{:<35}{:<10}{}\n",
                partition.name,
                partition.size,
                downloadfile,
                format!("0x{:04x}", partition.user_type),
                flags
            ));
        }

        out.push_str("\nFlags: K=KeyData, E=Encrypt, V=Verify, R=Read-Only\n");
        out
    }

    pub fn dump_to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Format(e.to_string()))
    }
}

fn parse_partition_line(line: &str, partition: &mut Partition) {
    let mut s = line;
    let key = parse_identifier(&mut s);
    if key.is_empty() {
        return;
    }
    s = s.trim_start_matches([' ', '\t']);
    let Some(rest) = s.strip_prefix('=') else {
        return;
    };
    let mut s = rest.trim_start_matches([' ', '\t']);

    match key.as_str() {
        "name" => partition.name = parse_identifier(&mut s),
        "size" => partition.size = parse_number(&mut s),
        "downloadfile" => {
            partition.downloadfile = if s.starts_with('"') {
                parse_quoted(&mut s)
            } else {
                parse_identifier(&mut s)
            }
        }
        "user_type" => partition.user_type = parse_number(&mut s) as u32,
        "keydata" => partition.keydata = parse_number(&mut s) != 0,
        "encrypt" => partition.encrypt = parse_number(&mut s) != 0,
        "verify" => partition.verify = parse_number(&mut s) != 0,
        "ro" => partition.ro = parse_number(&mut s) != 0,
        _ => {}
    }
}

/// Identifier extended with the path characters download files use.
fn parse_identifier(s: &mut &str) -> String {
    let mut end = 0;
    for (i, c) in s.char_indices() {
        let ok = c.is_ascii_alphanumeric()
            || matches!(c, '_' | '-' | '.' | '/' | '\\' | ':' | '#' | '(' | ')');
        if !ok {
            break;
        }
        end = i + c.len_utf8();
    }
    let (ident, rest) = s.split_at(end);
    *s = rest;
    ident.to_string()
}

fn parse_quoted(s: &mut &str) -> String {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, '"')) => {}
        _ => return String::new(),
    }

    let mut out = String::new();
    let mut escape = false;
    for (i, c) in chars {
        if escape {
            out.push(c);
            escape = false;
            continue;
        }
        if c == '\\' {
            escape = true;
            continue;
        }
        if c == '"' {
            *s = &s[i + 1..];
            return out;
        }
        out.push(c);
    }
    *s = "";
    out
}

/// Decimal or `0x` hexadecimal literal.
fn parse_number(s: &mut &str) -> u64 {
    let bytes = s.as_bytes();
    let (base, mut pos) = if bytes.len() >= 2 && bytes[0] == b'0' && (bytes[1] | 0x20) == b'x' {
        (16u64, 2usize)
    } else {
        (10, 0)
    };

    let mut value = 0u64;
    while pos < bytes.len() {
        match (bytes[pos] as char).to_digit(base as u32) {
            Some(d) => {
                value = value.wrapping_mul(base).wrapping_add(d as u64);
                pos += 1;
            }
            None => break,
        }
    }
    *s = &s[pos..];
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "[mbr]\n\
size = 20480\n\
[partition_start]\n\
[partition]\n\
name = boot-resource\n\
size = 256\n\
downloadfile = \"boot-resource.fex\"\n\
user_type = 0x8000\n";

    #[test]
    fn test_parse_sample() {
        let table = PartitionTable::parse(SAMPLE);
        assert_eq!(table.mbr_size, 20480);
        assert_eq!(table.partitions.len(), 1);

        let p = &table.partitions[0];
        assert_eq!(p.name, "boot-resource");
        assert_eq!(p.size, 256);
        assert_eq!(p.downloadfile, "boot-resource.fex");
        assert_eq!(p.user_type, 0x8000);
        assert!(!p.keydata && !p.encrypt && !p.verify && !p.ro);
    }

    #[test]
    fn test_mbr_only() {
        let table = PartitionTable::parse("[mbr]\nsize = 16384\n");
        assert_eq!(table.mbr_size, 16384);
        assert!(table.partitions.is_empty());
    }

    #[test]
    fn test_flags_and_unquoted_downloadfile() {
        let input = "[mbr]\n\
size = 20480\n\
[partition_start]\n\
[partition]\n\
name = rootfs\n\
size = 0x4000\n\
downloadfile = rootfs.fex\n\
user_type = 0x8100\n\
keydata = 1\n\
encrypt = 0\n\
verify = 1\n\
ro = 1\n\
[partition]\n\
name = UDISK\n\
user_type = 0x8100\n";
        let table = PartitionTable::parse(input);
        assert_eq!(table.partitions.len(), 2);

        let rootfs = table.partition_by_name("rootfs").unwrap();
        assert_eq!(rootfs.size, 0x4000);
        assert_eq!(rootfs.downloadfile, "rootfs.fex");
        assert!(rootfs.keydata && rootfs.verify && rootfs.ro);
        assert!(!rootfs.encrypt);

        let udisk = table.partition_by_name("UDISK").unwrap();
        assert_eq!(udisk.size, 0);
        assert_eq!(udisk.downloadfile, "");
        assert!(table.has_partition("UDISK"));
        assert!(!table.has_partition("missing"));
    }

    #[test]
    fn test_comments_and_unknown_keys_ignored() {
        let input = "; banner comment\n\
// other comment style\n\
[mbr]\n\
size = 2048\n\
[partition_start]\n\
[partition]\n\
name = boot\n\
size = 100\n\
mystery_key = 7\n";
        let table = PartitionTable::parse(input);
        assert_eq!(table.mbr_size, 2048);
        assert_eq!(table.partitions.len(), 1);
        assert_eq!(table.partitions[0].size, 100);
    }

    #[test]
    fn test_dump_to_string_layout() {
        let table = PartitionTable::parse(SAMPLE);
        let dump = table.dump_to_string();
        assert!(dump.contains("Name"));
        assert!(dump.contains("boot-resource"));
        assert!(dump.contains("0x8000"));
        assert!(dump.contains("Flags: K=KeyData, E=Encrypt, V=Verify, R=Read-Only"));
        // no flags set renders as a dash
        let row = dump.lines().find(|l| l.starts_with("boot-resource")).unwrap();
        assert!(row.trim_end().ends_with('-'));
    }

    #[test]
    fn test_json_roundtrip() {
        let table = PartitionTable::parse(SAMPLE);
        let json = table.dump_to_json().unwrap();
        let back: PartitionTable = serde_json::from_str(&json).unwrap();
        assert_eq!(table, back);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["mbr_size"], 20480);
        assert_eq!(value["partitions"][0]["name"], "boot-resource");
        assert_eq!(value["partitions"][0]["keydata"], false);
    }
}
