//! Section based `key = value` files
//!
//! Used for both the daemon configuration and the wg-quick interface files.
//! Sections may repeat (one `[Peer]` per downstream client) and are kept in
//! file order within a name. Anything that is not a comment, a section header
//! or a `key = value` pair inside a section is ignored.

use std::collections::BTreeMap;
use std::path::Path;

/// Key/value pairs of one section
pub type IniSection = BTreeMap<String, String>;

/// Parsed file: section name to every occurrence of that section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniFile {
    sections: BTreeMap<String, Vec<IniSection>>,
}

impl IniFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse file contents
    pub fn parse(text: &str) -> Self {
        let mut file = IniFile::new();
        let mut current: Option<(String, IniSection)> = None;

        for line in text.lines() {
            let line = line.trim_start();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(name) = parse_section_header(line) {
                if let Some((name, section)) = current.take() {
                    file.push(&name, section);
                }
                current = Some((name.to_string(), IniSection::new()));
                continue;
            }

            // Pairs outside any section are dropped
            if let (Some((key, value)), Some((_, section))) = (parse_pair(line), current.as_mut()) {
                section.insert(key.to_string(), value.to_string());
            }
        }

        if let Some((name, section)) = current.take() {
            file.push(&name, section);
        }

        file
    }

    /// Read and parse a file from disk
    pub async fn read(path: &Path) -> std::io::Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(Self::parse(&text))
    }

    /// Overwrite `path` with the rendered contents
    ///
    /// The file is truncated in place, so a symlink at `path` keeps pointing
    /// at the same target.
    pub async fn write(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::write(path, self.render()).await
    }

    /// Render sections sorted by name, each followed by a blank line
    pub fn render(&self) -> String {
        let mut out = String::new();

        for (name, sections) in &self.sections {
            for section in sections {
                out.push_str(&format!("[{}]\n", name));
                for (key, value) in section {
                    out.push_str(&format!("{} = {}\n", key, value));
                }
                out.push('\n');
            }
        }

        out
    }

    /// First occurrence of a section
    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.get(name).and_then(|all| all.first())
    }

    /// Every occurrence of a section, in file order
    pub fn sections(&self, name: &str) -> &[IniSection] {
        self.sections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn sections_mut(&mut self, name: &str) -> &mut Vec<IniSection> {
        self.sections.entry(name.to_string()).or_default()
    }

    /// Append another occurrence of a section
    pub fn push(&mut self, name: &str, section: IniSection) {
        self.sections_mut(name).push(section);
    }

    /// Replace every occurrence of a section with a single one
    pub fn set(&mut self, name: &str, section: IniSection) {
        self.sections.insert(name.to_string(), vec![section]);
    }

    /// Single value lookup in the first occurrence of a section
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.values().all(Vec::is_empty)
    }
}

/// Build a section from literal pairs
pub fn section<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> IniSection
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn parse_section_header(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('[')?;
    let end = rest.find(']')?;
    let name = &rest[..end];

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    Some(name)
}

fn parse_pair(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();

    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    Some((key, value.trim()))
}
