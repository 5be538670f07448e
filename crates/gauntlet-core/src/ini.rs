use thiserror::Error;

/// Errors produced while reading an ini document.
#[derive(Debug, Error)]
pub enum IniError {
    #[error("line {line}: expected '[section]' or 'key = value', got '{text}'")]
    Malformed { line: usize, text: String },
    #[error("line {line}: section header is missing its closing ']'")]
    UnterminatedSection { line: usize },
    #[error("line {line}: key '{key}' appears before any section header")]
    KeyOutsideSection { line: usize, key: String },
    #[error("line {line}: continuation line without a preceding key")]
    OrphanContinuation { line: usize },
}

/// An ordered, untyped view of an ini file.
///
/// Values keep their continuation lines joined with `\n`; interpreting a
/// value as a list, a mapping, or a boolean is the caller's concern.
#[derive(Debug, Default)]
pub struct IniDocument {
    sections: Vec<IniSection>,
}

#[derive(Debug)]
pub struct IniSection {
    name: String,
    entries: Vec<(String, String)>,
}

impl IniDocument {
    /// Parses ini text.
    ///
    /// Dialect: `[name]` section headers, `key = value` entries, full-line
    /// `#`/`;` comments, and indented continuation lines appended to the
    /// previous key's value.
    pub fn parse(text: &str) -> Result<Self, IniError> {
        let mut doc = Self::default();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            if raw.starts_with([' ', '\t']) {
                let entry = doc
                    .sections
                    .last_mut()
                    .and_then(|section| section.entries.last_mut())
                    .ok_or(IniError::OrphanContinuation { line })?;
                if !entry.1.is_empty() {
                    entry.1.push('\n');
                }
                entry.1.push_str(trimmed);
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .ok_or(IniError::UnterminatedSection { line })?;
                doc.sections.push(IniSection {
                    name: name.trim().to_string(),
                    entries: Vec::new(),
                });
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(IniError::Malformed {
                    line,
                    text: trimmed.to_string(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(IniError::Malformed {
                    line,
                    text: trimmed.to_string(),
                });
            }

            let section = doc.sections.last_mut().ok_or(IniError::KeyOutsideSection {
                line,
                key: key.to_string(),
            })?;
            section
                .entries
                .push((key.to_string(), value.trim().to_string()));
        }

        Ok(doc)
    }

    /// Returns the first section with the given name.
    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|section| section.name == name)
    }

    pub fn sections(&self) -> impl Iterator<Item = &IniSection> {
        self.sections.iter()
    }
}

impl IniSection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}
